//! Cooperative cancellation
//!
//! One cancellation signal is threaded through every suspension point of an
//! operation: the credential wait, the process read loop, and the approval
//! wait. The handle side stays with the caller; the signal side is cloned
//! into the driver tasks.

use tokio::sync::watch;

/// Creates a connected cancellation handle/signal pair.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Caller-held side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observer side of a cancellation pair. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    ///
    /// If the handle is dropped without cancelling, this never resolves;
    /// callers always race it against the work itself in a `select!`.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_propagates_to_signal() {
        let (handle, signal) = cancel_pair();
        assert!(!signal.is_cancelled());

        handle.cancel();
        assert!(signal.is_cancelled());
        signal.cancelled().await; // resolves immediately
    }

    #[tokio::test]
    async fn uncancelled_signal_stays_pending() {
        let (_handle, signal) = cancel_pair();
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            signal.cancelled(),
        )
        .await;
        assert!(waited.is_err());
    }
}
