//! Process supervision
//!
//! Spawns the agent executable with piped stdio, injects the credential and
//! correlation id through the environment (never argv), writes the
//! conversation to stdin, and streams stdout/stderr lines back over a
//! channel. A hard wall-clock deadline kills the process; so does session
//! termination or operation cancellation.

use std::process::Stdio;
use std::sync::Arc;

use ace_types::{
    cancel_pair, validate_session_transition, CancelHandle, CancelSignal, CorrelationId,
    Credential, EngineConfig, SessionState,
};
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Environment variable carrying the credential token to the agent
pub const TOKEN_ENV: &str = "ACE_AGENT_TOKEN";

/// Environment variable carrying the correlation id to the agent
pub const CORRELATION_ENV: &str = "ACE_CORRELATION_ID";

const ITEM_CHANNEL_CAPACITY: usize = 256;

/// Which pipe a line arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    Stdout,
    Stderr,
}

/// One item from a supervised session.
///
/// Line items stream in order; exactly one of the remaining variants closes
/// the stream.
#[derive(Debug)]
pub enum SessionItem {
    /// One line of process output
    Line {
        channel: OutputChannel,
        text: String,
    },
    /// The process exited on its own
    Exited { code: Option<i32>, success: bool },
    /// The hard deadline fired and the process was killed
    TimedOut,
    /// The session was cancelled or terminated and the process was killed
    Cancelled,
}

/// Spawn-time failures
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// An agent process is already running for this correlation id
    #[error("a session is already running for {correlation_id}")]
    AlreadyRunning { correlation_id: CorrelationId },
    /// The OS refused the spawn
    #[error("spawning agent process: {0}")]
    Io(#[from] std::io::Error),
    /// A stdio pipe was not available on the child
    #[error("agent process is missing a stdio pipe")]
    MissingPipe,
}

/// A live supervised agent session
#[derive(Debug)]
pub struct Session {
    correlation_id: CorrelationId,
    items: mpsc::Receiver<SessionItem>,
    kill: CancelHandle,
}

impl Session {
    #[inline]
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// The next session item, or `None` once the stream is closed.
    pub async fn next_item(&mut self) -> Option<SessionItem> {
        self.items.recv().await
    }

    /// Kill the underlying process. Idempotent.
    pub fn terminate(&self) {
        self.kill.cancel();
    }
}

/// Spawns and tracks agent sessions
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    registry: Arc<DashMap<CorrelationId, SessionState>>,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently in the `Running` state
    #[must_use]
    pub fn running_sessions(&self) -> usize {
        self.registry
            .iter()
            .filter(|entry| *entry.value() == SessionState::Running)
            .count()
    }

    /// The tracked state of one session, if any
    #[must_use]
    pub fn session_state(&self, correlation_id: CorrelationId) -> Option<SessionState> {
        self.registry.get(&correlation_id).map(|entry| *entry)
    }

    /// Spawn the agent process for one operation attempt.
    ///
    /// The conversation is written to stdin and stdin is closed; the
    /// credential token and correlation id travel through the environment.
    /// At most one session may be live per correlation id.
    ///
    /// # Errors
    /// [`SpawnError::AlreadyRunning`] when a session for this id is live,
    /// [`SpawnError::Io`] when the OS refuses the spawn.
    pub async fn spawn(
        &self,
        correlation_id: CorrelationId,
        conversation_wire: String,
        credential: &Credential,
        config: &EngineConfig,
        deadline: Instant,
        cancel: CancelSignal,
    ) -> Result<Session, SpawnError> {
        use dashmap::mapref::entry::Entry;
        match self.registry.entry(correlation_id) {
            Entry::Occupied(_) => {
                return Err(SpawnError::AlreadyRunning { correlation_id });
            }
            Entry::Vacant(slot) => {
                slot.insert(SessionState::Starting);
            }
        }

        let mut command = Command::new(&config.executable);
        command
            .args(config.agent_args())
            .env(TOKEN_ENV, credential.token.expose())
            .env(CORRELATION_ENV, correlation_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.registry.remove(&correlation_id);
                return Err(SpawnError::Io(err));
            }
        };

        let Some(mut stdin) = child.stdin.take() else {
            self.registry.remove(&correlation_id);
            return Err(SpawnError::MissingPipe);
        };
        let Some(stdout) = child.stdout.take() else {
            self.registry.remove(&correlation_id);
            return Err(SpawnError::MissingPipe);
        };
        let Some(stderr) = child.stderr.take() else {
            self.registry.remove(&correlation_id);
            return Err(SpawnError::MissingPipe);
        };

        advance(&self.registry, correlation_id, SessionState::Running);
        tracing::debug!(%correlation_id, pid = child.id(), "agent process spawned");

        // Stdin delivery runs independently so a child that never reads
        // cannot block the supervision loop.
        tokio::spawn(async move {
            let _ = stdin.write_all(conversation_wire.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let (items_tx, items_rx) = mpsc::channel(ITEM_CHANNEL_CAPACITY);
        let (kill_handle, kill_signal) = cancel_pair();

        let registry = Arc::clone(&self.registry);
        tokio::spawn(run_session(
            correlation_id,
            child,
            stdout,
            stderr,
            items_tx,
            cancel,
            kill_signal,
            deadline,
            registry,
        ));

        Ok(Session {
            correlation_id,
            items: items_rx,
            kill: kill_handle,
        })
    }
}

/// Reader loop for one spawned process.
#[allow(clippy::too_many_arguments)]
async fn run_session(
    correlation_id: CorrelationId,
    mut child: Child,
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    items: mpsc::Sender<SessionItem>,
    cancel: CancelSignal,
    kill: CancelSignal,
    deadline: Instant,
    registry: Arc<DashMap<CorrelationId, SessionState>>,
) {
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stdout_open = true;
    let mut stderr_open = true;

    let outcome = loop {
        if !stdout_open && !stderr_open {
            // The reap itself stays bounded: a child that closes its pipes
            // but keeps running still dies at the deadline, on cancel, or
            // on terminate.
            break tokio::select! {
                () = cancel.cancelled() => {
                    kill_and_reap(&mut child).await;
                    SessionItem::Cancelled
                }
                () = kill.cancelled() => {
                    kill_and_reap(&mut child).await;
                    SessionItem::Cancelled
                }
                () = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(%correlation_id, "hard deadline fired; killing agent process");
                    kill_and_reap(&mut child).await;
                    SessionItem::TimedOut
                }
                status = child.wait() => match status {
                    Ok(status) => SessionItem::Exited {
                        code: status.code(),
                        success: status.success(),
                    },
                    Err(err) => {
                        tracing::error!(%correlation_id, error = %err, "waiting on agent process");
                        SessionItem::Exited {
                            code: None,
                            success: false,
                        }
                    }
                },
            };
        }

        tokio::select! {
            () = cancel.cancelled() => {
                kill_and_reap(&mut child).await;
                break SessionItem::Cancelled;
            }
            () = kill.cancelled() => {
                kill_and_reap(&mut child).await;
                break SessionItem::Cancelled;
            }
            () = tokio::time::sleep_until(deadline) => {
                tracing::warn!(%correlation_id, "hard deadline fired; killing agent process");
                kill_and_reap(&mut child).await;
                break SessionItem::TimedOut;
            }
            line = stdout_lines.next_line(), if stdout_open => match line {
                Ok(Some(text)) => {
                    let item = SessionItem::Line {
                        channel: OutputChannel::Stdout,
                        text,
                    };
                    if items.send(item).await.is_err() {
                        // Receiver dropped: nobody is listening anymore.
                        kill_and_reap(&mut child).await;
                        break SessionItem::Cancelled;
                    }
                }
                Ok(None) => stdout_open = false,
                Err(err) => {
                    tracing::debug!(%correlation_id, error = %err, "stdout read failed");
                    stdout_open = false;
                }
            },
            line = stderr_lines.next_line(), if stderr_open => match line {
                Ok(Some(text)) => {
                    let item = SessionItem::Line {
                        channel: OutputChannel::Stderr,
                        text,
                    };
                    if items.send(item).await.is_err() {
                        kill_and_reap(&mut child).await;
                        break SessionItem::Cancelled;
                    }
                }
                Ok(None) => stderr_open = false,
                Err(err) => {
                    tracing::debug!(%correlation_id, error = %err, "stderr read failed");
                    stderr_open = false;
                }
            },
        }
    };

    let end_state = match &outcome {
        SessionItem::Exited { success: true, .. } => SessionState::Completed,
        SessionItem::TimedOut => SessionState::TimedOut,
        _ => SessionState::Failed,
    };
    advance(&registry, correlation_id, end_state);
    advance(&registry, correlation_id, SessionState::Terminated);
    registry.remove(&correlation_id);

    let _ = items.send(outcome).await;
}

async fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        tracing::debug!(error = %err, "kill signal not delivered");
    }
    let _ = child.wait().await;
}

/// Apply a validated session state transition, logging violations instead of
/// applying them.
fn advance(
    registry: &DashMap<CorrelationId, SessionState>,
    correlation_id: CorrelationId,
    to: SessionState,
) {
    if let Some(mut entry) = registry.get_mut(&correlation_id) {
        match validate_session_transition(*entry, to) {
            Ok(()) => *entry = to,
            Err(err) => {
                tracing::error!(%correlation_id, error = %err, "session state violation");
            }
        }
    }
}
