//! The engine
//!
//! [`Engine::submit`] turns a conversation into an [`OperationHandle`]: a
//! stream of classified events followed by exactly one terminal update. Each
//! operation runs on its own driver task behind a fair concurrency permit,
//! so excess submissions queue FIFO and none are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use ace_auth::CredentialGate;
use ace_classify::{Classifier, DenyList};
use ace_types::{
    cancel_pair, validate_operation_transition, CancelHandle, CancelSignal, ClassifiedError,
    Conversation, CorrelationId, EngineConfig, EngineUpdate, ErrorCategory, LogRecord,
    LogSeverity, OperationState, OutputEvent, RunResult, UsageStats,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

use crate::arbiter::{ApprovalHandler, ConfirmationArbiter, ConfirmationOutcome};
use crate::recovery::{ErrorClassifier, RecoveryPolicy, RecoveryStep};
use crate::supervisor::{OutputChannel, ProcessSupervisor, Session, SessionItem, SpawnError};
use crate::tracker::CorrelationTracker;

const UPDATE_CHANNEL_CAPACITY: usize = 64;
const STDERR_TAIL_LIMIT: usize = 4096;

/// Counters across the engine's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    /// High-water mark of operations waiting for a permit
    pub peak_queued: u64,
}

/// Handle to one in-flight operation
pub struct OperationHandle {
    correlation_id: CorrelationId,
    updates: mpsc::Receiver<EngineUpdate>,
    cancel: CancelHandle,
    finished: bool,
}

impl OperationHandle {
    #[inline]
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// The next update. Yields `None` after the terminal update has been
    /// observed.
    pub async fn next(&mut self) -> Option<EngineUpdate> {
        if self.finished {
            return None;
        }
        match self.updates.recv().await {
            Some(update) => {
                if update.is_terminal() {
                    self.finished = true;
                }
                Some(update)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Request cancellation. The stream still ends with one terminal update.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream, separating events from the terminal update.
    pub async fn collect(mut self) -> (Vec<OutputEvent>, Result<RunResult, ClassifiedError>) {
        let mut events = Vec::new();
        while let Some(update) = self.next().await {
            match update {
                EngineUpdate::Event(event) => events.push(event),
                EngineUpdate::Done(result) => return (events, Ok(result)),
                EngineUpdate::Failed(err) => return (events, Err(err)),
            }
        }
        let err = ClassifiedError::internal(
            self.correlation_id,
            "update stream closed without a terminal update",
        );
        (events, Err(err))
    }
}

/// The stateful agent interaction engine
pub struct Engine {
    config: EngineConfig,
    gate: Arc<CredentialGate>,
    arbiter: Arc<ConfirmationArbiter>,
    supervisor: Arc<ProcessSupervisor>,
    tracker: CorrelationTracker,
    policy: RecoveryPolicy,
    deny: DenyList,
    permits: Arc<Semaphore>,
    stats: Arc<Mutex<EngineStats>>,
    queued: Arc<Mutex<u64>>,
}

impl Engine {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        gate: CredentialGate,
        approvals: Arc<dyn ApprovalHandler>,
    ) -> Self {
        let deny = DenyList::with_extra(config.extra_deny_patterns.iter().cloned());
        let arbiter = Arc::new(ConfirmationArbiter::new(
            approvals,
            config.approval_timeout,
        ));
        let permits = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            config,
            gate: Arc::new(gate),
            arbiter,
            supervisor: Arc::new(ProcessSupervisor::new()),
            tracker: CorrelationTracker::new(),
            policy: RecoveryPolicy::default(),
            deny,
            permits,
            stats: Arc::new(Mutex::new(EngineStats::default())),
            queued: Arc::new(Mutex::new(0)),
        }
    }

    /// With a non-default recovery policy
    #[must_use]
    pub fn with_recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The correlation tracker backing this engine
    #[must_use]
    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }

    /// The complete correlated trace for one operation
    #[must_use]
    pub fn trace(&self, correlation_id: CorrelationId) -> Vec<LogRecord> {
        self.tracker.trace(correlation_id)
    }

    /// Lifetime counters
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        *self.stats.lock()
    }

    /// Agent processes currently running
    #[must_use]
    pub fn running_sessions(&self) -> usize {
        self.supervisor.running_sessions()
    }

    /// Submit one conversation for execution.
    ///
    /// Returns immediately; the operation queues for a permit when the
    /// concurrency bound is reached. A caller-supplied correlation id is
    /// honored, otherwise one is minted.
    #[must_use]
    pub fn submit(
        &self,
        conversation: Conversation,
        correlation_id: Option<CorrelationId>,
    ) -> OperationHandle {
        let id = self.tracker.assign(correlation_id);
        let (cancel_handle, cancel_signal) = cancel_pair();
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);

        self.stats.lock().submitted += 1;
        self.tracker.record(
            id,
            LogSeverity::Info,
            "engine",
            "operation submitted",
            None,
        );

        let driver = OperationDriver {
            correlation_id: id,
            config: self.config.clone(),
            gate: Arc::clone(&self.gate),
            arbiter: Arc::clone(&self.arbiter),
            supervisor: Arc::clone(&self.supervisor),
            tracker: self.tracker.clone(),
            policy: self.policy.clone(),
            deny: self.deny.clone(),
            permits: Arc::clone(&self.permits),
            stats: Arc::clone(&self.stats),
            queued: Arc::clone(&self.queued),
        };
        tokio::spawn(driver.run(conversation, updates_tx, cancel_signal));

        OperationHandle {
            correlation_id: id,
            updates: updates_rx,
            cancel: cancel_handle,
            finished: false,
        }
    }
}

/// Everything one operation needs, cloned out of the engine
struct OperationDriver {
    correlation_id: CorrelationId,
    config: EngineConfig,
    gate: Arc<CredentialGate>,
    arbiter: Arc<ConfirmationArbiter>,
    supervisor: Arc<ProcessSupervisor>,
    tracker: CorrelationTracker,
    policy: RecoveryPolicy,
    deny: DenyList,
    permits: Arc<Semaphore>,
    stats: Arc<Mutex<EngineStats>>,
    queued: Arc<Mutex<u64>>,
}

impl OperationDriver {
    async fn run(
        self,
        conversation: Conversation,
        updates: mpsc::Sender<EngineUpdate>,
        cancel: CancelSignal,
    ) {
        let id = self.correlation_id;
        let mut state = OperationState::Queued;

        {
            let mut queued = self.queued.lock();
            *queued += 1;
            let mut stats = self.stats.lock();
            stats.peak_queued = stats.peak_queued.max(*queued);
        }

        // Fair semaphore: waiters are served in submission order.
        let permit = tokio::select! {
            () = cancel.cancelled() => {
                *self.queued.lock() -= 1;
                self.advance(&mut state, OperationState::Cancelled);
                self.finish(
                    &updates,
                    Err(ClassifiedError::cancelled(id, "cancelled while queued")),
                )
                .await;
                return;
            }
            permit = Arc::clone(&self.permits).acquire_owned() => permit,
        };
        *self.queued.lock() -= 1;

        let Ok(permit) = permit else {
            self.advance(&mut state, OperationState::Failed);
            self.finish(
                &updates,
                Err(ClassifiedError::internal(id, "concurrency gate closed")),
            )
            .await;
            return;
        };

        let outcome = self.drive(&conversation, &updates, &cancel, &mut state).await;
        drop(permit);

        let terminal = match &outcome {
            Ok(_) => OperationState::Completed,
            Err(err) => match err.category {
                ErrorCategory::Cancelled => OperationState::Cancelled,
                ErrorCategory::Timeout => OperationState::TimedOut,
                _ => OperationState::Failed,
            },
        };
        self.advance(&mut state, terminal);
        self.finish(&updates, outcome).await;
    }

    /// Retry loop around single attempts.
    async fn drive(
        &self,
        conversation: &Conversation,
        updates: &mpsc::Sender<EngineUpdate>,
        cancel: &CancelSignal,
        state: &mut OperationState,
    ) -> Result<RunResult, ClassifiedError> {
        let id = self.correlation_id;
        let wire = conversation
            .to_wire()
            .map_err(|err| ClassifiedError::internal(id, format!("encoding conversation: {err}")))?;

        let mut attempts: HashMap<ErrorCategory, u32> = HashMap::new();
        let mut fresh_credential = false;

        loop {
            let err = match self
                .attempt(&wire, updates, cancel, state, fresh_credential)
                .await
            {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };
            fresh_credential = false;

            let attempt = attempts.entry(err.category).or_insert(0);
            match self.policy.next_step(err.category, *attempt) {
                RecoveryStep::Retry { delay } => {
                    *attempt += 1;
                    self.stats.lock().retried += 1;
                    self.tracker.record(
                        id,
                        LogSeverity::Warn,
                        "recovery",
                        format!("retrying after {:?} failure", err.category),
                        Some(err.technical_detail.clone()),
                    );
                    if err.category == ErrorCategory::Authentication {
                        fresh_credential = true;
                    }
                    if !delay.is_zero() {
                        tokio::select! {
                            () = cancel.cancelled() => {
                                return Err(ClassifiedError::cancelled(
                                    id,
                                    "cancelled during retry backoff",
                                ));
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                RecoveryStep::Surface => {
                    self.tracker.record(
                        id,
                        LogSeverity::Error,
                        "recovery",
                        format!("surfacing {:?} failure", err.category),
                        Some(err.technical_detail.clone()),
                    );
                    return Err(err);
                }
            }
        }
    }

    /// One attempt: resolve, spawn, stream, classify, gate, accumulate.
    async fn attempt(
        &self,
        wire: &str,
        updates: &mpsc::Sender<EngineUpdate>,
        cancel: &CancelSignal,
        state: &mut OperationState,
        fresh_credential: bool,
    ) -> Result<RunResult, ClassifiedError> {
        let id = self.correlation_id;
        let deadline = Instant::now() + self.config.operation_timeout;

        self.advance(state, OperationState::Resolving);
        let credential = {
            let resolution = if fresh_credential {
                self.gate.resolve_fresh(&[], deadline, cancel).await
            } else {
                self.gate.resolve(&[], deadline, cancel).await
            };
            resolution.map_err(|err| {
                let classified = ErrorClassifier::gate_failure(id, &err);
                self.tracker.record(
                    id,
                    LogSeverity::Error,
                    "credential-gate",
                    "credential resolution failed",
                    Some(err.detail()),
                );
                classified
            })?
        };
        self.tracker.record(
            id,
            LogSeverity::Info,
            "credential-gate",
            format!("credential resolved from {} tier", credential.source),
            None,
        );

        self.advance(state, OperationState::Spawning);
        let mut session = self
            .supervisor
            .spawn(
                id,
                wire.to_string(),
                &credential,
                &self.config,
                deadline,
                cancel.clone(),
            )
            .await
            .map_err(|err| match &err {
                SpawnError::Io(io_err) => {
                    ErrorClassifier::spawn_failure(id, &self.config.executable, io_err)
                }
                other => ClassifiedError::internal(id, other.to_string()),
            })?;
        self.tracker.record(
            id,
            LogSeverity::Info,
            "supervisor",
            "agent process spawned",
            None,
        );

        self.advance(state, OperationState::Streaming);
        let mut classifier = Classifier::new(id, self.deny.clone());
        let mut text_parts: Vec<String> = Vec::new();
        let mut usage = UsageStats::default();
        let mut stderr_tail = String::new();

        while let Some(item) = session.next_item().await {
            match item {
                SessionItem::Line {
                    channel: OutputChannel::Stdout,
                    mut text,
                } => {
                    text.push('\n');
                    for event in classifier.feed(&text) {
                        self.deliver(
                            event,
                            updates,
                            &session,
                            cancel,
                            deadline,
                            &mut text_parts,
                            &mut usage,
                        )
                        .await?;
                    }
                }
                SessionItem::Line {
                    channel: OutputChannel::Stderr,
                    text,
                } => {
                    self.tracker.record(
                        id,
                        LogSeverity::Debug,
                        "agent-stderr",
                        text.clone(),
                        None,
                    );
                    if stderr_tail.len() < STDERR_TAIL_LIMIT {
                        if !stderr_tail.is_empty() {
                            stderr_tail.push('\n');
                        }
                        stderr_tail.push_str(&text);
                    }
                }
                SessionItem::TimedOut => {
                    return Err(ClassifiedError::timeout(
                        id,
                        format!("killed after {:?}", self.config.operation_timeout),
                    ));
                }
                SessionItem::Cancelled => {
                    return Err(ClassifiedError::cancelled(id, "agent session cancelled"));
                }
                SessionItem::Exited { code, success } => {
                    for event in classifier.finish() {
                        if let OutputEvent::Text { degraded: true, .. } = &event {
                            // Unterminated structure degrades to text; the
                            // operation still completes with a warning.
                            let warning = ClassifiedError::malformed_output(
                                id,
                                "output ended inside a structure",
                            );
                            self.tracker.record(
                                id,
                                LogSeverity::Warn,
                                "classifier",
                                warning.user_message.clone(),
                                Some(warning.technical_detail.clone()),
                            );
                        }
                        self.deliver(
                            event,
                            updates,
                            &session,
                            cancel,
                            deadline,
                            &mut text_parts,
                            &mut usage,
                        )
                        .await?;
                    }

                    if success {
                        return Ok(RunResult {
                            text: text_parts.join("\n"),
                            usage,
                        });
                    }
                    return Err(ErrorClassifier::exit_failure(id, code, &stderr_tail));
                }
            }
        }

        Err(ClassifiedError::internal(
            id,
            "session stream closed without a terminal item",
        ))
    }

    /// Forward one classified event, gating dangerous tool calls through the
    /// arbiter first.
    #[allow(clippy::too_many_arguments)]
    async fn deliver(
        &self,
        event: OutputEvent,
        updates: &mpsc::Sender<EngineUpdate>,
        session: &Session,
        cancel: &CancelSignal,
        deadline: Instant,
        text_parts: &mut Vec<String>,
        usage: &mut UsageStats,
    ) -> Result<(), ClassifiedError> {
        let id = self.correlation_id;

        if event.is_dangerous() {
            let action = match &event {
                OutputEvent::ToolCall { action, .. } => action.clone(),
                _ => String::new(),
            };
            self.tracker.record(
                id,
                LogSeverity::Info,
                "arbiter",
                "approval requested for dangerous action",
                Some(action.clone()),
            );

            match self.arbiter.arbitrate(id, &action, deadline, cancel).await {
                ConfirmationOutcome::Approved(decision) => {
                    self.tracker.record(
                        id,
                        LogSeverity::Info,
                        "arbiter",
                        "action approved",
                        Some(decision.rationale),
                    );
                }
                ConfirmationOutcome::Denied(decision) => {
                    session.terminate();
                    self.tracker.record(
                        id,
                        LogSeverity::Warn,
                        "arbiter",
                        "action denied; terminating session",
                        Some(decision.rationale.clone()),
                    );
                    return Err(ClassifiedError::user_denied(id, decision.rationale));
                }
                ConfirmationOutcome::TimedOut => {
                    session.terminate();
                    self.tracker.record(
                        id,
                        LogSeverity::Warn,
                        "arbiter",
                        "approval window elapsed; failing closed",
                        Some(action.clone()),
                    );
                    return Err(ClassifiedError::user_denied(
                        id,
                        format!("no approval response for: {action}"),
                    ));
                }
                ConfirmationOutcome::Cancelled => {
                    session.terminate();
                    return Err(ClassifiedError::cancelled(
                        id,
                        "cancelled while awaiting approval",
                    ));
                }
            }
        }

        match &event {
            // Degraded text is part of the result too: an operation that ends
            // mid-structure completes with the partial text it did produce.
            OutputEvent::Text { raw, .. } => text_parts.push(raw.clone()),
            OutputEvent::Structured { value, .. } => {
                if let Some(reported) = UsageStats::from_value(value) {
                    *usage = reported;
                }
            }
            _ => {}
        }

        self.tracker.record(
            id,
            LogSeverity::Debug,
            "classifier",
            event_label(&event),
            Some(event.raw().to_string()),
        );

        updates
            .send(EngineUpdate::Event(event))
            .await
            .map_err(|_| ClassifiedError::cancelled(id, "caller dropped the update stream"))
    }

    /// Apply a monotone operation state transition; regressions (retries
    /// re-running earlier phases) are skipped, true violations are logged.
    fn advance(&self, state: &mut OperationState, to: OperationState) {
        if *state == to {
            return;
        }
        match validate_operation_transition(*state, to) {
            Ok(()) => {
                *state = to;
                self.tracker.record(
                    self.correlation_id,
                    LogSeverity::Debug,
                    "engine",
                    format!("state -> {to:?}"),
                    None,
                );
            }
            Err(_) => {
                // High-water mark: a retry asking for an earlier phase is
                // expected and ignored.
            }
        }
    }

    async fn finish(
        &self,
        updates: &mpsc::Sender<EngineUpdate>,
        outcome: Result<RunResult, ClassifiedError>,
    ) {
        let id = self.correlation_id;
        let update = match outcome {
            Ok(result) => {
                self.stats.lock().completed += 1;
                self.tracker.record(
                    id,
                    LogSeverity::Info,
                    "engine",
                    "operation completed",
                    None,
                );
                EngineUpdate::Done(result)
            }
            Err(err) => {
                self.stats.lock().failed += 1;
                self.tracker.record(
                    id,
                    LogSeverity::Error,
                    "engine",
                    err.user_message.clone(),
                    Some(err.technical_detail.clone()),
                );
                EngineUpdate::Failed(err)
            }
        };
        // Caller may have dropped the handle; the terminal update is then
        // discarded with the operation already fully wound down.
        let _ = updates.send(update).await;
    }
}

fn event_label(event: &OutputEvent) -> &'static str {
    match event {
        OutputEvent::Reasoning { .. } => "event: reasoning",
        OutputEvent::ToolCall {
            dangerous: true, ..
        } => "event: tool_call (dangerous)",
        OutputEvent::ToolCall { .. } => "event: tool_call",
        OutputEvent::ConfirmationRequest { .. } => "event: confirmation_request",
        OutputEvent::Structured { .. } => "event: structured",
        OutputEvent::Text { degraded: true, .. } => "event: text (degraded)",
        OutputEvent::Text { .. } => "event: text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_default_to_zero() {
        let stats = EngineStats::default();
        assert_eq!(stats.submitted, 0);
        assert_eq!(stats.peak_queued, 0);
    }

    #[test]
    fn event_labels_distinguish_danger() {
        let id = CorrelationId::new();
        let dangerous = OutputEvent::ToolCall {
            correlation_id: id,
            action: "rm -rf ./drafts".into(),
            dangerous: true,
            raw: "Tool: rm -rf ./drafts".into(),
        };
        let safe = OutputEvent::ToolCall {
            correlation_id: id,
            action: "ls".into(),
            dangerous: false,
            raw: "Tool: ls".into(),
        };
        assert_ne!(event_label(&dangerous), event_label(&safe));
    }
}
