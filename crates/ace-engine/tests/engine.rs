//! End-to-end engine tests against a scripted fake agent.

use std::sync::Arc;
use std::time::Duration;

use ace_auth::{CredentialGate, CredentialResolver, InteractiveResolver};
use ace_engine::{ApprovalHandler, ApprovalResponse, Engine, RecoveryPolicy};
use ace_test_utils::{FakeAgent, StaticCredentialProvider};
use ace_types::{
    Conversation, CorrelationId, EngineConfig, EngineUpdate, ErrorCategory, OutputEvent,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

const TEST_TOKEN: &str = "sk-integration-secret";

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

struct AutoApprover {
    seen: Mutex<Vec<String>>,
}

impl AutoApprover {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ApprovalHandler for AutoApprover {
    async fn request_approval(&self, _id: CorrelationId, action: &str) -> ApprovalResponse {
        self.seen.lock().push(action.to_string());
        ApprovalResponse::Approved
    }
}

struct DenyingApprover;

#[async_trait]
impl ApprovalHandler for DenyingApprover {
    async fn request_approval(&self, _id: CorrelationId, _action: &str) -> ApprovalResponse {
        ApprovalResponse::Denied
    }
}

struct SilentApprover;

#[async_trait]
impl ApprovalHandler for SilentApprover {
    async fn request_approval(&self, _id: CorrelationId, _action: &str) -> ApprovalResponse {
        std::future::pending().await
    }
}

fn gate() -> CredentialGate {
    init_tracing();
    let provider = StaticCredentialProvider::shared(TEST_TOKEN);
    CredentialGate::with_resolvers(
        Duration::from_secs(1),
        vec![Box::new(InteractiveResolver::new(provider))],
    )
}

fn empty_gate() -> CredentialGate {
    init_tracing();
    let resolvers: Vec<Box<dyn CredentialResolver>> = Vec::new();
    CredentialGate::with_resolvers(Duration::from_secs(1), resolvers)
}

fn config(agent: &FakeAgent) -> EngineConfig {
    EngineConfig::new()
        .with_executable(agent.path())
        .with_operation_timeout(Duration::from_secs(10))
        .with_approval_timeout(Duration::from_secs(5))
}

fn fast_policy() -> RecoveryPolicy {
    RecoveryPolicy {
        upstream_backoff: Duration::from_millis(10),
        rate_limit_backoff: Duration::from_millis(20),
    }
}

fn conversation() -> Conversation {
    Conversation::new().with_user("summarize the drafts directory")
}

#[tokio::test]
async fn events_stream_in_emission_order_and_end_with_done() {
    let agent = FakeAgent::emitting(&[
        "Thinking: checking the drafts",
        "Tool: ls ./drafts",
        r#"{"summary": "3 files", "usage": {"input_tokens": 11, "output_tokens": 5}}"#,
        "All drafts summarized.",
    ]);
    let engine = Engine::new(config(&agent), gate(), AutoApprover::new());

    let handle = engine.submit(conversation(), None);
    let (events, outcome) = handle.collect().await;

    let kinds: Vec<_> = events
        .iter()
        .map(|event| match event {
            OutputEvent::Reasoning { .. } => "reasoning",
            OutputEvent::ToolCall { .. } => "tool_call",
            OutputEvent::Structured { .. } => "structured",
            OutputEvent::Text { .. } => "text",
            OutputEvent::ConfirmationRequest { .. } => "confirmation",
        })
        .collect();
    assert_eq!(kinds, ["reasoning", "tool_call", "structured", "text"]);

    let result = outcome.unwrap();
    assert_eq!(result.text, "All drafts summarized.");
    assert_eq!(result.usage.input_tokens, Some(11));
    assert_eq!(result.usage.output_tokens, Some(5));
}

#[tokio::test]
async fn dangerous_action_reaches_the_approver_verbatim() {
    let agent = FakeAgent::emitting(&["Tool: rm -rf ./drafts", "done"]);
    let approver = AutoApprover::new();
    let engine = Engine::new(config(&agent), gate(), Arc::clone(&approver) as Arc<dyn ApprovalHandler>);

    let handle = engine.submit(conversation(), None);
    let (events, outcome) = handle.collect().await;

    assert!(outcome.is_ok());
    assert_eq!(approver.seen(), ["rm -rf ./drafts"]);
    assert!(events.iter().any(|e| e.is_dangerous()));
}

#[tokio::test]
async fn safe_actions_never_consult_the_approver() {
    let agent = FakeAgent::emitting(&["Tool: ls ./drafts", "done"]);
    let approver = AutoApprover::new();
    let engine = Engine::new(config(&agent), gate(), Arc::clone(&approver) as Arc<dyn ApprovalHandler>);

    let (_events, outcome) = engine.submit(conversation(), None).collect().await;

    assert!(outcome.is_ok());
    assert!(approver.seen().is_empty());
}

#[tokio::test]
async fn denial_fails_the_operation_and_stops_the_agent() {
    let agent = FakeAgent::emitting(&["Tool: rm -rf ./drafts", "should never be seen"]);
    let engine = Engine::new(config(&agent), gate(), Arc::new(DenyingApprover));

    let (events, outcome) = engine.submit(conversation(), None).collect().await;

    let err = outcome.unwrap_err();
    assert_eq!(err.category, ErrorCategory::UserDenied);
    // The dangerous event is withheld, and nothing after it leaks out.
    assert!(events
        .iter()
        .all(|e| !e.raw().contains("should never be seen")));
}

#[tokio::test]
async fn no_approval_response_fails_closed() {
    let agent = FakeAgent::emitting(&["Tool: rm -rf ./drafts"]);
    let config = config(&agent).with_approval_timeout(Duration::from_millis(50));
    let engine = Engine::new(config, gate(), Arc::new(SilentApprover));

    let (_events, outcome) = engine.submit(conversation(), None).collect().await;

    let err = outcome.unwrap_err();
    assert_eq!(err.category, ErrorCategory::UserDenied);
}

#[tokio::test]
async fn excess_submissions_queue_and_all_complete() {
    let agent = FakeAgent::emitting_slowly(&["done"], 0.2);
    let config = config(&agent).with_max_concurrency(2);
    let engine = Engine::new(config, gate(), AutoApprover::new());

    let handles: Vec<_> = (0..5).map(|_| engine.submit(conversation(), None)).collect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.running_sessions() <= 2);

    for handle in handles {
        let (_events, outcome) = handle.collect().await;
        assert!(outcome.is_ok());
    }

    let stats = engine.stats();
    assert_eq!(stats.submitted, 5);
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.failed, 0);
    assert!(stats.peak_queued >= 3);
}

#[tokio::test]
async fn timeout_earns_exactly_one_retry_with_the_same_correlation_id() {
    let agent = FakeAgent::hanging_once_then(&["recovered"]);
    let config = config(&agent).with_operation_timeout(Duration::from_millis(300));
    let engine = Engine::new(config, gate(), AutoApprover::new());
    let id = CorrelationId::new();

    let handle = engine.submit(conversation(), Some(id));
    assert_eq!(handle.correlation_id(), id);
    let (events, outcome) = handle.collect().await;

    let result = outcome.unwrap();
    assert_eq!(result.text, "recovered");
    assert!(events.iter().all(|e| e.correlation_id() == id));
    assert_eq!(engine.stats().retried, 1);
}

#[tokio::test]
async fn hard_timeout_holds_when_the_agent_closes_its_pipes() {
    // An agent that closes stdout/stderr but keeps running must still die
    // at the wall-clock deadline.
    let agent = FakeAgent::scripted("exec 1>&- 2>&-\nsleep 600");
    let config = config(&agent).with_operation_timeout(Duration::from_millis(200));
    let engine = Engine::new(config, gate(), AutoApprover::new());

    let (_events, outcome) =
        tokio::time::timeout(Duration::from_secs(5), engine.submit(conversation(), None).collect())
            .await
            .expect("operation must end at the hard deadline");
    assert_eq!(outcome.unwrap_err().category, ErrorCategory::Timeout);
    assert_eq!(engine.stats().retried, 1);
}

#[tokio::test]
async fn persistent_timeout_surfaces_after_one_retry() {
    let agent = FakeAgent::hanging();
    let config = config(&agent).with_operation_timeout(Duration::from_millis(150));
    let engine = Engine::new(config, gate(), AutoApprover::new());

    let (_events, outcome) = engine.submit(conversation(), None).collect().await;

    let err = outcome.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Timeout);
    assert_eq!(engine.stats().retried, 1);
}

#[tokio::test]
async fn upstream_failure_recovers_within_its_retry_budget() {
    let agent = FakeAgent::failing_then_emitting("upstream 503 unavailable", 1, &["ok"]);
    let engine =
        Engine::new(config(&agent), gate(), AutoApprover::new()).with_recovery_policy(fast_policy());

    let (_events, outcome) = engine.submit(conversation(), None).collect().await;

    assert_eq!(outcome.unwrap().text, "ok");
    assert_eq!(engine.stats().retried, 1);
}

#[tokio::test]
async fn rate_limit_surfaces_after_its_retry_budget() {
    let agent = FakeAgent::failing("HTTP 429 rate limit exceeded", 1);
    let engine =
        Engine::new(config(&agent), gate(), AutoApprover::new()).with_recovery_policy(fast_policy());

    let (_events, outcome) = engine.submit(conversation(), None).collect().await;

    let err = outcome.unwrap_err();
    assert_eq!(err.category, ErrorCategory::RateLimited);
    assert_eq!(engine.stats().retried, 2);
}

#[tokio::test]
async fn cancellation_yields_exactly_one_terminal_error() {
    let agent = FakeAgent::hanging();
    let engine = Engine::new(config(&agent), gate(), AutoApprover::new());

    let mut handle = engine.submit(conversation(), None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    let mut terminal = None;
    while let Some(update) = handle.next().await {
        if update.is_terminal() {
            assert!(terminal.is_none(), "second terminal update observed");
            terminal = Some(update);
        }
    }
    match terminal {
        Some(EngineUpdate::Failed(err)) => assert_eq!(err.category, ErrorCategory::Cancelled),
        other => panic!("expected a classified cancellation, got {other:?}"),
    }
    assert!(handle.next().await.is_none());
}

#[tokio::test]
async fn all_credential_tiers_failing_surfaces_authentication() {
    let agent = FakeAgent::emitting(&["never runs"]);
    let engine = Engine::new(config(&agent), empty_gate(), AutoApprover::new());

    let (events, outcome) = engine.submit(conversation(), None).collect().await;

    let err = outcome.unwrap_err();
    assert_eq!(err.category, ErrorCategory::Authentication);
    assert!(events.is_empty());
    // One forced fresh resolution, then surface.
    assert_eq!(engine.stats().retried, 1);
}

#[tokio::test]
async fn missing_executable_is_fatal_and_not_retried() {
    let config = EngineConfig::new()
        .with_executable("/nonexistent/ace-agent")
        .with_operation_timeout(Duration::from_secs(5));
    let engine = Engine::new(config, gate(), AutoApprover::new());

    let (_events, outcome) = engine.submit(conversation(), None).collect().await;

    let err = outcome.unwrap_err();
    assert_eq!(err.category, ErrorCategory::ProcessNotFound);
    assert_eq!(engine.stats().retried, 0);
}

#[tokio::test]
async fn unterminated_json_degrades_to_text_and_still_completes() {
    let agent = FakeAgent::emitting(&["before", r#"{"partial": true"#]);
    let engine = Engine::new(config(&agent), gate(), AutoApprover::new());
    let id = CorrelationId::new();

    let (events, outcome) = engine.submit(conversation(), Some(id)).collect().await;

    let result = outcome.unwrap();
    assert!(events.iter().any(
        |e| matches!(e, OutputEvent::Text { degraded: true, .. })
    ));
    // Partial output is kept in the terminal result.
    assert!(result.text.contains("before"));
    assert!(result.text.contains(r#"{"partial": true"#));
    let trace = engine.trace(id);
    assert!(trace
        .iter()
        .any(|r| r.severity == ace_types::LogSeverity::Warn));
}

#[tokio::test]
async fn conversation_is_delivered_over_stdin() {
    let agent = FakeAgent::echoing_stdin();
    let engine = Engine::new(config(&agent), gate(), AutoApprover::new());

    let (events, outcome) = engine
        .submit(Conversation::new().with_user("ping"), None)
        .collect()
        .await;

    assert!(outcome.is_ok());
    let echoed = events.iter().map(OutputEvent::raw).collect::<Vec<_>>().join("\n");
    assert!(echoed.contains("stdin:"));
    assert!(echoed.contains("ping"));
}

#[tokio::test]
async fn the_trace_is_complete_and_never_leaks_the_token() {
    let agent = FakeAgent::emitting(&["Thinking: quick check", "fine"]);
    let engine = Engine::new(config(&agent), gate(), AutoApprover::new());
    let id = CorrelationId::new();

    let (events, outcome) = engine.submit(conversation(), Some(id)).collect().await;
    assert!(outcome.is_ok());

    let trace = engine.trace(id);
    assert!(!trace.is_empty());
    assert!(trace.iter().all(|r| r.correlation_id == id));
    assert!(trace.iter().any(|r| r.message == "operation submitted"));
    assert!(trace.iter().any(|r| r.message == "operation completed"));

    for record in &trace {
        assert!(!record.message.contains(TEST_TOKEN));
        assert!(!record
            .technical_detail
            .as_deref()
            .unwrap_or("")
            .contains(TEST_TOKEN));
    }
    for event in &events {
        assert!(!event.raw().contains(TEST_TOKEN));
    }
}

#[tokio::test]
async fn concurrent_operations_keep_their_traces_apart() {
    let agent = FakeAgent::emitting(&["Thinking: working", "done"]);
    let engine = Engine::new(config(&agent), gate(), AutoApprover::new());
    let a = CorrelationId::new();
    let b = CorrelationId::new();

    let ha = engine.submit(conversation(), Some(a));
    let hb = engine.submit(conversation(), Some(b));
    let ((ea, ra), (eb, rb)) = tokio::join!(ha.collect(), hb.collect());

    assert!(ra.is_ok());
    assert!(rb.is_ok());
    assert!(ea.iter().all(|e| e.correlation_id() == a));
    assert!(eb.iter().all(|e| e.correlation_id() == b));
    assert!(engine.trace(a).iter().all(|r| r.correlation_id == a));
    assert!(engine.trace(b).iter().all(|r| r.correlation_id == b));
}
