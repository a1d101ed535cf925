//! Integration tests for the query loop.
//!
//! A scripted model stands in for the language model so that every planning
//! decision is deterministic, and counting wrappers record how often each
//! backend is actually reached.
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::too_many_lines,
    clippy::doc_markdown
)]

use async_trait::async_trait;
use ragmcp::adapters::{
    AnnouncementAdapter, PolicyDocument, PolicyIndexAdapter, RecordStoreAdapter, RetrievalSettings,
};
use ragmcp::embedding::HashEmbedder;
use ragmcp::models::{ParamSpec, ParamType, Role, ToolDescriptor, ToolExchange};
use ragmcp::orchestrator::DEGRADED_ANSWER;
use ragmcp::{
    AccessLevel, Adapter, Confidentiality, Dispatcher, Error, ErrorKind, FailureKind, ModelCapability,
    Orchestrator, OrchestratorConfig, PlanningRequest, PlanningResponse, SessionId, SessionStore,
    ToolCallRequest, ToolResult,
};
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const SALARY_TEXT: &str = "Engineering Manager 28 to 40 lakh";

// ============================================================================
// Scripted model
// ============================================================================

#[derive(Clone)]
enum Step {
    Reply(PlanningResponse),
    Fail(&'static str),
    Unreachable,
    Hang,
    Derive(fn(&PlanningRequest) -> PlanningResponse),
}

struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    default: Step,
    requests: Mutex<Vec<PlanningRequest>>,
}

impl ScriptedModel {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Self::with_default(steps, Step::Reply(PlanningResponse::Answer("done".to_string())))
    }

    fn with_default(steps: Vec<Step>, default: Step) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            default,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<PlanningRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelCapability for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn plan(&self, request: &PlanningRequest) -> ragmcp::Result<PlanningResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        match step {
            Step::Reply(response) => Ok(response),
            Step::Fail(message) => Err(Error::ModelCapability(message.to_string())),
            Step::Unreachable => Err(Error::OperationFailed {
                operation: "llm_request".to_string(),
                cause: "connection refused".to_string(),
            }),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(PlanningResponse::Answer("too late".to_string()))
            },
            Step::Derive(derive) => Ok(derive(request)),
        }
    }
}

fn call(name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(name, arguments)
}

fn calls(requests: Vec<ToolCallRequest>) -> Step {
    Step::Reply(PlanningResponse::ToolCalls(requests))
}

fn answer(text: &str) -> Step {
    Step::Reply(PlanningResponse::Answer(text.to_string()))
}

/// Exchanges from the most recent tool turn the model can see.
fn last_exchanges(request: &PlanningRequest) -> &[ToolExchange] {
    request
        .turns
        .iter()
        .rev()
        .find(|t| t.role == Role::Tool)
        .map(|t| t.exchanges.as_slice())
        .unwrap_or_default()
}

/// Answers with the department found in the last tool result.
fn department_answer(request: &PlanningRequest) -> PlanningResponse {
    let department = last_exchanges(request)
        .iter()
        .find_map(|ex| match &ex.result {
            ToolResult::Success { payload } => payload["employee"]["department"]
                .as_str()
                .map(ToString::to_string),
            ToolResult::Failure { .. } => None,
        })
        .unwrap_or_else(|| "unknown".to_string());
    PlanningResponse::Answer(format!("Employee E-1042 works in the {department} department."))
}

/// A careless model that repeats every tool result it was shown.
fn parrot_answer(request: &PlanningRequest) -> PlanningResponse {
    let seen: Vec<String> = request
        .turns
        .iter()
        .flat_map(|t| &t.exchanges)
        .map(|ex| ex.result.to_context_string())
        .collect();
    PlanningResponse::Answer(format!("Here is everything: {}", seen.join(" | ")))
}

/// Reports the failure kind of the last call.
fn failure_answer(request: &PlanningRequest) -> PlanningResponse {
    let kind = last_exchanges(request)
        .first()
        .and_then(|ex| ex.result.failure_kind())
        .map_or("none", |k| k.as_str());
    PlanningResponse::Answer(format!("The lookup failed ({kind}), answering without it."))
}

// ============================================================================
// Backends
// ============================================================================

struct Counting {
    inner: Arc<dyn Adapter>,
    calls: AtomicUsize,
}

impl Counting {
    fn wrap(inner: impl Adapter + 'static) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(inner),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for Counting {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.inner.descriptors()
    }

    async fn invoke(&self, operation: &str, arguments: Map<String, Value>) -> ToolResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.invoke(operation, arguments).await
    }
}

/// Backend that never answers in time.
struct Stalled;

#[async_trait]
impl Adapter for Stalled {
    fn name(&self) -> &str {
        "payroll"
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("get_payslip", "Latest payslip", "payroll").with_param(
                ParamSpec::required("employee_id", ParamType::String, "Employee ID"),
            ),
        ]
    }

    async fn invoke(&self, _operation: &str, _arguments: Map<String, Value>) -> ToolResult {
        tokio::time::sleep(Duration::from_secs(30)).await;
        ToolResult::success(json!({}))
    }
}

struct Fixture {
    records: Arc<Counting>,
    announcements: Arc<Counting>,
    policies: Arc<Counting>,
    payroll: Arc<Counting>,
    _dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let records = RecordStoreAdapter::in_memory().unwrap();
        records.seed_sample_data().unwrap();

        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("holiday_2024.txt"),
            "Category: holiday\nDate: 2024-12-20\n\nYear-end holidays\nThe office is closed from Dec 25 to Jan 1.\n",
        )
        .unwrap();

        Self {
            records: Counting::wrap(records),
            announcements: Counting::wrap(AnnouncementAdapter::new(dir.path())),
            policies: Counting::wrap(policy_index()),
            payroll: Counting::wrap(Stalled),
            _dir: dir,
        }
    }

    fn adapters(&self) -> Vec<Arc<dyn Adapter>> {
        vec![
            self.records.clone(),
            self.announcements.clone(),
            self.policies.clone(),
            self.payroll.clone(),
        ]
    }

    fn total_calls(&self) -> usize {
        self.records.calls()
            + self.announcements.calls()
            + self.policies.calls()
            + self.payroll.calls()
    }

    fn orchestrator(&self, model: &Arc<ScriptedModel>, config: OrchestratorConfig) -> Orchestrator {
        let model: Arc<dyn ModelCapability> = model.clone();
        let dispatcher = Dispatcher::from_adapters(self.adapters()).unwrap();
        Orchestrator::new(dispatcher, model, config)
    }
}

fn policy_index() -> PolicyIndexAdapter {
    let documents = vec![
        PolicyDocument::new(
            "leave_policy",
            "Every employee receives 12 casual leave days and 18 earned leave days per year.",
            Confidentiality::Public,
        ),
        PolicyDocument::new(
            "salary_bands",
            format!("Salary bands for 2025: Senior Developer 14 to 22 lakh, {SALARY_TEXT}."),
            Confidentiality::Confidential,
        ),
    ];
    PolicyIndexAdapter::new(
        documents,
        Arc::new(HashEmbedder::new(4096)),
        RetrievalSettings {
            top_k: 5,
            min_score: 0.05,
        },
    )
    .unwrap()
}

fn quick_config() -> OrchestratorConfig {
    OrchestratorConfig {
        tool_timeout: Duration::from_millis(100),
        query_timeout: Duration::from_secs(5),
        ..OrchestratorConfig::default()
    }
}

fn open(sessions: &SessionStore, level: AccessLevel) -> SessionId {
    sessions.open(level)
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_record_query_makes_exactly_one_call() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![
        calls(vec![call("get_employee", json!({"employee_id": "E-1042"}))]),
        Step::Derive(department_answer),
    ]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let answer = orchestrator
        .ask(&sessions, &id, "What department is employee E-1042 in?")
        .await
        .unwrap();

    assert!(answer.text.contains("Legal"), "{}", answer.text);
    assert!(!answer.degraded);
    assert_eq!(answer.usage.total_calls(), 1);
    assert_eq!(answer.usage.cycles, 2);
    assert_eq!(fixture.records.calls(), 1);
    assert_eq!(fixture.total_calls(), 1);
}

#[tokio::test]
async fn test_every_planning_step_carries_full_catalog_and_history() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![
        calls(vec![call("get_employee", json!({"employee_id": "E-1042"}))]),
        Step::Derive(department_answer),
        answer("You're welcome."),
    ]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    orchestrator.ask(&sessions, &id, "Where does E-1042 work?").await.unwrap();
    orchestrator.ask(&sessions, &id, "Thanks!").await.unwrap();

    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    let catalog_size = orchestrator.dispatcher().catalog().len();
    assert!(requests.iter().all(|r| r.tools.len() == catalog_size));
    assert!(requests.iter().all(|r| !r.system_prompt.is_empty()));

    // user + tool on the second step, then 3 committed turns + new user
    assert_eq!(requests[1].turns.len(), 2);
    assert_eq!(requests[2].turns.len(), 4);
    assert_eq!(requests[2].turns[0].content, "Where does E-1042 work?");
}

#[tokio::test]
async fn test_parallel_calls_keep_request_order() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![
        calls(vec![
            call("get_employee", json!({"employee_id": "EMP001"})),
            call("list_announcements", json!({})),
            call("get_leave_balance", json!({"employee_id": "EMP001"})),
        ]),
        answer("Summary."),
    ]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let answer = orchestrator.ask(&sessions, &id, "Tell me about EMP001").await.unwrap();
    let names: Vec<&str> = answer.usage.calls.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["get_employee", "list_announcements", "get_leave_balance"]);

    let session = sessions.get(&id).await.unwrap();
    let tool_turn = &session.turns()[1];
    assert_eq!(tool_turn.role, Role::Tool);
    assert_eq!(tool_turn.exchanges.len(), 3);
    assert_eq!(tool_turn.exchanges[2].request.name, "get_leave_balance");
    assert!(tool_turn.exchanges.iter().all(|ex| ex.result.is_success()));
}

// ============================================================================
// Request errors
// ============================================================================

#[tokio::test]
async fn test_unknown_tool_is_degraded_and_reaches_no_adapter() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![calls(vec![call("drop_all_tables", json!({}))])]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let answer = orchestrator.ask(&sessions, &id, "Delete everything").await.unwrap();

    assert!(answer.degraded);
    assert!(answer.text.starts_with(DEGRADED_ANSWER));
    assert_eq!(
        answer.usage.calls[0].failure,
        Some(FailureKind::UnknownTool)
    );
    assert_eq!(fixture.total_calls(), 0);

    let session = sessions.get(&id).await.unwrap();
    assert_eq!(session.stats().queries_answered, 1);
    assert!(session.stats().tool_invocations.is_empty());
}

#[tokio::test]
async fn test_invalid_arguments_name_the_field() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![calls(vec![call(
        "get_employee",
        json!({"employee_id": 1042}),
    )])]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let answer = orchestrator.ask(&sessions, &id, "Who is 1042?").await.unwrap();

    assert!(answer.degraded);
    assert!(answer.text.contains("employee_id"), "{}", answer.text);
    assert_eq!(fixture.records.calls(), 0);
}

#[tokio::test]
async fn test_partial_request_error_lets_model_replan() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![
        calls(vec![
            call("made_up_tool", json!({})),
            call("get_employee", json!({"employee_id": "E-1042"})),
        ]),
        Step::Derive(department_answer),
    ]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let answer = orchestrator.ask(&sessions, &id, "Where is E-1042?").await.unwrap();
    assert!(!answer.degraded);
    assert!(answer.text.contains("Legal"));
    assert_eq!(answer.usage.failed_calls(), 1);
}

// ============================================================================
// Confidentiality
// ============================================================================

#[tokio::test]
async fn test_confidential_text_never_reaches_public_answer() {
    let fixture = Fixture::new();

    // The index itself does return the confidential chunk.
    let mut args = Map::new();
    args.insert("query".to_string(), json!("salary bands"));
    let raw = fixture.policies.inner.invoke("search_policies", args).await;
    assert!(raw.to_context_string().contains(SALARY_TEXT));

    let model = ScriptedModel::new(vec![
        calls(vec![call("search_policies", json!({"query": "salary bands"}))]),
        Step::Derive(parrot_answer),
    ]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let answer = orchestrator
        .ask(&sessions, &id, "What are the salary bands?")
        .await
        .unwrap();

    assert!(!answer.text.contains(SALARY_TEXT), "{}", answer.text);
    assert!(answer.usage.withheld_chunks >= 1);

    for request in model.requests() {
        for turn in &request.turns {
            for exchange in &turn.exchanges {
                assert!(!exchange.result.to_context_string().contains(SALARY_TEXT));
            }
        }
    }
    let log = sessions.get(&id).await.unwrap().to_turn_log().unwrap();
    assert!(!log.contains(SALARY_TEXT));
}

#[tokio::test]
async fn test_confidential_session_sees_confidential_text() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![
        calls(vec![call("search_policies", json!({"query": "salary bands"}))]),
        Step::Derive(parrot_answer),
    ]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Confidential);

    let answer = orchestrator
        .ask(&sessions, &id, "What are the salary bands?")
        .await
        .unwrap();

    assert!(answer.text.contains(SALARY_TEXT));
    assert_eq!(answer.usage.withheld_chunks, 0);
}

#[tokio::test]
async fn test_policy_listing_hides_documents_above_session_level() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![
        calls(vec![call("list_policies", json!({}))]),
        Step::Derive(parrot_answer),
    ]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let answer = orchestrator
        .ask(&sessions, &id, "Which policies exist?")
        .await
        .unwrap();

    assert!(answer.text.contains("leave_policy"), "{}", answer.text);
    assert!(!answer.text.contains("salary_bands"), "{}", answer.text);
    assert_eq!(answer.usage.withheld_chunks, 1);
}

// ============================================================================
// Loop bound
// ============================================================================

fn endless_tools(request: &PlanningRequest) -> PlanningResponse {
    if request.tools.is_empty() {
        PlanningResponse::Answer("Based on the policies I found, leave is 12 days.".to_string())
    } else {
        PlanningResponse::ToolCalls(vec![ToolCallRequest::new("list_policies", json!({}))])
    }
}

fn stubborn_tools(_request: &PlanningRequest) -> PlanningResponse {
    PlanningResponse::ToolCalls(vec![ToolCallRequest::new("list_policies", json!({}))])
}

#[tokio::test]
async fn test_cycle_cap_forces_synthesis_without_tools() {
    let fixture = Fixture::new();
    let model = ScriptedModel::with_default(Vec::new(), Step::Derive(endless_tools));
    let config = OrchestratorConfig {
        max_cycles: 3,
        ..quick_config()
    };
    let orchestrator = fixture.orchestrator(&model, config);
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let answer = orchestrator.ask(&sessions, &id, "How much leave?").await.unwrap();

    assert!(answer.usage.loop_limit_reached);
    assert_eq!(answer.usage.cycles, 3);
    assert_eq!(fixture.policies.calls(), 3);
    assert_eq!(answer.text, "Based on the policies I found, leave is 12 days.");

    let requests = model.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[3].tools.is_empty());
    assert!(requests[3].system_prompt.len() > requests[0].system_prompt.len());
}

#[tokio::test]
async fn test_cycle_cap_with_stubborn_model_still_answers() {
    let fixture = Fixture::new();
    let model = ScriptedModel::with_default(Vec::new(), Step::Derive(stubborn_tools));
    let config = OrchestratorConfig {
        max_cycles: 2,
        ..quick_config()
    };
    let orchestrator = fixture.orchestrator(&model, config);
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let answer = orchestrator.ask(&sessions, &id, "Loop forever").await.unwrap();

    assert!(!answer.text.trim().is_empty());
    assert!(answer.text.contains("list_policies"));
    assert!(answer.usage.loop_limit_reached);
    assert_eq!(model.requests().len(), 3);
}

#[tokio::test]
async fn test_cycle_cap_with_failing_synthesis_still_answers() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![
        calls(vec![call("list_announcements", json!({}))]),
        Step::Fail("backend down"),
    ]);
    let config = OrchestratorConfig {
        max_cycles: 1,
        ..quick_config()
    };
    let orchestrator = fixture.orchestrator(&model, config);
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let answer = orchestrator.ask(&sessions, &id, "Any news?").await.unwrap();
    assert!(answer.text.contains("holiday_2024.txt"));
}

// ============================================================================
// Counters
// ============================================================================

#[tokio::test]
async fn test_session_counters_are_deterministic() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![
        // query 1: one record lookup
        calls(vec![call("get_employee", json!({"employee_id": "EMP002"}))]),
        answer("Priya is in HR."),
        // query 2: two tools in one step
        calls(vec![
            call("get_employee", json!({"employee_id": "EMP005"})),
            call("search_policies", json!({"query": "earned leave"})),
        ]),
        answer("Vikram has 18 earned leave days."),
        // query 3: no tools
        answer("Hello!"),
    ]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    for question in ["Who is EMP002?", "Leave for EMP005?", "Hi"] {
        orchestrator.ask(&sessions, &id, question).await.unwrap();
    }

    let session = sessions.get(&id).await.unwrap();
    let stats = session.stats();
    assert_eq!(stats.queries_answered, 3);
    assert_eq!(stats.tool_invocations.get("get_employee"), Some(&2));
    assert_eq!(stats.tool_invocations.get("search_policies"), Some(&1));
    assert_eq!(stats.total_tool_invocations(), 3);
    assert_eq!(stats.distinct_tools(), 2);
    assert_eq!(session.turns().len(), 8);
}

#[tokio::test]
async fn test_reset_clears_history_but_keeps_counters() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![answer("Hi."), answer("Hi again.")]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    orchestrator.ask(&sessions, &id, "Hello").await.unwrap();
    sessions.reset(&id).await.unwrap();
    orchestrator.ask(&sessions, &id, "Hello again").await.unwrap();

    assert_eq!(model.requests()[1].turns.len(), 1);
    let session = sessions.get(&id).await.unwrap();
    assert_eq!(session.turns().len(), 2);
    assert_eq!(session.stats().queries_answered, 2);
}

// ============================================================================
// Faults and deadlines
// ============================================================================

#[tokio::test]
async fn test_tool_timeout_leads_to_replan() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![
        calls(vec![call("get_payslip", json!({"employee_id": "EMP001"}))]),
        Step::Derive(failure_answer),
    ]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let answer = orchestrator.ask(&sessions, &id, "Payslip for EMP001?").await.unwrap();

    assert_eq!(answer.text, "The lookup failed (timeout), answering without it.");
    assert_eq!(answer.usage.calls[0].failure, Some(FailureKind::Timeout));
    assert_eq!(answer.usage.cycles, 2);
    assert!(!answer.degraded);
}

#[tokio::test]
async fn test_model_fault_leaves_session_unchanged() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![
        answer("First answer."),
        calls(vec![call("get_employee", json!({"employee_id": "EMP003"}))]),
        Step::Fail("unparseable output"),
    ]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    orchestrator.ask(&sessions, &id, "Hello").await.unwrap();
    let before = sessions.get(&id).await.unwrap();

    let err = orchestrator.ask(&sessions, &id, "Who is EMP003?").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelCapabilityFault);
    assert_eq!(fixture.records.calls(), 1);

    let after = sessions.get(&id).await.unwrap();
    assert_eq!(after.turns(), before.turns());
    assert_eq!(after.stats(), before.stats());
}

#[tokio::test]
async fn test_transport_failure_is_reported_as_model_fault() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![Step::Unreachable]);
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let err = orchestrator.ask(&sessions, &id, "Who is EMP003?").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelCapabilityFault);
    assert!(matches!(err, Error::ModelCapability(ref msg) if msg.contains("connection refused")));
    assert!(sessions.get(&id).await.unwrap().turns().is_empty());
}

#[tokio::test]
async fn test_query_timeout_leaves_session_unchanged() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![Step::Hang]);
    let config = OrchestratorConfig {
        query_timeout: Duration::from_millis(100),
        ..quick_config()
    };
    let orchestrator = fixture.orchestrator(&model, config);
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let err = orchestrator.ask(&sessions, &id, "Anything").await.unwrap_err();
    assert!(matches!(err, Error::QueryTimeout(_)));

    let session = sessions.get(&id).await.unwrap();
    assert!(session.turns().is_empty());
    assert_eq!(session.stats().queries_answered, 0);
}

#[tokio::test]
async fn test_cancellation_discards_partial_step() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(vec![calls(vec![call(
        "get_payslip",
        json!({"employee_id": "EMP001"}),
    )])]);
    let config = OrchestratorConfig {
        tool_timeout: Duration::from_secs(20),
        ..quick_config()
    };
    let orchestrator = fixture.orchestrator(&model, config);
    let sessions = SessionStore::new();
    let id = open(&sessions, AccessLevel::Public);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = orchestrator
        .ask_with_cancel(&sessions, &id, "Payslip?", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(fixture.payroll.calls(), 1);

    let session = sessions.get(&id).await.unwrap();
    assert!(session.turns().is_empty());
}

#[tokio::test]
async fn test_unknown_session_and_empty_utterance() {
    let fixture = Fixture::new();
    let model = ScriptedModel::new(Vec::new());
    let orchestrator = fixture.orchestrator(&model, quick_config());
    let sessions = SessionStore::new();

    let err = orchestrator
        .ask(&sessions, &SessionId::from("missing"), "Hi")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));

    let id = open(&sessions, AccessLevel::Public);
    let err = orchestrator.ask(&sessions, &id, "   ").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(model.requests().is_empty());
}

#[tokio::test]
async fn test_sessions_run_concurrently() {
    let fixture = Fixture::new();
    let model = ScriptedModel::with_default(Vec::new(), answer("ok"));
    let orchestrator = Arc::new(fixture.orchestrator(&model, quick_config()));
    let sessions = SessionStore::new();
    let ids: Vec<SessionId> = (0..4).map(|_| open(&sessions, AccessLevel::Public)).collect();

    let tasks = ids.iter().cloned().map(|id| {
        let orchestrator = Arc::clone(&orchestrator);
        let sessions = sessions.clone();
        tokio::spawn(async move { orchestrator.ask(&sessions, &id, "ping").await })
    });
    for result in futures::future::join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap().text, "ok");
    }
    for id in &ids {
        assert_eq!(sessions.get(id).await.unwrap().stats().queries_answered, 1);
    }
}
