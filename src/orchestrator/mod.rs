//! Query orchestration.
//!
//! One call to [`Orchestrator::ask`] walks a small state machine:
//!
//! ```text
//! AwaitingUserInput → Planning → (Dispatching → Planning)* → Synthesizing → AwaitingUserInput
//! ```
//!
//! Every planning step sends the model the full history plus the tool
//! catalog. Tool calls from one step run concurrently and all of them finish
//! (or time out) before the next step. Results pass through the
//! [`ConfidentialityFilter`] before they are recorded anywhere.
//!
//! All turns produced while answering live in a pending buffer. The session
//! only sees them once an answer exists, so a query that fails, times out or
//! is cancelled leaves the session exactly as it was.
//!
//! # Failure handling
//!
//! | Condition | Outcome |
//! |-----------|---------|
//! | `AdapterFault` / `Timeout` on a call | Result goes back to the model, which re-plans |
//! | Every call in a step is `UnknownTool` / `InvalidArguments` | Degraded answer ("I couldn't complete that lookup") |
//! | Cycle cap reached | Final model call without tools, else a locally assembled answer |
//! | Model fault | `Err(Error::ModelCapability)`, session untouched |
//! | Query deadline | `Err(Error::QueryTimeout)`, session untouched |
//! | Cancellation | `Err(Error::Cancelled)`, session untouched |

use crate::dispatch::Dispatcher;
use crate::llm::{
    FALLBACK_SYNTHESIS_PROMPT, ModelCapability, PlanningRequest, PlanningResponse, SYSTEM_PROMPT,
};
use crate::models::{
    AccessLevel, ConversationTurn, FailureKind, Role, ToolCallRequest, ToolExchange, ToolResult,
};
use crate::security::ConfidentialityFilter;
use crate::session::{Session, SessionId, SessionStore};
use crate::{Error, Result};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Prefix of every degraded answer.
pub const DEGRADED_ANSWER: &str = "I couldn't complete that lookup";

/// Longest tool output quoted in a locally assembled answer.
const MAX_QUOTED_CHARS: usize = 600;

/// Orchestrator limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Planning/dispatch cycles before forced synthesis.
    pub max_cycles: usize,
    /// Deadline for each tool call.
    pub tool_timeout: Duration,
    /// Deadline for the whole query.
    pub query_timeout: Duration,
    /// Tool calls from one step that may run at once.
    pub max_parallel_tools: usize,
    /// Instructions prepended to every planning step.
    pub system_prompt: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_cycles: 5,
            tool_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(60),
            max_parallel_tools: 4,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Idle between queries.
    AwaitingUserInput,
    /// Waiting on the model.
    Planning,
    /// Running tool calls.
    Dispatching,
    /// Producing the final answer.
    Synthesizing,
}

impl Phase {
    /// Returns the phase as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingUserInput => "awaiting_user_input",
            Self::Planning => "planning",
            Self::Dispatching => "dispatching",
            Self::Synthesizing => "synthesizing",
        }
    }
}

/// One tool call made while answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallSummary {
    /// Tool name as requested by the model.
    pub name: String,
    /// Failure kind, or `None` on success.
    pub failure: Option<FailureKind>,
}

/// Tool usage for one answered query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolUsageSummary {
    /// Calls in the order the model requested them.
    pub calls: Vec<ToolCallSummary>,
    /// Planning steps taken.
    pub cycles: usize,
    /// True if the cycle cap forced synthesis.
    pub loop_limit_reached: bool,
    /// Marked entries (chunks, policy listings) removed by the confidentiality filter.
    pub withheld_chunks: usize,
    /// Wall-clock time spent, in milliseconds.
    pub latency_ms: u64,
}

impl ToolUsageSummary {
    /// Total calls.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.len()
    }

    /// Calls that failed.
    #[must_use]
    pub fn failed_calls(&self) -> usize {
        self.calls.iter().filter(|c| c.failure.is_some()).count()
    }

    /// Names of calls that reached a catalogued tool.
    fn counted_tools(&self) -> impl Iterator<Item = &str> {
        self.calls
            .iter()
            .filter(|c| c.failure != Some(FailureKind::UnknownTool))
            .map(|c| c.name.as_str())
    }
}

/// A synthesized answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    /// Answer text. Never empty.
    pub text: String,
    /// Tools used on the way.
    pub usage: ToolUsageSummary,
    /// True if the lookup could not be completed as asked.
    pub degraded: bool,
}

/// Caller-facing result of [`Orchestrator::ask`].
pub type AnswerResult = Result<Answer>;

/// Everything a finished query hands back for commit.
struct Completed {
    turns: Vec<ConversationTurn>,
    answer: Answer,
}

/// Drives the plan/dispatch loop.
pub struct Orchestrator {
    dispatcher: Dispatcher,
    model: Arc<dyn ModelCapability>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        model: Arc<dyn ModelCapability>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            dispatcher,
            model,
            config,
        }
    }

    /// The dispatcher used for tool calls.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Active limits.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Answers one utterance within a session.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::ask_with_cancel`].
    pub async fn ask(
        &self,
        sessions: &SessionStore,
        session_id: &SessionId,
        utterance: &str,
    ) -> AnswerResult {
        self.ask_with_cancel(sessions, session_id, utterance, &CancellationToken::new())
            .await
    }

    /// Answers one utterance, aborting if `cancel` fires.
    ///
    /// Queries on the same session are serialized; a second call waits for
    /// the first to finish.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for an empty utterance
    /// - [`Error::SessionNotFound`] if the session does not exist
    /// - [`Error::ModelCapability`] if the model fails or is unparseable
    /// - [`Error::QueryTimeout`] if the query deadline elapses
    /// - [`Error::Cancelled`] if `cancel` fires first
    #[instrument(
        name = "ragmcp.orchestrator.ask",
        skip_all,
        fields(session_id = %session_id)
    )]
    pub async fn ask_with_cancel(
        &self,
        sessions: &SessionStore,
        session_id: &SessionId,
        utterance: &str,
        cancel: &CancellationToken,
    ) -> AnswerResult {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(Error::InvalidInput("utterance is empty".to_string()));
        }
        let handle = sessions.handle(session_id)?;
        let start = Instant::now();

        let mut session = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(self.abandon(Error::Cancelled, start)),
            guard = handle.lock() => guard,
        };

        let deadline = self.config.query_timeout;
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(deadline, self.run(&session, utterance, start)) => {
                result.unwrap_or(Err(Error::QueryTimeout(deadline)))
            },
        };

        match outcome {
            Ok(Completed { turns, mut answer }) => {
                let latency = start.elapsed();
                answer.usage.latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                session.commit(turns, answer.usage.counted_tools(), latency);

                let status = if answer.degraded {
                    "degraded"
                } else if answer.usage.loop_limit_reached {
                    "loop_limit"
                } else {
                    "answered"
                };
                record_query_metrics(status, latency, answer.usage.cycles);
                tracing::info!(
                    status,
                    cycles = answer.usage.cycles,
                    tool_calls = answer.usage.total_calls(),
                    failed_calls = answer.usage.failed_calls(),
                    withheld_chunks = answer.usage.withheld_chunks,
                    latency_ms = answer.usage.latency_ms,
                    "Query answered"
                );
                Ok(answer)
            },
            Err(err) => Err(self.abandon(err, start)),
        }
    }

    fn abandon(&self, err: Error, start: Instant) -> Error {
        let status = match err {
            Error::QueryTimeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::ModelCapability(_) => "model_fault",
            _ => "error",
        };
        record_query_metrics(status, start.elapsed(), 0);
        tracing::warn!(status, error = %err, model = self.model.name(), "Query abandoned, session unchanged");
        err
    }

    /// Runs the state machine against a read-only view of the session.
    async fn run(&self, session: &Session, utterance: &str, start: Instant) -> Result<Completed> {
        let level = session.access_level();
        let mut pending = vec![ConversationTurn::user(utterance)];
        let mut usage = ToolUsageSummary::default();

        for cycle in 1..=self.config.max_cycles {
            usage.cycles = cycle;
            let request = self.planning_request(
                session.turns(),
                &pending,
                self.config.system_prompt.clone(),
                true,
            );
            tracing::debug!(phase = Phase::Planning.as_str(), cycle, "Planning");

            let calls = match self.model.plan(&request).await.map_err(model_fault)? {
                PlanningResponse::Answer(text) => {
                    let text = if text.trim().is_empty() {
                        tracing::warn!(cycle, "Model returned an empty answer");
                        best_effort_answer(&pending)
                    } else {
                        text
                    };
                    return Ok(finish(pending, text, usage, false));
                },
                PlanningResponse::ToolCalls(calls) if calls.is_empty() => {
                    tracing::warn!(cycle, "Model returned an empty tool call list");
                    let text = best_effort_answer(&pending);
                    return Ok(finish(pending, text, usage, false));
                },
                PlanningResponse::ToolCalls(calls) => calls,
            };

            tracing::debug!(
                phase = Phase::Dispatching.as_str(),
                cycle,
                calls = calls.len(),
                "Dispatching"
            );
            let exchanges = self.dispatch_step(calls, level, &mut usage).await;
            let rejected = request_errors(&exchanges);
            pending.push(ConversationTurn::tool(exchanges));

            if let Some(reason) = rejected {
                tracing::warn!(cycle, reason = %reason, "Every tool call in the step was rejected");
                let text = format!("{DEGRADED_ANSWER}: {reason}");
                return Ok(finish(pending, text, usage, true));
            }
        }

        usage.loop_limit_reached = true;
        tracing::warn!(
            max_cycles = self.config.max_cycles,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Cycle cap reached, forcing synthesis"
        );
        let text = self.forced_synthesis(session.turns(), &pending).await;
        Ok(finish(pending, text, usage, false))
    }

    /// Runs one step's calls with bounded concurrency, keeping request order.
    async fn dispatch_step(
        &self,
        calls: Vec<ToolCallRequest>,
        level: AccessLevel,
        usage: &mut ToolUsageSummary,
    ) -> Vec<ToolExchange> {
        let timeout = self.config.tool_timeout;
        let outcomes: Vec<(ToolExchange, usize)> = futures::stream::iter(calls)
            .map(|request| async move {
                let result = self.dispatcher.dispatch_within(&request, timeout).await;
                let filtered = ConfidentialityFilter::filter_result(result, level);
                (
                    ToolExchange {
                        request,
                        result: filtered.result,
                    },
                    filtered.withheld,
                )
            })
            .buffered(self.config.max_parallel_tools.max(1))
            .collect()
            .await;

        outcomes
            .into_iter()
            .map(|(exchange, withheld)| {
                usage.withheld_chunks += withheld;
                usage.calls.push(ToolCallSummary {
                    name: exchange.request.name.clone(),
                    failure: exchange.result.failure_kind(),
                });
                exchange
            })
            .collect()
    }

    /// Final model call without tools. Falls back to a locally assembled
    /// answer if the model fails or still asks for tools.
    async fn forced_synthesis(
        &self,
        history: &[ConversationTurn],
        pending: &[ConversationTurn],
    ) -> String {
        tracing::debug!(phase = Phase::Synthesizing.as_str(), "Forced synthesis");
        let prompt = format!("{}\n\n{FALLBACK_SYNTHESIS_PROMPT}", self.config.system_prompt);
        let request = self.planning_request(history, pending, prompt, false);

        match self.model.plan(&request).await {
            Ok(PlanningResponse::Answer(text)) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!("Model did not produce a final answer, assembling one locally");
                best_effort_answer(pending)
            },
            Err(err) => {
                tracing::warn!(error = %err, "Forced synthesis failed, assembling answer locally");
                best_effort_answer(pending)
            },
        }
    }

    fn planning_request(
        &self,
        history: &[ConversationTurn],
        pending: &[ConversationTurn],
        system_prompt: String,
        with_tools: bool,
    ) -> PlanningRequest {
        PlanningRequest {
            system_prompt,
            turns: history.iter().chain(pending).cloned().collect(),
            tools: if with_tools {
                self.dispatcher.catalog().all().to_vec()
            } else {
                Vec::new()
            },
        }
    }
}

fn finish(
    mut pending: Vec<ConversationTurn>,
    text: String,
    usage: ToolUsageSummary,
    degraded: bool,
) -> Completed {
    pending.push(ConversationTurn::assistant(text.clone()));
    Completed {
        turns: pending,
        answer: Answer {
            text,
            usage,
            degraded,
        },
    }
}

/// Returns the failure messages if every call failed because of the request
/// itself rather than the backend.
fn request_errors(exchanges: &[ToolExchange]) -> Option<String> {
    let all_rejected = !exchanges.is_empty()
        && exchanges.iter().all(|ex| {
            ex.result
                .failure_kind()
                .is_some_and(|kind| kind.is_request_error())
        });
    if !all_rejected {
        return None;
    }

    let reasons: Vec<&str> = exchanges
        .iter()
        .filter_map(|ex| match &ex.result {
            ToolResult::Failure { message, .. } => Some(message.as_str()),
            ToolResult::Success { .. } => None,
        })
        .collect();
    Some(reasons.join("; "))
}

/// Assembles an answer from whatever successful results were gathered.
///
/// Quotes only recorded results, which have already been filtered.
fn best_effort_answer(pending: &[ConversationTurn]) -> String {
    let found: Vec<String> = pending
        .iter()
        .filter(|turn| turn.role == Role::Tool)
        .flat_map(|turn| &turn.exchanges)
        .filter(|ex| ex.result.is_success())
        .map(|ex| {
            let body = ex.result.to_context_string();
            let quoted: String = body.chars().take(MAX_QUOTED_CHARS).collect();
            let ellipsis = if quoted.len() < body.len() { "…" } else { "" };
            format!("- {}: {quoted}{ellipsis}", ex.request.name)
        })
        .collect();

    if found.is_empty() {
        format!("{DEGRADED_ANSWER}: no tool returned usable results.")
    } else {
        format!(
            "I ran out of lookup steps before finishing. Here is what I found:\n\n{}",
            found.join("\n\n")
        )
    }
}

#[allow(clippy::cast_precision_loss)]
/// Any failure of the model boundary surfaces as a model capability fault,
/// whatever the client reported it as.
fn model_fault(err: Error) -> Error {
    match err {
        Error::ModelCapability(_) => err,
        other => Error::ModelCapability(other.to_string()),
    }
}

fn record_query_metrics(status: &'static str, latency: Duration, cycles: usize) {
    metrics::counter!("orchestrator_queries_total", "status" => status).increment(1);
    metrics::histogram!("orchestrator_query_duration_ms", "status" => status)
        .record(latency.as_secs_f64() * 1000.0);
    if cycles > 0 {
        metrics::histogram!("orchestrator_cycles").record(cycles as f64);
    }
}
