// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The workflow loop: turns one user input into a completed task by
//! alternating model calls and tool executions.
//!
//! One `process_input` call is single-threaded and cooperative; the model
//! call dominates latency.  Every suspension point (pacing sleeps, the
//! stream read, tool execution) either polls for a user interrupt or is
//! bounded by a timeout, so the loop never wedges silently.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use runa_model::assemble::{AssemblyNote, StreamAssembler, TurnAssembly};
use runa_model::{
    continuity, generate_call_id, ChatProvider, ChatRequest, ClassifiedError, ErrorKind, Message,
    Role, TokenEstimator, ToolCall, PINNED_IMPORTANCE,
};
use runa_tools::{classify_call, order_calls, ExecContext, ExecutionMode, ToolInvocation, ToolRegistry};

use crate::conversation;
use crate::events::AgentEvent;
use crate::interrupt::InterruptDetector;
use crate::recovery;
use crate::repair;
use crate::session::SessionSink;
use crate::stats::{IterationStats, NullStats, StatsHook};

const INTERRUPT_POLL_SLICE: Duration = Duration::from_millis(100);
const SERVER_ERROR_BASE_DELAY: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

const INTERRUPT_MESSAGE: &str = "[User interrupt] Stop the current work. Check in with the user \
     via the user_collaboration tool before doing anything else.";

const RESUME_MESSAGE: &str = "Your previous response was empty even though the task is not \
     finished. Continue from where you stopped.";

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Hard cap on model-call iterations per user input.
    pub max_iterations: u32,
    /// Retry cap for transport and 5xx server errors.
    pub transport_retry_cap: u32,
    /// Retry cap for every other retryable kind.
    pub bounded_retry_cap: u32,
    /// Token-limit trim attempts before giving up.
    pub token_limit_retry_cap: u32,
    /// Errors tolerated within one `process_input` before short-circuiting.
    pub session_error_budget: u32,
    /// Empty-response-after-tools recovery attempts.
    pub premature_stop_cap: u32,
    /// Identical consecutive errors before declaring the error persistent.
    pub consecutive_error_cap: u32,
    pub stream: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            transport_retry_cap: 20,
            bounded_retry_cap: 3,
            token_limit_retry_cap: 3,
            session_error_budget: 10,
            premature_stop_cap: 2,
            consecutive_error_cap: 3,
            stream: true,
        }
    }
}

/// Outcome of one `process_input` call.
#[derive(Debug)]
pub struct WorkflowResult {
    pub success: bool,
    pub content: String,
    pub error: Option<ClassifiedError>,
    pub iterations: u32,
    /// Names of the tools executed, in transcript order.
    pub tool_calls_made: Vec<String>,
}

impl WorkflowResult {
    fn completed(content: String, iterations: u32, tool_calls_made: Vec<String>) -> Self {
        Self {
            success: true,
            content,
            error: None,
            iterations,
            tool_calls_made,
        }
    }

    fn failed(error: ClassifiedError, iterations: u32, tool_calls_made: Vec<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error),
            iterations,
            tool_calls_made,
        }
    }
}

/// Per-call loop state.
struct WorkflowContext {
    iteration: u32,
    retry_count: u32,
    bounded_retries: u32,
    token_limit_retries: u32,
    premature_stop_retries: u32,
    session_error_count: u32,
    tool_calls_made: Vec<String>,
    start_time: Instant,
    consecutive_errors: u32,
    last_error: Option<String>,
}

impl WorkflowContext {
    fn new() -> Self {
        Self {
            iteration: 0,
            retry_count: 0,
            bounded_retries: 0,
            token_limit_retries: 0,
            premature_stop_retries: 0,
            session_error_count: 0,
            tool_calls_made: Vec::new(),
            start_time: Instant::now(),
            consecutive_errors: 0,
            last_error: None,
        }
    }
}

enum ErrorOutcome {
    Retry,
    Terminal(ClassifiedError),
}

/// The orchestrator.  Owns the loop state and borrows the session through
/// the narrow [`SessionSink`] interface; no component retains a reference
/// back to it.
pub struct Orchestrator {
    provider: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
    config: WorkflowConfig,
    system_prompt: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    estimator: TokenEstimator,
    interrupts: InterruptDetector,
    stats: Box<dyn StatsHook>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ChatProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            config: WorkflowConfig::default(),
            system_prompt: String::new(),
            temperature: None,
            top_p: None,
            estimator: TokenEstimator::new(),
            interrupts: InterruptDetector::disabled(),
            stats: Box::new(NullStats),
        }
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, top_p: Option<f32>) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    pub fn with_interrupts(mut self, detector: InterruptDetector) -> Self {
        self.interrupts = detector;
        self
    }

    pub fn with_stats(mut self, hook: Box<dyn StatsHook>) -> Self {
        self.stats = hook;
        self
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Process one user input to completion.
    pub async fn process_input(
        &mut self,
        user_input: &str,
        session: &mut dyn SessionSink,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> WorkflowResult {
        let snapshot_id = session.begin_turn(user_input);
        let exec_ctx = ExecContext {
            turn_snapshot_id: Some(snapshot_id),
        };

        let first_user = !session.history().iter().any(|m| m.role == Role::User);
        let mut user_msg = Message::user(user_input);
        if first_user {
            user_msg.importance = Some(PINNED_IMPORTANCE);
        }
        if let Err(e) = session
            .add_message(user_msg)
            .and_then(|_| session.save())
        {
            return WorkflowResult::failed(
                ClassifiedError::new(
                    ErrorKind::ServerError,
                    false,
                    format!("session persistence failed: {e}"),
                ),
                0,
                Vec::new(),
            );
        }

        let caps = self.provider.capabilities().await;
        let mut ctx = WorkflowContext::new();
        let mut preflight_done = false;
        // After token-limit recovery these carry the trimmed history and its
        // recovery-context summary until the input completes.
        let mut recovery_override: Option<Vec<Message>> = None;
        let mut recovery_note: Option<Message> = None;

        loop {
            if ctx.iteration >= self.config.max_iterations {
                return WorkflowResult::failed(
                    ClassifiedError::new(
                        ErrorKind::IterationLimit,
                        false,
                        format!(
                            "stopped after {} iterations without completing; \
                             consider splitting the task into smaller steps",
                            ctx.iteration
                        ),
                    ),
                    ctx.iteration,
                    ctx.tool_calls_made.clone(),
                );
            }

            // Pacing and rate-limit windows, interruptible.
            if !self.pace(tx).await || self.interrupts.poll() {
                self.handle_interrupt(session, tx).await;
                continue;
            }
            session.state().user_interrupted = false;

            let history = match &recovery_override {
                Some(h) => h.clone(),
                None => conversation::load_history(&session.history()),
            };
            let history = if preflight_done {
                history
            } else {
                preflight_done = true;
                conversation::preflight_trim(
                    history,
                    self.estimator.estimate(&self.system_prompt),
                    caps.max_context_window_tokens,
                    &self.estimator,
                )
            };
            let outgoing = self.build_outgoing(history, &recovery_note, session);

            let state = session.state_ref();
            let previous_response_id = continuity::resolve_previous_response_id(
                &state.stateful_markers,
                state.last_copilot_response_id.as_deref(),
                self.provider.model_name(),
            );
            let req = ChatRequest {
                messages: outgoing,
                tools: self.tool_schemas(),
                stream: self.config.stream,
                tool_call_iteration: ctx.iteration + 1,
                session_id: Some(session.session_id()),
                previous_response_id,
                temperature: self.temperature,
                top_p: self.top_p,
            };

            let call_started = Instant::now();
            let mut turn = match self.call_model(req, tx).await {
                Ok(turn) => turn,
                Err(err) => {
                    match self
                        .handle_error(err, &mut ctx, session, tx, &mut recovery_override, &mut recovery_note)
                        .await
                    {
                        ErrorOutcome::Retry => continue,
                        ErrorOutcome::Terminal(e) => {
                            return WorkflowResult::failed(
                                e,
                                ctx.iteration,
                                ctx.tool_calls_made.clone(),
                            );
                        }
                    }
                }
            };
            ctx.retry_count = 0;
            ctx.bounded_retries = 0;
            ctx.consecutive_errors = 0;
            ctx.last_error = None;

            self.record_turn_signals(&turn, ctx.iteration + 1, session, tx).await;

            if self.interrupts.poll() {
                // The pending assistant message is never persisted, so
                // history stays at the prior turn with no orphaned calls.
                ctx.iteration += 1;
                self.handle_interrupt(session, tx).await;
                continue;
            }

            // Some models write the tool invocation into the text stream
            // instead of the structured protocol.
            if turn.tool_calls.is_empty() && repair::text_contains_tool_markup(&turn.content) {
                if let Some((name, args)) = repair::convert_xml_invocation(&turn.content) {
                    debug!(tool = %name, "converted inline XML tool invocation");
                    turn.tool_calls =
                        vec![ToolCall::function(generate_call_id(), name, args.to_string())];
                }
            }

            if turn.tool_calls.is_empty() {
                ctx.iteration += 1;
                self.report_iteration(&ctx, &turn, call_started, 0);

                if turn.content.trim().is_empty() && !ctx.tool_calls_made.is_empty() {
                    // Likely a truncated continuation, not a real answer.
                    if ctx.premature_stop_retries < self.config.premature_stop_cap {
                        ctx.premature_stop_retries += 1;
                        ctx.iteration -= 1; // recovery attempts are free
                        let _ = tx
                            .send(AgentEvent::SystemMessage(
                                "Model returned an empty response mid-task; asking it to resume"
                                    .into(),
                            ))
                            .await;
                        if persist(session, Message::user(RESUME_MESSAGE)).is_err() {
                            warn!("failed to persist resume nudge");
                        }
                        continue;
                    }
                    return WorkflowResult::failed(
                        ClassifiedError::new(
                            ErrorKind::PrematureStopBudget,
                            false,
                            "model kept returning empty responses after tool execution",
                        ),
                        ctx.iteration,
                        ctx.tool_calls_made.clone(),
                    );
                }

                if !turn.content.is_empty() {
                    if let Err(e) = persist(session, Message::assistant(&turn.content)) {
                        warn!(error = %e, "failed to persist final assistant message");
                    }
                }
                let _ = tx.send(AgentEvent::TurnComplete).await;
                return WorkflowResult::completed(
                    turn.content,
                    ctx.iteration,
                    ctx.tool_calls_made.clone(),
                );
            }

            // ── Tool-call turn ────────────────────────────────────────────────
            ctx.iteration += 1;
            let interrupted = self
                .run_tool_calls(&mut turn, &mut ctx, session, tx, &exec_ctx)
                .await;
            self.report_iteration(&ctx, &turn, call_started, turn.tool_calls.len());
            if interrupted {
                self.handle_interrupt(session, tx).await;
            }
        }
    }

    // ── Model call ────────────────────────────────────────────────────────────

    async fn call_model(
        &mut self,
        req: ChatRequest,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<TurnAssembly, ClassifiedError> {
        let prompt_chars: usize = req.messages.iter().map(|m| m.char_len()).sum();
        let streaming = req.stream;
        let mut stream = self.provider.complete(req).await?;

        let mut asm = StreamAssembler::new();
        while let Some(item) = stream.next().await {
            let event = item?;
            if let Some(note) = asm.absorb(event) {
                match note {
                    AssemblyNote::Chunk { delta, stats } => {
                        let _ = tx.send(AgentEvent::Chunk { delta, stats }).await;
                    }
                    AssemblyNote::ToolCallNamed(name) => {
                        let _ = tx.send(AgentEvent::ToolCallStarted(name)).await;
                    }
                    AssemblyNote::Thinking(text) => {
                        let _ = tx.send(AgentEvent::Thinking(text)).await;
                    }
                }
            }
        }
        let turn = asm.finish();

        // Streaming responses carry no usage block; only real counts feed
        // the estimator.
        if !streaming {
            if let Some(usage) = &turn.usage {
                if usage.prompt_tokens > 0 {
                    self.estimator.observe(prompt_chars, usage.prompt_tokens);
                }
            }
        }
        Ok(turn)
    }

    fn build_outgoing(
        &self,
        history: Vec<Message>,
        recovery_note: &Option<Message>,
        session: &mut dyn SessionSink,
    ) -> Vec<Message> {
        let mut outgoing = Vec::with_capacity(history.len() + 3);
        outgoing.push(Message::system(self.system_prompt.clone()));
        if let Some(note) = recovery_note {
            outgoing.push(note.clone());
        }
        let context_files: Vec<PathBuf> = session.state_ref().context_files.clone();
        if let Some(ctx_msg) =
            conversation::build_context_file_message(&context_files, &self.estimator)
        {
            outgoing.push(ctx_msg);
        }
        outgoing.extend(history);
        conversation::enforce_alternation(outgoing, self.provider.profile().supports_role_tool)
    }

    fn tool_schemas(&self) -> Vec<runa_model::ToolSchema> {
        self.tools
            .schemas()
            .into_iter()
            .map(|s| runa_model::ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }

    // ── Tool execution ────────────────────────────────────────────────────────

    /// Execute the turn's tool calls and persist the results.
    ///
    /// Execution follows bucket order (blocking → serial → parallel →
    /// collaboration) while results are appended in the model's emission
    /// order.  The pending assistant message is persisted together with the
    /// first result — never before — so an interrupt in between leaves the
    /// transcript at the prior turn.  Returns true when an interrupt fired.
    async fn run_tool_calls(
        &mut self,
        turn: &mut TurnAssembly,
        ctx: &mut WorkflowContext,
        session: &mut dyn SessionSink,
        tx: &mpsc::Sender<AgentEvent>,
        exec_ctx: &ExecContext,
    ) -> bool {
        // Repair arguments up front; a failed repair becomes a synthetic
        // error result so pairing is preserved.
        let mut invocations: Vec<Result<ToolInvocation, String>> =
            Vec::with_capacity(turn.tool_calls.len());
        for call in &mut turn.tool_calls {
            match repair::repair_arguments(&call.function.arguments) {
                Ok(args) => {
                    call.function.arguments = args.to_string();
                    invocations.push(Ok(ToolInvocation {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        args,
                    }));
                }
                Err(e) => {
                    warn!(tool = %call.function.name, error = %e, "unrepairable tool arguments");
                    invocations.push(Err(format!(
                        "Error: arguments for {} could not be parsed as JSON ({e}). \
                         Emit a corrected call.",
                        call.function.name
                    )));
                }
            }
        }

        let pending_assistant =
            Message::assistant_with_tool_calls(turn.content.clone(), turn.tool_calls.clone());

        let modes: Vec<ExecutionMode> = turn
            .tool_calls
            .iter()
            .zip(&invocations)
            .map(|(call, inv)| match (self.tools.get(&call.function.name), inv) {
                (Some(tool), Ok(inv)) => classify_call(tool.as_ref(), &inv.args),
                _ => ExecutionMode::Parallel,
            })
            .collect();
        let order = order_calls(&modes);

        let total = turn.tool_calls.len();
        let mut results: Vec<Option<Message>> = (0..total).map(|_| None).collect();
        let mut flushed = 0usize;
        let mut assistant_persisted = false;
        let mut interrupted = false;

        for &idx in &order {
            if !interrupted && self.interrupts.poll() {
                interrupted = true;
            }
            let call_id = turn.tool_calls[idx].id.clone();
            let tool_name = turn.tool_calls[idx].function.name.clone();

            let result = if interrupted {
                Message::tool_result(call_id, "[skipped: user interrupt]")
            } else {
                match &invocations[idx] {
                    Ok(invocation) => {
                        let outcome = self.tools.execute(invocation, exec_ctx).await;
                        let _ = tx
                            .send(AgentEvent::ToolCallFinished {
                                call_id: call_id.clone(),
                                tool_name: tool_name.clone(),
                                output: outcome.output.clone(),
                                is_error: !outcome.success,
                            })
                            .await;
                        ctx.tool_calls_made.push(tool_name);
                        Message::tool_result(call_id, outcome.output)
                    }
                    Err(synthetic) => Message::tool_result(call_id, synthetic.clone()),
                }
            };
            results[idx] = Some(result);

            // Flush the longest emission-order prefix that is ready; the
            // assistant message rides with the first flushed result.
            let mut appended = false;
            while flushed < total && results[flushed].is_some() {
                if !assistant_persisted {
                    if session.add_message(pending_assistant.clone()).is_err() {
                        warn!("failed to persist assistant tool-call message");
                    }
                    assistant_persisted = true;
                }
                let msg = results[flushed].take().expect("checked above");
                if session.add_message(msg).is_err() {
                    warn!("failed to persist tool result");
                }
                flushed += 1;
                appended = true;
            }
            if appended {
                if let Err(e) = session.save() {
                    warn!(error = %e, "session save failed after tool result");
                }
            }
        }

        if interrupted && !assistant_persisted {
            // Nothing from this turn reached the transcript: clean state.
            debug!("interrupt before first tool result; discarding pending turn");
            return true;
        }

        interrupted
    }

    // ── Error handling ────────────────────────────────────────────────────────

    async fn handle_error(
        &mut self,
        err: ClassifiedError,
        ctx: &mut WorkflowContext,
        session: &mut dyn SessionSink,
        tx: &mpsc::Sender<AgentEvent>,
        recovery_override: &mut Option<Vec<Message>>,
        recovery_note: &mut Option<Message>,
    ) -> ErrorOutcome {
        ctx.session_error_count += 1;
        if ctx.last_error.as_deref() == Some(err.message.as_str()) {
            ctx.consecutive_errors += 1;
        } else {
            ctx.consecutive_errors = 1;
            ctx.last_error = Some(err.message.clone());
        }

        // Token-limit retries legitimately repeat the same provider message
        // while each attempt trims a different payload; the persistent-error
        // check would cut the trim ladder short.
        if ctx.consecutive_errors >= self.config.consecutive_error_cap
            && err.kind != ErrorKind::TokenLimitExceeded
        {
            let _ = tx
                .send(AgentEvent::SystemMessage(format!(
                    "Stopping: the same error occurred {} times in a row",
                    ctx.consecutive_errors
                )))
                .await;
            return ErrorOutcome::Terminal(ClassifiedError {
                retryable: false,
                message: format!("persistent error: {}", err.message),
                ..err
            });
        }
        if ctx.session_error_count > self.config.session_error_budget {
            return ErrorOutcome::Terminal(ClassifiedError::new(
                ErrorKind::SessionErrorBudget,
                false,
                format!(
                    "aborting after {} errors in one request",
                    ctx.session_error_count
                ),
            ));
        }
        if !err.retryable {
            return ErrorOutcome::Terminal(err);
        }

        match err.kind {
            ErrorKind::Transport | ErrorKind::ServerError => {
                ctx.retry_count += 1;
                if ctx.retry_count > self.config.transport_retry_cap {
                    return ErrorOutcome::Terminal(err);
                }
                let delay = backoff_delay(ctx.retry_count);
                let _ = tx
                    .send(AgentEvent::SystemMessage(format!(
                        "Provider error; retrying in {} ({}/{})",
                        humantime::format_duration(delay),
                        ctx.retry_count,
                        self.config.transport_retry_cap
                    )))
                    .await;
                self.sleep_interruptible(delay).await;
                ErrorOutcome::Retry
            }
            ErrorKind::RateLimit => {
                ctx.bounded_retries += 1;
                if ctx.bounded_retries > self.config.bounded_retry_cap {
                    return ErrorOutcome::Terminal(err);
                }
                let wait = err.retry_after.unwrap_or(Duration::from_secs(60));
                let _ = tx
                    .send(AgentEvent::SystemMessage(format!(
                        "Rate limited; waiting {}",
                        humantime::format_duration(wait)
                    )))
                    .await;
                self.sleep_interruptible(wait).await;
                ErrorOutcome::Retry
            }
            ErrorKind::AuthRecovered => {
                ctx.bounded_retries += 1;
                if ctx.bounded_retries > self.config.bounded_retry_cap {
                    return ErrorOutcome::Terminal(err);
                }
                debug!("retrying immediately after credential refresh");
                ErrorOutcome::Retry
            }
            ErrorKind::MalformedToolJson => {
                ctx.bounded_retries += 1;
                if ctx.bounded_retries > self.config.bounded_retry_cap {
                    return ErrorOutcome::Terminal(err);
                }
                debug!("retrying after malformed-tool-JSON rejection");
                ErrorOutcome::Retry
            }
            ErrorKind::MessageStructure => {
                ctx.bounded_retries += 1;
                if ctx.bounded_retries > self.config.bounded_retry_cap {
                    return ErrorOutcome::Terminal(err);
                }
                // Drop any recovery override and rebuild from the persisted
                // history; load_history repairs the pairing defects the
                // provider complained about.
                *recovery_override = None;
                debug!("rebuilding payload from session history after structure rejection");
                ErrorOutcome::Retry
            }
            ErrorKind::TokenLimitExceeded => {
                ctx.token_limit_retries += 1;
                let current = recovery_override
                    .clone()
                    .unwrap_or_else(|| conversation::load_history(&session.history()));
                let trim = recovery::trim_for_retry(current, ctx.token_limit_retries);
                if ctx.token_limit_retries > self.config.token_limit_retry_cap
                    || (ctx.token_limit_retries >= self.config.token_limit_retry_cap
                        && trim.is_minimal())
                {
                    return ErrorOutcome::Terminal(ClassifiedError::new(
                        ErrorKind::TokenLimitExceeded,
                        false,
                        "the conversation does not fit the model's context window even \
                         after trimming; switch to a model with a larger context window",
                    ));
                }
                let _ = tx
                    .send(AgentEvent::SystemMessage(format!(
                        "Prompt exceeds the token limit; dropped {} older message(s) and retrying",
                        trim.dropped.len()
                    )))
                    .await;
                *recovery_note = Some(recovery::summarize_dropped(&trim.dropped, None));
                *recovery_override = Some(trim.kept);
                ErrorOutcome::Retry
            }
            _ => ErrorOutcome::Terminal(err),
        }
    }

    // ── Signals, pacing, interrupts ───────────────────────────────────────────

    /// Fold the stream's side-band signals (continuity marker, response id,
    /// quota) into the session.  Saving here is best-effort; the next atomic
    /// save will persist the same state again.
    async fn record_turn_signals(
        &mut self,
        turn: &TurnAssembly,
        tool_call_iteration: u32,
        session: &mut dyn SessionSink,
        tx: &mpsc::Sender<AgentEvent>,
    ) {
        let model = self.provider.model_name().to_string();
        let provider = self.provider.provider_name().to_string();
        let mut dirty = false;

        if let Some(marker) = &turn.stateful_marker {
            continuity::store_marker(
                &mut session.state().stateful_markers,
                &model,
                marker,
                tool_call_iteration,
            );
            dirty = true;
        }
        if let Some(id) = &turn.response_id {
            session.state().last_copilot_response_id = Some(id.clone());
            dirty = true;
        }
        if let Some(quota) = &turn.quota {
            if let Some(charge) = session.state().apply_quota(quota.clone()) {
                let _ = tx.send(AgentEvent::SystemMessage(charge)).await;
            }
            dirty = true;
        }
        if let Some(usage) = &turn.usage {
            session.record_api_usage(usage, &model, &provider);
        }
        if dirty {
            if let Err(e) = session.save() {
                debug!(error = %e, "best-effort signal save failed");
            }
        }
    }

    /// Enforce the gateway's pacing window.  Returns false when the wait was
    /// cut short by a user interrupt.
    async fn pace(&self, tx: &mpsc::Sender<AgentEvent>) -> bool {
        let wait = self.provider.pacing_wait();
        if wait.is_zero() {
            return true;
        }
        if wait > Duration::from_secs(1) {
            let _ = tx
                .send(AgentEvent::SystemMessage(format!(
                    "Waiting {} before the next request",
                    humantime::format_duration(Duration::from_secs(wait.as_secs().max(1)))
                )))
                .await;
        }
        self.sleep_interruptible(wait).await
    }

    /// Sleep in short slices, polling for interrupts.  Returns false when
    /// interrupted.
    async fn sleep_interruptible(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.interrupts.poll() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep(INTERRUPT_POLL_SLICE.min(deadline - now)).await;
        }
    }

    async fn handle_interrupt(&self, session: &mut dyn SessionSink, tx: &mpsc::Sender<AgentEvent>) {
        session.state().user_interrupted = true;
        if persist(session, Message::user(INTERRUPT_MESSAGE)).is_err() {
            warn!("failed to persist interrupt message");
        }
        let _ = tx
            .send(AgentEvent::SystemMessage(
                "Interrupted; redirecting the agent to check in".into(),
            ))
            .await;
    }

    fn report_iteration(
        &mut self,
        ctx: &WorkflowContext,
        turn: &TurnAssembly,
        started: Instant,
        tool_calls: usize,
    ) {
        let usage = turn.usage.unwrap_or_default();
        self.stats.on_iteration(&IterationStats {
            iteration: ctx.iteration,
            duration: started.elapsed(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            tool_calls,
            retries: ctx.retry_count + ctx.bounded_retries,
        });
    }
}

fn persist(session: &mut dyn SessionSink, message: Message) -> anyhow::Result<()> {
    session.add_message(message)?;
    session.save()
}

/// Exponential backoff for transient provider errors: 2s · 2^(retry−1),
/// capped.
fn backoff_delay(retry_count: u32) -> Duration {
    let factor = 1u32 << (retry_count.saturating_sub(1)).min(5);
    (SERVER_ERROR_BASE_DELAY * factor).min(MAX_BACKOFF)
}
