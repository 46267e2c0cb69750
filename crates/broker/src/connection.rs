//! Session Broker (C6): one client connection, one in-flight query at a
//! time, remaining responsive to `permission_response`/`cancel`/`ping`
//! while a query streams (spec.md §4.1).
//!
//! Grounded on the teacher's `run_turn` (`gateway/src/runtime/turn.rs`):
//! the query pipeline is spawned via `tokio::spawn` so the control loop
//! that owns `recv()` (the gateway bin's WebSocket handler, not built in
//! this crate) stays free to read `cancel`/`permission_response` while a
//! turn streams, cancellation is checked at each event rather than only
//! at the top of the loop, and completion/error finalization each have a
//! single exit path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use rl_domain::error::{Error, Result};
use rl_sandbox::{RunConfig, SandboxOutcome, SandboxSupervisor};
use rl_store::types::{
    BlockKind, ConversationBlock, ConversationMetrics, ConversationRole, NewConversation, Session,
};
use rl_store::StoreGateway;
use rl_transport::config::AgentBackendConfig;
use rl_transport::event::AgentEvent;
use rl_transport::process::AgentProcess;

use crate::event_log::EventLogRegistry;
use crate::permission::{PermissionArbiter, PermissionResolution};
use crate::wire::{
    is_virtual_working_dir, CancelledData, DoneData, ErrorData, InboundMessage,
    PermissionRequestData, SessionConfigRequest, SessionReadyData, Timings, ToolResultData,
    ToolUseData, WireMessage,
};

/// Callback the gateway bin injects to route a completed turn's text into
/// C7 (spec.md §4.1 step 8 "C7 buffer stimulus"), without `rl-broker`
/// depending on `rl-appraisal` directly: `(session_id, stimulus_type,
/// payload, context)`.
pub type StimulusSink = Arc<dyn Fn(Option<String>, String, String, serde_json::Value) + Send + Sync>;

/// Shared, cross-connection dependencies (one instance per daemon).
pub struct BrokerDeps {
    pub store: Arc<StoreGateway>,
    pub sandbox: Arc<SandboxSupervisor>,
    pub event_logs: Arc<EventLogRegistry>,
    pub agent_backend: AgentBackendConfig,
    /// Daemon-managed directory substituted for a virtual-scheme
    /// working_dir (chat mediums have no filesystem of their own —
    /// spec.md §4.1 step 3).
    pub fallback_working_dir: PathBuf,
    pub permission_timeout: Duration,
    /// `None` when no appraisal engine is wired (e.g. CLI subcommands
    /// that build a broker without a full `AppState`).
    pub stimulus_sink: Option<StimulusSink>,
}

#[derive(Default)]
struct ConnectionState {
    session_id: Option<String>,
    config: Option<SessionConfigRequest>,
    is_locked: bool,
    agent_session_id: Option<String>,
    query_in_flight: bool,
    /// Connection-local seq, used only before a session is bound (spec.md
    /// §4.2): never persisted, replaced by the session's EventLog once one
    /// exists.
    local_seq: u64,
}

/// One client connection (spec.md §4.1 "Connection state"). Owns at most
/// one session and one in-flight query.
pub struct Connection {
    deps: Arc<BrokerDeps>,
    outbound: mpsc::UnboundedSender<WireMessage>,
    state: AsyncMutex<ConnectionState>,
    arbiter: PermissionArbiter,
    cancel_requested: Arc<AtomicBool>,
    current_process: SyncMutex<Option<Arc<AgentProcess>>>,
}

impl Connection {
    pub fn new(deps: Arc<BrokerDeps>, outbound: mpsc::UnboundedSender<WireMessage>) -> Arc<Self> {
        let timeout = deps.permission_timeout;
        Arc::new(Self {
            deps,
            outbound,
            state: AsyncMutex::new(ConnectionState::default()),
            arbiter: PermissionArbiter::new(timeout),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            current_process: SyncMutex::new(None),
        })
    }

    /// Single entry point for every inbound control message (spec.md
    /// §4.1). `query` is the one variant that returns immediately after
    /// spawning its pipeline; everything else completes inline so the
    /// caller's recv loop naturally throttles on them.
    pub async fn handle(self: &Arc<Self>, msg: InboundMessage) {
        match msg {
            InboundMessage::NewSession { config } => self.new_session(config).await,
            InboundMessage::ResumeSession {
                session_id,
                last_seq,
                user_id,
            } => self.resume_session(session_id, last_seq, user_id).await,
            InboundMessage::UpdateConfig { config } => self.update_config(config).await,
            InboundMessage::PermissionResponse {
                request_id,
                allowed,
                deny_message,
            } => self.permission_response(request_id, allowed, deny_message).await,
            InboundMessage::Ping => self.ping(),
            InboundMessage::Cancel => self.cancel().await,
            InboundMessage::Query { prompt } => self.query(prompt),
            InboundMessage::Close => self.on_close().await,
        }
    }

    fn send(&self, kind: &str, data: serde_json::Value, seq: Option<u64>) {
        let _ = self.outbound.send(WireMessage {
            kind: kind.to_string(),
            data,
            timestamp: Utc::now(),
            seq,
        });
    }

    /// Emit through the session's EventLog (seq allocated there) once a
    /// session is bound, or via a connection-local counter before then
    /// (spec.md §4.2).
    async fn emit(&self, kind: &str, data: serde_json::Value) {
        let session_id = { self.state.lock().await.session_id.clone() };
        if let Some(session_id) = session_id {
            if let Some(log) = self.deps.event_logs.get(&session_id) {
                let envelope = log.append(kind, data.clone());
                self.send(kind, data, Some(envelope.seq));
                return;
            }
        }
        let mut state = self.state.lock().await;
        state.local_seq += 1;
        let seq = state.local_seq;
        drop(state);
        self.send(kind, data, Some(seq));
    }

    fn emit_pong(&self) {
        self.send("pong", serde_json::json!({}), None);
    }

    // ── new_session ──────────────────────────────────────────────────

    pub async fn new_session(&self, config: SessionConfigRequest) {
        // working_dir is only excused when the session has no filesystem
        // view at all (mount_type = none).
        let mount_none = matches!(
            config.sandbox_mount_type,
            Some(rl_store::types::SandboxMountType::None)
        );
        if config.working_dir.is_empty() && !mount_none {
            self.emit_error("working_dir must be non-empty unless sandbox_mount_type is none", true)
                .await;
            return;
        }

        let working_dir = self.resolve_working_dir(&config.working_dir);
        let mut session = Session::new(Uuid::new_v4().to_string(), working_dir.clone());
        session.personality = config.personality_tag();
        session.user_id = config.user_id.clone();
        session.sandbox_mode = config.sandbox_mode.unwrap_or(false);
        if let Some(mt) = config.sandbox_mount_type {
            session.sandbox_mount_type = mt;
        }
        if let Some(settings) = config.sandbox_settings.clone() {
            session.sandbox_settings = settings;
        }
        if let Some(nm) = config.sandbox_network_mode {
            session.sandbox_network_mode = nm;
        }
        session.name = config.session_name.clone();

        let session = match self.deps.store.create_session(session) {
            Ok(s) => s,
            Err(e) => {
                self.emit_error(&format!("failed to create session: {e}"), true).await;
                return;
            }
        };
        self.deps.event_logs.get_or_create(&session.id);

        let mut is_locked = false;
        if session.sandbox_mode {
            let run_config = run_config_from(&config, &working_dir);
            match self.deps.sandbox.ensure(&session.id, run_config) {
                Ok(SandboxOutcome::Active(_)) => {}
                Ok(SandboxOutcome::Locked) => is_locked = true,
                Err(e) => {
                    let _ = self.deps.store.lock_session(&session.id);
                    self.emit_error(&format!("sandbox start failed: {e}"), true).await;
                    is_locked = true;
                }
            }
        }

        {
            let mut state = self.state.lock().await;
            state.session_id = Some(session.id.clone());
            state.config = Some(config);
            state.is_locked = is_locked;
        }

        self.emit_session_ready(&session, is_locked).await;
    }

    // ── resume_session ───────────────────────────────────────────────

    pub async fn resume_session(
        &self,
        session_id: String,
        last_seq: Option<u64>,
        user_id: Option<String>,
    ) {
        let session = match self.deps.store.load_session(&session_id) {
            Ok(s) => s,
            Err(_) => {
                self.emit_error(&format!("session {session_id} not found"), true).await;
                return;
            }
        };
        if let Some(owner) = &session.user_id {
            if user_id.as_deref() != Some(owner.as_str()) {
                self.emit_error("session belongs to a different user", true).await;
                return;
            }
        }

        let mut is_locked = session.is_locked;
        if session.sandbox_mode && !is_locked {
            let run_config = RunConfig {
                working_dir: session.working_dir.clone(),
                system_prompt: session.personality.clone(),
                model: None,
                thinking_budget: None,
                allowed_tools: Vec::new(),
                mount_type: session.sandbox_mount_type,
                network_mode: session.sandbox_network_mode,
                plugins: Vec::new(),
                env: Default::default(),
            };
            match self.deps.sandbox.ensure(&session_id, run_config) {
                Ok(SandboxOutcome::Active(_)) => {}
                Ok(SandboxOutcome::Locked) => is_locked = true,
                Err(e) => {
                    self.emit_error(&format!("sandbox resume failed: {e}"), true).await;
                    is_locked = true;
                }
            }
        }

        {
            let mut state = self.state.lock().await;
            state.session_id = Some(session_id.clone());
            state.is_locked = is_locked;
            state.agent_session_id = session.agent_session_id.clone();
        }

        self.emit_session_ready(&session, is_locked).await;

        let log = self.deps.event_logs.get_or_create(&session_id);
        if let Some(last_seq) = last_seq {
            for envelope in log.replay_since(last_seq) {
                if envelope.event_type == "session_ready" {
                    continue;
                }
                self.send(&envelope.event_type, envelope.data, Some(envelope.seq));
            }
        }
    }

    // ── update_config ────────────────────────────────────────────────

    pub async fn update_config(&self, config: SessionConfigRequest) {
        let (session_id, query_in_flight) = {
            let state = self.state.lock().await;
            (state.session_id.clone(), state.query_in_flight)
        };
        let Some(session_id) = session_id else {
            self.emit_error("no session bound to this connection", true).await;
            return;
        };
        if query_in_flight {
            self.emit_error("cannot update_config while a query is in flight", true).await;
            return;
        }

        let working_dir = self.resolve_working_dir(&config.working_dir);
        let new_sandbox_mode = config.sandbox_mode.unwrap_or(false);
        let update = self.deps.store.update_session_fields(&session_id, |s| {
            if !working_dir.is_empty() {
                s.working_dir = working_dir.clone();
            }
            s.personality = config.personality_tag().or_else(|| s.personality.clone());
            s.sandbox_mode = new_sandbox_mode;
            if let Some(mt) = config.sandbox_mount_type {
                s.sandbox_mount_type = mt;
            }
            if let Some(settings) = config.sandbox_settings.clone() {
                s.sandbox_settings = settings;
            }
            if let Some(nm) = config.sandbox_network_mode {
                s.sandbox_network_mode = nm;
            }
            if let Some(name) = config.session_name.clone() {
                s.name = Some(name);
            }
        });
        let session = match update {
            Ok(s) => s,
            Err(e) => {
                self.emit_error(&format!("failed to update session: {e}"), true).await;
                return;
            }
        };

        if !new_sandbox_mode {
            self.deps.sandbox.close(&session_id);
        }

        {
            let mut state = self.state.lock().await;
            state.config = Some(config);
        }

        self.emit_session_ready(&session, session.is_locked).await;
    }

    // ── permission_response ──────────────────────────────────────────

    pub async fn permission_response(
        &self,
        request_id: Uuid,
        allowed: bool,
        deny_message: Option<String>,
    ) {
        self.arbiter.resolve(&request_id, allowed, deny_message);
    }

    // ── ping / cancel ────────────────────────────────────────────────

    pub fn ping(&self) {
        self.emit_pong();
    }

    pub async fn cancel(&self) {
        let in_flight = { self.state.lock().await.query_in_flight };
        if !in_flight {
            self.emit_error("no query in flight to cancel", true).await;
            return;
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        let process = self.current_process.lock().clone();
        if let Some(process) = process {
            let _ = process.interrupt().await;
        }
        self.emit("cancelled", serde_json::to_value(CancelledData {
            message: "Query cancelled by client".into(),
        }).unwrap()).await;
    }

    /// Connection-close teardown (spec.md §4.1 "Connection close"): every
    /// PendingPermission resolves deny-with-interrupt, an in-flight query
    /// is cancelled, and — if the run had not merely been cancelled by the
    /// client but had actually failed — the sandbox is torn down here
    /// rather than left for the idle reaper.
    pub async fn on_close(&self) {
        self.arbiter.resolve_all_on_close();
        let in_flight = { self.state.lock().await.query_in_flight };
        if in_flight {
            self.cancel_requested.store(true, Ordering::SeqCst);
            if let Some(process) = self.current_process.lock().clone() {
                let _ = process.interrupt().await;
            }
        }
    }

    // ── query ─────────────────────────────────────────────────────────

    /// Entry point for `query{prompt}`. Spawns the actual pipeline so the
    /// caller's recv loop stays responsive to `cancel`/`permission_response`
    /// while it streams (spec.md §4.1, grounded on the teacher's
    /// `run_turn`).
    pub fn query(self: &Arc<Self>, prompt: String) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run_query(prompt).await;
        });
    }

    async fn run_query(self: Arc<Self>, prompt: String) {
        let (session_id, config) = {
            let mut state = self.state.lock().await;
            if state.session_id.is_none() {
                drop(state);
                self.emit_error("no session bound to this connection", true).await;
                return;
            }
            if state.is_locked {
                drop(state);
                self.emit_error("session is locked", true).await;
                return;
            }
            if state.query_in_flight {
                drop(state);
                self.emit_error("a query is already in flight", true).await;
                return;
            }
            state.query_in_flight = true;
            (
                state.session_id.clone().unwrap(),
                state.config.clone().unwrap_or_default(),
            )
        };
        self.cancel_requested.store(false, Ordering::SeqCst);

        let outcome = self.run_query_inner(&session_id, &config, prompt).await;

        {
            let mut state = self.state.lock().await;
            state.query_in_flight = false;
        }
        *self.current_process.lock() = None;

        if let Err(e) = outcome {
            self.emit_error(&format!("query failed: {e}"), true).await;
            let _ = self.deps.store.lock_session(&session_id);
        }
    }

    async fn run_query_inner(
        &self,
        session_id: &str,
        config: &SessionConfigRequest,
        prompt: String,
    ) -> Result<()> {
        // 1. persist the user turn.
        self.deps.store.insert_conversation_with_blocks(NewConversation {
            session_id: session_id.to_string(),
            role: ConversationRole::User,
            timestamp: Utc::now(),
            personality: config.personality_tag(),
            medium: None,
            user_id: config.user_id.clone(),
            metrics: ConversationMetrics::default(),
            prompt_summary: None,
            blocks: vec![ConversationBlock {
                ordinal: 0,
                kind: BlockKind::Text,
                text: Some(prompt.clone()),
                tool_use_id: None,
                tool_name: None,
                tool_input: None,
                is_error: None,
            }],
        })?;

        // 2. ambient findings: no sharable-findings table in this build's
        // data model (spec.md §3 names none); surfacing is always a no-op,
        // which is within contract ("failure to surface is non-fatal").
        let effective_prompt = prompt;

        // 3. effective system prompt / working_dir substitution.
        let working_dir = self.resolve_working_dir(&config.working_dir);
        let system_prompt = config.personality_tag();

        // 4. choose execution path.
        let sandbox_mode = config.sandbox_mode.unwrap_or(false);
        let resume_session_id = {
            let state = self.state.lock().await;
            state.agent_session_id.clone()
        };

        let run_config = run_config_from(config, &working_dir);
        if sandbox_mode {
            match self.deps.sandbox.ensure(session_id, run_config.clone()) {
                Ok(SandboxOutcome::Active(entry)) => entry.begin_query(),
                Ok(SandboxOutcome::Locked) => {
                    return Err(Error::Locked(format!("session {session_id} is locked")));
                }
                Err(e) => return Err(e),
            }
        }

        let backend_working_dir = PathBuf::from(&working_dir);
        let spawn_result = AgentProcess::spawn(
            &self.deps.agent_backend,
            &backend_working_dir,
            &self.compose_prompt(&effective_prompt, system_prompt.as_deref()),
            resume_session_id.as_deref(),
        )
        .await;

        let process = match spawn_result {
            Ok(p) => Arc::new(p),
            Err(e) => {
                if sandbox_mode {
                    if let Some(entry) = self.deps.sandbox.get(session_id) {
                        entry.end_query();
                    }
                }
                return Err(e);
            }
        };
        *self.current_process.lock() = Some(process.clone());

        let result = self.drive_turn(session_id, config, &process).await;

        if sandbox_mode {
            if let Some(entry) = self.deps.sandbox.get(session_id) {
                entry.end_query();
            }
        }

        result
    }

    /// Steps 5–8 of spec.md §4.1: iterate typed events, deduplicate
    /// streamed vs. terminal blocks, emit to the client, and on `done`
    /// persist the assistant turn (unless cancelled).
    async fn drive_turn(
        &self,
        session_id: &str,
        config: &SessionConfigRequest,
        process: &Arc<AgentProcess>,
    ) -> Result<()> {
        let started_at = std::time::Instant::now();
        let mut ttft_ms: Option<u64> = None;
        let mut text_buf = String::new();
        let mut thinking_buf = String::new();
        let mut streamed_text = false;
        let mut streamed_thinking = false;
        let mut tool_count: u32 = 0;
        let mut blocks: Vec<ConversationBlock> = Vec::new();
        let mut tool_names: Vec<(String, String)> = Vec::new(); // (tool_use_id, name)
        let mut cancelled_seen = false;
        let mut error_seen: Option<String> = None;

        loop {
            let event = match process.next_event().await {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(e) => {
                    error_seen = Some(e.to_string());
                    break;
                }
            };

            let cancel_requested = self.cancel_requested.load(Ordering::SeqCst);
            if cancel_requested {
                cancelled_seen = true;
                if event.is_terminal() {
                    // spec.md §4.1/§5: the client gets at most one further
                    // event after `cancelled` — emit that `done` here
                    // before breaking. Persistence and post-completion side
                    // effects are still skipped below (`cancelled_seen`).
                    let response_ms = started_at.elapsed().as_millis() as u64;
                    self.emit(
                        "done",
                        serde_json::to_value(DoneData {
                            response_text: text_buf.clone(),
                            tool_count,
                            timings: Timings {
                                time_to_first_token: ttft_ms,
                                response_time: response_ms,
                            },
                            structured_output: None,
                        })
                        .unwrap(),
                    )
                    .await;
                    break;
                }
                continue;
            }

            match event {
                AgentEvent::TextDelta { text } => {
                    if ttft_ms.is_none() && !text.is_empty() {
                        ttft_ms = Some(started_at.elapsed().as_millis() as u64);
                    }
                    streamed_text = true;
                    text_buf.push_str(&text);
                    self.emit("text_delta", serde_json::json!({ "text": text })).await;
                }
                AgentEvent::ThinkingDelta { text } => {
                    if ttft_ms.is_none() && !text.is_empty() {
                        ttft_ms = Some(started_at.elapsed().as_millis() as u64);
                    }
                    streamed_thinking = true;
                    thinking_buf.push_str(&text);
                    self.emit("thinking_delta", serde_json::json!({ "text": text })).await;
                }
                AgentEvent::Text { text } => {
                    if streamed_text {
                        // Suppressed: already forwarded/accumulated as deltas
                        // (spec.md §4.1 streaming-vs-batch dedup rule).
                        continue;
                    }
                    if ttft_ms.is_none() && !text.is_empty() {
                        ttft_ms = Some(started_at.elapsed().as_millis() as u64);
                    }
                    text_buf.push_str(&text);
                    self.emit("text", serde_json::json!({ "text": text })).await;
                }
                AgentEvent::Thinking { text } => {
                    if streamed_thinking {
                        continue;
                    }
                    if ttft_ms.is_none() && !text.is_empty() {
                        ttft_ms = Some(started_at.elapsed().as_millis() as u64);
                    }
                    thinking_buf.push_str(&text);
                    self.emit("thinking", serde_json::json!({ "text": text })).await;
                }
                AgentEvent::ToolUse { id, name, input } => {
                    tool_count += 1;
                    tool_names.push((id.clone(), name.clone()));
                    blocks.push(ConversationBlock {
                        ordinal: 0,
                        kind: BlockKind::ToolUse,
                        text: None,
                        tool_use_id: Some(id.clone()),
                        tool_name: Some(name.clone()),
                        tool_input: Some(input.clone()),
                        is_error: None,
                    });
                    self.emit(
                        "tool_use",
                        serde_json::to_value(ToolUseData { id, name, input }).unwrap(),
                    )
                    .await;
                }
                AgentEvent::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let name = tool_names
                        .iter()
                        .find(|(id, _)| *id == tool_use_id)
                        .map(|(_, name)| name.clone())
                        .unwrap_or_default();
                    blocks.push(ConversationBlock {
                        ordinal: 0,
                        kind: BlockKind::ToolResult,
                        text: None,
                        tool_use_id: Some(tool_use_id.clone()),
                        tool_name: Some(name.clone()),
                        tool_input: Some(content.clone()),
                        is_error: Some(is_error),
                    });
                    self.emit(
                        "tool_result",
                        serde_json::to_value(ToolResultData {
                            tool_use_id,
                            name,
                            output: content,
                            is_error,
                        })
                        .unwrap(),
                    )
                    .await;
                }
                AgentEvent::PermissionRequest {
                    request_id,
                    tool_name,
                    tool_input,
                } => {
                    self.handle_permission_request(process, config, request_id, tool_name, tool_input)
                        .await;
                }
                AgentEvent::SessionId { agent_session_id } => {
                    self.record_agent_session_id(session_id, agent_session_id, config)
                        .await;
                }
                AgentEvent::Done => break,
                AgentEvent::Error { message } => {
                    error_seen = Some(message);
                    break;
                }
            }
        }

        if let Some(message) = error_seen {
            self.emit(
                "error",
                serde_json::to_value(ErrorData {
                    message: message.clone(),
                    recoverable: false,
                })
                .unwrap(),
            )
            .await;
            if !cancelled_seen {
                return Err(Error::Transport(message));
            }
            return Ok(());
        }

        if cancelled_seen {
            // spec.md §4.1: no persistence, no post-completion side effects
            // for a cancelled query. `cancelled` was already emitted by the
            // `cancel` handler.
            return Ok(());
        }

        let response_ms = started_at.elapsed().as_millis() as u64;
        let timings = Timings {
            time_to_first_token: ttft_ms,
            response_time: response_ms,
        };

        self.emit(
            "done",
            serde_json::to_value(DoneData {
                response_text: text_buf.clone(),
                tool_count,
                timings,
                structured_output: None,
            })
            .unwrap(),
        )
        .await;

        let stimulus_text = text_buf.clone();

        if !text_buf.is_empty() || !thinking_buf.is_empty() || !blocks.is_empty() {
            // Thinking precedes final text (spec.md §4.1 dedup rule).
            let mut ordered_blocks = Vec::new();
            if !thinking_buf.is_empty() {
                ordered_blocks.push(ConversationBlock {
                    ordinal: 0,
                    kind: BlockKind::Thinking,
                    text: Some(thinking_buf),
                    tool_use_id: None,
                    tool_name: None,
                    tool_input: None,
                    is_error: None,
                });
            }
            if !text_buf.is_empty() {
                ordered_blocks.push(ConversationBlock {
                    ordinal: 0,
                    kind: BlockKind::Text,
                    text: Some(text_buf.clone()),
                    tool_use_id: None,
                    tool_name: None,
                    tool_input: None,
                    is_error: None,
                });
            }
            ordered_blocks.extend(blocks);

            self.deps.store.insert_conversation_with_blocks(NewConversation {
                session_id: session_id.to_string(),
                role: ConversationRole::Assistant,
                timestamp: Utc::now(),
                personality: config.personality_tag(),
                medium: None,
                user_id: None,
                metrics: ConversationMetrics {
                    ttft_ms,
                    response_ms: Some(response_ms),
                    thinking_ms: None,
                    tool_uses: tool_count,
                    tool_names: tool_names.into_iter().map(|(_, n)| n).collect(),
                },
                prompt_summary: Some(text_buf),
                blocks: ordered_blocks,
            })?;
        }

        // 8. Post-completion background tasks (spec.md §4.1 step 8,
        // skipped entirely above for a cancelled query). Cite-tracking
        // and ambient exploration have no store tables in spec.md §3 and
        // stay out of this build's scope; C7 stimulus buffering does have
        // a concrete home (`rl_appraisal::EmotionManager`) and is wired
        // here via the sink the gateway bin injects at startup. Buffering
        // is in-memory and infallible, but the call itself is still
        // treated as fire-and-forget per spec: a panic-free no-op when
        // unwired, never allowed to fail the turn.
        if !stimulus_text.is_empty() {
            if let Some(sink) = &self.deps.stimulus_sink {
                sink(
                    Some(session_id.to_string()),
                    "assistant_turn".to_string(),
                    stimulus_text,
                    serde_json::json!({ "tool_count": tool_count }),
                );
            }
        }

        Ok(())
    }

    async fn handle_permission_request(
        &self,
        process: &Arc<AgentProcess>,
        config: &SessionConfigRequest,
        request_id: String,
        tool_name: String,
        tool_input: serde_json::Value,
    ) {
        if config.auto_approve.unwrap_or(false) {
            let _ = process
                .send_permission_response(&request_id, true, Some(tool_input), None)
                .await;
            return;
        }

        let (id, info, rx) = self.arbiter.register(tool_name, tool_input);
        self.emit(
            "permission_request",
            serde_json::to_value(PermissionRequestData {
                request_id: id,
                tool_name: info.tool_name,
                tool_input: info.tool_input,
            })
            .unwrap(),
        )
        .await;

        let resolution = match tokio::time::timeout(self.arbiter.timeout(), rx).await {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => PermissionResolution::Deny {
                message: "Permission request channel closed".into(),
                interrupt: true,
            },
            Err(_) => {
                self.arbiter.resolve_timeout(&id);
                PermissionResolution::Deny {
                    message: "Permission request timed out".into(),
                    interrupt: true,
                }
            }
        };

        match resolution {
            PermissionResolution::Allow { tool_input } => {
                let _ = process
                    .send_permission_response(&request_id, true, Some(tool_input), None)
                    .await;
            }
            PermissionResolution::Deny { message, interrupt } => {
                let _ = process
                    .send_permission_response(&request_id, false, None, Some(message))
                    .await;
                if interrupt {
                    self.cancel_requested.store(true, Ordering::SeqCst);
                    let _ = process.interrupt().await;
                }
            }
        }
    }

    async fn record_agent_session_id(
        &self,
        session_id: &str,
        agent_session_id: String,
        config: &SessionConfigRequest,
    ) {
        {
            let mut state = self.state.lock().await;
            state.agent_session_id = Some(agent_session_id.clone());
        }
        if config.sandbox_mode.unwrap_or(false) {
            let _ = self
                .deps
                .sandbox
                .record_agent_session_id(session_id, agent_session_id);
        } else {
            let _ = self
                .deps
                .store
                .update_session_fields(session_id, |s| s.agent_session_id = Some(agent_session_id));
        }
    }

    fn resolve_working_dir(&self, working_dir: &str) -> String {
        if working_dir.is_empty() || is_virtual_working_dir(working_dir) {
            self.deps.fallback_working_dir.to_string_lossy().into_owned()
        } else {
            working_dir.to_string()
        }
    }

    fn compose_prompt(&self, prompt: &str, system_prompt: Option<&str>) -> String {
        match system_prompt {
            Some(sp) if !sp.is_empty() => format!("{sp}\n\n{prompt}"),
            _ => prompt.to_string(),
        }
    }

    async fn emit_session_ready(&self, session: &Session, is_locked: bool) {
        self.emit(
            "session_ready",
            serde_json::to_value(SessionReadyData {
                session_id: session.id.clone(),
                config: serde_json::json!({
                    "working_dir": session.working_dir,
                    "personality": session.personality,
                    "sandbox_mode": session.sandbox_mode,
                }),
                is_locked,
                name: session.name.clone(),
            })
            .unwrap(),
        )
        .await;
    }

    async fn emit_error(&self, message: &str, recoverable: bool) {
        self.emit(
            "error",
            serde_json::to_value(ErrorData {
                message: message.to_string(),
                recoverable,
            })
            .unwrap(),
        )
        .await;
    }
}

fn run_config_from(config: &SessionConfigRequest, working_dir: &str) -> RunConfig {
    RunConfig {
        working_dir: working_dir.to_string(),
        system_prompt: config.personality_tag(),
        model: config.model.clone(),
        thinking_budget: config.thinking_budget,
        allowed_tools: config.allowed_tools.clone().unwrap_or_default(),
        mount_type: config
            .sandbox_mount_type
            .unwrap_or(rl_store::types::SandboxMountType::Direct),
        network_mode: config
            .sandbox_network_mode
            .unwrap_or(rl_store::types::SandboxNetworkMode::Bridge),
        plugins: config.plugins.clone().unwrap_or_default(),
        env: config.env.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    fn test_deps(agent_backend: AgentBackendConfig) -> (Arc<BrokerDeps>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StoreGateway::open(dir.path()).unwrap());
        let sandbox = Arc::new(SandboxSupervisor::new(store.clone(), StdDuration::from_secs(1800)));
        let deps = Arc::new(BrokerDeps {
            store,
            sandbox,
            event_logs: Arc::new(EventLogRegistry::new(500)),
            agent_backend,
            fallback_working_dir: dir.path().join("fallback"),
            permission_timeout: StdDuration::from_secs(300),
            stimulus_sink: None,
        });
        (deps, dir)
    }

    fn sh_backend(script: &str) -> AgentBackendConfig {
        AgentBackendConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.to_string()],
            ..Default::default()
        }
    }

    async fn drain_one(rx: &mut mpsc::UnboundedReceiver<WireMessage>) -> WireMessage {
        rx.recv().await.expect("channel closed without a message")
    }

    #[tokio::test]
    async fn new_session_emits_session_ready_and_persists() {
        let (deps, _dir) = test_deps(sh_backend("true"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(deps.clone(), tx);

        conn.handle(InboundMessage::NewSession {
            config: SessionConfigRequest {
                working_dir: "/tmp/project".into(),
                ..Default::default()
            },
        })
        .await;

        let msg = drain_one(&mut rx).await;
        assert_eq!(msg.kind, "session_ready");
        let session_id = msg.data.get("session_id").unwrap().as_str().unwrap().to_string();
        assert!(deps.store.load_session(&session_id).is_ok());
    }

    #[tokio::test]
    async fn new_session_rejects_empty_working_dir_without_mount_none() {
        let (deps, _dir) = test_deps(sh_backend("true"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(deps, tx);

        conn.handle(InboundMessage::NewSession {
            config: SessionConfigRequest::default(),
        })
        .await;

        let msg = drain_one(&mut rx).await;
        assert_eq!(msg.kind, "error");
    }

    #[tokio::test]
    async fn ping_replies_pong_without_seq() {
        let (deps, _dir) = test_deps(sh_backend("true"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(deps, tx);

        conn.handle(InboundMessage::Ping).await;

        let msg = drain_one(&mut rx).await;
        assert_eq!(msg.kind, "pong");
        assert!(msg.seq.is_none());
    }

    #[tokio::test]
    async fn cancel_without_query_in_flight_errors() {
        let (deps, _dir) = test_deps(sh_backend("true"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(deps, tx);

        conn.handle(InboundMessage::Cancel).await;

        let msg = drain_one(&mut rx).await;
        assert_eq!(msg.kind, "error");
    }

    #[tokio::test]
    async fn query_streams_events_and_persists_assistant_turn() {
        let script = "read -r _p; printf '%s\\n' \
            '{\"type\":\"text\",\"text\":\"Hello there\"}' \
            '{\"type\":\"session_id\",\"agent_session_id\":\"agent-abc\"}' \
            '{\"type\":\"done\"}'";
        let (deps, _dir) = test_deps(sh_backend(script));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(deps.clone(), tx);

        conn.handle(InboundMessage::NewSession {
            config: SessionConfigRequest {
                working_dir: "/tmp/project".into(),
                ..Default::default()
            },
        })
        .await;
        let ready = drain_one(&mut rx).await;
        assert_eq!(ready.kind, "session_ready");
        let session_id = ready
            .data
            .get("session_id")
            .unwrap()
            .as_str()
            .unwrap()
            .to_string();

        conn.handle(InboundMessage::Query {
            prompt: "hi".into(),
        })
        .await;

        let mut saw_done = false;
        for _ in 0..10 {
            let msg = drain_one(&mut rx).await;
            if msg.kind == "done" {
                assert_eq!(msg.data.get("response_text").unwrap(), "Hello there");
                saw_done = true;
                break;
            }
        }
        assert!(saw_done, "expected a done event");

        let conversations = deps.store.list_conversations(&session_id);
        assert_eq!(conversations.len(), 2); // user turn + assistant turn
        let assistant = conversations
            .iter()
            .find(|c| c.role == ConversationRole::Assistant)
            .unwrap();
        assert_eq!(assistant.blocks.len(), 1);
        assert_eq!(assistant.blocks[0].text.as_deref(), Some("Hello there"));

        let session = deps.store.load_session(&session_id).unwrap();
        assert_eq!(session.agent_session_id.as_deref(), Some("agent-abc"));
    }

    #[tokio::test]
    async fn completed_query_buffers_a_stimulus_via_the_injected_sink() {
        let script = "read -r _p; printf '%s\\n' \
            '{\"type\":\"text\",\"text\":\"Hello there\"}' \
            '{\"type\":\"done\"}'";
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StoreGateway::open(dir.path()).unwrap());
        let sandbox = Arc::new(SandboxSupervisor::new(store.clone(), StdDuration::from_secs(1800)));
        let captured: Arc<SyncMutex<Vec<(Option<String>, String, String)>>> =
            Arc::new(SyncMutex::new(Vec::new()));
        let sink_captured = captured.clone();
        let deps = Arc::new(BrokerDeps {
            store,
            sandbox,
            event_logs: Arc::new(EventLogRegistry::new(500)),
            agent_backend: sh_backend(script),
            fallback_working_dir: dir.path().join("fallback"),
            permission_timeout: StdDuration::from_secs(300),
            stimulus_sink: Some(Arc::new(move |session_id, stimulus_type, payload, _ctx| {
                sink_captured.lock().push((session_id, stimulus_type, payload));
            })),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(deps, tx);

        conn.handle(InboundMessage::NewSession {
            config: SessionConfigRequest {
                working_dir: "/tmp/project".into(),
                ..Default::default()
            },
        })
        .await;
        let ready = drain_one(&mut rx).await;
        let session_id = ready.data.get("session_id").unwrap().as_str().unwrap().to_string();

        conn.handle(InboundMessage::Query { prompt: "hi".into() }).await;
        for _ in 0..10 {
            if drain_one(&mut rx).await.kind == "done" {
                break;
            }
        }

        let calls = captured.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.as_deref(), Some(session_id.as_str()));
        assert_eq!(calls[0].1, "assistant_turn");
        assert_eq!(calls[0].2, "Hello there");
    }

    #[test]
    fn resolve_working_dir_substitutes_virtual_scheme() {
        let (deps, _dir) = {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(StoreGateway::open(dir.path()).unwrap());
            let sandbox =
                Arc::new(SandboxSupervisor::new(store.clone(), StdDuration::from_secs(1800)));
            (
                Arc::new(BrokerDeps {
                    store,
                    sandbox,
                    event_logs: Arc::new(EventLogRegistry::new(500)),
                    agent_backend: AgentBackendConfig::default(),
                    fallback_working_dir: dir.path().join("fallback"),
                    permission_timeout: StdDuration::from_secs(300),
                    stimulus_sink: None,
                }),
                dir,
            )
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(deps.clone(), tx);
        assert_eq!(
            conn.resolve_working_dir("chat://session-1"),
            deps.fallback_working_dir.to_string_lossy().into_owned()
        );
        assert_eq!(conn.resolve_working_dir("/real/path"), "/real/path");
    }
}
