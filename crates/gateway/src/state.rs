use std::sync::Arc;

use rl_appraisal::{AppraisalRegistry, OccProfile};
use rl_broker::Broker;
use rl_consolidation::ConsolidationScheduler;
use rl_domain::config::Config;
use rl_providers::registry::ProviderRegistry;
use rl_queue::WorkQueue;
use rl_sandbox::SandboxSupervisor;
use rl_store::StoreGateway;
use rl_swarm::SwarmOrchestrator;

/// Shared application state passed to every API handler (spec.md §2's
/// components, grouped the way the teacher's `AppState` groups by
/// concern).
///
/// Fields are grouped by concern:
/// - **Core** — config, store, LLM provider registry
/// - **C2/C3** — agent transport launch config, sandbox supervisor
/// - **C4-C6** — the broker (owns the event log + permission arbiter
///   internally, spec.md §4.2/§4.4)
/// - **C7/C8** — per-scope appraisal/decay managers
/// - **C9** — swarm orchestrator
/// - **C10** — work queue
/// - **C11** — consolidation scheduler
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<StoreGateway>,
    pub llm: Arc<ProviderRegistry>,

    // ── C3 Sandbox Supervisor ────────────────────────────────────────
    pub sandbox: Arc<SandboxSupervisor>,

    // ── C4-C6 Session Broker (owns Event Log + Permission Arbiter) ───
    pub broker: Arc<Broker>,

    // ── C7/C8 Appraisal / Decay Engine ───────────────────────────────
    pub appraisal: Arc<AppraisalRegistry>,

    // ── C9 Swarm Orchestrator ─────────────────────────────────────────
    pub swarm: Arc<SwarmOrchestrator>,

    // ── C10 Work Queue ────────────────────────────────────────────────
    pub queue: Arc<WorkQueue>,

    // ── C11 Consolidation Scheduler ──────────────────────────────────
    pub consolidation: Arc<ConsolidationScheduler>,

    // ── Admin auth (startup-computed, spec.md §1 non-goal: "does not
    // provide authentication" — this gates only the one admin-only route
    // the daemon layers on top (`/v1/consolidation/enqueue`), not the
    // client wire protocol or any other component's own surface) ──
    pub admin_token: Option<String>,
}

/// Default OCC profile used for every appraisal scope. Spec.md §4.7 does
/// not name a per-session personality-to-profile mapping (personality
/// composition is an explicit non-goal, spec.md §1) so every scope shares
/// one profile.
pub fn default_occ_profile() -> OccProfile {
    OccProfile::default()
}
