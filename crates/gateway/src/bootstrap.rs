//! AppState construction and background-task spawning extracted from
//! `main.rs`, the same split the teacher uses so `serve` and one-shot CLI
//! commands (`doctor`) can boot the full runtime without necessarily
//! spawning the tick loops.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rl_appraisal::{AppraisalRegistry, DecayContext, StimulusEntry, TimeOfDay};
use rl_broker::Broker;
use rl_consolidation::{ConsolidationScheduler, NoopWorker};
use rl_domain::config::{Config, ConfigSeverity};
use rl_providers::registry::ProviderRegistry;
use rl_queue::WorkQueue;
use rl_sandbox::SandboxSupervisor;
use rl_store::StoreGateway;
use rl_swarm::autonomous::AutonomousRunConfig;
use rl_swarm::orchestrator::OrchestratorConfig;
use rl_swarm::SwarmOrchestrator;
use rl_transport::config::AgentBackendConfig;

use crate::state::{default_occ_profile, AppState};

/// Validate config, initialize every subsystem in dependency order and
/// return a fully-wired [`AppState`]. Shared by `relayd serve` and
/// `relayd doctor` (the latter builds state but never calls
/// [`spawn_background_tasks`] or binds a socket).
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── C1 Store Gateway ─────────────────────────────────────────────
    let store = Arc::new(StoreGateway::open(std::path::Path::new(&config.data_dir))?);
    tracing::info!(data_dir = %config.data_dir, "store gateway ready");

    // ── Auxiliary LLM provider ───────────────────────────────────────
    let providers = ProviderRegistry::from_config(&config.llm)?;
    if providers.is_empty() {
        tracing::warn!("no auxiliary LLM provider configured; appraisal and swarm synthesis fall back to heuristics");
    } else {
        tracing::info!("auxiliary LLM provider ready");
    }
    let provider = providers.provider();
    let llm = Arc::new(providers);

    // ── C3 Sandbox Supervisor ────────────────────────────────────────
    let sandbox = Arc::new(SandboxSupervisor::new(
        store.clone(),
        Duration::from_secs(config.sandbox.idle_timeout_secs),
    ));
    tracing::info!(
        idle_timeout_secs = config.sandbox.idle_timeout_secs,
        "sandbox supervisor ready"
    );

    // ── C2 Agent Transport launch config ─────────────────────────────
    let agent_backend = agent_backend_config(&config);

    // ── C10 Work Queue ────────────────────────────────────────────────
    let queue = Arc::new(WorkQueue::new(store.clone(), config.queue.default_priority));
    tracing::info!("work queue ready");

    // ── C9 Swarm Orchestrator ─────────────────────────────────────────
    let fallback_working_dir = PathBuf::from(&config.data_dir);
    let swarm = SwarmOrchestrator::new(
        store.clone(),
        agent_backend.clone(),
        sandbox.clone(),
        queue.clone(),
        provider.clone(),
        OrchestratorConfig {
            summary_threshold_chars: config.appraisal.summary_threshold_chars,
            autonomous: AutonomousRunConfig {
                poll_interval: Duration::from_millis(config.swarm.autonomous_poll_ms),
                default_idle_timeout: Duration::from_secs(config.swarm.default_idle_timeout_secs),
                default_max_tasks: config.swarm.default_max_tasks,
            },
            default_working_dir: fallback_working_dir.clone(),
        },
    );
    tracing::info!("swarm orchestrator ready");

    // ── C7/C8 Appraisal / Decay Engine ───────────────────────────────
    let appraisal = Arc::new(AppraisalRegistry::new(
        store.clone(),
        provider.clone(),
        default_occ_profile(),
        config.appraisal.clone(),
    ));
    tracing::info!("appraisal registry ready");

    // ── C11 Consolidation Scheduler ───────────────────────────────────
    let consolidation = Arc::new(ConsolidationScheduler::new(
        store.clone(),
        Arc::new(NoopWorker),
        &config.consolidation,
    ));
    tracing::info!("consolidation scheduler ready");

    // ── C4-C6 Session Broker (Event Log + Permission Arbiter) ────────
    // spec.md §4.1 step 8 ("C7 buffer stimulus"): route each completed
    // turn's text into the session's `EmotionManager` without `rl-broker`
    // depending on `rl-appraisal` directly.
    let stimulus_appraisal = appraisal.clone();
    let stimulus_sink: rl_broker::StimulusSink = Arc::new(move |session_id, stimulus_type, payload, context| {
        let manager = stimulus_appraisal.get_or_create(session_id);
        manager.buffer_stimulus(StimulusEntry {
            stimulus_type,
            payload,
            context,
        });
    });
    let broker = Arc::new(Broker::new(
        store.clone(),
        sandbox.clone(),
        agent_backend,
        fallback_working_dir,
        config.broker.max_event_log,
        Duration::from_millis(config.broker.permission_timeout_ms),
        Some(stimulus_sink),
    ));
    tracing::info!("session broker ready");

    // ── Admin token ────────────────────────────────────────────────────
    let admin_token = std::env::var(&config.admin.token_env).ok();
    if admin_token.is_none() {
        tracing::warn!(
            env = %config.admin.token_env,
            "admin token env var unset; admin endpoints disabled"
        );
    }

    Ok(AppState {
        config,
        store,
        llm,
        sandbox,
        broker,
        appraisal,
        swarm,
        queue,
        consolidation,
        admin_token,
    })
}

/// Field-for-field mapping from the config-layer mirror section to
/// `rl_transport`'s real `AgentBackendConfig` (no dependency cycle lets
/// the two share a type, see `rl_domain::config::rl_transport_config`'s
/// doc comment).
pub fn agent_backend_config(config: &Config) -> AgentBackendConfig {
    let section = &config.agent_backend;
    AgentBackendConfig {
        command: section.command.clone(),
        args: section.args.clone(),
        env: section.env.clone(),
        resume_arg: section.resume_arg.clone(),
        startup_timeout_ms: section.startup_timeout_ms,
    }
}

/// Spawns the long-running tick loops (spec.md §4.3 sandbox reaper,
/// §4.7/§4.8 decay tick, §5 consolidation tick). Only called for the
/// `serve` path — `doctor` builds an `AppState` without ever starting
/// these loops.
pub fn spawn_background_tasks(state: &AppState) {
    // ── C3 sandbox idle reaper ────────────────────────────────────────
    {
        let sandbox = state.sandbox.clone();
        let tick = Duration::from_secs(state.config.sandbox.reaper_tick_secs.max(30));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                match sandbox.reap_idle() {
                    Ok(reaped) if !reaped.is_empty() => {
                        tracing::info!(count = reaped.len(), "reaped idle sandboxes");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "sandbox reaper tick failed"),
                }
            }
        });
    }

    // ── C8 appraisal decay tick ───────────────────────────────────────
    {
        let appraisal = state.appraisal.clone();
        let tick = Duration::from_secs(state.config.appraisal.decay_tick_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                appraisal.tick_decay(&current_decay_context());
            }
        });
    }

    // ── C11 consolidation tick ────────────────────────────────────────
    {
        let consolidation = state.consolidation.clone();
        let tick = Duration::from_secs(state.config.consolidation.poll_secs.max(60));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                match consolidation.tick().await {
                    Ok(Some(run)) => tracing::info!(run_id = %run.id, "consolidation run completed"),
                    Ok(None) => {}
                    Err(err) => tracing::warn!(error = %err, "consolidation tick failed"),
                }
            }
        });
    }
}

/// Derives a [`DecayContext`] from wall-clock time for the background
/// tick. No per-session presence/engagement signal is plumbed through
/// the tick loop (spec.md §4.8 leaves ambient decay context to the
/// caller), so this uses neutral defaults for everything the clock
/// can't tell us.
pub fn current_decay_context() -> DecayContext {
    use chrono::Timelike;
    let hour = chrono::Local::now().hour();
    let time_of_day = match hour {
        5..=11 => TimeOfDay::Morning,
        12..=17 => TimeOfDay::Afternoon,
        18..=22 => TimeOfDay::Evening,
        _ => TimeOfDay::Night,
    };
    DecayContext {
        is_user_present: false,
        is_user_engaged: false,
        recent_emotional_activity: 0.0,
        environmental_stress: 0.0,
        social_support: 0.5,
        time_of_day,
        personality_stability: 0.5,
    }
}
