pub mod auth;
pub mod consolidation;
pub mod emotion;
pub mod error;
pub mod health;
pub mod notifications;
pub mod sessions;
pub mod swarms;
pub mod tasks;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router (spec.md §6's HTTP/WebSocket surface).
///
/// Routes are split into **public** (the client wire protocol and health
/// probe) and **admin** (gated behind the `admin_token` bearer middleware
/// — consolidation enqueue and notification acknowledgement are the only
/// surfaces that warrant it; everything else is read/write access to a
/// component's own state, no different in trust level from the wire
/// protocol itself).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        // Health probe
        .route("/v1/health", get(health::health))
        // Client wire protocol (spec.md §6)
        .route("/v1/ws", get(crate::ws::client_ws))
        // Sessions (read-only; creation/resume is WebSocket-only)
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:id", get(sessions::get_session))
        .route("/v1/sessions/:id/history", get(sessions::get_history))
        // Swarm Orchestrator (C9)
        .route("/v1/swarms", post(swarms::create_swarm).get(swarms::list_swarms))
        .route("/v1/swarms/:id", get(swarms::get_swarm))
        .route("/v1/swarms/:id/dag", get(swarms::get_dag))
        .route("/v1/swarms/:id/start", post(swarms::start_swarm))
        .route("/v1/swarms/:id/resume", post(swarms::resume_swarm))
        .route("/v1/swarms/:id/cancel", post(swarms::cancel_swarm))
        .route("/v1/swarms/:id/wait", get(swarms::wait_swarm))
        .route("/v1/swarms/:id/merge", get(swarms::get_merge))
        .route("/v1/swarms/:id/agents/:name", get(swarms::get_agent))
        .route(
            "/v1/swarms/:id/scratchpad",
            get(swarms::list_scratchpad),
        )
        .route(
            "/v1/swarms/:id/scratchpad/:key",
            get(swarms::get_scratchpad_entry)
                .put(swarms::set_scratchpad_entry)
                .delete(swarms::delete_scratchpad_entry),
        )
        // Work Queue (C10)
        .route("/v1/tasks", post(tasks::create_task).get(tasks::list_tasks))
        .route("/v1/tasks/ready", get(tasks::list_ready))
        .route("/v1/tasks/claim", post(tasks::claim_next))
        .route(
            "/v1/tasks/:id",
            get(tasks::get_task)
                .patch(tasks::patch_task)
                .delete(tasks::delete_task),
        )
        .route("/v1/tasks/:id/claim", post(tasks::claim_by_id))
        .route("/v1/tasks/:id/release", post(tasks::release_task))
        // Appraisal / Decay Engine (C7/C8)
        .route("/v1/emotion/state", get(emotion::get_state))
        .route("/v1/emotion/history", get(emotion::get_history))
        .route("/v1/emotion/summary", get(emotion::get_summary))
        .route("/v1/emotion/profile", get(emotion::get_profile))
        .route(
            "/v1/emotion/profile/:emotion_type",
            get(emotion::get_emotion_profile),
        )
        .route("/v1/emotion/stimulus", post(emotion::post_stimulus))
        // Notifications
        .route(
            "/v1/notifications",
            post(notifications::create_notification).get(notifications::list_notifications),
        )
        .route(
            "/v1/notifications/:id/acknowledge",
            post(notifications::acknowledge_notification),
        )
        .route(
            "/v1/notifications/:id/fail",
            post(notifications::fail_notification),
        );

    let admin = Router::new()
        // Consolidation Scheduler (C11)
        .route(
            "/v1/consolidation/enqueue",
            post(consolidation::enqueue_consolidation),
        )
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_admin_token,
        ));

    public
        .merge(admin)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
