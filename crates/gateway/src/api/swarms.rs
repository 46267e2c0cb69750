//! Swarm Orchestrator (C9) HTTP surface (spec.md §4.5, §6):
//! create/list/get/dag/start/resume/wait/agent/cancel/merge/scratchpad.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use rl_domain::error::Error;
use rl_store::types::{Swarm, SwarmAgent};
use rl_swarm::{build_swarm, critical_path, detect_cycle, levels, DagNode, SwarmSpec};

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SwarmWithAgents {
    #[serde(flatten)]
    pub swarm: Swarm,
    pub agents: Vec<SwarmAgent>,
}

/// `POST /v1/swarms` — validates and persists the swarm plus every
/// generated agent row (auto-added supervisor/synthesis/memory-steward
/// agents included), per `rl_swarm::build_swarm`.
pub async fn create_swarm(
    State(state): State<AppState>,
    Json(spec): Json<SwarmSpec>,
) -> ApiResult<Json<SwarmWithAgents>> {
    let (swarm, agents) = build_swarm(spec)?;
    let swarm = state.store.create_swarm(swarm)?;
    let mut persisted = Vec::with_capacity(agents.len());
    for agent in agents {
        persisted.push(state.store.create_swarm_agent(agent)?);
    }
    Ok(Json(SwarmWithAgents {
        swarm,
        agents: persisted,
    }))
}

pub async fn list_swarms(State(state): State<AppState>) -> Json<Vec<Swarm>> {
    Json(state.store.list_swarms())
}

pub async fn get_swarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SwarmWithAgents>> {
    let (swarm, agents) = state.store.load_swarm_with_agents(&id)?;
    Ok(Json(SwarmWithAgents { swarm, agents }))
}

#[derive(Debug, Serialize)]
pub struct DagView {
    pub levels: Vec<Vec<String>>,
    pub critical_path: Vec<String>,
}

/// `GET /v1/swarms/:id/dag` — level/critical-path derivations over the
/// agent dependency graph (spec.md §4.5 "DAG utilities").
pub async fn get_dag(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DagView>> {
    let (_swarm, agents) = state.store.load_swarm_with_agents(&id)?;
    let id_to_name: HashMap<&str, &str> =
        agents.iter().map(|a| (a.id.as_str(), a.name.as_str())).collect();
    let nodes: Vec<DagNode> = agents
        .iter()
        .map(|a| DagNode {
            name: a.name.clone(),
            depends_on: a
                .depends_on
                .iter()
                .filter_map(|d| id_to_name.get(d.agent_id.as_str()).map(|n| n.to_string()))
                .collect(),
        })
        .collect();
    if let Some(cycle) = detect_cycle(&nodes) {
        return Err(ApiError(Error::Conflict(format!(
            "dependency cycle detected: {}",
            cycle.join(" -> ")
        ))));
    }
    Ok(Json(DagView {
        levels: levels(&nodes),
        critical_path: critical_path(&nodes),
    }))
}

/// `POST /v1/swarms/:id/start` — spawns orchestration in the background
/// and returns immediately; poll `GET .../wait` or `GET .../:id` for
/// completion (spec.md §4.5 "start ... returns once every agent has
/// reached a terminal status" describes the orchestrator call itself,
/// not this HTTP wrapper around it).
pub async fn start_swarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<axum::http::StatusCode> {
    state.store.load_swarm_with_agents(&id)?;
    let orchestrator = state.swarm.clone();
    tokio::spawn(async move {
        if let Err(err) = orchestrator.start(&id).await {
            tracing::warn!(swarm_id = %id, error = %err, "swarm run failed");
        }
    });
    Ok(axum::http::StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    #[serde(default)]
    pub names: Vec<String>,
}

pub async fn resume_swarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResumeRequest>,
) -> ApiResult<axum::http::StatusCode> {
    state.store.load_swarm_with_agents(&id)?;
    let orchestrator = state.swarm.clone();
    tokio::spawn(async move {
        if let Err(err) = orchestrator.resume(&id, &req.names).await {
            tracing::warn!(swarm_id = %id, error = %err, "swarm resume failed");
        }
    });
    Ok(axum::http::StatusCode::ACCEPTED)
}

pub async fn cancel_swarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<axum::http::StatusCode> {
    state.swarm.cancel(&id)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// `GET /v1/swarms/:id/wait` — polls store state until every agent is
/// terminal or a bounded timeout elapses (a plain HTTP GET has no way to
/// subscribe to the orchestrator's internal completion broadcast).
pub async fn wait_swarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SwarmWithAgents>> {
    use rl_store::types::AgentStatus;

    const POLL_INTERVAL: Duration = Duration::from_millis(500);
    const MAX_WAIT: Duration = Duration::from_secs(30);

    let deadline = tokio::time::Instant::now() + MAX_WAIT;
    loop {
        let (swarm, agents) = state.store.load_swarm_with_agents(&id)?;
        let all_terminal = agents.iter().all(|a| {
            matches!(
                a.status,
                AgentStatus::Completed
                    | AgentStatus::Failed
                    | AgentStatus::Cancelled
                    | AgentStatus::Skipped
            )
        });
        if all_terminal || tokio::time::Instant::now() >= deadline {
            return Ok(Json(SwarmWithAgents { swarm, agents }));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult<Json<SwarmAgent>> {
    let agents = state.store.list_swarm_agents(&id);
    agents
        .into_iter()
        .find(|a| a.name == name)
        .map(Json)
        .ok_or_else(|| ApiError(Error::NotFound(format!("agent '{name}' in swarm {id}"))))
}

#[derive(Debug, Serialize)]
pub struct MergeView {
    pub synthesis_output: Option<String>,
    pub synthesis_summary: Option<String>,
}

/// `GET /v1/swarms/:id/merge` — the synthesis agent's output, already
/// computed and stored by the orchestrator when `auto_synthesize` is set
/// (spec.md §4.5's synthesis step, not re-derived here).
pub async fn get_merge(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MergeView>> {
    let swarm = state.store.load_swarm_with_agents(&id)?.0;
    Ok(Json(MergeView {
        synthesis_output: swarm.synthesis_output,
        synthesis_summary: swarm.synthesis_summary,
    }))
}

pub async fn list_scratchpad(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<HashMap<String, serde_json::Value>> {
    Json(state.store.swarm_scratchpad_list(&id))
}

pub async fn get_scratchpad_entry(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .swarm_scratchpad_get(&id, &key)
        .map(Json)
        .ok_or_else(|| ApiError(Error::NotFound(format!("scratchpad key '{key}' in swarm {id}"))))
}

pub async fn set_scratchpad_entry(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
    Json(value): Json<serde_json::Value>,
) -> ApiResult<axum::http::StatusCode> {
    state.store.swarm_scratchpad_set(&id, &key, value)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn delete_scratchpad_entry(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
) -> ApiResult<axum::http::StatusCode> {
    state.store.swarm_scratchpad_delete(&id, &key)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
