//! REST handlers for the control API.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::models::{Agent, AgentId, CategoryTag, Project, ProjectState};
use crate::services::audit_log::{AuditOperation, AuditQuery, AuditRecord};
use crate::services::cost_governor::CostSnapshot;
use crate::services::event_bus::Event;
use crate::services::orchestrator::StatusSnapshot;

use super::error::ApiError;
use super::AppState;

const MAX_LIST_LIMIT: u32 = 1_000;
const DEFAULT_LIST_LIMIT: u32 = 100;

fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.orchestrator.status().await)
}

// -- agents -------------------------------------------------------------------

pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<Agent>> {
    Json(state.orchestrator.list_agents().await)
}

pub async fn add_agent(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Agent>), ApiError> {
    let agent = state.orchestrator.add_agent().await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn pause_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.orchestrator.pause_agent(&AgentId::new(id)).await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn resume_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.orchestrator.resume_agent(&AgentId::new(id)).await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn stop_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.orchestrator.stop_agent(&AgentId::new(id)).await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn agent_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.orchestrator.agent_heartbeat(&AgentId::new(id)).await?;
    Ok(Json(json!({ "status": "ok" })))
}

// -- projects -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListProjectsQuery {
    state: Option<String>,
    limit: Option<u32>,
}

pub async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<ListProjectsQuery>,
) -> Result<Json<Vec<Project>>, ApiError> {
    let project_state = query
        .state
        .as_deref()
        .map(|s| {
            ProjectState::parse_str(s)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown project state {s:?}")))
        })
        .transpose()?;
    let projects = state
        .orchestrator
        .list_projects(project_state, clamp_limit(query.limit))
        .await?;
    Ok(Json(projects))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    title: String,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    category: Option<String>,
    #[serde(default)]
    pinned: bool,
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    if request.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    let category = request
        .category
        .as_deref()
        .map(|c| {
            CategoryTag::parse_str(c)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown category {c:?}")))
        })
        .transpose()?;
    let project = state
        .orchestrator
        .create_project(&request.title, request.acceptance_criteria, category, request.pinned)
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

// -- events -------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ProjectEventIngress {
    #[serde(rename = "type")]
    event_type: String,
    number: u64,
}

pub async fn ingress_project_event(
    State(state): State<AppState>,
    Json(request): Json<ProjectEventIngress>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .external_project_event(&request.event_type, request.number)
        .await
        .map_err(|err| match err {
            crate::domain::error::OrchestratorError::InvalidTransition { .. } => {
                ApiError::BadRequest(format!("unknown event type {:?}", request.event_type))
            }
            other => ApiError::Domain(other),
        })?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct ReplayQuery {
    since: u64,
}

pub async fn replay_events(
    State(state): State<AppState>,
    Query(query): Query<ReplayQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let events = state.bus.replay_since(query.since).await?;
    Ok(Json(events))
}

// -- audit & cost -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuditHistoryQuery {
    operation: Option<String>,
    agent_id: Option<String>,
    project: Option<u64>,
    limit: Option<u32>,
}

pub async fn audit_history(
    State(state): State<AppState>,
    Query(query): Query<AuditHistoryQuery>,
) -> Result<Json<Vec<AuditRecord>>, ApiError> {
    let operation = query
        .operation
        .as_deref()
        .map(|o| {
            AuditOperation::parse_str(o)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown operation {o:?}")))
        })
        .transpose()?;
    let records = state
        .audit_store
        .query(&AuditQuery {
            operation,
            agent_id: query.agent_id.map(AgentId::new),
            project_number: query.project,
            limit: clamp_limit(query.limit),
        })
        .await
        .map_err(crate::domain::error::OrchestratorError::from)?;
    Ok(Json(records))
}

pub async fn cost(State(state): State<AppState>) -> Json<CostSnapshot> {
    Json(state.cost_governor.snapshot().await)
}

// -- shutdown -----------------------------------------------------------------

pub async fn shutdown(State(state): State<AppState>) -> StatusCode {
    state.orchestrator.shutdown().await;
    // notify_one stores a permit in case the main loop is not parked yet.
    state.shutdown_signal.notify_one();
    StatusCode::ACCEPTED
}
