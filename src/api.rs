//! HTTP binding for the registry operations

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditTrace, RecordedAction};
use crate::delegation::{Registration, Scope, ScopeCheck, SpawnedAgent, Termination};
use crate::error::{AppError, Result};
use crate::models::{
    Agent, AuditQuery, AuditRecord, NewAgent, NewAuditEntry, Principal, RegistryStats,
    SpawnRequest,
};
use crate::AppState;

/// Build the registry router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/agents", get(list_agents))
        .route("/agents/register", post(register_agent))
        .route("/agents/:agent_id", get(get_agent))
        .route("/agents/:agent_id/spawn", post(spawn_agent))
        .route("/agents/:agent_id/scope/check", get(check_scope))
        .route("/agents/:agent_id/terminate", post(terminate_agent))
        .route("/audit/log", post(log_action))
        .route("/audit/trace/:agent_id", get(audit_trace))
        .route("/audit/query", get(query_audit))
        .route("/admin/reset", post(reset))
        .route("/admin/stats", get(stats))
        .with_state(state)
}

/// Request to register a root agent
#[derive(Debug, Deserialize)]
pub struct RegisterAgentBody {
    pub agent_name: String,
    pub agent_type: String,
    pub created_by: Principal,
    #[serde(default = "default_authority_source")]
    pub authority_source: String,
    #[serde(default)]
    pub scope: Scope,
}

fn default_authority_source() -> String {
    "human".to_string()
}

impl TryFrom<RegisterAgentBody> for NewAgent {
    type Error = AppError;

    fn try_from(body: RegisterAgentBody) -> Result<Self> {
        Ok(NewAgent {
            agent_name: non_empty(body.agent_name, "agent_name")?,
            agent_type: body.agent_type.parse().map_err(AppError::Validation)?,
            created_by: body.created_by,
            authority_source: body.authority_source.parse().map_err(AppError::Validation)?,
            scope: body.scope,
        })
    }
}

/// Request to spawn a sub-agent
#[derive(Debug, Deserialize)]
pub struct SpawnAgentBody {
    pub agent_name: String,
    pub agent_type: String,
    #[serde(default)]
    pub scope: Scope,
}

impl TryFrom<SpawnAgentBody> for SpawnRequest {
    type Error = AppError;

    fn try_from(body: SpawnAgentBody) -> Result<Self> {
        Ok(SpawnRequest {
            agent_name: non_empty(body.agent_name, "agent_name")?,
            agent_type: body.agent_type.parse().map_err(AppError::Validation)?,
            scope: body.scope,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TerminateBody {
    #[serde(default = "default_cascade")]
    pub cascade: bool,
}

fn default_cascade() -> bool {
    true
}

impl TerminateBody {
    /// An empty body means cascade; anything else must parse as JSON
    fn from_bytes(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(TerminateBody {
                cascade: default_cascade(),
            });
        }
        serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("Invalid terminate body: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListAgentsParams {
    #[serde(default)]
    pub include_terminated: bool,
}

#[derive(Debug, Deserialize)]
pub struct ScopeCheckParams {
    pub action: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    /// Unix timestamp in seconds
    pub since: Option<i64>,
    pub agent_id: Option<Uuid>,
    pub action: Option<String>,
    pub human_authority: Option<String>,
    pub limit: Option<i64>,
}

impl TryFrom<AuditQueryParams> for AuditQuery {
    type Error = AppError;

    fn try_from(params: AuditQueryParams) -> Result<Self> {
        let since = params
            .since
            .map(|secs| {
                DateTime::<Utc>::from_timestamp(secs, 0)
                    .ok_or_else(|| AppError::Validation(format!("Invalid since timestamp: {}", secs)))
            })
            .transpose()?;

        Ok(AuditQuery {
            since,
            agent_id: params.agent_id,
            action: params.action,
            human_authority: params.human_authority,
            limit: params.limit,
        })
    }
}

fn non_empty(value: String, field: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    Ok(value)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "database": "sqlite",
    }))
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<RegisterAgentBody>, JsonRejection>,
) -> Result<Json<Registration>> {
    let Json(body) = body?;
    let request = NewAgent::try_from(body)?;
    Ok(Json(state.lifecycle.register(request).await?))
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
    params: std::result::Result<Query<ListAgentsParams>, QueryRejection>,
) -> Result<Json<Vec<Agent>>> {
    let Query(params) = params?;
    Ok(Json(
        state.lifecycle.list_agents(params.include_terminated).await?,
    ))
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    agent_id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Agent>> {
    let Path(agent_id) = agent_id?;
    Ok(Json(state.lifecycle.get_agent(agent_id).await?))
}

async fn spawn_agent(
    State(state): State<Arc<AppState>>,
    parent_id: std::result::Result<Path<Uuid>, PathRejection>,
    body: std::result::Result<Json<SpawnAgentBody>, JsonRejection>,
) -> Result<Json<SpawnedAgent>> {
    let Path(parent_id) = parent_id?;
    let Json(body) = body?;
    let request = SpawnRequest::try_from(body)?;
    Ok(Json(state.lifecycle.spawn(parent_id, request).await?))
}

async fn check_scope(
    State(state): State<Arc<AppState>>,
    agent_id: std::result::Result<Path<Uuid>, PathRejection>,
    params: std::result::Result<Query<ScopeCheckParams>, QueryRejection>,
) -> Result<Json<ScopeCheck>> {
    let Path(agent_id) = agent_id?;
    let Query(params) = params?;
    Ok(Json(
        state.lifecycle.check_scope(agent_id, &params.action).await?,
    ))
}

async fn terminate_agent(
    State(state): State<Arc<AppState>>,
    agent_id: std::result::Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> Result<Json<Termination>> {
    let Path(agent_id) = agent_id?;
    let cascade = TerminateBody::from_bytes(&body)?.cascade;
    Ok(Json(state.lifecycle.terminate(agent_id, cascade).await?))
}

async fn log_action(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<NewAuditEntry>, JsonRejection>,
) -> Result<Json<RecordedAction>> {
    let Json(body) = body?;
    Ok(Json(state.audit.record(body).await?))
}

async fn audit_trace(
    State(state): State<Arc<AppState>>,
    agent_id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AuditTrace>> {
    let Path(agent_id) = agent_id?;
    Ok(Json(state.audit.trace(agent_id).await?))
}

async fn query_audit(
    State(state): State<Arc<AppState>>,
    params: std::result::Result<Query<AuditQueryParams>, QueryRejection>,
) -> Result<Json<Vec<AuditRecord>>> {
    let Query(params) = params?;
    let query = AuditQuery::try_from(params)?;
    Ok(Json(state.audit.query(&query).await?))
}

async fn reset(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>> {
    state.store.reset().await?;
    tracing::warn!("Registry reset; all agents, delegations and audit entries deleted");
    Ok(Json(serde_json::json!({
        "status": "reset",
        "message": "Database cleared",
    })))
}

async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<RegistryStats>> {
    Ok(Json(state.store.stats().await?))
}
