//! Data models for agents, delegation edges and audit entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delegation::Scope;

/// Opaque, order-preserving metadata attached to an audit entry
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A machine identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: Uuid,
    pub agent_name: String,
    pub agent_type: AgentKind,
    pub created_at: DateTime<Utc>,
    /// The human principal or parent agent that authorized this agent
    pub created_by: Principal,
    pub authority_source: AuthoritySource,
    pub scope: Scope,
    pub lifecycle_state: LifecycleState,
    pub terminated_at: Option<DateTime<Utc>>,
    pub credential_expires_at: DateTime<Utc>,
}

impl Agent {
    pub fn is_active(&self) -> bool {
        self.lifecycle_state == LifecycleState::Active
    }
}

/// Who authorized something: a human principal or another agent.
///
/// Decided when the record is written and stored structurally, so chain
/// walks never have to guess from the shape of an id string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Principal {
    Human(String),
    Agent(Uuid),
}

impl Principal {
    pub fn human(id: impl Into<String>) -> Self {
        Principal::Human(id.into())
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Principal::Human(_) => "human",
            Principal::Agent(_) => "agent",
        }
    }

    pub fn id_string(&self) -> String {
        match self {
            Principal::Human(id) => id.clone(),
            Principal::Agent(id) => id.to_string(),
        }
    }

    /// Rebuild a principal from its stored (kind, id) column pair
    pub fn from_parts(kind: &str, id: &str) -> Result<Self, String> {
        match kind {
            "human" => Ok(Principal::Human(id.to_string())),
            "agent" => Uuid::parse_str(id)
                .map(Principal::Agent)
                .map_err(|e| format!("Invalid agent principal {}: {}", id, e)),
            _ => Err(format!("Invalid principal kind: {}", kind)),
        }
    }
}

/// Type of agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    Autonomous,
    SemiAutonomous,
    Tool,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Autonomous => "autonomous",
            AgentKind::SemiAutonomous => "semi-autonomous",
            AgentKind::Tool => "tool",
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "autonomous" => Ok(AgentKind::Autonomous),
            "semi-autonomous" => Ok(AgentKind::SemiAutonomous),
            "tool" => Ok(AgentKind::Tool),
            _ => Err(format!("Invalid agent type: {}", s)),
        }
    }
}

/// Where an agent's authority comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthoritySource {
    Human,
    Delegated,
    Policy,
}

impl AuthoritySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthoritySource::Human => "human",
            AuthoritySource::Delegated => "delegated",
            AuthoritySource::Policy => "policy",
        }
    }
}

impl std::str::FromStr for AuthoritySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(AuthoritySource::Human),
            "delegated" => Ok(AuthoritySource::Delegated),
            "policy" => Ok(AuthoritySource::Policy),
            _ => Err(format!("Invalid authority source: {}", s)),
        }
    }
}

/// Lifecycle of an agent. `Suspended` is reserved; spawn and terminate never set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    Suspended,
    Terminated,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Active => "active",
            LifecycleState::Suspended => "suspended",
            LifecycleState::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LifecycleState::Active),
            "suspended" => Ok(LifecycleState::Suspended),
            "terminated" => Ok(LifecycleState::Terminated),
            _ => Err(format!("Invalid lifecycle state: {}", s)),
        }
    }
}

/// Directed edge recording one spawn event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub delegation_id: Uuid,
    pub parent_id: Uuid,
    pub child_id: Uuid,
    pub delegated_at: DateTime<Utc>,
    /// Parent's depth + 1; agents without an edge have depth 0
    pub delegation_depth: i64,
}

/// Immutable record of one agent action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub log_id: Uuid,
    pub agent_id: Uuid,
    pub action: String,
    pub resource: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Human at the root of the chain when the entry was written
    pub human_authority: Option<String>,
    pub success: bool,
    pub metadata: Option<Metadata>,
}

/// API credentials issued to an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub expires_at: DateTime<Utc>,
}

/// Request to register a root agent
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub agent_name: String,
    pub agent_type: AgentKind,
    pub created_by: Principal,
    pub authority_source: AuthoritySource,
    pub scope: Scope,
}

/// Request to spawn a sub-agent under a parent
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub agent_name: String,
    pub agent_type: AgentKind,
    pub scope: Scope,
}

/// Action to append to the audit log
#[derive(Debug, Clone, Deserialize)]
pub struct NewAuditEntry {
    pub agent_id: Uuid,
    pub action: String,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

fn default_success() -> bool {
    true
}

pub const DEFAULT_QUERY_LIMIT: i64 = 100;
pub const MAX_QUERY_LIMIT: i64 = 1000;

/// Forensic query over the audit log; all filters optional and ANDed
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub since: Option<DateTime<Utc>>,
    pub agent_id: Option<Uuid>,
    pub action: Option<String>,
    pub human_authority: Option<String>,
    pub limit: Option<i64>,
}

impl AuditQuery {
    pub fn clamped_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT)
    }
}

/// Audit entry joined with the acting agent's name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(flatten)]
    pub entry: AuditLogEntry,
    pub agent_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCounts {
    pub total: i64,
    pub active: i64,
    pub suspended: i64,
    pub terminated: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCounts {
    pub total: i64,
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub agents: AgentCounts,
    pub audit_logs: AuditCounts,
}

impl NewAuditEntry {
    pub fn new(agent_id: Uuid, action: impl Into<String>) -> Self {
        Self {
            agent_id,
            action: action.into(),
            resource: None,
            success: true,
            metadata: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}
