//! Agent lifecycle manager
//!
//! The manager handles:
//! - Root agent registration and credential issuance
//! - Delegated spawning with scope attenuation
//! - Cascading termination over the delegation forest
//! - Agent lookups and scope checks

use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

use super::chain::{self, ChainLink};
use super::scope::{attenuate, Scope};
use crate::error::{AppError, Result};
use crate::models::{
    Agent, AgentKind, AuthoritySource, Credentials, Delegation, LifecycleState, NewAgent, Principal,
    SpawnRequest,
};
use crate::store::{self, Store};

/// Default lifetime of issued API keys
pub const DEFAULT_CREDENTIAL_TTL_DAYS: i64 = 365;

const API_KEY_PREFIX: &str = "air_";
const API_KEY_LEN: usize = 43;

/// Result of registering a root agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub agent_id: Uuid,
    pub credentials: Credentials,
}

/// Result of spawning a sub-agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnedAgent {
    pub agent_id: Uuid,
    pub credentials: Credentials,
    pub delegation_chain: Vec<ChainLink>,
    pub delegation_depth: i64,
}

/// Agents newly terminated by one call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Termination {
    pub terminated: Vec<Uuid>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeCheck {
    pub agent_id: Uuid,
    pub action: String,
    pub allowed: bool,
    pub agent_scope: Scope,
}

/// Manager for agent registration, delegation and termination
#[derive(Clone)]
pub struct LifecycleManager {
    store: Store,
    credential_ttl: Duration,
}

impl LifecycleManager {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            credential_ttl: Duration::days(DEFAULT_CREDENTIAL_TTL_DAYS),
        }
    }

    pub fn with_credential_ttl(mut self, ttl: Duration) -> Self {
        self.credential_ttl = ttl;
        self
    }

    /// Register a root agent. No attenuation applies: the caller is the
    /// human or policy that grants the initial scope.
    pub async fn register(&self, request: NewAgent) -> Result<Registration> {
        let (agent, credentials) = self.issue(
            request.agent_name,
            request.agent_type,
            request.created_by,
            request.authority_source,
            request.scope,
        );

        let mut tx = self.store.begin_write().await?;
        store::insert_agent(&mut tx, &agent, &credentials.api_key).await?;
        tx.commit().await?;

        tracing::info!(
            agent_id = %agent.agent_id,
            name = %agent.agent_name,
            created_by = %agent.created_by.id_string(),
            authority_source = agent.authority_source.as_str(),
            scope = %agent.scope,
            "Registered agent"
        );

        Ok(Registration {
            agent_id: agent.agent_id,
            credentials,
        })
    }

    /// Spawn a sub-agent whose scope is a subset of its parent's.
    ///
    /// The parent read, attenuation check, depth computation and both inserts
    /// run in one write transaction.
    pub async fn spawn(&self, parent_id: Uuid, request: SpawnRequest) -> Result<SpawnedAgent> {
        let mut tx = self.store.begin_write().await?;

        let parent = store::fetch_agent(&mut tx, parent_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Parent agent {} not found", parent_id)))?;

        if !parent.is_active() {
            tracing::warn!(
                parent_id = %parent_id,
                state = %parent.lifecycle_state,
                "Refusing to spawn from inactive parent"
            );
            return Err(AppError::InactiveParent {
                agent_id: parent_id,
                state: parent.lifecycle_state,
            });
        }

        if let Err(e) = attenuate(&parent.scope, &request.scope) {
            tracing::warn!(parent_id = %parent_id, "{}", e);
            return Err(e);
        }

        let depth = chain::delegation_depth(&mut tx, parent_id).await? + 1;

        let (agent, credentials) = self.issue(
            request.agent_name,
            request.agent_type,
            Principal::Agent(parent_id),
            AuthoritySource::Delegated,
            request.scope,
        );
        let edge = Delegation {
            delegation_id: Uuid::new_v4(),
            parent_id,
            child_id: agent.agent_id,
            delegated_at: agent.created_at,
            delegation_depth: depth,
        };

        store::insert_agent(&mut tx, &agent, &credentials.api_key).await?;
        store::insert_delegation(&mut tx, &edge).await?;
        let delegation_chain = chain::resolve(&mut tx, agent.agent_id).await?;
        tx.commit().await?;

        tracing::info!(
            agent_id = %agent.agent_id,
            parent_id = %parent_id,
            depth,
            scope = %agent.scope,
            "Spawned delegated agent"
        );

        Ok(SpawnedAgent {
            agent_id: agent.agent_id,
            credentials,
            delegation_chain,
            delegation_depth: depth,
        })
    }

    /// Terminate an agent and, with `cascade`, every descendant.
    ///
    /// Only agents that were not already terminated are returned, so
    /// repeating a call yields an empty list. Edges and audit history are kept.
    ///
    /// The cascade walks through descendants that are already terminated and
    /// also terminates suspended ones: afterwards every descendant of
    /// `agent_id` is terminated, even if an intermediate node was terminated
    /// earlier without cascade.
    pub async fn terminate(&self, agent_id: Uuid, cascade: bool) -> Result<Termination> {
        let mut tx = self.store.begin_write().await?;

        if store::fetch_agent(&mut tx, agent_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Agent {} not found", agent_id)));
        }

        let now = Utc::now();
        let mut terminated = Vec::new();
        if store::mark_terminated(&mut tx, agent_id, now).await? {
            terminated.push(agent_id);
        }

        if cascade {
            let mut visited = HashSet::from([agent_id]);
            let mut queue = VecDeque::from([agent_id]);

            while let Some(current) = queue.pop_front() {
                for child in store::fetch_children(&mut tx, current).await? {
                    if !visited.insert(child) {
                        tracing::error!(
                            agent_id = %child,
                            parent_id = %current,
                            "Agent reached twice during cascade; delegation graph is corrupt"
                        );
                        continue;
                    }
                    if store::mark_terminated(&mut tx, child, now).await? {
                        terminated.push(child);
                    }
                    queue.push_back(child);
                }
            }
        }

        tx.commit().await?;

        tracing::info!(
            agent_id = %agent_id,
            cascade,
            count = terminated.len(),
            "Terminated agents"
        );

        let count = terminated.len();
        Ok(Termination { terminated, count })
    }

    pub async fn get_agent(&self, agent_id: Uuid) -> Result<Agent> {
        self.store.get_agent(agent_id).await
    }

    pub async fn list_agents(&self, include_terminated: bool) -> Result<Vec<Agent>> {
        self.store.list_agents(include_terminated).await
    }

    /// Check whether `action` is in the agent's scope
    pub async fn check_scope(&self, agent_id: Uuid, action: &str) -> Result<ScopeCheck> {
        let agent = self.store.get_agent(agent_id).await?;
        Ok(ScopeCheck {
            agent_id,
            action: action.to_string(),
            allowed: agent.scope.allows(action),
            agent_scope: agent.scope,
        })
    }

    /// Resolve an active agent from an unexpired API key
    pub async fn authenticate(&self, api_key: &str) -> Result<Agent> {
        match self.store.get_agent_by_api_key(api_key).await? {
            Some(agent) if agent.credential_expires_at > Utc::now() => Ok(agent),
            Some(agent) => {
                tracing::debug!(agent_id = %agent.agent_id, "Rejected expired credential");
                Err(AppError::NotFound("Invalid or expired credential".to_string()))
            }
            None => Err(AppError::NotFound("Invalid or expired credential".to_string())),
        }
    }

    fn issue(
        &self,
        agent_name: String,
        agent_type: AgentKind,
        created_by: Principal,
        authority_source: AuthoritySource,
        scope: Scope,
    ) -> (Agent, Credentials) {
        let now = Utc::now();
        let credentials = Credentials {
            api_key: generate_api_key(),
            expires_at: now + self.credential_ttl,
        };
        let agent = Agent {
            agent_id: Uuid::new_v4(),
            agent_name,
            agent_type,
            created_at: now,
            created_by,
            authority_source,
            scope,
            lifecycle_state: LifecycleState::Active,
            terminated_at: None,
            credential_expires_at: credentials.expires_at,
        };
        (agent, credentials)
    }
}

fn generate_api_key() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", API_KEY_PREFIX, token)
}
