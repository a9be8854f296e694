//! Delegation chain resolution
//!
//! Walks parent links from an agent up to the human who authorized the root
//! of its delegation tree.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::Principal;
use crate::store;

/// Hop limit for a single walk. The delegation forest is acyclic, so hitting
/// this means the stored graph is corrupt.
pub const MAX_CHAIN_HOPS: usize = 1024;

/// A link in a delegation chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainLink {
    Human { id: String },
    Agent { id: Uuid, name: String },
}

impl ChainLink {
    pub fn is_human(&self) -> bool {
        matches!(self, ChainLink::Human { .. })
    }
}

/// Resolve the chain for `agent_id`, human root first and the agent itself last.
///
/// The chain has no human link when the root agent was not created by a human
/// (policy-sourced roots).
pub async fn resolve(conn: &mut SqliteConnection, agent_id: Uuid) -> Result<Vec<ChainLink>> {
    let max_hops = MAX_CHAIN_HOPS;
    let mut chain = Vec::new();
    let mut current = Principal::Agent(agent_id);

    loop {
        if chain.len() >= max_hops {
            tracing::error!(
                agent_id = %agent_id,
                max_hops,
                "Delegation chain exceeds hop limit; delegation graph is corrupt"
            );
            return Err(AppError::ChainTooLong { agent_id, max_hops });
        }

        let id = match current {
            Principal::Human(id) => {
                chain.push(ChainLink::Human { id });
                break;
            }
            Principal::Agent(id) => id,
        };

        let agent = store::fetch_agent(conn, id).await?.ok_or_else(|| {
            if id == agent_id {
                AppError::NotFound(format!("Agent {} not found", id))
            } else {
                tracing::error!(agent_id = %agent_id, missing = %id, "Broken delegation chain");
                AppError::NotFound(format!(
                    "Agent {} in delegation chain of {} not found",
                    id, agent_id
                ))
            }
        })?;

        chain.push(ChainLink::Agent {
            id,
            name: agent.agent_name,
        });

        current = match store::fetch_parent_edge(conn, id).await? {
            Some(edge) => Principal::Agent(edge.parent_id),
            None => match agent.created_by {
                human @ Principal::Human(_) => human,
                Principal::Agent(_) => break,
            },
        };
    }

    chain.reverse();
    Ok(chain)
}

/// The human at the root of a resolved chain, if any
pub fn human_root(chain: &[ChainLink]) -> Option<&str> {
    chain.iter().find_map(|link| match link {
        ChainLink::Human { id } => Some(id.as_str()),
        ChainLink::Agent { .. } => None,
    })
}

/// Resolve the human ultimately accountable for `agent_id`
pub async fn human_authority_of(
    conn: &mut SqliteConnection,
    agent_id: Uuid,
) -> Result<Option<String>> {
    let chain = resolve(conn, agent_id).await?;
    Ok(human_root(&chain).map(String::from))
}

/// Depth stored on the edge pointing at `agent_id`, or 0 for a root agent
pub async fn delegation_depth(conn: &mut SqliteConnection, agent_id: Uuid) -> Result<i64> {
    Ok(store::fetch_parent_edge(conn, agent_id)
        .await?
        .map(|edge| edge.delegation_depth)
        .unwrap_or(0))
}
