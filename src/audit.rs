//! Audit engine: action recording and forensic queries
//!
//! Every recorded action is stamped with the human at the root of the acting
//! agent's delegation chain, resolved once at write time. Forensic queries
//! then filter on the stored value without re-walking the chain.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delegation::chain::{self, ChainLink};
use crate::delegation::Scope;
use crate::error::{AppError, Result};
use crate::models::{AuditLogEntry, AuditQuery, AuditRecord, LifecycleState, NewAuditEntry};
use crate::store::{self, Store};

/// Result of recording an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedAction {
    pub log_id: Uuid,
    pub human_authority: Option<String>,
    pub recorded_at: chrono::DateTime<Utc>,
}

/// Full forensic view of one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTrace {
    pub agent_id: Uuid,
    pub agent_name: String,
    pub lifecycle_state: LifecycleState,
    pub delegation_chain: Vec<ChainLink>,
    pub delegation_depth: i64,
    pub scope: Scope,
    pub audit_trail: Vec<AuditLogEntry>,
}

#[derive(Clone)]
pub struct AuditEngine {
    store: Store,
}

impl AuditEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append one action to the audit log.
    ///
    /// Terminated agents may still have actions recorded; only existence is checked.
    pub async fn record(&self, action: NewAuditEntry) -> Result<RecordedAction> {
        let mut tx = self.store.begin_write().await?;

        if store::fetch_agent(&mut tx, action.agent_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "Agent {} not found",
                action.agent_id
            )));
        }

        let human_authority = chain::human_authority_of(&mut tx, action.agent_id).await?;
        let timestamp = store::from_micros(store::to_micros(Utc::now()))?;

        let entry = AuditLogEntry {
            log_id: Uuid::new_v4(),
            agent_id: action.agent_id,
            action: action.action,
            resource: action.resource,
            timestamp,
            human_authority,
            success: action.success,
            metadata: action.metadata,
        };
        store::insert_audit_entry(&mut tx, &entry).await?;
        tx.commit().await?;

        tracing::debug!(
            log_id = %entry.log_id,
            agent_id = %entry.agent_id,
            action = %entry.action,
            human_authority = ?entry.human_authority,
            success = entry.success,
            "Recorded action"
        );

        Ok(RecordedAction {
            log_id: entry.log_id,
            human_authority: entry.human_authority,
            recorded_at: entry.timestamp,
        })
    }

    /// Agent metadata, resolved chain, scope and full audit trail, newest first
    pub async fn trace(&self, agent_id: Uuid) -> Result<AuditTrace> {
        let mut conn = self.store.acquire().await?;

        let agent = store::fetch_agent(&mut conn, agent_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Agent {} not found", agent_id)))?;
        let delegation_chain = chain::resolve(&mut conn, agent_id).await?;
        let delegation_depth = chain::delegation_depth(&mut conn, agent_id).await?;
        let audit_trail = store::fetch_audit_for_agent(&mut conn, agent_id).await?;

        Ok(AuditTrace {
            agent_id,
            agent_name: agent.agent_name,
            lifecycle_state: agent.lifecycle_state,
            delegation_chain,
            delegation_depth,
            scope: agent.scope,
            audit_trail,
        })
    }

    /// Filtered forensic query; filters AND together, limit clamps to 1..=1000
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let mut conn = self.store.acquire().await?;
        let records = store::query_audit(&mut conn, query).await?;

        tracing::debug!(
            agent_id = ?query.agent_id,
            action = ?query.action,
            human_authority = ?query.human_authority,
            limit = query.clamped_limit(),
            results = records.len(),
            "Audit query"
        );

        Ok(records)
    }
}
