//! Identity store for agents, delegation edges and audit entries
//!
//! Reads go through pooled connections. Multi-record writes go through a
//! [`WriteTx`], which pairs a SQLite transaction with an in-process write
//! lock so that writers are serialized and a dropped transaction rolls back.
//! Row-level helpers take a bare `SqliteConnection` so they run the same way
//! on either.

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::delegation::Scope;
use crate::error::{AppError, Result};
use crate::models::{
    Agent, AgentCounts, AuditCounts, AuditLogEntry, AuditQuery, AuditRecord, Delegation,
    LifecycleState, Principal, RegistryStats,
};

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

/// An open write transaction holding the store's write lock.
///
/// Nothing is visible to other connections until [`WriteTx::commit`];
/// dropping it without committing rolls every write back.
pub struct WriteTx {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl WriteTx {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

impl Deref for WriteTx {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

impl DerefMut for WriteTx {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tx
    }
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check out a connection for reads
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Begin a serialized write transaction
    pub async fn begin_write(&self) -> Result<WriteTx> {
        let guard = self.write_lock.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTx { tx, _guard: guard })
    }

    // Agent operations

    pub async fn get_agent(&self, id: Uuid) -> Result<Agent> {
        let mut conn = self.acquire().await?;
        fetch_agent(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Agent {} not found", id)))
    }

    pub async fn list_agents(&self, include_terminated: bool) -> Result<Vec<Agent>> {
        let sql = if include_terminated {
            format!("SELECT {} FROM agents ORDER BY created_at DESC", AGENT_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM agents WHERE lifecycle_state = 'active' ORDER BY created_at DESC",
                AGENT_COLUMNS
            )
        };

        let rows = sqlx::query_as::<_, AgentRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn get_agent_by_api_key(&self, api_key: &str) -> Result<Option<Agent>> {
        let row = sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {} FROM agents WHERE api_key = ? AND lifecycle_state = 'active'",
            AGENT_COLUMNS
        ))
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    // Administrative operations

    pub async fn stats(&self) -> Result<RegistryStats> {
        let by_state = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT lifecycle_state, COUNT(*)
            FROM agents
            GROUP BY lifecycle_state
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut agents = AgentCounts::default();
        for (state, count) in by_state {
            let state: LifecycleState = state.parse().map_err(AppError::Internal)?;
            match state {
                LifecycleState::Active => agents.active = count,
                LifecycleState::Suspended => agents.suspended = count,
                LifecycleState::Terminated => agents.terminated = count,
            }
            agents.total += count;
        }

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;

        Ok(RegistryStats {
            agents,
            audit_logs: AuditCounts { total },
        })
    }

    /// Delete every record. Test and demo use only.
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.begin_write().await?;
        sqlx::query("DELETE FROM audit_log")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM delegations")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM agents").execute(&mut *tx).await?;
        tx.commit().await
    }
}

// Row-level operations shared by read connections and write transactions

const AGENT_COLUMNS: &str = "agent_id, agent_name, agent_type, created_at, created_by_kind, \
     created_by, authority_source, scope_json, lifecycle_state, terminated_at, api_key_expires_at";

pub async fn fetch_agent(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Agent>> {
    let row = sqlx::query_as::<_, AgentRow>(&format!(
        "SELECT {} FROM agents WHERE agent_id = ?",
        AGENT_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|r| r.try_into()).transpose()
}

pub async fn insert_agent(conn: &mut SqliteConnection, agent: &Agent, api_key: &str) -> Result<()> {
    let scope_json = serde_json::to_string(&agent.scope)
        .map_err(|e| AppError::Internal(format!("Failed to encode scope: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO agents (
            agent_id, agent_name, agent_type, created_at, created_by_kind, created_by,
            authority_source, scope_json, lifecycle_state, terminated_at, api_key, api_key_expires_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(agent.agent_id.to_string())
    .bind(&agent.agent_name)
    .bind(agent.agent_type.as_str())
    .bind(agent.created_at)
    .bind(agent.created_by.kind_str())
    .bind(agent.created_by.id_string())
    .bind(agent.authority_source.as_str())
    .bind(scope_json)
    .bind(agent.lifecycle_state.as_str())
    .bind(agent.terminated_at)
    .bind(api_key)
    .bind(agent.credential_expires_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Flip an agent to terminated. Returns false if it was already terminated.
pub async fn mark_terminated(
    conn: &mut SqliteConnection,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE agents SET lifecycle_state = 'terminated', terminated_at = ?
        WHERE agent_id = ? AND lifecycle_state != 'terminated'
        "#,
    )
    .bind(at)
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn insert_delegation(conn: &mut SqliteConnection, edge: &Delegation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO delegations (delegation_id, parent_id, child_id, delegated_at, delegation_depth)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(edge.delegation_id.to_string())
    .bind(edge.parent_id.to_string())
    .bind(edge.child_id.to_string())
    .bind(edge.delegated_at)
    .bind(edge.delegation_depth)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// The edge pointing at `child_id`, if it was spawned
pub async fn fetch_parent_edge(
    conn: &mut SqliteConnection,
    child_id: Uuid,
) -> Result<Option<Delegation>> {
    let row = sqlx::query_as::<_, DelegationRow>(
        r#"
        SELECT delegation_id, parent_id, child_id, delegated_at, delegation_depth
        FROM delegations
        WHERE child_id = ?
        LIMIT 1
        "#,
    )
    .bind(child_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|r| r.try_into()).transpose()
}

pub async fn fetch_children(conn: &mut SqliteConnection, parent_id: Uuid) -> Result<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, String>(
        r#"
        SELECT child_id
        FROM delegations
        WHERE parent_id = ?
        ORDER BY delegated_at ASC, rowid ASC
        "#,
    )
    .bind(parent_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    ids.iter().map(|s| parse_uuid(s, "child_id")).collect()
}

pub async fn insert_audit_entry(conn: &mut SqliteConnection, entry: &AuditLogEntry) -> Result<()> {
    let metadata_json = entry
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AppError::Internal(format!("Failed to encode metadata: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO audit_log (
            log_id, agent_id, action, resource, timestamp, human_authority, success, metadata_json
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.log_id.to_string())
    .bind(entry.agent_id.to_string())
    .bind(&entry.action)
    .bind(&entry.resource)
    .bind(to_micros(entry.timestamp))
    .bind(&entry.human_authority)
    .bind(entry.success)
    .bind(metadata_json)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Filtered scan over the audit log, newest first, ties in insertion order
pub async fn query_audit(
    conn: &mut SqliteConnection,
    query: &AuditQuery,
) -> Result<Vec<AuditRecord>> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        r#"
        SELECT l.log_id, l.agent_id, l.action, l.resource, l.timestamp, l.human_authority,
               l.success, l.metadata_json, a.agent_name
        FROM audit_log l
        LEFT JOIN agents a ON a.agent_id = l.agent_id
        WHERE 1 = 1
        "#,
    );

    if let Some(since) = query.since {
        qb.push(" AND l.timestamp >= ").push_bind(to_micros(since));
    }
    if let Some(agent_id) = query.agent_id {
        qb.push(" AND l.agent_id = ").push_bind(agent_id.to_string());
    }
    if let Some(action) = &query.action {
        qb.push(" AND l.action = ").push_bind(action.clone());
    }
    if let Some(human) = &query.human_authority {
        qb.push(" AND l.human_authority = ").push_bind(human.clone());
    }

    qb.push(" ORDER BY l.timestamp DESC, l.seq DESC LIMIT ")
        .push_bind(query.clamped_limit());

    let rows = qb
        .build_query_as::<AuditRow>()
        .fetch_all(&mut *conn)
        .await?;

    rows.into_iter().map(|r| r.try_into()).collect()
}

/// Every audit entry written by one agent, newest first
pub async fn fetch_audit_for_agent(
    conn: &mut SqliteConnection,
    agent_id: Uuid,
) -> Result<Vec<AuditLogEntry>> {
    let rows = sqlx::query_as::<_, AuditRow>(
        r#"
        SELECT l.log_id, l.agent_id, l.action, l.resource, l.timestamp, l.human_authority,
               l.success, l.metadata_json, a.agent_name
        FROM audit_log l
        LEFT JOIN agents a ON a.agent_id = l.agent_id
        WHERE l.agent_id = ?
        ORDER BY l.timestamp DESC, l.seq DESC
        "#,
    )
    .bind(agent_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|r| AuditRecord::try_from(r).map(|rec| rec.entry))
        .collect()
}

/// Audit timestamps are stored as unix microseconds so range filters compare numerically
pub fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| AppError::Internal(format!("Invalid timestamp: {}", micros)))
}

fn parse_uuid(s: &str, field: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Internal(format!("Invalid {} UUID: {}", field, e)))
}

// Internal row types for sqlx

#[derive(sqlx::FromRow)]
struct AgentRow {
    agent_id: String,
    agent_name: String,
    agent_type: String,
    created_at: DateTime<Utc>,
    created_by_kind: String,
    created_by: String,
    authority_source: String,
    scope_json: String,
    lifecycle_state: String,
    terminated_at: Option<DateTime<Utc>>,
    api_key_expires_at: DateTime<Utc>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = AppError;

    fn try_from(row: AgentRow) -> Result<Self> {
        let scope: Scope = serde_json::from_str(&row.scope_json)
            .map_err(|e| AppError::Internal(format!("Invalid scope JSON: {}", e)))?;

        Ok(Agent {
            agent_id: parse_uuid(&row.agent_id, "agent_id")?,
            agent_name: row.agent_name,
            agent_type: row.agent_type.parse().map_err(AppError::Internal)?,
            created_at: row.created_at,
            created_by: Principal::from_parts(&row.created_by_kind, &row.created_by)
                .map_err(AppError::Internal)?,
            authority_source: row.authority_source.parse().map_err(AppError::Internal)?,
            scope,
            lifecycle_state: row.lifecycle_state.parse().map_err(AppError::Internal)?,
            terminated_at: row.terminated_at,
            credential_expires_at: row.api_key_expires_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DelegationRow {
    delegation_id: String,
    parent_id: String,
    child_id: String,
    delegated_at: DateTime<Utc>,
    delegation_depth: i64,
}

impl TryFrom<DelegationRow> for Delegation {
    type Error = AppError;

    fn try_from(row: DelegationRow) -> Result<Self> {
        Ok(Delegation {
            delegation_id: parse_uuid(&row.delegation_id, "delegation_id")?,
            parent_id: parse_uuid(&row.parent_id, "parent_id")?,
            child_id: parse_uuid(&row.child_id, "child_id")?,
            delegated_at: row.delegated_at,
            delegation_depth: row.delegation_depth,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    log_id: String,
    agent_id: String,
    action: String,
    resource: Option<String>,
    timestamp: i64,
    human_authority: Option<String>,
    success: bool,
    metadata_json: Option<String>,
    agent_name: Option<String>,
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = AppError;

    fn try_from(row: AuditRow) -> Result<Self> {
        let metadata = row
            .metadata_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| AppError::Internal(format!("Invalid metadata JSON: {}", e)))?;

        Ok(AuditRecord {
            entry: AuditLogEntry {
                log_id: parse_uuid(&row.log_id, "log_id")?,
                agent_id: parse_uuid(&row.agent_id, "agent_id")?,
                action: row.action,
                resource: row.resource,
                timestamp: from_micros(row.timestamp)?,
                human_authority: row.human_authority,
                success: row.success,
                metadata,
            },
            agent_name: row.agent_name,
        })
    }
}
