//! Audit engine integration tests
//!
//! Human-authority stamping, forensic queries and the full
//! register/spawn/record/trace/terminate walkthrough.

use agent_registry::delegation::chain::{self, ChainLink};
use agent_registry::delegation::Scope;
use agent_registry::error::AppError;
use agent_registry::models::{
    AgentKind, AuditQuery, AuthoritySource, LifecycleState, Metadata, NewAgent, NewAuditEntry,
    Principal, SpawnRequest,
};
use agent_registry::AppState;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use uuid::Uuid;

async fn setup_state() -> Arc<AppState> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    let state = AppState::new(pool);
    state.store.migrate().await.expect("Failed to run migrations");
    state
}

fn scope(caps: &[&str]) -> Scope {
    caps.iter().copied().collect()
}

async fn register(
    state: &AppState,
    name: &str,
    created_by: Principal,
    authority_source: AuthoritySource,
    caps: &[&str],
) -> Uuid {
    state
        .lifecycle
        .register(NewAgent {
            agent_name: name.to_string(),
            agent_type: AgentKind::Autonomous,
            created_by,
            authority_source,
            scope: scope(caps),
        })
        .await
        .unwrap()
        .agent_id
}

async fn human_root(state: &AppState, human: &str, name: &str, caps: &[&str]) -> Uuid {
    register(
        state,
        name,
        Principal::human(human),
        AuthoritySource::Human,
        caps,
    )
    .await
}

async fn spawn(state: &AppState, parent: Uuid, name: &str, caps: &[&str]) -> Uuid {
    state
        .lifecycle
        .spawn(
            parent,
            SpawnRequest {
                agent_name: name.to_string(),
                agent_type: AgentKind::Tool,
                scope: scope(caps),
            },
        )
        .await
        .unwrap()
        .agent_id
}

async fn record(state: &AppState, agent_id: Uuid, action: &str) -> Uuid {
    state
        .audit
        .record(NewAuditEntry::new(agent_id, action))
        .await
        .unwrap()
        .log_id
}

#[tokio::test]
async fn test_record_stamps_resolved_human_authority() {
    let state = setup_state().await;
    let a = human_root(&state, "user:jun", "A", &["read:db"]).await;
    let b = spawn(&state, a, "B", &["read:db"]).await;
    let c = spawn(&state, b, "C", &["read:db"]).await;

    for agent in [a, b, c] {
        let recorded = state
            .audit
            .record(NewAuditEntry::new(agent, "read:db"))
            .await
            .unwrap();

        let mut conn = state.store.acquire().await.unwrap();
        let expected = chain::human_authority_of(&mut conn, agent).await.unwrap();
        assert_eq!(recorded.human_authority, expected);
        assert_eq!(recorded.human_authority.as_deref(), Some("user:jun"));
    }
}

#[tokio::test]
async fn test_record_for_policy_root_has_no_authority() {
    let state = setup_state().await;
    let anchor = human_root(&state, "user:jun", "Anchor", &[]).await;
    let bot = register(
        &state,
        "PolicyBot",
        Principal::Agent(anchor),
        AuthoritySource::Policy,
        &["scan:logs"],
    )
    .await;

    let recorded = state
        .audit
        .record(NewAuditEntry::new(bot, "scan:logs"))
        .await
        .unwrap();
    assert_eq!(recorded.human_authority, None);
}

#[tokio::test]
async fn test_record_unknown_agent() {
    let state = setup_state().await;
    let err = state
        .audit
        .record(NewAuditEntry::new(Uuid::new_v4(), "read:db"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(state.store.stats().await.unwrap().audit_logs.total, 0);
}

#[tokio::test]
async fn test_record_allowed_for_terminated_agent() {
    let state = setup_state().await;
    let a = human_root(&state, "user:jun", "A", &[]).await;
    state.lifecycle.terminate(a, false).await.unwrap();

    let recorded = state
        .audit
        .record(NewAuditEntry::new(a, "late:report"))
        .await
        .unwrap();
    assert_eq!(recorded.human_authority.as_deref(), Some("user:jun"));
}

#[tokio::test]
async fn test_trace_returns_trail_newest_first() {
    let state = setup_state().await;
    let a = human_root(&state, "user:jun", "A", &["read:db"]).await;
    let first = record(&state, a, "read:db").await;
    let second = record(&state, a, "read:db").await;
    let third = record(&state, a, "read:db").await;

    let trace = state.audit.trace(a).await.unwrap();
    let ids: Vec<Uuid> = trace.audit_trail.iter().map(|e| e.log_id).collect();
    assert_eq!(ids, vec![third, second, first]);
    assert_eq!(trace.agent_name, "A");
    assert_eq!(trace.lifecycle_state, LifecycleState::Active);
    assert_eq!(trace.scope, scope(&["read:db"]));
}

#[tokio::test]
async fn test_trace_unknown_agent() {
    let state = setup_state().await;
    let err = state.audit.trace(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_metadata_keeps_insertion_order() {
    let state = setup_state().await;
    let a = human_root(&state, "user:jun", "A", &[]).await;

    let mut metadata = Metadata::new();
    metadata.insert("zeta".to_string(), serde_json::json!(1));
    metadata.insert("alpha".to_string(), serde_json::json!({"nested": true}));
    metadata.insert("mid".to_string(), serde_json::json!("x"));

    state
        .audit
        .record(
            NewAuditEntry::new(a, "export:report")
                .with_resource("report_42")
                .with_metadata(metadata)
                .failed(),
        )
        .await
        .unwrap();

    let trace = state.audit.trace(a).await.unwrap();
    let entry = &trace.audit_trail[0];
    assert!(!entry.success);
    assert_eq!(entry.resource.as_deref(), Some("report_42"));
    let keys: Vec<&str> = entry
        .metadata
        .as_ref()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
}

#[tokio::test]
async fn test_query_by_human_authority_is_exact() {
    let state = setup_state().await;
    let jun_root = human_root(&state, "user:jun", "JunRoot", &["read:db"]).await;
    let jun_child = spawn(&state, jun_root, "JunChild", &["read:db"]).await;
    let ana_root = human_root(&state, "user:ana", "AnaRoot", &["read:db"]).await;
    let ana_child = spawn(&state, ana_root, "AnaChild", &["read:db"]).await;

    let mut jun_logs = Vec::new();
    for _ in 0..3 {
        jun_logs.push(record(&state, jun_root, "read:db").await);
        jun_logs.push(record(&state, jun_child, "read:db").await);
        record(&state, ana_root, "read:db").await;
        record(&state, ana_child, "read:db").await;
    }

    let results = state
        .audit
        .query(&AuditQuery {
            human_authority: Some("user:jun".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(results.len(), jun_logs.len());
    for r in &results {
        assert_eq!(r.entry.human_authority.as_deref(), Some("user:jun"));
        assert!(jun_logs.contains(&r.entry.log_id));
    }

    let nobody = state
        .audit
        .query(&AuditQuery {
            human_authority: Some("user:nobody".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(nobody.is_empty());
}

#[tokio::test]
async fn test_query_filters_combine_with_and() {
    let state = setup_state().await;
    let a = human_root(&state, "user:jun", "A", &["read:db", "write:db"]).await;
    let b = human_root(&state, "user:jun", "B", &["read:db"]).await;

    let target = record(&state, a, "write:db").await;
    record(&state, a, "read:db").await;
    record(&state, b, "write:db").await;

    let results = state
        .audit
        .query(&AuditQuery {
            agent_id: Some(a),
            action: Some("write:db".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry.log_id, target);
    assert_eq!(results[0].agent_name.as_deref(), Some("A"));
}

#[tokio::test]
async fn test_query_orders_newest_first_and_limits() {
    let state = setup_state().await;
    let a = human_root(&state, "user:jun", "A", &[]).await;

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(record(&state, a, &format!("step:{}", i)).await);
    }
    ids.reverse();

    let all = state.audit.query(&AuditQuery::default()).await.unwrap();
    let got: Vec<Uuid> = all.iter().map(|r| r.entry.log_id).collect();
    assert_eq!(got, ids);

    let limited = state
        .audit
        .query(&AuditQuery {
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    let got: Vec<Uuid> = limited.iter().map(|r| r.entry.log_id).collect();
    assert_eq!(got, ids[..2].to_vec());

    // Zero clamps up to one
    let one = state
        .audit
        .query(&AuditQuery {
            limit: Some(0),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
}

#[tokio::test]
async fn test_query_since_excludes_older_entries() {
    let state = setup_state().await;
    let a = human_root(&state, "user:jun", "A", &[]).await;

    let old = state
        .audit
        .record(NewAuditEntry::new(a, "old"))
        .await
        .unwrap();
    let cutoff = old.recorded_at + chrono::Duration::microseconds(1);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let new = record(&state, a, "new").await;

    let results = state
        .audit
        .query(&AuditQuery {
            since: Some(cutoff),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry.log_id, new);
}

#[tokio::test]
async fn test_reset_clears_audit_history() {
    let state = setup_state().await;
    let a = human_root(&state, "user:jun", "A", &[]).await;
    record(&state, a, "read:db").await;

    state.store.reset().await.unwrap();

    assert!(state.audit.query(&AuditQuery::default()).await.unwrap().is_empty());
    assert!(matches!(
        state.lifecycle.get_agent(a).await.unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_end_to_end_accountability() {
    let state = setup_state().await;
    let human = "user:jun@apra.gov.au";

    let a = human_root(
        &state,
        human,
        "DataAnalyzer",
        &["read:db", "write:reports", "create:charts"],
    )
    .await;
    let b = spawn(&state, a, "ReportGenerator", &["write:reports"]).await;

    // B never held create:charts, so it cannot hand it on
    let err = state
        .lifecycle
        .spawn(
            b,
            SpawnRequest {
                agent_name: "ChartMaker".to_string(),
                agent_type: AgentKind::Tool,
                scope: scope(&["create:charts"]),
            },
        )
        .await
        .unwrap_err();
    match err {
        AppError::InvalidScope { offending } => {
            assert_eq!(offending, scope(&["create:charts"]))
        }
        other => panic!("Expected InvalidScope, got {:?}", other),
    }

    let spawned = state
        .lifecycle
        .spawn(
            a,
            SpawnRequest {
                agent_name: "ChartMaker".to_string(),
                agent_type: AgentKind::Tool,
                scope: scope(&["create:charts"]),
            },
        )
        .await
        .unwrap();
    assert_eq!(spawned.delegation_depth, 1);
    let c = spawned.agent_id;

    state
        .audit
        .record(NewAuditEntry::new(c, "create:charts").with_resource("chart_q3"))
        .await
        .unwrap();

    let trace = state.audit.trace(c).await.unwrap();
    assert_eq!(trace.audit_trail.len(), 1);
    assert_eq!(trace.audit_trail[0].human_authority.as_deref(), Some(human));
    assert_eq!(
        trace.delegation_chain.first(),
        Some(&ChainLink::Human {
            id: human.to_string()
        })
    );

    let result = state.lifecycle.terminate(a, true).await.unwrap();
    assert_eq!(result.count, 3);
    for id in [a, b, c] {
        assert_eq!(
            state.lifecycle.get_agent(id).await.unwrap().lifecycle_state,
            LifecycleState::Terminated
        );
    }

    // The action remains attributable after termination
    let trace = state.audit.trace(c).await.unwrap();
    assert_eq!(trace.lifecycle_state, LifecycleState::Terminated);
    assert_eq!(trace.audit_trail.len(), 1);
}
