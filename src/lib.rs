//! Agent identity registry - delegated authority, scope attenuation and audit tracing

pub mod api;
pub mod audit;
pub mod config;
pub mod delegation;
pub mod error;
pub mod models;
pub mod store;

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::audit::AuditEngine;
use crate::delegation::LifecycleManager;

/// Application state shared across handlers
pub struct AppState {
    pub store: store::Store,
    pub lifecycle: LifecycleManager,
    pub audit: AuditEngine,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Self::with_credential_ttl(
            pool,
            chrono::Duration::days(delegation::manager::DEFAULT_CREDENTIAL_TTL_DAYS),
        )
    }

    pub fn with_credential_ttl(pool: SqlitePool, ttl: chrono::Duration) -> Arc<Self> {
        let store = store::Store::new(pool);
        Arc::new(Self {
            lifecycle: LifecycleManager::new(store.clone()).with_credential_ttl(ttl),
            audit: AuditEngine::new(store.clone()),
            store,
        })
    }
}
