//! Server configuration

use clap::Parser;
use std::net::SocketAddr;

use crate::delegation::manager::DEFAULT_CREDENTIAL_TTL_DAYS;

#[derive(Parser, Debug, Clone)]
#[command(name = "agent-registry")]
#[command(about = "Agent identity registry - delegated authority and audit tracing")]
#[command(version)]
pub struct Config {
    /// SQLite database URL (created if missing)
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:agent_registry.db")]
    pub database_url: String,

    /// Address to listen on
    #[arg(long, env = "REGISTRY_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Maximum pooled database connections
    #[arg(long, env = "REGISTRY_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Lifetime of issued API keys, in days
    #[arg(long, env = "REGISTRY_CREDENTIAL_TTL_DAYS", default_value_t = DEFAULT_CREDENTIAL_TTL_DAYS)]
    pub credential_ttl_days: i64,
}

impl Config {
    pub fn credential_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.credential_ttl_days)
    }
}
