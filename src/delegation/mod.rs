//! Delegated authority between agents
//!
//! Authority flows from a human principal through a forest of spawned agents
//! and may only narrow at each step. This module holds the scope attenuation
//! rule, the chain resolver that walks back to the accountable human, and the
//! lifecycle manager that registers, spawns and terminates agents.

pub mod chain;
pub mod manager;
pub mod scope;

pub use chain::{ChainLink, MAX_CHAIN_HOPS};
pub use manager::{LifecycleManager, Registration, ScopeCheck, SpawnedAgent, Termination};
pub use scope::{attenuate, Scope};
