//! Connection registry
//!
//! This module provides:
//! - Connection records and lifecycle state
//! - Scope partitioning with quota enforcement on insert
//! - Reverse lookup by transport handle
//! - The single teardown routine used by every termination path

mod manager;
mod stats;
mod types;

pub use manager::ConnectionRegistry;
pub use stats::{RegistryStats, ScopeConnectionStats};
pub use types::{Connection, ConnectionState, HandleId};
