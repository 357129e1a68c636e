//! Registry statistics structures

use serde::Serialize;

use crate::scope::Scope;

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub scopes: Vec<ScopeConnectionStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeConnectionStats {
    pub scope: Scope,
    pub connections: usize,
    pub quota: usize,
}
