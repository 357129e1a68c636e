use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Capability required to read metrics over the socket.
pub const METRICS_READ: &str = "metrics:read";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (client ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Granted capabilities
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Additional custom claims
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_permission() {
        let claims = Claims {
            sub: "client-1".to_string(),
            exp: 0,
            iat: 0,
            permissions: vec![METRICS_READ.to_string(), "alerts:write".to_string()],
            extra: Default::default(),
        };

        assert!(claims.has_permission(METRICS_READ));
        assert!(claims.has_permission("alerts:write"));
        assert!(!claims.has_permission("admin"));
    }
}
