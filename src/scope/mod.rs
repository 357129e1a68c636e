//! Scope partitions.
//!
//! A scope is the tenant/environment boundary of the service: it
//! partitions both connection quotas and metric visibility. The set of
//! scopes is fixed at compile time; a scope claim that is not a member
//! is refused at admission.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Enterprise,
    Development,
    LocalSandbox,
}

impl Scope {
    /// All members of the enumeration.
    pub const ALL: [Scope; 3] = [Scope::Enterprise, Scope::Development, Scope::LocalSandbox];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Enterprise => "enterprise",
            Scope::Development => "development",
            Scope::LocalSandbox => "local-sandbox",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enterprise" => Ok(Scope::Enterprise),
            "development" => Ok(Scope::Development),
            "local-sandbox" => Ok(Scope::LocalSandbox),
            other => Err(UnknownScope(other.to_string())),
        }
    }
}

/// A scope claim outside the fixed enumeration.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown scope: {0}")]
pub struct UnknownScope(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_scopes() {
        assert_eq!("enterprise".parse::<Scope>().unwrap(), Scope::Enterprise);
        assert_eq!("development".parse::<Scope>().unwrap(), Scope::Development);
        assert_eq!("local-sandbox".parse::<Scope>().unwrap(), Scope::LocalSandbox);
    }

    #[test]
    fn test_parse_rejects_unknown_scopes() {
        assert!("production".parse::<Scope>().is_err());
        assert!("ENTERPRISE".parse::<Scope>().is_err());
        assert!("".parse::<Scope>().is_err());
    }

    #[test]
    fn test_wire_form_is_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Scope::LocalSandbox).unwrap(),
            "\"local-sandbox\""
        );
    }

    #[test]
    fn test_display_round_trips() {
        for scope in Scope::ALL {
            assert_eq!(scope.to_string().parse::<Scope>().unwrap(), scope);
        }
    }
}
