//! Connection admission: the combined auth + capacity gate.
//!
//! Checks run in a fixed order: token presence, token validity, the
//! required read capability, scope membership, then the scope quota.
//! Every decision (accept or each distinct reject) emits exactly one
//! audit event carrying the scope and a hash prefix of the token; the
//! raw token is never logged.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::auth::{TokenValidator, METRICS_READ};
use crate::error::{AdmissionError, RegistryError};
use crate::metrics::AdmissionMetrics;
use crate::registry::{Connection, ConnectionRegistry};
use crate::scope::Scope;

/// Hex prefix length for token hashes in audit events.
const TOKEN_HASH_PREFIX_LEN: usize = 12;

/// Pure per-scope capacity policy. A quota of zero admits nothing.
#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicy {
    pub max_per_scope: usize,
}

impl QuotaPolicy {
    pub fn new(max_per_scope: usize) -> Self {
        Self { max_per_scope }
    }

    pub fn admits(&self, current: usize) -> bool {
        current < self.max_per_scope
    }
}

/// Draft connection issued by a successful admission. The transport
/// layer attaches the socket handle and sender.
#[derive(Debug, Clone)]
pub struct AdmissionTicket {
    pub scope: Scope,
    pub permissions: Vec<String>,
    pub token_hash: String,
}

/// Gates new connections before they ever reach the registry.
pub struct AdmissionController {
    validator: Arc<dyn TokenValidator>,
    registry: Arc<ConnectionRegistry>,
    quota: QuotaPolicy,
}

impl AdmissionController {
    pub fn new(
        validator: Arc<dyn TokenValidator>,
        registry: Arc<ConnectionRegistry>,
        quota: QuotaPolicy,
    ) -> Self {
        Self {
            validator,
            registry,
            quota,
        }
    }

    pub fn admit(
        &self,
        token: Option<&str>,
        scope_claim: &str,
    ) -> Result<AdmissionTicket, AdmissionError> {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return Err(self.reject(None, scope_claim, AdmissionError::MissingToken)),
        };
        let token_hash = hash_token(token);

        let claims = match self.validator.validate(token) {
            Ok(claims) => claims,
            Err(e) => {
                return Err(self.reject(
                    Some(&token_hash),
                    scope_claim,
                    AdmissionError::InvalidToken(e.to_string()),
                ));
            }
        };

        if !claims.has_permission(METRICS_READ) {
            return Err(self.reject(
                Some(&token_hash),
                scope_claim,
                AdmissionError::InsufficientPermissions,
            ));
        }

        let scope: Scope = match scope_claim.parse() {
            Ok(scope) => scope,
            Err(_) => {
                return Err(self.reject(
                    Some(&token_hash),
                    scope_claim,
                    AdmissionError::InvalidScope(scope_claim.to_string()),
                ));
            }
        };

        let current = self.registry.count(scope);
        if !self.quota.admits(current) {
            return Err(self.reject(
                Some(&token_hash),
                scope_claim,
                AdmissionError::CapacityExceeded {
                    scope,
                    current,
                    max: self.quota.max_per_scope,
                },
            ));
        }

        AdmissionMetrics::record_accepted();
        tracing::info!(
            scope = %scope,
            token_hash = %token_hash,
            decision = "accept",
            "Admission accepted"
        );

        Ok(AdmissionTicket {
            scope,
            permissions: claims.permissions,
            token_hash,
        })
    }

    /// Audit a registration that lost the quota race between the
    /// admission check and the registry insert.
    pub fn audit_insert_rejected(&self, conn: &Connection, err: &RegistryError) {
        AdmissionMetrics::record_rejected("CAPACITY_EXCEEDED");
        tracing::warn!(
            scope = %conn.scope,
            token_hash = %conn.token_hash,
            code = "CAPACITY_EXCEEDED",
            reason = %err,
            "Admission refused at registration"
        );
    }

    fn reject(
        &self,
        token_hash: Option<&str>,
        scope_claim: &str,
        err: AdmissionError,
    ) -> AdmissionError {
        AdmissionMetrics::record_rejected(err.code());
        tracing::warn!(
            scope = %scope_claim,
            token_hash = token_hash.unwrap_or("-"),
            code = err.code(),
            reason = %err,
            "Admission refused"
        );
        err
    }
}

/// Hash prefix identifying a token in audit events.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)[..TOKEN_HASH_PREFIX_LEN].to_string()
}
