//! Token validation.
//!
//! Tokens are opaque to this service: a validator resolves them to a
//! permission set, and admission checks the required read capability.
//! Token issuance and rotation live elsewhere.

mod claims;
mod validator;

pub use claims::{Claims, METRICS_READ};
pub use validator::{JwtValidator, TokenValidator};
