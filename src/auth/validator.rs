use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::TokenConfig;
use crate::error::AppError;

use super::Claims;

/// Resolves an opaque token to its claims, or a refusal reason.
///
/// The concrete validator is an external concern; admission only depends
/// on this seam.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Claims, AppError>;
}

/// HMAC-signed JWT validation with optional issuer/audience pinning.
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &TokenConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}
