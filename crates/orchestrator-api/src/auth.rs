//! JWT decode → [`SecurityPrincipal`]. Tenant routing and quota
//! enforcement once a tenant id is known lives in
//! `orchestrator_core::tenancy`; this module only resolves who's
//! asking.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use orchestrator_core::config::AuthConfig;
use orchestrator_core::error::{OrchestratorError, Result};
use orchestrator_core::model::SecurityPrincipal;
use serde::{Deserialize, Serialize};

/// Claims carried by the orchestrator's bearer tokens. `sub` identifies
/// the caller for audit logging; the remaining fields map directly
/// onto [`SecurityPrincipal`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub team: String,
    pub namespace: String,
    pub role: String,
    pub tenant_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl From<Claims> for SecurityPrincipal {
    fn from(claims: Claims) -> Self {
        SecurityPrincipal {
            team: claims.team,
            namespace: claims.namespace,
            role: claims.role,
            tenant_id: claims.tenant_id,
        }
    }
}

/// Verifies bearer tokens against the configured secret. When
/// `require_tokens` is false and no secret is configured, `verify`
/// returns the anonymous principal for a missing header instead of
/// rejecting the request — a dev-mode escape hatch, never the default.
pub struct TokenVerifier {
    secret: Option<String>,
    require_tokens: bool,
    algorithm: Algorithm,
}

impl TokenVerifier {
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        if config.require_tokens && config.token_secret.is_none() {
            return Err(OrchestratorError::AuthConfiguration(
                "AUTH_REQUIRE_TOKENS is set but no token secret is configured".to_string(),
            ));
        }
        Ok(Self {
            secret: config.token_secret.clone(),
            require_tokens: config.require_tokens,
            algorithm: Algorithm::HS256,
        })
    }

    /// `token` is the raw bearer value with the `Bearer ` prefix already
    /// stripped. `None` means no `Authorization` header was present.
    pub fn verify(&self, token: Option<&str>) -> Result<SecurityPrincipal> {
        match (token, &self.secret) {
            (Some(token), Some(secret)) => {
                let mut validation = Validation::new(self.algorithm);
                validation.validate_exp = true;
                validation.leeway = 60;
                let decoding_key = DecodingKey::from_secret(secret.as_bytes());
                let data = decode::<Claims>(token, &decoding_key, &validation)
                    .map_err(|_| OrchestratorError::InvalidToken)?;
                Ok(data.claims.into())
            }
            (None, _) if !self.require_tokens => Ok(SecurityPrincipal::anonymous()),
            (None, _) => Err(OrchestratorError::InvalidToken),
            (Some(_), None) => Err(OrchestratorError::AuthConfiguration(
                "no token secret configured".to_string(),
            )),
        }
    }
}
