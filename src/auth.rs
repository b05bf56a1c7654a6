//! Bearer-token authentication.
//!
//! Requests carry `Authorization: Bearer <token>`. A missing header (or an
//! empty token) is `AuthMissing` (401); a token the validator rejects is
//! `AuthInvalid` (403).
//!
//! Two validators are provided:
//!
//! - [`HmacTokenValidator`]: stateless signed tokens of the form
//!   `<subject>.<hex hmac-sha256(secret, subject)>`, minted with
//!   [`HmacTokenValidator::issue`] (or `chx token issue <subject>`).
//! - [`StaticTokenValidator`]: a fixed token → subject map from
//!   `[auth.tokens]`, for local setups.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::AuthConfig;
use crate::error::PipelineError;
use crate::models::Subject;

type HmacSha256 = Hmac<Sha256>;

/// Resolves a bearer token to the subject it authenticates.
#[async_trait]
pub trait AuthValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Subject, PipelineError>;
}

/// Extract the token from an `Authorization` header value.
pub fn extract_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Authenticate a request from its raw `Authorization` header, if any.
pub async fn authenticate(
    validator: &dyn AuthValidator,
    header: Option<&str>,
) -> Result<Subject, PipelineError> {
    let token = header
        .and_then(extract_bearer)
        .ok_or_else(PipelineError::auth_missing)?;
    validator.validate(token).await
}

/// Validates stateless HMAC-SHA256 signed tokens.
pub struct HmacTokenValidator {
    secret: Vec<u8>,
}

impl HmacTokenValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            bail!("auth secret must not be empty");
        }
        Ok(Self { secret })
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size")
    }

    /// Mint a token for `subject`.
    pub fn issue(&self, subject: &str) -> String {
        let mut mac = self.mac();
        mac.update(subject.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        format!("{}.{}", subject, signature)
    }
}

#[async_trait]
impl AuthValidator for HmacTokenValidator {
    async fn validate(&self, token: &str) -> Result<Subject, PipelineError> {
        let (subject, signature) = token
            .rsplit_once('.')
            .ok_or_else(PipelineError::auth_invalid)?;
        if subject.is_empty() {
            return Err(PipelineError::auth_invalid());
        }
        let signature = hex::decode(signature).map_err(|_| PipelineError::auth_invalid())?;

        let mut mac = self.mac();
        mac.update(subject.as_bytes());
        mac.verify_slice(&signature).map_err(|_| {
            tracing::warn!("rejected bearer token with bad signature");
            PipelineError::auth_invalid()
        })?;

        Ok(Subject {
            id: subject.to_string(),
        })
    }
}

/// Validates tokens against a fixed token → subject map.
pub struct StaticTokenValidator {
    tokens: HashMap<String, String>,
}

impl StaticTokenValidator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl AuthValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<Subject, PipelineError> {
        self.tokens
            .get(token)
            .map(|id| Subject { id: id.clone() })
            .ok_or_else(PipelineError::auth_invalid)
    }
}

/// Read the HMAC signing secret from the environment variable named in config.
pub fn read_secret(config: &AuthConfig) -> Result<String> {
    let secret = std::env::var(&config.secret_env)
        .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.secret_env))?;
    if secret.is_empty() {
        bail!("{} must not be empty", config.secret_env);
    }
    Ok(secret)
}

/// Create the [`AuthValidator`] named by `auth.mode`.
pub fn create_validator(config: &AuthConfig) -> Result<Arc<dyn AuthValidator>> {
    match config.mode.as_str() {
        "hmac" => Ok(Arc::new(HmacTokenValidator::new(read_secret(config)?)?)),
        "static" => {
            if config.tokens.is_empty() {
                bail!("auth.tokens must not be empty when auth.mode is 'static'");
            }
            Ok(Arc::new(StaticTokenValidator::new(config.tokens.clone())))
        }
        other => bail!("Unknown auth mode: {}", other),
    }
}
