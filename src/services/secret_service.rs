//! Persistence of minted credentials.
//!
//! The reconciler hands every new credential to a [`SecretSink`] exactly once
//! per mint and does not retry; a failed write leaves the claim short of
//! `Ready` so the next pass mints again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::dbclient::ProvisionError;
use crate::dbclient::conn::{connection_string, postgres_uri};
use crate::models::claim::{ClaimKey, ClaimSpec, Credential};

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Cannot build connection URI: {0}")]
    Locator(#[from] ProvisionError),
}

/// Everything an application needs to reach its tenant database.
#[derive(Clone, Serialize)]
pub struct SecretPayload {
    #[serde(skip)]
    pub key: ClaimKey,
    pub claim: String,
    pub username: String,
    pub password: String,
    pub role: String,
    pub database: String,
    pub version: u64,
    pub rotated_at: DateTime<Utc>,
    /// Escaped key/value locator.
    pub dsn: String,
    pub uri: String,
}

impl SecretPayload {
    pub fn new(
        key: &ClaimKey,
        spec: &ClaimSpec,
        credential: &Credential,
    ) -> Result<Self, SecretError> {
        let dsn = connection_string(
            &spec.host,
            spec.port,
            &credential.username,
            &credential.password,
            &spec.database_name,
            &spec.sslmode,
        );
        let uri = postgres_uri(
            &spec.host,
            spec.port,
            &credential.username,
            &credential.password,
            &spec.database_name,
            &spec.sslmode,
        )?
        .to_string();

        Ok(Self {
            key: key.clone(),
            claim: key.to_string(),
            username: credential.username.clone(),
            password: credential.password.clone(),
            role: credential.role.clone(),
            database: spec.database_name.clone(),
            version: credential.version,
            rotated_at: credential.rotated_at,
            dsn,
            uri,
        })
    }
}

impl fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretPayload")
            .field("claim", &self.claim)
            .field("username", &self.username)
            .field("role", &self.role)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
pub trait SecretSink: Send + Sync {
    async fn store_credential(&self, payload: &SecretPayload) -> Result<(), SecretError>;
}
