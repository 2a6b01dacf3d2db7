//! Claim status write-back.

use thiserror::Error;

use crate::models::claim::{ClaimKey, ClaimStatus};

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for StatusError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for StatusError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

/// Where the reconciler reads and records claim status.
#[async_trait::async_trait]
pub trait ClaimStatusStore: Send + Sync {
    async fn load_status(&self, key: &ClaimKey) -> Result<Option<ClaimStatus>, StatusError>;

    async fn report_status(&self, key: &ClaimKey, status: &ClaimStatus)
    -> Result<(), StatusError>;

    async fn list_statuses(&self) -> Result<Vec<(ClaimKey, ClaimStatus)>, StatusError>;
}
