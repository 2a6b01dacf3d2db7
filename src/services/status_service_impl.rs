//! `SeaORM` implementation of the `ClaimStatusStore` trait.

use async_trait::async_trait;
use tracing::debug;

use crate::db::Store;
use crate::models::claim::{ClaimKey, ClaimStatus};
use crate::services::status_service::{ClaimStatusStore, StatusError};

pub struct SeaOrmStatusStore {
    store: Store,
}

impl SeaOrmStatusStore {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ClaimStatusStore for SeaOrmStatusStore {
    async fn load_status(&self, key: &ClaimKey) -> Result<Option<ClaimStatus>, StatusError> {
        Ok(self.store.get_claim_status(key).await?)
    }

    async fn report_status(
        &self,
        key: &ClaimKey,
        status: &ClaimStatus,
    ) -> Result<(), StatusError> {
        debug!(
            claim = %key,
            phase = %status.phase,
            credential_version = status.credential_version,
            last_error = status.last_error.as_deref().unwrap_or(""),
            "Reporting status"
        );
        self.store.put_claim_status(key, status).await?;
        Ok(())
    }

    async fn list_statuses(&self) -> Result<Vec<(ClaimKey, ClaimStatus)>, StatusError> {
        Ok(self.store.list_claim_statuses().await?)
    }
}
