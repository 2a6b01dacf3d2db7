use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait, QueryOrder};
use std::sync::Arc;

use crate::entities::{claim_status, prelude::*};
use crate::models::claim::{ClaimKey, ClaimStatus as Status};

pub struct ClaimStatusRepository {
    conn: Arc<DatabaseConnection>,
}

impl ClaimStatusRepository {
    #[must_use]
    pub const fn new(conn: Arc<DatabaseConnection>) -> Self {
        Self { conn }
    }

    pub async fn get(&self, key: &ClaimKey) -> Result<Option<Status>> {
        let row = ClaimStatus::find_by_id((key.namespace.clone(), key.name.clone()))
            .one(self.conn.as_ref())
            .await
            .with_context(|| format!("Failed to query status for {key}"))?;

        row.map(to_status).transpose()
    }

    pub async fn upsert(&self, key: &ClaimKey, status: &Status) -> Result<()> {
        let updated_at = status.updated_at.unwrap_or_else(Utc::now).to_rfc3339();

        let active_model = claim_status::ActiveModel {
            namespace: Set(key.namespace.clone()),
            name: Set(key.name.clone()),
            phase: Set(status.phase.as_str().to_string()),
            active_username: Set(status.active_username.clone()),
            credential_version: Set(i64::try_from(status.credential_version).unwrap_or(i64::MAX)),
            last_rotated_at: Set(status.last_rotated_at.map(|t| t.to_rfc3339())),
            last_action: Set(status.last_action.clone()),
            last_error: Set(status.last_error.clone()),
            error_category: Set(status.error_category.clone()),
            consecutive_failures: Set(i32::try_from(status.consecutive_failures).unwrap_or(i32::MAX)),
            updated_at: Set(updated_at),
        };

        ClaimStatus::insert(active_model)
            .on_conflict(
                OnConflict::columns([claim_status::Column::Namespace, claim_status::Column::Name])
                    .update_columns([
                        claim_status::Column::Phase,
                        claim_status::Column::ActiveUsername,
                        claim_status::Column::CredentialVersion,
                        claim_status::Column::LastRotatedAt,
                        claim_status::Column::LastAction,
                        claim_status::Column::LastError,
                        claim_status::Column::ErrorCategory,
                        claim_status::Column::ConsecutiveFailures,
                        claim_status::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.conn.as_ref())
            .await
            .with_context(|| format!("Failed to write status for {key}"))?;

        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<(ClaimKey, Status)>> {
        let rows = ClaimStatus::find()
            .order_by_asc(claim_status::Column::Namespace)
            .order_by_asc(claim_status::Column::Name)
            .all(self.conn.as_ref())
            .await
            .context("Failed to list claim statuses")?;

        rows.into_iter()
            .map(|row| {
                let key = ClaimKey::new(row.namespace.clone(), row.name.clone());
                to_status(row).map(|status| (key, status))
            })
            .collect()
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp '{value}'"))?
        .with_timezone(&Utc))
}

fn to_status(row: claim_status::Model) -> Result<Status> {
    Ok(Status {
        phase: row.phase.parse()?,
        active_username: row.active_username,
        credential_version: u64::try_from(row.credential_version).unwrap_or_default(),
        last_rotated_at: row.last_rotated_at.as_deref().map(parse_time).transpose()?,
        last_action: row.last_action,
        last_error: row.last_error,
        error_category: row.error_category,
        consecutive_failures: u32::try_from(row.consecutive_failures).unwrap_or_default(),
        updated_at: Some(parse_time(&row.updated_at)?),
    })
}
