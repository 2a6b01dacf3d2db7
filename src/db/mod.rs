use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::models::claim::{ClaimKey, ClaimStatus};

pub mod migrator;
pub mod repositories;

/// Local SQLite store holding claim status.
#[derive(Clone)]
pub struct Store {
    pub conn: Arc<DatabaseConnection>,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Status store connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self {
            conn: Arc::new(conn),
        })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn claim_status_repo(&self) -> repositories::claim_status::ClaimStatusRepository {
        repositories::claim_status::ClaimStatusRepository::new(Arc::clone(&self.conn))
    }

    pub async fn get_claim_status(&self, key: &ClaimKey) -> Result<Option<ClaimStatus>> {
        self.claim_status_repo().get(key).await
    }

    pub async fn put_claim_status(&self, key: &ClaimKey, status: &ClaimStatus) -> Result<()> {
        self.claim_status_repo().upsert(key, status).await
    }

    pub async fn list_claim_statuses(&self) -> Result<Vec<(ClaimKey, ClaimStatus)>> {
        self.claim_status_repo().list().await
    }
}
