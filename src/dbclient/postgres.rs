//! Postgres implementation of [`ProvisioningClient`] over sea-orm.

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, RuntimeErr,
    Statement,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use super::conn::{postgres_uri, with_database};
use super::{ClientFactory, ConnectionTarget, ErrorCategory, ProvisionError, ProvisioningClient};
use crate::constants::postgres::{DUPLICATE_OBJECT, EXTENSIONS, MAINTENANCE_DATABASE};
use crate::observability::ProvisioningMetrics;

const DATABASE_EXISTS: &str =
    r#"SELECT EXISTS(SELECT datname FROM pg_catalog.pg_database WHERE datname = $1) AS "exists""#;
const ROLE_EXISTS: &str =
    r#"SELECT EXISTS(SELECT rolname FROM pg_catalog.pg_roles WHERE rolname = $1) AS "exists""#;
const USER_EXISTS: &str =
    r#"SELECT EXISTS(SELECT usename FROM pg_catalog.pg_user WHERE usename = $1) AS "exists""#;

/// Double-quotes an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quotes a literal; backslashes switch to the `E'...'` form.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        format!(" E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}

/// Opens a connection to one database on the target server.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(&self, db_name: &str) -> Result<Arc<DatabaseConnection>, DbErr>;
}

/// Closes the connection if this is the last handle to it.
async fn release(conn: Arc<DatabaseConnection>) -> Result<(), DbErr> {
    match Arc::try_unwrap(conn) {
        Ok(conn) => conn.close().await,
        Err(_) => Ok(()),
    }
}

/// Connects by swapping the database path of an admin URL.
pub struct UrlConnector {
    base: Url,
    timeout: Duration,
}

impl UrlConnector {
    #[must_use]
    pub const fn new(base: Url, timeout: Duration) -> Self {
        Self { base, timeout }
    }
}

#[async_trait]
impl DatabaseConnector for UrlConnector {
    async fn connect(&self, db_name: &str) -> Result<Arc<DatabaseConnection>, DbErr> {
        let url = with_database(&self.base, db_name);

        // One unpooled connection per pass.
        let mut opt = ConnectOptions::new(url.to_string());
        opt.max_connections(1)
            .min_connections(0)
            .connect_timeout(self.timeout)
            .acquire_timeout(self.timeout)
            .sqlx_logging(false);

        Database::connect(opt).await.map(Arc::new)
    }
}

pub struct PostgresClient {
    conn: Option<Arc<DatabaseConnection>>,
    connector: Arc<dyn DatabaseConnector>,
    timeout: Duration,
    metrics: Arc<dyn ProvisioningMetrics>,
}

impl PostgresClient {
    #[must_use]
    pub fn new(
        conn: Arc<DatabaseConnection>,
        connector: Arc<dyn DatabaseConnector>,
        timeout: Duration,
        metrics: Arc<dyn ProvisioningMetrics>,
    ) -> Self {
        Self {
            conn: Some(conn),
            connector,
            timeout,
            metrics,
        }
    }

    fn conn(&self) -> Result<&DatabaseConnection, ProvisionError> {
        self.conn.as_deref().ok_or(ProvisionError::NotConnected)
    }

    async fn bounded<T, F>(&self, category: ErrorCategory, fut: F) -> Result<T, ProvisionError>
    where
        F: Future<Output = Result<T, DbErr>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ProvisionError::backend(category, e)),
            Err(_) => Err(ProvisionError::Timeout { category }),
        }
    }

    async fn exists(&self, sql: &str, name: &str) -> Result<bool, ProvisionError> {
        let conn = self.conn()?;
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [name.into()]);
        let row = self.bounded(ErrorCategory::Read, conn.query_one(stmt)).await?;

        match row {
            Some(row) => row
                .try_get::<bool>("", "exists")
                .map_err(|e| ProvisionError::backend(ErrorCategory::Read, e)),
            None => Ok(false),
        }
    }

    async fn execute(
        &self,
        conn: &DatabaseConnection,
        category: ErrorCategory,
        sql: String,
    ) -> Result<(), ProvisionError> {
        self.bounded(
            category,
            conn.execute(Statement::from_string(DbBackend::Postgres, sql)),
        )
        .await
        .map(|_| ())
    }

    async fn set_group(&self, username: &str, role: &str) -> Result<(), ProvisionError> {
        let conn = self.conn()?;
        self.execute(
            conn,
            ErrorCategory::Grant,
            format!(
                "ALTER ROLE {} SET ROLE TO {}",
                quote_identifier(username),
                quote_identifier(role)
            ),
        )
        .await
    }

    async fn ensure_extensions(&self, db_name: &str) -> Result<(), ProvisionError> {
        let db_conn = self
            .bounded(ErrorCategory::Connect, self.connector.connect(db_name))
            .await?;
        debug!("Connected to {}", db_name);

        let mut result = Ok(());
        for extension in EXTENSIONS {
            let sql = format!(
                "CREATE EXTENSION IF NOT EXISTS {}",
                quote_identifier(extension)
            );
            if let Err(e) = self.execute(&db_conn, ErrorCategory::Extension, sql).await {
                error!(database = db_name, extension, error = %e, "Could not create extension");
                result = Err(e);
                break;
            }
            debug!("Ensured extension {} on {}", extension, db_name);
        }

        if let Err(e) = release(db_conn).await {
            warn!("Failed to close connection to {}: {}", db_name, e);
        }

        result
    }
}

#[async_trait]
impl ProvisioningClient for PostgresClient {
    async fn database_exists(&self, db_name: &str) -> Result<bool, ProvisionError> {
        self.exists(DATABASE_EXISTS, db_name).await
    }

    async fn role_exists(&self, role: &str) -> Result<bool, ProvisionError> {
        self.exists(ROLE_EXISTS, role).await
    }

    async fn user_exists(&self, username: &str) -> Result<bool, ProvisionError> {
        self.exists(USER_EXISTS, username).await
    }

    async fn create_database(&self, db_name: &str) -> Result<bool, ProvisionError> {
        let record = |e: ProvisionError| {
            self.metrics.database_error(e.metric_category());
            e
        };

        let exists = self.database_exists(db_name).await.map_err(record)?;
        let mut created = false;

        if !exists {
            info!("Creating database {}", db_name);
            self.execute(
                self.conn()?,
                ErrorCategory::Create,
                format!("CREATE DATABASE {}", quote_identifier(db_name)),
            )
            .await
            .map_err(|e| {
                error!(database = db_name, error = %e, "Could not create database");
                record(e)
            })?;

            created = true;
            self.metrics.database_created();
            info!("Database {} has been created", db_name);
        }

        self.ensure_extensions(db_name).await.map_err(record)?;

        Ok(created)
    }

    async fn create_group(&self, db_name: &str, role: &str) -> Result<bool, ProvisionError> {
        let start = Instant::now();
        let record = |e: ProvisionError| {
            self.metrics.user_create_error(e.metric_category());
            e
        };

        let exists = self.role_exists(role).await.map_err(record)?;
        let conn = self.conn()?;

        if !exists {
            info!("Creating group role {}", role);
            self.execute(
                conn,
                ErrorCategory::Create,
                format!("CREATE ROLE {} WITH NOLOGIN", quote_identifier(role)),
            )
            .await
            .map_err(|e| {
                error!(role, error = %e, "Could not create role");
                record(e)
            })?;
        }

        // Re-applied on every call so an interrupted creation still gets its grant.
        self.execute(
            conn,
            ErrorCategory::Grant,
            format!(
                "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
                quote_identifier(db_name),
                quote_identifier(role)
            ),
        )
        .await
        .map_err(|e| {
            error!(role, database = db_name, error = %e, "Could not grant privileges");
            record(e)
        })?;

        if !exists {
            self.metrics.role_created(start.elapsed());
            info!("Role {} has been created", role);
        }

        Ok(!exists)
    }

    async fn create_user(
        &self,
        username: &str,
        role: &str,
        password: &str,
    ) -> Result<bool, ProvisionError> {
        let start = Instant::now();
        let record = |e: ProvisionError| {
            self.metrics.user_create_error(e.metric_category());
            e
        };

        if self.user_exists(username).await.map_err(record)? {
            debug!("User {} already exists", username);
            return Ok(false);
        }

        info!("Creating user {}", username);
        self.execute(
            self.conn()?,
            ErrorCategory::Create,
            format!(
                "CREATE ROLE {} WITH ENCRYPTED PASSWORD {} LOGIN IN ROLE {}",
                quote_identifier(username),
                quote_literal(password),
                quote_identifier(role)
            ),
        )
        .await
        .map_err(|e| {
            error!(user = username, error = %e, "Could not create user");
            record(e)
        })?;

        self.set_group(username, role).await.map_err(|e| {
            error!("Could not set role {} to user {}: {}", role, username, e);
            record(e)
        })?;

        self.metrics.user_created(start.elapsed());
        info!("User {} has been created", username);

        Ok(true)
    }

    async fn rename_user(&self, old: &str, new: &str) -> Result<bool, ProvisionError> {
        if !self.role_exists(old).await? {
            debug!("User {} not found, nothing to rename", old);
            return Ok(false);
        }

        info!("Renaming user {} to {}", old, new);
        self.execute(
            self.conn()?,
            ErrorCategory::Rename,
            format!(
                "ALTER USER {} RENAME TO {}",
                quote_identifier(old),
                quote_identifier(new)
            ),
        )
        .await
        .inspect_err(|e| error!("Could not rename user {}: {}", old, e))?;

        Ok(true)
    }

    async fn update_user(
        &self,
        old: &str,
        new: &str,
        role: &str,
        password: &str,
    ) -> Result<bool, ProvisionError> {
        let start = Instant::now();
        let record = |e: ProvisionError| {
            self.metrics.user_update_error(e.metric_category());
            e
        };

        if !self.role_exists(old).await.map_err(record)? {
            debug!("User {} not found, nothing to update", old);
            return Ok(false);
        }

        info!("Updating user {}", old);
        self.rename_user(old, new).await.map_err(record)?;

        self.set_group(new, role).await.map_err(|e| {
            error!("Could not set role {} to user {}: {}", role, new, e);
            record(e)
        })?;

        self.update_password(new, password).await?;

        self.metrics.user_updated(start.elapsed());
        info!("User {} has been updated", new);

        Ok(true)
    }

    async fn update_password(&self, username: &str, password: &str) -> Result<(), ProvisionError> {
        let start = Instant::now();

        if password.is_empty() {
            error!(user = username, "Refusing to set an empty password");
            self.metrics
                .password_rotate_error(ErrorCategory::EmptyPassword);
            return Err(ProvisionError::InvalidCredential);
        }

        info!("Updating password for {}", username);
        let conn = self.conn()?;
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            format!(
                "ALTER ROLE {} WITH ENCRYPTED PASSWORD {}",
                quote_identifier(username),
                quote_literal(password)
            ),
        );

        match tokio::time::timeout(self.timeout, conn.execute(stmt)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if is_duplicate_object(&e) => {
                debug!("Password for {} already in place", username);
            }
            Ok(Err(e)) => {
                error!("Could not alter user {}: {}", username, e);
                self.metrics.password_rotate_error(ErrorCategory::Alter);
                return Err(ProvisionError::backend(ErrorCategory::Alter, e));
            }
            Err(_) => {
                self.metrics.password_rotate_error(ErrorCategory::Alter);
                return Err(ProvisionError::Timeout {
                    category: ErrorCategory::Alter,
                });
            }
        }

        self.metrics.password_rotated(start.elapsed());

        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProvisionError> {
        match self.conn.take() {
            Some(conn) => release(conn)
                .await
                .map_err(|e| ProvisionError::backend(ErrorCategory::Connect, e)),
            None => Err(ProvisionError::NotConnected),
        }
    }
}

/// Matches SQLSTATE `42710` rather than the driver's message text.
fn is_duplicate_object(err: &DbErr) -> bool {
    let (DbErr::Exec(runtime) | DbErr::Query(runtime)) = err else {
        return false;
    };

    match runtime {
        RuntimeErr::SqlxError(sea_orm::sqlx::Error::Database(db_err)) => {
            db_err.code().as_deref() == Some(DUPLICATE_OBJECT)
        }
        _ => false,
    }
}

pub struct PostgresFactory {
    metrics: Arc<dyn ProvisioningMetrics>,
}

impl PostgresFactory {
    #[must_use]
    pub fn new(metrics: Arc<dyn ProvisioningMetrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl ClientFactory for PostgresFactory {
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Box<dyn ProvisioningClient>, ProvisionError> {
        let base = postgres_uri(
            &target.host,
            target.port,
            &target.admin_user,
            &target.admin_password,
            MAINTENANCE_DATABASE,
            &target.sslmode,
        )?;
        let connector = Arc::new(UrlConnector::new(base, target.operation_timeout));

        let conn = match tokio::time::timeout(
            target.operation_timeout,
            connector.connect(MAINTENANCE_DATABASE),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(ProvisionError::backend(ErrorCategory::Connect, e)),
            Err(_) => {
                return Err(ProvisionError::Timeout {
                    category: ErrorCategory::Connect,
                });
            }
        };
        debug!("Connected to {}:{}", target.host, target.port);

        Ok(Box::new(PostgresClient::new(
            conn,
            connector,
            target.operation_timeout,
            Arc::clone(&self.metrics),
        )))
    }
}
