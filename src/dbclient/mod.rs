//! Idempotent provisioning of databases, group roles and login users.
//!
//! Every mutating operation checks the server catalog before acting, so a
//! call is safe to repeat against a server that already reflects it. Errors
//! are returned to the caller without internal retries.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::claim::{ClaimSpec, EngineType};
use crate::observability::ProvisioningMetrics;

pub mod conn;
pub mod postgres;

pub use postgres::{PostgresClient, PostgresFactory};

/// Failure category reported to metrics and claim status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Connect,
    Read,
    Create,
    Grant,
    Alter,
    Rename,
    Extension,
    EmptyPassword,
}

impl ErrorCategory {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect error",
            Self::Read => "read error",
            Self::Create => "create error",
            Self::Grant => "grant error",
            Self::Alter => "alter error",
            Self::Rename => "rename error",
            Self::Extension => "extension error",
            Self::EmptyPassword => "empty password",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Timed out ({category})")]
    Timeout { category: ErrorCategory },

    #[error("{category}: {message}")]
    Backend {
        category: ErrorCategory,
        message: String,
    },

    #[error("Invalid credential: an empty password")]
    InvalidCredential,

    #[error("Connection was never established")]
    NotConnected,

    #[error("Invalid connection target: {0}")]
    InvalidTarget(String),
}

impl ProvisionError {
    pub fn backend(category: ErrorCategory, err: impl fmt::Display) -> Self {
        Self::Backend {
            category,
            message: err.to_string(),
        }
    }

    /// Whether a later pass may succeed without a claim change.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Backend { .. } | Self::NotConnected)
    }

    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Backend { category, .. } => category.as_str(),
            Self::InvalidCredential => ErrorCategory::EmptyPassword.as_str(),
            Self::NotConnected => ErrorCategory::Connect.as_str(),
            Self::InvalidTarget(_) => "invalid target",
        }
    }

    /// Category used for metric labels.
    #[must_use]
    pub const fn metric_category(&self) -> ErrorCategory {
        match self {
            Self::Timeout { category } | Self::Backend { category, .. } => *category,
            Self::InvalidCredential => ErrorCategory::EmptyPassword,
            Self::NotConnected | Self::InvalidTarget(_) => ErrorCategory::Connect,
        }
    }
}

/// Server-side operations one backend engine must provide.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    async fn database_exists(&self, db_name: &str) -> Result<bool, ProvisionError>;

    async fn role_exists(&self, role: &str) -> Result<bool, ProvisionError>;

    /// Whether a role with `LOGIN` named `username` exists.
    async fn user_exists(&self, username: &str) -> Result<bool, ProvisionError>;

    /// Creates the database when absent and ensures the required extensions
    /// on every call. Returns whether the database was created.
    async fn create_database(&self, db_name: &str) -> Result<bool, ProvisionError>;

    /// Creates a non-login group role with full privileges on `db_name`.
    async fn create_group(&self, db_name: &str, role: &str) -> Result<bool, ProvisionError>;

    /// Creates a login user in `role`. An existing user is left untouched,
    /// including its password.
    async fn create_user(
        &self,
        username: &str,
        role: &str,
        password: &str,
    ) -> Result<bool, ProvisionError>;

    /// Renames `old` to `new`; a missing `old` is treated as already renamed.
    async fn rename_user(&self, old: &str, new: &str) -> Result<bool, ProvisionError>;

    /// Rename, re-bind role, then set the password, strictly in that order.
    async fn update_user(
        &self,
        old: &str,
        new: &str,
        role: &str,
        password: &str,
    ) -> Result<bool, ProvisionError>;

    async fn update_password(&self, username: &str, password: &str) -> Result<(), ProvisionError>;

    /// Releases the server connection.
    async fn close(&mut self) -> Result<(), ProvisionError>;
}

/// Admin endpoint a client connects to for one reconcile pass.
#[derive(Clone)]
pub struct ConnectionTarget {
    pub engine: EngineType,
    pub host: String,
    pub port: u16,
    pub admin_user: String,
    pub admin_password: String,
    pub sslmode: String,
    /// Deadline applied to each statement.
    pub operation_timeout: Duration,
}

impl ConnectionTarget {
    #[must_use]
    pub fn for_claim(
        spec: &ClaimSpec,
        admin_user: &str,
        admin_password: &str,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            engine: spec.engine,
            host: spec.host.clone(),
            port: spec.port,
            admin_user: admin_user.to_string(),
            admin_password: admin_password.to_string(),
            sslmode: spec.sslmode.clone(),
            operation_timeout,
        }
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("admin_user", &self.admin_user)
            .field("sslmode", &self.sslmode)
            .finish_non_exhaustive()
    }
}

/// Opens a [`ProvisioningClient`] for a target.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Box<dyn ProvisioningClient>, ProvisionError>;
}

/// Dispatches on [`EngineType`]; new engines become new match arms.
pub struct EngineFactory {
    postgres: PostgresFactory,
}

impl EngineFactory {
    #[must_use]
    pub fn new(metrics: Arc<dyn ProvisioningMetrics>) -> Self {
        Self {
            postgres: PostgresFactory::new(metrics),
        }
    }
}

#[async_trait]
impl ClientFactory for EngineFactory {
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Box<dyn ProvisioningClient>, ProvisionError> {
        match target.engine {
            EngineType::Postgres => self.postgres.connect(target).await,
        }
    }
}
