//! In-memory database server and collaborators for reconcile tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dbclaim::constants::postgres::EXTENSIONS;
use dbclaim::db::Store;
use dbclaim::dbclient::{
    ClientFactory, ConnectionTarget, ErrorCategory, ProvisionError, ProvisioningClient,
};
use dbclaim::models::claim::{Claim, ClaimKey, ClaimSpec, ClaimStatus, EngineType, Phase};
use dbclaim::observability::RecordingMetrics;
use dbclaim::password::PasswordConfig;
use dbclaim::reconcile::{Reconciler, ReconcilerSettings};
use dbclaim::services::{
    ClaimStatusStore, SeaOrmStatusStore, SecretError, SecretPayload, SecretSink, StatusError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeUser {
    pub password: String,
    pub group: String,
}

#[derive(Debug, Default)]
pub struct Catalog {
    /// Database name to installed extensions.
    pub databases: HashMap<String, HashSet<String>>,
    pub groups: HashSet<String>,
    /// `(database, group)` pairs holding full privileges.
    pub grants: HashSet<(String, String)>,
    pub users: HashMap<String, FakeUser>,
    pub connects: usize,
    pub closes: usize,
    /// Connection attempts still to be refused.
    pub refuse_connects: usize,
    /// Report every database as missing, so a claim never converges.
    pub hide_databases: bool,
}

impl Catalog {
    fn role_exists(&self, role: &str) -> bool {
        self.groups.contains(role) || self.users.contains_key(role)
    }
}

#[derive(Clone, Default)]
pub struct FakeServer {
    pub catalog: Arc<Mutex<Catalog>>,
}

impl FakeServer {
    pub fn catalog(&self) -> std::sync::MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap()
    }
}

#[async_trait]
impl ClientFactory for FakeServer {
    async fn connect(
        &self,
        _target: &ConnectionTarget,
    ) -> Result<Box<dyn ProvisioningClient>, ProvisionError> {
        let mut catalog = self.catalog();
        if catalog.refuse_connects > 0 {
            catalog.refuse_connects -= 1;
            return Err(ProvisionError::backend(
                ErrorCategory::Connect,
                "connection refused",
            ));
        }
        catalog.connects += 1;

        Ok(Box::new(FakeClient {
            catalog: Arc::clone(&self.catalog),
            closed: false,
        }))
    }
}

pub struct FakeClient {
    catalog: Arc<Mutex<Catalog>>,
    closed: bool,
}

impl FakeClient {
    fn catalog(&self) -> std::sync::MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap()
    }
}

#[async_trait]
impl ProvisioningClient for FakeClient {
    async fn database_exists(&self, db_name: &str) -> Result<bool, ProvisionError> {
        let catalog = self.catalog();
        Ok(!catalog.hide_databases && catalog.databases.contains_key(db_name))
    }

    async fn role_exists(&self, role: &str) -> Result<bool, ProvisionError> {
        Ok(self.catalog().role_exists(role))
    }

    async fn user_exists(&self, username: &str) -> Result<bool, ProvisionError> {
        Ok(self.catalog().users.contains_key(username))
    }

    async fn create_database(&self, db_name: &str) -> Result<bool, ProvisionError> {
        let mut catalog = self.catalog();
        let created = !catalog.databases.contains_key(db_name);
        let extensions = catalog.databases.entry(db_name.to_string()).or_default();
        for extension in EXTENSIONS {
            extensions.insert((*extension).to_string());
        }
        Ok(created)
    }

    async fn create_group(&self, db_name: &str, role: &str) -> Result<bool, ProvisionError> {
        let mut catalog = self.catalog();
        let created = catalog.groups.insert(role.to_string());
        catalog
            .grants
            .insert((db_name.to_string(), role.to_string()));
        Ok(created)
    }

    async fn create_user(
        &self,
        username: &str,
        role: &str,
        password: &str,
    ) -> Result<bool, ProvisionError> {
        let mut catalog = self.catalog();
        if catalog.users.contains_key(username) {
            return Ok(false);
        }
        catalog.users.insert(
            username.to_string(),
            FakeUser {
                password: password.to_string(),
                group: role.to_string(),
            },
        );
        Ok(true)
    }

    async fn rename_user(&self, old: &str, new: &str) -> Result<bool, ProvisionError> {
        let mut catalog = self.catalog();
        match catalog.users.remove(old) {
            Some(user) => {
                catalog.users.insert(new.to_string(), user);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_user(
        &self,
        old: &str,
        new: &str,
        role: &str,
        password: &str,
    ) -> Result<bool, ProvisionError> {
        if !self.rename_user(old, new).await? {
            return Ok(false);
        }
        if let Some(user) = self.catalog().users.get_mut(new) {
            user.group = role.to_string();
        }
        self.update_password(new, password).await?;
        Ok(true)
    }

    async fn update_password(&self, username: &str, password: &str) -> Result<(), ProvisionError> {
        if password.is_empty() {
            return Err(ProvisionError::InvalidCredential);
        }
        let mut catalog = self.catalog();
        let user = catalog.users.get_mut(username).ok_or_else(|| {
            ProvisionError::backend(
                ErrorCategory::Alter,
                format!("role \"{username}\" does not exist"),
            )
        })?;
        user.password = password.to_string();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProvisionError> {
        if self.closed {
            return Err(ProvisionError::NotConnected);
        }
        self.closed = true;
        self.catalog().closes += 1;
        Ok(())
    }
}

/// Keeps every payload it accepts; can be switched to reject writes.
#[derive(Default)]
pub struct RecordingSink {
    pub payloads: Mutex<Vec<SecretPayload>>,
    pub reject: AtomicBool,
}

impl RecordingSink {
    pub fn latest(&self) -> Option<SecretPayload> {
        self.payloads.lock().unwrap().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecretSink for RecordingSink {
    async fn store_credential(&self, payload: &SecretPayload) -> Result<(), SecretError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SecretError::Rejected("secret store unavailable".to_string()));
        }
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Persists through the real store and remembers every reported phase.
pub struct PhaseLog {
    inner: SeaOrmStatusStore,
    pub phases: Mutex<Vec<Phase>>,
}

impl PhaseLog {
    pub fn take(&self) -> Vec<Phase> {
        std::mem::take(&mut *self.phases.lock().unwrap())
    }
}

#[async_trait]
impl ClaimStatusStore for PhaseLog {
    async fn load_status(&self, key: &ClaimKey) -> Result<Option<ClaimStatus>, StatusError> {
        self.inner.load_status(key).await
    }

    async fn report_status(
        &self,
        key: &ClaimKey,
        status: &ClaimStatus,
    ) -> Result<(), StatusError> {
        self.phases.lock().unwrap().push(status.phase);
        self.inner.report_status(key, status).await
    }

    async fn list_statuses(&self) -> Result<Vec<(ClaimKey, ClaimStatus)>, StatusError> {
        self.inner.list_statuses().await
    }
}

pub struct Harness {
    pub server: FakeServer,
    pub store: Store,
    pub statuses: Arc<PhaseLog>,
    pub secrets: Arc<RecordingSink>,
    pub metrics: Arc<RecordingMetrics>,
    pub reconciler: Arc<Reconciler>,
}

pub fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        admin_user: "postgres".to_string(),
        admin_password: "admin-secret".to_string(),
        operation_timeout: Duration::from_secs(5),
        backoff_base: Duration::from_millis(100),
        backoff_max: Duration::from_millis(350),
        resync_interval: Some(Duration::from_secs(300)),
        password_config: PasswordConfig::default(),
    }
}

pub async fn harness() -> Harness {
    harness_with(settings()).await
}

pub async fn harness_with(settings: ReconcilerSettings) -> Harness {
    let db_path =
        std::env::temp_dir().join(format!("dbclaim-reconcile-test-{}.db", uuid::Uuid::new_v4()));
    let store = Store::new(&format!("sqlite:{}", db_path.display()))
        .await
        .expect("failed to open store");

    let server = FakeServer::default();
    let secrets = Arc::new(RecordingSink::default());
    let metrics = Arc::new(RecordingMetrics::new());
    let statuses = Arc::new(PhaseLog {
        inner: SeaOrmStatusStore::new(store.clone()),
        phases: Mutex::new(Vec::new()),
    });

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(server.clone()),
        statuses.clone(),
        secrets.clone(),
        metrics.clone(),
        settings,
    ));

    Harness {
        server,
        store,
        statuses,
        secrets,
        metrics,
        reconciler,
    }
}

pub fn claim(username: &str, password_config: Option<PasswordConfig>) -> Claim {
    Claim {
        key: ClaimKey::new("default", "tenant1"),
        spec: ClaimSpec {
            engine: EngineType::Postgres,
            host: "db.internal".to_string(),
            port: 5432,
            database_name: "tenant1".to_string(),
            username: username.to_string(),
            role: Some("app1_role".to_string()),
            sslmode: "require".to_string(),
            password_config,
        },
    }
}

pub fn complex(min_length: &str) -> PasswordConfig {
    PasswordConfig {
        password_complexity: "enabled".to_string(),
        min_password_length: min_length.to_string(),
        password_rotation_period: "60".to_string(),
    }
}
