//! One reconcile pass per call: observe, pick one action, execute it, record
//! the outcome and decide when the claim should be looked at again.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::evaluator::{Action, DesiredState, Observed, active_username, evaluate};
use crate::dbclient::{ClientFactory, ConnectionTarget, ProvisionError, ProvisioningClient};
use crate::models::claim::{Claim, ClaimKey, ClaimStatus, Credential, Phase};
use crate::observability::ProvisioningMetrics;
use crate::password::{PasswordConfig, PasswordPolicy, PolicyError, generate_password};
use crate::services::{ClaimStatusStore, SecretError, SecretPayload, SecretSink, StatusError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Secret store error: {0}")]
    Secret(#[from] SecretError),

    #[error("Status store error: {0}")]
    Status(#[from] StatusError),

    #[error("Cannot rename user {from} to {to}: both users exist")]
    UserConflict { from: String, to: String },
}

impl ReconcileError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Policy(_) | Self::UserConflict { .. } => false,
            Self::Provision(e) => e.is_transient(),
            Self::Secret(_) | Self::Status(_) => true,
        }
    }

    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Policy(PolicyError::Violation(_)) => "policy violation",
            Self::Policy(PolicyError::Invalid(_)) => "invalid policy",
            Self::Provision(e) => e.category(),
            Self::Secret(_) => "secret error",
            Self::Status(_) => "status error",
            Self::UserConflict { .. } => "user conflict",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Immediately,
    After(Duration),
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub phase: Phase,
    /// Action chosen this pass, when evaluation got that far.
    pub action: Option<Action>,
    pub requeue: Requeue,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ReconcilerSettings {
    pub admin_user: String,
    pub admin_password: String,
    pub operation_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Periodic drift check for `Ready` claims.
    pub resync_interval: Option<Duration>,
    /// Applied when a claim carries no `passwordConfig` of its own.
    pub password_config: PasswordConfig,
}

pub struct Reconciler {
    factory: Arc<dyn ClientFactory>,
    statuses: Arc<dyn ClaimStatusStore>,
    secrets: Arc<dyn SecretSink>,
    metrics: Arc<dyn ProvisioningMetrics>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        statuses: Arc<dyn ClaimStatusStore>,
        secrets: Arc<dyn SecretSink>,
        metrics: Arc<dyn ProvisioningMetrics>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            factory,
            statuses,
            secrets,
            metrics,
            settings,
        }
    }

    pub fn policy_for(&self, claim: &Claim) -> Result<PasswordPolicy, PolicyError> {
        let config = claim
            .spec
            .password_config
            .as_ref()
            .unwrap_or(&self.settings.password_config);
        let policy = PasswordPolicy::try_from(config)?;
        policy.check()?;
        Ok(policy)
    }

    /// Delay before retry number `failures` (1-based), doubling up to the cap.
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        self.settings
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.settings.backoff_max)
    }

    pub async fn reconcile(&self, claim: &Claim) -> ReconcileOutcome {
        let pass_id = Uuid::new_v4();
        let span = info_span!("reconcile", claim = %claim.key, pass_id = %pass_id);

        async move {
            let start = Instant::now();

            let mut status = match self.statuses.load_status(&claim.key).await {
                Ok(status) => status.unwrap_or_default(),
                Err(e) => {
                    warn!("Could not load status: {}", e);
                    self.metrics.reconcile_finished("retry");
                    return ReconcileOutcome {
                        phase: Phase::Pending,
                        action: None,
                        requeue: Requeue::After(self.backoff(1)),
                        error: Some(e.to_string()),
                    };
                }
            };

            let result = self.run_pass(claim, &mut status).await;
            let outcome = self.settle(&claim.key, &mut status, result).await;

            let label = match (&outcome.phase, &outcome.requeue) {
                (Phase::Ready, _) => "ready",
                (Phase::Failed, _) => "failed",
                (_, Requeue::Immediately) => "progress",
                _ => "retry",
            };
            self.metrics.reconcile_finished(label);

            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            info!(
                event = "reconcile_finished",
                phase = %outcome.phase,
                action = outcome.action.as_ref().map_or("none", Action::name),
                requeue = ?outcome.requeue,
                duration_ms = duration_ms,
                outcome = label,
                "Reconcile pass finished"
            );

            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_pass(
        &self,
        claim: &Claim,
        status: &mut ClaimStatus,
    ) -> Result<Action, ReconcileError> {
        status.last_action = Some("Evaluate".to_string());

        let policy = self.policy_for(claim)?;
        let desired = DesiredState {
            database_name: claim.spec.database_name.clone(),
            username: claim.spec.username.clone(),
            role: claim.spec.role_name(),
            rotation_period: policy.rotation_period(),
        };

        let target = ConnectionTarget::for_claim(
            &claim.spec,
            &self.settings.admin_user,
            &self.settings.admin_password,
            self.settings.operation_timeout,
        );
        let mut client = self.factory.connect(&target).await?;

        let result = self
            .observe_and_act(client.as_ref(), claim, &desired, &policy, status)
            .await;

        if let Err(e) = client.close().await {
            warn!("Failed to close connection to {}: {}", claim.spec.host, e);
        }

        result
    }

    async fn observe_and_act(
        &self,
        client: &dyn ProvisioningClient,
        claim: &Claim,
        desired: &DesiredState,
        policy: &PasswordPolicy,
        status: &mut ClaimStatus,
    ) -> Result<Action, ReconcileError> {
        let observed = observe(client, desired, status).await?;
        debug!(?observed, "Observed server state");

        let action = evaluate(desired, status, &observed, Utc::now());
        if action.is_done() {
            return Ok(action);
        }
        if let Action::Conflict { from } = &action {
            return Err(ReconcileError::UserConflict {
                from: from.clone(),
                to: desired.username.clone(),
            });
        }

        info!("Next action: {}", action);
        status.last_action = Some(action.name().to_string());
        if status.phase == Phase::Ready {
            // Drift or a rotation deadline sends a settled claim back through Pending.
            status.phase = Phase::Pending;
            status.updated_at = Some(Utc::now());
            self.statuses.report_status(&claim.key, status).await?;
        }
        if status.phase != Phase::Provisioning {
            status.phase = Phase::Provisioning;
            status.updated_at = Some(Utc::now());
            self.statuses.report_status(&claim.key, status).await?;
        }

        self.execute(client, claim, desired, policy, &action, status)
            .await?;

        Ok(action)
    }

    async fn execute(
        &self,
        client: &dyn ProvisioningClient,
        claim: &Claim,
        desired: &DesiredState,
        policy: &PasswordPolicy,
        action: &Action,
        status: &mut ClaimStatus,
    ) -> Result<(), ReconcileError> {
        match action {
            Action::CreateDatabase => {
                client.create_database(&desired.database_name).await?;
            }
            Action::CreateGroup => {
                client
                    .create_group(&desired.database_name, &desired.role)
                    .await?;
            }
            Action::CreateUser => {
                let password = generate_password(policy)?;
                let created = client
                    .create_user(&desired.username, &desired.role, &password)
                    .await?;
                if !created {
                    // Appeared since observation; make the minted password authoritative.
                    client.update_password(&desired.username, &password).await?;
                }
                self.publish(claim, desired, status, password).await?;
            }
            Action::RotateUser { from } => {
                let password = generate_password(policy)?;
                let updated = client
                    .update_user(from, &desired.username, &desired.role, &password)
                    .await?;
                if !updated {
                    client.update_password(&desired.username, &password).await?;
                }
                self.publish(claim, desired, status, password).await?;
            }
            Action::UpdatePassword => {
                let password = generate_password(policy)?;
                client.update_password(&desired.username, &password).await?;
                self.publish(claim, desired, status, password).await?;
            }
            Action::Conflict { .. } | Action::Done { .. } => {}
        }

        Ok(())
    }

    async fn publish(
        &self,
        claim: &Claim,
        desired: &DesiredState,
        status: &mut ClaimStatus,
        password: String,
    ) -> Result<(), ReconcileError> {
        let credential = Credential {
            username: desired.username.clone(),
            password,
            role: desired.role.clone(),
            version: status.credential_version + 1,
            rotated_at: Utc::now(),
        };

        let payload = SecretPayload::new(&claim.key, &claim.spec, &credential)?;
        self.secrets.store_credential(&payload).await?;

        info!(
            user = %credential.username,
            version = credential.version,
            "Published credential"
        );

        status.active_username = Some(credential.username);
        status.credential_version = credential.version;
        status.last_rotated_at = Some(credential.rotated_at);

        Ok(())
    }

    async fn settle(
        &self,
        key: &ClaimKey,
        status: &mut ClaimStatus,
        result: Result<Action, ReconcileError>,
    ) -> ReconcileOutcome {
        let now = Utc::now();
        status.updated_at = Some(now);

        let mut outcome = match result {
            Ok(action) => {
                status.last_error = None;
                status.error_category = None;
                status.consecutive_failures = 0;

                if let Action::Done { next_rotation } = action {
                    status.phase = Phase::Ready;
                    status.last_action = Some(action.name().to_string());
                    ReconcileOutcome {
                        phase: Phase::Ready,
                        requeue: self.ready_requeue(next_rotation, now),
                        action: Some(action),
                        error: None,
                    }
                } else {
                    status.phase = Phase::Provisioning;
                    ReconcileOutcome {
                        phase: Phase::Provisioning,
                        action: Some(action),
                        requeue: Requeue::Immediately,
                        error: None,
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                status.last_error = Some(message.clone());
                status.error_category = Some(e.category().to_string());

                if e.is_transient() {
                    status.phase = Phase::Pending;
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    let delay = self.backoff(status.consecutive_failures);
                    warn!(
                        category = e.category(),
                        failures = status.consecutive_failures,
                        "Transient failure, retrying in {:?}: {}",
                        delay,
                        message
                    );
                    ReconcileOutcome {
                        phase: Phase::Pending,
                        action: None,
                        requeue: Requeue::After(delay),
                        error: Some(message),
                    }
                } else {
                    status.phase = Phase::Failed;
                    error!(category = e.category(), "Claim failed: {}", message);
                    ReconcileOutcome {
                        phase: Phase::Failed,
                        action: None,
                        requeue: Requeue::Never,
                        error: Some(message),
                    }
                }
            }
        };

        if let Err(e) = self.statuses.report_status(key, status).await {
            warn!("Could not report status: {}", e);
            if outcome.phase != Phase::Failed {
                outcome.phase = Phase::Pending;
                outcome.requeue =
                    Requeue::After(self.backoff(status.consecutive_failures.saturating_add(1)));
            }
        }

        outcome
    }

    fn ready_requeue(&self, next_rotation: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Requeue {
        let until_rotation =
            next_rotation.map(|deadline| (deadline - now).to_std().unwrap_or_default());

        match (until_rotation, self.settings.resync_interval) {
            (Some(rotation), Some(resync)) => Requeue::After(rotation.min(resync)),
            (Some(delay), None) | (None, Some(delay)) => Requeue::After(delay),
            (None, None) => Requeue::Never,
        }
    }
}

async fn observe(
    client: &dyn ProvisioningClient,
    desired: &DesiredState,
    status: &ClaimStatus,
) -> Result<Observed, ProvisionError> {
    let database_exists = client.database_exists(&desired.database_name).await?;
    let role_exists = client.role_exists(&desired.role).await?;

    let active = active_username(desired, status);
    let active_user_exists = client.user_exists(active).await?;
    let desired_user_exists = if active == desired.username {
        active_user_exists
    } else {
        client.user_exists(&desired.username).await?
    };

    Ok(Observed {
        database_exists,
        role_exists,
        active_user_exists,
        desired_user_exists,
    })
}
