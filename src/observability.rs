//! Provisioning metrics observer.
//!
//! Core code records through an injected [`ProvisioningMetrics`] observer.
//! [`PrometheusMetrics`] forwards to the `metrics` facade, which is backed by
//! the Prometheus recorder installed at startup.

use std::time::Duration;

use crate::dbclient::ErrorCategory;

pub trait ProvisioningMetrics: Send + Sync {
    fn database_created(&self);

    fn database_error(&self, category: ErrorCategory);

    fn role_created(&self, elapsed: Duration);

    fn user_created(&self, elapsed: Duration);

    fn user_create_error(&self, category: ErrorCategory);

    fn user_updated(&self, elapsed: Duration);

    fn user_update_error(&self, category: ErrorCategory);

    fn password_rotated(&self, elapsed: Duration);

    fn password_rotate_error(&self, category: ErrorCategory);

    /// One finished reconcile pass: `ready`, `progress`, `retry` or `failed`.
    fn reconcile_finished(&self, outcome: &'static str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl ProvisioningMetrics for PrometheusMetrics {
    fn database_created(&self) {
        metrics::counter!("dbclaim_databases_created_total").increment(1);
    }

    fn database_error(&self, category: ErrorCategory) {
        metrics::counter!("dbclaim_database_errors_total", "category" => category.as_str())
            .increment(1);
    }

    fn role_created(&self, elapsed: Duration) {
        metrics::counter!("dbclaim_roles_created_total").increment(1);
        metrics::histogram!("dbclaim_role_create_duration_seconds").record(elapsed.as_secs_f64());
    }

    fn user_created(&self, elapsed: Duration) {
        metrics::counter!("dbclaim_users_created_total").increment(1);
        metrics::histogram!("dbclaim_user_create_duration_seconds").record(elapsed.as_secs_f64());
    }

    fn user_create_error(&self, category: ErrorCategory) {
        metrics::counter!("dbclaim_users_created_errors_total", "category" => category.as_str())
            .increment(1);
    }

    fn user_updated(&self, elapsed: Duration) {
        metrics::counter!("dbclaim_users_updated_total").increment(1);
        metrics::histogram!("dbclaim_user_update_duration_seconds").record(elapsed.as_secs_f64());
    }

    fn user_update_error(&self, category: ErrorCategory) {
        metrics::counter!("dbclaim_users_updated_errors_total", "category" => category.as_str())
            .increment(1);
    }

    fn password_rotated(&self, elapsed: Duration) {
        metrics::counter!("dbclaim_passwords_rotated_total").increment(1);
        metrics::histogram!("dbclaim_password_rotate_duration_seconds")
            .record(elapsed.as_secs_f64());
    }

    fn password_rotate_error(&self, category: ErrorCategory) {
        metrics::counter!("dbclaim_password_rotate_errors_total", "category" => category.as_str())
            .increment(1);
    }

    fn reconcile_finished(&self, outcome: &'static str) {
        metrics::counter!("dbclaim_reconcile_total", "outcome" => outcome).increment(1);
    }
}

/// Counts events in memory.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    events: std::sync::Mutex<Vec<String>>,
}

impl RecordingMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }
}

impl ProvisioningMetrics for RecordingMetrics {
    fn database_created(&self) {
        self.push("database_created".to_string());
    }

    fn database_error(&self, category: ErrorCategory) {
        self.push(format!("database_error:{category}"));
    }

    fn role_created(&self, _elapsed: Duration) {
        self.push("role_created".to_string());
    }

    fn user_created(&self, _elapsed: Duration) {
        self.push("user_created".to_string());
    }

    fn user_create_error(&self, category: ErrorCategory) {
        self.push(format!("user_create_error:{category}"));
    }

    fn user_updated(&self, _elapsed: Duration) {
        self.push("user_updated".to_string());
    }

    fn user_update_error(&self, category: ErrorCategory) {
        self.push(format!("user_update_error:{category}"));
    }

    fn password_rotated(&self, _elapsed: Duration) {
        self.push("password_rotated".to_string());
    }

    fn password_rotate_error(&self, category: ErrorCategory) {
        self.push(format!("password_rotate_error:{category}"));
    }

    fn reconcile_finished(&self, outcome: &'static str) {
        self.push(format!("reconcile:{outcome}"));
    }
}
