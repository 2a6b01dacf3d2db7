use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::postgres::{DEFAULT_PORT, DEFAULT_SSLMODE};
use crate::password::PasswordConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimKey {
    pub namespace: String,
    pub name: String,
}

impl ClaimKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    #[default]
    Postgres,
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

/// Desired state of a tenant database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSpec {
    #[serde(default)]
    pub engine: EngineType,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub database_name: String,

    pub username: String,

    /// Group role; `<username>_role` when omitted.
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default = "default_sslmode")]
    pub sslmode: String,

    /// Overrides the global `passwordConfig` for this claim.
    #[serde(default, rename = "passwordConfig")]
    pub password_config: Option<PasswordConfig>,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_sslmode() -> String {
    DEFAULT_SSLMODE.to_string()
}

impl ClaimSpec {
    #[must_use]
    pub fn role_name(&self) -> String {
        self.role
            .clone()
            .unwrap_or_else(|| format!("{}_role", self.username))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(flatten)]
    pub key: ClaimKey,

    #[serde(flatten)]
    pub spec: ClaimSpec,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Pending,
    Provisioning,
    Ready,
    Failed,
}

impl Phase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Provisioning => "Provisioning",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Provisioning" => Ok(Self::Provisioning),
            "Ready" => Ok(Self::Ready),
            "Failed" => Ok(Self::Failed),
            other => anyhow::bail!("Unknown claim phase '{other}'"),
        }
    }
}

/// Observed progress of a claim, written only by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimStatus {
    pub phase: Phase,

    /// Login user currently holding the published credential.
    pub active_username: Option<String>,

    pub credential_version: u64,

    pub last_rotated_at: Option<DateTime<Utc>>,

    pub last_action: Option<String>,

    pub last_error: Option<String>,

    pub error_category: Option<String>,

    pub consecutive_failures: u32,

    pub updated_at: Option<DateTime<Utc>>,
}

/// A freshly minted login credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub role: String,
    pub version: u64,
    pub rotated_at: DateTime<Utc>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .field("version", &self.version)
            .field("rotated_at", &self.rotated_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_from_toml_defaults() {
        let claim: Claim = toml::from_str(
            r#"
            namespace = "default"
            name = "tenant1"
            host = "db.internal"
            database_name = "tenant1"
            username = "app1"
            "#,
        )
        .unwrap();

        assert_eq!(claim.key, ClaimKey::new("default", "tenant1"));
        assert_eq!(claim.spec.engine, EngineType::Postgres);
        assert_eq!(claim.spec.port, 5432);
        assert_eq!(claim.spec.sslmode, "require");
        assert_eq!(claim.spec.role_name(), "app1_role");
        assert!(claim.spec.password_config.is_none());
    }

    #[test]
    fn test_claim_password_override() {
        let claim: Claim = toml::from_str(
            r#"
            namespace = "default"
            name = "tenant1"
            host = "db.internal"
            database_name = "tenant1"
            username = "app1"
            role = "owners"

            [passwordConfig]
            passwordComplexity = "disabled"
            minPasswordLength = "15"
            passwordRotationPeriod = "7"
            "#,
        )
        .unwrap();

        assert_eq!(claim.spec.role_name(), "owners");
        let config = claim.spec.password_config.unwrap();
        assert_eq!(config.password_complexity, "disabled");
        assert_eq!(config.password_rotation_period, "7");
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let credential = Credential {
            username: "app1".to_string(),
            password: "hunter2".to_string(),
            role: "app1_role".to_string(),
            version: 1,
            rotated_at: Utc::now(),
        };
        assert!(!format!("{credential:?}").contains("hunter2"));
    }

    #[test]
    fn test_phase_round_trip_strings() {
        for phase in [Phase::Pending, Phase::Provisioning, Phase::Ready, Phase::Failed] {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
    }
}
