//! Decides the next provisioning action for a claim.
//!
//! [`evaluate`] is a pure function of the desired state, the recorded status
//! and what the server reports. Nothing about past actions is persisted, so
//! recovering from a crash at any point is just another evaluation.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::models::claim::ClaimStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub database_name: String,
    pub username: String,
    pub role: String,
    /// `None` disables age-based rotation.
    pub rotation_period: Option<Duration>,
}

/// Server facts gathered through the provisioning client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observed {
    pub database_exists: bool,
    pub role_exists: bool,
    /// Login user recorded in status (or the desired one when none is recorded).
    pub active_user_exists: bool,
    pub desired_user_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreateDatabase,
    CreateGroup,
    CreateUser,
    /// Rename `from` to the desired username with a fresh password.
    RotateUser { from: String },
    /// `from` and the desired user both exist; renaming cannot proceed.
    Conflict { from: String },
    UpdatePassword,
    Done { next_rotation: Option<DateTime<Utc>> },
}

impl Action {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateDatabase => "CreateDatabase",
            Self::CreateGroup => "CreateGroup",
            Self::CreateUser => "CreateUser",
            Self::RotateUser { .. } => "RotateUser",
            Self::Conflict { .. } => "Conflict",
            Self::UpdatePassword => "UpdatePassword",
            Self::Done { .. } => "Done",
        }
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// Whether executing the action mints a new credential.
    #[must_use]
    pub const fn mints_credential(&self) -> bool {
        matches!(
            self,
            Self::CreateUser | Self::RotateUser { .. } | Self::UpdatePassword
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Username whose existence decides between create, rotate and rename.
#[must_use]
pub fn active_username<'a>(desired: &'a DesiredState, status: &'a ClaimStatus) -> &'a str {
    status
        .active_username
        .as_deref()
        .unwrap_or(&desired.username)
}

#[must_use]
pub fn evaluate(
    desired: &DesiredState,
    status: &ClaimStatus,
    observed: &Observed,
    now: DateTime<Utc>,
) -> Action {
    if !observed.database_exists {
        return Action::CreateDatabase;
    }

    if !observed.role_exists {
        return Action::CreateGroup;
    }

    if !observed.active_user_exists && !observed.desired_user_exists {
        return Action::CreateUser;
    }

    let active = active_username(desired, status);
    if active != desired.username {
        if observed.active_user_exists && observed.desired_user_exists {
            return Action::Conflict {
                from: active.to_string(),
            };
        }
        if observed.active_user_exists {
            return Action::RotateUser {
                from: active.to_string(),
            };
        }
        // The rename landed but its credential was never recorded.
        return Action::UpdatePassword;
    }

    let Some(rotated_at) = status.last_rotated_at else {
        // A user we never minted a password for.
        return Action::UpdatePassword;
    };

    let next_rotation = desired
        .rotation_period
        .and_then(|period| chrono::Duration::from_std(period).ok())
        .and_then(|period| rotated_at.checked_add_signed(period));

    match next_rotation {
        Some(deadline) if now >= deadline => Action::UpdatePassword,
        _ => Action::Done { next_rotation },
    }
}
