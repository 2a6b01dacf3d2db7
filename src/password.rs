//! Password generation under a configurable complexity policy.
//!
//! Only generators implementing [`CryptoRng`] are accepted, so a weak source
//! cannot satisfy the character-class guarantees.

use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::constants::password::{
    DEFAULT_MIN_PASSWORD_LEN, DEFAULT_PASSWORD_LEN, DEFAULT_ROTATION_PERIOD_DAYS,
    MAX_PASSWORD_LEN, MIN_COMPLEX_PASSWORD_LEN,
};

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
// No quote, backslash or space: generated passwords never need escaping.
const SYMBOLS: &[u8] = b"!#$%&()*+,-./:;<=>?@[]^_{|}~";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Password policy violation: {0}")]
    Violation(String),

    #[error("Invalid password configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Enabled,
    Disabled,
}

/// Raw `passwordConfig` keys as they appear in configuration.
///
/// Numeric keys are accepted either as integers or as string-encoded integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordConfig {
    pub password_complexity: String,

    #[serde(deserialize_with = "string_or_number")]
    pub min_password_length: String,

    #[serde(deserialize_with = "string_or_number")]
    pub password_rotation_period: String,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            password_complexity: "enabled".to_string(),
            min_password_length: DEFAULT_MIN_PASSWORD_LEN.to_string(),
            password_rotation_period: DEFAULT_ROTATION_PERIOD_DAYS.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(i) => i.to_string(),
    })
}

/// Validated password policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub complexity: Complexity,
    pub min_length: usize,
    /// Days between rotations; `0` disables age-based rotation.
    pub rotation_period_days: u32,
}

impl PasswordPolicy {
    #[must_use]
    pub const fn rotation_period(&self) -> Option<Duration> {
        if self.rotation_period_days == 0 {
            None
        } else {
            Some(Duration::from_secs(self.rotation_period_days as u64 * 24 * 60 * 60))
        }
    }

    /// Fails when the policy cannot produce a conforming password.
    pub fn check(&self) -> Result<(), PolicyError> {
        if self.complexity == Complexity::Enabled && self.min_length < MIN_COMPLEX_PASSWORD_LEN {
            return Err(PolicyError::Violation(format!(
                "minPasswordLength {} cannot hold one uppercase, lowercase, digit and symbol (need at least {MIN_COMPLEX_PASSWORD_LEN})",
                self.min_length
            )));
        }
        if self.complexity == Complexity::Enabled && self.min_length > MAX_PASSWORD_LEN {
            return Err(PolicyError::Violation(format!(
                "minPasswordLength {} exceeds the maximum of {MAX_PASSWORD_LEN}",
                self.min_length
            )));
        }
        Ok(())
    }

    /// Length of passwords produced under this policy.
    #[must_use]
    pub const fn generated_length(&self) -> usize {
        match self.complexity {
            Complexity::Enabled => self.min_length,
            Complexity::Disabled => DEFAULT_PASSWORD_LEN,
        }
    }
}

impl TryFrom<&PasswordConfig> for PasswordPolicy {
    type Error = PolicyError;

    fn try_from(config: &PasswordConfig) -> Result<Self, Self::Error> {
        let complexity = match config.password_complexity.trim() {
            "enabled" => Complexity::Enabled,
            "disabled" => Complexity::Disabled,
            other => {
                return Err(PolicyError::Invalid(format!(
                    "passwordComplexity must be 'enabled' or 'disabled', got '{other}'"
                )));
            }
        };

        let min_length = config.min_password_length.trim().parse().map_err(|_| {
            PolicyError::Invalid(format!(
                "minPasswordLength is not a non-negative integer: '{}'",
                config.min_password_length
            ))
        })?;

        let rotation_period_days = config.password_rotation_period.trim().parse().map_err(|_| {
            PolicyError::Invalid(format!(
                "passwordRotationPeriod is not a non-negative integer: '{}'",
                config.password_rotation_period
            ))
        })?;

        Ok(Self {
            complexity,
            min_length,
            rotation_period_days,
        })
    }
}

/// Generates a password from the thread-local CSPRNG.
pub fn generate_password(policy: &PasswordPolicy) -> Result<String, PolicyError> {
    generate_password_with(policy, &mut rand::rng())
}

pub fn generate_password_with<R>(policy: &PasswordPolicy, rng: &mut R) -> Result<String, PolicyError>
where
    R: Rng + CryptoRng,
{
    match policy.complexity {
        Complexity::Disabled => {
            let alphabet = [UPPER, LOWER, DIGITS].concat();
            Ok(draw(&alphabet, DEFAULT_PASSWORD_LEN, rng))
        }
        Complexity::Enabled => {
            policy.check()?;

            let classes = [UPPER, LOWER, DIGITS, SYMBOLS];
            let alphabet = classes.concat();

            let mut buf: Vec<u8> = classes
                .iter()
                .map(|class| class[rng.random_range(0..class.len())])
                .collect();
            buf.extend(
                (classes.len()..policy.min_length).map(|_| alphabet[rng.random_range(0..alphabet.len())]),
            );
            buf.shuffle(rng);

            Ok(buf.into_iter().map(char::from).collect())
        }
    }
}

fn draw<R>(alphabet: &[u8], len: usize, rng: &mut R) -> String
where
    R: Rng,
{
    (0..len)
        .map(|_| char::from(alphabet[rng.random_range(0..alphabet.len())]))
        .collect()
}
