use anyhow::Context;

use crate::config::Config;
use crate::password::{PasswordPolicy, generate_password};

pub fn cmd_password(
    config: &Config,
    complexity: Option<String>,
    length: Option<usize>,
) -> anyhow::Result<()> {
    let mut password_config = config.password_config.clone();
    if let Some(complexity) = complexity {
        password_config.password_complexity = complexity;
    }
    if let Some(length) = length {
        password_config.min_password_length = length.to_string();
    }

    let policy = PasswordPolicy::try_from(&password_config).context("Invalid password policy")?;
    let password = generate_password(&policy)?;

    println!("{password}");
    Ok(())
}
