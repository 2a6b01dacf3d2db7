//! Connection locators for Postgres servers.
//!
//! [`connection_string`] produces the libpq key/value form consumed by other
//! tooling; its escaping of user, password and database name is a fixed
//! contract. [`postgres_uri`] produces the URL form the driver connects with.

use url::Url;

use super::ProvisionError;

/// Backslash-prefixes space, backslash and single quote.
#[must_use]
pub fn escape_value(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, ' ' | '\\' | '\'') {
            encoded.push('\\');
        }
        encoded.push(c);
    }
    encoded
}

/// Inverse of [`escape_value`]. A trailing lone backslash is kept as is.
#[must_use]
pub fn unescape_value(input: &str) -> String {
    let mut decoded = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => decoded.push(next),
                None => decoded.push('\\'),
            }
        } else {
            decoded.push(c);
        }
    }
    decoded
}

#[must_use]
pub fn connection_string(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    dbname: &str,
    sslmode: &str,
) -> String {
    format!(
        "host='{host}' port='{port}' user='{}' password='{}' dbname='{}' sslmode='{sslmode}'",
        escape_value(user),
        escape_value(password),
        escape_value(dbname),
    )
}

pub fn postgres_uri(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    dbname: &str,
    sslmode: &str,
) -> Result<Url, ProvisionError> {
    let mut url = Url::parse(&format!("postgres://{host}:{port}/"))
        .map_err(|e| ProvisionError::InvalidTarget(format!("{host}:{port}: {e}")))?;

    url.set_username(user)
        .map_err(|()| ProvisionError::InvalidTarget(format!("cannot set user on {host}")))?;
    url.set_password(Some(password))
        .map_err(|()| ProvisionError::InvalidTarget(format!("cannot set password on {host}")))?;
    url.set_path(&format!("/{dbname}"));
    url.query_pairs_mut().append_pair("sslmode", sslmode);

    Ok(url)
}

/// Same server and credentials, different database.
#[must_use]
pub fn with_database(base: &Url, dbname: &str) -> Url {
    let mut url = base.clone();
    url.set_path(&format!("/{dbname}"));
    url
}
