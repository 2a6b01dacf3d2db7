//! File-backed implementation of the `SecretSink` trait.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use crate::models::claim::ClaimKey;
use crate::services::secret_service::{SecretError, SecretPayload, SecretSink};

/// Writes one JSON document per claim, replacing the previous version.
///
/// Documents live at `<dir>/<namespace>/<name>.json` with both components
/// percent-encoded, so distinct claims never share a file.
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn path_for(&self, key: &ClaimKey) -> PathBuf {
        self.dir
            .join(encode_component(&key.namespace))
            .join(format!("{}.json", encode_component(&key.name)))
    }
}

/// Percent-encodes a key component; dots are encoded too so `.` and `..`
/// never resolve outside the secrets directory.
fn encode_component(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('.', "%2E")
}

#[async_trait]
impl SecretSink for FileSecretStore {
    async fn store_credential(&self, payload: &SecretPayload) -> Result<(), SecretError> {
        let path = self.path_for(&payload.key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(payload)?;

        tokio::fs::write(&tmp, body).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&tmp, &path).await?;

        info!(
            claim = %payload.claim,
            version = payload.version,
            "Credential written to {}",
            path.display()
        );
        Ok(())
    }
}
