//! Polling claim source backed by a TOML file of `[[claims]]` tables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::claim::{Claim, ClaimKey, ClaimSpec};
use crate::reconcile::ClaimEvent;

#[derive(Debug, Default, Deserialize)]
struct ClaimsFile {
    #[serde(default)]
    claims: Vec<Claim>,
}

pub fn parse_claims(content: &str) -> Result<Vec<Claim>> {
    let file: ClaimsFile = toml::from_str(content).context("Failed to parse claims file")?;
    Ok(file.claims)
}

/// Compares `claims` against what was last published and returns the events
/// needed to bring consumers up to date. `known` is updated in place.
pub fn diff_claims(known: &mut HashMap<ClaimKey, ClaimSpec>, claims: Vec<Claim>) -> Vec<ClaimEvent> {
    let mut current: HashMap<ClaimKey, ClaimSpec> = HashMap::with_capacity(claims.len());
    for claim in claims {
        if current.insert(claim.key.clone(), claim.spec).is_some() {
            warn!(claim = %claim.key, "Duplicate claim key; the last definition wins");
        }
    }

    let mut removed: Vec<ClaimKey> = known
        .keys()
        .filter(|key| !current.contains_key(*key))
        .cloned()
        .collect();
    removed.sort();

    let mut events: Vec<ClaimEvent> = removed
        .into_iter()
        .map(|key| {
            known.remove(&key);
            ClaimEvent::Deleted(key)
        })
        .collect();

    let mut upserts: Vec<Claim> = current
        .into_iter()
        .filter(|(key, spec)| known.get(key) != Some(spec))
        .map(|(key, spec)| Claim { key, spec })
        .collect();
    upserts.sort_by(|a, b| a.key.cmp(&b.key));

    for claim in upserts {
        known.insert(claim.key.clone(), claim.spec.clone());
        events.push(ClaimEvent::Upsert(claim));
    }

    events
}

pub struct FileClaimSource {
    path: PathBuf,
    interval: Duration,
    known: HashMap<ClaimKey, ClaimSpec>,
}

impl FileClaimSource {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            known: HashMap::new(),
        }
    }

    pub async fn load(&self) -> Result<Vec<Claim>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read claims file: {}", self.path.display()))?;
        parse_claims(&content)
    }

    /// Reads the file once and returns the resulting events.
    pub async fn poll(&mut self) -> Result<Vec<ClaimEvent>> {
        let claims = self.load().await?;
        Ok(diff_claims(&mut self.known, claims))
    }

    /// Polls until the receiving side goes away. A file that cannot be read
    /// or parsed keeps the previously published claims in place.
    pub async fn run(mut self, tx: mpsc::Sender<ClaimEvent>) {
        info!(
            "Watching claims in {} every {:?}",
            self.path.display(),
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = tx.closed() => break,
            }

            let events = match self.poll().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Claim source poll failed: {:#}", e);
                    continue;
                }
            };

            if !events.is_empty() {
                debug!(count = events.len(), "Publishing claim events");
            }

            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }

        debug!("Claim source stopped");
    }
}
