use anyhow::Context;
use std::path::Path;
use std::sync::Arc;

use crate::build_reconciler;
use crate::config::Config;
use crate::constants::limits::MAX_PROGRESS_PASSES;
use crate::models::claim::Phase;
use crate::observability::PrometheusMetrics;
use crate::reconcile::Requeue;
use crate::source::parse_claims;

pub async fn cmd_reconcile(config: &Config, claims_path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(claims_path)
        .with_context(|| format!("Failed to read claims file: {}", claims_path.display()))?;
    let claims = parse_claims(&content)?;

    if claims.is_empty() {
        println!("No claims in {}.", claims_path.display());
        return Ok(());
    }

    let reconciler = build_reconciler(config, Arc::new(PrometheusMetrics)).await?;
    let mut unsettled = 0;

    for claim in &claims {
        let mut passes = 0;
        let outcome = loop {
            passes += 1;
            let outcome = reconciler.reconcile(claim).await;
            if outcome.requeue != Requeue::Immediately || passes >= MAX_PROGRESS_PASSES {
                break outcome;
            }
        };

        match outcome.phase {
            Phase::Ready => println!("✓ {} ready after {} pass(es)", claim.key, passes),
            phase => {
                unsettled += 1;
                println!(
                    "✗ {} {} after {} pass(es): {}",
                    claim.key,
                    phase,
                    passes,
                    outcome.error.as_deref().unwrap_or("still provisioning")
                );
            }
        }
    }

    if unsettled > 0 {
        anyhow::bail!("{unsettled} of {} claim(s) did not converge", claims.len());
    }

    Ok(())
}
