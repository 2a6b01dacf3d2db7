use crate::config::Config;
use crate::db::Store;

pub async fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let statuses = store.list_claim_statuses().await?;

    if statuses.is_empty() {
        println!("No claims recorded yet.");
        return Ok(());
    }

    println!(
        "{:<32} {:<13} {:<20} {:>7}  {}",
        "CLAIM", "PHASE", "USER", "VERSION", "LAST ROTATED"
    );
    println!("{:-<96}", "");

    for (key, status) in statuses {
        let rotated = status
            .last_rotated_at
            .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        println!(
            "{:<32} {:<13} {:<20} {:>7}  {}",
            key.to_string(),
            status.phase.as_str(),
            status.active_username.as_deref().unwrap_or("-"),
            status.credential_version,
            rotated
        );

        if let Some(error) = &status.last_error {
            let category = status.error_category.as_deref().unwrap_or("unknown");
            println!(
                "  ↳ {} failed ({} in a row): [{}] {}",
                status.last_action.as_deref().unwrap_or("pass"),
                status.consecutive_failures,
                category,
                error
            );
        }
    }

    Ok(())
}
