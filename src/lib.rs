pub mod cli;
pub mod config;
pub mod constants;
pub mod db;
pub mod dbclient;
pub mod entities;
pub mod models;
pub mod observability;
pub mod password;
pub mod reconcile;
pub mod services;
pub mod source;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;

use anyhow::Context;
use cli::{Cli, Commands, DsnArgs};
pub use config::Config;
use constants::limits::EVENT_BUFFER_SIZE;
use db::Store;
use dbclient::EngineFactory;
use observability::{PrometheusMetrics, ProvisioningMetrics};
use reconcile::{Controller, Reconciler, ReconcilerSettings};
use services::{FileSecretStore, SeaOrmStatusStore};
use source::FileClaimSource;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Loads `.env`, then the config file named on the command line or the first
/// one found on the default search path.
pub fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let _ = dotenvy::dotenv();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    config.validate()?;
    Ok(config)
}

pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    if config.observability.metrics_enabled
        && matches!(cli.command, Some(Commands::Daemon | Commands::Reconcile { .. }))
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics exposed on {}", addr);
    }

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder();
        for (key, value) in &config.observability.loki_labels {
            builder = builder.label(key.as_str(), value.as_str())?;
        }
        let (layer, task) = builder.build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    match cli.command {
        Some(Commands::Daemon) => run_daemon(config).await,

        Some(Commands::Reconcile { claims }) => {
            let path = claims.unwrap_or_else(|| PathBuf::from(&config.claims.path));
            cli::cmd_reconcile(&config, &path).await
        }

        Some(Commands::Status) => cli::cmd_status(&config).await,

        Some(Commands::Password { complexity, length }) => {
            cli::cmd_password(&config, complexity, length)
        }

        Some(Commands::Dsn {
            host,
            port,
            user,
            password,
            dbname,
            sslmode,
            uri,
        }) => cli::cmd_dsn(&DsnArgs {
            host,
            port,
            user,
            password,
            dbname,
            sslmode,
            uri,
        }),

        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Wires the reconciler to its collaborators as configured.
pub async fn build_reconciler(
    config: &Config,
    metrics: Arc<dyn ProvisioningMetrics>,
) -> anyhow::Result<Reconciler> {
    let store = Store::new(&config.general.database_path)
        .await
        .context("Failed to open claim status store")?;

    let settings = ReconcilerSettings {
        admin_user: config.admin.username.clone(),
        admin_password: config.admin.resolve_password()?,
        operation_timeout: config.controller.operation_timeout(),
        backoff_base: config.controller.backoff_base(),
        backoff_max: config.controller.backoff_max(),
        resync_interval: config.controller.resync_interval(),
        password_config: config.password_config.clone(),
    };

    Ok(Reconciler::new(
        Arc::new(EngineFactory::new(Arc::clone(&metrics))),
        Arc::new(SeaOrmStatusStore::new(store)),
        Arc::new(FileSecretStore::new(&config.secrets.dir)),
        metrics,
        settings,
    ))
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    info!(
        "dbclaim v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let reconciler = Arc::new(build_reconciler(&config, Arc::new(PrometheusMetrics)).await?);
    let controller = Controller::new(reconciler, config.controller.max_concurrent_reconciles)
        .with_progress_pause(config.controller.progress_pause());

    let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
    let source = FileClaimSource::new(&config.claims.path, config.claims.poll_interval());

    let source_handle = tokio::spawn(source.run(tx));
    let controller_handle = tokio::spawn(controller.run(rx));

    info!("Daemon running. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(e) => {
            error!("Error listening for shutdown: {}", e);
        }
    }

    source_handle.abort();
    if let Err(e) = controller_handle.await {
        error!("Controller task failed: {}", e);
    }
    info!("Daemon stopped");

    Ok(())
}
