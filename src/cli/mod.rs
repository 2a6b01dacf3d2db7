//! CLI module - Command-line interface for dbclaim
//!
//! This module provides a structured CLI using clap for argument parsing.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dbclaim - Database claim reconciler
/// Provisions tenant databases, roles and rotating login credentials
#[derive(Parser)]
#[command(name = "dbclaim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to use instead of the default search path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as background daemon watching the claims file
    #[command(alias = "-d", alias = "--daemon")]
    Daemon,

    /// Drive every claim in the claims file to convergence once
    #[command(alias = "r")]
    Reconcile {
        /// Claims file (defaults to claims.path from config)
        #[arg(long)]
        claims: Option<PathBuf>,
    },

    /// Show the recorded status of every claim
    #[command(alias = "st")]
    Status,

    /// Mint a password under the configured policy
    Password {
        /// Override passwordComplexity ("enabled" or "disabled")
        #[arg(long)]
        complexity: Option<String>,
        /// Override minPasswordLength
        #[arg(long)]
        length: Option<usize>,
    },

    /// Print an escaped connection string
    Dsn {
        #[arg(long)]
        host: String,
        #[arg(long, default_value = "5432")]
        port: u16,
        #[arg(long)]
        user: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        dbname: String,
        #[arg(long, default_value = "require")]
        sslmode: String,
        /// Print a postgres:// URI instead
        #[arg(long)]
        uri: bool,
    },
}

pub use commands::*;
