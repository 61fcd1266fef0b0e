//! Unified pubgate CLI.
//!
//! This binary provides a unified interface to the pubgate components:
//! - `pubgate auth` - Manage users, grants, tokens and tiers
//! - `pubgate maintain` - Open (and migrate) the store and sweep expired tokens
//!
//! `pubgate-auth` is also available as a standalone binary.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// pubgate unified CLI.
#[derive(Parser)]
#[command(
    name = "pubgate",
    version,
    about = "Identity and access control for a pub/sub notification service",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users, grants, tokens and tiers.
    #[command(name = "auth")]
    Auth(pubgate_auth::cli::AuthArgs),

    /// Run store maintenance until interrupted.
    #[command(name = "maintain")]
    Maintain(pubgate::maintain::MaintainArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Auth(args) => pubgate_auth::cli::run(args).await,
        Commands::Maintain(args) => pubgate::maintain::run(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            pubgate_auth::cli::report(e.as_ref());
            ExitCode::FAILURE
        }
    }
}
