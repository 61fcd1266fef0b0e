//! pubgate-auth standalone binary.

use std::process::ExitCode;

use clap::Parser;
use pubgate_auth::cli::{self, AuthArgs};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = cli::run(AuthArgs::parse()).await {
        cli::report(e.as_ref());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
