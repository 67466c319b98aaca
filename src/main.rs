//! Augury - Main entry point

use clap::Parser;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "augury=info".into()),
        )
        .init();

    let cli = augury::cli::Cli::parse();
    augury::cli::run_logged(cli)?;
    Ok(())
}
