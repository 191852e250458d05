use std::sync::Arc;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gator::commands::{run_command, Cli, State};
use gator::config::Config;
use gator::db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::read()?;

    // Initialize database
    let db = Database::new(&config.database_url()).await?;
    db.initialize().await?;
    debug!("Database initialized");

    let mut state = State {
        db: Arc::new(db),
        config,
    };

    run_command(cli.command, &mut state).await?;

    Ok(())
}
