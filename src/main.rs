use clap::Parser;
use miette::Result;
use scopekeeper::{settings, storage, web};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "scopekeeper",
    version,
    about = "Opaque access-token issuance and scope validation"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(server = ?settings.server, "Loaded configuration");

    // connect and migrate
    let store = storage::init(&settings.database).await?;

    // serve until shutdown, then release the pool whatever the outcome
    let served = web::serve(&settings, store.clone()).await;
    if let Err(e) = store.close().await {
        tracing::error!(error = %e, "Failed to close identity store");
    }
    served
}
