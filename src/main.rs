use anyhow::Context;
use rent_billing::config::AppConfig;
use rent_billing::startup::Application;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    if config.is_production() {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    config.validate().context("Invalid configuration")?;
    tracing::info!(
        environment = ?config.server.environment,
        persistent = config.database.is_some(),
        "Starting rent-billing"
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
