//! Main daemon: data collection, signals, paper trading, and alerting.

use anyhow::Context;
use kalshi_edge_bot::bin_common::{load_config_from_env, print_banner, print_shutdown, ConfigType};
use kalshi_edge_bot::kalshi::application::runtime::BotRuntime;
use kalshi_edge_bot::kalshi::infrastructure::database::{Database, MarketStore};
use kalshi_edge_bot::kalshi::infrastructure::logging::init_tracing_with_level;
use kalshi_edge_bot::kalshi::{DataPipeline, KalshiClient, Settings, TelegramNotifier};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config_path = load_config_from_env(ConfigType::Bot);
    let settings = if config_path.exists() {
        Settings::load(&config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?
    } else {
        Settings::from_env().context("building settings from environment")?
    };
    init_tracing_with_level(&settings.log_level);
    print_banner("kalshi-edge-bot");
    settings.log();

    // The store is the only hard startup dependency: fail fast with a
    // clear operator message if it is unreachable.
    let database = Database::new(&settings.database.url)
        .await
        .with_context(|| format!("connecting to database {}", settings.database.url))?;
    let store: Arc<dyn MarketStore> = Arc::new(database);

    let client = Arc::new(KalshiClient::new(&settings).context("building Kalshi client")?);
    let notifier = Arc::new(TelegramNotifier::new(settings.clone()));
    let pipeline = Arc::new(DataPipeline::new(
        settings.clone(),
        Arc::clone(&client),
        Arc::clone(&store),
        notifier,
    ));

    let runtime = BotRuntime::new(settings, pipeline, client);
    runtime.run().await;

    print_shutdown("kalshi-edge-bot", None);
    Ok(())
}
