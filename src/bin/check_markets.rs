//! One-shot diagnostic: discover target markets and print their current
//! quotes and books.

use anyhow::Context;
use kalshi_edge_bot::bin_common::{load_config_from_env, ConfigType};
use kalshi_edge_bot::kalshi::infrastructure::logging::init_tracing_with_level;
use kalshi_edge_bot::kalshi::{KalshiClient, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config_path = load_config_from_env(ConfigType::Bot);
    let settings = if config_path.exists() {
        Settings::load(&config_path)?
    } else {
        Settings::from_env()?
    };
    init_tracing_with_level(&settings.log_level);

    let client = KalshiClient::new(&settings).context("building Kalshi client")?;
    let health = client.health_check().await?;
    info!(health = %health, "kalshi_health");

    let markets = client
        .list_markets(settings.discovery.market_limit)
        .await
        .context("listing markets")?;
    info!(count = markets.len(), "markets_discovered");

    for market in &markets {
        let snapshot = client.get_current_snapshot(market).await;
        let book = client.get_orderbook(&market.ticker).await;
        match (snapshot, book) {
            (Ok(snapshot), Ok(book)) => info!(
                ticker = %market.ticker,
                status = %market.status,
                yes_price = ?snapshot.yes_price,
                no_price = ?snapshot.no_price,
                best_yes_bid = ?book.best_yes_bid(),
                best_yes_ask = ?book.best_yes_ask(),
                "market"
            ),
            (snapshot, book) => info!(
                ticker = %market.ticker,
                snapshot_ok = snapshot.is_ok(),
                book_ok = book.is_ok(),
                "market_fetch_incomplete"
            ),
        }
    }
    Ok(())
}
