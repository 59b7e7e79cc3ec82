//! Grid Trading Bot Binary (paper mode)
//!
//! Runs every configured grid against the in-memory paper exchange. Prices
//! are read from stdin, one `TICKER PRICE` pair per line.
//!
//! ## Setup
//!
//! 1. Copy `grid_bot.example.toml` to `grid_bot.toml` and adjust the grids.
//!    Any key can be overridden from the environment or a `.env` file:
//!    ```
//!    GRID_LOG__LEVEL=debug
//!    ```
//!
//! 2. Run the bot and feed it prices:
//!    ```bash
//!    printf 'INJ_USDT 5.2\nINJ_USDT 5.6\nINJ_USDT 5.4\n' | \
//!        cargo run --bin grid_bot -- --config grid_bot.toml
//!    ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use dca_grid_bot::config::Settings;
use dca_grid_bot::grid::PaperExchange;
use dca_grid_bot::{init_logging, BotRunner};

const DEFAULT_CONFIG: &str = "grid_bot.toml";

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();

    // Parse arguments
    let args: Vec<String> = env::args().collect();
    let config_path = if args.len() > 2 && args[1] == "--config" {
        args[2].clone()
    } else {
        DEFAULT_CONFIG.to_string()
    };

    let settings = match Settings::new(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            init_logging(&Default::default());
            error!("Failed to load config {}: {}", config_path, e);
            return;
        }
    };
    init_logging(&settings.log);

    match dotenv {
        Ok(path) => info!("Loaded environment from: {}", path.display()),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let exchange = Arc::new(PaperExchange::new(settings.paper.to_input()));
    let grace = Duration::from_millis(
        settings.feed.poll_interval_ms + 2 * settings.supervisor.tick_interval_ms,
    );

    let runner = match BotRunner::new(settings, exchange.clone()) {
        Ok(runner) => runner,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
            }
            let _ = shutdown_tx.send(true);
        });
    }

    tokio::spawn(feed_stdin_prices(exchange.clone(), shutdown_tx, grace));

    if let Err(e) = runner.run(shutdown_rx).await {
        error!("Bot failed: {}", e);
        return;
    }

    info!(
        "Paper balance: {:.4}, fees paid: {:.4}",
        exchange.balance().await,
        exchange.total_fees().await
    );
}

/// Forward `TICKER PRICE` lines to the paper exchange until stdin closes
async fn feed_stdin_prices(
    exchange: Arc<PaperExchange>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    grace: Duration,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match parse_price_line(line) {
                    Some((ticker, price)) => {
                        let filled = exchange.set_price(ticker, price).await;
                        if !filled.is_empty() {
                            info!("{} at {} filled paper orders {:?}", ticker, price, filled);
                        }
                        // Let the feed and supervisors observe each price
                        tokio::time::sleep(grace).await;
                    }
                    None => warn!("Ignoring malformed price line: {:?}", line),
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    info!("Price input closed, shutting down");
    let _ = shutdown_tx.send(true);
}

fn parse_price_line(line: &str) -> Option<(&str, f64)> {
    let mut parts = line.split_whitespace();
    let ticker = parts.next()?;
    let price = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() || !(price.is_finite() && price > 0.0) {
        return None;
    }
    Some((ticker, price))
}
