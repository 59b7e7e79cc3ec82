use std::path::Path;
use std::sync::Arc;

use futures_util::future::join_all;
use log::{error, info, warn};
use tokio::sync::watch;

use crate::config::{LogConfig, Settings};
use crate::grid::{
    price_cache, GridError, GridExchange, GridResult, PriceFeedTask, TickerSupervisor,
};

/// Initialise `env_logger`, honouring `RUST_LOG` when it is set
pub fn init_logging(log: &LogConfig) {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", &log.level);
    }
    env_logger::try_init().ok();
}

/// Runs one feed task and one supervisor per configured grid
pub struct BotRunner<E: GridExchange> {
    settings: Settings,
    exchange: Arc<E>,
}

impl<E: GridExchange + 'static> BotRunner<E> {
    /// Create a runner from loaded settings
    pub fn new(settings: Settings, exchange: Arc<E>) -> GridResult<Self> {
        settings.validate()?;
        Ok(Self { settings, exchange })
    }

    /// Create a new runner from a configuration file
    pub fn from_path(config_path: impl AsRef<Path>, exchange: Arc<E>) -> GridResult<Self> {
        let path = config_path.as_ref();
        let path = path
            .to_str()
            .ok_or_else(|| GridError::Settings(format!("non UTF-8 path: {}", path.display())))?;
        Self::new(Settings::new(path)?, exchange)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run until `shutdown` flips to `true`
    ///
    /// Every ladder is built before any task starts, so a bad grid fails the
    /// whole run up front. After that a failing ticker never stops the others.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> GridResult<()> {
        info!("Starting BotRunner for {:?}", self.settings.tickers());

        let (writer, cache) = price_cache(self.settings.tickers());
        let supervisor_config = self.settings.supervisor.to_supervisor_config();

        let supervisors = self
            .settings
            .grids
            .iter()
            .map(|grid| {
                TickerSupervisor::new(
                    grid.clone(),
                    cache.clone(),
                    self.exchange.clone(),
                    supervisor_config.clone(),
                )
            })
            .collect::<GridResult<Vec<_>>>()?;

        let feed = PriceFeedTask::new(
            self.exchange.clone(),
            writer,
            self.settings.feed.to_feed_config(),
        );

        let mut handles = Vec::with_capacity(supervisors.len() + 1);
        handles.push(("price feed".to_string(), tokio::spawn(feed.run(shutdown.clone()))));
        for supervisor in supervisors {
            let name = supervisor.ticker().to_string();
            handles.push((name, tokio::spawn(supervisor.run(shutdown.clone()))));
        }

        let (names, tasks): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for (name, result) in names.iter().zip(join_all(tasks).await) {
            if let Err(e) = result {
                error!("Task {} ended abnormally: {}", name, e);
            }
        }

        info!("BotRunner stopped");
        Ok(())
    }

    /// Run until Ctrl-C
    pub async fn run_until_ctrl_c(self) -> GridResult<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Ctrl-C received, shutting down"),
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
            let _ = shutdown_tx.send(true);
        });

        self.run(shutdown_rx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::executor::mock::MockExchange;
    use std::time::Duration;

    const SETTINGS: &str = r#"
        [feed]
        poll_interval_ms = 5

        [supervisor]
        tick_interval_ms = 5
        price_wait_timeout_ms = 20

        [[grids]]
        ticker = "INJ_USDT"
        central_price = 5.0
        distance = 0.1
        levels_per_side = 2
        price_decimals = 3
        notional_per_level = 10.0

        [[grids]]
        ticker = "ATOM_USDT"
        central_price = 9.0
        distance = 0.05
        levels_per_side = 2
        price_decimals = 3
        notional_per_level = 10.0
    "#;

    #[tokio::test]
    async fn test_runner_bootstraps_every_ticker() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_price("INJ_USDT", 5.2).await;
        exchange.set_price("ATOM_USDT", 9.1).await;

        let settings = Settings::from_toml(SETTINGS).unwrap();
        let runner = BotRunner::new(settings, exchange.clone()).unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(runner.run(rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let submitted = exchange.submitted().await;
        assert!(submitted.iter().any(|o| o.ticker == "INJ_USDT"));
        assert!(submitted.iter().any(|o| o.ticker == "ATOM_USDT"));
    }

    #[tokio::test]
    async fn test_invalid_grid_fails_up_front() {
        let toml = r#"
            [[grids]]
            ticker = "INJ_USDT"
            central_price = 5.0
            distance = 0.1
            levels_per_side = 2
            price_decimals = 3
            notional_per_level = 10.0
            do_not_buy_below = 6.0
            do_not_buy_above = 4.0
        "#;
        let settings = Settings::from_toml(toml).unwrap();
        let result = BotRunner::new(settings, Arc::new(MockExchange::new()));
        assert!(matches!(result, Err(GridError::InvalidConfig(_))));
    }
}
