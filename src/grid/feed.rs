//! Price feed task - the single writer of the price cache

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::errors::GridResult;
use super::executor::{with_timeout, GridExchange};
use super::price_cache::PriceWriter;

/// Feed polling configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Consecutive failures after which each failure is logged as an error
    pub error_threshold: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            error_threshold: 5,
        }
    }
}

/// Polls ticker prices and publishes them to the cache
pub struct PriceFeedTask<E: GridExchange> {
    exchange: Arc<E>,
    writer: PriceWriter,
    config: FeedConfig,
    consecutive_errors: u32,
}

impl<E: GridExchange + 'static> PriceFeedTask<E> {
    pub fn new(exchange: Arc<E>, writer: PriceWriter, config: FeedConfig) -> Self {
        Self {
            exchange,
            writer,
            config,
            consecutive_errors: 0,
        }
    }

    /// Fetch once and publish; returns how many tracked tickers were updated
    pub async fn poll_once(&mut self) -> GridResult<usize> {
        let result = with_timeout(
            "fetch_ticker_prices",
            self.config.request_timeout,
            self.exchange.fetch_ticker_prices(),
        )
        .await;

        match result {
            Ok(prices) => {
                self.consecutive_errors = 0;
                let updated = self.writer.publish_all(&prices);
                debug!("Price feed updated {} tickers", updated);
                Ok(updated)
            }
            Err(e) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors >= self.config.error_threshold {
                    error!(
                        "Price fetch failed {} times in a row: {}",
                        self.consecutive_errors, e
                    );
                } else {
                    warn!("Price fetch failed, keeping last prices: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Poll until `shutdown` flips to `true`
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Price feed started for {:?}",
            self.writer.tickers().collect::<Vec<_>>()
        );

        let mut timer = interval(self.config.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    // Failures are logged inside and never stop the feed
                    let _ = self.poll_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Price feed stopped");
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::executor::mock::MockExchange;
    use crate::grid::price_cache::price_cache;

    fn feed(exchange: Arc<MockExchange>) -> (PriceFeedTask<MockExchange>, crate::grid::PriceCache) {
        let (writer, cache) = price_cache(["INJ_USDT"]);
        let config = FeedConfig {
            poll_interval: Duration::from_millis(10),
            request_timeout: Duration::from_millis(50),
            error_threshold: 2,
        };
        (PriceFeedTask::new(exchange, writer, config), cache)
    }

    #[tokio::test]
    async fn test_poll_once_publishes_tracked_prices() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_price("INJ_USDT", 5.3).await;
        exchange.set_price("BTC_USDT", 60000.0).await;
        let (mut task, cache) = feed(exchange);

        assert_eq!(task.poll_once().await.unwrap(), 1);
        assert_eq!(cache.latest("INJ_USDT"), Some(5.3));
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_last_price() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_price("INJ_USDT", 5.3).await;
        let (mut task, cache) = feed(exchange.clone());
        task.poll_once().await.unwrap();

        exchange.set_should_fail(true).await;
        assert!(task.poll_once().await.is_err());
        assert!(task.poll_once().await.is_err());
        assert_eq!(task.consecutive_errors(), 2);
        assert_eq!(cache.latest("INJ_USDT"), Some(5.3));

        exchange.set_should_fail(false).await;
        task.poll_once().await.unwrap();
        assert_eq!(task.consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_price("INJ_USDT", 4.9).await;
        let (task, cache) = feed(exchange);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(task.run(shutdown_rx));
        cache
            .wait_for_price("INJ_USDT", Duration::from_secs(1))
            .await
            .unwrap();

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
