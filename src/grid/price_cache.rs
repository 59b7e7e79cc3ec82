//! Latest-price cache shared between the feed task and the supervisors
//!
//! One `watch` channel per ticker: the feed task owns the only
//! [`PriceWriter`], every supervisor holds a cheap [`PriceCache`] clone.
//! Readers always see the newest value and never block the writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::watch;

use super::errors::{GridError, GridResult};

/// Create a writer/reader pair for a fixed set of tickers
pub fn price_cache<I, S>(tickers: I) -> (PriceWriter, PriceCache)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut senders = HashMap::new();
    let mut receivers = HashMap::new();

    for ticker in tickers {
        let ticker = ticker.into();
        if senders.contains_key(&ticker) {
            continue;
        }
        let (tx, rx) = watch::channel(None);
        senders.insert(ticker.clone(), tx);
        receivers.insert(ticker, rx);
    }

    (
        PriceWriter { senders },
        PriceCache {
            receivers: Arc::new(receivers),
        },
    )
}

/// Write side of the cache, owned by the feed task
#[derive(Debug)]
pub struct PriceWriter {
    senders: HashMap<String, watch::Sender<Option<f64>>>,
}

impl PriceWriter {
    /// Store the latest price for `ticker`
    ///
    /// Non-finite or non-positive prices and unknown tickers are ignored.
    /// Returns `true` when the value was stored.
    pub fn publish(&self, ticker: &str, price: f64) -> bool {
        if !(price.is_finite() && price > 0.0) {
            debug!("Ignoring invalid price {} for {}", price, ticker);
            return false;
        }

        match self.senders.get(ticker) {
            Some(tx) => {
                tx.send_replace(Some(price));
                true
            }
            None => false,
        }
    }

    /// Store every tracked price from a fetch; returns how many were stored
    pub fn publish_all(&self, prices: &HashMap<String, f64>) -> usize {
        prices
            .iter()
            .filter(|(ticker, price)| self.publish(ticker, **price))
            .count()
    }

    /// Tickers this writer accepts
    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.senders.keys().map(String::as_str)
    }
}

/// Read side of the cache
#[derive(Debug, Clone)]
pub struct PriceCache {
    receivers: Arc<HashMap<String, watch::Receiver<Option<f64>>>>,
}

impl PriceCache {
    /// Latest price for `ticker`, `None` until the first valid publish
    pub fn latest(&self, ticker: &str) -> Option<f64> {
        self.receivers.get(ticker).and_then(|rx| *rx.borrow())
    }

    /// Receiver that is notified on every publish for `ticker`
    pub fn subscribe(&self, ticker: &str) -> Option<watch::Receiver<Option<f64>>> {
        self.receivers.get(ticker).cloned()
    }

    /// Wait until `ticker` has a price, bounded by `timeout`
    pub async fn wait_for_price(&self, ticker: &str, timeout: Duration) -> GridResult<f64> {
        let mut rx = self
            .subscribe(ticker)
            .ok_or_else(|| GridError::TransientFeed(format!("{} is not tracked", ticker)))?;

        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|price| price.is_some())
                .await
                .map(|price| *price)
        })
        .await;

        match waited {
            Ok(Ok(Some(price))) => Ok(price),
            Ok(Ok(None)) | Ok(Err(_)) => Err(GridError::TransientFeed(format!(
                "price feed for {} closed",
                ticker
            ))),
            Err(_) => Err(GridError::Timeout {
                operation: "wait_for_price",
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_starts_empty() {
        let (_writer, cache) = price_cache(["INJ_USDT"]);
        assert_eq!(cache.latest("INJ_USDT"), None);
        assert_eq!(cache.latest("BTC_USDT"), None);
    }

    #[test]
    fn test_publish_and_overwrite() {
        let (writer, cache) = price_cache(["INJ_USDT", "ATOM_USDT"]);

        assert!(writer.publish("INJ_USDT", 5.2));
        assert!(writer.publish("INJ_USDT", 5.4));
        assert_eq!(cache.latest("INJ_USDT"), Some(5.4));
        assert_eq!(cache.latest("ATOM_USDT"), None);
    }

    #[test]
    fn test_invalid_prices_are_ignored() {
        let (writer, cache) = price_cache(["INJ_USDT"]);
        writer.publish("INJ_USDT", 5.0);

        assert!(!writer.publish("INJ_USDT", 0.0));
        assert!(!writer.publish("INJ_USDT", -1.0));
        assert!(!writer.publish("INJ_USDT", f64::NAN));
        assert!(!writer.publish("BTC_USDT", 100.0));
        assert_eq!(cache.latest("INJ_USDT"), Some(5.0));
    }

    #[test]
    fn test_publish_all_counts_tracked() {
        let (writer, cache) = price_cache(["INJ_USDT", "ATOM_USDT"]);
        let prices = HashMap::from([
            ("INJ_USDT".to_string(), 5.0),
            ("ATOM_USDT".to_string(), 9.1),
            ("BTC_USDT".to_string(), 60000.0),
        ]);

        assert_eq!(writer.publish_all(&prices), 2);
        assert_eq!(cache.latest("ATOM_USDT"), Some(9.1));
    }

    #[tokio::test]
    async fn test_wait_for_price_resolves_on_publish() {
        let (writer, cache) = price_cache(["INJ_USDT"]);

        let reader = cache.clone();
        let waiter = tokio::spawn(async move {
            reader
                .wait_for_price("INJ_USDT", Duration::from_secs(2))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.publish("INJ_USDT", 5.3);

        assert_eq!(waiter.await.unwrap().unwrap(), 5.3);
    }

    #[tokio::test]
    async fn test_wait_for_price_times_out() {
        let (_writer, cache) = price_cache(["INJ_USDT"]);
        let result = cache
            .wait_for_price("INJ_USDT", Duration::from_millis(30))
            .await;
        assert!(matches!(result, Err(GridError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_wait_for_price_fails_when_writer_dropped() {
        let (writer, cache) = price_cache(["INJ_USDT"]);
        drop(writer);
        let result = cache
            .wait_for_price("INJ_USDT", Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(GridError::TransientFeed(_))));
    }
}
