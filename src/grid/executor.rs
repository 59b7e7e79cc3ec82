//! Exchange abstraction for grid trading - enables mocking for tests

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::{GridError, GridResult};
use super::types::{OrderRequest, OrderStatus, PlacedOrder, TickerOpenOrders};

/// Exchange operations the engine depends on
#[async_trait]
pub trait GridExchange: Send + Sync {
    /// Last traded price for every listed ticker
    async fn fetch_ticker_prices(&self) -> GridResult<HashMap<String, f64>>;

    /// Submit a batch of limit orders
    ///
    /// Returns one outcome per request. A rejected order is reported with
    /// `success == false`; only transport failures are errors.
    async fn submit_orders(&self, orders: &[OrderRequest]) -> GridResult<Vec<PlacedOrder>>;

    /// Orders currently resting on the exchange, grouped by ticker
    async fn fetch_open_orders(&self) -> GridResult<Vec<TickerOpenOrders>>;

    /// Status of a single order
    async fn fetch_order_status(&self, order_id: u64, ticker: &str) -> GridResult<OrderStatus>;
}

/// Bound an exchange call by `limit`, mapping expiry to [`GridError::Timeout`]
pub async fn with_timeout<T, F>(operation: &'static str, limit: Duration, call: F) -> GridResult<T>
where
    F: Future<Output = GridResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GridError::Timeout {
            operation,
            after_ms: limit.as_millis() as u64,
        }),
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

/// Mock exchange for testing the engine without a real exchange connection.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use crate::grid::types::{OpenOrder, OrderSide};
    use crate::helpers::prices_match;

    /// Mock exchange for testing
    ///
    /// Every accepted order stays `Open` until a status is scripted for it.
    pub struct MockExchange {
        /// Every batch passed to `submit_orders`
        pub submissions: Arc<Mutex<Vec<Vec<OrderRequest>>>>,
        pub prices: Arc<Mutex<HashMap<String, f64>>>,
        pub open_orders: Arc<Mutex<Vec<TickerOpenOrders>>>,
        pub statuses: Arc<Mutex<HashMap<u64, OrderStatus>>>,
        /// Prices at which submissions are rejected
        pub reject_prices: Arc<Mutex<Vec<f64>>>,
        /// Every accepted order
        pub placed: Arc<Mutex<Vec<PlacedOrder>>>,
        pub status_queries: Arc<Mutex<Vec<u64>>>,
        pub open_order_queries: AtomicU64,
        /// Artificial latency applied to every call
        pub delay: Arc<Mutex<Option<Duration>>>,
        next_oid: AtomicU64,
        pub should_fail: Arc<Mutex<bool>>,
    }

    impl MockExchange {
        pub fn new() -> Self {
            Self {
                submissions: Arc::new(Mutex::new(Vec::new())),
                prices: Arc::new(Mutex::new(HashMap::new())),
                open_orders: Arc::new(Mutex::new(Vec::new())),
                statuses: Arc::new(Mutex::new(HashMap::new())),
                reject_prices: Arc::new(Mutex::new(Vec::new())),
                placed: Arc::new(Mutex::new(Vec::new())),
                status_queries: Arc::new(Mutex::new(Vec::new())),
                open_order_queries: AtomicU64::new(0),
                delay: Arc::new(Mutex::new(None)),
                next_oid: AtomicU64::new(1),
                should_fail: Arc::new(Mutex::new(false)),
            }
        }

        pub async fn set_price(&self, ticker: &str, price: f64) {
            self.prices.lock().await.insert(ticker.to_string(), price);
        }

        pub async fn set_should_fail(&self, fail: bool) {
            *self.should_fail.lock().await = fail;
        }

        pub async fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.lock().await = delay;
        }

        pub async fn reject_at(&self, price: f64) {
            self.reject_prices.lock().await.push(price);
        }

        pub async fn clear_rejections(&self) {
            self.reject_prices.lock().await.clear();
        }

        pub async fn set_open_orders(&self, ticker: &str, orders: Vec<OpenOrder>) {
            let mut open = self.open_orders.lock().await;
            open.retain(|t| t.ticker != ticker);
            open.push(TickerOpenOrders {
                ticker: ticker.to_string(),
                orders,
            });
        }

        pub async fn set_status(&self, order_id: u64, status: OrderStatus) {
            self.statuses.lock().await.insert(order_id, status);
        }

        /// All orders submitted so far, flattened in submission order
        pub async fn submitted(&self) -> Vec<OrderRequest> {
            self.submissions.lock().await.iter().flatten().cloned().collect()
        }

        /// Number of `submit_orders` calls
        pub async fn batch_count(&self) -> usize {
            self.submissions.lock().await.len()
        }

        /// ID of the most recent accepted order at `price`
        pub async fn order_id_at(&self, price: f64, side: OrderSide) -> Option<u64> {
            self.placed
                .lock()
                .await
                .iter()
                .rev()
                .find(|o| o.side == side && prices_match(o.price, price, 6))
                .map(|o| o.order_id)
        }

        async fn simulate(&self) -> GridResult<()> {
            let delay = *self.delay.lock().await;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if *self.should_fail.lock().await {
                return Err(GridError::Exchange("Mock failure".into()));
            }
            Ok(())
        }
    }

    impl Default for MockExchange {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl GridExchange for MockExchange {
        async fn fetch_ticker_prices(&self) -> GridResult<HashMap<String, f64>> {
            self.simulate().await?;
            Ok(self.prices.lock().await.clone())
        }

        async fn submit_orders(&self, orders: &[OrderRequest]) -> GridResult<Vec<PlacedOrder>> {
            self.simulate().await?;
            self.submissions.lock().await.push(orders.to_vec());

            let reject_prices = self.reject_prices.lock().await.clone();
            let mut placed = self.placed.lock().await;

            let results = orders
                .iter()
                .map(|order| {
                    if reject_prices.iter().any(|p| prices_match(*p, order.price, 6)) {
                        PlacedOrder::rejected(order, "BALANCE_NOT_ENOUGH")
                    } else {
                        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
                        let result = PlacedOrder::accepted(oid, order);
                        placed.push(result.clone());
                        result
                    }
                })
                .collect();

            Ok(results)
        }

        async fn fetch_open_orders(&self) -> GridResult<Vec<TickerOpenOrders>> {
            self.open_order_queries.fetch_add(1, Ordering::SeqCst);
            self.simulate().await?;
            Ok(self.open_orders.lock().await.clone())
        }

        async fn fetch_order_status(&self, order_id: u64, _ticker: &str) -> GridResult<OrderStatus> {
            self.simulate().await?;
            self.status_queries.lock().await.push(order_id);

            if let Some(status) = self.statuses.lock().await.get(&order_id) {
                return Ok(status.clone());
            }

            match self.placed.lock().await.iter().find(|o| o.order_id == order_id) {
                Some(order) => Ok(OrderStatus::open(order.side)),
                None => Err(GridError::Exchange(format!("unknown order {}", order_id))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockExchange;
    use super::*;
    use crate::grid::types::{FillStatus, OrderSide};

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: GridResult<()> = with_timeout("slow_call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        match result {
            Err(GridError::Timeout { operation, after_ms }) => {
                assert_eq!(operation, "slow_call");
                assert_eq!(after_ms, 10);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout("fast_call", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_mock_rejects_by_price() {
        let exchange = MockExchange::new();
        exchange.reject_at(4.5).await;

        let results = exchange
            .submit_orders(&[
                OrderRequest::buy("INJ_USDT", 4.05, 2.0),
                OrderRequest::buy("INJ_USDT", 4.5, 2.0),
            ])
            .await
            .unwrap();

        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(exchange.batch_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_status_defaults_to_open() {
        let exchange = MockExchange::new();
        let placed = exchange
            .submit_orders(&[OrderRequest::sell("INJ_USDT", 6.05, 1.0)])
            .await
            .unwrap();
        let oid = placed[0].order_id;

        let status = exchange.fetch_order_status(oid, "INJ_USDT").await.unwrap();
        assert_eq!(status.status, FillStatus::Open);
        assert_eq!(status.side, OrderSide::Sell);
        assert_eq!(exchange.order_id_at(6.05, OrderSide::Sell).await, Some(oid));

        exchange
            .set_status(oid, OrderStatus::filled(OrderSide::Sell, 1.0, 6.05))
            .await;
        let status = exchange.fetch_order_status(oid, "INJ_USDT").await.unwrap();
        assert_eq!(status.status, FillStatus::Filled);
        assert!(exchange.fetch_order_status(999, "INJ_USDT").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_failure_flag() {
        let exchange = MockExchange::new();
        exchange.set_should_fail(true).await;
        assert!(exchange.fetch_ticker_prices().await.is_err());
        assert!(exchange.fetch_open_orders().await.is_err());
    }
}
