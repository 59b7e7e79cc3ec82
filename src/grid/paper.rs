//! Paper trading exchange
//!
//! Simulates order execution locally by checking the last price set for a
//! ticker against resting limit orders. No real money at risk.

use std::collections::HashMap;

use async_trait::async_trait;
use log::info;
use tokio::sync::Mutex;

use super::errors::{GridError, GridResult};
use super::executor::GridExchange;
use super::types::{
    FillStatus, OpenOrder, OrderRequest, OrderSide, OrderStatus, PlacedOrder, TickerOpenOrders,
};

/// Input configuration for creating a PaperExchange
#[derive(Debug, Clone)]
pub struct PaperExchangeInput {
    /// Initial balance in quote currency (e.g., USDT)
    pub initial_balance: f64,
    /// Fee rate charged on every fill (0.001 = 0.1%)
    pub fee_rate: f64,
}

impl Default for PaperExchangeInput {
    fn default() -> Self {
        Self {
            initial_balance: 100_000.0,
            fee_rate: 0.001,
        }
    }
}

#[derive(Debug, Clone)]
struct PaperOrder {
    request: OrderRequest,
    status: FillStatus,
    avg_price: f64,
    fee: f64,
}

impl PaperOrder {
    /// Check if this order should be filled at the given price
    fn should_fill(&self, price: f64) -> bool {
        if self.status != FillStatus::Open {
            return false;
        }

        match self.request.side {
            OrderSide::Buy => price <= self.request.price,
            OrderSide::Sell => price >= self.request.price,
        }
    }

    fn to_status(&self) -> OrderStatus {
        let filled = self.status == FillStatus::Filled;
        OrderStatus {
            status: self.status,
            side: self.request.side,
            filled_quantity: if filled { self.request.quantity } else { 0.0 },
            avg_price: filled.then_some(self.avg_price),
            fee: filled.then_some(self.fee),
        }
    }
}

#[derive(Debug, Default)]
struct PaperBook {
    prices: HashMap<String, f64>,
    orders: HashMap<u64, PaperOrder>,
    /// Base-asset holdings by ticker
    holdings: HashMap<String, f64>,
    balance: f64,
    total_fees: f64,
    next_id: u64,
}

impl PaperBook {
    fn fill_crossed(&mut self, ticker: &str, price: f64, fee_rate: f64) -> Vec<u64> {
        let crossed: Vec<u64> = self
            .orders
            .iter()
            .filter(|(_, o)| o.request.ticker == ticker && o.should_fill(price))
            .map(|(&id, _)| id)
            .collect();

        for &order_id in &crossed {
            let Some(order) = self.orders.get_mut(&order_id) else {
                continue;
            };

            let notional = order.request.quantity * price;
            let fee = notional * fee_rate;
            order.status = FillStatus::Filled;
            order.avg_price = price;
            order.fee = fee;

            let holding = self.holdings.entry(ticker.to_string()).or_default();
            match order.request.side {
                OrderSide::Buy => {
                    self.balance -= notional + fee;
                    *holding += order.request.quantity;
                }
                OrderSide::Sell => {
                    self.balance += notional - fee;
                    *holding -= order.request.quantity;
                }
            }
            self.total_fees += fee;

            info!(
                "Paper fill #{}: {} {} {} at {} (fee: {:.4})",
                order_id,
                order.request.side.as_str(),
                order.request.quantity,
                ticker,
                price,
                fee
            );
        }

        crossed
    }
}

/// Exchange that keeps orders in memory and fills them against set prices
pub struct PaperExchange {
    book: Mutex<PaperBook>,
    fee_rate: f64,
}

impl PaperExchange {
    pub fn new(input: PaperExchangeInput) -> Self {
        Self {
            book: Mutex::new(PaperBook {
                balance: input.initial_balance,
                next_id: 1,
                ..Default::default()
            }),
            fee_rate: input.fee_rate,
        }
    }

    /// Update the price for a ticker and fill crossed orders
    ///
    /// Returns the IDs of the orders filled by this update.
    pub async fn set_price(&self, ticker: &str, price: f64) -> Vec<u64> {
        let mut book = self.book.lock().await;
        book.prices.insert(ticker.to_string(), price);
        book.fill_crossed(ticker, price, self.fee_rate)
    }

    /// Cancel a resting order as if done outside the bot
    pub async fn cancel(&self, order_id: u64) -> bool {
        let mut book = self.book.lock().await;
        match book.orders.get_mut(&order_id) {
            Some(order) if order.status == FillStatus::Open => {
                order.status = FillStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    pub async fn balance(&self) -> f64 {
        self.book.lock().await.balance
    }

    pub async fn holdings(&self, ticker: &str) -> f64 {
        self.book
            .lock()
            .await
            .holdings
            .get(ticker)
            .copied()
            .unwrap_or(0.0)
    }

    pub async fn total_fees(&self) -> f64 {
        self.book.lock().await.total_fees
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new(PaperExchangeInput::default())
    }
}

#[async_trait]
impl GridExchange for PaperExchange {
    async fn fetch_ticker_prices(&self) -> GridResult<HashMap<String, f64>> {
        Ok(self.book.lock().await.prices.clone())
    }

    async fn submit_orders(&self, orders: &[OrderRequest]) -> GridResult<Vec<PlacedOrder>> {
        let mut book = self.book.lock().await;
        let mut results = Vec::with_capacity(orders.len());

        for request in orders {
            if !(request.price > 0.0 && request.quantity > 0.0) {
                results.push(PlacedOrder::rejected(request, "INVALID_ORDER"));
                continue;
            }

            if request.side == OrderSide::Buy && request.notional() > book.balance {
                results.push(PlacedOrder::rejected(request, "BALANCE_NOT_ENOUGH"));
                continue;
            }

            let order_id = book.next_id;
            book.next_id += 1;
            book.orders.insert(
                order_id,
                PaperOrder {
                    request: request.clone(),
                    status: FillStatus::Open,
                    avg_price: 0.0,
                    fee: 0.0,
                },
            );

            info!(
                "Paper order #{}: {} {} {} @ {}",
                order_id,
                request.side.as_str(),
                request.quantity,
                request.ticker,
                request.price
            );
            results.push(PlacedOrder::accepted(order_id, request));

            // Fill immediately when the limit is already crossed
            let last = book.prices.get(&request.ticker).copied();
            if let Some(price) = last {
                book.fill_crossed(&request.ticker, price, self.fee_rate);
            }
        }

        Ok(results)
    }

    async fn fetch_open_orders(&self) -> GridResult<Vec<TickerOpenOrders>> {
        let book = self.book.lock().await;
        let mut by_ticker: HashMap<String, Vec<OpenOrder>> = HashMap::new();

        for (&order_id, order) in &book.orders {
            if order.status != FillStatus::Open {
                continue;
            }
            by_ticker
                .entry(order.request.ticker.clone())
                .or_default()
                .push(OpenOrder {
                    order_id,
                    price: order.request.price,
                    side: order.request.side,
                    quantity: Some(order.request.quantity),
                });
        }

        Ok(by_ticker
            .into_iter()
            .map(|(ticker, mut orders)| {
                orders.sort_by_key(|o| o.order_id);
                TickerOpenOrders { ticker, orders }
            })
            .collect())
    }

    async fn fetch_order_status(&self, order_id: u64, _ticker: &str) -> GridResult<OrderStatus> {
        self.book
            .lock()
            .await
            .orders
            .get(&order_id)
            .map(PaperOrder::to_status)
            .ok_or_else(|| GridError::Exchange(format!("unknown order {}", order_id)))
    }
}
