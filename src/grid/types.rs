//! Core data types for grid trading

use serde::{Deserialize, Serialize};

/// Order side for grid levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Convert to exchange side string
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Order-lifecycle state of a single ladder level
///
/// `BuyFilled` describes inventory, not an order: a level keeps it while its
/// take-profit sell rests on the level above, and can host a sell of its own
/// for the level below at the same time. [`GridLevel::state`] reports the
/// active order first.
///
/// [`GridLevel::state`]: super::level::GridLevel::state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelState {
    /// No order and no inventory
    Idle,
    /// Buy order resting on the exchange
    BuyPlaced,
    /// Buy executed, waiting for the take-profit one level up
    BuyFilled,
    /// Take-profit sell resting on the exchange
    SellPlaced,
    /// Take-profit executed, eligible for a fresh buy
    SellFilled,
}

/// Per-ticker supervisor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    /// Price cache has no usable value yet
    WaitingForPrice,
    /// Startup reconciliation and the initial batch buy
    Bootstrapping,
    /// Normal region-gated reconciliation
    SteadyState,
}

/// Request to place an order on the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub price: f64,
    pub quantity: f64,
    pub side: OrderSide,
}

impl OrderRequest {
    pub fn buy(ticker: impl Into<String>, price: f64, quantity: f64) -> Self {
        Self {
            ticker: ticker.into(),
            price,
            quantity,
            side: OrderSide::Buy,
        }
    }

    pub fn sell(ticker: impl Into<String>, price: f64, quantity: f64) -> Self {
        Self {
            ticker: ticker.into(),
            price,
            quantity,
            side: OrderSide::Sell,
        }
    }

    /// Quote-currency value of this order
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Per-order outcome of a batch submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    /// Exchange order ID (0 when rejected)
    pub order_id: u64,
    pub price: f64,
    pub quantity: f64,
    pub side: OrderSide,
    pub success: bool,
    /// Exchange failure label (e.g. `BALANCE_NOT_ENOUGH`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl PlacedOrder {
    pub fn accepted(order_id: u64, request: &OrderRequest) -> Self {
        Self {
            order_id,
            price: request.price,
            quantity: request.quantity,
            side: request.side,
            success: true,
            label: None,
        }
    }

    pub fn rejected(request: &OrderRequest, label: impl Into<String>) -> Self {
        Self {
            order_id: 0,
            price: request.price,
            quantity: request.quantity,
            side: request.side,
            success: false,
            label: Some(label.into()),
        }
    }
}

/// An order resting on the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: u64,
    pub price: f64,
    pub side: OrderSide,
    /// Remaining quantity, when the exchange reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
}

/// Open orders for one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerOpenOrders {
    pub ticker: String,
    pub orders: Vec<OpenOrder>,
}

/// Fill status reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillStatus {
    /// Still resting (possibly partially filled)
    Open,
    /// Fully executed
    Filled,
    /// Cancelled outside the engine
    Cancelled,
}

/// Order status from the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub status: FillStatus,
    pub side: OrderSide,
    pub filled_quantity: f64,
    /// Average execution price, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_price: Option<f64>,
    /// Fee charged in quote currency, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<f64>,
}

impl OrderStatus {
    pub fn open(side: OrderSide) -> Self {
        Self {
            status: FillStatus::Open,
            side,
            filled_quantity: 0.0,
            avg_price: None,
            fee: None,
        }
    }

    pub fn filled(side: OrderSide, filled_quantity: f64, avg_price: f64) -> Self {
        Self {
            status: FillStatus::Filled,
            side,
            filled_quantity,
            avg_price: Some(avg_price),
            fee: None,
        }
    }

    pub fn cancelled(side: OrderSide) -> Self {
        Self {
            status: FillStatus::Cancelled,
            side,
            filled_quantity: 0.0,
            avg_price: None,
            fee: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_side_serde_is_lowercase() {
        let json = serde_json::to_string(&OrderSide::Buy).unwrap();
        assert_eq!(json, "\"buy\"");
        assert_eq!(OrderSide::Sell.as_str(), "sell");

        let side: OrderSide = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(side, OrderSide::Sell);
        assert!(serde_json::from_str::<OrderSide>("\"hold\"").is_err());
    }

    #[test]
    fn test_placed_order_constructors() {
        let request = OrderRequest::buy("INJ_USDT", 5.0, 2.0);
        assert!((request.notional() - 10.0).abs() < 1e-9);

        let ok = PlacedOrder::accepted(42, &request);
        assert!(ok.success);
        assert_eq!(ok.order_id, 42);

        let rejected = PlacedOrder::rejected(&request, "BALANCE_NOT_ENOUGH");
        assert!(!rejected.success);
        assert_eq!(rejected.order_id, 0);
        assert_eq!(rejected.label.as_deref(), Some("BALANCE_NOT_ENOUGH"));
    }
}
