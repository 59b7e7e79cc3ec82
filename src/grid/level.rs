//! Single ladder rung with its order lifecycle and position statistics

use serde::{Deserialize, Serialize};

use super::errors::{GridError, GridResult};
use super::types::{LevelState, OrderSide};

/// Individual grid level tracking
///
/// Neighbors are arena indices into the owning [`PriceLadder`].
///
/// [`PriceLadder`]: super::ladder::PriceLadder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridLevel {
    /// Ordinal position (0 = lowest price)
    pub index: usize,
    /// Price at this level
    pub price: f64,
    /// Index of the level one step below
    pub lower: Option<usize>,
    /// Index of the level one step above
    pub upper: Option<usize>,

    /// Exchange order ID, 0 when no order is active
    order_id: u64,
    /// Side of the active order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    order_side: Option<OrderSide>,
    /// Buy executed here and its take-profit has not completed yet
    buy_filled: bool,
    /// Last order executed here was a take-profit sell
    sell_filled: bool,

    /// Number of buys executed at this level
    pub buy_count: u32,
    /// Number of take-profit sells executed at this level
    pub sell_count: u32,
    /// Tokens currently held from buys at this level
    pub tokens: f64,
    /// Quote cost of the tokens currently held
    pub cost: f64,
    /// Fees accrued by fills at this level
    pub fee: f64,
    /// Unix millis of the last fill
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fill_ms: Option<u64>,
}

impl GridLevel {
    /// Create a new idle grid level
    pub fn new(index: usize, price: f64, lower: Option<usize>, upper: Option<usize>) -> Self {
        Self {
            index,
            price,
            lower,
            upper,
            order_id: 0,
            order_side: None,
            buy_filled: false,
            sell_filled: false,
            buy_count: 0,
            sell_count: 0,
            tokens: 0.0,
            cost: 0.0,
            fee: 0.0,
            last_fill_ms: None,
        }
    }

    /// Display name used in logs (1-based)
    pub fn name(&self) -> String {
        format!("grid_line_{}", self.index + 1)
    }

    /// Current lifecycle state; an active order takes precedence over inventory
    pub fn state(&self) -> LevelState {
        match self.order_side {
            Some(OrderSide::Buy) => LevelState::BuyPlaced,
            Some(OrderSide::Sell) => LevelState::SellPlaced,
            None if self.buy_filled => LevelState::BuyFilled,
            None if self.sell_filled => LevelState::SellFilled,
            None => LevelState::Idle,
        }
    }

    /// Active exchange order ID, if any
    pub fn order_id(&self) -> Option<u64> {
        (self.order_id != 0).then_some(self.order_id)
    }

    /// Side of the active order, if any
    pub fn active_side(&self) -> Option<OrderSide> {
        self.order_side
    }

    pub fn has_active_order(&self) -> bool {
        self.order_side.is_some()
    }

    /// Check if a buy filled here and is waiting for its take-profit
    pub fn is_holding(&self) -> bool {
        self.buy_filled
    }

    /// Neither a buy in flight nor inventory waiting on a take-profit
    pub fn can_place_buy(&self) -> bool {
        !self.has_active_order() && !self.buy_filled
    }

    /// Average cost of the tokens currently held
    pub fn avg_cost(&self) -> Option<f64> {
        (self.tokens > 0.0).then(|| self.cost / self.tokens)
    }

    /// Record an accepted buy submission
    pub fn place_buy(&mut self, order_id: u64) -> GridResult<()> {
        if !self.can_place_buy() || order_id == 0 {
            return Err(self.invalid("place buy"));
        }
        self.set_order(order_id, OrderSide::Buy);
        Ok(())
    }

    /// Record an accepted take-profit submission
    ///
    /// The precondition that the level below holds inventory is checked by
    /// the ladder, which can see both levels.
    pub fn place_sell(&mut self, order_id: u64) -> GridResult<()> {
        if self.has_active_order() || order_id == 0 {
            return Err(self.invalid("place sell"));
        }
        self.set_order(order_id, OrderSide::Sell);
        Ok(())
    }

    /// Record an executed buy
    pub fn fill_buy(&mut self, quantity: f64, price: f64, fee: f64) -> GridResult<()> {
        if self.order_side != Some(OrderSide::Buy) {
            return Err(self.invalid("fill buy"));
        }
        self.clear_order();
        self.buy_filled = true;
        self.sell_filled = false;
        self.buy_count += 1;
        self.tokens += quantity;
        self.cost += quantity * price;
        self.fee += fee;
        self.touch();
        Ok(())
    }

    /// Record an executed take-profit
    pub fn fill_sell(&mut self, fee: f64) -> GridResult<()> {
        if self.order_side != Some(OrderSide::Sell) {
            return Err(self.invalid("fill sell"));
        }
        self.clear_order();
        self.sell_filled = true;
        self.sell_count += 1;
        self.fee += fee;
        self.touch();
        Ok(())
    }

    /// Clear inventory after the take-profit one level up executed
    ///
    /// Token quantity and cost shrink in proportion to what was sold.
    /// Returns the cost basis of the sold tokens.
    pub fn release_holding(&mut self, sold_quantity: f64) -> f64 {
        self.buy_filled = false;

        if self.tokens <= 0.0 {
            return 0.0;
        }

        let sold = sold_quantity.min(self.tokens);
        let released_cost = self.cost * (sold / self.tokens);
        self.tokens -= sold;
        self.cost -= released_cost;

        if self.tokens <= f64::EPSILON {
            self.tokens = 0.0;
            self.cost = 0.0;
        }

        released_cost
    }

    /// Drop an order the exchange reports as cancelled
    ///
    /// The level returns to its pre-placement state. Returns the dropped ID.
    pub fn cancel_order(&mut self) -> Option<u64> {
        let order_id = self.order_id();
        self.clear_order();
        order_id
    }

    /// Adopt a buy resting on the exchange; idempotent
    ///
    /// Returns `true` when the level changed.
    pub fn restore_buy(&mut self, order_id: u64) -> GridResult<bool> {
        self.restore_order(order_id, OrderSide::Buy, "restore buy")
    }

    /// Adopt a take-profit resting on the exchange; idempotent
    pub fn restore_sell(&mut self, order_id: u64) -> GridResult<bool> {
        self.restore_order(order_id, OrderSide::Sell, "restore sell")
    }

    /// Rebuild the inventory implied by a take-profit resting one level up
    ///
    /// Counts the buy once; repeated calls leave the level unchanged.
    pub fn restore_holding(&mut self, quantity: f64) -> bool {
        if self.buy_filled {
            return false;
        }
        self.buy_filled = true;
        self.sell_filled = false;
        self.buy_count += 1;
        self.tokens += quantity;
        self.cost += quantity * self.price;
        true
    }

    fn restore_order(
        &mut self,
        order_id: u64,
        side: OrderSide,
        action: &'static str,
    ) -> GridResult<bool> {
        if self.order_id == order_id && self.order_side == Some(side) {
            return Ok(false);
        }
        if self.has_active_order() || order_id == 0 {
            return Err(self.invalid(action));
        }
        self.set_order(order_id, side);
        Ok(true)
    }

    fn set_order(&mut self, order_id: u64, side: OrderSide) {
        self.order_id = order_id;
        self.order_side = Some(side);
        if side == OrderSide::Buy {
            self.sell_filled = false;
        }
    }

    fn clear_order(&mut self) {
        self.order_id = 0;
        self.order_side = None;
    }

    fn touch(&mut self) {
        self.last_fill_ms = Some(chrono::Utc::now().timestamp_millis() as u64);
    }

    fn invalid(&self, action: &'static str) -> GridError {
        GridError::InvalidTransition {
            index: self.index,
            state: self.state(),
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level() -> GridLevel {
        GridLevel::new(3, 5.5, Some(2), Some(4))
    }

    #[test]
    fn test_new_level_is_idle() {
        let level = level();
        assert_eq!(level.state(), LevelState::Idle);
        assert_eq!(level.order_id(), None);
        assert_eq!(level.name(), "grid_line_4");
        assert!(level.can_place_buy());
    }

    #[test]
    fn test_full_cycle() {
        let mut level = level();

        level.place_buy(11).unwrap();
        assert_eq!(level.state(), LevelState::BuyPlaced);
        assert_eq!(level.order_id(), Some(11));

        level.fill_buy(2.0, 5.5, 0.011).unwrap();
        assert_eq!(level.state(), LevelState::BuyFilled);
        assert_eq!(level.order_id(), None);
        assert_eq!(level.buy_count, 1);
        assert!((level.tokens - 2.0).abs() < 1e-9);
        assert!((level.cost - 11.0).abs() < 1e-9);
        assert!(level.last_fill_ms.is_some());

        // Take-profit one level up sold everything
        let released = level.release_holding(2.0);
        assert!((released - 11.0).abs() < 1e-9);
        assert_eq!(level.state(), LevelState::Idle);
        assert_eq!(level.tokens, 0.0);

        // Level refills after its sell completes
        level.place_buy(12).unwrap();
        assert_eq!(level.state(), LevelState::BuyPlaced);
    }

    #[test]
    fn test_sell_lifecycle() {
        let mut level = level();
        level.place_sell(21).unwrap();
        assert_eq!(level.state(), LevelState::SellPlaced);

        level.fill_sell(0.006).unwrap();
        assert_eq!(level.state(), LevelState::SellFilled);
        assert_eq!(level.sell_count, 1);
        assert!((level.fee - 0.006).abs() < 1e-12);

        level.place_buy(22).unwrap();
        assert_eq!(level.state(), LevelState::BuyPlaced);
    }

    #[test]
    fn test_no_double_active_order() {
        let mut level = level();
        level.place_buy(1).unwrap();

        assert!(matches!(
            level.place_buy(2),
            Err(GridError::InvalidTransition { index: 3, .. })
        ));
        assert!(level.place_sell(3).is_err());
        assert_eq!(level.order_id(), Some(1));
    }

    #[test]
    fn test_buy_refused_while_holding() {
        let mut level = level();
        level.place_buy(1).unwrap();
        level.fill_buy(1.0, 5.5, 0.0).unwrap();

        assert!(!level.can_place_buy());
        assert!(level.place_buy(2).is_err());

        // A holding level may still host the take-profit for the level below
        level.place_sell(3).unwrap();
        assert_eq!(level.state(), LevelState::SellPlaced);
        assert!(level.is_holding());
    }

    #[test]
    fn test_fill_requires_matching_order() {
        let mut level = level();
        assert!(level.fill_buy(1.0, 5.5, 0.0).is_err());
        assert!(level.fill_sell(0.0).is_err());

        level.place_sell(9).unwrap();
        assert!(level.fill_buy(1.0, 5.5, 0.0).is_err());
    }

    #[test]
    fn test_partial_release_keeps_retained_tokens() {
        let mut level = level();
        level.place_buy(1).unwrap();
        level.fill_buy(10.0, 5.0, 0.0).unwrap();

        let released = level.release_holding(9.0);
        assert!((released - 45.0).abs() < 1e-9);
        assert!((level.tokens - 1.0).abs() < 1e-9);
        assert!((level.cost - 5.0).abs() < 1e-9);
        assert!(!level.is_holding());
        assert_eq!(level.avg_cost(), Some(5.0));
    }

    #[test]
    fn test_cancel_returns_to_previous_state() {
        let mut level = level();
        level.place_buy(5).unwrap();
        assert_eq!(level.cancel_order(), Some(5));
        assert_eq!(level.state(), LevelState::Idle);
        assert_eq!(level.cancel_order(), None);
    }

    #[test]
    fn test_restore_is_idempotent() {
        let mut level = level();
        assert!(level.restore_sell(77).unwrap());
        assert!(!level.restore_sell(77).unwrap());
        assert_eq!(level.order_id(), Some(77));

        // A different remote order cannot displace the adopted one
        assert!(level.restore_buy(78).is_err());

        let mut below = GridLevel::new(2, 5.0, Some(1), Some(3));
        assert!(below.restore_holding(2.0));
        assert!(!below.restore_holding(2.0));
        assert_eq!(below.buy_count, 1);
        assert!((below.tokens - 2.0).abs() < 1e-9);
    }
}
