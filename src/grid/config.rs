//! Grid trading configuration

use serde::{Deserialize, Serialize};

use crate::helpers::{round_to, truncate_to};

use super::errors::{GridError, GridResult};

/// Hard price floor/ceiling outside which no order is ever submitted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradingBounds {
    pub lower: f64,
    pub upper: f64,
}

impl TradingBounds {
    /// Bounds that accept every price
    pub fn unbounded() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// Inclusive range check
    pub fn contains(&self, price: f64) -> bool {
        price >= self.lower && price <= self.upper
    }
}

impl Default for TradingBounds {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Grid configuration for a single ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Currency pair to trade (e.g., "INJ_USDT")
    pub ticker: String,

    /// Price the ladder is centered around
    pub central_price: f64,

    /// Distance between adjacent levels as a ratio (0.1 == 10%)
    pub distance: f64,

    /// Number of levels above and below the central price
    pub levels_per_side: u32,

    /// Decimal places prices are rounded to
    pub price_decimals: u32,

    /// Quote-currency amount spent per buy
    /// The order size per level is calculated as:
    /// quantity = notional_per_level / level_price
    pub notional_per_level: f64,

    /// Never submit orders below this price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_not_buy_below: Option<f64>,

    /// Never submit orders above this price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_not_buy_above: Option<f64>,

    /// Exchange fee as a fraction of fill value, used when the exchange
    /// does not report one
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,

    /// Fraction of the bought tokens kept back when the take-profit is sized
    #[serde(default)]
    pub retain_ratio: f64,

    /// Decimal places order quantities are truncated to
    #[serde(default = "default_size_decimals")]
    pub size_decimals: u32,
}

fn default_fee_rate() -> f64 {
    0.001
}

fn default_size_decimals() -> u32 {
    6
}

impl GridConfig {
    /// Create a new grid configuration with required parameters
    ///
    /// # Arguments
    /// * `ticker` - Currency pair to trade (e.g., "INJ_USDT")
    /// * `central_price` - Price to center the ladder around
    /// * `distance` - Ratio between adjacent levels (0 < distance < 1)
    /// * `levels_per_side` - Levels generated above and below the center
    /// * `price_decimals` - Rounding precision for level prices
    /// * `notional_per_level` - Quote amount spent on each buy
    pub fn new(
        ticker: impl Into<String>,
        central_price: f64,
        distance: f64,
        levels_per_side: u32,
        price_decimals: u32,
        notional_per_level: f64,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            central_price,
            distance,
            levels_per_side,
            price_decimals,
            notional_per_level,
            do_not_buy_below: None,
            do_not_buy_above: None,
            fee_rate: default_fee_rate(),
            retain_ratio: 0.0,
            size_decimals: default_size_decimals(),
        }
    }

    /// Builder: set the hard trading bounds
    pub fn with_trading_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.do_not_buy_below = Some(lower);
        self.do_not_buy_above = Some(upper);
        self
    }

    /// Builder: set the fallback fee rate
    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Builder: keep a fraction of each position when taking profit
    pub fn with_retain_ratio(mut self, retain_ratio: f64) -> Self {
        self.retain_ratio = retain_ratio;
        self
    }

    /// Builder: set quantity precision
    pub fn with_size_decimals(mut self, size_decimals: u32) -> Self {
        self.size_decimals = size_decimals;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> GridResult<()> {
        if self.ticker.is_empty() {
            return Err(GridError::InvalidConfig("ticker cannot be empty".into()));
        }

        if !(self.central_price.is_finite() && self.central_price > 0.0) {
            return Err(GridError::InvalidConfig(
                "central_price must be positive".into(),
            ));
        }

        if !(self.distance > 0.0 && self.distance < 1.0) {
            return Err(GridError::InvalidConfig(
                "distance must be between 0 and 1 (exclusive)".into(),
            ));
        }

        if self.levels_per_side == 0 {
            return Err(GridError::InvalidConfig(
                "levels_per_side must be at least 1".into(),
            ));
        }

        if !(self.notional_per_level.is_finite() && self.notional_per_level > 0.0) {
            return Err(GridError::InvalidConfig(
                "notional_per_level must be positive".into(),
            ));
        }

        let bounds = self.trading_bounds();
        if bounds.lower >= bounds.upper {
            return Err(GridError::InvalidConfig(format!(
                "do_not_buy_below ({}) must be less than do_not_buy_above ({})",
                bounds.lower, bounds.upper
            )));
        }

        if !(0.0..1.0).contains(&self.retain_ratio) {
            return Err(GridError::InvalidConfig(
                "retain_ratio must be in [0, 1)".into(),
            ));
        }

        if self.fee_rate < 0.0 {
            return Err(GridError::InvalidConfig(
                "fee_rate cannot be negative".into(),
            ));
        }

        Ok(())
    }

    /// Trading bounds, open-ended on any side that is not configured
    pub fn trading_bounds(&self) -> TradingBounds {
        TradingBounds {
            lower: self.do_not_buy_below.unwrap_or(f64::NEG_INFINITY),
            upper: self.do_not_buy_above.unwrap_or(f64::INFINITY),
        }
    }

    /// Calculate buy quantity for a specific price level
    ///
    /// Every level spends the same quote amount, so lower prices buy more
    /// tokens.
    pub fn order_size_at_price(&self, price: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        truncate_to(self.notional_per_level / price, self.size_decimals)
    }

    /// Round a price to the ladder precision
    pub fn round_price(&self, price: f64) -> f64 {
        round_to(price, self.price_decimals)
    }

    /// Truncate a quantity to the configured precision
    pub fn round_size(&self, size: f64) -> f64 {
        truncate_to(size, self.size_decimals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GridConfig {
        GridConfig::new("INJ_USDT", 5.0, 0.1, 2, 3, 10.0)
    }

    #[test]
    fn test_config_validation() {
        assert!(sample().validate().is_ok());

        // Invalid: bounds inverted
        let config = sample().with_trading_bounds(6.0, 4.0);
        assert!(matches!(config.validate(), Err(GridError::InvalidConfig(_))));

        // Invalid: bounds equal
        let config = sample().with_trading_bounds(5.0, 5.0);
        assert!(config.validate().is_err());

        // Invalid: distance out of range
        let mut config = sample();
        config.distance = 1.0;
        assert!(config.validate().is_err());

        // Invalid: no levels
        let mut config = sample();
        config.levels_per_side = 0;
        assert!(config.validate().is_err());

        // Invalid: notional <= 0
        let mut config = sample();
        config.notional_per_level = 0.0;
        assert!(config.validate().is_err());

        // Invalid: retain everything
        assert!(sample().with_retain_ratio(1.0).validate().is_err());
    }

    #[test]
    fn test_order_size_at_price() {
        let config = sample();

        // $10 notional at $5 = 2 tokens
        assert!((config.order_size_at_price(5.0) - 2.0).abs() < 1e-9);
        // Lower price = more tokens
        assert!(config.order_size_at_price(4.05) > config.order_size_at_price(5.5));
        assert_eq!(config.order_size_at_price(0.0), 0.0);
    }

    #[test]
    fn test_trading_bounds() {
        let open = sample().trading_bounds();
        assert!(open.contains(0.0001));
        assert!(open.contains(1_000_000.0));

        let bounded = sample().with_trading_bounds(4.0, 6.0).trading_bounds();
        assert!(bounded.contains(4.0));
        assert!(bounded.contains(6.0));
        assert!(!bounded.contains(6.05));
        assert!(!bounded.contains(3.99));
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let json = r#"{
            "ticker": "INJ_USDT",
            "central_price": 40.0,
            "distance": 0.02,
            "levels_per_side": 5,
            "price_decimals": 3,
            "notional_per_level": 25.0
        }"#;
        let config: GridConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.fee_rate, 0.001);
        assert_eq!(config.retain_ratio, 0.0);
        assert_eq!(config.size_decimals, 6);
        assert_eq!(config.levels_per_side, 5);
        assert!(config.do_not_buy_below.is_none());
    }
}
