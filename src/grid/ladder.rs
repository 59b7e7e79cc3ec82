//! Price ladder - geometric level generation and region queries

use serde::{Deserialize, Serialize};

use crate::helpers::{prices_match, round_to};

use super::config::GridConfig;
use super::errors::{GridError, GridResult};
use super::level::GridLevel;

/// Pair of adjacent ladder levels bracketing a price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub lower: usize,
    pub upper: usize,
}

/// Serializable view of the ladder for logging and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderSnapshot {
    pub ticker: String,
    pub central_price: f64,
    pub price_decimals: u32,
    pub levels: Vec<GridLevel>,
}

/// Fixed ladder of price levels around a central price
///
/// Levels live in a single ascending `Vec`; neighbors are indices into it.
/// The set of levels never changes after [`PriceLadder::build`].
#[derive(Debug, Clone)]
pub struct PriceLadder {
    ticker: String,
    central_price: f64,
    price_decimals: u32,
    levels: Vec<GridLevel>,
}

impl PriceLadder {
    /// Build the ladder from a grid configuration
    pub fn build(config: &GridConfig) -> GridResult<Self> {
        config.validate()?;

        let prices = Self::calculate_prices(
            config.central_price,
            config.distance,
            config.levels_per_side,
            config.price_decimals,
        );

        if prices.first().map_or(true, |&p| p <= 0.0) {
            return Err(GridError::InvalidConfig(format!(
                "lowest level rounds to a non-positive price with {} decimals",
                config.price_decimals
            )));
        }

        if prices.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GridError::InvalidConfig(format!(
                "distance {} is too small for {} price decimals: levels collapse",
                config.distance, config.price_decimals
            )));
        }

        let last = prices.len() - 1;
        let levels = prices
            .iter()
            .enumerate()
            .map(|(i, &price)| {
                let lower = (i > 0).then(|| i - 1);
                let upper = (i < last).then(|| i + 1);
                GridLevel::new(i, price, lower, upper)
            })
            .collect();

        Ok(Self {
            ticker: config.ticker.clone(),
            central_price: config.round_price(config.central_price),
            price_decimals: config.price_decimals,
            levels,
        })
    }

    /// Generate the ascending ladder prices
    ///
    /// Each step multiplies the previous (already rounded) price by `1 ± d`
    /// and rounds again, so spacing is geometric.
    pub fn calculate_prices(central: f64, distance: f64, per_side: u32, decimals: u32) -> Vec<f64> {
        let center = round_to(central, decimals);
        let mut prices = Vec::with_capacity(2 * per_side as usize + 1);
        prices.push(center);

        let mut next = center;
        let mut prev = center;
        for _ in 0..per_side {
            next = round_to(next + next * distance, decimals);
            prev = round_to(prev - prev * distance, decimals);
            prices.push(next);
            prices.push(prev);
        }

        prices.sort_by(|a, b| a.total_cmp(b));
        prices
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn price_decimals(&self) -> u32 {
        self.price_decimals
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&GridLevel> {
        self.levels.get(index)
    }

    pub fn level_mut(&mut self, index: usize) -> Option<&mut GridLevel> {
        self.levels.get_mut(index)
    }

    /// Ascending level prices
    pub fn prices(&self) -> Vec<f64> {
        self.levels.iter().map(|l| l.price).collect()
    }

    /// Adjacent levels bracketing `market_price`
    ///
    /// A price exactly on a level belongs to the region above it. Outside the
    /// ladder the two outermost levels on that side are returned.
    pub fn region(&self, market_price: f64) -> Region {
        let n = self.levels.len();
        let upper = self
            .levels
            .partition_point(|l| l.price <= market_price)
            .clamp(1, n - 1);
        Region {
            lower: upper - 1,
            upper,
        }
    }

    /// Prices of the bracketing pair, ordered (lower, upper)
    ///
    /// This is the pair around the price, not the two levels closest to it:
    /// the two closest can both sit on one side of it.
    pub fn nearest_pair(&self, market_price: f64) -> (f64, f64) {
        let region = self.region(market_price);
        (
            self.levels[region.lower].price,
            self.levels[region.upper].price,
        )
    }

    /// Relative distance from `market_price` to the closest level
    pub fn proximity(&self, market_price: f64) -> f64 {
        let (lower, upper) = self.nearest_pair(market_price);
        let to_lower = (market_price - lower).abs() / lower;
        let to_upper = (upper - market_price).abs() / upper;
        to_lower.min(to_upper)
    }

    /// Check if `market_price` is within `band` (a ratio) of any level
    pub fn is_near_level(&self, market_price: f64, band: f64) -> bool {
        self.proximity(market_price) <= band
    }

    /// Exact-match lookup by price rounded to the ladder precision
    pub fn level_at_price(&self, price: f64) -> Option<usize> {
        self.levels
            .iter()
            .position(|l| prices_match(l.price, price, self.price_decimals))
    }

    /// Record an accepted take-profit at `index`
    ///
    /// Requires the level below to hold a filled buy.
    pub fn place_sell(&mut self, index: usize, order_id: u64) -> GridResult<()> {
        let lower = self
            .level(index)
            .ok_or(GridError::LevelNotFound(index))?
            .lower;

        let funded = lower
            .and_then(|i| self.levels.get(i))
            .is_some_and(|l| l.is_holding());

        let level = &mut self.levels[index];
        if !funded {
            return Err(GridError::InvalidTransition {
                index,
                state: level.state(),
                action: "place sell without a filled buy below",
            });
        }
        level.place_sell(order_id)
    }

    /// Serializable copy of the current ladder state
    pub fn snapshot(&self) -> LadderSnapshot {
        LadderSnapshot {
            ticker: self.ticker.clone(),
            central_price: self.central_price,
            price_decimals: self.price_decimals,
            levels: self.levels.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::types::LevelState;

    fn ladder(central: f64, d: f64, k: u32, p: u32) -> PriceLadder {
        PriceLadder::build(&GridConfig::new("INJ_USDT", central, d, k, p, 10.0)).unwrap()
    }

    #[test]
    fn test_reference_ladder() {
        let ladder = ladder(5.0, 0.1, 2, 3);
        assert_eq!(ladder.prices(), vec![4.05, 4.5, 5.0, 5.5, 6.05]);
        assert_eq!(ladder.snapshot().central_price, 5.0);
    }

    #[test]
    fn test_ladder_shape_properties() {
        let cases = [
            (5.0, 0.1, 2, 3),
            (5.0, 0.1, 11, 3),
            (0.2138, 0.1, 5, 5),
            (40.0, 0.02, 8, 3),
            (27123.45, 0.005, 10, 2),
            (1.0, 0.25, 4, 4),
        ];

        for (central, d, k, p) in cases {
            let ladder = ladder(central, d, k, p);
            let prices = ladder.prices();

            assert_eq!(prices.len(), 2 * k as usize + 1);
            assert!(prices.windows(2).all(|w| w[0] < w[1]), "not ascending: {prices:?}");

            let mid = k as usize;
            assert_eq!(prices[mid], round_to(central, p));

            for i in mid..prices.len() - 1 {
                let expected = round_to(prices[i] + prices[i] * d, p);
                assert!(prices_match(prices[i + 1], expected, p));
            }
            for i in (1..=mid).rev() {
                let expected = round_to(prices[i] - prices[i] * d, p);
                assert!(prices_match(prices[i - 1], expected, p));
            }
        }
    }

    #[test]
    fn test_neighbor_links() {
        let ladder = ladder(5.0, 0.1, 2, 3);
        let levels = ladder.levels();

        assert_eq!(levels[0].lower, None);
        assert_eq!(levels[0].upper, Some(1));
        assert_eq!(levels[2].lower, Some(1));
        assert_eq!(levels[2].upper, Some(3));
        assert_eq!(levels[4].upper, None);
        assert!(levels.iter().all(|l| l.state() == LevelState::Idle));
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let config = GridConfig::new("INJ_USDT", 5.0, 0.1, 2, 3, 10.0).with_trading_bounds(6.0, 4.0);
        assert!(matches!(
            PriceLadder::build(&config),
            Err(GridError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_collapsing_levels_rejected() {
        // 0.1% steps cannot be represented with 0 decimals around 5
        let config = GridConfig::new("INJ_USDT", 5.0, 0.001, 2, 0, 10.0);
        assert!(PriceLadder::build(&config).is_err());
    }

    #[test]
    fn test_nearest_pair() {
        let ladder = ladder(5.0, 0.1, 2, 3);

        assert_eq!(ladder.nearest_pair(5.2), (5.0, 5.5));
        assert_eq!(ladder.nearest_pair(5.51), (5.5, 6.05));
        assert_eq!(ladder.nearest_pair(4.4), (4.05, 4.5));
        // Exactly on a level belongs to the region above
        assert_eq!(ladder.nearest_pair(5.0), (5.0, 5.5));
        // Outside the ladder
        assert_eq!(ladder.nearest_pair(1.0), (4.05, 4.5));
        assert_eq!(ladder.nearest_pair(9.0), (5.5, 6.05));
        assert_eq!(ladder.nearest_pair(6.05), (5.5, 6.05));
    }

    #[test]
    fn test_nearest_pair_brackets_market() {
        let ladder = ladder(5.0, 0.1, 4, 3);
        let (low, high) = (ladder.prices()[0], *ladder.prices().last().unwrap());

        let mut market = 2.0;
        while market < 9.0 {
            let (lower, upper) = ladder.nearest_pair(market);
            assert!(lower <= upper);
            if market >= low && market <= high {
                assert!(lower <= market && market <= upper, "{market} not in ({lower}, {upper})");
            }
            market += 0.013;
        }
    }

    #[test]
    fn test_region_changes_across_levels() {
        let ladder = ladder(5.0, 0.1, 2, 3);
        assert_eq!(ladder.region(5.6), Region { lower: 3, upper: 4 });
        assert_eq!(ladder.region(5.4), Region { lower: 2, upper: 3 });
        assert_eq!(ladder.region(5.45), ladder.region(5.2));
    }

    #[test]
    fn test_proximity() {
        let ladder = ladder(5.0, 0.1, 2, 3);
        assert!(ladder.is_near_level(5.52, 0.005));
        assert!(ladder.is_near_level(4.99, 0.005));
        assert!(!ladder.is_near_level(5.25, 0.005));
    }

    #[test]
    fn test_level_at_price() {
        let ladder = ladder(5.0, 0.1, 2, 3);
        assert_eq!(ladder.level_at_price(5.5), Some(3));
        assert_eq!(ladder.level_at_price(6.050000000000001), Some(4));
        assert_eq!(ladder.level_at_price(5.0004), Some(2));
        assert_eq!(ladder.level_at_price(5.2), None);
    }

    #[test]
    fn test_place_sell_requires_filled_buy_below() {
        let mut ladder = ladder(5.0, 0.1, 2, 3);

        assert!(ladder.place_sell(3, 9).is_err());
        assert!(ladder.place_sell(0, 9).is_err());

        let below = ladder.level_mut(2).unwrap();
        below.place_buy(1).unwrap();
        below.fill_buy(2.0, 5.0, 0.0).unwrap();

        ladder.place_sell(3, 9).unwrap();
        assert_eq!(ladder.level(3).unwrap().state(), LevelState::SellPlaced);
        assert!(matches!(ladder.place_sell(42, 1), Err(GridError::LevelNotFound(42))));
    }

    #[test]
    fn test_snapshot_serializes() {
        let ladder = ladder(5.0, 0.1, 2, 3);
        let json = serde_json::to_string(&ladder.snapshot()).unwrap();
        assert!(json.contains("\"ticker\":\"INJ_USDT\""));

        let back: LadderSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.levels.len(), 5);
        assert_eq!(back.levels[3].price, 5.5);
    }
}
