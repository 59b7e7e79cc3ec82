//! Reconciliation engine - aligns ladder state with the exchange and decides
//! the next orders to place

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, warn};

use crate::helpers::prices_match;

use super::config::{GridConfig, TradingBounds};
use super::errors::{GridError, GridResult};
use super::executor::{with_timeout, GridExchange};
use super::ladder::PriceLadder;
use super::types::{FillStatus, OpenOrder, OrderRequest, OrderSide, PlacedOrder, TickerOpenOrders};

/// Default bound on a single exchange call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of startup reconciliation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartupReport {
    /// Levels that adopted a remote order
    pub matched: Vec<usize>,
    /// Remote orders left alone
    pub ignored: Vec<OpenOrder>,
}

impl StartupReport {
    /// Matched levels, for excluding them from the initial batch
    pub fn matched_levels(&self) -> HashSet<usize> {
        self.matched.iter().copied().collect()
    }
}

/// Outcome of a batch buy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub requested: usize,
    /// Levels that moved to `BuyPlaced`
    pub placed: Vec<usize>,
    /// Levels the exchange declined; they stay eligible
    pub rejected: Vec<usize>,
}

/// Counters for one `manage_trades` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub polled: usize,
    pub buys_filled: usize,
    pub sells_filled: usize,
    pub buys_submitted: usize,
    pub sells_submitted: usize,
    pub rejected: usize,
    pub errors: usize,
}

impl TickReport {
    /// Check if anything changed on the ladder
    pub fn has_activity(&self) -> bool {
        self.buys_filled + self.sells_filled + self.buys_submitted + self.sells_submitted > 0
    }
}

/// Decides which levels need orders and applies exchange results to them
pub struct ReconciliationEngine {
    config: GridConfig,
    bounds: TradingBounds,
    request_timeout: Duration,
}

impl ReconciliationEngine {
    pub fn new(config: GridConfig) -> Self {
        let bounds = config.trading_bounds();
        Self {
            config,
            bounds,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Builder: bound every exchange call by `timeout`
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Replace the submission guard
    ///
    /// Applies from the next submission on; the ladder is not rebuilt.
    pub fn set_trading_bounds(&mut self, bounds: TradingBounds) {
        info!(
            "[{}] Trading bounds changed to [{}, {}]",
            self.config.ticker, bounds.lower, bounds.upper
        );
        self.bounds = bounds;
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Rebuild level state from the orders resting on the exchange
    ///
    /// A resting buy marks its level `BuyPlaced`. A resting sell marks its
    /// level `SellPlaced` and the level below as holding the buy it closes.
    /// Running this twice on the same snapshot changes nothing the second
    /// time.
    pub fn reconcile_on_startup(
        &self,
        ladder: &mut PriceLadder,
        remote: &[TickerOpenOrders],
    ) -> StartupReport {
        let mut report = StartupReport::default();
        let ticker = &self.config.ticker;

        let orders = remote
            .iter()
            .filter(|group| &group.ticker == ticker)
            .flat_map(|group| group.orders.iter());

        for order in orders {
            let Some(index) = ladder.level_at_price(order.price) else {
                let ambiguity = GridError::ReconciliationAmbiguity {
                    ticker: ticker.clone(),
                    order_id: order.order_id,
                    price: order.price,
                };
                warn!("{}; leaving it alone", ambiguity);
                report.ignored.push(order.clone());
                continue;
            };

            let adopted = match order.side {
                OrderSide::Buy => self.adopt_buy(ladder, index, order),
                OrderSide::Sell => self.adopt_sell(ladder, index, order),
            };

            match adopted {
                Ok(()) => report.matched.push(index),
                Err(e) => {
                    warn!("[{}] Ignoring remote order {}: {}", ticker, order.order_id, e);
                    report.ignored.push(order.clone());
                }
            }
        }

        info!(
            "[{}] Startup reconciliation: {} levels matched, {} orders ignored",
            ticker,
            report.matched.len(),
            report.ignored.len()
        );

        report
    }

    fn adopt_buy(&self, ladder: &mut PriceLadder, index: usize, order: &OpenOrder) -> GridResult<()> {
        let level = ladder
            .level_mut(index)
            .ok_or(GridError::LevelNotFound(index))?;
        if level.restore_buy(order.order_id)? {
            info!("Restored buy #{} on {} at {}", order.order_id, level.name(), level.price);
        }
        Ok(())
    }

    fn adopt_sell(&self, ladder: &mut PriceLadder, index: usize, order: &OpenOrder) -> GridResult<()> {
        let level = ladder
            .level_mut(index)
            .ok_or(GridError::LevelNotFound(index))?;
        let lower = level.lower;
        if level.restore_sell(order.order_id)? {
            info!("Restored sell #{} on {} at {}", order.order_id, level.name(), level.price);
        }

        let Some(lower) = lower.and_then(|i| ladder.level_mut(i)) else {
            warn!("Sell #{} sits on the lowest level; no buy to restore", order.order_id);
            return Ok(());
        };

        // The resting sell carries (1 - retain) of the original buy
        let quantity = match order.quantity {
            Some(q) if q > 0.0 => self.config.round_size(q / (1.0 - self.config.retain_ratio)),
            _ => self.config.order_size_at_price(lower.price),
        };
        if lower.restore_holding(quantity) {
            debug!("Restored holding of {} on {}", quantity, lower.name());
        }
        Ok(())
    }

    /// Submit one buy for every idle level below `market_price`
    ///
    /// Skips levels outside the trading bounds and those in
    /// `already_reconciled`. A rejected order leaves its level idle; the rest
    /// of the batch is unaffected.
    pub async fn batch_buy<E: GridExchange>(
        &self,
        ladder: &mut PriceLadder,
        market_price: f64,
        already_reconciled: &HashSet<usize>,
        exchange: &E,
    ) -> GridResult<BatchReport> {
        let mut targets = Vec::new();
        let mut requests = Vec::new();

        for level in ladder.levels() {
            if !level.can_place_buy()
                || level.price >= market_price
                || already_reconciled.contains(&level.index)
            {
                continue;
            }
            if !self.bounds.contains(level.price) {
                debug!("{} at {} is outside trading bounds", level.name(), level.price);
                continue;
            }
            let quantity = self.config.order_size_at_price(level.price);
            if quantity <= 0.0 {
                continue;
            }
            targets.push(level.index);
            requests.push(OrderRequest::buy(&self.config.ticker, level.price, quantity));
        }

        let mut report = BatchReport {
            requested: requests.len(),
            ..Default::default()
        };
        if requests.is_empty() {
            return Ok(report);
        }

        info!(
            "[{}] Submitting batch of {} buys below {}",
            self.config.ticker,
            requests.len(),
            market_price
        );
        let results = with_timeout(
            "submit_orders",
            self.request_timeout,
            exchange.submit_orders(&requests),
        )
        .await?;

        let mut pending = targets.clone();
        for (position, result) in results.iter().enumerate() {
            let Some(index) = self.correlate(ladder, &targets, &mut pending, position, result) else {
                warn!("Batch result at {} matches no requested level", result.price);
                continue;
            };

            if !result.success {
                self.log_rejection(ladder, index, result);
                report.rejected.push(index);
                continue;
            }

            match ladder.level_mut(index).map(|l| l.place_buy(result.order_id)) {
                Some(Ok(())) => {
                    info!(
                        "Placed buy #{} at {} (size={})",
                        result.order_id, result.price, result.quantity
                    );
                    report.placed.push(index);
                }
                Some(Err(e)) => warn!("Batch result #{} not applied: {}", result.order_id, e),
                None => warn!("Batch result #{} for missing level {}", result.order_id, index),
            }
        }

        // Levels missing from the response are treated as rejected
        report.rejected.extend(pending);

        Ok(report)
    }

    /// Match a batch result to its level, by position or else by price
    fn correlate(
        &self,
        ladder: &PriceLadder,
        targets: &[usize],
        pending: &mut Vec<usize>,
        position: usize,
        result: &PlacedOrder,
    ) -> Option<usize> {
        let decimals = ladder.price_decimals();
        let price_of = |i: usize| ladder.level(i).map(|l| l.price).unwrap_or(f64::NAN);

        let index = targets
            .get(position)
            .copied()
            .filter(|&i| pending.contains(&i) && prices_match(price_of(i), result.price, decimals))
            .or_else(|| {
                pending
                    .iter()
                    .copied()
                    .find(|&i| prices_match(price_of(i), result.price, decimals))
            })?;

        pending.retain(|&i| i != index);
        Some(index)
    }

    // ========================================================================
    // Steady state
    // ========================================================================

    /// One reconciliation pass over every level
    ///
    /// Per level, in order: poll an active buy, poll an active sell, place a
    /// take-profit for inventory held below, or place a buy when the level is
    /// below the market or was just crossed downward (`last > price >= market`).
    /// A take-profit that could not go up while the level above still had its
    /// own buy open is placed by a closing sweep once that buy has filled.
    /// A transient exchange failure ends the pass early; nothing propagates.
    pub async fn manage_trades<E: GridExchange>(
        &self,
        ladder: &mut PriceLadder,
        market_price: f64,
        last_price: Option<f64>,
        exchange: &E,
    ) -> TickReport {
        let mut report = TickReport::default();
        // Orders placed during this pass are not polled until the next one
        let mut fresh = HashSet::new();
        let mut halted = false;

        for index in 0..ladder.len() {
            if fresh.contains(&index) {
                continue;
            }

            let outcome = self
                .reconcile_level(ladder, index, market_price, last_price, exchange, &mut report, &mut fresh)
                .await;

            if let Err(e) = outcome {
                report.errors += 1;
                if e.is_transient() {
                    warn!("[{}] Skipping rest of tick: {}", self.config.ticker, e);
                    halted = true;
                    break;
                }
                warn!("[{}] Level {} not reconciled: {}", self.config.ticker, index, e);
            }
        }

        if !halted {
            if let Err(e) = self.place_missing_take_profits(ladder, exchange, &mut report).await {
                report.errors += 1;
                warn!("[{}] Take-profit sweep stopped: {}", self.config.ticker, e);
            }
        }

        if report.has_activity() {
            info!("[{}] Tick at {}: {:?}", self.config.ticker, market_price, report);
        }
        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn reconcile_level<E: GridExchange>(
        &self,
        ladder: &mut PriceLadder,
        index: usize,
        market_price: f64,
        last_price: Option<f64>,
        exchange: &E,
        report: &mut TickReport,
        fresh: &mut HashSet<usize>,
    ) -> GridResult<()> {
        let level = ladder.level(index).ok_or(GridError::LevelNotFound(index))?;

        match level.active_side() {
            Some(OrderSide::Buy) => {
                if let Some(upper) = self.poll_buy(ladder, index, exchange, report).await? {
                    if self.request_sell(ladder, upper, exchange, report).await? {
                        fresh.insert(upper);
                    }
                }
            }
            Some(OrderSide::Sell) => {
                if let Some(lower) = self.poll_sell(ladder, index, exchange, report).await? {
                    if self.request_buy(ladder, lower, exchange, report).await? {
                        fresh.insert(lower);
                    }
                }
            }
            None => {
                let funded_below = level
                    .lower
                    .and_then(|i| ladder.level(i))
                    .is_some_and(|l| l.is_holding());

                let below_market = level.price < market_price;
                let crossed_down =
                    last_price.is_some_and(|last| last > level.price && level.price >= market_price);

                if funded_below {
                    if self.request_sell(ladder, index, exchange, report).await? {
                        fresh.insert(index);
                    }
                } else if level.can_place_buy() && (below_market || crossed_down) {
                    if crossed_down {
                        debug!("{} at {} crossed downward", level.name(), level.price);
                    }
                    if self.request_buy(ladder, index, exchange, report).await? {
                        fresh.insert(index);
                    }
                }
            }
        }

        Ok(())
    }

    /// Place the sell for every holding level whose upper neighbour is free
    ///
    /// Levels are walked bottom-up, so a buy filled on level `i` finds level
    /// `i + 1` still busy with its own buy until that one is polled.
    async fn place_missing_take_profits<E: GridExchange>(
        &self,
        ladder: &mut PriceLadder,
        exchange: &E,
        report: &mut TickReport,
    ) -> GridResult<()> {
        let waiting: Vec<usize> = ladder
            .levels()
            .iter()
            .filter(|l| l.is_holding())
            .filter_map(|l| l.upper)
            .filter(|&i| ladder.level(i).is_some_and(|u| !u.has_active_order()))
            .collect();

        for index in waiting {
            if self.request_sell(ladder, index, exchange, report).await? {
                debug!("[{}] Late take-profit placed on level {}", self.config.ticker, index);
            }
        }
        Ok(())
    }

    /// Poll an active buy; on fill returns the level to place the sell on
    async fn poll_buy<E: GridExchange>(
        &self,
        ladder: &mut PriceLadder,
        index: usize,
        exchange: &E,
        report: &mut TickReport,
    ) -> GridResult<Option<usize>> {
        let (order_id, default_price) = self.active_order(ladder, index)?;
        let status = with_timeout(
            "fetch_order_status",
            self.request_timeout,
            exchange.fetch_order_status(order_id, &self.config.ticker),
        )
        .await?;
        report.polled += 1;

        let level = ladder
            .level_mut(index)
            .ok_or(GridError::LevelNotFound(index))?;

        match status.status {
            FillStatus::Open => Ok(None),
            FillStatus::Cancelled => {
                level.cancel_order();
                warn!("Buy #{} on {} was cancelled on the exchange", order_id, level.name());
                Ok(None)
            }
            FillStatus::Filled => {
                let price = status.avg_price.unwrap_or(default_price);
                let quantity = if status.filled_quantity > 0.0 {
                    status.filled_quantity
                } else {
                    self.config.order_size_at_price(default_price)
                };
                let fee = status
                    .fee
                    .unwrap_or_else(|| price * quantity * self.config.fee_rate);

                level.fill_buy(quantity, price, fee)?;
                report.buys_filled += 1;
                info!(
                    "Buy #{} filled on {}: {} @ {} (fee: {:.6})",
                    order_id,
                    level.name(),
                    quantity,
                    price,
                    fee
                );

                if level.upper.is_none() {
                    warn!("{} is the top level; no take-profit possible", level.name());
                }
                Ok(level.upper)
            }
        }
    }

    /// Poll an active sell; on fill returns the level to buy again
    async fn poll_sell<E: GridExchange>(
        &self,
        ladder: &mut PriceLadder,
        index: usize,
        exchange: &E,
        report: &mut TickReport,
    ) -> GridResult<Option<usize>> {
        let (order_id, default_price) = self.active_order(ladder, index)?;
        let status = with_timeout(
            "fetch_order_status",
            self.request_timeout,
            exchange.fetch_order_status(order_id, &self.config.ticker),
        )
        .await?;
        report.polled += 1;

        let level = ladder
            .level_mut(index)
            .ok_or(GridError::LevelNotFound(index))?;

        match status.status {
            FillStatus::Open => Ok(None),
            FillStatus::Cancelled => {
                level.cancel_order();
                warn!("Sell #{} on {} was cancelled on the exchange", order_id, level.name());
                Ok(None)
            }
            FillStatus::Filled => {
                let price = status.avg_price.unwrap_or(default_price);
                let quantity = status.filled_quantity;
                let fee = status
                    .fee
                    .unwrap_or_else(|| price * quantity * self.config.fee_rate);

                level.fill_sell(fee)?;
                report.sells_filled += 1;
                let name = level.name();
                let lower = level.lower;

                let Some(below) = lower.and_then(|i| ladder.level_mut(i)) else {
                    info!("Sell #{} filled on {} with no level below", order_id, name);
                    return Ok(None);
                };

                let sold = if quantity > 0.0 { quantity } else { below.tokens };
                let avg_cost = below.avg_cost().unwrap_or(below.price);
                let released_cost = below.release_holding(sold);
                let profit = sold * price - fee - released_cost;
                info!(
                    "Sell #{} filled on {}: {} @ {} (avg cost: {:.6}, fee: {:.6}, profit: {:.6}); {} released",
                    order_id,
                    name,
                    sold,
                    price,
                    avg_cost,
                    fee,
                    profit,
                    below.name()
                );

                Ok(lower)
            }
        }
    }

    fn active_order(&self, ladder: &PriceLadder, index: usize) -> GridResult<(u64, f64)> {
        let level = ladder.level(index).ok_or(GridError::LevelNotFound(index))?;
        let order_id = level.order_id().ok_or(GridError::InvalidTransition {
            index,
            state: level.state(),
            action: "poll without an order",
        })?;
        Ok((order_id, level.price))
    }

    /// Submit a buy at `index` if the level can take one
    ///
    /// Returns `true` when an order was placed. Levels outside the trading
    /// bounds and rejected submissions are no-ops.
    pub async fn request_buy<E: GridExchange>(
        &self,
        ladder: &mut PriceLadder,
        index: usize,
        exchange: &E,
        report: &mut TickReport,
    ) -> GridResult<bool> {
        let level = ladder.level(index).ok_or(GridError::LevelNotFound(index))?;
        if !level.can_place_buy() {
            return Ok(false);
        }
        if !self.bounds.contains(level.price) {
            debug!("Not buying {} at {}: outside trading bounds", level.name(), level.price);
            return Ok(false);
        }

        let quantity = self.config.order_size_at_price(level.price);
        if quantity <= 0.0 {
            return Ok(false);
        }

        let request = OrderRequest::buy(&self.config.ticker, level.price, quantity);
        let Some(placed) = self.submit_one(ladder, index, &request, exchange, report).await? else {
            return Ok(false);
        };

        let level = ladder
            .level_mut(index)
            .ok_or(GridError::LevelNotFound(index))?;
        level.place_buy(placed.order_id)?;
        report.buys_submitted += 1;
        info!(
            "Placed buy #{} on {} at {} (size={})",
            placed.order_id,
            level.name(),
            level.price,
            quantity
        );
        Ok(true)
    }

    /// Submit the take-profit at `index` for the inventory held one level below
    ///
    /// `retain_ratio` applies to everything the level below holds, including
    /// tokens retained from earlier cycles, so retained inventory is partly
    /// sold again on later take-profits rather than kept as a fixed amount.
    pub async fn request_sell<E: GridExchange>(
        &self,
        ladder: &mut PriceLadder,
        index: usize,
        exchange: &E,
        report: &mut TickReport,
    ) -> GridResult<bool> {
        let level = ladder.level(index).ok_or(GridError::LevelNotFound(index))?;
        if level.has_active_order() {
            return Ok(false);
        }
        let Some(below) = level.lower.and_then(|i| ladder.level(i)).filter(|l| l.is_holding()) else {
            return Ok(false);
        };
        if !self.bounds.contains(level.price) {
            debug!("Not selling {} at {}: outside trading bounds", level.name(), level.price);
            return Ok(false);
        }

        let held = if below.tokens > 0.0 {
            below.tokens
        } else {
            self.config.order_size_at_price(below.price)
        };
        let quantity = self.config.round_size(held * (1.0 - self.config.retain_ratio));
        if quantity <= 0.0 {
            return Ok(false);
        }

        let request = OrderRequest::sell(&self.config.ticker, level.price, quantity);
        let Some(placed) = self.submit_one(ladder, index, &request, exchange, report).await? else {
            return Ok(false);
        };

        ladder.place_sell(index, placed.order_id)?;
        report.sells_submitted += 1;
        info!(
            "Placed sell #{} at {} (size={}) for buy on {}",
            placed.order_id,
            request.price,
            quantity,
            index
        );
        Ok(true)
    }

    /// Submit a single order; `None` when the exchange declined it
    async fn submit_one<E: GridExchange>(
        &self,
        ladder: &PriceLadder,
        index: usize,
        request: &OrderRequest,
        exchange: &E,
        report: &mut TickReport,
    ) -> GridResult<Option<PlacedOrder>> {
        let results = with_timeout(
            "submit_orders",
            self.request_timeout,
            exchange.submit_orders(std::slice::from_ref(request)),
        )
        .await?;

        let placed = results.into_iter().next().ok_or_else(|| {
            GridError::Exchange(format!("empty response for order at {}", request.price))
        })?;

        if !placed.success || placed.order_id == 0 {
            self.log_rejection(ladder, index, &placed);
            report.rejected += 1;
            return Ok(None);
        }
        Ok(Some(placed))
    }

    fn log_rejection(&self, ladder: &PriceLadder, index: usize, result: &PlacedOrder) {
        let rejection = GridError::OrderRejected {
            ticker: self.config.ticker.clone(),
            price: result.price,
            reason: result.label.clone().unwrap_or_else(|| "unknown".into()),
        };
        let name = ladder.level(index).map(|l| l.name()).unwrap_or_default();
        warn!("{} ({}); retrying on a later tick", rejection, name);
    }
}
