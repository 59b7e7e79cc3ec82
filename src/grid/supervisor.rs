//! Per-ticker control loop
//!
//! `WaitingForPrice -> Bootstrapping -> SteadyState`. The supervisor owns its
//! ladder outright, so level state needs no locking; the price cache is the
//! only thing it shares.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::config::GridConfig;
use super::engine::{ReconciliationEngine, TickReport};
use super::errors::GridResult;
use super::executor::{with_timeout, GridExchange};
use super::ladder::{PriceLadder, Region};
use super::price_cache::PriceCache;
use super::types::SupervisorState;

/// Supervisor timing and gating configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub tick_interval: Duration,
    /// Bound on a single wait for the first price
    pub price_wait_timeout: Duration,
    /// Relative distance to a level that counts as "near" (0.005 == 0.5%)
    pub proximity_band: f64,
    /// Force a full pass after this many gated-out ticks (0 disables)
    pub full_scan_every: u32,
    pub request_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            price_wait_timeout: Duration::from_secs(5),
            proximity_band: 0.005,
            full_scan_every: 30,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Drives one ticker's ladder from price updates
pub struct TickerSupervisor<E: GridExchange> {
    ladder: PriceLadder,
    engine: ReconciliationEngine,
    cache: PriceCache,
    exchange: Arc<E>,
    config: SupervisorConfig,
    state: SupervisorState,
    last_region: Option<Region>,
    last_price: Option<f64>,
    idle_ticks: u32,
    last_report: Option<TickReport>,
}

impl<E: GridExchange + 'static> TickerSupervisor<E> {
    /// Build the ladder for `grid` and start in `WaitingForPrice`
    pub fn new(
        grid: GridConfig,
        cache: PriceCache,
        exchange: Arc<E>,
        config: SupervisorConfig,
    ) -> GridResult<Self> {
        let ladder = PriceLadder::build(&grid)?;
        let engine = ReconciliationEngine::new(grid).with_request_timeout(config.request_timeout);

        info!(
            "[{}] Ladder built: {} levels from {} to {}",
            ladder.ticker(),
            ladder.len(),
            ladder.prices().first().copied().unwrap_or_default(),
            ladder.prices().last().copied().unwrap_or_default()
        );

        Ok(Self {
            ladder,
            engine,
            cache,
            exchange,
            config,
            state: SupervisorState::WaitingForPrice,
            last_region: None,
            last_price: None,
            idle_ticks: 0,
            last_report: None,
        })
    }

    pub fn ticker(&self) -> &str {
        self.ladder.ticker()
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn ladder(&self) -> &PriceLadder {
        &self.ladder
    }

    /// Report from the most recent reconciliation pass
    pub fn last_report(&self) -> Option<TickReport> {
        self.last_report
    }

    /// Advance the state machine by one step
    pub async fn tick(&mut self) -> SupervisorState {
        match self.state {
            SupervisorState::WaitingForPrice => self.wait_for_price().await,
            SupervisorState::Bootstrapping => self.bootstrap().await,
            SupervisorState::SteadyState => self.steady_tick().await,
        }
        self.state
    }

    async fn wait_for_price(&mut self) {
        let ticker = self.ladder.ticker().to_string();
        match self
            .cache
            .wait_for_price(&ticker, self.config.price_wait_timeout)
            .await
        {
            Ok(price) => {
                info!("[{}] First price {}; bootstrapping", ticker, price);
                self.state = SupervisorState::Bootstrapping;
                self.bootstrap().await;
            }
            Err(e) => debug!("[{}] Still waiting for a price: {}", ticker, e),
        }
    }

    /// Startup reconciliation followed by the initial batch buy
    ///
    /// Either step failing leaves the supervisor in `Bootstrapping`; the
    /// whole sequence is retried on the next tick.
    async fn bootstrap(&mut self) {
        let Some(price) = self.cache.latest(self.ladder.ticker()) else {
            self.state = SupervisorState::WaitingForPrice;
            return;
        };

        let remote = match with_timeout(
            "fetch_open_orders",
            self.config.request_timeout,
            self.exchange.fetch_open_orders(),
        )
        .await
        {
            Ok(remote) => remote,
            Err(e) => {
                warn!("[{}] Open orders unavailable, retrying: {}", self.ticker(), e);
                return;
            }
        };

        let startup = self.engine.reconcile_on_startup(&mut self.ladder, &remote);
        let batch = self
            .engine
            .batch_buy(
                &mut self.ladder,
                price,
                &startup.matched_levels(),
                self.exchange.as_ref(),
            )
            .await;

        match batch {
            Ok(batch) => {
                info!(
                    "[{}] Bootstrapped at {}: {} buys placed, {} rejected",
                    self.ticker(),
                    price,
                    batch.placed.len(),
                    batch.rejected.len()
                );
                self.last_region = Some(self.ladder.region(price));
                self.last_price = Some(price);
                self.state = SupervisorState::SteadyState;
            }
            Err(e) => warn!("[{}] Initial batch failed, retrying: {}", self.ticker(), e),
        }
    }

    /// Run a reconciliation pass only when a crossing is plausible
    async fn steady_tick(&mut self) {
        let Some(price) = self.cache.latest(self.ladder.ticker()) else {
            return;
        };

        let region = self.ladder.region(price);
        let region_changed = self.last_region != Some(region);
        let near_level = self.ladder.is_near_level(price, self.config.proximity_band);
        self.idle_ticks += 1;
        let full_scan =
            self.config.full_scan_every > 0 && self.idle_ticks >= self.config.full_scan_every;

        if region_changed || near_level || full_scan {
            if region_changed {
                let (lower, upper) = self.ladder.nearest_pair(price);
                debug!("[{}] Price {} entered ({}, {})", self.ticker(), price, lower, upper);
            }
            let report = self
                .engine
                .manage_trades(
                    &mut self.ladder,
                    price,
                    self.last_price,
                    self.exchange.as_ref(),
                )
                .await;
            self.last_report = Some(report);
            self.idle_ticks = 0;
        }

        self.last_region = Some(region);
        self.last_price = Some(price);
    }

    /// Tick until `shutdown` flips to `true`
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("[{}] Supervisor started", self.ticker());

        let mut timer = interval(self.config.tick_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        match serde_json::to_string(&self.ladder.snapshot()) {
            Ok(json) => debug!("[{}] Final ladder: {}", self.ticker(), json),
            Err(e) => warn!("[{}] Could not serialize ladder: {}", self.ticker(), e),
        }
        info!("[{}] Supervisor stopped in {:?}", self.ticker(), self.state);
    }
}
