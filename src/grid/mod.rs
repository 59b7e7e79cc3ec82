//! Grid/DCA trading engine
//!
//! Maintains a ladder of fixed price levels around a reference price, buys on
//! levels the market has crossed downward and places a take-profit one level
//! above every filled buy.
//!
//! # Architecture
//!
//! The grid module is organized into several sub-modules:
//!
//! - [`config`] - Grid configuration and validation
//! - [`types`] - Core data types (OrderSide, LevelState, order shapes)
//! - [`errors`] - Grid-specific error types
//! - [`level`] - Single level with its order-lifecycle state machine
//! - [`ladder`] - Geometric price ladder (arena of levels)
//! - [`price_cache`] - Single-writer latest-price store
//! - [`executor`] - Exchange abstraction (mockable for testing)
//! - [`paper`] - In-memory paper exchange
//! - [`engine`] - Startup reconciliation, batch buy and per-tick trade management
//! - [`feed`] - Price polling task
//! - [`supervisor`] - Per-ticker control loop
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use dca_grid_bot::grid::{
//!     price_cache, GridConfig, PaperExchange, SupervisorConfig, TickerSupervisor,
//! };
//!
//! // 5 levels: 4.05, 4.5, 5, 5.5, 6.05 with $10 per buy
//! let config = GridConfig::new("INJ_USDT", 5.0, 0.1, 2, 3, 10.0)
//!     .with_trading_bounds(4.0, 7.0);
//!
//! let (writer, cache) = price_cache(["INJ_USDT"]);
//! let exchange = Arc::new(PaperExchange::default());
//! let supervisor =
//!     TickerSupervisor::new(config, cache, exchange, SupervisorConfig::default())?;
//!
//! writer.publish("INJ_USDT", 5.2);
//! supervisor.run(shutdown_rx).await;
//! ```
//!
//! # Testing
//!
//! ```rust,ignore
//! use dca_grid_bot::grid::executor::mock::MockExchange;
//!
//! let exchange = MockExchange::new();
//! exchange.reject_at(4.5).await;
//! ```

pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod feed;
pub mod ladder;
pub mod level;
pub mod paper;
pub mod price_cache;
pub mod supervisor;
pub mod types;

// Re-export commonly used types
pub use config::{GridConfig, TradingBounds};
pub use engine::{BatchReport, ReconciliationEngine, StartupReport, TickReport};
pub use errors::{GridError, GridResult};
pub use executor::{with_timeout, GridExchange};
pub use feed::{FeedConfig, PriceFeedTask};
pub use ladder::{LadderSnapshot, PriceLadder, Region};
pub use level::GridLevel;
pub use paper::{PaperExchange, PaperExchangeInput};
pub use price_cache::{price_cache, PriceCache, PriceWriter};
pub use supervisor::{SupervisorConfig, TickerSupervisor};
pub use types::{
    FillStatus, LevelState, OpenOrder, OrderRequest, OrderSide, OrderStatus, PlacedOrder,
    SupervisorState, TickerOpenOrders,
};
