#![deny(unreachable_pub)]
pub mod config;
pub mod grid;
pub mod runner;

mod helpers;
pub use helpers::{prices_match, round_to, truncate_to};
pub use runner::{init_logging, BotRunner};
