//! rebalancer: periodic portfolio-rebalancing engine for a brokerage account.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod broker;
pub mod strategy;
pub mod engine;
pub mod storage;
