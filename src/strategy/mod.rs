//! Strategy layer: buy/sell selection and position sizing.
//!
//! Selection is a plug-in point: implement `SignalStrategy` to decide
//! which held symbols to sell and which watchlist symbols to buy. The
//! default `NoSignals` never trades.

pub mod sizing;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};

use crate::broker::MarketData;
use crate::types::{HoldingsMap, Profile, Symbol};

/// Everything a strategy may look at when selecting.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext<'a> {
    pub watchlist: &'a BTreeSet<Symbol>,
    pub portfolio: &'a [Symbol],
    pub holdings: &'a HoldingsMap,
    pub profile: &'a Profile,
}

#[async_trait]
pub trait SignalStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Held symbols to sell this scan.
    async fn select_sells(
        &self,
        ctx: &ScanContext<'_>,
        market: &dyn MarketData,
    ) -> Result<Vec<Symbol>>;

    /// Symbols to buy this scan, highest priority first. Order matters:
    /// capital is allocated in this order.
    async fn select_buys(
        &self,
        ctx: &ScanContext<'_>,
        market: &dyn MarketData,
    ) -> Result<Vec<Symbol>>;
}

/// Never sells, never buys.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSignals;

#[async_trait]
impl SignalStrategy for NoSignals {
    fn name(&self) -> &str {
        "no-signals"
    }

    async fn select_sells(&self, _: &ScanContext<'_>, _: &dyn MarketData) -> Result<Vec<Symbol>> {
        Ok(Vec::new())
    }

    async fn select_buys(&self, _: &ScanContext<'_>, _: &dyn MarketData) -> Result<Vec<Symbol>> {
        Ok(Vec::new())
    }
}

/// Drop repeated symbols, keeping the first occurrence.
pub fn dedup_in_order(symbols: Vec<Symbol>) -> Vec<Symbol> {
    let mut seen = HashSet::with_capacity(symbols.len());
    symbols
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
