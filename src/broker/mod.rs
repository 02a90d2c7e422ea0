//! Brokerage integrations.
//!
//! Defines the collaborator traits the scan engine talks to and provides
//! the Robinhood REST implementation:
//! - `AccountData`: watchlists, open positions, holdings, profile, instruments
//! - `MarketData`: latest quotes and historical bars
//! - `Trading`: market order submission

pub mod robinhood;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::types::{
    Bounds, Candle, InstrumentId, Interval, OpenPositionRecord, OrderReceipt, PriceQuote,
    Profile, RawHoldings, Span, Symbol,
};

/// Read access to the account.
#[async_trait]
pub trait AccountData: Send + Sync {
    /// Symbols across every watchlist, deduplicated.
    async fn get_watchlist_symbols(&self) -> Result<BTreeSet<Symbol>>;

    /// Open position records in broker order.
    async fn get_open_positions(&self) -> Result<Vec<OpenPositionRecord>>;

    /// Current holdings snapshot (quantity, average cost, equity per symbol).
    async fn get_holdings(&self) -> Result<RawHoldings>;

    /// Cash and total equity.
    async fn get_profile(&self) -> Result<Profile>;

    /// Instrument identifier for a symbol, `None` if the broker has none.
    async fn resolve_instrument(&self, symbol: &Symbol) -> Result<Option<InstrumentId>>;

    /// Symbol for an instrument identifier.
    async fn symbol_for_instrument(&self, instrument: &InstrumentId) -> Result<Symbol>;
}

/// Market data.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Latest price per symbol.
    ///
    /// The returned vector has the same length and order as `symbols`.
    /// A symbol the broker could not price is reported as zero.
    async fn get_price_quotes(&self, symbols: &[Symbol]) -> Result<Vec<PriceQuote>>;

    async fn get_historical_data(
        &self,
        symbol: &Symbol,
        interval: Interval,
        span: Span,
        bounds: Bounds,
    ) -> Result<Vec<Candle>>;
}

/// Order submission. Only `OrderGate` holds one of these.
#[async_trait]
pub trait Trading: Send + Sync {
    async fn submit_market_sell(&self, symbol: &Symbol, quantity: u64) -> Result<OrderReceipt>;

    async fn submit_market_buy(&self, symbol: &Symbol, quantity: u64) -> Result<OrderReceipt>;
}
