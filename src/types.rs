//! Shared types for the rebalancer.
//!
//! These types form the data model used across all modules. Everything
//! here is scan-scoped: built from a broker snapshot at the start of a
//! scan and dropped when the scan finishes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Symbol & instrument identifiers
// ---------------------------------------------------------------------------

/// Ticker of a tradable instrument. Always upper-case, never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: &str) -> Result<Self, BotError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(BotError::InvalidSymbol(raw.to_string()));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Symbol {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Symbol::new(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = BotError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::new(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

/// Brokerage-internal key correlating a symbol with position records.
/// For Robinhood this is the instrument URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(pub String);

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Latest price for a symbol at scan time. Zero marks a missing quote.
pub type PriceQuote = Decimal;

// ---------------------------------------------------------------------------
// Account snapshot
// ---------------------------------------------------------------------------

/// Account-level aggregate, read once per scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub cash: Decimal,
    pub equity: Decimal,
}

impl Profile {
    /// Portfolio value excluding cash.
    pub fn non_cash_value(&self) -> Decimal {
        self.equity - self.cash
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cash=${:.2} equity=${:.2}", self.cash, self.equity)
    }
}

/// One open-position record as the broker reports it, before it is
/// matched to a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPositionRecord {
    pub instrument: InstrumentId,
    pub quantity: Decimal,
    /// Raw creation timestamp string, parsed during enrichment.
    pub created_at: String,
}

/// A held position before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHolding {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub equity: Decimal,
}

/// Raw holdings snapshot keyed by symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawHoldings {
    entries: BTreeMap<Symbol, RawHolding>,
}

impl RawHoldings {
    /// Build a snapshot, rejecting duplicate symbols and negative quantities.
    pub fn from_holdings(holdings: Vec<RawHolding>) -> Result<Self, BotError> {
        let mut entries = BTreeMap::new();
        for holding in holdings {
            if holding.quantity < Decimal::ZERO {
                return Err(BotError::MalformedInput(format!(
                    "negative quantity {} for {}",
                    holding.quantity, holding.symbol
                )));
            }
            let symbol = holding.symbol.clone();
            if entries.insert(symbol.clone(), holding).is_some() {
                return Err(BotError::MalformedInput(format!(
                    "duplicate holding for {symbol}"
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &RawHolding> {
        self.entries.values()
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&RawHolding> {
        self.entries.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Enriched holdings
// ---------------------------------------------------------------------------

/// When a position was opened, or the sentinel when the broker had no
/// matching record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquiredAt {
    At(DateTime<Utc>),
    NotFound,
}

impl AcquiredAt {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            AcquiredAt::At(ts) => Some(*ts),
            AcquiredAt::NotFound => None,
        }
    }
}

impl fmt::Display for AcquiredAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquiredAt::At(ts) => write!(f, "{}", ts.to_rfc3339()),
            AcquiredAt::NotFound => write!(f, "not found"),
        }
    }
}

/// A held position with its acquisition time attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub equity: Decimal,
    pub acquired_at: AcquiredAt,
}

impl Position {
    pub fn from_raw(raw: &RawHolding, acquired_at: AcquiredAt) -> Self {
        Self {
            symbol: raw.symbol.clone(),
            quantity: raw.quantity,
            average_cost: raw.average_cost,
            equity: raw.equity,
            acquired_at,
        }
    }

    /// Whole shares held; fractional remainders are dropped.
    pub fn whole_shares(&self) -> u64 {
        use rust_decimal::prelude::ToPrimitive;
        self.quantity.trunc().to_u64().unwrap_or(0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} qty={} avg=${:.2} equity=${:.2} acquired={}",
            self.symbol, self.quantity, self.average_cost, self.equity, self.acquired_at,
        )
    }
}

/// Enriched holdings keyed by symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HoldingsMap {
    positions: BTreeMap<Symbol, Position>,
}

impl HoldingsMap {
    /// Build a map, rejecting duplicate symbols.
    pub fn from_positions(positions: Vec<Position>) -> Result<Self, BotError> {
        let mut map = BTreeMap::new();
        for position in positions {
            let symbol = position.symbol.clone();
            if map.insert(symbol.clone(), position).is_some() {
                return Err(BotError::MalformedInput(format!(
                    "duplicate position for {symbol}"
                )));
            }
        }
        Ok(Self { positions: map })
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.positions.keys()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl FromIterator<Position> for HoldingsMap {
    /// Later positions replace earlier ones with the same symbol.
    fn from_iter<I: IntoIterator<Item = Position>>(iter: I) -> Self {
        Self {
            positions: iter.into_iter().map(|p| (p.symbol.clone(), p)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Receipt returned after an order is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: u64,
    /// Broker-reported order state ("queued", "confirmed", ...).
    pub state: String,
    pub timestamp: DateTime<Utc>,
}

impl OrderReceipt {
    /// Receipt for an order that was only logged.
    pub fn dry_run(symbol: &Symbol, side: OrderSide, quantity: u64) -> Self {
        Self {
            order_id: format!("dry-run-{}", uuid::Uuid::new_v4()),
            symbol: symbol.clone(),
            side,
            quantity,
            state: "dry-run".to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.order_id.starts_with("dry-run-")
    }
}

impl fmt::Display for OrderReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} x{} [{}] ({})",
            self.side, self.symbol, self.quantity, self.order_id, self.state,
        )
    }
}

// ---------------------------------------------------------------------------
// Historical data
// ---------------------------------------------------------------------------

/// One historical price bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub begins_at: DateTime<Utc>,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    FiveMinute,
    TenMinute,
    Hour,
    Day,
    Week,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::FiveMinute => "5minute",
            Interval::TenMinute => "10minute",
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    Day,
    Week,
    Month,
    ThreeMonth,
    Year,
    FiveYear,
}

impl Span {
    pub fn as_str(&self) -> &'static str {
        match self {
            Span::Day => "day",
            Span::Week => "week",
            Span::Month => "month",
            Span::ThreeMonth => "3month",
            Span::Year => "year",
            Span::FiveYear => "5year",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounds {
    Regular,
    Extended,
    Trading,
}

impl Bounds {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bounds::Regular => "regular",
            Bounds::Extended => "extended",
            Bounds::Trading => "trading",
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the rebalancer.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("{collaborator} call failed: {message}")]
    ExternalCall { collaborator: String, message: String },

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Quote count mismatch: requested {requested}, received {received}")]
    QuoteMismatch { requested: usize, received: usize },

    #[error("Not held: {0}")]
    NotHeld(Symbol),

    #[error("Nothing to sell: {symbol} holds only {quantity} shares")]
    NothingToSell { symbol: Symbol, quantity: Decimal },

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
