//! Position sizing.
//!
//! Splits buying power across buy candidates so each new position lands
//! near the average size of the existing holdings. Candidates are sized
//! strictly in list order and the first one that is too expensive stops
//! the whole allocation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::types::{BotError, HoldingsMap, PriceQuote, Profile, Symbol};

/// Prices up to this multiple of the ideal size are still bought
/// (one share or more, sized against the stretched budget).
const STRETCH_FACTOR: Decimal = dec!(1.5);

/// `n / d`, or exactly zero when `d` is zero.
pub fn safe_division(n: Decimal, d: Decimal) -> Decimal {
    if d.is_zero() {
        Decimal::ZERO
    } else {
        n / d
    }
}

// ---------------------------------------------------------------------------
// Sizing result
// ---------------------------------------------------------------------------

/// Shares to buy for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct SizedOrder {
    pub symbol: Symbol,
    pub price: PriceQuote,
    pub shares: u64,
}

/// Where allocation stopped and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingHalt {
    pub symbol: Symbol,
    pub price: PriceQuote,
    pub ideal_position_size: Decimal,
}

/// Outcome of sizing one candidate list.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingPlan {
    pub ideal_position_size: Decimal,
    /// Sized candidates in list order, up to (not including) the halt.
    pub orders: Vec<SizedOrder>,
    pub halted: Option<SizingHalt>,
}

impl SizingPlan {
    fn empty() -> Self {
        Self {
            ideal_position_size: Decimal::ZERO,
            orders: Vec::new(),
            halted: None,
        }
    }

    pub fn shares_for(&self, symbol: &Symbol) -> Option<u64> {
        self.orders
            .iter()
            .find(|o| &o.symbol == symbol)
            .map(|o| o.shares)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.orders.iter().map(|o| &o.symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Sizer
// ---------------------------------------------------------------------------

pub struct PositionSizer;

impl PositionSizer {
    /// Target dollar size of each new position.
    ///
    /// `(non_cash / holdings + cash / candidates) / (2 * candidates)`, where a
    /// portfolio with no holdings contributes zero for the first term.
    pub fn ideal_position_size(
        profile: &Profile,
        holdings_count: usize,
        candidate_count: usize,
    ) -> Decimal {
        if candidate_count == 0 {
            return Decimal::ZERO;
        }
        let candidates = Decimal::from(candidate_count as u64);
        let per_holding_share =
            safe_division(profile.non_cash_value(), Decimal::from(holdings_count as u64));
        let cash_share = profile.cash / candidates;
        (per_holding_share + cash_share) / (dec!(2) * candidates)
    }

    /// Size buys for `candidates`. `quotes[i]` is the latest price of
    /// `candidates[i]`; a zero quote means the price was unavailable.
    pub fn size_buys(
        candidates: &[Symbol],
        profile: &Profile,
        holdings: &HoldingsMap,
        quotes: &[PriceQuote],
    ) -> Result<SizingPlan, BotError> {
        if profile.cash < Decimal::ZERO || profile.equity < Decimal::ZERO {
            return Err(BotError::MalformedInput(format!(
                "negative account values: {profile}"
            )));
        }
        if quotes.len() != candidates.len() {
            return Err(BotError::QuoteMismatch {
                requested: candidates.len(),
                received: quotes.len(),
            });
        }
        if candidates.is_empty() {
            return Ok(SizingPlan::empty());
        }

        let ideal = Self::ideal_position_size(profile, holdings.len(), candidates.len());
        let mut plan = SizingPlan {
            ideal_position_size: ideal,
            orders: Vec::with_capacity(candidates.len()),
            halted: None,
        };

        for (symbol, &price) in candidates.iter().zip(quotes) {
            if price < Decimal::ZERO {
                return Err(BotError::MalformedInput(format!(
                    "negative quote {price} for {symbol}"
                )));
            }

            if price.is_zero() {
                debug!(symbol = %symbol, "No quote, sizing at 0 shares");
                plan.orders.push(SizedOrder { symbol: symbol.clone(), price, shares: 0 });
                continue;
            }

            match Self::shares_at(ideal, price) {
                Some(shares) => {
                    debug!(
                        symbol = %symbol,
                        price = %price,
                        ideal = format!("${:.2}", ideal),
                        shares,
                        "Candidate sized"
                    );
                    plan.orders.push(SizedOrder { symbol: symbol.clone(), price, shares });
                }
                None => {
                    debug!(
                        symbol = %symbol,
                        price = %price,
                        ideal = format!("${:.2}", ideal),
                        "Price above stretch band, allocation stops"
                    );
                    plan.halted = Some(SizingHalt {
                        symbol: symbol.clone(),
                        price,
                        ideal_position_size: ideal,
                    });
                    break;
                }
            }
        }

        Ok(plan)
    }

    /// Whole shares affordable at `price`, or `None` when the price is
    /// outside the buyable band. `price` must be positive.
    fn shares_at(ideal: Decimal, price: PriceQuote) -> Option<u64> {
        let stretched = ideal * STRETCH_FACTOR;
        let budget = if ideal < price && price < stretched {
            stretched
        } else if price < ideal {
            ideal
        } else {
            return None;
        };
        Some((budget / price).trunc().to_u64().unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
