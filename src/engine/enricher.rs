//! Holdings enrichment.
//!
//! Attaches an acquisition timestamp to every held position by matching
//! the symbol's instrument against the broker's open-position records.
//! Missing data never fails the scan: the position is marked
//! `AcquiredAt::NotFound` instead.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::AccountData;
use crate::types::{
    AcquiredAt, HoldingsMap, InstrumentId, OpenPositionRecord, Position, RawHoldings,
};

/// Naive layouts accepted after RFC 3339; interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a broker timestamp into UTC.
pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Acquisition time for an instrument, looked up in the open positions.
pub fn acquired_at(
    instrument: Option<&InstrumentId>,
    open_positions: &[OpenPositionRecord],
) -> AcquiredAt {
    instrument
        .and_then(|id| open_positions.iter().find(|p| &p.instrument == id))
        .and_then(|record| parse_created_at(&record.created_at))
        .map(AcquiredAt::At)
        .unwrap_or(AcquiredAt::NotFound)
}

pub struct HoldingsEnricher {
    account: Arc<dyn AccountData>,
}

impl HoldingsEnricher {
    pub fn new(account: Arc<dyn AccountData>) -> Self {
        Self { account }
    }

    /// Enrich every raw holding exactly once. Inputs are left untouched.
    pub async fn enrich(
        &self,
        raw_holdings: &RawHoldings,
        open_positions: &[OpenPositionRecord],
    ) -> HoldingsMap {
        let mut positions = Vec::with_capacity(raw_holdings.len());
        let mut not_found = 0usize;

        for raw in raw_holdings.iter() {
            let instrument = match self.account.resolve_instrument(&raw.symbol).await {
                Ok(instrument) => instrument,
                Err(e) => {
                    warn!(symbol = %raw.symbol, error = %e, "Instrument lookup failed");
                    None
                }
            };

            let acquired = acquired_at(instrument.as_ref(), open_positions);
            if acquired == AcquiredAt::NotFound {
                not_found += 1;
                debug!(symbol = %raw.symbol, "No acquisition date found");
            }
            positions.push(Position::from_raw(raw, acquired));
        }

        info!(
            holdings = positions.len(),
            dated = positions.len() - not_found,
            not_found,
            "Holdings enriched"
        );

        positions.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
