//! Trade history.
//!
//! Sold positions are appended to a JSON-lines file, one object per sold
//! symbol. The file is never rewritten.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::types::{AcquiredAt, HoldingsMap, Symbol};

/// One sold position as written to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub equity: Decimal,
    pub acquired_at: AcquiredAt,
    pub recorded_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
pub trait TradeHistory: Send + Sync {
    /// Append the holdings of `sells` to `destination`. Returns the number
    /// of records written.
    fn record(&self, sells: &[Symbol], holdings: &HoldingsMap, destination: &Path) -> Result<usize>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonlTradeHistory;

impl TradeHistory for JsonlTradeHistory {
    fn record(&self, sells: &[Symbol], holdings: &HoldingsMap, destination: &Path) -> Result<usize> {
        let recorded_at = Utc::now();
        let records: Vec<TradeRecord> = sells
            .iter()
            .filter_map(|symbol| match holdings.get(symbol) {
                Some(p) => Some(TradeRecord {
                    symbol: p.symbol.clone(),
                    quantity: p.quantity,
                    average_cost: p.average_cost,
                    equity: p.equity,
                    acquired_at: p.acquired_at,
                    recorded_at,
                }),
                None => {
                    warn!(symbol = %symbol, "Sold symbol missing from holdings, not recorded");
                    None
                }
            })
            .collect();

        if records.is_empty() {
            return Ok(0);
        }

        let mut buf = String::new();
        for record in &records {
            let line = serde_json::to_string(record)
                .context(format!("Failed to serialise trade record for {}", record.symbol))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(destination)
            .context(format!("Failed to open trade history {}", destination.display()))?;
        file.write_all(buf.as_bytes())
            .context(format!("Failed to append to trade history {}", destination.display()))?;

        info!(
            path = %destination.display(),
            records = records.len(),
            "Trade history updated"
        );
        Ok(records.len())
    }
}

/// Read every record back. A missing file is an empty history.
pub fn load_trade_history(path: &Path) -> Result<Vec<TradeRecord>> {
    if !path.exists() {
        debug!(path = %path.display(), "No trade history yet");
        return Ok(Vec::new());
    }

    let text = std::fs::read_to_string(path)
        .context(format!("Failed to read trade history {}", path.display()))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .context(format!("Malformed trade record at {}:{}", path.display(), n + 1))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
