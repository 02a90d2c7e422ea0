//! Accountant: closes out a scan.
//!
//! Collects what happened during one pass (selections, orders, failures,
//! the allocation halt) into a `ScanReport` and logs the summary.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::engine::executor::ExecutionReport;
use crate::types::{OrderSide, Symbol};

// ---------------------------------------------------------------------------
// Scan report
// ---------------------------------------------------------------------------

/// Summary of a complete fetch → reconcile → decide → execute pass.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub scan_number: u64,
    pub dry_run: bool,
    pub watchlist_size: usize,
    pub holdings_count: usize,
    /// Holdings with a known acquisition date.
    pub dated_holdings: usize,
    pub sells_selected: Vec<Symbol>,
    pub buys_selected: Vec<Symbol>,
    pub execution: ExecutionReport,
    /// Errors that stopped a single sell, the buy pass, or the history write.
    pub errors: Vec<String>,
    pub history_records: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanReport {
    pub fn new(scan_number: u64, dry_run: bool) -> Self {
        Self {
            scan_number,
            dry_run,
            watchlist_size: 0,
            holdings_count: 0,
            dated_holdings: 0,
            sells_selected: Vec::new(),
            buys_selected: Vec::new(),
            execution: ExecutionReport::default(),
            errors: Vec::new(),
            history_records: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn sells_executed(&self) -> usize {
        self.execution.executed_side(OrderSide::Sell).count()
    }

    pub fn buys_executed(&self) -> usize {
        self.execution.executed_side(OrderSide::Buy).count()
    }

    /// Rejected orders plus errors outside order submission.
    pub fn failures(&self) -> usize {
        self.execution.failed.len() + self.errors.len()
    }

    pub fn halted_at(&self) -> Option<&Symbol> {
        self.execution.halted.as_ref().map(|h| &h.symbol)
    }

    pub fn sold_symbols(&self) -> Vec<Symbol> {
        self.execution
            .executed_side(OrderSide::Sell)
            .map(|r| r.symbol.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Stamp the report as finished and log its summary.
    pub fn reconcile(report: &mut ScanReport) {
        let finished_at = Utc::now();
        report.finished_at = Some(finished_at);
        let elapsed_ms = (finished_at - report.started_at).num_milliseconds();

        if report.failures() > 0 {
            warn!(
                scan = report.scan_number,
                failures = report.failures(),
                errors = ?report.errors,
                "Scan finished with failures"
            );
        }

        info!(
            scan = report.scan_number,
            dry_run = report.dry_run,
            watchlist = report.watchlist_size,
            holdings = report.holdings_count,
            sells = report.sells_executed(),
            buys = report.buys_executed(),
            failures = report.failures(),
            halted_at = report.halted_at().map(Symbol::as_str).unwrap_or("-"),
            history_records = report.history_records,
            elapsed_ms,
            "Scan reconciled"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
