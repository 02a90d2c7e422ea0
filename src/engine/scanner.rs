//! Scan orchestrator.
//!
//! One scan is a single linear pass:
//!
//! ```text
//! Idle → Fetching → Reconciling → Deciding → Executing → Done
//! ```
//!
//! Fetching and deciding failures abort the scan before any order is
//! placed. Once executing, each symbol stands on its own: a failed sell
//! does not stop the next one, and a failed history write is only logged.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::{AccountData, MarketData};
use crate::engine::accountant::{Accountant, ScanReport};
use crate::engine::enricher::HoldingsEnricher;
use crate::engine::executor::OrderGate;
use crate::storage::TradeHistory;
use crate::strategy::{dedup_in_order, ScanContext, SignalStrategy};
use crate::types::{HoldingsMap, OpenPositionRecord, Profile, RawHoldings, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Fetching,
    Reconciling,
    Deciding,
    Executing,
    Done,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanState::Idle => "idle",
            ScanState::Fetching => "fetching",
            ScanState::Reconciling => "reconciling",
            ScanState::Deciding => "deciding",
            ScanState::Executing => "executing",
            ScanState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Broker data read at the start of a scan.
struct Snapshot {
    watchlist: BTreeSet<Symbol>,
    portfolio: Vec<Symbol>,
    raw_holdings: RawHoldings,
    open_positions: Vec<OpenPositionRecord>,
    profile: Profile,
}

pub struct ScanOrchestrator {
    account: Arc<dyn AccountData>,
    market: Arc<dyn MarketData>,
    enricher: HoldingsEnricher,
    strategy: Box<dyn SignalStrategy>,
    gate: OrderGate,
    history: Arc<dyn TradeHistory>,
    history_path: PathBuf,
    state: ScanState,
    scans_run: u64,
}

impl ScanOrchestrator {
    pub fn new(
        account: Arc<dyn AccountData>,
        market: Arc<dyn MarketData>,
        gate: OrderGate,
        strategy: Box<dyn SignalStrategy>,
        history: Arc<dyn TradeHistory>,
        history_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            enricher: HoldingsEnricher::new(account.clone()),
            account,
            market,
            strategy,
            gate,
            history,
            history_path: history_path.into(),
            state: ScanState::Idle,
            scans_run: 0,
        }
    }

    /// Current phase. After an aborted scan this is the phase that failed.
    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn scans_run(&self) -> u64 {
        self.scans_run
    }

    pub fn is_dry_run(&self) -> bool {
        self.gate.is_dry_run()
    }

    /// Run one full scan. `&mut self` keeps scans on one orchestrator
    /// strictly sequential.
    pub async fn run_scan(&mut self) -> Result<ScanReport> {
        self.scans_run += 1;
        let mut report = ScanReport::new(self.scans_run, self.gate.is_dry_run());
        self.state = ScanState::Idle;

        info!(
            scan = report.scan_number,
            strategy = self.strategy.name(),
            dry_run = report.dry_run,
            "Scan started"
        );

        // -- Fetching --------------------------------------------------------
        self.enter(ScanState::Fetching);
        let snapshot = self
            .fetch()
            .await
            .with_context(|| format!("Scan {} aborted while fetching", report.scan_number))?;
        report.watchlist_size = snapshot.watchlist.len();

        // -- Reconciling -----------------------------------------------------
        self.enter(ScanState::Reconciling);
        let holdings = self
            .enricher
            .enrich(&snapshot.raw_holdings, &snapshot.open_positions)
            .await;
        report.holdings_count = holdings.len();
        report.dated_holdings = holdings
            .iter()
            .filter(|p| p.acquired_at.timestamp().is_some())
            .count();

        // -- Deciding --------------------------------------------------------
        self.enter(ScanState::Deciding);
        let (sells, buys) = self
            .decide(&snapshot, &holdings)
            .await
            .with_context(|| format!("Scan {} aborted while deciding", report.scan_number))?;
        report.sells_selected = sells.clone();
        report.buys_selected = buys.clone();

        // -- Executing -------------------------------------------------------
        self.enter(ScanState::Executing);
        self.execute(&mut report, &sells, &buys, &holdings, &snapshot.profile)
            .await;

        // -- Done ------------------------------------------------------------
        self.enter(ScanState::Done);
        Accountant::reconcile(&mut report);
        Ok(report)
    }

    fn enter(&mut self, next: ScanState) {
        debug!(from = %self.state, to = %next, "Scan state");
        self.state = next;
    }

    async fn fetch(&self) -> Result<Snapshot> {
        let watchlist = self
            .account
            .get_watchlist_symbols()
            .await
            .context("Failed to fetch watchlist symbols")?;

        let open_positions = self
            .account
            .get_open_positions()
            .await
            .context("Failed to fetch open positions")?;

        let mut portfolio = Vec::with_capacity(open_positions.len());
        for record in &open_positions {
            let symbol = self
                .account
                .symbol_for_instrument(&record.instrument)
                .await
                .with_context(|| format!("Failed to resolve instrument {}", record.instrument))?;
            portfolio.push(symbol);
        }
        let portfolio = dedup_in_order(portfolio);

        let raw_holdings = self
            .account
            .get_holdings()
            .await
            .context("Failed to fetch holdings")?;

        let profile = self
            .account
            .get_profile()
            .await
            .context("Failed to fetch account profile")?;

        info!(
            watchlist = watchlist.len(),
            portfolio = portfolio.len(),
            holdings = raw_holdings.len(),
            cash = format!("${:.2}", profile.cash),
            equity = format!("${:.2}", profile.equity),
            "Account snapshot fetched"
        );

        Ok(Snapshot { watchlist, portfolio, raw_holdings, open_positions, profile })
    }

    async fn decide(
        &self,
        snapshot: &Snapshot,
        holdings: &HoldingsMap,
    ) -> Result<(Vec<Symbol>, Vec<Symbol>)> {
        let ctx = ScanContext {
            watchlist: &snapshot.watchlist,
            portfolio: &snapshot.portfolio,
            holdings,
            profile: &snapshot.profile,
        };

        let sells = self
            .strategy
            .select_sells(&ctx, self.market.as_ref())
            .await
            .context("Sell selection failed")?;
        let buys = self
            .strategy
            .select_buys(&ctx, self.market.as_ref())
            .await
            .context("Buy selection failed")?;

        let (sells, buys) = (dedup_in_order(sells), dedup_in_order(buys));
        let sell_list: Vec<&str> = sells.iter().map(Symbol::as_str).collect();
        let buy_list: Vec<&str> = buys.iter().map(Symbol::as_str).collect();
        info!(sells = ?sell_list, buys = ?buy_list, "Selection complete");
        Ok((sells, buys))
    }

    async fn execute(
        &self,
        report: &mut ScanReport,
        sells: &[Symbol],
        buys: &[Symbol],
        holdings: &HoldingsMap,
        profile: &Profile,
    ) {
        for symbol in sells {
            match self.gate.sell(symbol, holdings).await {
                Ok(execution) => report.execution.merge(execution),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Sell skipped");
                    report.errors.push(format!("sell {symbol}: {e:#}"));
                }
            }
        }

        if !buys.is_empty() {
            match self.gate.buy(buys, profile, holdings).await {
                Ok(execution) => report.execution.merge(execution),
                Err(e) => {
                    warn!(error = %e, "Buy pass failed");
                    report.errors.push(format!("buy: {e:#}"));
                }
            }
        }

        let sold = report.sold_symbols();
        if sold.is_empty() {
            return;
        }
        match self.history.record(&sold, holdings, &self.history_path) {
            Ok(written) => report.history_records = written,
            Err(e) => {
                warn!(
                    path = %self.history_path.display(),
                    error = %e,
                    "Failed to record trade history"
                );
                report.errors.push(format!("trade history: {e:#}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
