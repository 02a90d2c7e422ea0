//! End-to-end scans against an in-memory broker.

mod mock_broker;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;

use mock_broker::{sym, MockBroker};
use rebalancer::broker::MarketData;
use rebalancer::engine::executor::OrderGate;
use rebalancer::engine::scanner::{ScanOrchestrator, ScanState};
use rebalancer::storage::{load_trade_history, JsonlTradeHistory};
use rebalancer::strategy::{ScanContext, SignalStrategy};
use rebalancer::types::Symbol;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Sells whatever is held below average cost; buys watchlist symbols not
/// yet held.
struct SellBelowCost;

#[async_trait]
impl SignalStrategy for SellBelowCost {
    fn name(&self) -> &str {
        "sell-below-cost"
    }

    async fn select_sells(&self, ctx: &ScanContext<'_>, market: &dyn MarketData) -> Result<Vec<Symbol>> {
        let held: Vec<Symbol> = ctx.holdings.symbols().cloned().collect();
        let quotes = market.get_price_quotes(&held).await?;
        Ok(held
            .into_iter()
            .zip(quotes)
            .filter(|(symbol, price)| {
                ctx.holdings
                    .get(symbol)
                    .map(|p| !price.is_zero() && *price < p.average_cost)
                    .unwrap_or(false)
            })
            .map(|(symbol, _)| symbol)
            .collect())
    }

    async fn select_buys(&self, ctx: &ScanContext<'_>, _: &dyn MarketData) -> Result<Vec<Symbol>> {
        Ok(ctx
            .watchlist
            .iter()
            .filter(|s| !ctx.holdings.contains(s))
            .cloned()
            .collect())
    }
}

/// Fixed picks.
struct Scripted {
    sells: Vec<Symbol>,
    buys: Vec<Symbol>,
}

impl Scripted {
    fn new(sells: &[&str], buys: &[&str]) -> Box<Self> {
        Box::new(Self {
            sells: sells.iter().map(|s| sym(s)).collect(),
            buys: buys.iter().map(|s| sym(s)).collect(),
        })
    }
}

#[async_trait]
impl SignalStrategy for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn select_sells(&self, _: &ScanContext<'_>, _: &dyn MarketData) -> Result<Vec<Symbol>> {
        Ok(self.sells.clone())
    }

    async fn select_buys(&self, _: &ScanContext<'_>, _: &dyn MarketData) -> Result<Vec<Symbol>> {
        Ok(self.buys.clone())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn temp_history() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("rebalancer_it_history_{}.jsonl", uuid::Uuid::new_v4()));
    p
}

/// AAPL is under water, MSFT is up. Watchlist adds AMD and NVDA.
fn mixed_account() -> MockBroker {
    MockBroker::new(dec!(1000))
        .with_price("AAPL", dec!(120))
        .with_price("MSFT", dec!(300))
        .with_price("AMD", dec!(100))
        .with_price("NVDA", dec!(50))
        .with_position("AAPL", dec!(12.9), dec!(150), "2021-03-04T15:30:00.123456Z")
        .with_position("MSFT", dec!(3), dec!(200), "2022-06-01 13:00:00")
        .with_watchlist(&["NVDA", "AMD", "AAPL"])
}

fn orchestrator(
    broker: &Arc<MockBroker>,
    strategy: Box<dyn SignalStrategy>,
    history: &PathBuf,
    dry_run: bool,
) -> ScanOrchestrator {
    let gate = OrderGate::new(broker.clone(), broker.clone(), dry_run);
    ScanOrchestrator::new(
        broker.clone(),
        broker.clone(),
        gate,
        strategy,
        Arc::new(JsonlTradeHistory),
        history.clone(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_dry_run_scan_logs_everything_and_trades_nothing() {
    let broker = Arc::new(mixed_account());
    let history = temp_history();
    let mut orch = orchestrator(&broker, Box::new(SellBelowCost), &history, true);

    let report = orch.run_scan().await.unwrap();

    // ideal = (2448 / 2 + 1000 / 2) / 4 = 431
    assert_eq!(
        report.execution.action_lines(),
        vec![
            "Selling 12 shares of AAPL",
            "Buying 4 shares of AMD",
            "Buying 8 shares of NVDA",
        ]
    );
    assert!(broker.orders().is_empty());
    assert_eq!(broker.cash(), dec!(1000));
    assert_eq!(report.dated_holdings, 2);
    assert_eq!(orch.state(), ScanState::Done);

    let records = load_trade_history(&history).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].symbol, sym("AAPL"));
    std::fs::remove_file(&history).ok();
}

#[tokio::test]
async fn test_live_scan_sells_first_then_buys() {
    let broker = Arc::new(mixed_account());
    let history = temp_history();
    let mut orch = orchestrator(&broker, Box::new(SellBelowCost), &history, false);

    let report = orch.run_scan().await.unwrap();

    assert_eq!(broker.order_lines(), vec!["sell AAPL 12", "buy AMD 4", "buy NVDA 8"]);
    assert_eq!(report.sells_executed(), 1);
    assert_eq!(report.buys_executed(), 2);
    assert_eq!(report.failures(), 0);
    assert_eq!(broker.quantity("AAPL"), dec!(0.9));
    // 1000 + 12 * 120 - 4 * 100 - 8 * 50
    assert_eq!(broker.cash(), dec!(1640));
    assert_eq!(report.history_records, 1);
    std::fs::remove_file(&history).ok();
}

#[tokio::test]
async fn test_fractional_leftover_is_not_sold_next_scan() {
    let broker = Arc::new(mixed_account());
    let history = temp_history();
    let mut orch = orchestrator(&broker, Box::new(SellBelowCost), &history, false);

    orch.run_scan().await.unwrap();
    let second = orch.run_scan().await.unwrap();

    // AAPL 0.9 is still below cost, but there is no whole share to sell.
    assert_eq!(second.scan_number, 2);
    assert_eq!(second.errors.len(), 1);
    assert!(second.errors[0].contains("AAPL"));
    assert_eq!(broker.orders().len(), 3);
    assert_eq!(load_trade_history(&history).unwrap().len(), 1);
    std::fs::remove_file(&history).ok();
}

#[tokio::test]
async fn test_fetch_failure_aborts_scan() {
    let broker = Arc::new(mixed_account());
    broker.set_error("broker unavailable");
    let history = temp_history();
    let mut orch = orchestrator(&broker, Box::new(SellBelowCost), &history, false);

    let err = orch.run_scan().await.unwrap_err();

    assert!(format!("{err:#}").contains("broker unavailable"));
    assert_eq!(orch.state(), ScanState::Fetching);
    assert!(broker.orders().is_empty());
    assert!(!history.exists());
}

#[tokio::test]
async fn test_insufficient_buying_power_halts_allocation() {
    let broker = Arc::new(
        MockBroker::new(dec!(1000))
            .with_price("X", dec!(100))
            .with_price("Y", dec!(100))
            .with_price("A", dec!(700))
            .with_price("B", dec!(1000))
            .with_position("X", dec!(20), dec!(100), "2021-01-04T15:30:00Z")
            .with_position("Y", dec!(20), dec!(100), "2021-01-05T15:30:00Z"),
    );
    let history = temp_history();
    let mut orch = orchestrator(&broker, Scripted::new(&[], &["A", "B"]), &history, false);

    let report = orch.run_scan().await.unwrap();

    // ideal = (4000 / 2 + 1000 / 2) / 4 = 625; A falls in the stretch band.
    assert_eq!(broker.order_lines(), vec!["buy A 1"]);
    assert_eq!(report.halted_at(), Some(&sym("B")));
    let last = report.execution.action_lines().pop().unwrap();
    assert!(last.contains("insufficient buying power"));
    assert!(last.contains("B"));
    assert_eq!(report.history_records, 0);
    assert!(!history.exists());
}

#[tokio::test]
async fn test_rejected_sell_does_not_block_the_next() {
    let broker = Arc::new(
        MockBroker::new(dec!(0))
            .with_price("AAPL", dec!(120))
            .with_price("MSFT", dec!(300))
            .with_position("AAPL", dec!(5), dec!(150), "2021-03-04T15:30:00Z")
            .with_position("MSFT", dec!(3), dec!(200), "2022-06-01T13:00:00Z"),
    );
    broker.reject_orders_for("AAPL");
    let history = temp_history();
    let mut orch = orchestrator(&broker, Scripted::new(&["AAPL", "MSFT"], &[]), &history, false);

    let report = orch.run_scan().await.unwrap();

    assert_eq!(broker.order_lines(), vec!["sell MSFT 3"]);
    assert_eq!(report.execution.failed.len(), 1);
    assert_eq!(report.execution.failed[0].symbol, sym("AAPL"));
    assert_eq!(broker.quantity("AAPL"), dec!(5));

    let records = load_trade_history(&history).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].symbol, sym("MSFT"));
    assert_eq!(records[0].quantity, dec!(3));
    std::fs::remove_file(&history).ok();
}

#[tokio::test]
async fn test_unpriced_candidate_is_skipped() {
    let broker = Arc::new(MockBroker::new(dec!(500)).with_price("AMD", dec!(80)));
    let history = temp_history();
    let mut orch = orchestrator(&broker, Scripted::new(&[], &["GHOST", "AMD"]), &history, false);

    let report = orch.run_scan().await.unwrap();

    // ideal = (0 + 500 / 2) / 4 = 62.5; AMD at 80 is inside the stretch band.
    assert_eq!(broker.order_lines(), vec!["buy AMD 1"]);
    assert!(report.halted_at().is_none());
    assert_eq!(broker.cash(), dec!(420));
    assert!(report.execution.action_lines()[0].starts_with("Skipping GHOST"));
}
