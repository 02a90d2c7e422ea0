//! Order gate.
//!
//! The only component that talks to the trading collaborator. Every
//! decision is logged as a human-readable action line; in dry-run mode
//! that is all that happens.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::{MarketData, Trading};
use crate::strategy::sizing::{PositionSizer, SizingHalt};
use crate::types::{BotError, HoldingsMap, OrderReceipt, OrderSide, Profile, Symbol};

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// One logged decision.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderAction {
    Sell { symbol: Symbol, shares: u64 },
    Buy { symbol: Symbol, shares: u64 },
    /// Sized at zero shares (no quote, or the quote bought nothing).
    Skip { symbol: Symbol },
    /// Allocation stopped here.
    Halt { symbol: Symbol, price: Decimal, ideal_position_size: Decimal },
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderAction::Sell { symbol, shares } => {
                write!(f, "Selling {shares} shares of {symbol}")
            }
            OrderAction::Buy { symbol, shares } => {
                write!(f, "Buying {shares} shares of {symbol}")
            }
            OrderAction::Skip { symbol } => {
                write!(f, "Skipping {symbol}: sized at 0 shares")
            }
            OrderAction::Halt { symbol, price, ideal_position_size } => write!(
                f,
                "Tried buying shares of {symbol}, but stopped: insufficient buying power \
                 (price ${price:.2}, ideal position ${ideal_position_size:.2})"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailedOrder {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub reason: String,
}

/// Result of one `sell` or `buy` call, or several merged together.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub actions: Vec<OrderAction>,
    pub executed: Vec<OrderReceipt>,
    pub failed: Vec<FailedOrder>,
    pub halted: Option<SizingHalt>,
}

impl ExecutionReport {
    pub fn merge(&mut self, other: ExecutionReport) {
        self.actions.extend(other.actions);
        self.executed.extend(other.executed);
        self.failed.extend(other.failed);
        if other.halted.is_some() {
            self.halted = other.halted;
        }
    }

    pub fn executed_side(&self, side: OrderSide) -> impl Iterator<Item = &OrderReceipt> {
        self.executed.iter().filter(move |r| r.side == side)
    }

    pub fn action_lines(&self) -> Vec<String> {
        self.actions.iter().map(ToString::to_string).collect()
    }
}

// ---------------------------------------------------------------------------
// OrderGate
// ---------------------------------------------------------------------------

pub struct OrderGate {
    trading: Arc<dyn Trading>,
    market: Arc<dyn MarketData>,
    dry_run: bool,
}

impl OrderGate {
    /// `dry_run` is fixed for the lifetime of the gate.
    pub fn new(trading: Arc<dyn Trading>, market: Arc<dyn MarketData>, dry_run: bool) -> Self {
        Self { trading, market, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Sell every whole share of `symbol`.
    ///
    /// Errors when the symbol is not held or holds less than one share;
    /// a rejected live order is reported in `failed` instead.
    pub async fn sell(&self, symbol: &Symbol, holdings: &HoldingsMap) -> Result<ExecutionReport> {
        let position = holdings
            .get(symbol)
            .ok_or_else(|| BotError::NotHeld(symbol.clone()))?;
        let shares = position.whole_shares();
        if shares == 0 {
            return Err(BotError::NothingToSell {
                symbol: symbol.clone(),
                quantity: position.quantity,
            }
            .into());
        }

        let mut report = ExecutionReport::default();
        let action = OrderAction::Sell { symbol: symbol.clone(), shares };
        info!(symbol = %symbol, shares, dry_run = self.dry_run, "{action}");
        report.actions.push(action);

        self.submit(&mut report, symbol, shares, OrderSide::Sell).await;
        Ok(report)
    }

    /// Size and buy `candidates` in order, stopping at the first one the
    /// account cannot afford.
    pub async fn buy(
        &self,
        candidates: &[Symbol],
        profile: &Profile,
        holdings: &HoldingsMap,
    ) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        if candidates.is_empty() {
            warn!("buy called with no candidates, nothing to do");
            return Ok(report);
        }

        let quotes = self
            .market
            .get_price_quotes(candidates)
            .await
            .context("Failed to fetch quotes for buy candidates")?;
        let plan = PositionSizer::size_buys(candidates, profile, holdings, &quotes)?;

        info!(
            candidates = candidates.len(),
            sized = plan.orders.len(),
            ideal = format!("${:.2}", plan.ideal_position_size),
            dry_run = self.dry_run,
            "Buy plan sized"
        );

        for order in &plan.orders {
            if order.shares == 0 {
                let action = OrderAction::Skip { symbol: order.symbol.clone() };
                debug!(symbol = %order.symbol, price = %order.price, "{action}");
                report.actions.push(action);
                continue;
            }

            let action = OrderAction::Buy { symbol: order.symbol.clone(), shares: order.shares };
            info!(
                symbol = %order.symbol,
                shares = order.shares,
                price = %order.price,
                dry_run = self.dry_run,
                "{action}"
            );
            report.actions.push(action);

            self.submit(&mut report, &order.symbol, order.shares, OrderSide::Buy).await;
        }

        if let Some(halt) = plan.halted {
            let action = OrderAction::Halt {
                symbol: halt.symbol.clone(),
                price: halt.price,
                ideal_position_size: halt.ideal_position_size,
            };
            warn!(symbol = %halt.symbol, price = %halt.price, "{action}");
            report.actions.push(action);
            report.halted = Some(halt);
        }

        Ok(report)
    }

    /// Submit one order (or record a dry-run receipt). Failures land in
    /// `report.failed` so the caller can move on to the next symbol.
    async fn submit(&self, report: &mut ExecutionReport, symbol: &Symbol, shares: u64, side: OrderSide) {
        if self.dry_run {
            report.executed.push(OrderReceipt::dry_run(symbol, side, shares));
            return;
        }

        let result = match side {
            OrderSide::Sell => self.trading.submit_market_sell(symbol, shares).await,
            OrderSide::Buy => self.trading.submit_market_buy(symbol, shares).await,
        };

        match result {
            Ok(receipt) => {
                debug!(receipt = %receipt, "Order accepted");
                report.executed.push(receipt);
            }
            Err(e) => {
                warn!(symbol = %symbol, side = %side, error = %e, "Order submission failed");
                report.failed.push(FailedOrder {
                    symbol: symbol.clone(),
                    side,
                    reason: e.to_string(),
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
