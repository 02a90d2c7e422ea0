//! Mock broker for integration testing.
//!
//! A deterministic in-memory implementation of all three broker traits.
//! Positions, prices, and cash are controllable from test code; live
//! orders move shares and cash the way a real fill would.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use uuid::Uuid;

use rebalancer::broker::{AccountData, MarketData, Trading};
use rebalancer::types::*;

const INSTRUMENT_PREFIX: &str = "https://mock.example.com/instruments/";

#[derive(Debug, Clone)]
struct MockPosition {
    quantity: Decimal,
    average_cost: Decimal,
    created_at: String,
}

pub struct MockBroker {
    watchlist: Vec<Symbol>,
    prices: HashMap<Symbol, Decimal>,
    cash: Mutex<Decimal>,
    positions: Mutex<HashMap<Symbol, MockPosition>>,
    orders: Mutex<Vec<OrderReceipt>>,
    /// If set, every account-data call fails with this message.
    force_error: Mutex<Option<String>>,
    /// Orders for this symbol are rejected.
    reject: Mutex<Option<Symbol>>,
}

pub fn sym(s: &str) -> Symbol {
    Symbol::new(s).unwrap()
}

impl MockBroker {
    pub fn new(cash: Decimal) -> Self {
        Self {
            watchlist: Vec::new(),
            prices: HashMap::new(),
            cash: Mutex::new(cash),
            positions: Mutex::new(HashMap::new()),
            orders: Mutex::new(Vec::new()),
            force_error: Mutex::new(None),
            reject: Mutex::new(None),
        }
    }

    pub fn with_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.prices.insert(sym(symbol), price);
        self
    }

    pub fn with_watchlist(mut self, symbols: &[&str]) -> Self {
        self.watchlist = symbols.iter().map(|s| sym(s)).collect();
        self
    }

    pub fn with_position(
        self,
        symbol: &str,
        quantity: Decimal,
        average_cost: Decimal,
        created_at: &str,
    ) -> Self {
        self.positions.lock().unwrap().insert(
            sym(symbol),
            MockPosition { quantity, average_cost, created_at: created_at.to_string() },
        );
        self
    }

    /// Force all subsequent account-data calls to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn reject_orders_for(&self, symbol: &str) {
        *self.reject.lock().unwrap() = Some(sym(symbol));
    }

    pub fn orders(&self) -> Vec<OrderReceipt> {
        self.orders.lock().unwrap().clone()
    }

    /// `"side SYMBOL qty"` per submitted order, in submission order.
    pub fn order_lines(&self) -> Vec<String> {
        self.orders()
            .iter()
            .map(|o| format!("{} {} {}", o.side, o.symbol, o.quantity))
            .collect()
    }

    pub fn cash(&self) -> Decimal {
        *self.cash.lock().unwrap()
    }

    pub fn quantity(&self, symbol: &str) -> Decimal {
        self.positions
            .lock()
            .unwrap()
            .get(&sym(symbol))
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(err) => Err(anyhow!("{}", err)),
            None => Ok(()),
        }
    }

    fn price(&self, symbol: &Symbol) -> Decimal {
        self.prices.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    fn instrument(symbol: &Symbol) -> InstrumentId {
        InstrumentId(format!("{INSTRUMENT_PREFIX}{}/", symbol))
    }

    fn fill(&self, side: OrderSide, symbol: &Symbol, quantity: u64) -> Result<OrderReceipt> {
        if self.reject.lock().unwrap().as_ref() == Some(symbol) {
            return Err(anyhow!("order for {symbol} rejected"));
        }

        let price = self.price(symbol);
        let qty = Decimal::from(quantity);
        let mut positions = self.positions.lock().unwrap();
        let mut cash = self.cash.lock().unwrap();

        match side {
            OrderSide::Sell => {
                let position = positions
                    .get_mut(symbol)
                    .ok_or_else(|| anyhow!("no position in {symbol}"))?;
                if position.quantity < qty {
                    return Err(anyhow!("insufficient shares of {symbol}"));
                }
                position.quantity -= qty;
                *cash += qty * price;
                if position.quantity.is_zero() {
                    positions.remove(symbol);
                }
            }
            OrderSide::Buy => {
                let cost = qty * price;
                if cost > *cash {
                    return Err(anyhow!("insufficient cash for {symbol}"));
                }
                *cash -= cost;
                let entry = positions.entry(symbol.clone()).or_insert(MockPosition {
                    quantity: Decimal::ZERO,
                    average_cost: price,
                    created_at: Utc::now().to_rfc3339(),
                });
                entry.quantity += qty;
            }
        }

        let receipt = OrderReceipt {
            order_id: format!("MOCK-{}", Uuid::new_v4()),
            symbol: symbol.clone(),
            side,
            quantity,
            state: "filled".to_string(),
            timestamp: Utc::now(),
        };
        self.orders.lock().unwrap().push(receipt.clone());
        Ok(receipt)
    }
}

#[async_trait]
impl AccountData for MockBroker {
    async fn get_watchlist_symbols(&self) -> Result<BTreeSet<Symbol>> {
        self.check_error()?;
        Ok(self.watchlist.iter().cloned().collect())
    }

    async fn get_open_positions(&self) -> Result<Vec<OpenPositionRecord>> {
        self.check_error()?;
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .map(|(symbol, p)| OpenPositionRecord {
                instrument: Self::instrument(symbol),
                quantity: p.quantity,
                created_at: p.created_at.clone(),
            })
            .collect())
    }

    async fn get_holdings(&self) -> Result<RawHoldings> {
        self.check_error()?;
        let holdings = self
            .positions
            .lock()
            .unwrap()
            .iter()
            .map(|(symbol, p)| RawHolding {
                symbol: symbol.clone(),
                quantity: p.quantity,
                average_cost: p.average_cost,
                equity: p.quantity * self.price(symbol),
            })
            .collect();
        Ok(RawHoldings::from_holdings(holdings)?)
    }

    async fn get_profile(&self) -> Result<Profile> {
        self.check_error()?;
        let cash = self.cash();
        let invested: Decimal = self
            .positions
            .lock()
            .unwrap()
            .iter()
            .map(|(symbol, p)| p.quantity * self.price(symbol))
            .sum();
        Ok(Profile { cash, equity: cash + invested })
    }

    async fn resolve_instrument(&self, symbol: &Symbol) -> Result<Option<InstrumentId>> {
        self.check_error()?;
        let known = self.prices.contains_key(symbol)
            || self.positions.lock().unwrap().contains_key(symbol);
        Ok(known.then(|| Self::instrument(symbol)))
    }

    async fn symbol_for_instrument(&self, instrument: &InstrumentId) -> Result<Symbol> {
        self.check_error()?;
        let ticker = instrument
            .0
            .strip_prefix(INSTRUMENT_PREFIX)
            .map(|rest| rest.trim_end_matches('/'))
            .ok_or_else(|| anyhow!("unknown instrument {instrument}"))?;
        Ok(Symbol::new(ticker)?)
    }
}

#[async_trait]
impl MarketData for MockBroker {
    async fn get_price_quotes(&self, symbols: &[Symbol]) -> Result<Vec<PriceQuote>> {
        Ok(symbols.iter().map(|s| self.price(s)).collect())
    }

    async fn get_historical_data(
        &self,
        symbol: &Symbol,
        _interval: Interval,
        _span: Span,
        _bounds: Bounds,
    ) -> Result<Vec<Candle>> {
        let price = self.price(symbol);
        Ok(vec![Candle {
            begins_at: Utc::now(),
            open: price,
            close: price,
            high: price,
            low: price,
            volume: 0,
        }])
    }
}

#[async_trait]
impl Trading for MockBroker {
    async fn submit_market_sell(&self, symbol: &Symbol, quantity: u64) -> Result<OrderReceipt> {
        self.fill(OrderSide::Sell, symbol, quantity)
    }

    async fn submit_market_buy(&self, symbol: &Symbol, quantity: u64) -> Result<OrderReceipt> {
        self.fill(OrderSide::Buy, symbol, quantity)
    }
}
