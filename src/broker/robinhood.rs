//! Robinhood REST integration.
//!
//! Implements `AccountData`, `MarketData` and `Trading` over an explicit
//! `Session` obtained by password login. The session lives for the whole
//! process: `login` before the first scan, `logout` on shutdown.
//!
//! Base URL: https://api.robinhood.com
//! Auth: `Authorization: Bearer {access_token}` on every call.
//! Money fields arrive as decimal strings ("123.4500").

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{AccountData, MarketData, Trading};
use crate::config::{BrokerConfig, Credentials};
use crate::types::{
    Bounds, BotError, Candle, InstrumentId, Interval, OpenPositionRecord, OrderReceipt,
    OrderSide, PriceQuote, Profile, RawHolding, RawHoldings, Span, Symbol,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Public OAuth client id used by the Robinhood web and mobile apps.
const CLIENT_ID: &str = "c82SH0WZOsabOXGP2sxqcj34FxkvfnWRZBKlBjFS";

/// Access token lifetime requested at login, in seconds.
const TOKEN_EXPIRES_IN: u64 = 86_400;

/// Safety valve for paginated endpoints.
const MAX_PAGES: usize = 50;

const COLLABORATOR: &str = "robinhood";

// ---------------------------------------------------------------------------
// API response types (Robinhood JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    mfa_required: Option<bool>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    results: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountItem {
    url: String,
    #[serde(default)]
    portfolio_cash: Option<String>,
    #[serde(default)]
    cash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PortfolioItem {
    equity: String,
    #[serde(default)]
    extended_hours_equity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PositionItem {
    instrument: String,
    quantity: String,
    #[serde(default)]
    average_buy_price: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstrumentItem {
    url: String,
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct WatchlistItem {
    id: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct WatchlistEntry {
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteItem {
    symbol: String,
    #[serde(default)]
    last_trade_price: Option<String>,
    #[serde(default)]
    last_extended_hours_trade_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuotesResponse {
    /// Unknown symbols come back as `null` entries.
    results: Vec<Option<QuoteItem>>,
}

#[derive(Debug, Deserialize)]
struct HistoricalsResponse {
    results: Vec<HistoricalSeries>,
}

#[derive(Debug, Deserialize)]
struct HistoricalSeries {
    #[serde(default)]
    historicals: Vec<HistoricalBar>,
}

#[derive(Debug, Deserialize)]
struct HistoricalBar {
    begins_at: String,
    open_price: String,
    close_price: String,
    high_price: String,
    low_price: String,
    #[serde(default)]
    volume: u64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    state: String,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Authenticated brokerage session.
pub struct Session {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    account_url: String,
    opened_at: DateTime<Utc>,
}

impl Session {
    pub fn account_url(&self) -> &str {
        &self.account_url
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RobinhoodClient {
    http: Client,
    base_url: String,
    session: Session,
}

impl RobinhoodClient {
    /// Log in and open a session.
    pub async fn login(config: &BrokerConfig, credentials: &Credentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent("rebalancer/0.1.0")
            .build()
            .context("Failed to build HTTP client for Robinhood")?;
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let device_token = credentials
            .device_token
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut body = serde_json::json!({
            "client_id": CLIENT_ID,
            "expires_in": TOKEN_EXPIRES_IN,
            "grant_type": "password",
            "scope": "internal",
            "username": credentials.username,
            "password": credentials.password.expose_secret(),
            "device_token": device_token,
        });
        if let Some(code) = &credentials.mfa_code {
            body["mfa_code"] = serde_json::Value::String(code.expose_secret().clone());
        }

        let resp = http
            .post(format!("{base_url}/oauth2/token/"))
            .json(&body)
            .send()
            .await
            .context("Robinhood login request failed")?;
        let token: TokenResponse = resp
            .json()
            .await
            .context("Failed to parse Robinhood login response")?;

        let access_token = match token.access_token {
            Some(t) => SecretString::new(t),
            None if token.mfa_required == Some(true) => {
                return Err(external("login requires an MFA code (set broker.mfa_code_env)").into());
            }
            None => {
                let detail = token.detail.unwrap_or_else(|| "no access token returned".into());
                return Err(external(&format!("login rejected: {detail}")).into());
            }
        };

        let mut client = Self {
            http,
            base_url,
            session: Session {
                access_token,
                refresh_token: token.refresh_token.map(SecretString::new),
                account_url: String::new(),
                opened_at: Utc::now(),
            },
        };

        let account = client.primary_account().await?;
        client.session.account_url = account.url;

        info!(
            username = %credentials.username,
            account = %client.session.account_url,
            "Robinhood session opened"
        );
        Ok(client)
    }

    /// Revoke the session tokens.
    pub async fn logout(self) -> Result<()> {
        let mut tokens = vec![self.session.access_token.expose_secret().clone()];
        if let Some(refresh) = &self.session.refresh_token {
            tokens.push(refresh.expose_secret().clone());
        }
        for token in tokens {
            let resp = self
                .http
                .post(format!("{}/oauth2/revoke_token/", self.base_url))
                .json(&serde_json::json!({ "client_id": CLIENT_ID, "token": token }))
                .send()
                .await
                .context("Robinhood logout request failed")?;
            if !resp.status().is_success() {
                warn!(status = %resp.status(), "Token revoke returned non-success");
            }
        }
        info!(
            opened_at = %self.session.opened_at,
            "Robinhood session closed"
        );
        Ok(())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // -- Internal helpers ------------------------------------------------

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(self.session.access_token.expose_secret())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url, "GET");
        let resp = self
            .authed(self.http.get(url))
            .send()
            .await
            .with_context(|| format!("Robinhood request failed: {url}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(external(&format!("{status} from {url}: {body}")).into());
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse Robinhood response from {url}"))
    }

    /// Follow `next` links until exhausted.
    async fn get_paginated<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());
        let mut pages = 0;

        while let Some(url) = next {
            if pages >= MAX_PAGES {
                warn!(url = %url, pages, "Pagination limit reached, truncating");
                break;
            }
            let page: Page<T> = self.get_json(&url).await?;
            items.extend(page.results);
            next = page.next;
            pages += 1;
        }
        Ok(items)
    }

    async fn primary_account(&self) -> Result<AccountItem> {
        let page: Page<AccountItem> = self.get_json(&format!("{}/accounts/", self.base_url)).await?;
        page.results
            .into_iter()
            .next()
            .ok_or_else(|| external("no brokerage account on this login").into())
    }

    async fn position_items(&self) -> Result<Vec<PositionItem>> {
        self.get_paginated(&format!("{}/positions/?nonzero=true", self.base_url))
            .await
    }

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        quantity: u64,
        side: OrderSide,
    ) -> Result<OrderReceipt> {
        let instrument = self
            .resolve_instrument(symbol)
            .await?
            .ok_or_else(|| external(&format!("no instrument for {symbol}")))?;

        let body = Self::market_order_body(&self.session.account_url, &instrument, symbol, quantity, side);

        let resp = self
            .authed(self.http.post(format!("{}/orders/", self.base_url)))
            .json(&body)
            .send()
            .await
            .context("Robinhood order request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(external(&format!("order rejected {status}: {body}")).into());
        }

        let order: OrderResponse = resp
            .json()
            .await
            .context("Failed to parse Robinhood order response")?;

        Ok(OrderReceipt {
            order_id: order.id,
            symbol: symbol.clone(),
            side,
            quantity,
            state: order.state,
            timestamp: Utc::now(),
        })
    }

    fn market_order_body(
        account_url: &str,
        instrument: &InstrumentId,
        symbol: &Symbol,
        quantity: u64,
        side: OrderSide,
    ) -> serde_json::Value {
        serde_json::json!({
            "account": account_url,
            "instrument": instrument.0,
            "symbol": symbol.as_str(),
            "type": "market",
            "time_in_force": "gfd",
            "trigger": "immediate",
            "quantity": quantity,
            "side": side.to_string(),
            "ref_id": uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Latest price for a quote, preferring the extended-hours print.
    fn quote_price(quote: &QuoteItem) -> Result<PriceQuote> {
        let raw = quote
            .last_extended_hours_trade_price
            .as_deref()
            .or(quote.last_trade_price.as_deref());
        match raw {
            Some(raw) => parse_decimal("last_trade_price", raw),
            None => Ok(Decimal::ZERO),
        }
    }

    fn to_open_position(item: &PositionItem) -> Result<OpenPositionRecord> {
        Ok(OpenPositionRecord {
            instrument: InstrumentId(item.instrument.clone()),
            quantity: parse_decimal("quantity", &item.quantity)?,
            created_at: item.created_at.clone().unwrap_or_default(),
        })
    }

    fn to_candle(bar: &HistoricalBar) -> Result<Candle> {
        let begins_at = DateTime::parse_from_rfc3339(&bar.begins_at)
            .with_context(|| format!("Bad begins_at: {}", bar.begins_at))?
            .with_timezone(&Utc);
        Ok(Candle {
            begins_at,
            open: parse_decimal("open_price", &bar.open_price)?,
            close: parse_decimal("close_price", &bar.close_price)?,
            high: parse_decimal("high_price", &bar.high_price)?,
            low: parse_decimal("low_price", &bar.low_price)?,
            volume: bar.volume,
        })
    }

    fn to_profile(account: &AccountItem, portfolio: &PortfolioItem) -> Result<Profile> {
        let cash_raw = account
            .portfolio_cash
            .as_deref()
            .or(account.cash.as_deref())
            .unwrap_or("0");
        let equity_raw = portfolio
            .extended_hours_equity
            .as_deref()
            .unwrap_or(&portfolio.equity);
        Ok(Profile {
            cash: parse_decimal("portfolio_cash", cash_raw)?,
            equity: parse_decimal("equity", equity_raw)?,
        })
    }
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim()).with_context(|| format!("Bad decimal in {field}: {raw:?}"))
}

fn external(message: &str) -> BotError {
    BotError::ExternalCall {
        collaborator: COLLABORATOR.to_string(),
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Collaborator trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl AccountData for RobinhoodClient {
    async fn get_watchlist_symbols(&self) -> Result<BTreeSet<Symbol>> {
        let lists: Vec<WatchlistItem> = self
            .get_paginated(&format!("{}/midlands/lists/default/", self.base_url))
            .await?;

        let mut symbols = BTreeSet::new();
        for list in &lists {
            let entries: Vec<WatchlistEntry> = self
                .get_paginated(&format!(
                    "{}/midlands/lists/items/?list_id={}",
                    self.base_url,
                    urlencoding::encode(&list.id)
                ))
                .await?;
            for entry in entries {
                match entry.symbol.as_deref().map(Symbol::new) {
                    Some(Ok(symbol)) => {
                        symbols.insert(symbol);
                    }
                    Some(Err(e)) => warn!(list = %list.display_name, error = %e, "Skipping watchlist entry"),
                    None => {}
                }
            }
        }

        debug!(lists = lists.len(), symbols = symbols.len(), "Watchlists fetched");
        Ok(symbols)
    }

    async fn get_open_positions(&self) -> Result<Vec<OpenPositionRecord>> {
        self.position_items()
            .await?
            .iter()
            .map(Self::to_open_position)
            .collect()
    }

    async fn get_holdings(&self) -> Result<RawHoldings> {
        let items = self.position_items().await?;

        let mut symbols = Vec::with_capacity(items.len());
        for item in &items {
            symbols.push(
                self.symbol_for_instrument(&InstrumentId(item.instrument.clone()))
                    .await?,
            );
        }
        let prices = self.get_price_quotes(&symbols).await?;

        let mut holdings = Vec::with_capacity(items.len());
        for ((item, symbol), price) in items.iter().zip(symbols).zip(prices) {
            let quantity = parse_decimal("quantity", &item.quantity)?;
            let average_cost = match item.average_buy_price.as_deref() {
                Some(raw) => parse_decimal("average_buy_price", raw)?,
                None => Decimal::ZERO,
            };
            holdings.push(RawHolding {
                symbol,
                quantity,
                average_cost,
                equity: quantity * price,
            });
        }

        Ok(RawHoldings::from_holdings(holdings)?)
    }

    async fn get_profile(&self) -> Result<Profile> {
        let account = self.primary_account().await?;
        let portfolio: Page<PortfolioItem> =
            self.get_json(&format!("{}/portfolios/", self.base_url)).await?;
        let portfolio = portfolio
            .results
            .into_iter()
            .next()
            .ok_or_else(|| external("no portfolio on this account"))?;
        Self::to_profile(&account, &portfolio)
    }

    async fn resolve_instrument(&self, symbol: &Symbol) -> Result<Option<InstrumentId>> {
        let page: Page<InstrumentItem> = self
            .get_json(&format!(
                "{}/instruments/?symbol={}",
                self.base_url,
                urlencoding::encode(symbol.as_str())
            ))
            .await?;
        Ok(page.results.into_iter().next().map(|i| InstrumentId(i.url)))
    }

    async fn symbol_for_instrument(&self, instrument: &InstrumentId) -> Result<Symbol> {
        let item: InstrumentItem = self.get_json(&instrument.0).await?;
        Ok(Symbol::new(&item.symbol)?)
    }
}

#[async_trait]
impl MarketData for RobinhoodClient {
    async fn get_price_quotes(&self, symbols: &[Symbol]) -> Result<Vec<PriceQuote>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let joined: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
        let resp: QuotesResponse = self
            .get_json(&format!(
                "{}/quotes/?symbols={}",
                self.base_url,
                urlencoding::encode(&joined.join(","))
            ))
            .await?;

        if resp.results.len() != symbols.len() {
            return Err(BotError::QuoteMismatch {
                requested: symbols.len(),
                received: resp.results.len(),
            }
            .into());
        }

        resp.results
            .iter()
            .zip(symbols)
            .map(|(quote, symbol)| match quote {
                Some(q) if q.symbol != symbol.as_str() => Err(anyhow::Error::from(external(
                    &format!("quote order mismatch: asked for {symbol}, got {}", q.symbol),
                ))),
                Some(q) => Self::quote_price(q),
                None => {
                    warn!(symbol = %symbol, "No quote returned, using 0");
                    Ok(Decimal::ZERO)
                }
            })
            .collect()
    }

    async fn get_historical_data(
        &self,
        symbol: &Symbol,
        interval: Interval,
        span: Span,
        bounds: Bounds,
    ) -> Result<Vec<Candle>> {
        let resp: HistoricalsResponse = self
            .get_json(&format!(
                "{}/quotes/historicals/?symbols={}&interval={}&span={}&bounds={}",
                self.base_url,
                urlencoding::encode(symbol.as_str()),
                interval.as_str(),
                span.as_str(),
                bounds.as_str(),
            ))
            .await?;

        resp.results
            .into_iter()
            .next()
            .map(|series| {
                series
                    .historicals
                    .iter()
                    .map(Self::to_candle)
                    .collect::<Result<Vec<_>>>()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait]
impl Trading for RobinhoodClient {
    async fn submit_market_sell(&self, symbol: &Symbol, quantity: u64) -> Result<OrderReceipt> {
        self.place_market_order(symbol, quantity, OrderSide::Sell).await
    }

    async fn submit_market_buy(&self, symbol: &Symbol, quantity: u64) -> Result<OrderReceipt> {
        self.place_market_order(symbol, quantity, OrderSide::Buy).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
