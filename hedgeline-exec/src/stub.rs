//! Stub implementations for testing.
//!
//! These implementations simulate the exchange without making real API
//! calls: scripted metadata, prices and positions, recorded submissions,
//! per-operation failure and latency injection, and call counters.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use hedgeline_domain::{Candle, Leverage, OrderAck, OrderId, OrderRef, OrderStatus, Symbol};

use crate::error::{ExecError, ExecResult};
use crate::ports::{
    ConditionalOrderSpec, ConditionalRef, ExchangeService, ModifySpec, OrderChannel, OrderKind,
    OrderSpec, OrderStatusReport, RawPosition, SessionToken, StreamChannel, SymbolMetadata,
};

/// Operations the stub counts and can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubOp {
    /// `fetch_symbol_metadata`
    FetchMetadata,
    /// `fetch_reference_price`
    FetchPrice,
    /// `fetch_account_positions`
    FetchPositions,
    /// `open_session_token`
    OpenToken,
    /// `keepalive_session_token`
    KeepaliveToken,
    /// `close_session_token`
    CloseToken,
    /// `open_market_and_user_stream`
    OpenStream,
    /// `StreamChannel::close`
    CloseStream,
    /// `open_order_channel`
    OpenOrderChannel,
    /// `OrderChannel::close`
    CloseOrderChannel,
    /// `OrderChannel::submit`
    SubmitOrder,
    /// `OrderChannel::modify`
    ModifyOrder,
    /// `OrderChannel::query_status`
    QueryStatus,
    /// `submit_conditional_order`
    SubmitConditional,
    /// `cancel_conditional_order`
    CancelConditional,
    /// `set_leverage`
    SetLeverage,
    /// `set_dual_position_mode`
    SetDualMode,
    /// `fetch_candles`
    FetchCandles,
}

/// Build a raw position record with fixed prices (entry 60000, mark 60100).
pub fn raw_position(symbol: &str, amount: &str, position_side: &str) -> RawPosition {
    RawPosition {
        symbol: symbol.to_string(),
        position_amt: amount.to_string(),
        entry_price: "60000.0".to_string(),
        mark_price: "60100.0".to_string(),
        unrealized_pnl: "1.50000000".to_string(),
        leverage: "20".to_string(),
        position_side: position_side.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Default)]
struct StubState {
    markets: Mutex<Vec<SymbolMetadata>>,
    prices: Mutex<HashMap<String, Decimal>>,
    positions: Mutex<Vec<RawPosition>>,
    candles: Mutex<Vec<Candle>>,
    calls: Mutex<HashMap<StubOp, u64>>,
    /// (operation, call number that fails, error)
    failures: Mutex<Vec<(StubOp, u64, ExecError)>>,
    unavailable: Mutex<HashMap<StubOp, bool>>,
    delays: Mutex<HashMap<StubOp, Duration>>,
    next_order_id: Mutex<u64>,
    submitted: Mutex<Vec<OrderSpec>>,
    modified: Mutex<Vec<ModifySpec>>,
    conditional: Mutex<Vec<ConditionalOrderSpec>>,
    conditional_acks: Mutex<Vec<OrderAck>>,
    statuses: Mutex<Vec<OrderStatusReport>>,
    dual_mode: Mutex<Option<bool>>,
    scripted_streams: Mutex<VecDeque<mpsc::UnboundedReceiver<String>>>,
    idle_stream_senders: Mutex<Vec<mpsc::UnboundedSender<String>>>,
    /// Closed flags of every order channel handed out
    order_channel_flags: Mutex<Vec<Arc<watch::Sender<bool>>>>,
}

impl StubState {
    /// Count the call and return an injected failure, if any.
    fn enter(&self, op: StubOp) -> ExecResult<()> {
        let call = {
            let mut calls = lock(&self.calls);
            let count = calls.entry(op).or_insert(0);
            *count += 1;
            *count
        };

        if lock(&self.unavailable).get(&op).copied().unwrap_or(false) {
            return Err(ExecError::Transport(format!("stub: {:?} unavailable", op)));
        }

        let mut failures = lock(&self.failures);
        if let Some(index) = failures.iter().position(|(o, n, _)| *o == op && *n == call) {
            let (_, _, err) = failures.remove(index);
            debug!(?op, call, error = %err, "Stub: injected failure");
            return Err(err);
        }
        Ok(())
    }

    /// `enter`, then hold the response for any injected delay.
    async fn call(&self, op: StubOp) -> ExecResult<()> {
        let delay = lock(&self.delays).get(&op).copied();
        let outcome = self.enter(op);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    fn calls(&self, op: StubOp) -> u64 {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    fn next_order_id(&self) -> u64 {
        let mut next = lock(&self.next_order_id);
        *next += 1;
        1000 + *next
    }
}

// =============================================================================
// Stub Exchange
// =============================================================================

/// Stub exchange for testing.
pub struct StubExchange {
    state: Arc<StubState>,
}

impl StubExchange {
    /// Create a stub with no markets, prices or positions.
    pub fn new() -> Self {
        Self { state: Arc::new(StubState::default()) }
    }

    /// Create a stub listing BTCUSDT, ETHUSDT and DOGEUSDT.
    pub fn with_default_markets() -> Self {
        let stub = Self::new();
        stub.add_market(market("BTCUSDT", "0.001", "0.001", "0.10"));
        stub.add_market(market("ETHUSDT", "0.001", "0.001", "0.01"));
        stub.add_market(market("DOGEUSDT", "1", "1", "0.000010"));
        stub
    }

    /// List an additional symbol.
    pub fn add_market(&self, metadata: SymbolMetadata) {
        lock(&self.state.markets).push(metadata);
    }

    /// Set the reference price for a symbol.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        lock(&self.state.prices).insert(symbol.to_string(), price);
    }

    /// Replace the account snapshot returned by `fetch_account_positions`.
    pub fn set_positions(&self, positions: Vec<RawPosition>) {
        *lock(&self.state.positions) = positions;
    }

    /// Replace the candle history.
    pub fn set_candles(&self, candles: Vec<Candle>) {
        *lock(&self.state.candles) = candles;
    }

    /// Register an order that `query_status` will report.
    pub fn set_order_status(&self, report: OrderStatusReport) {
        let mut statuses = lock(&self.state.statuses);
        statuses.retain(|r| r.order_id != report.order_id);
        statuses.push(report);
    }

    /// Fail the next call to `op` with `err`.
    pub fn fail_next(&self, op: StubOp, err: ExecError) {
        self.fail_nth(op, 1, err);
    }

    /// Fail the `n`th call to `op` from now (1 = next call) with `err`.
    pub fn fail_nth(&self, op: StubOp, n: u64, err: ExecError) {
        let target = self.state.calls(op) + n;
        lock(&self.state.failures).push((op, target, err));
    }

    /// Make every call to `op` fail with a transport error until reset.
    pub fn set_unavailable(&self, op: StubOp, unavailable: bool) {
        lock(&self.state.unavailable).insert(op, unavailable);
    }

    /// Delay every response of `op` by `delay` (zero removes the delay).
    pub fn set_delay(&self, op: StubOp, delay: Duration) {
        let mut delays = lock(&self.state.delays);
        if delay.is_zero() {
            delays.remove(&op);
        } else {
            delays.insert(op, delay);
        }
    }

    /// Drop every order channel opened so far, as if the server hung up.
    pub fn drop_order_channels(&self) {
        for flag in lock(&self.state.order_channel_flags).iter() {
            flag.send_replace(true);
        }
    }

    /// Number of calls made to `op`
    pub fn calls(&self, op: StubOp) -> u64 {
        self.state.calls(op)
    }

    /// Queue a stream for the next `open_market_and_user_stream` call.
    ///
    /// Messages sent through the handle are delivered in order; dropping the
    /// handle ends the stream. Unscripted opens yield a stream that stays
    /// silent until the stub is dropped.
    pub fn script_stream(&self) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state.scripted_streams).push_back(rx);
        tx
    }

    /// Orders submitted through any order channel, in order
    pub fn submitted_orders(&self) -> Vec<OrderSpec> {
        lock(&self.state.submitted).clone()
    }

    /// Modifications sent through any order channel, in order
    pub fn modified_orders(&self) -> Vec<ModifySpec> {
        lock(&self.state.modified).clone()
    }

    /// Conditional orders submitted, in order
    pub fn conditional_orders(&self) -> Vec<ConditionalOrderSpec> {
        lock(&self.state.conditional).clone()
    }

    /// Acknowledgements returned for conditional orders, in order
    pub fn conditional_acks(&self) -> Vec<OrderAck> {
        lock(&self.state.conditional_acks).clone()
    }

    /// Last requested dual position mode
    pub fn dual_position_mode(&self) -> Option<bool> {
        *lock(&self.state.dual_mode)
    }
}

impl Default for StubExchange {
    fn default() -> Self {
        Self::new()
    }
}

fn market(symbol: &str, min_quantity: &str, quantity_step: &str, price_step: &str) -> SymbolMetadata {
    SymbolMetadata {
        symbol: symbol.to_string(),
        quantity_step: quantity_step.to_string(),
        min_quantity: min_quantity.to_string(),
        price_step: price_step.to_string(),
    }
}

#[async_trait]
impl ExchangeService for StubExchange {
    async fn fetch_symbol_metadata(&self) -> ExecResult<Vec<SymbolMetadata>> {
        self.state.call(StubOp::FetchMetadata).await?;
        Ok(lock(&self.state.markets).clone())
    }

    async fn fetch_reference_price(&self, symbol: &Symbol) -> ExecResult<Decimal> {
        self.state.call(StubOp::FetchPrice).await?;
        lock(&self.state.prices)
            .get(symbol.as_pair())
            .copied()
            .ok_or_else(|| ExecError::Rejected { code: -1121, msg: "Invalid symbol.".to_string() })
    }

    async fn fetch_account_positions(&self) -> ExecResult<Vec<RawPosition>> {
        self.state.call(StubOp::FetchPositions).await?;
        Ok(lock(&self.state.positions).clone())
    }

    async fn open_session_token(&self) -> ExecResult<SessionToken> {
        self.state.call(StubOp::OpenToken).await?;
        Ok(SessionToken::new(format!("stub-listen-key-{}", self.state.calls(StubOp::OpenToken))))
    }

    async fn keepalive_session_token(&self, _token: &SessionToken) -> ExecResult<()> {
        self.state.call(StubOp::KeepaliveToken).await
    }

    async fn close_session_token(&self, _token: &SessionToken) -> ExecResult<()> {
        self.state.call(StubOp::CloseToken).await
    }

    async fn open_market_and_user_stream(
        &self,
        symbol: &Symbol,
        interval: &str,
        _token: &SessionToken,
    ) -> ExecResult<Box<dyn StreamChannel>> {
        self.state.call(StubOp::OpenStream).await?;
        debug!(%symbol, interval, "Stub: stream opened");

        let scripted = lock(&self.state.scripted_streams).pop_front();
        let rx = match scripted {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                lock(&self.state.idle_stream_senders).push(tx);
                rx
            }
        };
        Ok(Box::new(StubStream { rx, state: self.state.clone(), closed: false }))
    }

    async fn open_order_channel(&self) -> ExecResult<Arc<dyn OrderChannel>> {
        self.state.call(StubOp::OpenOrderChannel).await?;
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        lock(&self.state.order_channel_flags).push(closed.clone());
        Ok(Arc::new(StubOrderChannel { state: self.state.clone(), closed }))
    }

    async fn submit_conditional_order(&self, spec: &ConditionalOrderSpec) -> ExecResult<OrderAck> {
        self.state.call(StubOp::SubmitConditional).await?;
        let ack = OrderAck {
            symbol: spec.symbol.clone(),
            order_id: self.state.next_order_id(),
            client_order_id: spec.client_order_id.clone(),
            status: OrderStatus::New,
        };
        lock(&self.state.conditional).push(spec.clone());
        lock(&self.state.conditional_acks).push(ack.clone());
        Ok(ack)
    }

    async fn cancel_conditional_order(&self, order: &ConditionalRef) -> ExecResult<()> {
        self.state.call(StubOp::CancelConditional).await?;
        debug!(algo_id = order.algo_id, "Stub: conditional order cancelled");
        Ok(())
    }

    async fn set_leverage(&self, _symbol: &Symbol, _leverage: Leverage) -> ExecResult<()> {
        self.state.call(StubOp::SetLeverage).await
    }

    async fn set_dual_position_mode(&self, enabled: bool) -> ExecResult<()> {
        self.state.call(StubOp::SetDualMode).await?;
        *lock(&self.state.dual_mode) = Some(enabled);
        Ok(())
    }

    async fn fetch_candles(&self, symbol: &Symbol, _interval: &str, limit: u16) -> ExecResult<Vec<Candle>> {
        self.state.call(StubOp::FetchCandles).await?;
        let candles: Vec<Candle> =
            lock(&self.state.candles).iter().filter(|c| &c.symbol == symbol).cloned().collect();
        let skip = candles.len().saturating_sub(usize::from(limit));
        Ok(candles.into_iter().skip(skip).collect())
    }
}

// =============================================================================
// Stub Channels
// =============================================================================

/// Stream backed by an in-memory channel.
pub struct StubStream {
    rx: mpsc::UnboundedReceiver<String>,
    state: Arc<StubState>,
    closed: bool,
}

#[async_trait]
impl StreamChannel for StubStream {
    async fn next_message(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.rx.close();
            let _ = self.state.enter(StubOp::CloseStream);
        }
    }
}

/// Order channel that records submissions.
///
/// Market orders are acknowledged as filled, limit orders as new. Once
/// closed, every request fails with a transport error.
pub struct StubOrderChannel {
    state: Arc<StubState>,
    closed: Arc<watch::Sender<bool>>,
}

impl StubOrderChannel {
    fn ensure_open(&self) -> ExecResult<()> {
        if *self.closed.borrow() {
            return Err(ExecError::Transport("stub: order channel closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderChannel for StubOrderChannel {
    async fn submit(&self, spec: &OrderSpec) -> ExecResult<OrderAck> {
        self.state.enter(StubOp::SubmitOrder)?;
        self.ensure_open()?;
        let status = match spec.kind {
            OrderKind::Market => OrderStatus::Filled,
            OrderKind::Limit { .. } => OrderStatus::New,
        };
        lock(&self.state.submitted).push(spec.clone());
        Ok(OrderAck {
            symbol: spec.symbol.clone(),
            order_id: self.state.next_order_id(),
            client_order_id: spec.client_order_id.clone(),
            status,
        })
    }

    async fn modify(&self, spec: &ModifySpec) -> ExecResult<OrderAck> {
        self.state.enter(StubOp::ModifyOrder)?;
        self.ensure_open()?;
        lock(&self.state.modified).push(spec.clone());

        let (order_id, client_order_id) = match &spec.order.id {
            OrderId::Exchange(id) => {
                let client = lock(&self.state.statuses)
                    .iter()
                    .find(|r| r.order_id == *id)
                    .map(|r| r.client_order_id.clone())
                    .unwrap_or_default();
                (*id, client)
            }
            OrderId::Client(client) => (0, client.clone()),
        };
        Ok(OrderAck { symbol: spec.order.symbol.clone(), order_id, client_order_id, status: OrderStatus::New })
    }

    async fn query_status(&self, order: &OrderRef) -> ExecResult<OrderStatusReport> {
        self.state.enter(StubOp::QueryStatus)?;
        self.ensure_open()?;
        lock(&self.state.statuses)
            .iter()
            .find(|r| {
                r.symbol == order.symbol
                    && match &order.id {
                        OrderId::Exchange(id) => r.order_id == *id,
                        OrderId::Client(id) => &r.client_order_id == id,
                    }
            })
            .cloned()
            .ok_or_else(|| ExecError::Rejected { code: -2013, msg: "Order does not exist.".to_string() })
    }

    async fn close(&self) {
        let _ = self.state.enter(StubOp::CloseOrderChannel);
        self.closed.send_replace(true);
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nth_failure_hits_only_that_call() {
        let stub = StubExchange::with_default_markets();
        stub.fail_nth(StubOp::FetchMetadata, 2, ExecError::Transport("boom".into()));

        assert!(stub.fetch_symbol_metadata().await.is_ok());
        assert!(stub.fetch_symbol_metadata().await.is_err());
        assert!(stub.fetch_symbol_metadata().await.is_ok());
        assert_eq!(stub.calls(StubOp::FetchMetadata), 3);
    }

    #[tokio::test]
    async fn test_scripted_stream_delivers_then_ends() {
        let stub = StubExchange::new();
        let tx = stub.script_stream();
        tx.send("hello".to_string()).unwrap();
        drop(tx);

        let token = stub.open_session_token().await.unwrap();
        let mut stream = stub
            .open_market_and_user_stream(&Symbol::from_pair("BTCUSDT").unwrap(), "1m", &token)
            .await
            .unwrap();

        assert_eq!(stream.next_message().await.as_deref(), Some("hello"));
        assert_eq!(stream.next_message().await, None);
    }

    #[tokio::test]
    async fn test_dropped_order_channel_refuses_requests() {
        let stub = StubExchange::with_default_markets();
        let channel = stub.open_order_channel().await.unwrap();

        stub.drop_order_channels();
        channel.closed().await;

        let result = channel.query_status(&OrderRef::by_exchange_id(Symbol::from_pair("BTCUSDT").unwrap(), 1)).await;
        assert!(matches!(result, Err(ExecError::Transport(_))));

        // Channels opened later are unaffected
        let fresh = stub.open_order_channel().await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(10), fresh.closed()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_operation_holds_response() {
        let stub = StubExchange::new();
        stub.set_delay(StubOp::FetchPositions, Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        stub.fetch_account_positions().await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(stub.calls(StubOp::FetchPositions), 1);
    }

    #[tokio::test]
    async fn test_unavailable_operation() {
        let stub = StubExchange::new();
        stub.set_unavailable(StubOp::OpenToken, true);
        assert!(matches!(stub.open_session_token().await, Err(ExecError::Transport(_))));

        stub.set_unavailable(StubOp::OpenToken, false);
        assert!(stub.open_session_token().await.is_ok());
    }
}
