//! Trading session facade.
//!
//! Wires one exchange service to the rule cache, the position view, the
//! order coordinator and the connection supervisor, all sharing the same
//! order channel slot.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use hedgeline_connectors::{BinanceEndpoints, BinanceExchange};
use hedgeline_domain::{Candle, ConnectionState, Symbol};
use hedgeline_exec::{ExchangeService, OrderChannelSlot, OrderCoordinator, PositionView, SymbolRuleCache};

use crate::config::Config;
use crate::error::SessionResult;
use crate::event_bus::{EventBus, EventReceiver};
use crate::retry::RetryPolicy;
use crate::supervisor::ConnectionSupervisor;

/// Maximum candles Binance returns per history request
const MAX_CANDLE_HISTORY: u16 = 1500;

/// One logical trading session against one exchange account.
pub struct TradingSession {
    exchange: Arc<dyn ExchangeService>,
    rules: Arc<SymbolRuleCache>,
    positions: Arc<PositionView>,
    coordinator: OrderCoordinator,
    supervisor: ConnectionSupervisor,
    events: EventBus,
}

impl TradingSession {
    /// Build a session over any exchange service.
    pub fn new(exchange: Arc<dyn ExchangeService>, policy: RetryPolicy, keepalive_interval: Duration) -> Self {
        let rules = Arc::new(SymbolRuleCache::new(exchange.clone()));
        let positions = Arc::new(PositionView::new(exchange.clone()));
        let order_slot = Arc::new(OrderChannelSlot::new());
        let events = EventBus::default();

        let coordinator = OrderCoordinator::new(exchange.clone(), rules.clone(), positions.clone(), order_slot.clone());
        let supervisor = ConnectionSupervisor::new(
            exchange.clone(),
            positions.clone(),
            order_slot,
            events.clone(),
            policy,
            keepalive_interval,
        );

        Self { exchange, rules, positions, coordinator, supervisor, events }
    }

    /// Build a Binance session from configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut endpoints = BinanceEndpoints::for_network(config.network);
        if let Some(url) = &config.metadata_url {
            endpoints = endpoints.with_metadata_url(url.clone());
        }

        info!(network = %config.network, metadata = %endpoints.metadata_rest, "Using Binance endpoints");

        let exchange = BinanceExchange::with_endpoints(config.credentials.clone(), config.network, endpoints);
        Self::new(Arc::new(exchange), config.retry, config.keepalive_interval)
    }

    /// Start the connection. No-op if already connecting or connected.
    pub async fn connect(&self, symbol: Symbol, interval: impl Into<String>) -> bool {
        self.supervisor.connect(symbol, interval).await
    }

    /// Tear the connection down. Safe to call repeatedly.
    pub async fn destroy(&self) {
        self.supervisor.destroy().await;
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Order operations (market, limit, bracket, modify, close).
    pub fn orders(&self) -> &OrderCoordinator {
        &self.coordinator
    }

    /// Position view
    pub fn positions(&self) -> &Arc<PositionView> {
        &self.positions
    }

    /// Symbol rule cache
    pub fn rules(&self) -> &Arc<SymbolRuleCache> {
        &self.rules
    }

    /// Connection supervisor
    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Recent closed candles for `symbol`, oldest first (at most 1500).
    pub async fn candle_history(&self, symbol: &Symbol, interval: &str, limit: u16) -> SessionResult<Vec<Candle>> {
        let candles = self.exchange.fetch_candles(symbol, interval, limit.min(MAX_CANDLE_HISTORY)).await?;
        Ok(candles)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use hedgeline_domain::{OrderIntent, OrderSide, PositionSide};
    use hedgeline_exec::{raw_position, ExecError, StubExchange, StubOp};
    use rust_decimal_macros::dec;

    fn session(stub: &Arc<StubExchange>) -> TradingSession {
        TradingSession::new(stub.clone(), Config::test().retry, Duration::from_secs(1500))
    }

    fn btc() -> Symbol {
        Symbol::from_pair("BTCUSDT").unwrap()
    }

    #[tokio::test]
    async fn test_orders_need_a_connection() {
        let stub = Arc::new(StubExchange::with_default_markets());
        let session = session(&stub);

        let intent = OrderIntent::new(btc(), OrderSide::Buy, dec!(250)).with_reference_price(
            hedgeline_domain::Price::new(dec!(50000)).unwrap(),
        );
        let result = session.orders().place_market_order(&intent).await;

        assert!(matches!(result, Err(ExecError::NotConnected)));
        assert!(stub.submitted_orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_session_places_orders() {
        let stub = Arc::new(StubExchange::with_default_markets());
        stub.set_price("BTCUSDT", dec!(50000));
        let session = session(&stub);

        session.connect(btc(), "1m").await;
        let mut state = session.supervisor().subscribe_state();
        state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

        let intent = OrderIntent::new(btc(), OrderSide::Buy, dec!(250));
        let ack = session.orders().place_market_order(&intent).await.unwrap();

        assert_eq!(ack.symbol, btc());
        assert_eq!(stub.submitted_orders()[0].quantity, "0.005");

        session.destroy().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_uses_fresh_positions() {
        let stub = Arc::new(StubExchange::with_default_markets());
        let session = session(&stub);

        session.connect(btc(), "1m").await;
        let mut state = session.supervisor().subscribe_state();
        state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

        // Opened after the connect-time refresh
        stub.set_positions(vec![raw_position("BTCUSDT", "0.015", "LONG")]);

        let ack = session.orders().close_position(&btc(), PositionSide::Long).await.unwrap();

        assert!(ack.is_some());
        assert_eq!(stub.submitted_orders()[0].side, OrderSide::Sell);
        assert_eq!(stub.submitted_orders()[0].quantity, "0.015");

        session.destroy().await;
    }

    #[tokio::test]
    async fn test_candle_history_from_exchange() {
        let stub = Arc::new(StubExchange::with_default_markets());
        let session = session(&stub);

        let candles = session.candle_history(&btc(), "1m", 5000).await.unwrap();

        assert!(candles.is_empty());
        assert_eq!(stub.calls(StubOp::FetchCandles), 1);
    }
}
