//! Position view.
//!
//! Cached belief about open positions. The held set is only ever replaced
//! wholesale from a full account snapshot; stream deltas never patch it.
//!
//! # Failure semantics
//!
//! A failed or unparseable snapshot clears the set. Empty means "unknown,
//! assume nothing is open", never "the last good snapshot is still valid".
//!
//! # Ordering
//!
//! Every refresh takes a generation number when it starts. A completion whose
//! generation is older than the one already applied is discarded, so a slow
//! response cannot overwrite a newer snapshot.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use hedgeline_domain::{Position, PositionSide, Symbol};

use crate::error::{ExecError, ExecResult};
use crate::ports::{ExchangeService, RawPosition};

/// Snapshot published to subscribers
pub type PositionSnapshot = Arc<Vec<Position>>;

struct Applied {
    generation: u64,
    positions: PositionSnapshot,
}

/// In-memory view of open positions.
pub struct PositionView {
    exchange: Arc<dyn ExchangeService>,
    applied: RwLock<Applied>,
    next_generation: AtomicU64,
    publisher: watch::Sender<PositionSnapshot>,
}

impl PositionView {
    /// Create an empty view backed by `exchange`.
    pub fn new(exchange: Arc<dyn ExchangeService>) -> Self {
        let empty: PositionSnapshot = Arc::new(Vec::new());
        let (publisher, _) = watch::channel(empty.clone());
        Self {
            exchange,
            applied: RwLock::new(Applied { generation: 0, positions: empty }),
            next_generation: AtomicU64::new(0),
            publisher,
        }
    }

    /// Refresh from the exchange, logging failures instead of returning them.
    ///
    /// Used by stream-triggered and post-connect refreshes.
    pub async fn refresh(&self) {
        if let Err(e) = self.reload().await {
            warn!(error = %e, "Position refresh failed, view cleared");
        }
    }

    /// Refresh from the exchange and surface any failure.
    ///
    /// The view is cleared on failure before the error is returned.
    pub async fn reload(&self) -> ExecResult<PositionSnapshot> {
        let generation = self.begin();

        let result = self
            .exchange
            .fetch_account_positions()
            .await
            .and_then(|raw| parse_positions(&raw));

        match result {
            Ok(positions) => {
                let snapshot = Arc::new(positions);
                self.complete(generation, snapshot.clone()).await;
                Ok(snapshot)
            }
            Err(e) => {
                self.complete(generation, Arc::new(Vec::new())).await;
                Err(e)
            }
        }
    }

    /// Current snapshot, ordered by (symbol, side).
    pub async fn current(&self) -> PositionSnapshot {
        self.applied.read().await.positions.clone()
    }

    /// The held position for `symbol` on `side`, if any.
    pub async fn find(&self, symbol: &Symbol, side: PositionSide) -> Option<Position> {
        self.applied
            .read()
            .await
            .positions
            .iter()
            .find(|p| &p.symbol == symbol && p.side == side)
            .cloned()
    }

    /// Observe snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<PositionSnapshot> {
        self.publisher.subscribe()
    }

    fn begin(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Apply a completed refresh unless a newer one already landed.
    async fn complete(&self, generation: u64, positions: PositionSnapshot) -> bool {
        let mut applied = self.applied.write().await;
        if generation < applied.generation {
            debug!(generation, applied = applied.generation, "Discarding stale position snapshot");
            return false;
        }

        applied.generation = generation;
        applied.positions = positions.clone();
        drop(applied);

        info!(generation, open = positions.len(), "Position view replaced");
        self.publisher.send_replace(positions);
        true
    }
}

/// Parse a raw account snapshot, dropping flat positions.
///
/// Any unparseable record fails the whole snapshot.
pub fn parse_positions(raw: &[RawPosition]) -> ExecResult<Vec<Position>> {
    let mut positions = Vec::new();

    for record in raw {
        let signed_amount = parse_decimal(record, "positionAmt", &record.position_amt)?;
        if signed_amount.is_zero() {
            continue;
        }

        let leverage = record.leverage.parse::<u32>().map_err(|e| {
            ExecError::Protocol(format!("{}: invalid leverage '{}': {}", record.symbol, record.leverage, e))
        })?;

        positions.push(Position {
            symbol: Symbol::from_pair(&record.symbol)?,
            signed_amount,
            entry_price: parse_decimal(record, "entryPrice", &record.entry_price)?,
            mark_price: parse_decimal(record, "markPrice", &record.mark_price)?,
            unrealized_pnl: parse_decimal(record, "unRealizedProfit", &record.unrealized_pnl)?,
            leverage,
            side: PositionSide::from_str(&record.position_side)?,
        });
    }

    positions.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.side.cmp(&b.side)));
    Ok(positions)
}

fn parse_decimal(record: &RawPosition, field: &str, value: &str) -> ExecResult<Decimal> {
    Decimal::from_str(value).map_err(|e| {
        ExecError::Protocol(format!("{}: invalid {} '{}': {}", record.symbol, field, value, e))
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{raw_position, StubExchange, StubOp};
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::from_pair("BTCUSDT").unwrap()
    }

    #[tokio::test]
    async fn test_refresh_drops_flat_positions() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_positions(vec![
            raw_position("BTCUSDT", "0.015", "LONG"),
            raw_position("BTCUSDT", "0", "SHORT"),
            raw_position("ETHUSDT", "0.000", "BOTH"),
        ]);
        let view = PositionView::new(exchange);

        view.refresh().await;
        let current = view.current().await;

        assert_eq!(current.len(), 1);
        assert_eq!(current[0].signed_amount, dec!(0.015));
        assert_eq!(current[0].side, PositionSide::Long);
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_positions(vec![
            raw_position("ETHUSDT", "-1.5", "SHORT"),
            raw_position("BTCUSDT", "-0.002", "SHORT"),
            raw_position("BTCUSDT", "0.010", "LONG"),
        ]);
        let view = PositionView::new(exchange);

        let snapshot = view.reload().await.unwrap();
        let keys: Vec<_> = snapshot.iter().map(|p| (p.symbol.as_pair(), p.side)).collect();

        assert_eq!(
            keys,
            vec![
                ("BTCUSDT", PositionSide::Long),
                ("BTCUSDT", PositionSide::Short),
                ("ETHUSDT", PositionSide::Short),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_view() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_positions(vec![raw_position("BTCUSDT", "0.015", "LONG")]);
        let view = PositionView::new(exchange.clone());
        view.refresh().await;
        assert_eq!(view.current().await.len(), 1);

        exchange.fail_next(StubOp::FetchPositions, ExecError::Transport("reset".into()));
        view.refresh().await;

        assert!(view.current().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_snapshot_clears_view() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_positions(vec![raw_position("BTCUSDT", "0.015", "LONG")]);
        let view = PositionView::new(exchange.clone());
        view.refresh().await;

        exchange.set_positions(vec![
            raw_position("BTCUSDT", "0.015", "LONG"),
            raw_position("ETHUSDT", "not-a-number", "LONG"),
        ]);

        let err = view.reload().await.unwrap_err();
        assert!(matches!(err, ExecError::Protocol(_)));
        assert!(view.current().await.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_symbol_and_side() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_positions(vec![
            raw_position("BTCUSDT", "0.010", "LONG"),
            raw_position("BTCUSDT", "-0.002", "SHORT"),
        ]);
        let view = PositionView::new(exchange);
        view.refresh().await;

        let short = view.find(&btc(), PositionSide::Short).await.unwrap();
        assert_eq!(short.signed_amount, dec!(-0.002));
        assert!(view.find(&btc(), PositionSide::Net).await.is_none());
    }

    #[tokio::test]
    async fn test_subscribers_see_replacements() {
        let exchange = Arc::new(StubExchange::new());
        exchange.set_positions(vec![raw_position("BTCUSDT", "0.010", "LONG")]);
        let view = PositionView::new(exchange);
        let mut rx = view.subscribe();

        view.refresh().await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let exchange = Arc::new(StubExchange::new());
        let view = PositionView::new(exchange);

        let older = view.begin();
        let newer = view.begin();

        let fresh = Arc::new(parse_positions(&[raw_position("BTCUSDT", "0.010", "LONG")]).unwrap());
        assert!(view.complete(newer, fresh).await);

        // The older request finishes last with an empty snapshot
        assert!(!view.complete(older, Arc::new(Vec::new())).await);
        assert_eq!(view.current().await.len(), 1);
    }

    #[test]
    fn test_parse_maps_both_to_net() {
        let positions = parse_positions(&[raw_position("BTCUSDT", "-0.5", "BOTH")]).unwrap();

        assert_eq!(positions[0].side, PositionSide::Net);
        assert_eq!(positions[0].leverage, 20);
    }
}
