//! Order coordinator.
//!
//! Turns notional-sized intents into exchange-compliant orders and submits
//! them through whatever order channel the supervisor currently publishes.
//!
//! # Bracket strategies
//!
//! ```text
//! limit entry (GTC) → STOP_MARKET stop-loss → TAKE_PROFIT_MARKET take-profit
//! ```
//!
//! Legs are submitted in sequence and the sequence stops at the first failure.
//! Nothing is rolled back: a failed exit leg leaves the entry (and stop-loss,
//! if placed) live, and the caller receives `ExecError::BracketIncomplete`
//! describing what was placed.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use hedgeline_domain::{
    Leverage, OrderAck, OrderId, OrderIntent, OrderRef, OrderSide, PositionSide, Price,
    StrategyResult, Symbol,
};
use hedgeline_engine::{exact_text, resolve_price, resolve_quantity};

use crate::channel::OrderChannelSlot;
use crate::error::{BracketLeg, ExecError, ExecResult};
use crate::ports::{ConditionalKind, ConditionalOrderSpec, ExchangeService, ModifySpec, OrderKind, OrderSpec};
use crate::positions::PositionView;
use crate::symbol_rules::SymbolRuleCache;

/// Client order id prefixes
const ENTRY_PREFIX: &str = "en";
const STOP_LOSS_PREFIX: &str = "sl";
const TAKE_PROFIT_PREFIX: &str = "tp";
const CLOSE_PREFIX: &str = "cl";

/// Orchestrates single and multi-leg order operations.
pub struct OrderCoordinator {
    exchange: Arc<dyn ExchangeService>,
    rules: Arc<SymbolRuleCache>,
    positions: Arc<PositionView>,
    channel: Arc<OrderChannelSlot>,
}

impl OrderCoordinator {
    /// Create a coordinator over shared session components.
    pub fn new(
        exchange: Arc<dyn ExchangeService>,
        rules: Arc<SymbolRuleCache>,
        positions: Arc<PositionView>,
        channel: Arc<OrderChannelSlot>,
    ) -> Self {
        Self { exchange, rules, positions, channel }
    }

    /// Place a market order sized from the intent's notional.
    ///
    /// Sizes against the intent's reference price, or the live ticker when the
    /// intent carries none.
    pub async fn place_market_order(&self, intent: &OrderIntent) -> ExecResult<OrderAck> {
        let channel = self.channel.current().await?;

        let reference_price = match intent.reference_price {
            Some(price) => price.as_decimal(),
            None => self.exchange.fetch_reference_price(&intent.symbol).await?,
        };
        let rule = self.rules.get_rules(&intent.symbol).await?;
        let quantity = resolve_quantity(intent.notional, reference_price, &rule)?;

        let spec = OrderSpec {
            symbol: intent.symbol.clone(),
            side: intent.side,
            position_side: intent.position_side,
            quantity: quantity.text,
            kind: OrderKind::Market,
            reduce_only: false,
            client_order_id: client_order_id(ENTRY_PREFIX),
        };

        let ack = channel.submit(&spec).await?;
        info!(
            symbol = %spec.symbol,
            side = %spec.side,
            position_side = %spec.position_side,
            quantity = %spec.quantity,
            order_id = ack.order_id,
            "Market order placed"
        );
        Ok(ack)
    }

    /// Place a GTC limit order sized against the limit price.
    pub async fn place_limit_order(&self, intent: &OrderIntent, limit_price: Price) -> ExecResult<OrderAck> {
        let channel = self.channel.current().await?;

        let rule = self.rules.get_rules(&intent.symbol).await?;
        let price = resolve_price(limit_price, &rule)?;
        let quantity = resolve_quantity(intent.notional, limit_price.as_decimal(), &rule)?;

        let spec = OrderSpec {
            symbol: intent.symbol.clone(),
            side: intent.side,
            position_side: intent.position_side,
            quantity: quantity.text,
            kind: OrderKind::Limit { price: price.text },
            reduce_only: false,
            client_order_id: client_order_id(ENTRY_PREFIX),
        };

        let ack = channel.submit(&spec).await?;
        info!(
            symbol = %spec.symbol,
            side = %spec.side,
            quantity = %spec.quantity,
            order_id = ack.order_id,
            "Limit order placed"
        );
        Ok(ack)
    }

    /// Place a limit entry with conditional stop-loss and take-profit exits.
    ///
    /// All three legs carry the quantity derived from notional / entry price.
    /// Exit legs are on the opposite side and trigger on the mark price.
    ///
    /// # Errors
    ///
    /// - `ExecError::InvalidParameter` if the stop and target are on the wrong
    ///   side of the entry
    /// - the entry error, unchanged, if the entry fails
    /// - `ExecError::BracketIncomplete` if an exit leg fails
    pub async fn place_bracket_strategy(
        &self,
        intent: &OrderIntent,
        entry_price: Price,
        stop_loss: Price,
        take_profit: Price,
    ) -> ExecResult<StrategyResult> {
        validate_bracket(intent.side, entry_price, stop_loss, take_profit)?;

        let channel = self.channel.current().await?;
        let rule = self.rules.get_rules(&intent.symbol).await?;
        let quantity = resolve_quantity(intent.notional, entry_price.as_decimal(), &rule)?;
        let entry_text = resolve_price(entry_price, &rule)?.text;
        let stop_text = resolve_price(stop_loss, &rule)?.text;
        let target_text = resolve_price(take_profit, &rule)?.text;
        let exit_side = intent.side.opposite();

        let entry_spec = OrderSpec {
            symbol: intent.symbol.clone(),
            side: intent.side,
            position_side: intent.position_side,
            quantity: quantity.text.clone(),
            kind: OrderKind::Limit { price: entry_text },
            reduce_only: false,
            client_order_id: client_order_id(ENTRY_PREFIX),
        };
        let entry = channel.submit(&entry_spec).await?;
        info!(symbol = %intent.symbol, quantity = %quantity.text, order_id = entry.order_id, "Bracket entry placed");

        let stop_spec = ConditionalOrderSpec {
            symbol: intent.symbol.clone(),
            side: exit_side,
            position_side: intent.position_side,
            kind: ConditionalKind::StopMarket,
            trigger_price: stop_text,
            quantity: quantity.text.clone(),
            client_order_id: client_order_id(STOP_LOSS_PREFIX),
        };
        let stop_ack = match self.exchange.submit_conditional_order(&stop_spec).await {
            Ok(ack) => ack,
            Err(cause) => {
                warn!(symbol = %intent.symbol, error = %cause, "Bracket stop-loss failed, entry left in place");
                return Err(ExecError::BracketIncomplete {
                    entry,
                    stop_loss: None,
                    failed_leg: BracketLeg::StopLoss,
                    cause: Box::new(cause),
                });
            }
        };

        let target_spec = ConditionalOrderSpec {
            kind: ConditionalKind::TakeProfitMarket,
            trigger_price: target_text,
            client_order_id: client_order_id(TAKE_PROFIT_PREFIX),
            ..stop_spec
        };
        let target_ack = match self.exchange.submit_conditional_order(&target_spec).await {
            Ok(ack) => ack,
            Err(cause) => {
                warn!(
                    symbol = %intent.symbol,
                    error = %cause,
                    "Bracket take-profit failed, entry and stop-loss left in place"
                );
                return Err(ExecError::BracketIncomplete {
                    entry,
                    stop_loss: Some(stop_ack),
                    failed_leg: BracketLeg::TakeProfit,
                    cause: Box::new(cause),
                });
            }
        };

        info!(
            symbol = %intent.symbol,
            entry = %entry.client_order_id,
            stop_loss = stop_ack.order_id,
            take_profit = target_ack.order_id,
            "Bracket strategy placed"
        );

        Ok(StrategyResult {
            entry_order_id: entry.client_order_id,
            stop_loss_order_id: stop_ack.order_id,
            take_profit_order_id: target_ack.order_id,
            quantity: quantity.text,
            entry_price,
            stop_loss,
            take_profit,
            position_side: intent.position_side,
        })
    }

    /// Move a resting limit order to a new price and notional.
    ///
    /// The side is taken from the live order. The exchange identifies the
    /// hedge leg by order id, so the position side is not resent.
    pub async fn modify_limit_order(
        &self,
        order: &OrderRef,
        new_price: Price,
        new_notional: Decimal,
    ) -> ExecResult<OrderAck> {
        let channel = self.channel.current().await?;

        let report = channel.query_status(order).await?;
        if !report.status.is_open() {
            return Err(ExecError::OrderNotModifiable {
                order: order.id.to_string(),
                status: report.status,
            });
        }

        let rule = self.rules.get_rules(&order.symbol).await?;
        let quantity = resolve_quantity(new_notional, new_price.as_decimal(), &rule)?;
        let price = resolve_price(new_price, &rule)?;

        // Prefer the exchange id once known; client ids can be reused after fills
        let target = OrderRef {
            symbol: order.symbol.clone(),
            id: OrderId::Exchange(report.order_id),
        };
        let spec = ModifySpec {
            order: target,
            side: report.side,
            quantity: quantity.text,
            price: price.text,
        };

        let ack = channel.modify(&spec).await?;
        info!(
            symbol = %order.symbol,
            order_id = report.order_id,
            price = %spec.price,
            quantity = %spec.quantity,
            "Limit order modified"
        );
        Ok(ack)
    }

    /// Flatten the held position for `symbol` on `side` with a market order.
    ///
    /// Positions are reloaded first; reload failures are returned. Returns
    /// `Ok(None)` without submitting anything when no such position is open.
    pub async fn close_position(&self, symbol: &Symbol, side: PositionSide) -> ExecResult<Option<OrderAck>> {
        self.positions.reload().await?;

        let Some(position) = self.positions.find(symbol, side).await else {
            info!(%symbol, %side, "No open position to close");
            return Ok(None);
        };

        let channel = self.channel.current().await?;
        let spec = OrderSpec {
            symbol: symbol.clone(),
            side: position.closing_side(),
            position_side: position.side,
            quantity: exact_text(position.abs_amount()),
            kind: OrderKind::Market,
            reduce_only: position.side == PositionSide::Net,
            client_order_id: client_order_id(CLOSE_PREFIX),
        };

        let ack = channel.submit(&spec).await?;
        info!(
            %symbol,
            %side,
            quantity = %spec.quantity,
            order_id = ack.order_id,
            "Position close submitted"
        );
        Ok(Some(ack))
    }

    /// Set the leverage multiplier for a symbol.
    pub async fn set_leverage(&self, symbol: &Symbol, leverage: Leverage) -> ExecResult<()> {
        self.exchange.set_leverage(symbol, leverage).await?;
        info!(%symbol, %leverage, "Leverage set");
        Ok(())
    }

    /// Enable or disable hedge mode (dual position sides).
    pub async fn set_hedge_mode(&self, enabled: bool) -> ExecResult<()> {
        self.exchange.set_dual_position_mode(enabled).await?;
        info!(enabled, "Hedge mode updated");
        Ok(())
    }
}

/// Stop must sit on the losing side of the entry, target on the winning side.
fn validate_bracket(side: OrderSide, entry: Price, stop_loss: Price, take_profit: Price) -> ExecResult<()> {
    let valid = match side {
        OrderSide::Buy => stop_loss < entry && entry < take_profit,
        OrderSide::Sell => take_profit < entry && entry < stop_loss,
    };
    if valid {
        Ok(())
    } else {
        Err(ExecError::InvalidParameter(format!(
            "{} bracket requires stop-loss and take-profit on opposite sides of entry \
             (entry {}, stop-loss {}, take-profit {})",
            side, entry, stop_loss, take_profit
        )))
    }
}

fn client_order_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::now_v7().simple())
}

// =============================================================================
// Tests
// =============================================================================
