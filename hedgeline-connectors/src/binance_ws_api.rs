//! Binance WebSocket API Order Channel
//!
//! Places, modifies and queries orders over the futures WebSocket API
//! (`order.place`, `order.modify`, `order.status`). Every request is signed
//! like a REST call and carries a unique id; a reader task matches responses
//! to the waiting caller by that id.
//!
//! # Protocol
//!
//! ```text
//! → {"id": "...", "method": "order.place", "params": {..., "apiKey", "timestamp", "signature"}}
//! ← {"id": "...", "status": 200, "result": {...}}
//! ← {"id": "...", "status": 400, "error": {"code": -2019, "msg": "Margin is insufficient."}}
//! ```

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WebSocketMessage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use hedgeline_domain::{
    ApiCredentials, OrderAck, OrderId, OrderRef, OrderSide, OrderStatus, PositionSide, Symbol,
};
use hedgeline_exec::{ExecResult, ModifySpec, OrderChannel, OrderKind, OrderSpec, OrderStatusReport};

use crate::adapter::ws_error_to_exec;
use crate::binance_ws::{BinanceWsError, WsStream};
use crate::signing::{canonical_query, sign, timestamp_millis};

/// Per-request response timeout in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

type PendingMap = HashMap<String, oneshot::Sender<WsApiResponse>>;

/// Order channel over the Binance futures WebSocket API.
pub struct BinanceOrderSocket {
    /// Write half of the socket, `None` once closed
    sink: Mutex<Option<SplitSink<WsStream, WebSocketMessage>>>,
    /// Requests waiting for a response, keyed by request id
    pending: Arc<Mutex<PendingMap>>,
    /// Response reader task
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Set once the socket is unusable (reader stopped or `close()` called)
    closed: Arc<watch::Sender<bool>>,
    credentials: ApiCredentials,
    request_timeout: Duration,
}

impl BinanceOrderSocket {
    /// Connect to the WebSocket API and start the response reader.
    pub async fn connect(url: &str, credentials: ApiCredentials) -> Result<Self, BinanceWsError> {
        info!(%url, "Connecting to Binance WebSocket API");

        let (ws_stream, _) =
            connect_async(url).await.map_err(|e| BinanceWsError::ConnectionFailed(e.to_string()))?;
        let (sink, mut stream) = ws_stream.split();

        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        let reader_closed = closed.clone();

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(WebSocketMessage::Text(text)) => match serde_json::from_str::<WsApiResponse>(&text) {
                        Ok(response) => {
                            let waiter = match &response.id {
                                Some(id) => reader_pending.lock().await.remove(id),
                                None => None,
                            };
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(response);
                                },
                                None => debug!(id = ?response.id, "Response without a waiting request"),
                            }
                        },
                        Err(e) => warn!(error = %e, "Unparseable WebSocket API message"),
                    },
                    Ok(WebSocketMessage::Close(frame)) => {
                        warn!(?frame, "WebSocket API connection closed by server");
                        break;
                    },
                    Ok(_) => {},
                    Err(e) => {
                        warn!(error = %e, "WebSocket API read error");
                        break;
                    },
                }
            }
            reader_closed.send_replace(true);
            // Dropping the senders fails every in-flight request
            reader_pending.lock().await.clear();
            debug!("WebSocket API reader stopped");
        });

        info!("Connected to Binance WebSocket API");

        Ok(Self {
            sink: Mutex::new(Some(sink)),
            pending,
            reader: Mutex::new(Some(reader)),
            closed,
            credentials,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        })
    }

    /// Sign `params` and wrap them in a request envelope.
    fn build_request(&self, id: &str, method: &str, mut params: Vec<(&str, String)>) -> Result<String, BinanceWsError> {
        params.push(("apiKey", self.credentials.api_key.clone()));
        params.push(("timestamp", timestamp_millis().to_string()));

        let payload = canonical_query(&mut params);
        let signature = sign(self.credentials.secret_bytes(), &payload).map_err(BinanceWsError::SignatureError)?;

        let mut object = Map::new();
        for (key, value) in params {
            object.insert(key.to_string(), Value::String(value));
        }
        object.insert("signature".to_string(), Value::String(signature));

        Ok(json!({ "id": id, "method": method, "params": object }).to_string())
    }

    /// Send a signed request and wait for its response.
    async fn request(&self, method: &str, params: Vec<(&str, String)>) -> Result<Value, BinanceWsError> {
        if *self.closed.borrow() {
            return Err(BinanceWsError::ChannelClosed);
        }

        let id = Uuid::now_v7().to_string();
        let frame = self.build_request(&id, method, params)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let sent = {
            let mut sink = self.sink.lock().await;
            match sink.as_mut() {
                Some(sink) => sink.send(WebSocketMessage::Text(frame)).await.map_err(|e| BinanceWsError::SendFailed(e.to_string())),
                None => Err(BinanceWsError::ChannelClosed),
            }
        };
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        debug!(%id, method, "WebSocket API request sent");

        let response = match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(BinanceWsError::ChannelClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(BinanceWsError::Timeout);
            },
        };

        response.into_result()
    }
}

#[async_trait]
impl OrderChannel for BinanceOrderSocket {
    async fn submit(&self, spec: &OrderSpec) -> ExecResult<OrderAck> {
        let result = self.request("order.place", order_place_params(spec)).await.map_err(ws_error_to_exec)?;
        let order = WsOrderResult::from_value(result).map_err(ws_error_to_exec)?;
        order.ack().map_err(ws_error_to_exec)
    }

    async fn modify(&self, spec: &ModifySpec) -> ExecResult<OrderAck> {
        let result = self.request("order.modify", order_modify_params(spec)).await.map_err(ws_error_to_exec)?;
        let order = WsOrderResult::from_value(result).map_err(ws_error_to_exec)?;
        order.ack().map_err(ws_error_to_exec)
    }

    async fn query_status(&self, order: &OrderRef) -> ExecResult<OrderStatusReport> {
        let result = self.request("order.status", order_ref_params(order)).await.map_err(ws_error_to_exec)?;
        let order = WsOrderResult::from_value(result).map_err(ws_error_to_exec)?;
        order.report().map_err(ws_error_to_exec)
    }

    async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Error closing WebSocket API sink");
            }
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        self.closed.send_replace(true);
        self.pending.lock().await.clear();
        info!("WebSocket API order channel closed");
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

fn order_place_params(spec: &OrderSpec) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", spec.symbol.as_pair().to_string()),
        ("side", spec.side.as_str().to_string()),
        ("positionSide", spec.position_side.as_wire().to_string()),
        ("quantity", spec.quantity.clone()),
        ("newClientOrderId", spec.client_order_id.clone()),
    ];
    match &spec.kind {
        OrderKind::Market => params.push(("type", "MARKET".to_string())),
        OrderKind::Limit { price } => {
            params.push(("type", "LIMIT".to_string()));
            params.push(("timeInForce", "GTC".to_string()));
            params.push(("price", price.clone()));
        },
    }
    // Hedge-mode orders may not carry reduceOnly
    if spec.reduce_only && spec.position_side == PositionSide::Net {
        params.push(("reduceOnly", "true".to_string()));
    }
    params
}

// order.modify accepts no positionSide; the order id already pins the hedge leg
fn order_modify_params(spec: &ModifySpec) -> Vec<(&'static str, String)> {
    let mut params = order_ref_params(&spec.order);
    params.push(("side", spec.side.as_str().to_string()));
    params.push(("quantity", spec.quantity.clone()));
    params.push(("price", spec.price.clone()));
    params
}

fn order_ref_params(order: &OrderRef) -> Vec<(&'static str, String)> {
    let id = match &order.id {
        OrderId::Exchange(id) => ("orderId", id.to_string()),
        OrderId::Client(id) => ("origClientOrderId", id.clone()),
    };
    vec![("symbol", order.symbol.as_pair().to_string()), id]
}

// =============================================================================
// Binance Types (from WebSocket API responses)
// =============================================================================

/// WebSocket API response envelope.
#[derive(Debug, Deserialize)]
struct WsApiResponse {
    id: Option<String>,
    status: u16,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WsApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct WsApiErrorBody {
    code: i64,
    msg: String,
}

impl WsApiResponse {
    fn into_result(self) -> Result<Value, BinanceWsError> {
        if let Some(error) = self.error {
            return Err(BinanceWsError::ApiError { code: error.code, msg: error.msg });
        }
        if self.status != 200 {
            return Err(BinanceWsError::InvalidMessage(format!("status {} without error body", self.status)));
        }
        self.result.ok_or_else(|| BinanceWsError::InvalidMessage("response without result".to_string()))
    }
}

/// Order object returned by order.place / order.modify / order.status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsOrderResult {
    order_id: u64,
    symbol: String,
    status: String,
    client_order_id: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    position_side: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    orig_qty: String,
    #[serde(default)]
    executed_qty: String,
}

impl WsOrderResult {
    fn from_value(value: Value) -> Result<Self, BinanceWsError> {
        serde_json::from_value(value).map_err(|e| BinanceWsError::InvalidMessage(format!("order result: {}", e)))
    }

    fn ack(&self) -> Result<OrderAck, BinanceWsError> {
        Ok(OrderAck {
            symbol: parse_field(Symbol::from_pair(&self.symbol))?,
            order_id: self.order_id,
            client_order_id: self.client_order_id.clone(),
            status: parse_field(OrderStatus::from_str(&self.status))?,
        })
    }

    fn report(&self) -> Result<OrderStatusReport, BinanceWsError> {
        Ok(OrderStatusReport {
            symbol: parse_field(Symbol::from_pair(&self.symbol))?,
            order_id: self.order_id,
            client_order_id: self.client_order_id.clone(),
            side: parse_field(OrderSide::from_str(&self.side))?,
            position_side: parse_field(PositionSide::from_str(&self.position_side))?,
            status: parse_field(OrderStatus::from_str(&self.status))?,
            price: parse_decimal(&self.price)?,
            orig_quantity: parse_decimal(&self.orig_qty)?,
            executed_quantity: parse_decimal(&self.executed_qty)?,
        })
    }
}

fn parse_field<T, E: std::fmt::Display>(result: Result<T, E>) -> Result<T, BinanceWsError> {
    result.map_err(|e| BinanceWsError::InvalidMessage(e.to_string()))
}

fn parse_decimal(value: &str) -> Result<Decimal, BinanceWsError> {
    if value.is_empty() {
        return Ok(Decimal::ZERO);
    }
    parse_field(Decimal::from_str(value))
}

// =============================================================================
// Tests
// =============================================================================
