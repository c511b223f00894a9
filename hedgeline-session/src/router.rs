//! Combined stream message routing.
//!
//! Every frame on the combined stream is an envelope `{"stream": ..., "data": ...}`.
//! Candle frames come from `<symbol>@kline_<interval>`; anything else is the
//! user-data feed addressed by the listen key.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use hedgeline_domain::{timestamp_from_millis, Candle, Symbol};

use crate::error::{SessionError, SessionResult};

/// User events that change account positions
const POSITION_EVENTS: [&str; 2] = ["ACCOUNT_UPDATE", "ORDER_TRADE_UPDATE"];

/// User event sent when the listen key is no longer valid
const SESSION_EXPIRED_EVENT: &str = "listenKeyExpired";

/// What a stream frame means for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A candle closed
    CandleClosed(Candle),
    /// Account positions changed; the view must be refreshed
    PositionsChanged {
        /// User event type that triggered the refresh
        event_type: String,
    },
    /// The session token expired; the connection must be rebuilt
    SessionExpired,
    /// Nothing to do (open candle, unrelated user event)
    Ignored,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    stream: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    /// Open time
    #[serde(rename = "t")]
    open_time: i64,
    /// Close time
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    /// Base-asset volume
    #[serde(rename = "v")]
    volume: Decimal,
    /// Quote-asset volume
    #[serde(rename = "q")]
    quote_volume: Decimal,
    /// Whether this kline is closed
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Route one raw frame from the combined stream.
pub fn route(text: &str) -> SessionResult<StreamEvent> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| SessionError::MalformedMessage(e.to_string()))?;

    if envelope.stream.contains("@kline_") {
        return route_kline(envelope.data);
    }

    let event_type = envelope
        .data
        .get("e")
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::MalformedMessage(format!("user event without type on {}", envelope.stream)))?;

    if POSITION_EVENTS.contains(&event_type) {
        Ok(StreamEvent::PositionsChanged { event_type: event_type.to_string() })
    } else if event_type == SESSION_EXPIRED_EVENT {
        Ok(StreamEvent::SessionExpired)
    } else {
        Ok(StreamEvent::Ignored)
    }
}

fn route_kline(data: Value) -> SessionResult<StreamEvent> {
    let event: KlineEvent =
        serde_json::from_value(data).map_err(|e| SessionError::MalformedMessage(format!("kline: {}", e)))?;

    if !event.kline.is_closed {
        return Ok(StreamEvent::Ignored);
    }

    let k = event.kline;
    Ok(StreamEvent::CandleClosed(Candle {
        symbol: Symbol::from_pair(&event.symbol)?,
        open_time: timestamp_from_millis(k.open_time),
        close_time: timestamp_from_millis(k.close_time),
        open: k.open,
        high: k.high,
        low: k.low,
        close: k.close,
        volume: k.volume,
        quote_volume: k.quote_volume,
    }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kline_frame(closed: bool) -> String {
        format!(
            r#"{{"stream":"btcusdt@kline_1m","data":{{"e":"kline","E":1700000060001,"s":"BTCUSDT","k":{{
                "t":1700000000000,"T":1700000059999,"s":"BTCUSDT","i":"1m","f":100,"L":200,
                "o":"60000.0","c":"60100.5","h":"60150.0","l":"59990.1","v":"12.345","n":101,
                "x":{},"q":"741234.56","V":"6.1","Q":"366000.0","B":"0"}}}}}}"#,
            closed
        )
    }

    #[test]
    fn test_closed_kline_becomes_candle() {
        let event = route(&kline_frame(true)).unwrap();

        match event {
            StreamEvent::CandleClosed(candle) => {
                assert_eq!(candle.symbol.as_pair(), "BTCUSDT");
                assert_eq!(candle.close, dec!(60100.5));
                assert_eq!(candle.volume, dec!(12.345));
                assert_eq!(candle.close_time.timestamp_millis(), 1_700_000_059_999);
            },
            other => panic!("Expected CandleClosed, got {:?}", other),
        }
    }

    #[test]
    fn test_open_kline_is_ignored() {
        assert_eq!(route(&kline_frame(false)).unwrap(), StreamEvent::Ignored);
    }

    #[test]
    fn test_position_events_trigger_refresh() {
        let account = r#"{"stream":"pqia91ma19a5s61cv6a81va65sdf19v8a65a1","data":{"e":"ACCOUNT_UPDATE","E":1,"T":1,"a":{}}}"#;
        let fill = r#"{"stream":"pqia91ma19a5s61cv6a81va65sdf19v8a65a1","data":{"e":"ORDER_TRADE_UPDATE","E":1,"T":1,"o":{}}}"#;

        assert_eq!(
            route(account).unwrap(),
            StreamEvent::PositionsChanged { event_type: "ACCOUNT_UPDATE".to_string() }
        );
        assert!(matches!(route(fill).unwrap(), StreamEvent::PositionsChanged { .. }));
    }

    #[test]
    fn test_listen_key_expired() {
        let frame = r#"{"stream":"pqia91ma19","data":{"e":"listenKeyExpired","E":1576653824250,"listenKey":"pqia91ma19"}}"#;

        assert_eq!(route(frame).unwrap(), StreamEvent::SessionExpired);
    }

    #[test]
    fn test_other_user_events_ignored() {
        let frame = r#"{"stream":"pqia91ma19","data":{"e":"MARGIN_CALL","E":1}}"#;

        assert_eq!(route(frame).unwrap(), StreamEvent::Ignored);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(route("not json"), Err(SessionError::MalformedMessage(_))));
        assert!(matches!(route(r#"{"result":null,"id":1}"#), Err(SessionError::MalformedMessage(_))));
        assert!(matches!(
            route(r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","s":"BTCUSDT"}}"#),
            Err(SessionError::MalformedMessage(_))
        ));
        assert!(matches!(route(r#"{"stream":"pqia91ma19","data":{}}"#), Err(SessionError::MalformedMessage(_))));
    }
}
