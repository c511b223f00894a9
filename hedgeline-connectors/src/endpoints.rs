//! Binance USDⓈ-M futures endpoints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Production REST base
pub const MAINNET_REST: &str = "https://fapi.binance.com";
/// Production market/user stream base
pub const MAINNET_STREAMS: &str = "wss://fstream.binance.com";
/// Production WebSocket API (orders)
pub const MAINNET_WS_API: &str = "wss://ws-fapi.binance.com/ws-fapi/v1";

/// Testnet REST base
pub const TESTNET_REST: &str = "https://testnet.binancefuture.com";
/// Testnet market/user stream base
pub const TESTNET_STREAMS: &str = "wss://fstream.binancefuture.com";
/// Testnet WebSocket API (orders)
pub const TESTNET_WS_API: &str = "wss://testnet.binancefuture.com/ws-fapi/v1";

/// Which Binance environment to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinanceNetwork {
    /// Real money
    Mainnet,
    /// Futures testnet
    #[default]
    Testnet,
}

impl fmt::Display for BinanceNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinanceNetwork::Mainnet => write!(f, "mainnet"),
            BinanceNetwork::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for BinanceNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "production" | "prod" => Ok(BinanceNetwork::Mainnet),
            "testnet" | "test" => Ok(BinanceNetwork::Testnet),
            other => Err(format!("unknown network '{}', expected mainnet or testnet", other)),
        }
    }
}

/// Base URLs used by the connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinanceEndpoints {
    /// Signed REST calls (account, orders, listen key)
    pub rest: String,
    /// Symbol metadata (exchangeInfo)
    pub metadata_rest: String,
    /// Combined market/user streams
    pub streams: String,
    /// WebSocket API used as the order channel
    pub ws_api: String,
}

impl BinanceEndpoints {
    /// Endpoints for `network`.
    ///
    /// Metadata always comes from production: testnet exchangeInfo lists an
    /// incomplete symbol set with filters that drift from the real ones.
    pub fn for_network(network: BinanceNetwork) -> Self {
        match network {
            BinanceNetwork::Mainnet => Self {
                rest: MAINNET_REST.to_string(),
                metadata_rest: MAINNET_REST.to_string(),
                streams: MAINNET_STREAMS.to_string(),
                ws_api: MAINNET_WS_API.to_string(),
            },
            BinanceNetwork::Testnet => Self {
                rest: TESTNET_REST.to_string(),
                metadata_rest: MAINNET_REST.to_string(),
                streams: TESTNET_STREAMS.to_string(),
                ws_api: TESTNET_WS_API.to_string(),
            },
        }
    }

    /// Override where symbol metadata is read from.
    pub fn with_metadata_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_rest = url.into();
        self
    }

    /// Combined stream URL for a candle feed plus a user-data feed.
    ///
    /// `wss://fstream.binance.com/stream?streams=btcusdt@kline_1m/<listenKey>`
    pub fn combined_stream_url(&self, kline_stream: &str, listen_key: &str) -> String {
        format!("{}/stream?streams={}/{}", self.streams.trim_end_matches('/'), kline_stream, listen_key)
    }
}
