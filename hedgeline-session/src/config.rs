//! Session configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use hedgeline_connectors::BinanceNetwork;
use hedgeline_domain::{ApiCredentials, Symbol};

use crate::error::{SessionError, SessionResult};
use crate::retry::{Backoff, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
use crate::supervisor::DEFAULT_KEEPALIVE_INTERVAL;

// =============================================================================
// Configuration
// =============================================================================

/// Session configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Exchange API credentials
    pub credentials: ApiCredentials,

    /// Binance environment
    pub network: BinanceNetwork,

    /// Market stream configuration
    pub market: MarketConfig,

    /// Reconnect policy
    pub retry: RetryPolicy,

    /// Session token keepalive period
    pub keepalive_interval: Duration,

    /// Override for the symbol metadata REST base
    pub metadata_url: Option<String>,
}

/// Market stream configuration.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Symbol whose candles are streamed
    pub symbol: Symbol,
    /// Candle interval (e.g., "1m")
    pub interval: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> SessionResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let credentials = Self::load_credentials()?;
        let network = Self::load_network()?;
        let market = Self::load_market_config()?;
        let retry = Self::load_retry_policy()?;
        let keepalive_interval = Self::load_keepalive_interval()?;
        let metadata_url = env::var("HEDGELINE_METADATA_URL").ok().filter(|url| !url.trim().is_empty());

        Ok(Self {
            credentials,
            network,
            market,
            retry,
            keepalive_interval,
            metadata_url,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            credentials: ApiCredentials::new("test_api_key", "test_api_secret"),
            network: BinanceNetwork::Testnet,
            market: MarketConfig::default(),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                backoff: Backoff::Exponential,
            },
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            metadata_url: None,
        }
    }

    fn load_credentials() -> SessionResult<ApiCredentials> {
        let api_key = Self::load_required_env("BINANCE_API_KEY")?;
        let api_secret = Self::load_required_env("BINANCE_API_SECRET")?;

        Ok(ApiCredentials::new(api_key, api_secret))
    }

    fn load_network() -> SessionResult<BinanceNetwork> {
        let network_str = env::var("HEDGELINE_NETWORK").unwrap_or_else(|_| "testnet".to_string());

        network_str.parse::<BinanceNetwork>().map_err(|_| {
            SessionError::Config(format!(
                "Invalid HEDGELINE_NETWORK: {}. Expected: testnet, mainnet",
                network_str
            ))
        })
    }

    fn load_market_config() -> SessionResult<MarketConfig> {
        let symbol_str = env::var("HEDGELINE_SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string());
        let symbol = Symbol::from_pair(&symbol_str)
            .map_err(|e| SessionError::Config(format!("Invalid HEDGELINE_SYMBOL: {}", e)))?;
        let interval = env::var("HEDGELINE_INTERVAL").unwrap_or_else(|_| "1m".to_string());

        Ok(MarketConfig { symbol, interval })
    }

    fn load_retry_policy() -> SessionResult<RetryPolicy> {
        let max_attempts = Self::load_parsed_env("HEDGELINE_MAX_RETRIES", DEFAULT_MAX_ATTEMPTS)?;
        let base_ms = Self::load_parsed_env("HEDGELINE_RETRY_BASE_MS", DEFAULT_BASE_DELAY.as_millis() as u64)?;
        let max_ms = Self::load_parsed_env("HEDGELINE_RETRY_MAX_MS", DEFAULT_MAX_DELAY.as_millis() as u64)?;
        let backoff = match env::var("HEDGELINE_BACKOFF") {
            Ok(val) => Backoff::from_str(&val).map_err(|e| SessionError::Config(format!("Invalid HEDGELINE_BACKOFF: {}", e)))?,
            Err(_) => Backoff::default(),
        };

        if max_attempts == 0 {
            return Err(SessionError::Config("HEDGELINE_MAX_RETRIES must be at least 1".to_string()));
        }

        Ok(RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff,
        })
    }

    fn load_keepalive_interval() -> SessionResult<Duration> {
        let secs = Self::load_parsed_env("HEDGELINE_KEEPALIVE_SECS", DEFAULT_KEEPALIVE_INTERVAL.as_secs())?;
        keepalive_from_secs(secs)
    }

    fn load_required_env(key: &str) -> SessionResult<String> {
        env::var(key)
            .ok()
            .filter(|val| !val.trim().is_empty())
            .ok_or_else(|| SessionError::Config(format!("{} is required", key)))
    }

    fn load_parsed_env<T: FromStr>(key: &str, default: T) -> SessionResult<T> {
        match env::var(key) {
            Ok(val) => val
                .trim()
                .parse::<T>()
                .map_err(|_| SessionError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

fn keepalive_from_secs(secs: u64) -> SessionResult<Duration> {
    if secs == 0 {
        return Err(SessionError::Config("HEDGELINE_KEEPALIVE_SECS must be at least 1".to_string()));
    }
    Ok(Duration::from_secs(secs))
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbol: Symbol::default(),
            interval: "1m".to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
