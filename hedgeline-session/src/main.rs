//! Hedgeline session runner
//!
//! Connects one trading session and logs its events until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Testnet, BTCUSDT 1m candles
//! BINANCE_API_KEY=... BINANCE_API_SECRET=... cargo run -p hedgeline-session
//!
//! # JSON logs, another symbol
//! HEDGELINE_LOG_FORMAT=json HEDGELINE_SYMBOL=ETHUSDT cargo run -p hedgeline-session
//! ```
//!
//! # Environment Variables
//!
//! - `BINANCE_API_KEY`, `BINANCE_API_SECRET`: Credentials (required)
//! - `HEDGELINE_NETWORK`: testnet or mainnet (default: testnet)
//! - `HEDGELINE_SYMBOL`: Streamed symbol (default: BTCUSDT)
//! - `HEDGELINE_INTERVAL`: Candle interval (default: 1m)
//! - `HEDGELINE_MAX_RETRIES`: Connection attempts (default: 10)
//! - `HEDGELINE_RETRY_BASE_MS` / `HEDGELINE_RETRY_MAX_MS`: Backoff bounds (default: 1000 / 60000)
//! - `HEDGELINE_BACKOFF`: exponential or linear (default: exponential)
//! - `HEDGELINE_KEEPALIVE_SECS`: Listen key keepalive (default: 1500)
//! - `HEDGELINE_METADATA_URL`: Symbol metadata REST base (default: production)
//! - `HEDGELINE_LOG_FORMAT`: `json` for JSON logs

use hedgeline_session::{Config, SessionEvent, TradingSession};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive("hedgeline=info".parse()?);
    let json = std::env::var("HEDGELINE_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry().with(fmt::layer().json()).with(filter).init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        network = %config.network,
        symbol = %config.market.symbol,
        interval = %config.market.interval,
        max_retries = config.retry.max_attempts,
        "Hedgeline session"
    );

    let session = TradingSession::from_config(&config);
    let mut events = session.subscribe();

    session.connect(config.market.symbol.clone(), config.market.interval.clone()).await;

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                match event {
                    Ok(SessionEvent::CandleClosed(candle)) => {
                        info!(symbol = %candle.symbol, close = %candle.close, volume = %candle.volume, "Candle closed");
                    }
                    Ok(SessionEvent::PositionsRefreshed { trigger, open_positions }) => {
                        info!(%trigger, open_positions, "Positions refreshed");
                    }
                    Ok(SessionEvent::RetriesExhausted { attempts, error }) => {
                        warn!(attempts, %error, "Giving up on the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(lag_msg) => {
                        warn!(%lag_msg, "Event receiver lagged");
                    }
                }
            }

            // Handle shutdown signals
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    session.destroy().await;
    info!("Session closed");

    Ok(())
}
