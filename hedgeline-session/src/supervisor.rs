//! Connection Supervisor
//!
//! Owns the lifecycle of the exchange connection: the session token, the
//! combined market + user stream, the order channel and the token keepalive.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──established──► Connected
//!      ▲                          │  ▲                        │
//!      │      retries exhausted   │  │    stream ended /      │
//!      └──────────────────────────┘  └──── session expired ───┘
//!      ▲
//!      └──────────── destroy() (from any state)
//! ```
//!
//! # Establishing
//!
//! 1. Obtain a session token
//! 2. Open the combined stream (candle feed + user feed)
//! 3. Open the order channel and publish it to the coordinator
//! 4. Start the keepalive loop
//! 5. Refresh the position view
//!
//! A failing step releases whatever the attempt had already opened. Failed
//! attempts are retried per [`RetryPolicy`]; once the budget is spent the
//! supervisor settles in `Disconnected`.
//!
//! # Self-healing
//!
//! The connection is rebuilt when the stream ends, the session token expires
//! or the order channel drops. A connection that ends before delivering a
//! single frame counts as a failed attempt: it is retried with the policy's
//! delay and shares its attempt budget. Any frame resets that count.
//!
//! # Cancellation
//!
//! Every wait (retry sleeps, keepalive ticks and calls, stream reads,
//! stream-triggered refreshes) selects on one `CancellationToken`.
//! `destroy()` cancels it, waits for the session task to release its
//! resources and forces `Disconnected`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hedgeline_domain::{Candle, ConnectionState, Symbol};
use hedgeline_exec::{
    ExchangeService, ExecError, ExecResult, OrderChannel, OrderChannelSlot, PositionView, SessionToken,
    StreamChannel,
};

use crate::event_bus::{EventBus, SessionEvent};
use crate::retry::RetryPolicy;
use crate::router::{route, StreamEvent};

/// Default keepalive period for the session token (25 minutes)
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25 * 60);

// =============================================================================
// Shared State
// =============================================================================

/// Everything the session task needs, shared with the supervisor handle.
struct SupervisorCore {
    exchange: Arc<dyn ExchangeService>,
    positions: Arc<PositionView>,
    order_slot: Arc<OrderChannelSlot>,
    events: EventBus,
    policy: RetryPolicy,
    keepalive_interval: Duration,
    state: watch::Sender<ConnectionState>,
    latest_candle: watch::Sender<Option<Candle>>,
}

impl SupervisorCore {
    /// Move to `next`, publishing the transition if the state changed.
    fn transition(&self, next: ConnectionState) {
        let mut previous = next;
        let changed = self.state.send_if_modified(|state| {
            previous = *state;
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });

        if changed {
            info!(from = %previous, to = %next, "Connection state changed");
            self.events.send(SessionEvent::StateChanged { previous, current: next, timestamp: Utc::now() });
        }
    }
}

/// Resources of one established connection.
struct LiveConnection {
    token: SessionToken,
    stream: Box<dyn StreamChannel>,
    order_channel: Arc<dyn OrderChannel>,
    keepalive_cancel: CancellationToken,
    keepalive: JoinHandle<()>,
}

/// Why the stream loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// `destroy()` was called
    Cancelled,
    /// Socket closed or read timeout
    Closed,
    /// Listen key expired
    SessionExpired,
    /// Order channel dropped
    OrderChannelClosed,
}

impl StreamEnd {
    fn reason(self) -> &'static str {
        match self {
            StreamEnd::Cancelled => "cancelled",
            StreamEnd::Closed => "stream ended",
            StreamEnd::SessionExpired => "session token expired",
            StreamEnd::OrderChannelClosed => "order channel closed",
        }
    }
}

/// How a watched connection ended.
struct Watched {
    end: StreamEnd,
    /// Frames received before the end
    frames: u64,
}

/// Handle of a running session task.
struct SessionRun {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

// =============================================================================
// Connection Supervisor
// =============================================================================

/// Keeps the exchange connection alive and self-healing.
pub struct ConnectionSupervisor {
    core: Arc<SupervisorCore>,
    /// Current session task; locked across start/stop so they never interleave
    run: Mutex<Option<SessionRun>>,
}

impl ConnectionSupervisor {
    /// Create a supervisor in the `Disconnected` state.
    ///
    /// A zero `keepalive_interval` falls back to [`DEFAULT_KEEPALIVE_INTERVAL`].
    pub fn new(
        exchange: Arc<dyn ExchangeService>,
        positions: Arc<PositionView>,
        order_slot: Arc<OrderChannelSlot>,
        events: EventBus,
        policy: RetryPolicy,
        keepalive_interval: Duration,
    ) -> Self {
        let keepalive_interval = if keepalive_interval.is_zero() {
            warn!(default_secs = DEFAULT_KEEPALIVE_INTERVAL.as_secs(), "Zero keepalive interval, using default");
            DEFAULT_KEEPALIVE_INTERVAL
        } else {
            keepalive_interval
        };

        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (latest_candle, _) = watch::channel(None);

        Self {
            core: Arc::new(SupervisorCore {
                exchange,
                positions,
                order_slot,
                events,
                policy,
                keepalive_interval,
                state,
                latest_candle,
            }),
            run: Mutex::new(None),
        }
    }

    /// Start connecting to `symbol`'s `interval` candle feed.
    ///
    /// No-op (returns `false`) when already `Connecting` or `Connected`.
    pub async fn connect(&self, symbol: Symbol, interval: impl Into<String>) -> bool {
        let mut run = self.run.lock().await;

        let started = self.core.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(state = %self.state(), "Connect ignored, session already active");
            return false;
        }

        info!(%symbol, from = %ConnectionState::Disconnected, to = %ConnectionState::Connecting, "Connection state changed");
        self.core.events.send(SessionEvent::StateChanged {
            previous: ConnectionState::Disconnected,
            current: ConnectionState::Connecting,
            timestamp: Utc::now(),
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_session(self.core.clone(), symbol, interval.into(), cancel.clone()));

        // A previous run can only be a task that already gave up
        *run = Some(SessionRun { cancel, task });
        true
    }

    /// Stop everything and force `Disconnected`.
    ///
    /// Safe to call repeatedly and from any state; `connect()` works again
    /// afterwards.
    pub async fn destroy(&self) {
        let mut run = self.run.lock().await;

        if let Some(SessionRun { cancel, task }) = run.take() {
            cancel.cancel();
            if let Err(e) = task.await {
                error!(error = %e, "Session task failed");
            }
        }

        // The task may have been cancelled between publishing and returning
        if let Some(channel) = self.core.order_slot.clear().await {
            channel.close().await;
        }

        self.core.transition(ConnectionState::Disconnected);
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.core.state.borrow()
    }

    /// Observe connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.state.subscribe()
    }

    /// Latest closed candle, if any arrived yet
    pub fn latest_candle(&self) -> Option<Candle> {
        self.core.latest_candle.borrow().clone()
    }

    /// Observe closed candles.
    pub fn subscribe_candles(&self) -> watch::Receiver<Option<Candle>> {
        self.core.latest_candle.subscribe()
    }
}

// =============================================================================
// Session Task
// =============================================================================

/// Establish, watch, and re-establish until cancelled or out of retries.
async fn run_session(core: Arc<SupervisorCore>, symbol: Symbol, interval: String, cancel: CancellationToken) {
    // Consecutive connections that ended before their first frame
    let mut silent_drops: u32 = 0;

    loop {
        let Some(mut connection) = establish_with_retry(&core, &symbol, &interval, &cancel).await else {
            return;
        };

        core.transition(ConnectionState::Connected);

        let watched =
            watch_stream(&core, connection.stream.as_mut(), connection.order_channel.as_ref(), &cancel).await;
        teardown(&core, connection).await;

        if watched.end == StreamEnd::Cancelled || cancel.is_cancelled() {
            return;
        }
        let reason = watched.end.reason();
        core.transition(ConnectionState::Connecting);

        if watched.frames > 0 {
            warn!(%symbol, reason, frames = watched.frames, "Connection lost, reconnecting");
            silent_drops = 0;
            continue;
        }

        let error = format!("{} before the first message", reason);
        if !core.policy.allows_retry_after(silent_drops) {
            error!(%symbol, attempts = silent_drops + 1, %error, "Connection keeps dropping, giving up");
            core.transition(ConnectionState::Disconnected);
            core.events.send(SessionEvent::RetriesExhausted { attempts: silent_drops + 1, error });
            return;
        }

        let delay = core.policy.delay_for(silent_drops);
        warn!(
            %symbol,
            attempt = silent_drops,
            delay_ms = delay.as_millis() as u64,
            %error,
            "Connection dropped before any message, backing off"
        );
        core.events.send(SessionEvent::Reconnecting {
            attempt: silent_drops,
            delay_ms: delay.as_millis() as u64,
            error,
        });

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {},
        }
        silent_drops += 1;
    }
}

/// Run the retry loop. `None` when cancelled or out of attempts.
async fn establish_with_retry(
    core: &SupervisorCore,
    symbol: &Symbol,
    interval: &str,
    cancel: &CancellationToken,
) -> Option<LiveConnection> {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = establish(core, symbol, interval, cancel) => result,
        };

        let error = match result {
            Ok(connection) => {
                info!(%symbol, interval, attempt, "Connection established");
                return Some(connection);
            },
            Err(e) => e,
        };

        if !core.policy.allows_retry_after(attempt) {
            error!(%symbol, attempts = attempt + 1, error = %error, "Connection retries exhausted");
            core.transition(ConnectionState::Disconnected);
            core.events.send(SessionEvent::RetriesExhausted { attempts: attempt + 1, error: error.to_string() });
            return None;
        }

        let delay = core.policy.delay_for(attempt);
        warn!(
            %symbol,
            attempt,
            delay_ms = delay.as_millis() as u64,
            retryable = error.is_retryable(),
            error = %error,
            "Connection attempt failed, retrying"
        );
        core.events.send(SessionEvent::Reconnecting {
            attempt,
            delay_ms: delay.as_millis() as u64,
            error: error.to_string(),
        });

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {},
        }
        attempt += 1;
    }
}

/// One connection attempt. Releases partial resources on failure.
async fn establish(
    core: &SupervisorCore,
    symbol: &Symbol,
    interval: &str,
    cancel: &CancellationToken,
) -> ExecResult<LiveConnection> {
    // 1. Session token
    let token = core.exchange.open_session_token().await?;
    debug!(?token, "Session token obtained");

    // 2. Combined market + user stream
    let mut stream = match core.exchange.open_market_and_user_stream(symbol, interval, &token).await {
        Ok(stream) => stream,
        Err(e) => {
            close_token(core, &token).await;
            return Err(e);
        },
    };

    // 3. Order channel
    let order_channel = match core.exchange.open_order_channel().await {
        Ok(channel) => channel,
        Err(e) => {
            stream.close().await;
            close_token(core, &token).await;
            return Err(e);
        },
    };
    if let Some(previous) = core.order_slot.publish(order_channel.clone()).await {
        previous.close().await;
    }

    // 4. Keepalive
    let keepalive_cancel = cancel.child_token();
    let keepalive = tokio::spawn(keepalive_loop(
        core.exchange.clone(),
        token.clone(),
        core.keepalive_interval,
        keepalive_cancel.clone(),
    ));

    // 5. Positions
    core.positions.refresh().await;

    Ok(LiveConnection { token, stream, order_channel, keepalive_cancel, keepalive })
}

/// Extend the session token every `period` until cancelled.
///
/// Failures are logged; a dead token surfaces as `listenKeyExpired` on the stream.
async fn keepalive_loop(
    exchange: Arc<dyn ExchangeService>,
    token: SessionToken,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Keepalive loop stopped");
                return;
            }
            _ = ticker.tick() => {
                let result = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Keepalive loop stopped mid-request");
                        return;
                    }
                    result = exchange.keepalive_session_token(&token) => result,
                };
                match result {
                    Ok(()) => debug!("Session token kept alive"),
                    Err(e) => warn!(error = %e, "Session token keepalive failed"),
                }
            }
        }
    }
}

/// Route stream frames until the stream or the order channel ends, or the
/// session is cancelled.
async fn watch_stream(
    core: &SupervisorCore,
    stream: &mut dyn StreamChannel,
    order_channel: &dyn OrderChannel,
    cancel: &CancellationToken,
) -> Watched {
    let mut frames: u64 = 0;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Watched { end: StreamEnd::Cancelled, frames },
            _ = order_channel.closed() => return Watched { end: StreamEnd::OrderChannelClosed, frames },
            message = stream.next_message() => message,
        };

        let Some(text) = message else {
            return Watched { end: StreamEnd::Closed, frames };
        };
        frames += 1;

        match route(&text) {
            Ok(StreamEvent::CandleClosed(candle)) => {
                debug!(symbol = %candle.symbol, close = %candle.close, "Candle closed");
                core.latest_candle.send_replace(Some(candle.clone()));
                core.events.send(SessionEvent::CandleClosed(candle));
            },
            Ok(StreamEvent::PositionsChanged { event_type }) => {
                debug!(%event_type, "User event, refreshing positions");
                tokio::select! {
                    _ = cancel.cancelled() => return Watched { end: StreamEnd::Cancelled, frames },
                    _ = core.positions.refresh() => {},
                }
                let open_positions = core.positions.current().await.len();
                core.events.send(SessionEvent::PositionsRefreshed { trigger: event_type, open_positions });
            },
            Ok(StreamEvent::SessionExpired) => return Watched { end: StreamEnd::SessionExpired, frames },
            Ok(StreamEvent::Ignored) => {},
            Err(e) => warn!(error = %e, "Dropping stream message"),
        }
    }
}

/// Release every resource of an established connection.
async fn teardown(core: &SupervisorCore, connection: LiveConnection) {
    let LiveConnection { token, mut stream, order_channel, keepalive_cancel, keepalive } = connection;

    keepalive_cancel.cancel();
    if let Err(e) = keepalive.await {
        warn!(error = %e, "Keepalive task failed");
    }

    stream.close().await;

    // Only unpublish the channel this connection owns
    let current = core.order_slot.current().await.ok();
    if current.is_some_and(|c| Arc::ptr_eq(&c, &order_channel)) {
        let _ = core.order_slot.clear().await;
    }
    order_channel.close().await;

    close_token(core, &token).await;
    debug!("Connection resources released");
}

/// Best-effort session token close.
async fn close_token(core: &SupervisorCore, token: &SessionToken) {
    if let Err(e) = core.exchange.close_session_token(token).await {
        match e {
            ExecError::Transport(_) | ExecError::SessionTokenFetchFailed(_) => {
                debug!(error = %e, "Could not close session token")
            },
            _ => warn!(error = %e, "Could not close session token"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
