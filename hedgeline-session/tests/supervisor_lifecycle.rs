//! Connection lifecycle tests against the stub exchange.
//!
//! Time is paused: retry sleeps and keepalive ticks advance instantly once
//! every task is idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use hedgeline_domain::{ConnectionState, Symbol};
use hedgeline_exec::{
    raw_position, ExchangeService, ExecError, OrderChannelSlot, PositionView, StubExchange, StubOp,
};
use hedgeline_session::{
    Backoff, ConnectionSupervisor, EventBus, EventReceiver, RetryPolicy, SessionEvent, DEFAULT_KEEPALIVE_INTERVAL,
};

struct Harness {
    stub: Arc<StubExchange>,
    positions: Arc<PositionView>,
    slot: Arc<OrderChannelSlot>,
    events: EventBus,
    supervisor: ConnectionSupervisor,
}

fn harness(policy: RetryPolicy) -> Harness {
    let stub = Arc::new(StubExchange::with_default_markets());
    let exchange: Arc<dyn ExchangeService> = stub.clone();
    let positions = Arc::new(PositionView::new(exchange.clone()));
    let slot = Arc::new(OrderChannelSlot::new());
    let events = EventBus::new(256);
    let supervisor = ConnectionSupervisor::new(
        exchange,
        positions.clone(),
        slot.clone(),
        events.clone(),
        policy,
        DEFAULT_KEEPALIVE_INTERVAL,
    );

    Harness { stub, positions, slot, events, supervisor }
}

fn quick_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
        backoff: Backoff::Exponential,
    }
}

fn btc() -> Symbol {
    Symbol::from_pair("BTCUSDT").unwrap()
}

async fn wait_for_state(supervisor: &ConnectionSupervisor, target: ConnectionState) {
    let mut rx = supervisor.subscribe_state();
    rx.wait_for(|state| *state == target).await.unwrap();
}

/// Wait for a transition into `target` on the event bus.
///
/// Unlike the state watch, the bus keeps every transition, so a quick
/// Connecting → Connected pair is never collapsed.
async fn wait_for_transition(events: &mut EventReceiver, target: ConnectionState) {
    loop {
        if let SessionEvent::StateChanged { current, .. } = events.recv().await.unwrap().unwrap() {
            if current == target {
                return;
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn connect_twice_opens_channels_once() {
    let h = harness(quick_policy(3));

    assert!(h.supervisor.connect(btc(), "1m").await);
    assert!(!h.supervisor.connect(btc(), "1m").await);

    wait_for_state(&h.supervisor, ConnectionState::Connected).await;
    assert!(!h.supervisor.connect(btc(), "1m").await);

    assert_eq!(h.stub.calls(StubOp::OpenToken), 1);
    assert_eq!(h.stub.calls(StubOp::OpenStream), 1);
    assert_eq!(h.stub.calls(StubOp::OpenOrderChannel), 1);

    h.supervisor.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_end_disconnected() {
    let h = harness(quick_policy(3));
    let mut events = h.events.subscribe();
    h.stub.set_unavailable(StubOp::OpenToken, true);

    h.supervisor.connect(btc(), "1m").await;

    let mut reconnects = 0;
    loop {
        match events.recv().await.unwrap().unwrap() {
            SessionEvent::Reconnecting { .. } => reconnects += 1,
            SessionEvent::RetriesExhausted { attempts, .. } => {
                assert_eq!(attempts, 3);
                break;
            },
            _ => {},
        }
    }

    assert_eq!(reconnects, 2);
    assert_eq!(h.stub.calls(StubOp::OpenToken), 3);
    assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
    assert_eq!(h.stub.calls(StubOp::OpenStream), 0);

    // A later connect starts over
    h.stub.set_unavailable(StubOp::OpenToken, false);
    assert!(h.supervisor.connect(btc(), "1m").await);
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;

    h.supervisor.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn token_rejection_is_retried() {
    let h = harness(quick_policy(3));
    h.stub.fail_next(StubOp::OpenToken, ExecError::SessionTokenFetchFailed("-1000 unknown".to_string()));

    h.supervisor.connect(btc(), "1m").await;
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;

    assert_eq!(h.stub.calls(StubOp::OpenToken), 2);

    h.supervisor.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn destroy_is_idempotent_and_releases_everything() {
    let h = harness(quick_policy(3));

    // From Disconnected
    h.supervisor.destroy().await;
    assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);

    h.supervisor.connect(btc(), "1m").await;
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;

    h.supervisor.destroy().await;
    h.supervisor.destroy().await;

    assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
    assert_eq!(h.stub.calls(StubOp::CloseStream), 1);
    assert_eq!(h.stub.calls(StubOp::CloseOrderChannel), 1);
    assert_eq!(h.stub.calls(StubOp::CloseToken), 1);
    assert!(!h.slot.is_available().await);

    // Keepalive stopped with the connection
    tokio::time::sleep(DEFAULT_KEEPALIVE_INTERVAL * 3).await;
    assert_eq!(h.stub.calls(StubOp::KeepaliveToken), 0);

    // Usable again
    assert!(h.supervisor.connect(btc(), "1m").await);
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;
    h.supervisor.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn destroy_during_backoff_stops_retrying() {
    let h = harness(RetryPolicy {
        max_attempts: 10,
        base_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(60),
        backoff: Backoff::Linear,
    });
    let mut events = h.events.subscribe();
    h.stub.set_unavailable(StubOp::OpenToken, true);

    h.supervisor.connect(btc(), "1m").await;
    loop {
        if let SessionEvent::Reconnecting { .. } = events.recv().await.unwrap().unwrap() {
            break;
        }
    }

    h.supervisor.destroy().await;
    let calls = h.stub.calls(StubOp::OpenToken);

    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(h.stub.calls(StubOp::OpenToken), calls);
    assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn dropped_stream_reconnects() {
    let h = harness(quick_policy(3));
    let feed = h.stub.script_stream();

    h.supervisor.connect(btc(), "1m").await;
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;

    let mut events = h.events.subscribe();
    drop(feed);

    wait_for_transition(&mut events, ConnectionState::Connecting).await;
    wait_for_transition(&mut events, ConnectionState::Connected).await;

    assert_eq!(h.stub.calls(StubOp::OpenToken), 2);
    assert_eq!(h.stub.calls(StubOp::OpenStream), 2);
    assert_eq!(h.stub.calls(StubOp::CloseToken), 1);
    assert!(h.slot.is_available().await);

    h.supervisor.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn expired_session_forces_reconnect() {
    let h = harness(quick_policy(3));
    let feed = h.stub.script_stream();

    h.supervisor.connect(btc(), "1m").await;
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;

    let mut events = h.events.subscribe();
    feed.send(r#"{"stream":"stub-listen-key-1","data":{"e":"listenKeyExpired","E":1,"listenKey":"stub-listen-key-1"}}"#.to_string())
        .unwrap();

    wait_for_transition(&mut events, ConnectionState::Connecting).await;
    wait_for_transition(&mut events, ConnectionState::Connected).await;

    assert_eq!(h.stub.calls(StubOp::OpenToken), 2);

    h.supervisor.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn user_event_refreshes_positions() {
    let h = harness(quick_policy(3));
    let feed = h.stub.script_stream();
    let mut events = h.events.subscribe();

    h.supervisor.connect(btc(), "1m").await;
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;
    assert!(h.positions.current().await.is_empty());

    h.stub.set_positions(vec![raw_position("BTCUSDT", "0.010", "LONG")]);
    feed.send(r#"{"stream":"stub-listen-key-1","data":{"e":"ORDER_TRADE_UPDATE","E":1,"T":1,"o":{}}}"#.to_string())
        .unwrap();

    loop {
        if let SessionEvent::PositionsRefreshed { trigger, open_positions } = events.recv().await.unwrap().unwrap() {
            assert_eq!(trigger, "ORDER_TRADE_UPDATE");
            assert_eq!(open_positions, 1);
            break;
        }
    }

    assert_eq!(h.stub.calls(StubOp::FetchPositions), 2);
    assert!(h.positions.find(&btc(), hedgeline_domain::PositionSide::Long).await.is_some());

    h.supervisor.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn failed_stream_refresh_clears_positions() {
    let h = harness(quick_policy(3));
    let feed = h.stub.script_stream();
    let mut events = h.events.subscribe();
    h.stub.set_positions(vec![raw_position("BTCUSDT", "0.010", "LONG")]);

    h.supervisor.connect(btc(), "1m").await;
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;
    assert_eq!(h.positions.current().await.len(), 1);

    h.stub.fail_next(StubOp::FetchPositions, ExecError::Transport("reset".to_string()));
    feed.send(r#"{"stream":"stub-listen-key-1","data":{"e":"ACCOUNT_UPDATE","E":1,"T":1,"a":{}}}"#.to_string())
        .unwrap();

    loop {
        if let SessionEvent::PositionsRefreshed { open_positions, .. } = events.recv().await.unwrap().unwrap() {
            assert_eq!(open_positions, 0);
            break;
        }
    }

    assert_eq!(h.supervisor.state(), ConnectionState::Connected);

    h.supervisor.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_message_is_dropped() {
    let h = harness(quick_policy(3));
    let feed = h.stub.script_stream();
    let mut events = h.events.subscribe();

    h.supervisor.connect(btc(), "1m").await;
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;

    feed.send("{ not json".to_string()).unwrap();
    feed.send(r#"{"stream":"stub-listen-key-1","data":{"e":"ACCOUNT_UPDATE","E":1,"T":1,"a":{}}}"#.to_string())
        .unwrap();

    // The frame after the malformed one is still processed
    loop {
        if let SessionEvent::PositionsRefreshed { .. } = events.recv().await.unwrap().unwrap() {
            break;
        }
    }

    assert_eq!(h.supervisor.state(), ConnectionState::Connected);
    assert_eq!(h.stub.calls(StubOp::OpenStream), 1);

    h.supervisor.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn streams_closing_at_once_back_off_and_give_up() {
    let h = harness(RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        backoff: Backoff::Exponential,
    });
    for _ in 0..50 {
        drop(h.stub.script_stream());
    }
    let mut events = h.events.subscribe();
    let started = Instant::now();

    h.supervisor.connect(btc(), "1m").await;

    let mut delays = Vec::new();
    loop {
        match events.recv().await.unwrap().unwrap() {
            SessionEvent::Reconnecting { delay_ms, .. } => delays.push(delay_ms),
            SessionEvent::RetriesExhausted { attempts, .. } => {
                assert_eq!(attempts, 3);
                break;
            },
            _ => {},
        }
    }

    assert_eq!(delays, vec![1000, 2000]);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(h.stub.calls(StubOp::OpenStream), 3);
    assert_eq!(h.stub.calls(StubOp::CloseToken), 3);
    assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
    assert!(!h.slot.is_available().await);
}

#[tokio::test(start_paused = true)]
async fn delivered_frames_reset_the_drop_budget() {
    let h = harness(quick_policy(2));
    for _ in 0..3 {
        let feed = h.stub.script_stream();
        feed.send(r#"{"stream":"stub-listen-key-1","data":{"e":"MARGIN_CALL","E":1}}"#.to_string())
            .unwrap();
    }
    let mut events = h.events.subscribe();

    h.supervisor.connect(btc(), "1m").await;

    // Three short-lived streams, then the idle one that stays up
    let mut connected = 0;
    while connected < 4 {
        match events.recv().await.unwrap().unwrap() {
            SessionEvent::StateChanged { current: ConnectionState::Connected, .. } => connected += 1,
            SessionEvent::Reconnecting { .. } | SessionEvent::RetriesExhausted { .. } => {
                panic!("healthy streams must reconnect without backoff")
            },
            _ => {},
        }
    }

    assert_eq!(h.stub.calls(StubOp::OpenStream), 4);
    assert_eq!(h.supervisor.state(), ConnectionState::Connected);

    h.supervisor.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn dropped_order_channel_reconnects() {
    let h = harness(quick_policy(3));

    h.supervisor.connect(btc(), "1m").await;
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;

    let mut events = h.events.subscribe();
    h.stub.drop_order_channels();

    wait_for_transition(&mut events, ConnectionState::Connecting).await;
    wait_for_transition(&mut events, ConnectionState::Connected).await;

    assert_eq!(h.stub.calls(StubOp::OpenToken), 2);
    assert_eq!(h.stub.calls(StubOp::OpenOrderChannel), 2);
    assert_eq!(h.stub.calls(StubOp::CloseStream), 1);
    assert!(h.slot.is_available().await);

    h.supervisor.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn destroy_interrupts_inflight_refresh() {
    let h = harness(quick_policy(3));
    let feed = h.stub.script_stream();

    h.supervisor.connect(btc(), "1m").await;
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;

    h.stub.set_delay(StubOp::FetchPositions, Duration::from_secs(3600));
    feed.send(r#"{"stream":"stub-listen-key-1","data":{"e":"ACCOUNT_UPDATE","E":1,"T":1,"a":{}}}"#.to_string())
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.stub.calls(StubOp::FetchPositions), 2);

    let started = Instant::now();
    h.supervisor.destroy().await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn destroy_interrupts_inflight_keepalive() {
    let h = harness(quick_policy(3));
    h.stub.set_delay(StubOp::KeepaliveToken, Duration::from_secs(3600));

    h.supervisor.connect(btc(), "1m").await;
    wait_for_state(&h.supervisor, ConnectionState::Connected).await;

    tokio::time::sleep(DEFAULT_KEEPALIVE_INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(h.stub.calls(StubOp::KeepaliveToken), 1);

    let started = Instant::now();
    h.supervisor.destroy().await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.stub.calls(StubOp::CloseToken), 1);
}
