//! Streaming client tests against a local push server.
//!
//! Run with: cargo test --test feed_integration

mod common;

use std::time::Duration;

use gridline::auth;
use gridline::prelude::*;
use gridline::shared::BookSide;
use gridline::websocket::subscriptions::forward_to;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};

const MARKET_FRAME: &str = r#"[148,10,[["o",1,"0.0099","3"],["t","42",0,"0.0101","0.5",1700000000]]]"#;

fn socket(url: &str) -> ExchangeSocket {
    ExchangeSocket::new(TransportConfig::new(url))
}

#[tokio::test]
async fn test_market_subscription_round_trip() {
    let mut server = common::start(
        vec![MARKET_FRAME.to_string()],
        Some(Duration::from_millis(50)),
    )
    .await;
    let socket = socket(&server.url);
    let (tx, mut rx) = mpsc::channel(16);
    let (stop_tx, stop) = watch::channel(false);

    let task = {
        let socket = socket.clone();
        tokio::spawn(async move {
            socket
                .subscribe_market_updates(ChannelId(148), tx, stop)
                .await
        })
    };

    let subscribe = server.next_json().await;
    assert_eq!(
        subscribe,
        serde_json::json!({"command": "subscribe", "channel": 148})
    );

    let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.sequence, 10);
    assert_eq!(update.order_book_deltas.len(), 1);
    assert_eq!(update.order_book_deltas[0].side, BookSide::Bid);
    assert_eq!(update.order_book_deltas[0].price, dec!(0.0099));
    assert_eq!(update.order_book_deltas[0].size, dec!(3));
    assert_eq!(update.trades.len(), 1);
    assert_eq!(update.trades[0].side, Side::Sell);

    stop_tx.send_replace(true);
    let result = tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());

    let unsubscribe = server.next_json().await;
    assert_eq!(
        unsubscribe,
        serde_json::json!({"command": "unsubscribe", "channel": 148})
    );
    assert!(!socket.transport().registry().is_subscribed(ChannelId(148)));
    assert_eq!(socket.transport().dial_count(), 1);

    socket.close().await;
    assert!(socket.transport().is_closed());
}

#[tokio::test]
async fn test_duplicate_subscription_rejected() {
    let mut server = common::start(Vec::new(), Some(Duration::from_millis(50))).await;
    let socket = socket(&server.url);
    let (stop_tx, stop) = watch::channel(false);

    let first = {
        let socket = socket.clone();
        let stop = stop.clone();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _rx = rx;
            socket
                .subscribe_market_updates(ChannelId(148), tx, stop)
                .await
        })
    };
    server.next_frame().await;

    let (tx, _rx) = mpsc::channel(16);
    let second = socket
        .subscribe_market_updates(ChannelId(148), tx, stop)
        .await;
    assert!(matches!(
        second,
        Err(WebSocketError::AlreadySubscribed { channel }) if channel == ChannelId(148)
    ));

    // the first subscription is untouched
    assert!(socket.transport().registry().is_subscribed(ChannelId(148)));

    stop_tx.send_replace(true);
    let result = tokio::time::timeout(Duration::from_secs(3), first)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    socket.close().await;
}

#[tokio::test]
async fn test_concurrent_connect_dials_once() {
    let server = common::start(Vec::new(), Some(Duration::from_millis(50))).await;
    let socket = socket(&server.url);
    let transport = socket.transport();

    let (a, b, c) = tokio::join!(transport.connect(), transport.connect(), transport.connect());
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert!(c.is_ok());

    assert_eq!(transport.dial_count(), 1);
    assert_eq!(transport.state(), ConnectionState::Connected);
    assert_eq!(server.connections(), 1);

    socket.close().await;
}

#[tokio::test]
async fn test_idle_timeout_fails_every_subscription() {
    let mut server = common::start(Vec::new(), None).await;
    let mut config = TransportConfig::new(&server.url);
    config.idle_timeout = Duration::from_millis(200);
    let socket = ExchangeSocket::new(config);
    let (_stop_tx, stop) = watch::channel(false);

    let spawn = |channel: u32| {
        let socket = socket.clone();
        let stop = stop.clone();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _rx = rx;
            socket
                .subscribe_market_updates(ChannelId(channel), tx, stop)
                .await
        })
    };
    let first = spawn(148);
    let second = spawn(149);

    server.next_frame().await;
    server.next_frame().await;

    for task in [first, second] {
        let result = tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(WebSocketError::IdleTimeout(_))));
    }

    assert!(socket.transport().registry().is_empty());
    assert_ne!(socket.transport().state(), ConnectionState::Connected);
    // nothing is redialed just to unsubscribe
    assert_eq!(socket.transport().dial_count(), 1);
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_account_subscription_is_signed() {
    let frame = r#"["1000","5",[["n","BTC_ETH","12345","0","0.01","1.0"],["o","12340","0","f"]]]"#;
    let mut server = common::start(vec![frame.to_string()], Some(Duration::from_millis(50))).await;
    let socket = socket(&server.url).with_credentials(Credentials::new("api-key", "secret"));
    let (tx, mut rx) = mpsc::channel(16);
    let (stop_tx, stop) = watch::channel(false);

    let task = {
        let socket = socket.clone();
        tokio::spawn(async move { socket.subscribe_account_updates(tx, stop).await })
    };

    let subscribe = server.next_json().await;
    assert_eq!(subscribe["command"], "subscribe");
    assert_eq!(subscribe["channel"], 1000);
    assert_eq!(subscribe["key"], "api-key");
    let payload = subscribe["payload"].as_str().unwrap();
    assert!(payload.starts_with("nonce="));
    assert_eq!(
        subscribe["sign"].as_str().unwrap(),
        auth::sign("secret", payload).unwrap()
    );

    let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.sequence, 5);
    assert_eq!(update.new_orders.len(), 1);
    assert_eq!(update.new_orders[0].order_number, 12345);
    assert_eq!(update.new_orders[0].side, Side::Sell);
    assert_eq!(update.new_orders[0].market, MarketRef::Symbol("BTC_ETH".to_string()));
    assert_eq!(update.order_transitions.len(), 1);
    assert_eq!(update.order_transitions[0].kind, TransitionKind::Filled);

    stop_tx.send_replace(true);
    let result = tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());

    let unsubscribe = server.next_json().await;
    assert_eq!(unsubscribe["command"], "unsubscribe");
    assert_eq!(unsubscribe["channel"], 1000);
    socket.close().await;
}

#[tokio::test]
async fn test_unreachable_server_fails_subscription() {
    // bind then drop to get a port nobody listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let socket = socket(&url);
    let (tx, _rx) = mpsc::channel(16);
    let (_stop_tx, stop) = watch::channel(false);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        socket.subscribe_market_updates(ChannelId(148), tx, stop),
    )
    .await
    .unwrap();

    assert!(result.is_err());
    assert!(socket.transport().registry().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_timeout_signals_slot_and_removes_entry() {
    let server = common::start_stalled().await;
    let socket = socket(&server.url).with_unsubscribe_timeout(Duration::from_millis(200));
    socket.transport().connect().await.unwrap();

    let (tx, _rx) = mpsc::channel::<ChannelUpdate>(16);
    let mut errors = socket
        .transport()
        .registry()
        .register(ChannelId(148), forward_to(ChannelId(148), tx, Some))
        .unwrap();

    // occupy the single writer with a frame the peer never drains
    let jam = {
        let transport = socket.transport().clone();
        tokio::spawn(async move { transport.send_text(common::oversized_frame()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = tokio::time::Instant::now();
    socket.unsubscribe(ChannelId(148)).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!socket.transport().registry().is_subscribed(ChannelId(148)));
    assert!(matches!(
        errors.try_recv(),
        Ok(WebSocketError::SubscriptionFailed(reason)) if reason.contains("timed out")
    ));

    jam.abort();
    socket.close().await;
}

#[tokio::test]
async fn test_subscription_stops_cleanly_when_unsubscribe_times_out() {
    let server = common::start_stalled().await;
    let socket = socket(&server.url).with_unsubscribe_timeout(Duration::from_millis(200));
    let (tx, _rx) = mpsc::channel(16);
    let (stop_tx, stop) = watch::channel(false);

    let task = {
        let socket = socket.clone();
        tokio::spawn(async move {
            socket
                .subscribe_market_updates(ChannelId(148), tx, stop)
                .await
        })
    };
    // the small subscribe frame fits in the socket buffers
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(socket.transport().registry().is_subscribed(ChannelId(148)));

    let jam = {
        let transport = socket.transport().clone();
        tokio::spawn(async move { transport.send_text(common::oversized_frame()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    stop_tx.send_replace(true);
    let result = tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .unwrap()
        .unwrap();

    assert!(result.is_ok());
    assert!(socket.transport().registry().is_empty());

    jam.abort();
    socket.close().await;
}
