//! Feed Supervisor Integration Tests
//!
//! Drives the supervisor against an in-memory venue: reconciliation,
//! recovery after drops, heartbeats, acknowledgements and stop semantics.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use common::{
    Harness, PING_FRAME, parse_command, principal, subscribe_ack, subscribed_keys, tick_frame,
    tick_record,
};
use kis_realtime_feed::{ConnectionState, FeedError, FeedEvent, FeedPrincipal, RetryPolicy};
use tokio_test::assert_err;

#[tokio::test]
async fn test_start_without_approval_key_is_unauthorized() {
    let harness = Harness::new();

    let result = harness.supervisor.start(&FeedPrincipal::new("user-1")).await;

    assert!(matches!(result, Err(FeedError::Unauthorized(_))));
    assert_eq!(harness.connector.connects(), 0);
}

#[tokio::test]
async fn test_start_replays_every_registered_symbol_once() {
    let mut harness = Harness::new();
    for symbol in ["005930", "000660", "035720"] {
        assert!(harness.supervisor.subscribe(symbol).await.unwrap());
    }

    harness.supervisor.start(&principal()).await.unwrap();
    let mut venue = harness.next_session().await;

    let texts = venue.drain_texts().await;
    assert_eq!(texts.len(), 3);
    assert_eq!(subscribed_keys(&texts), vec!["000660", "005930", "035720"]);
    assert!(
        texts
            .iter()
            .all(|t| parse_command(t).tr_id == "H0STCNT0")
    );
}

#[tokio::test]
async fn test_subscribe_while_connected_sends_one_command() {
    let mut harness = Harness::new();
    harness.supervisor.start(&principal()).await.unwrap();
    let mut venue = harness.next_session().await;

    harness.supervisor.subscribe("005930").await.unwrap();
    harness.supervisor.subscribe("005930").await.unwrap();

    let texts = venue.drain_texts().await;
    assert_eq!(subscribed_keys(&texts), vec!["005930"]);
}

#[tokio::test]
async fn test_unsubscribe_sends_command_and_updates_registry() {
    let mut harness = Harness::new();
    harness.supervisor.subscribe("005930").await.unwrap();
    harness.supervisor.start(&principal()).await.unwrap();
    let mut venue = harness.next_session().await;
    venue.drain_texts().await;

    assert!(harness.supervisor.unsubscribe("005930").await.unwrap());
    assert!(!harness.supervisor.unsubscribe("005930").await.unwrap());

    let texts = venue.drain_texts().await;
    assert_eq!(texts.len(), 1);
    let command = parse_command(&texts[0]);
    assert_eq!(command.tr_type, "2");
    assert_eq!(command.tr_key, "005930");
    assert!(harness.supervisor.subscribed_symbols().is_empty());
}

#[tokio::test]
async fn test_reconnect_resubscribes_each_symbol_exactly_once() {
    let mut harness = Harness::new();
    harness.supervisor.start(&principal()).await.unwrap();
    let mut venue = harness.next_session().await;
    harness.supervisor.subscribe("005930").await.unwrap();
    harness.supervisor.subscribe("000660").await.unwrap();
    assert_eq!(venue.drain_texts().await.len(), 2);

    venue.hang_up();

    let mut venue = harness.next_session().await;
    let texts = venue.drain_texts().await;
    assert_eq!(subscribed_keys(&texts), vec!["000660", "005930"]);
    assert_eq!(texts.len(), 2);

    harness
        .eventually(|s| s.connection_state() == ConnectionState::Connected)
        .await;
    assert_eq!(harness.supervisor.subscribed_symbols().len(), 2);
    assert_eq!(harness.supervisor.status().reconnects, 1);
}

#[tokio::test]
async fn test_failed_send_reconnects_and_resends() {
    let mut harness = Harness::new();
    harness.supervisor.start(&principal()).await.unwrap();
    let mut venue = harness.next_session().await;
    venue.refuse_writes();

    assert!(harness.supervisor.subscribe("000660").await.unwrap());

    let mut venue = harness.next_session().await;
    let texts = venue.drain_texts().await;
    assert_eq!(subscribed_keys(&texts), vec!["000660"]);
    assert_eq!(texts.len(), 1);
    assert_eq!(harness.connector.connects(), 2);
}

#[tokio::test]
async fn test_subscribe_racing_a_drop_reaches_new_session_once() {
    let mut harness = Harness::new();
    harness.supervisor.subscribe("005930").await.unwrap();
    harness.supervisor.start(&principal()).await.unwrap();
    let mut venue = harness.next_session().await;
    assert_eq!(venue.drain_texts().await.len(), 1);

    venue.hang_up();
    let _ = harness.supervisor.subscribe("000660").await;

    let mut venue = harness.next_session().await;
    let texts = venue.drain_texts().await;
    assert_eq!(subscribed_keys(&texts), vec!["000660", "005930"]);
    assert_eq!(texts.len(), 2);
    assert_eq!(harness.settled_connects().await, 2);
    harness.assert_no_session();
}

#[tokio::test]
async fn test_recovery_gives_up_when_writes_keep_failing() {
    let harness = Harness::new();
    harness.connector.refuse_all_writes();
    harness.supervisor.start(&principal()).await.unwrap();

    let _ = harness.supervisor.subscribe("005930").await;

    // start, the send hook's session, then four recovery attempts
    assert!(harness.settled_connects().await <= 6);
    assert!(harness.supervisor.is_running());
    assert_ne!(
        harness.supervisor.connection_state(),
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn test_recovery_gives_up_when_sessions_end_at_once() {
    let harness = Harness::new();
    harness.connector.hang_up_at_once();

    let _ = harness.supervisor.start(&principal()).await;

    // start, then four recovery attempts
    assert!(harness.settled_connects().await <= 5);
    assert_ne!(
        harness.supervisor.connection_state(),
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn test_start_failure_cancels_recovery() {
    let mut harness = Harness::new();
    harness.connector.refuse_all_writes();
    harness.supervisor.subscribe("005930").await.unwrap();

    assert_err!(harness.supervisor.start(&principal()).await);

    assert_eq!(harness.settled_connects().await, 1);
    assert!(!harness.supervisor.is_running());
    assert_eq!(
        harness.supervisor.connection_state(),
        ConnectionState::Disconnected
    );
    let _venue = harness.next_session().await;
    harness.assert_no_session();
}

#[tokio::test]
async fn test_stop_cancels_pending_recovery() {
    let mut harness = Harness::with_recovery(RetryPolicy::new(3, Duration::from_millis(200)));
    harness.supervisor.start(&principal()).await.unwrap();
    let venue = harness.next_session().await;

    venue.hang_up();
    harness
        .eventually(|s| s.connection_state() != ConnectionState::Connected)
        .await;
    harness.supervisor.stop().await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(harness.connector.connects(), 1);
    harness.assert_no_session();
    assert_eq!(
        harness.supervisor.connection_state(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_ping_is_echoed_once_and_never_published() {
    let mut harness = Harness::new();
    let mut events = harness.listen();
    harness.supervisor.start(&principal()).await.unwrap();
    let mut venue = harness.next_session().await;

    venue.push(PING_FRAME);

    assert_eq!(venue.next_text().await, PING_FRAME);
    assert!(venue.drain_texts().await.is_empty());
    assert_err!(events.try_recv());
}

#[tokio::test]
async fn test_ticks_are_published_in_order() {
    let mut harness = Harness::new();
    let mut events = harness.listen();
    harness.supervisor.start(&principal()).await.unwrap();
    let venue = harness.next_session().await;

    venue.push(tick_frame(&[
        tick_record("005930", "76900", "2", "1300"),
        tick_record("000660", "131000", "5", "-500"),
    ]));

    let first = events.recv().await.unwrap();
    let second = events.recv().await.unwrap();
    assert_eq!(first.instrument(), "005930");
    assert_eq!(second.instrument(), "000660");
}

#[tokio::test]
async fn test_subscribe_ack_confirms_symbol() {
    let mut harness = Harness::new();
    harness.supervisor.subscribe("005930").await.unwrap();
    harness.supervisor.start(&principal()).await.unwrap();
    let venue = harness.next_session().await;
    assert_eq!(harness.supervisor.status().confirmed_subscriptions, 0);

    venue.push(subscribe_ack("005930"));

    harness
        .eventually(|s| s.status().confirmed_subscriptions == 1)
        .await;
}

#[tokio::test]
async fn test_execution_notices_are_subscribed_and_published() {
    let mut harness = Harness::new();
    let mut events = harness.listen();
    let principal = principal().with_hts_id("hts01").with_demo(true);

    harness.supervisor.start(&principal).await.unwrap();
    let mut venue = harness.next_session().await;

    let texts = venue.drain_texts().await;
    assert_eq!(texts.len(), 1);
    let command = parse_command(&texts[0]);
    assert_eq!(command.tr_id, "H0STCNI9");
    assert_eq!(command.tr_key, "hts01");

    venue.push(
        r#"{"header":{"tr_id":"H0STCNI9"},"body":{"odno":"0000123456","pdno":"005930","ord_qty":"10","cntg_qty":"10","cntg_pric":"76900","cntg_time":"151530"}}"#,
    );

    let FeedEvent::Execution(notice) = events.recv().await.unwrap() else {
        panic!("expected an execution notice");
    };
    assert_eq!(notice.order_id, "0000123456");
    assert_eq!(notice.filled_quantity, 10);
}

#[tokio::test]
async fn test_stop_silences_feed_and_keeps_registry() {
    let mut harness = Harness::new();
    let mut events = harness.listen();
    harness.supervisor.subscribe("005930").await.unwrap();
    harness.supervisor.start(&principal()).await.unwrap();
    let venue = harness.next_session().await;

    harness.supervisor.stop().await;
    venue.push(tick_frame(&[tick_record("005930", "76900", "2", "1300")]));
    tokio::time::sleep(common::QUIET).await;

    assert_err!(events.try_recv());
    assert_eq!(
        harness.supervisor.connection_state(),
        ConnectionState::Disconnected
    );
    assert_eq!(harness.supervisor.subscribed_symbols().len(), 1);

    harness.supervisor.start(&principal()).await.unwrap();
    let mut venue = harness.next_session().await;
    assert_eq!(subscribed_keys(&venue.drain_texts().await), vec!["005930"]);
}
