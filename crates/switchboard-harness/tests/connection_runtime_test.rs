//! Connection runtime behavior on a paused clock.
//!
//! Drives the real `ConnectionManager` task against the scripted connector.
//! Time only moves when every task is idle, so retry and keepalive timing is
//! exact up to the tick interval.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use switchboard_client::{ConnectionManager, SystemEnv, TransportError};
use switchboard_core::{ConnectionConfig, ConnectionState, Credential, CredentialGate};
use switchboard_harness::SimConnector;

const TICK: Duration = Duration::from_secs(1);

fn config() -> ConnectionConfig {
    ConnectionConfig {
        retry_delay: Duration::from_secs(5),
        keepalive_interval: Duration::from_secs(25),
        tick_interval: TICK,
    }
}

fn manager(gate: &CredentialGate) -> (ConnectionManager, SimConnector) {
    let connector = SimConnector::new();
    let manager = ConnectionManager::spawn(connector.clone(), gate.clone(), SystemEnv::new(), config());
    (manager, connector)
}

fn logged_in() -> CredentialGate {
    CredentialGate::with_token("agent-token").unwrap()
}

/// Let every task run to idle, then advance virtual time by `by`.
async fn advance(by: Duration) {
    tokio::time::sleep(by).await;
}

async fn open(manager: &ConnectionManager) {
    let mut state = manager.watch_state();
    manager.connect();
    tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| *s == ConnectionState::Open))
        .await
        .expect("link should open")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn connect_without_credential_is_noop() {
    let gate = CredentialGate::new();
    let (manager, connector) = manager(&gate);

    manager.connect();
    advance(Duration::from_secs(30)).await;

    assert_eq!(connector.attempts(), 0);
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn presents_credential_once_per_attempt() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);

    open(&manager).await;
    manager.connect();
    manager.connect();
    advance(TICK).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(connector.credentials()[0].expose(), "agent-token");
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_retries_after_fixed_delay() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    open(&manager).await;

    connector.latest().unwrap().close(1006);
    advance(Duration::from_millis(100)).await;
    assert_eq!(manager.state(), ConnectionState::RetryPending);
    assert!(manager.state().is_reconnecting());

    advance(Duration::from_secs(4)).await;
    assert_eq!(connector.attempts(), 1, "retry must wait for the delay");

    advance(Duration::from_secs(2) + TICK).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(manager.state(), ConnectionState::Open);
    assert_eq!(connector.live_links(), 1);
}

#[tokio::test(start_paused = true)]
async fn normal_close_does_not_retry() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    open(&manager).await;

    connector.latest().unwrap().close(1000);
    advance(Duration::from_secs(60)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn refused_connects_retry_indefinitely_one_at_a_time() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    for _ in 0..4 {
        connector.refuse_next(TransportError::Connect("connection refused".into()));
    }

    manager.connect();
    advance(Duration::from_secs(4 * 7)).await;

    assert_eq!(connector.attempts(), 5);
    assert_eq!(connector.links(), 1);
    assert_eq!(manager.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn link_failure_is_treated_as_abnormal() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    open(&manager).await;

    connector.latest().unwrap().fail("connection reset");
    advance(Duration::from_secs(7)).await;

    assert_eq!(connector.attempts(), 2);
    assert!(connector.live_links() <= 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_cancels_pending_retry() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    open(&manager).await;

    connector.latest().unwrap().close(1011);
    advance(Duration::from_millis(100)).await;
    assert_eq!(manager.state(), ConnectionState::RetryPending);

    open(&manager).await;
    assert_eq!(connector.attempts(), 2);

    // The cancelled timer must not fire a second attempt.
    advance(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(connector.live_links(), 1);
}

#[tokio::test(start_paused = true)]
async fn keepalive_only_while_open() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    open(&manager).await;
    let link = connector.latest().unwrap();

    advance(Duration::from_secs(20)).await;
    assert!(link.sent().is_empty());

    advance(Duration::from_secs(7)).await;
    assert_eq!(link.sent(), vec![r#"{"type":"ping"}"#.to_owned()]);

    manager.close();
    advance(Duration::from_secs(60)).await;
    assert_eq!(link.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn subscribers_registered_before_connect_receive_frames() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = manager.subscribe(move |frame| {
        tx.send(frame.to_owned()).unwrap();
    });

    open(&manager).await;
    let link = connector.latest().unwrap();
    link.push("one");
    link.push("two");
    advance(TICK).await;

    assert_eq!(rx.recv().await.as_deref(), Some("one"));
    assert_eq!(rx.recv().await.as_deref(), Some("two"));
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_stops_delivery() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let subscription = manager.subscribe(move |frame| {
        tx.send(frame.to_owned()).unwrap();
    });
    open(&manager).await;

    assert!(subscription.unsubscribe());
    connector.latest().unwrap().push("late");
    advance(TICK).await;

    assert_eq!(manager.subscriber_count(), 0);
    assert!(rx.try_recv().is_err());
    assert_eq!(manager.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn close_clears_subscribers_and_never_revives() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    let _subscription = manager.subscribe(|_| {});
    open(&manager).await;
    let link = connector.latest().unwrap();

    manager.close();
    advance(TICK).await;
    assert_eq!(manager.subscriber_count(), 0);
    assert_eq!(link.closed_by_client().as_deref(), Some("client shutdown"));

    // A late abnormal close from the old link is stale.
    link.close(1006);
    advance(Duration::from_secs(60)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn close_while_connecting_abandons_attempt() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    connector.set_latency(Duration::from_secs(3));

    manager.connect();
    advance(Duration::from_millis(100)).await;
    assert_eq!(manager.state(), ConnectionState::Connecting);

    manager.close();
    advance(Duration::from_secs(30)).await;

    assert_eq!(connector.links(), 0);
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn credential_loss_closes_without_retry() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    let _subscription = manager.subscribe(|_| {});
    open(&manager).await;
    let link = connector.latest().unwrap();

    gate.clear();
    advance(Duration::from_secs(60)).await;

    assert_eq!(link.closed_by_client().as_deref(), Some("logged out"));
    assert_eq!(connector.attempts(), 1);
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(manager.subscriber_count(), 1, "subscribers survive a logout");
}

#[tokio::test(start_paused = true)]
async fn rejected_handshake_ends_session() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    connector.refuse_next(TransportError::Unauthorized);

    manager.connect();
    advance(Duration::from_secs(30)).await;

    assert!(!gate.is_present());
    assert_eq!(connector.attempts(), 1);
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn replaced_credential_reconnects_with_new_token() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let _subscription = manager.subscribe(move |frame| sink.lock().unwrap().push(frame.to_owned()));
    open(&manager).await;
    let first = connector.latest().unwrap();

    gate.set(Credential::new("other-agent").unwrap());
    advance(TICK).await;

    assert_eq!(first.closed_by_client().as_deref(), Some("credential changed"));
    let tokens: Vec<_> = connector.credentials().iter().map(|c| c.expose().to_owned()).collect();
    assert_eq!(tokens, ["agent-token", "other-agent"]);
    assert_eq!(connector.live_links(), 1);
    assert_eq!(manager.state(), ConnectionState::Open);

    connector.latest().unwrap().push("after");
    advance(TICK).await;
    assert_eq!(*received.lock().unwrap(), ["after"]);
}

#[tokio::test(start_paused = true)]
async fn same_credential_set_again_keeps_link() {
    let gate = logged_in();
    let (manager, connector) = manager(&gate);
    open(&manager).await;

    gate.set(Credential::new("agent-token").unwrap());
    advance(Duration::from_secs(10)).await;

    assert_eq!(connector.attempts(), 1);
    assert!(connector.latest().unwrap().is_live());
}
