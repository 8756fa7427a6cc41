use std::{sync::Arc, time::Duration};

use shared::domain::ConnectionStatus;

use super::*;
use crate::test_fakes::{harness, wait_until, FakeGateway, HarnessOptions};

const INTERVAL: Duration = Duration::from_secs(3);

#[tokio::test(start_paused = true)]
async fn does_not_poll_until_server_is_connected() {
    let h = harness(HarnessOptions::default()).await;
    let poller = RemoteStatePoller::spawn(h.gateway.clone(), h.guard.clone(), INTERVAL);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.gateway.status_polls(), 0);
    assert!(poller.is_running());
}

#[tokio::test(start_paused = true)]
async fn failed_polls_keep_last_known_state() {
    let h = harness(HarnessOptions {
        gateway: FakeGateway::healthy().with_alarm_states([Some(true), None, None]),
        ..HarnessOptions::default()
    })
    .await;
    assert_eq!(
        h.guard.check_connection().await,
        Ok(ConnectionStatus::Connected)
    );
    let _poller = RemoteStatePoller::spawn(h.gateway.clone(), h.guard.clone(), INTERVAL);

    let observed = wait_until(&h.guard, |s| s.remote_alarm.is_some()).await;
    assert_eq!(observed.remote_alarm.map(|state| state.active), Some(true));

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(h.gateway.status_polls() >= 3);
    let snapshot = h.guard.snapshot();
    assert_eq!(snapshot.remote_alarm.map(|state| state.active), Some(true));
    assert_eq!(snapshot.connection, ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn stop_halts_polling() {
    let h = harness(HarnessOptions {
        gateway: FakeGateway::healthy().with_alarm_states([Some(false)]),
        ..HarnessOptions::default()
    })
    .await;
    h.guard.check_connection().await.expect("ping");
    let poller = RemoteStatePoller::spawn(
        Arc::clone(&h.gateway) as Arc<dyn ServerGateway>,
        h.guard.clone(),
        INTERVAL,
    );

    wait_until(&h.guard, |s| s.remote_alarm.is_some()).await;
    poller.stop();
    tokio::task::yield_now().await;
    let polls = h.gateway.status_polls();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.gateway.status_polls(), polls);
    assert!(!poller.is_running());
}
