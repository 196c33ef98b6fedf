//! Tunnel Lifecycle Tests
//!
//! End-to-end tests for the tunnel coordinator over the in-memory platform
//! service: full start/stop flows, action queueing, status-driven stop
//! completion, and the cross-process notifier handshake.
//! Run with: cargo test --test lifecycle

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use caravel_core::notifier::{self, LocalNotifier, Notifier};
use caravel_core::testing::FakeVpnService;
use caravel_core::tunnel::{
    ConnectionStatus, OsError, ProviderAdapter, ProviderError, ProviderState, TunnelConnectedStatus,
    TunnelCoordinator,
};

type Coordinator = TunnelCoordinator<ProviderAdapter<FakeVpnService>>;

fn coordinator() -> (Coordinator, Arc<FakeVpnService>, Arc<LocalNotifier>) {
    let fake = Arc::new(FakeVpnService::new());
    let adapter = Arc::new(ProviderAdapter::new(Arc::clone(&fake)));
    let notifier = Arc::new(LocalNotifier::new());
    let coordinator = TunnelCoordinator::new(adapter, notifier.clone());
    (coordinator, fake, notifier)
}

/// Process events until the coordinator has been idle for a while. Effects
/// run on spawned tasks, so "no event within the window" is the settled
/// condition.
async fn settle(coordinator: &mut Coordinator) {
    while let Ok(true) = timeout(Duration::from_millis(200), coordinator.step()).await {}
}

#[tokio::test]
async fn test_start_flow_creates_config_and_reaches_started() {
    let (mut coordinator, fake, notifier) = coordinator();

    let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
    notifier.register_observer(&[notifier::START_VPN], queue_tx);

    let handle = coordinator.handle();
    handle.start_tunnel();
    settle(&mut coordinator).await;

    assert_eq!(coordinator.state().provider_state(), ProviderState::Started);
    let instance = coordinator.state().provider().cloned().expect("provider");

    // The configuration was persisted with on-demand enabled only after the
    // start succeeded.
    let persisted = fake.persisted(instance.config_id()).expect("persisted");
    assert!(persisted.enabled);
    assert!(persisted.on_demand_enabled);

    let calls = fake.calls();
    let start_at = calls.iter().position(|c| c == "start_tunnel").unwrap();
    let on_demand_at = calls.iter().position(|c| c == "set_on_demand").unwrap();
    assert!(start_at < on_demand_at);

    // The extension got told the container considers the tunnel started.
    assert_eq!(queue_rx.try_recv(), Ok(notifier::START_VPN));
}

#[tokio::test]
async fn test_stop_completion_is_inferred_from_status_transition() {
    let (mut coordinator, fake, _notifier) = coordinator();

    let handle = coordinator.handle();
    handle.start_tunnel();
    settle(&mut coordinator).await;
    let instance = coordinator.state().provider().cloned().expect("provider");

    handle.stop_tunnel();
    settle(&mut coordinator).await;

    // The stop request was issued, but completion cannot be assumed.
    assert!(fake.calls().iter().any(|c| c == "stop_tunnel"));
    assert_eq!(coordinator.state().provider_state(), ProviderState::Stopping);

    fake.set_status(instance.config_id(), ConnectionStatus::Disconnecting);
    settle(&mut coordinator).await;
    assert_eq!(coordinator.state().provider_state(), ProviderState::Stopping);

    fake.set_status(instance.config_id(), ConnectionStatus::Disconnected);
    settle(&mut coordinator).await;
    assert_eq!(coordinator.state().provider_state(), ProviderState::Loaded);
}

#[tokio::test]
async fn test_stop_queued_behind_held_start_is_applied_in_order() {
    let (mut coordinator, fake, _notifier) = coordinator();
    fake.hold_starts();

    let handle = coordinator.handle();
    handle.start_tunnel();
    settle(&mut coordinator).await;

    // The start flow is parked on the platform acknowledgment.
    assert_eq!(fake.pending_start_count(), 1);
    assert_eq!(coordinator.state().provider_state(), ProviderState::Starting);

    // Conflicting request while the start is in flight: queued, not dropped.
    handle.stop_tunnel();
    settle(&mut coordinator).await;
    assert_eq!(coordinator.state().pending_len(), 1);
    assert!(!fake.calls().iter().any(|c| c == "stop_tunnel"));

    fake.release_start(Ok(()));
    settle(&mut coordinator).await;

    // Both actions ran, in issue order.
    let calls = fake.calls();
    let start_at = calls.iter().position(|c| c == "start_tunnel").unwrap();
    let stop_at = calls.iter().position(|c| c == "stop_tunnel").unwrap();
    assert!(start_at < stop_at);
    assert_eq!(coordinator.state().pending_len(), 0);
    assert_eq!(coordinator.state().provider_state(), ProviderState::Stopping);
}

#[tokio::test]
async fn test_status_signal_publishes_reduced_status() {
    let (mut coordinator, fake, _notifier) = coordinator();
    let status_signal = coordinator.status_signal();
    assert_eq!(*status_signal.borrow(), TunnelConnectedStatus::NotConnected);

    let handle = coordinator.handle();
    handle.start_tunnel();
    settle(&mut coordinator).await;

    // The fake reports Connecting once the start is acknowledged.
    assert_eq!(*status_signal.borrow(), TunnelConnectedStatus::Connecting);

    let instance = coordinator.state().provider().cloned().expect("provider");
    fake.set_status(instance.config_id(), ConnectionStatus::Connected);
    settle(&mut coordinator).await;
    assert_eq!(*status_signal.borrow(), TunnelConnectedStatus::Connected);

    fake.set_status(instance.config_id(), ConnectionStatus::Disconnecting);
    settle(&mut coordinator).await;
    assert_eq!(*status_signal.borrow(), TunnelConnectedStatus::NotConnected);
}

#[tokio::test]
async fn test_load_configs_adopts_persisted_configuration() {
    let (mut coordinator, fake, _notifier) = coordinator();

    let seeded = fake.seed_config(caravel_core::tunnel::ConfigRecord {
        bundle_identifier: "com.caravel.vpn.tunnel".to_string(),
        server_address: "localhost".to_string(),
        enabled: true,
        on_demand_enabled: true,
        on_demand_rules: vec![caravel_core::tunnel::OnDemandRule::AlwaysConnect],
    });

    let handle = coordinator.handle();
    handle.load_configs();
    settle(&mut coordinator).await;

    assert_eq!(coordinator.state().provider_state(), ProviderState::Loaded);
    let instance = coordinator.state().provider().cloned().expect("provider");
    assert_eq!(instance.config_id(), seeded);

    // The observer followed the adoption: status changes on the persisted
    // configuration now reach the reducer.
    fake.set_status(seeded, ConnectionStatus::Connecting);
    settle(&mut coordinator).await;
    assert_eq!(coordinator.state().status(), ConnectionStatus::Connecting);
    // An externally-driven start (on-demand) is reconciled.
    assert_eq!(coordinator.state().provider_state(), ProviderState::Started);
}

#[tokio::test]
async fn test_permission_denied_fails_the_flow_distinguishably() {
    let (mut coordinator, fake, _notifier) = coordinator();
    fake.set_load_all_result((None, Some(OsError::PermissionDenied)));

    let handle = coordinator.handle();
    handle.start_tunnel();
    settle(&mut coordinator).await;

    assert_eq!(coordinator.state().provider_state(), ProviderState::Unknown);
    assert_eq!(
        coordinator.state().last_error(),
        Some(&ProviderError::PermissionDenied)
    );
}

#[tokio::test]
async fn test_send_message_round_trip_while_connected() {
    let (mut coordinator, fake, _notifier) = coordinator();

    let handle = coordinator.handle();
    handle.start_tunnel();
    settle(&mut coordinator).await;
    let instance = coordinator.state().provider().cloned().expect("provider");
    fake.set_status(instance.config_id(), ConnectionStatus::Connected);

    handle.send_message(b"tunnel-state".to_vec());
    settle(&mut coordinator).await;

    match coordinator.state().last_message() {
        Some(Ok((echoed, reply))) => {
            assert_eq!(echoed, &instance);
            assert_eq!(reply, &b"tunnel-state".to_vec());
        }
        other => panic!("expected message reply, got {:?}", other),
    }
}
