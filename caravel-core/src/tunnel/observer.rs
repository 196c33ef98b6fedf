//! Connection status observer
//!
//! Watches the platform's status-change notifications for the current
//! provider instance and republishes every change as a discrete event on
//! the app's coordination channel, linearizing externally-driven status
//! transitions with action-driven ones.
//!
//! The observer has two states: unbound (initial) and bound to an
//! instance. Rebinding is the only transition, and it always tears the old
//! subscription down first: no dangling subscriptions, no duplicate
//! delivery. On every bind, one synthesized event carrying the instance's
//! *current* status is published immediately, so a consumer that binds
//! after missing earlier notifications is not left with stale state.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::provider::TunnelProviderManager;
use super::reducer::TunnelEvent;

pub struct ConnectionStatusObserver<M: TunnelProviderManager> {
    manager: Arc<M>,
    events: UnboundedSender<TunnelEvent<M::Instance>>,
    binding: Option<Binding<M::Instance>>,
}

struct Binding<I> {
    instance: I,
    forward: JoinHandle<()>,
}

impl<M: TunnelProviderManager> ConnectionStatusObserver<M> {
    pub fn new(manager: Arc<M>, events: UnboundedSender<TunnelEvent<M::Instance>>) -> Self {
        Self {
            manager,
            events,
            binding: None,
        }
    }

    /// The instance currently observed, if any.
    pub fn instance(&self) -> Option<&M::Instance> {
        self.binding.as_ref().map(|b| &b.instance)
    }

    /// Bind the observer to `instance`, replacing any previous binding.
    ///
    /// Teardown happens before the new subscription is established, then a
    /// status event carrying the instance's current status is synthesized,
    /// then forwarding of platform notifications begins.
    pub fn set_instance(&mut self, instance: M::Instance) {
        if let Some(old) = self.binding.take() {
            log::debug!("status observer rebinding, tearing down old subscription");
            old.forward.abort();
        }

        let mut notifications = self.manager.subscribe_status(&instance);

        // Synthesized event: the consumer must not be left with stale state
        // for notifications that predate this binding.
        let current = self.manager.connection_status(&instance);
        log::debug!("status observer bound, current status {}", current.as_str());
        let _ = self.events.send(TunnelEvent::StatusChanged(current));

        let manager = Arc::clone(&self.manager);
        let events = self.events.clone();
        let observed = instance.clone();
        let forward = tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    // Re-read the live status rather than trusting any value
                    // cached at notification time.
                    Ok(()) => {
                        let status = manager.connection_status(&observed);
                        if events.send(TunnelEvent::StatusChanged(status)).is_err() {
                            break;
                        }
                    }
                    // Missed ticks are harmless: the next delivery re-reads
                    // the live status anyway.
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("status observer lagged, missed {} notification(s)", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.binding = Some(Binding { instance, forward });
    }
}

impl<M: TunnelProviderManager> Drop for ConnectionStatusObserver<M> {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.forward.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::tunnel::adapter::ProviderAdapter;
    use crate::tunnel::status::ConnectionStatus;
    use crate::testing::FakeVpnService;

    type Event = TunnelEvent<crate::tunnel::adapter::TunnelInstance>;

    async fn recv_status(rx: &mut mpsc::UnboundedReceiver<Event>) -> ConnectionStatus {
        match rx.recv().await.expect("event channel closed") {
            TunnelEvent::StatusChanged(status) => status,
            other => panic!("expected status event, got {:?}", other),
        }
    }

    async fn assert_no_event(rx: &mut mpsc::UnboundedReceiver<Event>) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        match rx.try_recv() {
            Err(mpsc::error::TryRecvError::Empty) => {}
            other => panic!("expected no event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bind_synthesizes_current_status() {
        let adapter = Arc::new(ProviderAdapter::new(Arc::new(FakeVpnService::new())));
        let fake = Arc::clone(adapter.service());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let instance = adapter.make();
        fake.set_status(instance.config_id(), ConnectionStatus::Connected);

        let mut observer = ConnectionStatusObserver::new(Arc::clone(&adapter), tx);
        observer.set_instance(instance.clone());

        assert_eq!(recv_status(&mut rx).await, ConnectionStatus::Connected);
        assert_eq!(observer.instance(), Some(&instance));
    }

    #[tokio::test]
    async fn test_notifications_republish_live_status() {
        let adapter = Arc::new(ProviderAdapter::new(Arc::new(FakeVpnService::new())));
        let fake = Arc::clone(adapter.service());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let instance = adapter.make();
        let mut observer = ConnectionStatusObserver::new(Arc::clone(&adapter), tx);
        observer.set_instance(instance.clone());

        // Synthesized event first (unsaved instance reads as Invalid).
        assert_eq!(recv_status(&mut rx).await, ConnectionStatus::Invalid);

        fake.set_status(instance.config_id(), ConnectionStatus::Connecting);
        assert_eq!(recv_status(&mut rx).await, ConnectionStatus::Connecting);

        fake.set_status(instance.config_id(), ConnectionStatus::Connected);
        assert_eq!(recv_status(&mut rx).await, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_rebinding_silences_old_instance() {
        let adapter = Arc::new(ProviderAdapter::new(Arc::new(FakeVpnService::new())));
        let fake = Arc::clone(adapter.service());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let a = adapter.make();
        let b = adapter.make();
        fake.set_status(a.config_id(), ConnectionStatus::Connected);
        fake.set_status(b.config_id(), ConnectionStatus::Disconnected);

        let mut observer = ConnectionStatusObserver::new(Arc::clone(&adapter), tx);
        observer.set_instance(a.clone());
        assert_eq!(recv_status(&mut rx).await, ConnectionStatus::Connected);

        // Rebind to b: one synthesized event for b's current status.
        observer.set_instance(b.clone());
        assert_eq!(recv_status(&mut rx).await, ConnectionStatus::Disconnected);
        assert_eq!(observer.instance(), Some(&b));

        // A status change on a must produce no further events.
        fake.set_status(a.config_id(), ConnectionStatus::Disconnecting);
        assert_no_event(&mut rx).await;

        // b is still observed.
        fake.set_status(b.config_id(), ConnectionStatus::Connecting);
        assert_eq!(recv_status(&mut rx).await, ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_drop_stops_forwarding() {
        let adapter = Arc::new(ProviderAdapter::new(Arc::new(FakeVpnService::new())));
        let fake = Arc::clone(adapter.service());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let instance = adapter.make();
        let mut observer = ConnectionStatusObserver::new(Arc::clone(&adapter), tx);
        observer.set_instance(instance.clone());
        assert_eq!(recv_status(&mut rx).await, ConnectionStatus::Invalid);

        drop(observer);
        fake.set_status(instance.config_id(), ConnectionStatus::Connected);
        assert_no_event(&mut rx).await;
    }
}
