//! Cross-process notification channel
//!
//! The container app and the tunnel extension signal each other with named,
//! payload-free messages over a platform pub/sub primitive. Delivery is
//! at-most-one-value per name: the platform coalesces repeated posts, so a
//! message means "this happened since you last looked", never "this
//! happened N times".
//!
//! The channel is injected as a collaborator interface rather than reached
//! through a singleton, with explicit observer registration and teardown.
//! Observers register with a callback queue of their own; messages are
//! delivered onto that queue, never on the poster's thread.

use crossbeam_channel::Sender;
use parking_lot::Mutex;

/// Name of a cross-process message.
pub type NotifierMessage = &'static str;

// Messages sent by the extension.
pub const TUNNEL_CONNECTED: NotifierMessage = "TunnelConnected";
pub const AVAILABLE_EGRESS_REGIONS: NotifierMessage = "AvailableEgressRegions";
pub const NETWORK_CONNECTIVITY_FAILED: NotifierMessage = "NetworkConnectivityFailed";
/// Emitted only if a connectivity failure was previously posted.
pub const NETWORK_CONNECTIVITY_RESOLVED: NotifierMessage = "NetworkConnectivityResolved";
pub const DISALLOWED_TRAFFIC_ALERT: NotifierMessage = "DisallowedTrafficAlert";
pub const IS_HOST_APP_PROCESS_RUNNING: NotifierMessage = "IsHostAppProcessRunning";
pub const APPLICATION_PARAMETERS_UPDATED: NotifierMessage = "ApplicationParametersUpdated";

// Messages sent by the container.
pub const START_VPN: NotifierMessage = "StartVPN";
pub const APP_ENTERED_BACKGROUND: NotifierMessage = "AppEnteredBackground";
pub const UPDATED_AUTHORIZATIONS: NotifierMessage = "UpdatedAuthorizations";
pub const HOST_APP_PROCESS_RUNNING: NotifierMessage = "HostAppProcessRunning";

/// Named cross-process pub/sub.
pub trait Notifier: Send + Sync + 'static {
    /// Post `message` to the other process. Thread-safe.
    fn post(&self, message: NotifierMessage);

    /// Register `queue` to receive any of `messages`. Registering the same
    /// queue twice does nothing.
    fn register_observer(&self, messages: &[NotifierMessage], queue: Sender<NotifierMessage>);

    /// Remove a previously registered queue. Unknown queues are ignored.
    fn remove_observer(&self, queue: &Sender<NotifierMessage>);
}

struct Registration {
    messages: Vec<NotifierMessage>,
    queue: Sender<NotifierMessage>,
}

/// In-process notifier.
///
/// Stands in for the platform primitive in tests and single-process builds:
/// posts are delivered to local observers only. Disconnected observer
/// queues are pruned on the next post.
#[derive(Default)]
pub struct LocalNotifier {
    observers: Mutex<Vec<Registration>>,
}

impl LocalNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

impl Notifier for LocalNotifier {
    fn post(&self, message: NotifierMessage) {
        log::debug!("notifier post: {}", message);
        let mut observers = self.observers.lock();
        observers.retain(|registration| {
            if !registration.messages.contains(&message) {
                return true;
            }
            // A failed send means the receiving side is gone; drop the
            // registration.
            registration.queue.send(message).is_ok()
        });
    }

    fn register_observer(&self, messages: &[NotifierMessage], queue: Sender<NotifierMessage>) {
        let mut observers = self.observers.lock();
        if observers
            .iter()
            .any(|registration| registration.queue.same_channel(&queue))
        {
            return;
        }
        observers.push(Registration {
            messages: messages.to_vec(),
            queue,
        });
    }

    fn remove_observer(&self, queue: &Sender<NotifierMessage>) {
        self.observers
            .lock()
            .retain(|registration| !registration.queue.same_channel(queue));
    }
}
