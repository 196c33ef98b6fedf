//! Tunnel provider manager abstraction
//!
//! Capability interface over the platform's persisted VPN configuration
//! entity. Effect and reducer code is generic over this trait, which keeps
//! the lifecycle logic testable against an in-memory service and portable
//! across platform adapters.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::status::ConnectionStatus;
use super::{ProviderMessageError, ProviderResult};

/// Bundle identifier of the Caravel tunnel extension. Baked into every
/// configuration created by `make()`.
pub const PROVIDER_BUNDLE_IDENTIFIER: &str = "com.caravel.vpn.tunnel";

/// Sentinel stored in the configuration's server address field. The real
/// servers are picked inside the extension; the platform only requires the
/// field to be non-empty.
pub const SENTINEL_SERVER_ADDRESS: &str = "localhost";

/// Start option key/value marking a start as initiated by the container app
/// (as opposed to an on-demand start by the platform).
pub const START_SOURCE_KEY: &str = "caravel.start-source";
pub const START_SOURCE_CONTAINER: &str = "container";

/// Kinds of configuration update applied before saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigUpdateKind {
    /// Prepare the configuration for an explicit tunnel start.
    StartVpn,
    /// Prepare the configuration for an explicit tunnel stop.
    StopVpn,
}

/// Options passed to a tunnel start request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    pairs: Vec<(String, String)>,
}

impl StartOptions {
    /// Options for a start initiated by the container app.
    pub fn container_initiated() -> Self {
        Self {
            pairs: vec![(
                START_SOURCE_KEY.to_string(),
                START_SOURCE_CONTAINER.to_string(),
            )],
        }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

/// Capability set required of a tunnel provider manager.
///
/// One concrete adapter exists per target platform; all of them share the
/// semantics below:
///
/// - `load` is required after `save` or `remove` to materialize the
///   updated on-disk state into the handle; the platform keeps handle
///   fields stale otherwise.
/// - `start` enables connect-on-demand only after the start request
///   succeeds. Enabling it earlier races the platform's reconnect-on-demand
///   logic against the explicit start call.
/// - `stop` is fire-and-forget; the platform gives no completion signal.
/// - Instance equality is reference identity: two handles are equal iff
///   they wrap the same underlying configuration.
#[async_trait]
pub trait TunnelProviderManager: Send + Sync + 'static {
    /// Opaque handle to one persisted configuration. Cloning the handle
    /// shares the underlying configuration; it never copies it.
    type Instance: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static;

    /// Enumerate all persisted configurations for this app. An empty list
    /// is a valid success, not an error.
    async fn load_all(&self) -> ProviderResult<Vec<Self::Instance>>;

    /// Construct a new, unsaved in-memory configuration pre-populated with
    /// the fixed provider bundle identity and the sentinel server address.
    /// The caller must `save` before the configuration is usable.
    fn make(&self) -> Self::Instance;

    /// Persist the handle's configuration.
    async fn save(&self, instance: &Self::Instance) -> ProviderResult<()>;

    /// Refresh the handle from the persisted store.
    async fn load(&self, instance: &Self::Instance) -> ProviderResult<()>;

    /// Delete the persisted configuration. The handle remains usable for
    /// inspecting its (stale) fields until `load` is called again.
    async fn remove(&self, instance: &Self::Instance) -> ProviderResult<()>;

    /// Apply an in-memory configuration update to the handle. Persisting it
    /// requires a subsequent `save`. Always succeeds.
    ///
    /// `StartVpn`: force-enable the configuration, install an always-connect
    /// on-demand rule if none exists, and disable on-demand; it is
    /// re-enabled only after a successful `start`. `StopVpn`: disable
    /// on-demand unconditionally.
    fn update_config(&self, instance: &Self::Instance, kind: ConfigUpdateKind);

    /// Request the platform start the tunnel extension process. On success,
    /// enables connect-on-demand.
    async fn start(&self, instance: &Self::Instance, options: &StartOptions)
        -> ProviderResult<()>;

    /// Request process termination. Fire-and-forget.
    fn stop(&self, instance: &Self::Instance);

    /// Exchange one message with the provider process. Fails fast with
    /// [`ProviderMessageError::NotActive`] when the provider process is not
    /// running; an absent or empty reply is a hard error, since the message
    /// protocol guarantees exactly one response.
    async fn send_message(
        &self,
        instance: &Self::Instance,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, ProviderMessageError>;

    /// Current live connection status of the instance.
    fn connection_status(&self, instance: &Self::Instance) -> ConnectionStatus;

    /// Subscribe to status-change notifications scoped to this instance.
    /// The stream carries no payload; re-read the live status on each tick.
    fn subscribe_status(&self, instance: &Self::Instance) -> broadcast::Receiver<()>;
}
