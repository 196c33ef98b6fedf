//! Platform tunnel service seam
//!
//! The platform owns the persisted VPN configuration store and the tunnel
//! extension process; this module defines the raw surface the rest of the
//! crate is written against. The trait deliberately keeps the platform's
//! awkward shapes intact (the three-way enumerate result, the
//! fire-and-forget stop, the possibly-absent message reply) so the adapter
//! layer is the single place that cleans them up.
//!
//! Implementations: one per target platform (out of this crate), plus
//! [`crate::testing::FakeVpnService`] for tests.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::status::ConnectionStatus;

/// Identifier of one persisted tunnel configuration in the platform store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigId(pub u64);

static NEXT_CONFIG_ID: AtomicU64 = AtomicU64::new(1);

impl ConfigId {
    /// Allocate a process-unique identifier for a new, not-yet-saved
    /// configuration.
    pub fn next() -> Self {
        ConfigId(NEXT_CONFIG_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// On-demand connection rule kinds installed on a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDemandRule {
    /// Reconnect automatically whenever a network path is available.
    AlwaysConnect,
    /// Never reconnect automatically.
    NeverConnect,
}

/// Persisted fields of a tunnel configuration as the platform stores them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    /// Bundle identifier of the tunnel extension this configuration targets.
    pub bundle_identifier: String,
    /// Server address field of the configuration. The container app does not
    /// use it for routing; a sentinel value is stored at creation.
    pub server_address: String,
    /// Whether the configuration is enabled in the platform store.
    pub enabled: bool,
    /// Whether on-demand connection is currently enabled.
    pub on_demand_enabled: bool,
    /// Installed on-demand rules, evaluated in order by the platform.
    pub on_demand_rules: Vec<OnDemandRule>,
}

/// Errors surfaced by the platform tunnel service.
///
/// `PermissionDenied` is kept distinguishable from the opaque remainder:
/// it means configuration read/write was refused, usually because another
/// VPN profile conflicts at the system level, and the UI shows a
/// differentiated message for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OsError {
    #[error("vpn configuration read/write was denied")]
    PermissionDenied,

    #[error("tunnel service error: {0}")]
    Other(String),
}

/// Result shape of [`VpnServiceApi::load_all_configs`].
///
/// The platform callback delivers two independent optionals; all four
/// combinations occur in practice, including both absent (no configurations
/// exist and nothing failed).
pub type RawLoadAllResult = (Option<Vec<(ConfigId, ConfigRecord)>>, Option<OsError>);

/// Raw platform tunnel service API.
///
/// Everything here maps one-to-one onto a platform primitive:
/// configuration store access, tunnel process start/stop, provider
/// messaging, on-demand toggling, and per-configuration status-change
/// notifications. The notification stream carries no payload; consumers
/// re-read the live status after each tick.
#[async_trait]
pub trait VpnServiceApi: Send + Sync + 'static {
    /// Enumerate persisted configurations, preserving the platform's
    /// three-way callback shape.
    async fn load_all_configs(&self) -> RawLoadAllResult;

    /// Persist `record` under `id`, inserting or replacing.
    async fn save_config(&self, id: ConfigId, record: &ConfigRecord) -> Result<(), OsError>;

    /// Read the persisted record for `id`.
    async fn load_config(&self, id: ConfigId) -> Result<ConfigRecord, OsError>;

    /// Delete the persisted record for `id`.
    async fn remove_config(&self, id: ConfigId) -> Result<(), OsError>;

    /// Toggle the persisted on-demand flag for `id` without rewriting the
    /// whole record.
    async fn set_on_demand(&self, id: ConfigId, enabled: bool) -> Result<(), OsError>;

    /// Ask the platform to launch the tunnel extension process for `id`.
    /// Resolves when the platform acknowledges the start request.
    async fn start_tunnel(&self, id: ConfigId, options: &[(String, String)])
        -> Result<(), OsError>;

    /// Ask the platform to terminate the tunnel process. The platform gives
    /// no completion signal; termination is observable only through a later
    /// status transition.
    fn stop_tunnel(&self, id: ConfigId);

    /// Exchange one request/response message with the provider process.
    /// `Ok(None)` reproduces the platform delivering a callback with no
    /// response data.
    async fn send_provider_message(
        &self,
        id: ConfigId,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, OsError>;

    /// Current live connection status of `id`.
    fn connection_status(&self, id: ConfigId) -> ConnectionStatus;

    /// Subscribe to status-change notifications scoped to `id`. Dropping the
    /// receiver tears the subscription down.
    fn subscribe_status(&self, id: ConfigId) -> broadcast::Receiver<()>;
}
