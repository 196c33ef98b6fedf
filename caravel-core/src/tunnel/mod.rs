//! Tunnel lifecycle coordination
//!
//! This module owns everything between a user's connect/disconnect intent
//! and the platform tunnel service that supervises the extension process:
//!
//! - service.rs: raw platform seam (`VpnServiceApi`) and its error type
//! - provider.rs: `TunnelProviderManager` capability trait and fixed
//!   provider identifiers
//! - adapter.rs: concrete adapter binding the trait to the raw seam, plus
//!   the reference-identity `TunnelInstance` handle
//! - status.rs: raw and reduced connection status types
//! - effects.rs: single-shot async lifecycle operations
//! - observer.rs: status-change observer republishing onto the
//!   coordination channel
//! - reducer.rs: the lifecycle state machine and action queue
//! - runner.rs: effect driver wiring the reducer to a provider manager
//! - error_messages.rs: user-facing error text

pub mod adapter;
pub mod effects;
pub mod error_messages;
pub mod observer;
pub mod provider;
pub mod reducer;
pub mod runner;
pub mod service;
pub mod status;

pub use adapter::{ProviderAdapter, TunnelInstance};
pub use observer::ConnectionStatusObserver;
pub use provider::{ConfigUpdateKind, StartOptions, TunnelProviderManager};
pub use reducer::{ProviderState, TunnelEvent, VpnAction, VpnReducerState};
pub use runner::{TunnelCoordinator, VpnHandle};
pub use service::{ConfigId, ConfigRecord, OnDemandRule, OsError, VpnServiceApi};
pub use status::{ConnectionStatus, TunnelConnectedStatus};

/// Errors surfaced by tunnel provider lifecycle operations.
///
/// Nothing here is retryable by the provider layer itself; retry policy
/// belongs to the reducer (an explicit re-dispatch of the same action).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Configuration read/write was denied. Usually means another VPN
    /// profile conflicts at the system level and the user has to resolve it
    /// in system settings.
    #[error("vpn configuration permission denied")]
    PermissionDenied,

    /// Any other platform error, wrapped opaquely.
    #[error("tunnel provider error: {0}")]
    Os(#[from] OsError),
}

/// Errors specific to the provider message exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderMessageError {
    /// The provider process is not running; the message was never sent.
    #[error("tunnel provider is not active")]
    NotActive,

    /// The platform failed to deliver the message.
    #[error("provider message transport failed: {0}")]
    Transport(#[source] ProviderError),

    /// The provider delivered no response data. The message protocol
    /// guarantees exactly one response, so this is a hard error rather than
    /// a silently-succeeding empty result.
    #[error("tunnel provider returned an empty response")]
    EmptyResponse,
}

pub type ProviderResult<T> = Result<T, ProviderError>;
