//! Connection status types
//!
//! The platform reports a six-valued raw connection status for a tunnel
//! configuration. The rest of the app only cares about a three-valued
//! reduction of it, so both live here along with the mapping between them.

use serde::Serialize;

/// Raw connection status of a tunnel configuration, as reported by the
/// platform tunnel service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    /// The configuration is not loaded, was removed, or is unknown to the
    /// platform.
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    /// The tunnel process is up but re-establishing its transport.
    Reasserting,
    Disconnecting,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus::Invalid
    }
}

impl ConnectionStatus {
    /// Reduce the raw status to the three-valued form used by the app.
    ///
    /// This is a pure function of the raw status. `Disconnecting` reduces
    /// to `NotConnected`: a tunnel on its way down is not usable.
    pub fn reduced(self) -> TunnelConnectedStatus {
        match self {
            ConnectionStatus::Connected => TunnelConnectedStatus::Connected,
            ConnectionStatus::Connecting | ConnectionStatus::Reasserting => {
                TunnelConnectedStatus::Connecting
            }
            ConnectionStatus::Invalid
            | ConnectionStatus::Disconnected
            | ConnectionStatus::Disconnecting => TunnelConnectedStatus::NotConnected,
        }
    }

    /// Whether the provider process is live enough to answer messages.
    ///
    /// Provider messages are only deliverable while the extension process is
    /// running, i.e. connecting, connected, or reasserting.
    pub fn is_provider_active(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Connected
                | ConnectionStatus::Reasserting
        )
    }

    /// Human-readable string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Invalid => "invalid",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reasserting => "reasserting",
            ConnectionStatus::Disconnecting => "disconnecting",
        }
    }
}

/// Three-valued connection status exposed to the rest of the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TunnelConnectedStatus {
    Connected,
    Connecting,
    NotConnected,
}

impl TunnelConnectedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelConnectedStatus::Connected => "connected",
            TunnelConnectedStatus::Connecting => "connecting",
            TunnelConnectedStatus::NotConnected => "not_connected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_invalid() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Invalid);
    }

    #[test]
    fn test_reduced_connected() {
        assert_eq!(
            ConnectionStatus::Connected.reduced(),
            TunnelConnectedStatus::Connected
        );
    }

    #[test]
    fn test_reduced_connecting_states() {
        assert_eq!(
            ConnectionStatus::Connecting.reduced(),
            TunnelConnectedStatus::Connecting
        );
        assert_eq!(
            ConnectionStatus::Reasserting.reduced(),
            TunnelConnectedStatus::Connecting
        );
    }

    #[test]
    fn test_reduced_not_connected_states() {
        assert_eq!(
            ConnectionStatus::Invalid.reduced(),
            TunnelConnectedStatus::NotConnected
        );
        assert_eq!(
            ConnectionStatus::Disconnected.reduced(),
            TunnelConnectedStatus::NotConnected
        );
    }

    #[test]
    fn test_disconnecting_always_reduces_to_not_connected() {
        // A tunnel that is tearing down must never present as usable.
        assert_eq!(
            ConnectionStatus::Disconnecting.reduced(),
            TunnelConnectedStatus::NotConnected
        );
    }

    #[test]
    fn test_is_provider_active() {
        assert!(ConnectionStatus::Connecting.is_provider_active());
        assert!(ConnectionStatus::Connected.is_provider_active());
        assert!(ConnectionStatus::Reasserting.is_provider_active());

        assert!(!ConnectionStatus::Invalid.is_provider_active());
        assert!(!ConnectionStatus::Disconnected.is_provider_active());
        assert!(!ConnectionStatus::Disconnecting.is_provider_active());
    }

    #[test]
    fn test_as_str_all_variants() {
        assert_eq!(ConnectionStatus::Invalid.as_str(), "invalid");
        assert_eq!(ConnectionStatus::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectionStatus::Connecting.as_str(), "connecting");
        assert_eq!(ConnectionStatus::Connected.as_str(), "connected");
        assert_eq!(ConnectionStatus::Reasserting.as_str(), "reasserting");
        assert_eq!(ConnectionStatus::Disconnecting.as_str(), "disconnecting");
    }
}
