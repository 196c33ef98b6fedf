//! User-facing error messages
//!
//! Converts tunnel provider errors into messages suitable for display.
//! Permission-denied gets a differentiated message: the user has to resolve
//! a system-level VPN configuration conflict themselves, and a generic
//! "something went wrong" would leave them stuck.

use super::{ProviderError, ProviderMessageError};

/// Convert a provider error into a user-facing message.
pub fn user_friendly_error(error: &ProviderError) -> String {
    match error {
        ProviderError::PermissionDenied => {
            "Caravel is not allowed to change the VPN configuration.\n\nAnother VPN profile may be conflicting with Caravel. Remove or disable other VPN profiles in your system settings, then try again.".to_string()
        }
        ProviderError::Os(e) => {
            format!("The VPN service reported an error.\n\n{}", e)
        }
    }
}

/// Convert a provider message error into a user-facing message.
pub fn user_friendly_message_error(error: &ProviderMessageError) -> String {
    match error {
        ProviderMessageError::NotActive => {
            "The VPN is not running.\n\nConnect first, then try again.".to_string()
        }
        ProviderMessageError::Transport(e) => user_friendly_error(e),
        ProviderMessageError::EmptyResponse => {
            "The VPN service did not respond.\n\nPlease try reconnecting.".to_string()
        }
    }
}

/// Convert an error to a short status message (for status bars)
pub fn short_error(error: &ProviderError) -> &'static str {
    match error {
        ProviderError::PermissionDenied => "VPN permission denied",
        ProviderError::Os(_) => "VPN service error",
    }
}
