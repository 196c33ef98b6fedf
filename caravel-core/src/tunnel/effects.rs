//! Lifecycle effect library
//!
//! Each lifecycle operation is an independent, composable asynchronous unit
//! of work: it produces exactly one terminal result, never blocks its
//! caller, and never retries internally. Retry policy, if any, is the
//! reducer's business, expressed as a re-dispatch of the same action.

use super::provider::{ConfigUpdateKind, StartOptions, TunnelProviderManager};
use super::{ProviderMessageError, ProviderResult};

/// Enumerate all persisted configurations.
///
/// The empty-store case is already normalized to an empty success list by
/// the provider layer; this wrapper exists so loading composes like every
/// other lifecycle operation.
pub async fn load_all_effect<M: TunnelProviderManager>(
    manager: &M,
) -> ProviderResult<Vec<M::Instance>> {
    manager.load_all().await
}

/// Apply an in-memory configuration update. Synchronous mutation wrapped as
/// an effect for composition uniformity; always succeeds.
pub async fn update_config_effect<M: TunnelProviderManager>(
    manager: &M,
    instance: &M::Instance,
    kind: ConfigUpdateKind,
) {
    manager.update_config(instance, kind);
}

/// Persist the instance, then refresh it from the store.
///
/// Strictly sequential: the load is attempted only after the save
/// succeeded, and either step's failure short-circuits with that step's
/// error.
pub async fn save_and_load_effect<M: TunnelProviderManager>(
    manager: &M,
    instance: &M::Instance,
) -> ProviderResult<()> {
    manager.save(instance).await?;
    manager.load(instance).await
}

/// Request a tunnel start, marked as initiated by the container app.
pub async fn start_effect<M: TunnelProviderManager>(
    manager: &M,
    instance: &M::Instance,
) -> ProviderResult<()> {
    manager
        .start(instance, &StartOptions::container_initiated())
        .await
}

/// Issue a tunnel stop request.
///
/// Always resolves: the platform gives no completion signal, so resolution
/// means "request issued", not "fully stopped". Actual termination is
/// observable only through a later status transition.
pub async fn stop_effect<M: TunnelProviderManager>(manager: &M, instance: &M::Instance) {
    manager.stop(instance);
}

/// Delete the persisted configuration.
pub async fn remove_effect<M: TunnelProviderManager>(
    manager: &M,
    instance: &M::Instance,
) -> ProviderResult<()> {
    manager.remove(instance).await
}

/// Exchange one message with the provider process.
///
/// The returned pair includes the instance the message was sent through, so
/// the caller can correlate the response with the instance that was live at
/// call time even if the current instance has been replaced since.
pub async fn send_message_effect<M: TunnelProviderManager>(
    manager: &M,
    instance: &M::Instance,
    data: Vec<u8>,
) -> Result<(M::Instance, Vec<u8>), ProviderMessageError> {
    let reply = manager.send_message(instance, data).await?;
    Ok((instance.clone(), reply))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tunnel::adapter::ProviderAdapter;
    use crate::tunnel::service::OsError;
    use crate::tunnel::status::ConnectionStatus;
    use crate::tunnel::ProviderError;
    use crate::testing::FakeVpnService;

    fn adapter() -> ProviderAdapter<FakeVpnService> {
        ProviderAdapter::new(Arc::new(FakeVpnService::new()))
    }

    #[tokio::test]
    async fn test_save_and_load_runs_both_steps_in_order() {
        let adapter = adapter();
        let fake = Arc::clone(adapter.service());
        let instance = adapter.make();

        save_and_load_effect(&adapter, &instance).await.unwrap();

        let calls = fake.calls();
        let save_at = calls.iter().position(|c| c == "save_config").unwrap();
        let load_at = calls.iter().position(|c| c == "load_config").unwrap();
        assert!(save_at < load_at);
    }

    #[tokio::test]
    async fn test_save_and_load_short_circuits_on_save_failure() {
        let adapter = adapter();
        let fake = Arc::clone(adapter.service());
        let instance = adapter.make();

        fake.fail_next_save(OsError::PermissionDenied);
        let result = save_and_load_effect(&adapter, &instance).await;

        assert_eq!(result, Err(ProviderError::PermissionDenied));
        assert!(!fake.calls().iter().any(|c| c == "load_config"));
    }

    #[tokio::test]
    async fn test_save_and_load_surfaces_load_failure() {
        let adapter = adapter();
        let fake = Arc::clone(adapter.service());
        let instance = adapter.make();

        fake.fail_next_load(OsError::Other("store unavailable".to_string()));
        let result = save_and_load_effect(&adapter, &instance).await;

        assert_eq!(
            result,
            Err(ProviderError::Os(OsError::Other(
                "store unavailable".to_string()
            )))
        );
        // The save still happened.
        assert!(fake.calls().iter().any(|c| c == "save_config"));
    }

    #[tokio::test]
    async fn test_start_effect_passes_container_marker() {
        let adapter = adapter();
        let fake = Arc::clone(adapter.service());
        let instance = adapter.make();
        adapter.save(&instance).await.unwrap();

        start_effect(&adapter, &instance).await.unwrap();

        assert_eq!(
            fake.last_start_options(),
            Some(vec![(
                "caravel.start-source".to_string(),
                "container".to_string()
            )])
        );
    }

    #[tokio::test]
    async fn test_stop_effect_resolves_without_completion_signal() {
        let adapter = adapter();
        let fake = Arc::clone(adapter.service());
        let instance = adapter.make();
        adapter.save(&instance).await.unwrap();
        fake.set_status(instance.config_id(), ConnectionStatus::Connected);

        stop_effect(&adapter, &instance).await;

        assert!(fake.calls().iter().any(|c| c == "stop_tunnel"));
        // Stop issued, not stop completed: the status is untouched until the
        // platform reports a transition.
        assert_eq!(
            fake.connection_status_of(instance.config_id()),
            ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_send_message_effect_returns_originating_instance() {
        let adapter = adapter();
        let fake = Arc::clone(adapter.service());
        let instance = adapter.make();
        adapter.save(&instance).await.unwrap();
        fake.set_status(instance.config_id(), ConnectionStatus::Connected);

        let (echoed, reply) = send_message_effect(&adapter, &instance, b"probe".to_vec())
            .await
            .unwrap();

        assert_eq!(echoed, instance);
        assert_eq!(reply, b"probe".to_vec());
    }
}
