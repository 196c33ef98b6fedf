//! Concrete provider adapter
//!
//! Binds [`TunnelProviderManager`] to the raw platform seam
//! ([`VpnServiceApi`]). This is the single place that cleans up the
//! platform's shapes: the three-way enumerate result is normalized here,
//! platform errors are translated into [`ProviderError`], and the
//! on-demand/start ordering rule is enforced so on-demand reconnection can
//! never race an explicit start.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::provider::{
    ConfigUpdateKind, StartOptions, TunnelProviderManager, PROVIDER_BUNDLE_IDENTIFIER,
    SENTINEL_SERVER_ADDRESS,
};
use super::service::{ConfigId, ConfigRecord, OnDemandRule, OsError, VpnServiceApi};
use super::status::ConnectionStatus;
use super::{ProviderError, ProviderMessageError, ProviderResult};

/// Handle to one persisted tunnel configuration.
///
/// Identity is reference-based: two handles are equal iff they wrap the
/// same underlying configuration. The cached snapshot goes stale whenever
/// the persisted store changes; only `load` refreshes it.
#[derive(Debug, Clone)]
pub struct TunnelInstance {
    inner: Arc<InstanceInner>,
}

#[derive(Debug)]
struct InstanceInner {
    id: ConfigId,
    record: Mutex<ConfigRecord>,
}

impl PartialEq for TunnelInstance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TunnelInstance {}

impl TunnelInstance {
    fn new(id: ConfigId, record: ConfigRecord) -> Self {
        Self {
            inner: Arc::new(InstanceInner {
                id,
                record: Mutex::new(record),
            }),
        }
    }

    pub fn config_id(&self) -> ConfigId {
        self.inner.id
    }

    /// Cached (possibly stale) enabled flag.
    pub fn is_enabled(&self) -> bool {
        self.inner.record.lock().enabled
    }

    /// Cached (possibly stale) on-demand flag.
    pub fn is_on_demand_enabled(&self) -> bool {
        self.inner.record.lock().on_demand_enabled
    }

    /// Cached (possibly stale) server address field.
    pub fn server_address(&self) -> String {
        self.inner.record.lock().server_address.clone()
    }

    fn snapshot(&self) -> ConfigRecord {
        self.inner.record.lock().clone()
    }

    fn replace_snapshot(&self, record: ConfigRecord) {
        *self.inner.record.lock() = record;
    }
}

fn translate_os_error(err: OsError) -> ProviderError {
    match err {
        OsError::PermissionDenied => ProviderError::PermissionDenied,
        other => ProviderError::Os(other),
    }
}

/// Tunnel provider manager over a raw platform service.
pub struct ProviderAdapter<S: VpnServiceApi> {
    service: Arc<S>,
}

impl<S: VpnServiceApi> Clone for ProviderAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

impl<S: VpnServiceApi> ProviderAdapter<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }
}

#[async_trait]
impl<S: VpnServiceApi> TunnelProviderManager for ProviderAdapter<S> {
    type Instance = TunnelInstance;

    async fn load_all(&self) -> ProviderResult<Vec<TunnelInstance>> {
        match self.service.load_all_configs().await {
            // An error wins over any partial list: the platform result is
            // not trusted once it reports a failure.
            (_, Some(err)) => Err(translate_os_error(err)),
            (Some(configs), None) => {
                log::debug!("loaded {} persisted tunnel configuration(s)", configs.len());
                Ok(configs
                    .into_iter()
                    .map(|(id, record)| TunnelInstance::new(id, record))
                    .collect())
            }
            // Both absent: no configurations exist and nothing failed.
            (None, None) => {
                log::debug!("no persisted tunnel configurations");
                Ok(Vec::new())
            }
        }
    }

    fn make(&self) -> TunnelInstance {
        TunnelInstance::new(
            ConfigId::next(),
            ConfigRecord {
                bundle_identifier: PROVIDER_BUNDLE_IDENTIFIER.to_string(),
                server_address: SENTINEL_SERVER_ADDRESS.to_string(),
                enabled: false,
                on_demand_enabled: false,
                on_demand_rules: Vec::new(),
            },
        )
    }

    async fn save(&self, instance: &TunnelInstance) -> ProviderResult<()> {
        let record = instance.snapshot();
        self.service
            .save_config(instance.config_id(), &record)
            .await
            .map_err(translate_os_error)
    }

    async fn load(&self, instance: &TunnelInstance) -> ProviderResult<()> {
        let record = self
            .service
            .load_config(instance.config_id())
            .await
            .map_err(translate_os_error)?;
        instance.replace_snapshot(record);
        Ok(())
    }

    async fn remove(&self, instance: &TunnelInstance) -> ProviderResult<()> {
        // The handle keeps its stale snapshot; callers can still inspect it
        // until the next load.
        self.service
            .remove_config(instance.config_id())
            .await
            .map_err(translate_os_error)
    }

    fn update_config(&self, instance: &TunnelInstance, kind: ConfigUpdateKind) {
        let mut record = instance.inner.record.lock();
        match kind {
            ConfigUpdateKind::StartVpn => {
                record.enabled = true;
                if record.on_demand_rules.is_empty() {
                    record.on_demand_rules.push(OnDemandRule::AlwaysConnect);
                }
                // Re-enabled only after a successful start; see `start`.
                record.on_demand_enabled = false;
            }
            ConfigUpdateKind::StopVpn => {
                record.on_demand_enabled = false;
            }
        }
    }

    async fn start(&self, instance: &TunnelInstance, options: &StartOptions) -> ProviderResult<()> {
        let id = instance.config_id();
        self.service
            .start_tunnel(id, options.pairs())
            .await
            .map_err(|e| {
                log::error!("tunnel start failed: {}", e);
                translate_os_error(e)
            })?;

        // Start succeeded: on-demand reconnection can no longer race the
        // explicit start, so enable it now.
        self.service
            .set_on_demand(id, true)
            .await
            .map_err(translate_os_error)?;
        instance.inner.record.lock().on_demand_enabled = true;
        log::info!("tunnel started, on-demand enabled");
        Ok(())
    }

    fn stop(&self, instance: &TunnelInstance) {
        log::info!("tunnel stop requested");
        self.service.stop_tunnel(instance.config_id());
    }

    async fn send_message(
        &self,
        instance: &TunnelInstance,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, ProviderMessageError> {
        let id = instance.config_id();
        let status = self.service.connection_status(id);
        if !status.is_provider_active() {
            log::debug!("provider message refused, status is {}", status.as_str());
            return Err(ProviderMessageError::NotActive);
        }

        match self.service.send_provider_message(id, &data).await {
            Err(err) => Err(ProviderMessageError::Transport(translate_os_error(err))),
            Ok(None) => Err(ProviderMessageError::EmptyResponse),
            Ok(Some(reply)) if reply.is_empty() => Err(ProviderMessageError::EmptyResponse),
            Ok(Some(reply)) => Ok(reply),
        }
    }

    fn connection_status(&self, instance: &TunnelInstance) -> ConnectionStatus {
        self.service.connection_status(instance.config_id())
    }

    fn subscribe_status(&self, instance: &TunnelInstance) -> broadcast::Receiver<()> {
        self.service.subscribe_status(instance.config_id())
    }
}
