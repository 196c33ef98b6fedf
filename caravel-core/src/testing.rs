//! In-memory platform service for tests
//!
//! [`FakeVpnService`] implements [`VpnServiceApi`] against an in-memory
//! configuration store, with the knobs tests need: scriptable failures,
//! manual start gating, status injection, and a call log. Pairing it with
//! [`crate::tunnel::ProviderAdapter`] gives a fully in-memory provider
//! manager.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::tunnel::service::{
    ConfigId, ConfigRecord, OsError, RawLoadAllResult, VpnServiceApi,
};
use crate::tunnel::status::ConnectionStatus;

const STATUS_CHANNEL_CAPACITY: usize = 16;

#[derive(Default)]
struct FakeState {
    store: HashMap<ConfigId, ConfigRecord>,
    status: HashMap<ConfigId, ConnectionStatus>,
    status_channels: HashMap<ConfigId, broadcast::Sender<()>>,
    calls: Vec<String>,
    load_all_override: Option<RawLoadAllResult>,
    fail_save: Option<OsError>,
    fail_load: Option<OsError>,
    fail_start: Option<OsError>,
    /// None: echo the request. Some(None): deliver no data. Some(Some(..)):
    /// deliver a fixed reply.
    message_reply: Option<Option<Vec<u8>>>,
    manual_start: bool,
    pending_starts: Vec<(ConfigId, oneshot::Sender<Result<(), OsError>>)>,
    last_start_options: Option<Vec<(String, String)>>,
}

/// In-memory stand-in for the platform tunnel service.
#[derive(Default)]
pub struct FakeVpnService {
    state: Mutex<FakeState>,
}

impl FakeVpnService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a configuration directly, as if saved in an earlier run.
    pub fn seed_config(&self, record: ConfigRecord) -> ConfigId {
        let id = ConfigId::next();
        self.state.lock().store.insert(id, record);
        id
    }

    /// Override the next (and subsequent) load-all results with a raw
    /// platform callback shape.
    pub fn set_load_all_result(&self, result: RawLoadAllResult) {
        self.state.lock().load_all_override = Some(result);
    }

    pub fn fail_next_save(&self, err: OsError) {
        self.state.lock().fail_save = Some(err);
    }

    pub fn fail_next_load(&self, err: OsError) {
        self.state.lock().fail_load = Some(err);
    }

    pub fn fail_next_start(&self, err: OsError) {
        self.state.lock().fail_start = Some(err);
    }

    /// Deliver `reply` for subsequent provider messages instead of echoing
    /// the request. `None` reproduces a callback with no response data.
    pub fn set_message_reply(&self, reply: Option<Vec<u8>>) {
        self.state.lock().message_reply = Some(reply);
    }

    /// Make start requests block until released with [`release_start`].
    ///
    /// [`release_start`]: FakeVpnService::release_start
    pub fn hold_starts(&self) {
        self.state.lock().manual_start = true;
    }

    /// Complete the oldest held start request.
    pub fn release_start(&self, result: Result<(), OsError>) {
        let (_, tx) = {
            let mut state = self.state.lock();
            assert!(
                !state.pending_starts.is_empty(),
                "release_start with no start pending"
            );
            state.pending_starts.remove(0)
        };
        let _ = tx.send(result);
    }

    pub fn pending_start_count(&self) -> usize {
        self.state.lock().pending_starts.len()
    }

    /// Set the live status of a configuration and fire its status-change
    /// notification.
    pub fn set_status(&self, id: ConfigId, status: ConnectionStatus) {
        let sender = {
            let mut state = self.state.lock();
            state.status.insert(id, status);
            state.status_channels.get(&id).cloned()
        };
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// The persisted record for `id`, if any.
    pub fn persisted(&self, id: ConfigId) -> Option<ConfigRecord> {
        self.state.lock().store.get(&id).cloned()
    }

    pub fn connection_status_of(&self, id: ConfigId) -> ConnectionStatus {
        self.connection_status(id)
    }

    /// Options passed to the most recent start request.
    pub fn last_start_options(&self) -> Option<Vec<(String, String)>> {
        self.state.lock().last_start_options.clone()
    }

    /// Names of every platform call made, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn record_call(&self, name: &str) {
        self.state.lock().calls.push(name.to_string());
    }

    fn set_status_locked(state: &mut FakeState, id: ConfigId, status: ConnectionStatus) {
        state.status.insert(id, status);
        if let Some(sender) = state.status_channels.get(&id) {
            let _ = sender.send(());
        }
    }
}

#[async_trait]
impl VpnServiceApi for FakeVpnService {
    async fn load_all_configs(&self) -> RawLoadAllResult {
        self.record_call("load_all_configs");
        let state = self.state.lock();
        if let Some(result) = &state.load_all_override {
            return result.clone();
        }
        if state.store.is_empty() {
            // The platform callback delivers neither a list nor an error
            // when nothing exists.
            return (None, None);
        }
        let mut configs: Vec<(ConfigId, ConfigRecord)> = state
            .store
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect();
        configs.sort_by_key(|(id, _)| id.0);
        (Some(configs), None)
    }

    async fn save_config(&self, id: ConfigId, record: &ConfigRecord) -> Result<(), OsError> {
        self.record_call("save_config");
        let mut state = self.state.lock();
        if let Some(err) = state.fail_save.take() {
            return Err(err);
        }
        state.store.insert(id, record.clone());
        Ok(())
    }

    async fn load_config(&self, id: ConfigId) -> Result<ConfigRecord, OsError> {
        self.record_call("load_config");
        let mut state = self.state.lock();
        if let Some(err) = state.fail_load.take() {
            return Err(err);
        }
        state
            .store
            .get(&id)
            .cloned()
            .ok_or_else(|| OsError::Other("no such configuration".to_string()))
    }

    async fn remove_config(&self, id: ConfigId) -> Result<(), OsError> {
        self.record_call("remove_config");
        let mut state = self.state.lock();
        match state.store.remove(&id) {
            Some(_) => Ok(()),
            None => Err(OsError::Other("no such configuration".to_string())),
        }
    }

    async fn set_on_demand(&self, id: ConfigId, enabled: bool) -> Result<(), OsError> {
        self.record_call("set_on_demand");
        let mut state = self.state.lock();
        match state.store.get_mut(&id) {
            Some(record) => {
                record.on_demand_enabled = enabled;
                Ok(())
            }
            None => Err(OsError::Other("no such configuration".to_string())),
        }
    }

    async fn start_tunnel(
        &self,
        id: ConfigId,
        options: &[(String, String)],
    ) -> Result<(), OsError> {
        self.record_call("start_tunnel");
        let gate = {
            let mut state = self.state.lock();
            state.last_start_options = Some(options.to_vec());
            if let Some(err) = state.fail_start.take() {
                return Err(err);
            }
            if state.manual_start {
                let (tx, rx) = oneshot::channel();
                state.pending_starts.push((id, tx));
                Some(rx)
            } else {
                None
            }
        };

        if let Some(rx) = gate {
            match rx.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(_) => return Err(OsError::Other("start gate dropped".to_string())),
            }
        }

        let mut state = self.state.lock();
        Self::set_status_locked(&mut state, id, ConnectionStatus::Connecting);
        Ok(())
    }

    fn stop_tunnel(&self, _id: ConfigId) {
        self.record_call("stop_tunnel");
        // No completion signal and no status change: tests drive the
        // eventual transition with set_status, like the real platform does.
    }

    async fn send_provider_message(
        &self,
        _id: ConfigId,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, OsError> {
        self.record_call("send_provider_message");
        let state = self.state.lock();
        match &state.message_reply {
            None => Ok(Some(data.to_vec())),
            Some(reply) => Ok(reply.clone()),
        }
    }

    fn connection_status(&self, id: ConfigId) -> ConnectionStatus {
        let state = self.state.lock();
        if let Some(status) = state.status.get(&id) {
            *status
        } else if state.store.contains_key(&id) {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Invalid
        }
    }

    fn subscribe_status(&self, id: ConfigId) -> broadcast::Receiver<()> {
        let mut state = self.state.lock();
        state
            .status_channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(STATUS_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}
