//! Effect driver
//!
//! Wires the reducer to a concrete provider manager: owns the single
//! coordination channel, executes the reducer's effect commands on spawned
//! tasks, and funnels every terminal result back into the channel. Platform
//! calls run wherever the runtime puts them; their results re-enter the
//! reducer through this one channel, which is what preserves the
//! single-writer invariant on app state.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

use crate::notifier::Notifier;

use super::effects;
use super::observer::ConnectionStatusObserver;
use super::provider::TunnelProviderManager;
use super::reducer::{EffectCommand, EffectOutcome, TunnelEvent, VpnAction, VpnReducerState};
use super::status::TunnelConnectedStatus;

/// Cloneable dispatch handle onto the coordination channel.
pub struct VpnHandle<I> {
    tx: UnboundedSender<TunnelEvent<I>>,
}

impl<I> Clone for VpnHandle<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<I> VpnHandle<I> {
    /// Dispatch an action. Delivery is best-effort: once the coordinator is
    /// gone there is nobody left to act on it.
    pub fn dispatch(&self, action: VpnAction) {
        let _ = self.tx.send(TunnelEvent::Action(action));
    }

    pub fn load_configs(&self) {
        self.dispatch(VpnAction::LoadConfigs);
    }

    pub fn start_tunnel(&self) {
        self.dispatch(VpnAction::StartTunnel);
    }

    pub fn stop_tunnel(&self) {
        self.dispatch(VpnAction::StopTunnel);
    }

    pub fn remove_config(&self) {
        self.dispatch(VpnAction::RemoveConfig);
    }

    pub fn send_message(&self, data: Vec<u8>) {
        self.dispatch(VpnAction::SendMessage(data));
    }
}

/// Coordinator binding reducer, observer, effect library and notifier.
pub struct TunnelCoordinator<M: TunnelProviderManager> {
    manager: Arc<M>,
    notifier: Arc<dyn Notifier>,
    tx: UnboundedSender<TunnelEvent<M::Instance>>,
    rx: UnboundedReceiver<TunnelEvent<M::Instance>>,
    state: VpnReducerState<M::Instance>,
    observer: ConnectionStatusObserver<M>,
    status_tx: watch::Sender<TunnelConnectedStatus>,
}

impl<M: TunnelProviderManager> TunnelCoordinator<M> {
    pub fn new(manager: Arc<M>, notifier: Arc<dyn Notifier>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = ConnectionStatusObserver::new(Arc::clone(&manager), tx.clone());
        let (status_tx, _) = watch::channel(TunnelConnectedStatus::NotConnected);
        Self {
            manager,
            notifier,
            tx,
            rx,
            state: VpnReducerState::new(),
            observer,
            status_tx,
        }
    }

    /// Dispatch handle for UI and system callers.
    pub fn handle(&self) -> VpnHandle<M::Instance> {
        VpnHandle {
            tx: self.tx.clone(),
        }
    }

    /// App-facing reduced connection status signal.
    pub fn status_signal(&self) -> watch::Receiver<TunnelConnectedStatus> {
        self.status_tx.subscribe()
    }

    /// Current reducer state, for introspection.
    pub fn state(&self) -> &VpnReducerState<M::Instance> {
        &self.state
    }

    /// Process events for the app's lifetime. The coordinator keeps its own
    /// sender for effect results, so this only returns if the runtime tears
    /// the channel down.
    pub async fn run(mut self) {
        while self.step().await {}
        log::info!("tunnel coordinator finished");
    }

    /// Process one event. Returns false once the channel is closed.
    pub async fn step(&mut self) -> bool {
        match self.rx.recv().await {
            Some(event) => {
                self.process(event);
                true
            }
            None => false,
        }
    }

    fn process(&mut self, event: TunnelEvent<M::Instance>) {
        let previous = self.state.provider().cloned();
        let commands = self.state.reduce(event);

        // The observer must track the authoritative instance: rebind whenever
        // the reducer replaced it.
        if let Some(current) = self.state.provider().cloned() {
            if previous.as_ref() != Some(&current) {
                self.observer.set_instance(current);
            }
        }

        self.status_tx.send_if_modified(|published| {
            let reduced = self.state.status().reduced();
            if *published != reduced {
                *published = reduced;
                true
            } else {
                false
            }
        });

        for command in commands {
            self.execute(command);
        }
    }

    fn execute(&self, command: EffectCommand<M::Instance>) {
        let manager = Arc::clone(&self.manager);
        let tx = self.tx.clone();
        match command {
            EffectCommand::LoadAll => {
                tokio::spawn(async move {
                    let result = effects::load_all_effect(&*manager).await;
                    let _ = tx.send(TunnelEvent::Effect(EffectOutcome::LoadAllDone(result)));
                });
            }
            EffectCommand::CreateConfig => {
                tokio::spawn(async move {
                    let instance = manager.make();
                    let result = effects::save_and_load_effect(&*manager, &instance)
                        .await
                        .map(|()| instance);
                    let _ = tx.send(TunnelEvent::Effect(EffectOutcome::ConfigCreated(result)));
                });
            }
            EffectCommand::UpdateConfig { instance, kind } => {
                tokio::spawn(async move {
                    effects::update_config_effect(&*manager, &instance, kind).await;
                    let _ = tx.send(TunnelEvent::Effect(EffectOutcome::ConfigUpdated));
                });
            }
            EffectCommand::SaveAndLoad { instance } => {
                tokio::spawn(async move {
                    let result = effects::save_and_load_effect(&*manager, &instance).await;
                    let _ = tx.send(TunnelEvent::Effect(EffectOutcome::SavedAndLoaded(result)));
                });
            }
            EffectCommand::Start { instance } => {
                tokio::spawn(async move {
                    let result = effects::start_effect(&*manager, &instance).await;
                    let _ = tx.send(TunnelEvent::Effect(EffectOutcome::StartFinished(result)));
                });
            }
            EffectCommand::Stop { instance } => {
                tokio::spawn(async move {
                    effects::stop_effect(&*manager, &instance).await;
                    let _ = tx.send(TunnelEvent::Effect(EffectOutcome::StopIssued));
                });
            }
            EffectCommand::Remove { instance } => {
                tokio::spawn(async move {
                    let result = effects::remove_effect(&*manager, &instance).await;
                    let _ = tx.send(TunnelEvent::Effect(EffectOutcome::Removed(result)));
                });
            }
            EffectCommand::SendMessage { instance, data } => {
                tokio::spawn(async move {
                    let result = effects::send_message_effect(&*manager, &instance, data).await;
                    let _ = tx.send(TunnelEvent::Effect(EffectOutcome::MessageFinished(result)));
                });
            }
            EffectCommand::Notify { message } => {
                self.notifier.post(message);
            }
        }
    }
}
