//! VPN lifecycle reducer
//!
//! Single owner of the tunnel lifecycle state. Consumes dispatched user
//! actions, effect completions, and observer status events, and emits the
//! effect commands to run next. All mutation goes through
//! [`VpnReducerState::reduce`], which the coordinator calls from one task,
//! so the single-writer invariant on app state lives here.
//!
//! Invariants:
//! - At most one lifecycle-mutating effect is in flight at any time. New
//!   actions queue behind it and drain strictly in arrival order, so a stop
//!   requested while a start is in flight is still honored, never dropped.
//! - Status events are observational: they update the connection status
//!   unconditionally and are not subject to the single-in-flight rule.
//! - An effect completion that does not match the in-flight marker is a
//!   broken invariant upstream and aborts rather than silently continuing.

use std::collections::VecDeque;

use crate::notifier::{self, NotifierMessage};

use super::provider::ConfigUpdateKind;
use super::status::ConnectionStatus;
use super::{ProviderError, ProviderMessageError};

/// Lifecycle state of the tunnel provider configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    /// Nothing is known yet; no load has completed.
    Unknown,
    /// A configuration load is in progress.
    Loading,
    /// Configuration state is known (possibly: no configuration exists).
    Loaded,
    /// A start flow is in progress.
    Starting,
    /// The tunnel extension was started by us.
    Started,
    /// A stop was requested. Left only on an observed status transition,
    /// since the platform gives no stop completion signal.
    Stopping,
}

/// User- or system-initiated actions dispatched to the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VpnAction {
    /// Load the persisted configurations and adopt one.
    LoadConfigs,
    /// Start the tunnel, creating and persisting a configuration if none
    /// exists yet.
    StartTunnel,
    /// Stop the tunnel.
    StopTunnel,
    /// Delete the persisted configuration.
    RemoveConfig,
    /// Exchange one message with the provider process. Not
    /// lifecycle-mutating: runs immediately, bypassing the pending queue.
    SendMessage(Vec<u8>),
}

/// Terminal results of lifecycle effects, funneled back to the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectOutcome<I> {
    LoadAllDone(Result<Vec<I>, ProviderError>),
    /// A fresh configuration was made, saved and loaded.
    ConfigCreated(Result<I, ProviderError>),
    ConfigUpdated,
    SavedAndLoaded(Result<(), ProviderError>),
    StartFinished(Result<(), ProviderError>),
    /// The stop request was issued. Not a completion: termination shows up
    /// later as a status transition.
    StopIssued,
    Removed(Result<(), ProviderError>),
    MessageFinished(Result<(I, Vec<u8>), ProviderMessageError>),
}

/// Events carried by the app's single coordination channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TunnelEvent<I> {
    Action(VpnAction),
    /// Republished by the status observer; carries the live status read at
    /// delivery time.
    StatusChanged(ConnectionStatus),
    Effect(EffectOutcome<I>),
}

/// Commands the reducer asks the coordinator to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectCommand<I> {
    LoadAll,
    /// Make a fresh configuration, then save and load it.
    CreateConfig,
    UpdateConfig { instance: I, kind: ConfigUpdateKind },
    SaveAndLoad { instance: I },
    Start { instance: I },
    Stop { instance: I },
    Remove { instance: I },
    SendMessage { instance: I, data: Vec<u8> },
    /// Post a cross-process notifier message.
    Notify { message: NotifierMessage },
}

/// Which composite flow the in-flight effect belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Load,
    Start,
    Stop,
    Remove,
}

/// The lifecycle effect currently awaiting completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    LoadAll,
    CreateConfig,
    UpdateConfig,
    SaveAndLoad,
    Start,
    Stop,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    flow: Flow,
    step: Step,
}

/// Redux-style state container for the tunnel lifecycle.
#[derive(Debug)]
pub struct VpnReducerState<I> {
    provider: Option<I>,
    provider_state: ProviderState,
    status: ConnectionStatus,
    pending: VecDeque<VpnAction>,
    in_flight: Option<InFlight>,
    last_error: Option<ProviderError>,
    last_message: Option<Result<(I, Vec<u8>), ProviderMessageError>>,
}

impl<I: Clone + PartialEq> Default for VpnReducerState<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Clone + PartialEq> VpnReducerState<I> {
    pub fn new() -> Self {
        Self {
            provider: None,
            provider_state: ProviderState::Unknown,
            status: ConnectionStatus::Invalid,
            pending: VecDeque::new(),
            in_flight: None,
            last_error: None,
            last_message: None,
        }
    }

    /// The current authoritative provider instance, if one is loaded.
    pub fn provider(&self) -> Option<&I> {
        self.provider.as_ref()
    }

    pub fn provider_state(&self) -> ProviderState {
        self.provider_state
    }

    /// Last observed raw connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Whether a lifecycle effect is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Error of the most recently failed lifecycle effect, if any.
    pub fn last_error(&self) -> Option<&ProviderError> {
        self.last_error.as_ref()
    }

    /// Result of the most recent provider message exchange, if any.
    pub fn last_message(&self) -> Option<&Result<(I, Vec<u8>), ProviderMessageError>> {
        self.last_message.as_ref()
    }

    /// Apply one event and return the effect commands to execute next.
    pub fn reduce(&mut self, event: TunnelEvent<I>) -> Vec<EffectCommand<I>> {
        let mut out = Vec::new();
        match event {
            // Messaging is not lifecycle-mutating: dispatch immediately,
            // bypassing the pending queue and the in-flight slot.
            TunnelEvent::Action(VpnAction::SendMessage(data)) => {
                self.begin_message(data, &mut out);
            }
            TunnelEvent::Action(action) => {
                self.pending.push_back(action);
                self.drain(&mut out);
            }
            TunnelEvent::StatusChanged(status) => {
                if self.status != status {
                    log::info!(
                        "tunnel status {} -> {}",
                        self.status.as_str(),
                        status.as_str()
                    );
                }
                self.status = status;
                // Reconcile externally-driven transitions only while no flow
                // is in progress, so they cannot corrupt an in-flight flow.
                if self.in_flight.is_none() {
                    self.reconcile_status(status);
                }
            }
            TunnelEvent::Effect(outcome) => {
                self.on_effect(outcome, &mut out);
                self.drain(&mut out);
            }
        }
        out
    }

    /// Begin queued actions until one occupies the in-flight slot or the
    /// queue runs dry. Strict arrival order.
    fn drain(&mut self, out: &mut Vec<EffectCommand<I>>) {
        while self.in_flight.is_none() {
            match self.pending.pop_front() {
                Some(action) => self.begin(action, out),
                None => break,
            }
        }
    }

    fn begin(&mut self, action: VpnAction, out: &mut Vec<EffectCommand<I>>) {
        match action {
            VpnAction::LoadConfigs => {
                self.provider_state = ProviderState::Loading;
                self.in_flight = Some(InFlight {
                    flow: Flow::Load,
                    step: Step::LoadAll,
                });
                out.push(EffectCommand::LoadAll);
            }
            VpnAction::StartTunnel => match self.provider.clone() {
                Some(instance) => {
                    self.provider_state = ProviderState::Starting;
                    self.in_flight = Some(InFlight {
                        flow: Flow::Start,
                        step: Step::UpdateConfig,
                    });
                    out.push(EffectCommand::UpdateConfig {
                        instance,
                        kind: ConfigUpdateKind::StartVpn,
                    });
                }
                // No configuration yet: load first, adopting or creating one.
                None => {
                    self.provider_state = ProviderState::Loading;
                    self.in_flight = Some(InFlight {
                        flow: Flow::Start,
                        step: Step::LoadAll,
                    });
                    out.push(EffectCommand::LoadAll);
                }
            },
            VpnAction::StopTunnel => match self.provider.clone() {
                Some(instance) => {
                    self.provider_state = ProviderState::Stopping;
                    self.in_flight = Some(InFlight {
                        flow: Flow::Stop,
                        step: Step::UpdateConfig,
                    });
                    out.push(EffectCommand::UpdateConfig {
                        instance,
                        kind: ConfigUpdateKind::StopVpn,
                    });
                }
                None => {
                    log::warn!("stop requested with no provider configuration loaded");
                }
            },
            VpnAction::RemoveConfig => match self.provider.clone() {
                Some(instance) => {
                    self.in_flight = Some(InFlight {
                        flow: Flow::Remove,
                        step: Step::Remove,
                    });
                    out.push(EffectCommand::Remove { instance });
                }
                None => {
                    log::warn!("remove requested with no provider configuration loaded");
                }
            },
            VpnAction::SendMessage(data) => self.begin_message(data, out),
        }
    }

    fn begin_message(&mut self, data: Vec<u8>, out: &mut Vec<EffectCommand<I>>) {
        match self.provider.clone() {
            Some(instance) => out.push(EffectCommand::SendMessage { instance, data }),
            None => {
                log::warn!("provider message dropped, no configuration loaded");
            }
        }
    }

    fn on_effect(&mut self, outcome: EffectOutcome<I>, out: &mut Vec<EffectCommand<I>>) {
        match outcome {
            EffectOutcome::MessageFinished(result) => {
                if let Err(err) = &result {
                    log::warn!("provider message failed: {}", err);
                }
                self.last_message = Some(result);
            }
            EffectOutcome::LoadAllDone(result) => {
                let flight = self.take_step(Step::LoadAll);
                match result {
                    Ok(instances) => {
                        log::info!("provider load finished, {} configuration(s)", instances.len());
                        match instances.into_iter().next() {
                            Some(first) => {
                                // Exactly one instance is authoritative; the
                                // first persisted configuration wins.
                                self.provider = Some(first);
                                self.continue_after_load(flight, out);
                            }
                            None => match flight.flow {
                                Flow::Load => {
                                    self.provider = None;
                                    self.provider_state = ProviderState::Loaded;
                                }
                                Flow::Start => {
                                    self.in_flight = Some(InFlight {
                                        flow: Flow::Start,
                                        step: Step::CreateConfig,
                                    });
                                    out.push(EffectCommand::CreateConfig);
                                }
                                _ => self.invariant_violated("load-all completion", flight),
                            },
                        }
                    }
                    Err(err) => self.fail(flight, err),
                }
            }
            EffectOutcome::ConfigCreated(result) => {
                let flight = self.take_step(Step::CreateConfig);
                match result {
                    Ok(instance) => {
                        log::info!("new tunnel configuration persisted");
                        self.provider = Some(instance.clone());
                        self.provider_state = ProviderState::Starting;
                        self.in_flight = Some(InFlight {
                            flow: Flow::Start,
                            step: Step::UpdateConfig,
                        });
                        out.push(EffectCommand::UpdateConfig {
                            instance,
                            kind: ConfigUpdateKind::StartVpn,
                        });
                    }
                    Err(err) => self.fail(flight, err),
                }
            }
            EffectOutcome::ConfigUpdated => {
                let flight = self.take_step(Step::UpdateConfig);
                let instance = self.expect_provider();
                self.in_flight = Some(InFlight {
                    flow: flight.flow,
                    step: Step::SaveAndLoad,
                });
                out.push(EffectCommand::SaveAndLoad { instance });
            }
            EffectOutcome::SavedAndLoaded(result) => {
                let flight = self.take_step(Step::SaveAndLoad);
                match result {
                    Ok(()) => {
                        let instance = self.expect_provider();
                        match flight.flow {
                            Flow::Start => {
                                self.in_flight = Some(InFlight {
                                    flow: Flow::Start,
                                    step: Step::Start,
                                });
                                out.push(EffectCommand::Start { instance });
                            }
                            Flow::Stop => {
                                self.in_flight = Some(InFlight {
                                    flow: Flow::Stop,
                                    step: Step::Stop,
                                });
                                out.push(EffectCommand::Stop { instance });
                            }
                            _ => self.invariant_violated("save-and-load completion", flight),
                        }
                    }
                    Err(err) => self.fail(flight, err),
                }
            }
            EffectOutcome::StartFinished(result) => {
                let flight = self.take_step(Step::Start);
                match result {
                    Ok(()) => {
                        log::info!("tunnel start acknowledged");
                        self.provider_state = ProviderState::Started;
                        // Tell the extension the container considers the
                        // tunnel started.
                        out.push(EffectCommand::Notify {
                            message: notifier::START_VPN,
                        });
                    }
                    Err(err) => self.fail(flight, err),
                }
            }
            EffectOutcome::StopIssued => {
                let _flight = self.take_step(Step::Stop);
                // Remain Stopping: completion is inferred from a later
                // status transition, never from the stop request itself.
                log::info!("tunnel stop issued, awaiting status transition");
            }
            EffectOutcome::Removed(result) => {
                let flight = self.take_step(Step::Remove);
                match result {
                    Ok(()) => {
                        log::info!("tunnel configuration removed");
                        self.provider = None;
                        self.provider_state = ProviderState::Unknown;
                    }
                    Err(err) => self.fail(flight, err),
                }
            }
        }
    }

    fn continue_after_load(&mut self, flight: InFlight, out: &mut Vec<EffectCommand<I>>) {
        match flight.flow {
            Flow::Load => {
                self.provider_state = ProviderState::Loaded;
            }
            Flow::Start => {
                let instance = self.expect_provider();
                self.provider_state = ProviderState::Starting;
                self.in_flight = Some(InFlight {
                    flow: Flow::Start,
                    step: Step::UpdateConfig,
                });
                out.push(EffectCommand::UpdateConfig {
                    instance,
                    kind: ConfigUpdateKind::StartVpn,
                });
            }
            _ => self.invariant_violated("load-all completion", flight),
        }
    }

    /// Reconcile lifecycle state from an externally-driven status change.
    /// Called only while no effect is in flight.
    fn reconcile_status(&mut self, status: ConnectionStatus) {
        match (self.provider_state, status) {
            // Stop completion: the only signal the platform gives.
            (ProviderState::Stopping, ConnectionStatus::Disconnected)
            | (ProviderState::Stopping, ConnectionStatus::Invalid) => {
                log::info!("tunnel stop completed");
                self.provider_state = ProviderState::Loaded;
            }
            // The extension exited without us asking.
            (ProviderState::Started, ConnectionStatus::Disconnected)
            | (ProviderState::Started, ConnectionStatus::Invalid) => {
                log::warn!("tunnel exited externally");
                self.provider_state = ProviderState::Loaded;
            }
            // The platform started the tunnel on demand.
            (ProviderState::Loaded, ConnectionStatus::Connecting)
            | (ProviderState::Loaded, ConnectionStatus::Connected)
            | (ProviderState::Loaded, ConnectionStatus::Reasserting) => {
                log::info!("tunnel started externally");
                self.provider_state = ProviderState::Started;
            }
            _ => {}
        }
    }

    /// Take the in-flight marker, aborting on a mismatch: an unexpected
    /// completion means a broken invariant upstream.
    fn take_step(&mut self, expected: Step) -> InFlight {
        match self.in_flight.take() {
            Some(flight) if flight.step == expected => flight,
            Some(flight) => panic!(
                "effect completion mismatch: expected {:?}, in flight {:?}",
                expected, flight
            ),
            None => panic!(
                "effect completion {:?} arrived with no effect in flight",
                expected
            ),
        }
    }

    fn expect_provider(&self) -> I {
        self.provider
            .clone()
            .unwrap_or_else(|| panic!("lifecycle flow running without a provider instance"))
    }

    fn invariant_violated(&self, what: &str, flight: InFlight) -> ! {
        panic!("{} does not belong to flow {:?}", what, flight.flow)
    }

    fn fail(&mut self, flight: InFlight, err: ProviderError) {
        log::error!("{:?} flow failed at {:?}: {}", flight.flow, flight.step, err);
        self.last_error = Some(err);
        self.provider_state = match flight.flow {
            Flow::Load => ProviderState::Unknown,
            Flow::Start => {
                if self.provider.is_some() {
                    ProviderState::Loaded
                } else {
                    ProviderState::Unknown
                }
            }
            // The tunnel is presumably still running.
            Flow::Stop => ProviderState::Started,
            Flow::Remove => ProviderState::Loaded,
        };
    }
}
