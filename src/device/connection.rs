use std::future::Future;
use std::sync::{Arc, Mutex};
use log::{info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::types::ClientConfig;
use crate::device::constants::make_battery_service_uuid;
use crate::device::dispatch::{ButtonHandler, ErrorHandler, EventDispatcher, StateHandler};
use crate::device::subscriber::CharacteristicSubscriber;
use crate::device::types::{ConnectionState, DeviceIdentity};
use crate::error::PedalError;
use crate::platform::{DeviceFilter, Platform, PlatformSession};

struct Lifecycle {
    state: ConnectionState,
    // Incremented whenever ownership of the lifecycle changes hands. A task
    // holding a stale generation must not mutate state or report transitions.
    generation: u64,
    session_cancel: Option<CancellationToken>,
    supervisor: Option<JoinHandle<()>>,
}

struct ManagerInner {
    platform: Arc<dyn Platform>,
    identity: DeviceIdentity,
    config: ClientConfig,
    dispatcher: Arc<EventDispatcher>,
    lifecycle: Mutex<Lifecycle>,
    // Held across every state mutation plus its report, so handlers observe
    // transitions in the order they happened. Never held across an await.
    transitions: Mutex<()>,
}

/// An established session together with its notification subscriber.
struct ActiveSession {
    session: Arc<dyn PlatformSession>,
    subscriber: CharacteristicSubscriber,
}

impl ActiveSession {
    async fn release(self) {
        self.subscriber.detach().await;
        self.session.close().await;
    }
}

/// Owns the lifecycle of a single logical connection to one pedal device:
/// discovery, connect, disconnect, and reconnect-on-drop. Connectivity is
/// observable through [`ConnectionManager::connection_state`] and the
/// registered state
/// change handlers; button notifications flow to the registered button
/// handlers while a session is up.
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(platform: Arc<dyn Platform>, identity: DeviceIdentity, config: ClientConfig) -> ConnectionManager {
        ConnectionManager {
            inner: Arc::new(ManagerInner {
                platform,
                identity,
                config,
                dispatcher: Arc::new(EventDispatcher::new()),
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    session_cancel: None,
                    supervisor: None,
                }),
                transitions: Mutex::new(()),
            }),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lifecycle.lock().expect("Failed to lock connection lifecycle").state
    }

    pub fn on_button_down(&self, handler: ButtonHandler) {
        self.inner.dispatcher.on_button_down(handler);
    }

    pub fn on_button_up(&self, handler: ButtonHandler) {
        self.inner.dispatcher.on_button_up(handler);
    }

    pub fn on_state_change(&self, handler: StateHandler) {
        self.inner.dispatcher.on_state_change(handler);
    }

    pub fn on_error(&self, handler: ErrorHandler) {
        self.inner.dispatcher.on_error(handler);
    }

    /// Establish a session with the pedal device. A single bounded attempt:
    /// fails with `ConnectTimeout` if the session does not establish within
    /// the configured interval, `PlatformUnavailable` if the host has no
    /// Bluetooth capability, and `UserCancelled` if `disconnect()` is called
    /// while the attempt is still in flight. While an attempt or session
    /// already exists this is a no-op returning Ok.
    pub async fn connect(&self) -> Result<(), PedalError> {
        let (cancel, generation) = {
            let _order = self.inner.transitions.lock().expect("Failed to lock transition order");
            let started = {
                let mut lifecycle = self.inner.lifecycle.lock().expect("Failed to lock connection lifecycle");

                match lifecycle.state {
                    ConnectionState::Disconnected => {
                        let cancel = CancellationToken::new();
                        lifecycle.generation += 1;
                        lifecycle.state = ConnectionState::Connecting;
                        lifecycle.session_cancel = Some(cancel.clone());
                        Some((cancel, lifecycle.generation))
                    },
                    // An attempt or session already exists
                    _ => None,
                }
            };

            match started {
                Some(started) => {
                    self.inner.dispatcher.dispatch_state(ConnectionState::Connecting);
                    started
                },
                None => {
                    return Ok(());
                },
            }
        };

        match establish_session(&self.inner, &cancel).await {
            Ok(active) => {
                match commit_connected(&self.inner, &cancel, generation, active) {
                    Ok(()) => {
                        info!("Device session established");
                        Ok(())
                    },
                    Err(active) => {
                        // disconnect() took over while the session was
                        // establishing; tear it down again
                        active.release().await;
                        Err(PedalError::UserCancelled)
                    },
                }
            },
            Err(err) => {
                let _order = self.inner.transitions.lock().expect("Failed to lock transition order");
                let owned = {
                    let mut lifecycle = self.inner.lifecycle.lock().expect("Failed to lock connection lifecycle");

                    if lifecycle.generation == generation {
                        lifecycle.state = ConnectionState::Disconnected;
                        lifecycle.session_cancel = None;
                        true
                    }
                    else {
                        false
                    }
                };

                if owned {
                    self.inner.dispatcher.dispatch_state(ConnectionState::Disconnected);
                }

                Err(err)
            },
        }
    }

    /// Release the session and all associated subscriptions. Cancels an
    /// in-flight `connect()` and stops any reconnect loop. The session is
    /// fully released before this returns; no button handler runs afterwards.
    /// Safe to call in any state.
    pub async fn disconnect(&self) {
        let (generation, supervisor) = {
            let mut lifecycle = self.inner.lifecycle.lock().expect("Failed to lock connection lifecycle");
            lifecycle.generation += 1;

            if let Some(cancel) = lifecycle.session_cancel.take() {
                // Cancel under the lock so an establishing connect() cannot
                // commit after this point
                cancel.cancel();
            }

            (lifecycle.generation, lifecycle.supervisor.take())
        };

        if let Some(supervisor) = supervisor {
            info!("Waiting for connection supervisor to stop");
            supervisor.await.expect("Failed to join connection supervisor task");
            info!("Connection supervisor stopped");
        }

        let _order = self.inner.transitions.lock().expect("Failed to lock transition order");
        let was = {
            let mut lifecycle = self.inner.lifecycle.lock().expect("Failed to lock connection lifecycle");

            if lifecycle.generation == generation {
                let was = lifecycle.state;
                lifecycle.state = ConnectionState::Disconnected;
                was
            }
            else {
                // A newer connect() took over in the meantime
                ConnectionState::Disconnected
            }
        };

        if was != ConnectionState::Disconnected {
            self.inner.dispatcher.dispatch_state(ConnectionState::Disconnected);
        }
    }
}

impl Drop for ConnectionManager {
    // Request teardown of whatever is still running. Call disconnect() for a
    // deterministic release; tasks cancelled here finish on their own time.
    fn drop(&mut self) {
        let lifecycle = self.inner.lifecycle.lock().expect("Failed to lock connection lifecycle");

        if let Some(cancel) = &lifecycle.session_cancel {
            cancel.cancel();
        }
    }
}

/// Race `fut` against cancellation and the attempt deadline.
async fn bounded<T>(
    cancel: &CancellationToken,
    deadline: Instant,
    timeout: Duration,
    fut: impl Future<Output = Result<T, PedalError>>,
) -> Result<T, PedalError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            Err(PedalError::UserCancelled)
        },
        result = timeout_at(deadline, fut) => match result {
            Ok(result) => result,
            Err(_) => Err(PedalError::ConnectTimeout { after: timeout }),
        },
    }
}

/// Run discovery, connect and subscription under a single deadline. On any
/// failure past the connect stage the session is closed before returning.
async fn establish_session(
    inner: &Arc<ManagerInner>,
    cancel: &CancellationToken,
) -> Result<ActiveSession, PedalError> {
    let timeout = inner.config.connect_timeout();
    let deadline = Instant::now() + timeout;

    let filter = DeviceFilter {
        service: inner.identity.service,
        optional_services: vec![make_battery_service_uuid()],
    };

    info!("Requesting device access...");
    let device = bounded(cancel, deadline, timeout, inner.platform.request_device(&filter)).await?;

    let session = bounded(cancel, deadline, timeout, device.connect()).await?;

    let attach = CharacteristicSubscriber::attach(
        Arc::clone(&session),
        inner.identity,
        Arc::clone(&inner.dispatcher),
        cancel,
    );

    match bounded(cancel, deadline, timeout, attach).await {
        Ok(subscriber) => Ok(ActiveSession { session, subscriber }),
        Err(err) => {
            session.close().await;
            Err(err)
        },
    }
}

/// Move the lifecycle to `Connected` and hand the session to a supervisor
/// task. Fails by giving the session back if `disconnect()` took over while
/// it was establishing.
fn commit_connected(
    inner: &Arc<ManagerInner>,
    cancel: &CancellationToken,
    generation: u64,
    active: ActiveSession,
) -> Result<(), ActiveSession> {
    let _order = inner.transitions.lock().expect("Failed to lock transition order");
    let mut lifecycle = inner.lifecycle.lock().expect("Failed to lock connection lifecycle");

    if lifecycle.generation != generation {
        return Err(active);
    }

    lifecycle.state = ConnectionState::Connected;
    lifecycle.supervisor = Some(spawn(supervise_session(
        Arc::clone(inner),
        cancel.clone(),
        generation,
        active,
    )));
    drop(lifecycle);

    inner.dispatcher.dispatch_state(ConnectionState::Connected);
    Ok(())
}

enum ReconnectOutcome {
    Restored(ActiveSession),
    Cancelled,
    GaveUp { attempts: u32 },
    Terminal(PedalError),
}

fn backoff_delay(config: &ClientConfig, attempt: u32) -> Duration {
    let exponent = attempt.min(16);
    let millis = config
        .backoff_base_ms
        .saturating_mul(1u64 << exponent)
        .min(config.backoff_cap_ms);

    Duration::from_millis(millis)
}

/// Retry establishing a session until it succeeds, the configured attempt
/// ceiling is reached, or the session is cancelled. Every failed attempt is
/// reported through the error handlers rather than raised.
async fn run_reconnect(inner: &Arc<ManagerInner>, cancel: &CancellationToken) -> ReconnectOutcome {
    let mut attempt: u32 = 0;

    loop {
        if let Some(max) = inner.config.max_reconnect_attempts {
            if attempt >= max {
                return ReconnectOutcome::GaveUp { attempts: attempt };
            }
        }

        let delay = backoff_delay(&inner.config, attempt);
        info!("Reconnect attempt {} in {:?}", attempt + 1, delay);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return ReconnectOutcome::Cancelled;
            },
            _ = sleep(delay) => {},
        }

        match establish_session(inner, cancel).await {
            Ok(active) => {
                return ReconnectOutcome::Restored(active);
            },
            Err(err @ PedalError::UserCancelled) => {
                // Our own token means disconnect() took over; anything else
                // is the platform abandoning device selection
                if cancel.is_cancelled() {
                    return ReconnectOutcome::Cancelled;
                }

                return ReconnectOutcome::Terminal(err);
            },
            Err(err @ PedalError::PlatformUnavailable) => {
                return ReconnectOutcome::Terminal(err);
            },
            Err(err) => {
                warn!("Reconnect attempt {} failed: {:?}", attempt + 1, err);
                inner.dispatcher.dispatch_error(&err);
                attempt += 1;
            },
        }
    }
}

/// Watch an established session for unexpected drops. On drop the session is
/// released and the reconnect policy runs; on cancellation the session is
/// released and the task exits, leaving state reporting to `disconnect()`.
async fn supervise_session(
    inner: Arc<ManagerInner>,
    cancel: CancellationToken,
    generation: u64,
    mut active: ActiveSession,
) {
    loop {
        let session = Arc::clone(&active.session);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                active.release().await;
                return;
            },
            _ = session.disconnected() => {},
        }

        warn!("Session dropped unexpectedly");
        active.release().await;

        let owned = {
            let _order = inner.transitions.lock().expect("Failed to lock transition order");
            let owned = {
                let mut lifecycle = inner.lifecycle.lock().expect("Failed to lock connection lifecycle");

                if lifecycle.generation == generation {
                    lifecycle.state = ConnectionState::Reconnecting;
                    true
                }
                else {
                    false
                }
            };

            if owned {
                inner.dispatcher.dispatch_state(ConnectionState::Reconnecting);
            }

            owned
        };

        if !owned {
            // disconnect() took over in the meantime
            return;
        }

        match run_reconnect(&inner, &cancel).await {
            ReconnectOutcome::Restored(new_active) => {
                let committed = {
                    let _order = inner.transitions.lock().expect("Failed to lock transition order");
                    let owned = {
                        let mut lifecycle = inner.lifecycle.lock().expect("Failed to lock connection lifecycle");

                        if lifecycle.generation == generation {
                            lifecycle.state = ConnectionState::Connected;
                            true
                        }
                        else {
                            false
                        }
                    };

                    if owned {
                        inner.dispatcher.dispatch_state(ConnectionState::Connected);
                    }

                    owned
                };

                if committed {
                    info!("Device session restored");
                    active = new_active;
                }
                else {
                    new_active.release().await;
                    return;
                }
            },
            ReconnectOutcome::Cancelled => {
                return;
            },
            ReconnectOutcome::GaveUp { attempts } => {
                warn!("Giving up on reconnecting after {} attempts", attempts);
                finish_reconnect(&inner, generation, &PedalError::ReconnectExhausted { attempts });
                return;
            },
            ReconnectOutcome::Terminal(err) => {
                warn!("Reconnecting failed terminally: {:?}", err);
                finish_reconnect(&inner, generation, &err);
                return;
            },
        }
    }
}

/// Report the end of a failed reconnect and settle the lifecycle back to
/// `Disconnected`.
fn finish_reconnect(inner: &Arc<ManagerInner>, generation: u64, error: &PedalError) {
    let _order = inner.transitions.lock().expect("Failed to lock transition order");
    let owned = {
        let mut lifecycle = inner.lifecycle.lock().expect("Failed to lock connection lifecycle");

        if lifecycle.generation == generation {
            lifecycle.state = ConnectionState::Disconnected;
            lifecycle.session_cancel = None;
            true
        }
        else {
            false
        }
    };

    if owned {
        inner.dispatcher.dispatch_error(error);
        inner.dispatcher.dispatch_state(ConnectionState::Disconnected);
    }
}
