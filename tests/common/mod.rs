#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sophie_pedals::device::connection::ConnectionManager;
use sophie_pedals::device::types::{ButtonAction, ButtonEvent, ConnectionState, DeviceIdentity};
use sophie_pedals::error::PedalError;
use sophie_pedals::platform::{
    Characteristic, DeviceFilter, Notification, NotificationStream, Platform, PlatformDevice,
    PlatformSession,
};

/// What the next `request_device` call should do.
pub enum ConnectOutcome {
    Establish(Arc<FakeSession>),
    Hang,
    FailTransient,
    FailUnavailable,
}

/// Scripted stand-in for the host Bluetooth stack. Every `request_device`
/// call pops the next scripted outcome; an exhausted script pends forever,
/// like discovery that never finds a device.
pub struct FakePlatform {
    script: Mutex<VecDeque<ConnectOutcome>>,
    request_times: Mutex<Vec<Instant>>,
    requested_filters: Mutex<Vec<DeviceFilter>>,
    started_tx: tokio::sync::mpsc::UnboundedSender<()>,
    started_rx: Mutex<Option<UnboundedReceiver<()>>>,
}

impl FakePlatform {
    pub fn new(script: Vec<ConnectOutcome>) -> Arc<FakePlatform> {
        let (started_tx, started_rx) = unbounded_channel();

        Arc::new(FakePlatform {
            script: Mutex::new(script.into()),
            request_times: Mutex::new(Vec::new()),
            requested_filters: Mutex::new(Vec::new()),
            started_tx,
            started_rx: Mutex::new(Some(started_rx)),
        })
    }

    /// One `()` per `request_device` call, sent as the call begins. Take it
    /// once per test to synchronize on an attempt being in flight.
    pub fn take_started(&self) -> UnboundedReceiver<()> {
        self.started_rx.lock().unwrap().take().expect("started receiver already taken")
    }

    pub fn request_count(&self) -> usize {
        self.request_times.lock().unwrap().len()
    }

    pub fn request_times(&self) -> Vec<Instant> {
        self.request_times.lock().unwrap().clone()
    }

    pub fn requested_filters(&self) -> Vec<DeviceFilter> {
        self.requested_filters.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn request_device(&self, filter: &DeviceFilter) -> Result<Box<dyn PlatformDevice>, PedalError> {
        self.request_times.lock().unwrap().push(Instant::now());
        self.requested_filters.lock().unwrap().push(filter.clone());
        let _ = self.started_tx.send(());

        let outcome = self.script.lock().unwrap().pop_front();
        match outcome {
            Some(ConnectOutcome::Establish(session)) => Ok(Box::new(FakeDevice { session })),
            Some(ConnectOutcome::FailTransient) => {
                Err(PedalError::Btle { source: btleplug::Error::DeviceNotFound })
            },
            Some(ConnectOutcome::FailUnavailable) => Err(PedalError::PlatformUnavailable),
            Some(ConnectOutcome::Hang) | None => {
                futures::future::pending::<()>().await;
                unreachable!()
            },
        }
    }
}

struct FakeDevice {
    session: Arc<FakeSession>,
}

#[async_trait]
impl PlatformDevice for FakeDevice {
    async fn connect(&self) -> Result<Arc<dyn PlatformSession>, PedalError> {
        Ok(Arc::clone(&self.session) as Arc<dyn PlatformSession>)
    }
}

/// A scripted GATT session. Notifications are injected by the test through
/// `push_notification`; an unexpected drop is simulated with `simulate_drop`.
pub struct FakeSession {
    characteristics: Vec<Uuid>,
    notifications_tx: mpsc::UnboundedSender<Notification>,
    notifications_rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    drop_token: CancellationToken,
    subscribed: Mutex<Vec<Uuid>>,
    unsubscribed: Mutex<Vec<Uuid>>,
    closed: AtomicBool,
}

impl FakeSession {
    /// A session exposing both pedal button characteristics.
    pub fn new() -> Arc<FakeSession> {
        let identity = DeviceIdentity::sophie_pedals();
        FakeSession::with_characteristics(vec![identity.button_down, identity.button_up])
    }

    pub fn with_characteristics(characteristics: Vec<Uuid>) -> Arc<FakeSession> {
        let (notifications_tx, notifications_rx) = mpsc::unbounded();

        Arc::new(FakeSession {
            characteristics,
            notifications_tx,
            notifications_rx: Mutex::new(Some(notifications_rx)),
            drop_token: CancellationToken::new(),
            subscribed: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn push_notification(&self, characteristic: Uuid, value: &[u8]) {
        let _ = self.notifications_tx.unbounded_send(Notification {
            characteristic,
            value: value.to_vec(),
        });
    }

    pub fn simulate_drop(&self) {
        self.drop_token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscribed_uuids(&self) -> Vec<Uuid> {
        self.subscribed.lock().unwrap().clone()
    }

    pub fn unsubscribed_uuids(&self) -> Vec<Uuid> {
        self.unsubscribed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformSession for FakeSession {
    async fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, PedalError> {
        if self.characteristics.contains(&uuid) {
            Ok(Characteristic { uuid })
        }
        else {
            Err(PedalError::CharacteristicNotFound { uuid })
        }
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<(), PedalError> {
        self.subscribed.lock().unwrap().push(characteristic.uuid);
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<(), PedalError> {
        self.unsubscribed.lock().unwrap().push(characteristic.uuid);
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream, PedalError> {
        let rx = self.notifications_rx.lock().unwrap().take().expect("notification stream already taken");
        Ok(rx.boxed())
    }

    async fn disconnected(&self) {
        self.drop_token.cancelled().await;
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// An owned, comparable summary of a reported error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedError {
    Unavailable,
    Cancelled,
    Timeout,
    NotConnected,
    CharacteristicNotFound { uuid: Uuid },
    Malformed { len: usize },
    Exhausted { attempts: u32 },
    Transport,
}

pub fn reported(error: &PedalError) -> ReportedError {
    match error {
        PedalError::PlatformUnavailable => ReportedError::Unavailable,
        PedalError::UserCancelled => ReportedError::Cancelled,
        PedalError::ConnectTimeout { .. } => ReportedError::Timeout,
        PedalError::NotConnected => ReportedError::NotConnected,
        PedalError::CharacteristicNotFound { uuid } => ReportedError::CharacteristicNotFound { uuid: *uuid },
        PedalError::MalformedPayload { len } => ReportedError::Malformed { len: *len },
        PedalError::ReconnectExhausted { attempts } => ReportedError::Exhausted { attempts: *attempts },
        PedalError::Btle { .. } => ReportedError::Transport,
    }
}

pub fn record_states(manager: &ConnectionManager) -> UnboundedReceiver<ConnectionState> {
    let (tx, rx) = unbounded_channel();
    manager.on_state_change(Arc::new(move |state: ConnectionState| {
        let _ = tx.send(state);
    }));
    rx
}

pub fn record_errors(manager: &ConnectionManager) -> UnboundedReceiver<ReportedError> {
    let (tx, rx) = unbounded_channel();
    manager.on_error(Arc::new(move |error: &PedalError| {
        let _ = tx.send(reported(error));
    }));
    rx
}

pub fn record_buttons(manager: &ConnectionManager) -> UnboundedReceiver<(ButtonAction, u8)> {
    let (tx, rx) = unbounded_channel();

    let down_tx = tx.clone();
    manager.on_button_down(Arc::new(move |event: ButtonEvent| {
        let _ = down_tx.send((event.action, event.button_index));
    }));
    manager.on_button_up(Arc::new(move |event: ButtonEvent| {
        let _ = tx.send((event.action, event.button_index));
    }));

    rx
}
