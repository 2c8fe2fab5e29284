use std::time::Instant;
use uuid::Uuid;

use crate::device::constants::{make_button_down_uuid, make_button_up_uuid, make_pedals_service_uuid};
use crate::platform::Characteristic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };

        write!(f, "{}", result)
    }
}

/// Which of the two pedal characteristics produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Down,
    Up,
}

impl std::fmt::Display for ButtonAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            ButtonAction::Down => "down",
            ButtonAction::Up => "up",
        };

        write!(f, "{}", result)
    }
}

/// A single decoded pedal notification. Created per notification and handed to
/// the registered handlers immediately; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub action: ButtonAction,
    pub button_index: u8, // [0, 127]
    pub timestamp: Instant,
}

/// An active notification listener on one characteristic.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub characteristic: Characteristic,
    pub action: ButtonAction,
}

/// The advertised identity of a Sophie Pedals peripheral: its service UUID and
/// the two button characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub service: Uuid,
    pub button_down: Uuid,
    pub button_up: Uuid,
}

impl DeviceIdentity {
    pub fn sophie_pedals() -> DeviceIdentity {
        DeviceIdentity {
            service: make_pedals_service_uuid(),
            button_down: make_button_down_uuid(),
            button_up: make_button_up_uuid(),
        }
    }

    pub fn action_for(&self, characteristic: Uuid) -> Option<ButtonAction> {
        if characteristic == self.button_down {
            Some(ButtonAction::Down)
        }
        else if characteristic == self.button_up {
            Some(ButtonAction::Up)
        }
        else {
            None
        }
    }
}
