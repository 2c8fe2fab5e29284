use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use log::error;

use crate::device::types::{ButtonAction, ButtonEvent, ConnectionState};
use crate::error::{readable_panic_error, PedalError};

pub type ButtonHandler = Arc<dyn Fn(ButtonEvent) + Send + Sync>;
pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&PedalError) + Send + Sync>;

/// Fans events out to registered handlers, in registration order. A handler
/// that panics is logged and skipped; the remaining handlers still run.
#[derive(Default)]
pub struct EventDispatcher {
    button_down: Mutex<Vec<ButtonHandler>>,
    button_up: Mutex<Vec<ButtonHandler>>,
    state: Mutex<Vec<StateHandler>>,
    error: Mutex<Vec<ErrorHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_button_down(&self, handler: ButtonHandler) {
        let mut handlers = self.button_down.lock().expect("Failed to lock button down handlers");
        handlers.push(handler);
    }

    pub fn on_button_up(&self, handler: ButtonHandler) {
        let mut handlers = self.button_up.lock().expect("Failed to lock button up handlers");
        handlers.push(handler);
    }

    pub fn on_state_change(&self, handler: StateHandler) {
        let mut handlers = self.state.lock().expect("Failed to lock state handlers");
        handlers.push(handler);
    }

    pub fn on_error(&self, handler: ErrorHandler) {
        let mut handlers = self.error.lock().expect("Failed to lock error handlers");
        handlers.push(handler);
    }

    pub fn dispatch_button(&self, event: ButtonEvent) {
        let registry = match event.action {
            ButtonAction::Down => &self.button_down,
            ButtonAction::Up => &self.button_up,
        };

        // Handlers run outside the lock so they may register further handlers
        let handlers = registry.lock().expect("Failed to lock button handlers").clone();

        for handler in handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler(event)));

            if let Err(panic) = result {
                error!("Button handler panicked: {}", readable_panic_error(&panic));
            }
        }
    }

    pub fn dispatch_state(&self, state: ConnectionState) {
        let handlers = self.state.lock().expect("Failed to lock state handlers").clone();

        for handler in handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler(state)));

            if let Err(panic) = result {
                error!("State handler panicked: {}", readable_panic_error(&panic));
            }
        }
    }

    pub fn dispatch_error(&self, error: &PedalError) {
        let handlers = self.error.lock().expect("Failed to lock error handlers").clone();

        for handler in handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler(error)));

            if let Err(panic) = result {
                error!("Error handler panicked: {}", readable_panic_error(&panic));
            }
        }
    }
}
