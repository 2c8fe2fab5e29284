use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{BACKOFF_BASE, BACKOFF_CAP, CONNECT_TIMEOUT};

/// Tunables for the connection lifecycle. Missing fields take their default
/// value, so a partial configuration file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub connect_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub max_reconnect_attempts: Option<u32>,
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout_ms: CONNECT_TIMEOUT,
            backoff_base_ms: BACKOFF_BASE,
            backoff_cap_ms: BACKOFF_CAP,
            max_reconnect_attempts: None,
        }
    }
}
