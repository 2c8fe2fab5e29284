use std::any::Any;
use std::io;
use std::time::Duration;
use thiserror::Error;
use std::str::Utf8Error;
use btleplug;
use serde_json;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    Config { #[from] source: ConfigError },

    #[error("Failed to run pedal client: {source}")]
    Device { #[from] source: PedalError },

    #[error("Failed to wait for shutdown signal: {source}")]
    Signal { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum PedalError {
    #[error("No bluetooth capability is available on this host")]
    PlatformUnavailable,

    #[error("Device selection was abandoned before a pedal device was chosen")]
    UserCancelled,

    #[error("The session did not establish within {after:?}")]
    ConnectTimeout { after: Duration },

    #[error("Not connected to a pedal device")]
    NotConnected,

    #[error("The connected peripheral does not expose characteristic {uuid}")]
    CharacteristicNotFound { uuid: Uuid },

    #[error("Malformed notification payload of {len} bytes (expected exactly 1)")]
    MalformedPayload { len: usize },

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Error communicating with device (btleplug): {source}")]
    Btle { source: btleplug::Error },
}

impl From<btleplug::Error> for PedalError {
    fn from(source: btleplug::Error) -> Self {
        match source {
            btleplug::Error::PermissionDenied => PedalError::PlatformUnavailable,
            btleplug::Error::NotConnected => PedalError::NotConnected,
            source => PedalError::Btle { source },
        }
    }
}

pub fn readable_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }
    let type_id = error.type_id();

    format!("panic: [{:?}]: [{}]", type_id, stringified)
}
