use std::sync::Arc;
use clap::Parser;
use log::{error, info, warn};
use tokio::time::{sleep, Duration};

use sophie_pedals::init_logging;
use sophie_pedals::config::io::ConfigIO;
use sophie_pedals::config::types::ClientConfig;
use sophie_pedals::device::connection::ConnectionManager;
use sophie_pedals::device::constants::CONNECT_RETRY_DELAY;
use sophie_pedals::device::types::{ButtonEvent, ConnectionState, DeviceIdentity};
use sophie_pedals::error::{AppRunError, ConfigError, PedalError};
use sophie_pedals::platform::btle::BtlePlatform;

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Connects to a Sophie Pedals device and logs button events.\n\nExample: ./sophie-pedals-monitor --max-reconnect-attempts 10", long_about = None)]
struct Args {
    /// Give up on an initial connection attempt after this many milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// First reconnect delay in milliseconds; doubles on every failed attempt
    #[arg(long)]
    backoff_base_ms: Option<u64>,

    /// Upper bound on the reconnect delay in milliseconds
    #[arg(long)]
    backoff_cap_ms: Option<u64>,

    /// Stop reconnecting after this many failed attempts (default: never)
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    write_config: bool,
}

async fn run(args: Args) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync()?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let mut config = match config_io.read().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                // this is probably the first start of the app
                info!("Config file not found, using defaults");
            }
            else {
                error!("Failed to load config: {:?}", &err);
            }

            ClientConfig::default()
        },
    };

    if let Some(value) = args.connect_timeout_ms {
        config.connect_timeout_ms = value;
    }
    if let Some(value) = args.backoff_base_ms {
        config.backoff_base_ms = value;
    }
    if let Some(value) = args.backoff_cap_ms {
        config.backoff_cap_ms = value;
    }
    if let Some(value) = args.max_reconnect_attempts {
        config.max_reconnect_attempts = Some(value);
    }

    if args.write_config {
        config_io.save(&config).await?;
        info!("Configuration saved");
        return Ok(());
    }

    let platform = Arc::new(BtlePlatform::new().await?);
    let manager = ConnectionManager::new(platform, DeviceIdentity::sophie_pedals(), config);

    manager.on_state_change(Arc::new(|state: ConnectionState| {
        info!("Connection state: {}", state);
    }));
    manager.on_button_down(Arc::new(|event: ButtonEvent| {
        info!("Button {} down", event.button_index);
    }));
    manager.on_button_up(Arc::new(|event: ButtonEvent| {
        info!("Button {} up", event.button_index);
    }));
    manager.on_error(Arc::new(|err: &PedalError| {
        warn!("Device error: {}", err);
    }));

    loop {
        match manager.connect().await {
            Ok(()) => {
                break;
            },
            Err(err @ PedalError::PlatformUnavailable) | Err(err @ PedalError::UserCancelled) => {
                return Err(err.into());
            },
            Err(err) => {
                warn!("Connecting failed: {}; retrying...", err);
                sleep(Duration::from_millis(CONNECT_RETRY_DELAY)).await;
            },
        }
    }

    info!("Press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    manager.disconnect().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("Sophie Pedals Monitor ", env!("CARGO_PKG_VERSION")));

    let args = Args::parse();

    match run(args).await {
        Err(AppRunError::Config { source: ConfigError::CanNotLock { .. } }) => {
            error!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(()) => Ok(()),
    }
}
