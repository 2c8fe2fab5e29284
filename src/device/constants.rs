use uuid::Uuid;

/**
 * How long (milliseconds) a full session establishment (device request, connect,
 * subscribe) may take before the attempt fails with ConnectTimeout.
 */
pub const CONNECT_TIMEOUT: u64 = 10_000;

/**
 * Delay (milliseconds) before the first reconnect attempt. Doubles on every
 * further attempt until BACKOFF_CAP is reached.
 */
pub const BACKOFF_BASE: u64 = 500;

/**
 * Upper bound (milliseconds) on the delay between reconnect attempts.
 */
pub const BACKOFF_CAP: u64 = 8_000;

/**
 * How often (milliseconds) to check whether the peripheral is still connected.
 */
pub const IS_CONNECTED_POLL_DELAY: u64 = 500;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take.
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * How often (milliseconds) to re-check discovered peripherals while scanning.
 */
pub const SCAN_POLL_DELAY: u64 = 250;

/**
 * How long (milliseconds) the monitor binary waits before retrying a timed-out
 * initial connect.
 */
pub const CONNECT_RETRY_DELAY: u64 = 1000;

/**
 * The UUID of the Bluetooth BLE service exposed by the Sophie Pedals peripheral.
 */
pub const PEDALS_SERVICE: &str = "d98e357f-3d21-4669-a17d-9b389d6559e1";

/**
 * The UUID of the remote GATT characteristic that notifies on pedal button press.
 */
pub const BUTTON_DOWN_CHARACTERISTIC: &str = "4e9ca473-b618-4de5-a0db-bb1c055a5e1c";

/**
 * The UUID of the remote GATT characteristic that notifies on pedal button release.
 */
pub const BUTTON_UP_CHARACTERISTIC: &str = "019f2af2-6401-445b-a52d-8119aca2c5ef";

/**
 * The standard Bluetooth battery service. Requested as an optional service so
 * that a platform with a permission chooser grants access to it as well.
 */
pub const BATTERY_SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";

pub fn make_pedals_service_uuid() -> Uuid {
    Uuid::parse_str(PEDALS_SERVICE).unwrap()
}

pub fn make_button_down_uuid() -> Uuid {
    Uuid::parse_str(BUTTON_DOWN_CHARACTERISTIC).unwrap()
}

pub fn make_button_up_uuid() -> Uuid {
    Uuid::parse_str(BUTTON_UP_CHARACTERISTIC).unwrap()
}

pub fn make_battery_service_uuid() -> Uuid {
    Uuid::parse_str(BATTERY_SERVICE).unwrap()
}
