// Serial settings, timeouts, currents and environment overrides
use std::env;
use std::time::Duration;

use crate::motor::AxisSet;

// Serial link to the Smoothieware board
pub const BAUDRATE: u32 = 115_200;

// Port hint matched against port names and USB descriptors
pub const DEFAULT_PORT_HINT: &str = "Smoothie";

// Read timeout applied when the port is opened
pub const DEFAULT_SERIAL_TIMEOUT: Duration = Duration::from_secs(5);

// Homing, probing and moves can take a long time to settle
pub const EXTENDED_TIMEOUT: Duration = Duration::from_secs(30);

// End-of-response marker sent by the firmware
pub const DRIVER_ACK: &[u8] = b"ok\r\nok\r\n";

// In-band fault markers
pub const ERROR_KEYWORD: &[u8] = b"error";
pub const ALARM_KEYWORD: &[u8] = b"ALARM";

// Plunger motor current (amps): high while moving, low at rest
pub const PLUNGER_CURRENT_HIGH: f64 = 0.5;
pub const PLUNGER_CURRENT_LOW: f64 = 0.1;

// Dwell after every current change so regulation settles before the next command
pub const CURRENT_SETTLE_SECONDS: f64 = 0.05;

pub const SEC_PER_MIN: f64 = 60.0;

// Diagnostic position history cap
pub const HISTORY_LIMIT: usize = 4096;

// Environment overrides
pub const ENV_VIRTUAL_CONTROLLER: &str = "ENABLE_VIRTUAL_SMOOTHIE";
pub const ENV_PORT_HINT: &str = "SMOOTHIE_PORT_HINT";

/// Runtime settings for a [`MotionDriver`](crate::motor::MotionDriver)
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub port_hint: String,
    pub baudrate: u32,
    pub default_timeout: Duration,
    pub extended_timeout: Duration,
    pub plunger_current_high: f64,
    pub plunger_current_low: f64,
    pub disabled_axes: AxisSet,
    /// Stay simulated on `connect()` even when hardware is reachable
    pub virtual_controller: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port_hint: DEFAULT_PORT_HINT.to_string(),
            baudrate: BAUDRATE,
            default_timeout: DEFAULT_SERIAL_TIMEOUT,
            extended_timeout: EXTENDED_TIMEOUT,
            plunger_current_high: PLUNGER_CURRENT_HIGH,
            plunger_current_low: PLUNGER_CURRENT_LOW,
            disabled_axes: AxisSet::EMPTY,
            virtual_controller: false,
        }
    }
}

impl DriverConfig {
    /// Defaults with `ENABLE_VIRTUAL_SMOOTHIE` and `SMOOTHIE_PORT_HINT` applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = env::var(ENV_VIRTUAL_CONTROLLER) {
            config.virtual_controller = is_truthy(&value);
        }
        if let Ok(hint) = env::var(ENV_PORT_HINT) {
            if !hint.trim().is_empty() {
                config.port_hint = hint.trim().to_string();
            }
        }
        config
    }
}

fn is_truthy(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}
