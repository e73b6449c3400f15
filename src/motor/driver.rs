// High-level driver for the pipette gantry
//
// Keeps the tracked position in step with what has been commanded, runs the
// controller setup, enforces homing order and boosts plunger current only while
// B or C are moving.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::connection::{self, Connection};
use super::error::{DriverError, Result};
use super::gcode::{self, Command, DEFAULT_SETUP, GCode};
use super::homing;
use super::position::{Axis, AxisSet, AxisTargets, Position, PositionState, is_close};
use crate::config::{CURRENT_SETTLE_SECONDS, DriverConfig};

/// A malformed position read is retried once, never more
const POSITION_READ_ATTEMPTS: usize = 2;

/// Where commands are routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// A connect attempt failed before a port was opened; commands fail
    Uninitialized,
    /// Commands are logged and dropped, position is still tracked
    Simulated,
    /// Commands go to the controller
    Connected,
}

/// Motion driver for the six-axis gantry
///
/// Every command blocks until acknowledged or timed out. Callers sharing a
/// driver across threads must serialize access themselves.
///
/// `disconnect()` only stops routing commands to hardware: the serial handle
/// stays open until the next `connect()`/`attach()` replaces it or the driver
/// is dropped.
pub struct MotionDriver {
    config: DriverConfig,
    mode: ConnectionMode,
    link: Option<Connection>,
    state: PositionState,
    combined_speed: Option<f64>,
}

impl Default for MotionDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionDriver {
    /// Simulated driver configured from the environment
    pub fn new() -> Self {
        Self::with_config(DriverConfig::from_env())
    }

    pub fn with_config(config: DriverConfig) -> Self {
        Self {
            config,
            mode: ConnectionMode::Simulated,
            link: None,
            state: PositionState::new(),
            combined_speed: None,
        }
    }

    /// Open the controller port and configure it
    ///
    /// Stays simulated when a virtual controller is requested. A failure during
    /// setup leaves the driver connected with whatever setup already ran.
    pub fn connect(&mut self) -> Result<()> {
        if self.config.virtual_controller {
            info!("Virtual controller requested, staying in simulation");
            self.mode = ConnectionMode::Simulated;
            return Ok(());
        }

        self.mode = ConnectionMode::Uninitialized;
        let link = connection::connect(
            &self.config.port_hint,
            self.config.baudrate,
            self.config.default_timeout,
        )?;
        self.attach(link)
    }

    /// Take ownership of an already open link and configure the controller
    pub fn attach(&mut self, link: Connection) -> Result<()> {
        self.link = Some(link);
        self.mode = ConnectionMode::Connected;
        self.setup()
    }

    /// Route commands to the simulator; the link is kept open
    pub fn disconnect(&mut self) {
        info!("Switching to simulation");
        self.mode = ConnectionMode::Simulated;
    }

    /// Clear latched faults, push default configuration, use absolute coordinates
    fn setup(&mut self) -> Result<()> {
        info!("Configuring controller");
        let mut steps = vec![Command::simple(GCode::ResetFromError)];
        steps.extend(DEFAULT_SETUP.iter().map(|line| Command::raw(line)));
        steps.push(Command::simple(GCode::AbsoluteCoords));

        for command in &steps {
            self.send(command, None)
                .map_err(|source| DriverError::Configuration {
                    command: command.line().to_string(),
                    source: Box::new(source),
                })?;
        }
        info!("Controller configured");
        Ok(())
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn is_simulating(&self) -> bool {
        self.mode == ConnectionMode::Simulated
    }

    /// Snapshot of the tracked position
    pub fn position(&self) -> Position {
        self.state.position()
    }

    /// Every tracked position since construction, oldest first
    pub fn history(&self) -> &VecDeque<Position> {
        self.state.history()
    }

    /// Last speed passed to `set_speed`, in mm/s
    pub fn combined_speed(&self) -> Option<f64> {
        self.combined_speed
    }

    pub fn disabled_axes(&self) -> AxisSet {
        self.config.disabled_axes
    }

    /// Exclude axes from all moves and homing
    pub fn set_disabled_axes(&mut self, axes: AxisSet) {
        self.config.disabled_axes = axes;
    }

    /// Move the requested axes, optionally at `speed` mm/s
    ///
    /// Axes that are disabled or already within tolerance of the target are
    /// left out of the command; nothing is sent when no axis remains. The
    /// tracked position takes every requested coordinate once the move has
    /// been acknowledged. A move left unacknowledged fails with `MissingAck`
    /// and is not tracked.
    pub fn move_to(&mut self, targets: &AxisTargets, speed: Option<f64>) -> Result<()> {
        let disabled = self.config.disabled_axes;
        let moving: Vec<(Axis, f64)> = targets
            .iter()
            .filter(|&(axis, value)| {
                !disabled.contains(axis) && !is_close(value, self.state.get(axis))
            })
            .collect();

        if moving.is_empty() {
            debug!("Already at {:?}, nothing to send", targets);
            return Ok(());
        }

        let command = Command::move_to(moving, speed.filter(|&s| s != 0.0));
        self.send_motion(&command, targets)
    }

    /// Home the requested axes (plus those they depend on), skipping disabled ones
    pub fn home(&mut self, axes: AxisSet) -> Result<AxisTargets> {
        self.home_excluding(axes, self.config.disabled_axes)
    }

    /// Home with an explicit set of axes to leave alone
    ///
    /// The tracked position is set from the calibrated home table rather than
    /// read back: a stage that stalls short of its switch is tracked wrongly.
    pub fn home_excluding(&mut self, axes: AxisSet, disabled: AxisSet) -> Result<AxisTargets> {
        let groups = homing::plan(axes, disabled);
        if groups.is_empty() {
            debug!("No axes left to home for {} (disabled {})", axes, disabled);
            return Ok(AxisTargets::new());
        }

        let command = Command::home(&groups);
        info!("Homing: {}", command);
        let homed = homing::homed_targets(&groups);
        self.send_motion(&command, &homed)?;
        Ok(homed)
    }

    /// Re-synchronise the tracked position
    ///
    /// Simulated: merges `default`, if any. Connected: reads the position from
    /// the controller, retrying once on a malformed or unacknowledged response.
    pub fn refresh_position(&mut self, default: Option<&AxisTargets>) -> Result<Position> {
        match self.mode {
            ConnectionMode::Uninitialized => Err(DriverError::NotConnected),
            ConnectionMode::Simulated => {
                self.state.merge(&default.copied().unwrap_or_default());
                Ok(self.state.position())
            }
            ConnectionMode::Connected => {
                let mut attempt = 1;
                loop {
                    match self.read_position() {
                        Ok(reported) => {
                            self.state.merge(&reported);
                            return Ok(self.state.position());
                        }
                        Err(e) if attempt < POSITION_READ_ATTEMPTS && is_retryable(&e) => {
                            warn!("Position read failed ({}), retrying", e);
                            attempt += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    fn read_position(&mut self) -> Result<AxisTargets> {
        let query = Command::simple(GCode::CurrentPosition);
        let response = self
            .send(&query, None)?
            .ok_or_else(|| DriverError::MissingAck {
                command: query.line().to_string(),
            })?;
        Ok(gcode::decode_position(&response)?)
    }

    /// Pause the controller's queue
    pub fn delay(&mut self, seconds: f64) -> Result<()> {
        self.send(&Command::dwell(seconds), None)?;
        Ok(())
    }

    /// Probe along `axis` by `distance`, returning the tracked coordinate
    pub fn probe_axis(&mut self, axis: char, distance: f64) -> Result<f64> {
        let axis = Axis::from_letter(axis).ok_or(DriverError::InvalidAxis(axis))?;
        self.send(&Command::probe(axis, distance), Some(self.config.extended_timeout))?;
        Ok(self.state.get(axis))
    }

    /// Set the combined feed rate in mm/s
    pub fn set_speed(&mut self, mm_per_second: f64) -> Result<()> {
        self.combined_speed = Some(mm_per_second);
        self.send(&Command::set_speed(mm_per_second), None)?;
        Ok(())
    }

    /// Set motor current (amps) on exactly `axes`, then wait for it to settle
    pub fn set_current(&mut self, axes: AxisSet, amps: f64) -> Result<()> {
        self.send(&Command::set_current(axes, amps), None)?;
        self.delay(CURRENT_SETTLE_SECONDS)
    }

    pub fn enable_motors(&mut self) -> Result<()> {
        self.send(&Command::simple(GCode::EnableMotors), None)?;
        Ok(())
    }

    /// De-energize every motor; callers should do this on any abnormal exit
    pub fn disable_motors(&mut self) -> Result<()> {
        self.send(&Command::simple(GCode::DisableMotors), None)?;
        Ok(())
    }

    /// Clear a latched error or alarm
    pub fn reset_from_error(&mut self) -> Result<()> {
        self.send(&Command::simple(GCode::ResetFromError), None)?;
        Ok(())
    }

    /// Raw limit-switch report; `None` when simulating or unacknowledged
    pub fn switch_state(&mut self) -> Result<Option<String>> {
        self.send(&Command::simple(GCode::LimitSwitchStatus), None)
    }

    /// Route one command according to the connection mode
    fn send(&mut self, command: &Command, timeout: Option<Duration>) -> Result<Option<String>> {
        match self.mode {
            ConnectionMode::Uninitialized => Err(DriverError::NotConnected),
            ConnectionMode::Simulated => {
                debug!("[simulated] {}", command);
                Ok(None)
            }
            ConnectionMode::Connected => self.write(command, timeout),
        }
    }

    /// Send a move or home and track `reached` once the controller acknowledges it
    ///
    /// Plunger motion runs at boosted current. The position is merged before the
    /// current is lowered again, and the restore still runs when the
    /// acknowledgment is missing.
    fn send_motion(&mut self, command: &Command, reached: &AxisTargets) -> Result<()> {
        let timeout = Some(self.config.extended_timeout);
        if self.mode != ConnectionMode::Connected {
            self.send(command, timeout)?;
            self.state.merge(reached);
            return Ok(());
        }

        let boost = command.moves_plunger();
        if boost {
            self.set_current(AxisSet::PLUNGERS, self.config.plunger_current_high)?;
        }
        let acknowledged = self.write(command, timeout)?.is_some();
        if acknowledged {
            self.state.merge(reached);
        }
        if boost {
            self.set_current(AxisSet::PLUNGERS, self.config.plunger_current_low)?;
        }

        if !acknowledged {
            return Err(DriverError::MissingAck {
                command: command.line().to_string(),
            });
        }
        Ok(())
    }

    fn write(&mut self, command: &Command, timeout: Option<Duration>) -> Result<Option<String>> {
        let link = self.link.as_mut().ok_or(DriverError::NotConnected)?;
        connection::write_and_return(&mut **link, &command.wire_line(), timeout)
    }
}

fn is_retryable(error: &DriverError) -> bool {
    matches!(error, DriverError::Parse(_) | DriverError::MissingAck { .. })
}
