// Motion control for the pipette gantry
//
// Provides:
// - Axis, position and partial-target types
// - Smoothieware G-code table, encoder and position decoder
// - Serial connection with acknowledgment framing
// - Homing order and calibrated home coordinates
// - High-level motion driver API

pub mod connection;
mod driver;
pub mod error;
pub mod gcode;
pub mod homing;
pub mod position;

pub use connection::{Connection, PortInfo, SerialLink};
pub use driver::{ConnectionMode, MotionDriver};
pub use error::{DriverError, ParseError, Result};
pub use gcode::{Command, GCode};
pub use position::{Axis, AxisSet, AxisTargets, Position, PositionState};
