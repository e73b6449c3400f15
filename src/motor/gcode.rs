// Smoothieware G-code command table, line encoder and position decoder
//
// Line format: <verb><tokens...> followed by the M400 motion-sync marker, e.g.
//   G0X10B5F600 M400
//   M907 B0.5 C0.5 M400

use std::fmt;

use tracing::debug;

use super::error::ParseError;
use super::position::{Axis, AxisSet, AxisTargets};
use crate::config::SEC_PER_MIN;

/// Appended to every line so the firmware blocks until motion has settled
pub const MOTION_SYNC: &str = "M400";

/// Configuration lines pushed once during setup, in order
pub const DEFAULT_ACCELERATION: &str = "M204 S10000 X4000 Y3000 Z1500 A1500 B1000 C1000";
pub const DEFAULT_CURRENT: &str = "M907 X1.2 Y1.5 Z0.8 A0.8 B0.1 C0.1"; // plungers at rest level
pub const DEFAULT_MAX_SPEEDS: &str = "M203.1 X600 Y600 Z100 A100 B8 C8";
pub const DEFAULT_STEPS_PER_MM: &str = "M92 X80.0254 Y80.16 Z400 A400 B768 C768";

pub const DEFAULT_SETUP: [&str; 4] = [
    DEFAULT_ACCELERATION,
    DEFAULT_CURRENT,
    DEFAULT_MAX_SPEEDS,
    DEFAULT_STEPS_PER_MM,
];

/// Protocol verbs understood by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GCode {
    Home,
    Move,
    Dwell,
    CurrentPosition,
    LimitSwitchStatus,
    Probe,
    AbsoluteCoords,
    ResetFromError,
    SetSpeed,
    SetCurrent,
    EnableMotors,
    DisableMotors,
}

impl GCode {
    pub fn as_str(self) -> &'static str {
        match self {
            GCode::Home => "G28.2",
            GCode::Move => "G0",
            GCode::Dwell => "G4",
            GCode::CurrentPosition => "M114.2",
            GCode::LimitSwitchStatus => "M119",
            GCode::Probe => "G38.2",
            GCode::AbsoluteCoords => "G90",
            GCode::ResetFromError => "M999",
            GCode::SetSpeed => "G0F",
            GCode::SetCurrent => "M907",
            GCode::EnableMotors => "M17",
            GCode::DisableMotors => "M18",
        }
    }

    /// Verbs that physically move axes
    pub fn is_motion(self) -> bool {
        matches!(self, GCode::Home | GCode::Move)
    }
}

impl fmt::Display for GCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An encoded command line together with the verb and axes it touches
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    verb: Option<GCode>,
    axes: AxisSet,
    line: String,
}

impl Command {
    /// A bare verb with no arguments
    pub fn simple(verb: GCode) -> Self {
        Self {
            verb: Some(verb),
            axes: AxisSet::EMPTY,
            line: verb.as_str().to_string(),
        }
    }

    /// A fixed configuration line outside the verb table
    pub fn raw(line: &str) -> Self {
        Self {
            verb: None,
            axes: AxisSet::EMPTY,
            line: line.to_string(),
        }
    }

    /// `G0X10B5F600`: one token per axis, optional feed rate in mm/s
    pub fn move_to<I>(targets: I, speed: Option<f64>) -> Self
    where
        I: IntoIterator<Item = (Axis, f64)>,
    {
        let mut axes = AxisSet::EMPTY;
        let mut line = GCode::Move.as_str().to_string();
        for (axis, value) in targets {
            axes.insert(axis);
            line.push(axis.letter());
            line.push_str(&format_number(value));
        }
        if let Some(speed) = speed {
            line.push('F');
            line.push_str(&feed_rate(speed).to_string());
        }
        Self {
            verb: Some(GCode::Move),
            axes,
            line,
        }
    }

    /// `G38.2Z-10`
    pub fn probe(axis: Axis, distance: f64) -> Self {
        Self {
            verb: Some(GCode::Probe),
            axes: AxisSet::of(&[axis]),
            line: format!("{}{}{}", GCode::Probe, axis.letter(), format_number(distance)),
        }
    }

    /// `G28.2ZA G28.2X G28.2Y`: one home token per group, in the given order
    pub fn home(groups: &[AxisSet]) -> Self {
        let axes = groups.iter().fold(AxisSet::EMPTY, |acc, &g| acc.union(g));
        let line = groups
            .iter()
            .map(|group| format!("{}{}", GCode::Home, group.letters()))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            verb: Some(GCode::Home),
            axes,
            line,
        }
    }

    /// `M907 B0.5 C0.5` for exactly the given axes
    pub fn set_current(axes: AxisSet, amps: f64) -> Self {
        let mut line = GCode::SetCurrent.as_str().to_string();
        for axis in axes.iter() {
            line.push(' ');
            line.push(axis.letter());
            line.push_str(&format_number(amps));
        }
        Self {
            verb: Some(GCode::SetCurrent),
            axes,
            line,
        }
    }

    /// `G4P0.05`: the firmware treats P as float seconds in grbl mode
    pub fn dwell(seconds: f64) -> Self {
        Self {
            verb: Some(GCode::Dwell),
            axes: AxisSet::EMPTY,
            line: format!("{}P{}", GCode::Dwell, format_number(seconds)),
        }
    }

    /// `G0F600` from a speed in mm/s
    pub fn set_speed(mm_per_second: f64) -> Self {
        Self {
            verb: Some(GCode::SetSpeed),
            axes: AxisSet::EMPTY,
            line: format!("{}{}", GCode::SetSpeed, feed_rate(mm_per_second)),
        }
    }

    pub fn verb(&self) -> Option<GCode> {
        self.verb
    }

    pub fn axes(&self) -> AxisSet {
        self.axes
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    /// A move or home that drives B or C
    pub fn moves_plunger(&self) -> bool {
        self.verb.is_some_and(GCode::is_motion)
            && !self.axes.intersection(AxisSet::PLUNGERS).is_empty()
    }

    /// Line as sent on the wire, without the terminator
    pub fn wire_line(&self) -> String {
        format!("{} {}", self.line, MOTION_SYNC)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// Shortest decimal form: 5.0 -> "5", 0.05 -> "0.05"
fn format_number(value: f64) -> String {
    format!("{}", value)
}

/// mm/s -> mm/min, truncated toward zero
fn feed_rate(mm_per_second: f64) -> i64 {
    (mm_per_second * SEC_PER_MIN) as i64
}

/// Decode an `M114.2` response such as `ok MCS: X:1.0000 Y:2.0000 ...`
///
/// The first two tokens are a preamble. Letters outside the six axes are
/// skipped, but at least one axis must be present.
pub fn decode_position(response: &str) -> Result<AxisTargets, ParseError> {
    let mut targets = AxisTargets::new();
    for token in response.split_whitespace().skip(2) {
        let parts: Vec<&str> = token.split(':').collect();
        let [name, raw_value] = parts.as_slice() else {
            return Err(ParseError::MalformedToken {
                token: token.to_string(),
            });
        };
        let name = name.to_ascii_uppercase();
        let value: f64 = raw_value.parse().map_err(|_| ParseError::InvalidNumber {
            axis: name.clone(),
            value: raw_value.to_string(),
        })?;

        let mut letters = name.chars();
        match (letters.next().and_then(Axis::from_letter), letters.next()) {
            (Some(axis), None) => targets.set(axis, Some(value)),
            _ => debug!("Ignoring non-axis field {}={}", name, value),
        }
    }
    if targets.is_empty() {
        return Err(ParseError::NoAxes {
            response: response.to_string(),
        });
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_table() {
        assert_eq!(GCode::Home.as_str(), "G28.2");
        assert_eq!(GCode::Move.as_str(), "G0");
        assert_eq!(GCode::CurrentPosition.as_str(), "M114.2");
        assert_eq!(GCode::ResetFromError.as_str(), "M999");
        assert_eq!(GCode::DisableMotors.as_str(), "M18");
    }

    #[test]
    fn test_default_current_uses_low_plunger_level() {
        let low = crate::config::PLUNGER_CURRENT_LOW;
        let expected = format!("B{} C{}", low, low);
        assert!(DEFAULT_CURRENT.ends_with(&expected));
    }

    #[test]
    fn test_encode_move() {
        let cmd = Command::move_to([(Axis::X, 10.0), (Axis::B, 5.0)], None);
        assert_eq!(cmd.line(), "G0X10B5");
        assert_eq!(cmd.axes().letters(), "XB");
        assert!(cmd.moves_plunger());

        let cmd = Command::move_to([(Axis::A, 12.5)], Some(10.0));
        assert_eq!(cmd.line(), "G0A12.5F600");
        assert!(!cmd.moves_plunger());
    }

    #[test]
    fn test_feed_rate_is_truncated() {
        let cmd = Command::move_to([(Axis::C, -1.0)], Some(0.123));
        assert_eq!(cmd.line(), "G0C-1F7");
        assert_eq!(Command::set_speed(2.5).line(), "G0F150");
        assert_eq!(Command::set_speed(0.01).line(), "G0F0");
    }

    #[test]
    fn test_encode_home() {
        let groups = [AxisSet::from_letters("ZA").unwrap(), AxisSet::of(&[Axis::X])];
        let cmd = Command::home(&groups);
        assert_eq!(cmd.line(), "G28.2ZA G28.2X");
        assert!(!cmd.moves_plunger());

        let cmd = Command::home(&[AxisSet::from_letters("CZ").unwrap()]);
        assert_eq!(cmd.line(), "G28.2ZC");
        assert!(cmd.moves_plunger());
    }

    #[test]
    fn test_encode_current_dwell_probe() {
        assert_eq!(
            Command::set_current(AxisSet::PLUNGERS, 0.5).line(),
            "M907 B0.5 C0.5"
        );
        assert_eq!(Command::dwell(0.05).line(), "G4P0.05");
        assert_eq!(Command::probe(Axis::Z, -10.0).line(), "G38.2Z-10");
        // Current changes are not motion, even on plunger axes
        assert!(!Command::set_current(AxisSet::PLUNGERS, 0.5).moves_plunger());
    }

    #[test]
    fn test_wire_line_has_sync_marker() {
        assert_eq!(Command::simple(GCode::AbsoluteCoords).wire_line(), "G90 M400");
        assert_eq!(Command::raw(DEFAULT_MAX_SPEEDS).verb(), None);
    }

    #[test]
    fn test_decode_position() {
        let response = "ok MCS: X:394.0000 Y:344.0000 z:227.0000 A:227.0000 B:18.9997 C:18.9997";
        let targets = decode_position(response).unwrap();
        assert_eq!(targets.x, Some(394.0));
        assert_eq!(targets.z, Some(227.0));
        assert_eq!(targets.c, Some(18.9997));
    }

    #[test]
    fn test_decode_position_partial_and_unknown_axes() {
        let targets = decode_position("ok MCS: X:1.5 E:3.0").unwrap();
        assert_eq!(targets.x, Some(1.5));
        assert_eq!(targets.axes().letters(), "X");
    }

    #[test]
    fn test_decode_rejects_malformed_token() {
        assert_eq!(
            decode_position("ok MCS: X:1.0 garbage"),
            Err(ParseError::MalformedToken {
                token: "garbage".to_string()
            })
        );
        assert!(matches!(
            decode_position("ok MCS: X:1:2"),
            Err(ParseError::MalformedToken { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_reply_without_axes() {
        for response in ["", "\r\n", "ok MCS:", "ok MCS: E:3.0"] {
            assert_eq!(
                decode_position(response),
                Err(ParseError::NoAxes {
                    response: response.to_string()
                })
            );
        }
    }

    #[test]
    fn test_decode_rejects_non_numeric_value() {
        assert!(matches!(
            decode_position("ok MCS: Y:abc"),
            Err(ParseError::InvalidNumber { .. })
        ));
    }
}
