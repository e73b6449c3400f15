// Axis identifiers and the tracked belief of where every axis is
//
// Position is always fully populated. Partial updates arrive as AxisTargets,
// where `None` means "not requested" and `Some` means "explicitly targeted".

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DriverError;
use crate::config::HISTORY_LIMIT;

/// One of the six controlled axes
///
/// Z and A raise/lower the two pipette mounts, B and C drive their plungers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
    A,
    B,
    C,
}

impl Axis {
    /// All axes in canonical order
    pub const ALL: [Axis; 6] = [Axis::X, Axis::Y, Axis::Z, Axis::A, Axis::B, Axis::C];

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::A => 'A',
            Axis::B => 'B',
            Axis::C => 'C',
        }
    }

    /// Case-insensitive lookup by protocol letter
    pub fn from_letter(letter: char) -> Option<Axis> {
        match letter.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'A' => Some(Axis::A),
            'B' => Some(Axis::B),
            'C' => Some(Axis::C),
            _ => None,
        }
    }

    pub fn is_plunger(self) -> bool {
        matches!(self, Axis::B | Axis::C)
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A set of axes, iterated in canonical order (X, Y, Z, A, B, C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AxisSet(u8);

impl AxisSet {
    pub const EMPTY: AxisSet = AxisSet(0);
    pub const ALL: AxisSet = AxisSet(0b11_1111);
    pub const PLUNGERS: AxisSet = AxisSet(0b11_0000);
    /// Z, A, B, C
    pub const VERTICALS: AxisSet = AxisSet(0b11_1100);
    pub const X_ONLY: AxisSet = AxisSet(0b00_0001);
    pub const Y_ONLY: AxisSet = AxisSet(0b00_0010);

    pub fn of(axes: &[Axis]) -> Self {
        axes.iter().copied().collect()
    }

    /// Parse letters such as `"zabc"`; whitespace is ignored, duplicates collapse
    pub fn from_letters(letters: &str) -> Result<Self, DriverError> {
        letters
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| Axis::from_letter(c).ok_or(DriverError::InvalidAxis(c)))
            .collect()
    }

    pub fn contains(self, axis: Axis) -> bool {
        self.0 & axis.bit() != 0
    }

    pub fn insert(&mut self, axis: Axis) {
        self.0 |= axis.bit();
    }

    pub fn union(self, other: AxisSet) -> Self {
        AxisSet(self.0 | other.0)
    }

    pub fn intersection(self, other: AxisSet) -> Self {
        AxisSet(self.0 & other.0)
    }

    pub fn difference(self, other: AxisSet) -> Self {
        AxisSet(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Axis> {
        Axis::ALL.into_iter().filter(move |&axis| self.contains(axis))
    }

    /// Protocol letters in canonical order, e.g. `"ZABC"`
    pub fn letters(self) -> String {
        self.iter().map(Axis::letter).collect()
    }
}

impl FromIterator<Axis> for AxisSet {
    fn from_iter<I: IntoIterator<Item = Axis>>(iter: I) -> Self {
        let mut set = AxisSet::EMPTY;
        for axis in iter {
            set.insert(axis);
        }
        set
    }
}

impl fmt::Display for AxisSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.letters())
    }
}

impl TryFrom<String> for AxisSet {
    type Error = DriverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AxisSet::from_letters(&value)
    }
}

impl From<AxisSet> for String {
    fn from(set: AxisSet) -> Self {
        set.letters()
    }
}

/// Coordinate (mm) of every axis
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Position {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::A => self.a,
            Axis::B => self.b,
            Axis::C => self.c,
        }
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
            Axis::A => self.a = value,
            Axis::B => self.b = value,
            Axis::C => self.c = value,
        }
    }
}

/// Optional per-axis coordinates for moves and partial position updates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisTargets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<f64>,
}

impl AxisTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        self.set(axis, Some(value));
        self
    }

    pub fn get(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::A => self.a,
            Axis::B => self.b,
            Axis::C => self.c,
        }
    }

    pub fn set(&mut self, axis: Axis, value: Option<f64>) {
        let slot = match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
            Axis::A => &mut self.a,
            Axis::B => &mut self.b,
            Axis::C => &mut self.c,
        };
        *slot = value;
    }

    /// Targeted axes with their coordinates, in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (Axis, f64)> + '_ {
        Axis::ALL
            .into_iter()
            .filter_map(move |axis| self.get(axis).map(|value| (axis, value)))
    }

    pub fn axes(&self) -> AxisSet {
        self.iter().map(|(axis, _)| axis).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.axes().is_empty()
    }
}

impl FromIterator<(Axis, f64)> for AxisTargets {
    fn from_iter<I: IntoIterator<Item = (Axis, f64)>>(iter: I) -> Self {
        let mut targets = AxisTargets::new();
        for (axis, value) in iter {
            targets.set(axis, Some(value));
        }
        targets
    }
}

/// Floating-point equality with numpy `isclose` default tolerances
pub fn is_close(a: f64, b: f64) -> bool {
    const RTOL: f64 = 1e-5;
    const ATOL: f64 = 1e-8;
    (a - b).abs() <= ATOL + RTOL * b.abs()
}

/// Authoritative position belief plus a bounded history of snapshots
#[derive(Debug, Clone)]
pub struct PositionState {
    current: Position,
    history: VecDeque<Position>,
}

impl Default for PositionState {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionState {
    pub fn new() -> Self {
        let mut state = Self {
            current: Position::zero(),
            history: VecDeque::new(),
        };
        state.record();
        state
    }

    /// Overwrite targeted axes, leave the rest, then record a snapshot
    pub fn merge(&mut self, partial: &AxisTargets) {
        for (axis, value) in partial.iter() {
            self.current.set(axis, value);
        }
        self.record();
    }

    pub fn position(&self) -> Position {
        self.current
    }

    pub fn get(&self, axis: Axis) -> f64 {
        self.current.get(axis)
    }

    /// Oldest first; only for diagnostics
    pub fn history(&self) -> &VecDeque<Position> {
        &self.history
    }

    fn record(&mut self) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(self.current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_letters() {
        for axis in Axis::ALL {
            assert_eq!(Axis::from_letter(axis.letter()), Some(axis));
            assert_eq!(
                Axis::from_letter(axis.letter().to_ascii_lowercase()),
                Some(axis)
            );
        }
        assert_eq!(Axis::from_letter('E'), None);
        assert!(Axis::B.is_plunger());
        assert!(!Axis::Z.is_plunger());
    }

    #[test]
    fn test_axis_set_algebra() {
        let verticals = AxisSet::from_letters("cbaz").unwrap();
        assert_eq!(verticals.letters(), "ZABC");
        assert_eq!(verticals.len(), 4);

        let requested = AxisSet::of(&[Axis::Z, Axis::X]);
        assert_eq!(verticals.intersection(requested).letters(), "Z");
        assert_eq!(verticals.difference(AxisSet::PLUNGERS).letters(), "ZA");
        assert_eq!(verticals.union(requested).letters(), "XZABC");
        assert!(AxisSet::EMPTY.is_empty());
        assert_eq!(AxisSet::ALL.letters(), "XYZABC");
    }

    #[test]
    fn test_axis_set_rejects_unknown_letter() {
        match AxisSet::from_letters("XQ") {
            Err(DriverError::InvalidAxis('Q')) => {}
            other => panic!("expected InvalidAxis('Q'), got {:?}", other),
        }
    }

    #[test]
    fn test_axis_set_serde_as_letters() {
        let set = AxisSet::of(&[Axis::B, Axis::C]);
        assert_eq!(serde_json::to_string(&set).unwrap(), "\"BC\"");
        let parsed: AxisSet = serde_json::from_str("\"zy\"").unwrap();
        assert_eq!(parsed, AxisSet::of(&[Axis::Y, Axis::Z]));
    }

    #[test]
    fn test_merge_only_touches_targeted_axes() {
        let mut state = PositionState::new();
        assert_eq!(state.position(), Position::zero());

        state.merge(&AxisTargets::new().with(Axis::X, 10.0).with(Axis::B, 2.5));
        let pos = state.position();
        assert_eq!(pos.x, 10.0);
        assert_eq!(pos.b, 2.5);
        assert_eq!(pos.y, 0.0);

        state.merge(&AxisTargets::new().with(Axis::Y, 3.0));
        let pos = state.position();
        assert_eq!(pos.x, 10.0);
        assert_eq!(pos.y, 3.0);
    }

    #[test]
    fn test_history_records_every_merge() {
        let mut state = PositionState::new();
        let initial = state.history().len();

        state.merge(&AxisTargets::new().with(Axis::Z, 1.0));
        state.merge(&AxisTargets::new());

        assert_eq!(state.history().len(), initial + 2);
        assert_eq!(state.history().back().unwrap().z, 1.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = PositionState::new();
        for i in 0..(HISTORY_LIMIT + 10) {
            state.merge(&AxisTargets::new().with(Axis::X, i as f64));
        }
        assert_eq!(state.history().len(), HISTORY_LIMIT);
        assert_eq!(
            state.history().back().unwrap().x,
            (HISTORY_LIMIT + 9) as f64
        );
    }

    #[test]
    fn test_targets_iterate_in_canonical_order() {
        let targets = AxisTargets::new().with(Axis::C, 1.0).with(Axis::X, 2.0);
        let axes: Vec<Axis> = targets.iter().map(|(axis, _)| axis).collect();
        assert_eq!(axes, vec![Axis::X, Axis::C]);
        assert_eq!(targets.axes().letters(), "XC");
    }

    #[test]
    fn test_targets_deserialize_missing_axes_as_none() {
        let targets: AxisTargets = serde_json::from_str(r#"{"b": 5}"#).unwrap();
        assert_eq!(targets.b, Some(5.0));
        assert_eq!(targets.x, None);
    }

    #[test]
    fn test_is_close() {
        assert!(is_close(10.0, 10.0));
        assert!(is_close(100.0, 100.0005));
        assert!(!is_close(0.0, 0.001));
        assert!(!is_close(5.0, 0.0));
    }
}
