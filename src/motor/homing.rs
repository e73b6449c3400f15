// Homing order and the calibrated home coordinates
//
// The mounts (Z, A) and plungers (B, C) retract first so the gantry never
// travels with a pipette lowered. X homes before Y.

use super::position::{Axis, AxisSet, AxisTargets};

/// Homing groups, in the order they must run
pub const HOME_SEQUENCE: [AxisSet; 3] = [AxisSet::VERTICALS, AxisSet::X_ONLY, AxisSet::Y_ONLY];

/// Coordinate each axis is assumed to reach once homed
pub fn homed_position(axis: Axis) -> f64 {
    match axis {
        Axis::X => 394.0,
        Axis::Y => 344.0,
        Axis::Z => 227.0,
        Axis::A => 227.0,
        Axis::B => 18.9997,
        Axis::C => 18.9997,
    }
}

/// Add the axes that must home alongside the requested ones
///
/// Y requires X, and X requires both mounts raised.
pub fn expand_request(requested: AxisSet) -> AxisSet {
    let mut axes = requested;
    if axes.contains(Axis::Y) {
        axes.insert(Axis::X);
    }
    if axes.contains(Axis::X) {
        axes.insert(Axis::Z);
        axes.insert(Axis::A);
    }
    axes
}

/// Non-empty homing groups for a request, in sequence order
pub fn plan(requested: AxisSet, disabled: AxisSet) -> Vec<AxisSet> {
    let axes = expand_request(requested);
    HOME_SEQUENCE
        .iter()
        .map(|group| group.intersection(axes).difference(disabled))
        .filter(|group| !group.is_empty())
        .collect()
}

/// Home coordinates for every axis in `groups`
pub fn homed_targets(groups: &[AxisSet]) -> AxisTargets {
    groups
        .iter()
        .flat_map(|group| group.iter())
        .map(|axis| (axis, homed_position(axis)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letters(groups: &[AxisSet]) -> Vec<String> {
        groups.iter().map(|g| g.letters()).collect()
    }

    fn set(letters: &str) -> AxisSet {
        AxisSet::from_letters(letters).unwrap()
    }

    #[test]
    fn test_home_all() {
        assert_eq!(letters(&plan(AxisSet::ALL, AxisSet::EMPTY)), ["ZABC", "X", "Y"]);
    }

    #[test]
    fn test_y_pulls_in_x_and_mounts() {
        assert_eq!(letters(&plan(set("y"), AxisSet::EMPTY)), ["ZA", "X", "Y"]);
    }

    #[test]
    fn test_x_pulls_in_mounts_only() {
        assert_eq!(letters(&plan(set("X"), AxisSet::EMPTY)), ["ZA", "X"]);
    }

    #[test]
    fn test_plunger_alone() {
        assert_eq!(letters(&plan(set("C"), AxisSet::EMPTY)), ["C"]);
        assert_eq!(letters(&plan(set("AC"), AxisSet::EMPTY)), ["AC"]);
    }

    #[test]
    fn test_disabled_axes_are_removed() {
        assert_eq!(letters(&plan(set("Y"), set("A"))), ["Z", "X", "Y"]);
        assert_eq!(letters(&plan(set("X"), set("ZA"))), ["X"]);
        assert!(plan(set("B"), set("B")).is_empty());
    }

    #[test]
    fn test_order_holds_for_every_request() {
        for requested_bits in 0u8..64 {
            let requested: AxisSet = Axis::ALL
                .into_iter()
                .enumerate()
                .filter(|(i, _)| requested_bits & (1 << i) != 0)
                .map(|(_, axis)| axis)
                .collect();
            for disabled in [AxisSet::EMPTY, set("A"), set("X"), set("BC")] {
                let groups = plan(requested, disabled);

                // Groups only ever appear in sequence order
                let rank = |group: &AxisSet| {
                    HOME_SEQUENCE
                        .iter()
                        .position(|seq| !seq.intersection(*group).is_empty())
                        .unwrap()
                };
                let ranks: Vec<usize> = groups.iter().map(rank).collect();
                assert!(ranks.windows(2).all(|w| w[0] < w[1]), "{:?}", letters(&groups));

                let homed = groups.iter().fold(AxisSet::EMPTY, |acc, g| acc.union(*g));
                assert!(homed.intersection(disabled).is_empty());
                if homed.contains(Axis::Y) {
                    assert!(homed.contains(Axis::X) || disabled.contains(Axis::X));
                }
                for mount in [Axis::Z, Axis::A] {
                    if homed.contains(Axis::X) {
                        assert!(homed.contains(mount) || disabled.contains(mount));
                    }
                }
            }
        }
    }

    #[test]
    fn test_homed_targets_cover_only_homed_axes() {
        let targets = homed_targets(&plan(set("X"), AxisSet::EMPTY));
        assert_eq!(targets.axes().letters(), "XZA");
        assert_eq!(targets.x, Some(394.0));
        assert_eq!(targets.z, Some(227.0));
        assert_eq!(targets.b, None);
    }
}
