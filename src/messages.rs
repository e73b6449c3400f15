// Message types for the script runner

use serde::{Deserialize, Serialize};

use crate::motor::{AxisSet, AxisTargets, Position};

// One driver operation per JSON line, e.g.
//   {"op": "home", "axes": "ZA"}
//   {"op": "move", "b": 5, "speed": 8}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DriverCommand {
    Move {
        #[serde(flatten)]
        targets: AxisTargets,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
    },
    Home {
        #[serde(default = "all_axes")]
        axes: AxisSet,
    },
    Probe {
        axis: char,
        distance: f64,
    },
    Delay {
        seconds: f64,
    },
    SetSpeed {
        mm_per_second: f64,
    },
    SetCurrent {
        axes: AxisSet,
        amps: f64,
    },
    EnableMotors,
    DisableMotors,
    ResetFromError,
    SwitchState,
    RefreshPosition,
}

fn all_axes() -> AxisSet {
    AxisSet::ALL
}

/// Outcome of one script step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Failed,
}

/// Printed after every step, successful or not
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub status: StepStatus,
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
