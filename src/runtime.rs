// Script runner: JSON-lines driver commands in, JSON step reports out
//
// Blank lines and lines starting with '#' are skipped. Execution stops at the
// first failing step; de-energizing the stage afterwards is the caller's job.

use std::io::{BufRead, Write};

use tracing::{info, warn};

use crate::messages::{DriverCommand, StepReport, StepStatus};
use crate::motor::{self, MotionDriver};

/// Apply one command to the driver, returning any text worth reporting
pub fn execute(driver: &mut MotionDriver, command: &DriverCommand) -> motor::Result<Option<String>> {
    match command {
        DriverCommand::Move { targets, speed } => {
            driver.move_to(targets, *speed)?;
            Ok(None)
        }
        DriverCommand::Home { axes } => {
            let homed = driver.home(*axes)?;
            Ok(Some(format!("homed {}", homed.axes())))
        }
        DriverCommand::Probe { axis, distance } => {
            let coordinate = driver.probe_axis(*axis, *distance)?;
            Ok(Some(coordinate.to_string()))
        }
        DriverCommand::Delay { seconds } => driver.delay(*seconds).map(|_| None),
        DriverCommand::SetSpeed { mm_per_second } => driver.set_speed(*mm_per_second).map(|_| None),
        DriverCommand::SetCurrent { axes, amps } => driver.set_current(*axes, *amps).map(|_| None),
        DriverCommand::EnableMotors => driver.enable_motors().map(|_| None),
        DriverCommand::DisableMotors => driver.disable_motors().map(|_| None),
        DriverCommand::ResetFromError => driver.reset_from_error().map(|_| None),
        DriverCommand::SwitchState => driver.switch_state(),
        DriverCommand::RefreshPosition => driver.refresh_position(None).map(|_| None),
    }
}

/// Run every command in `input`, writing one report per step to `output`
///
/// Returns the number of steps executed.
pub fn run<R: BufRead, W: Write>(
    driver: &mut MotionDriver,
    input: R,
    mut output: W,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let mut step = 0;

    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        step += 1;
        let command: DriverCommand = match serde_json::from_str(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("Failed to parse step {}: {}", step, e);
                report(&mut output, driver, step, Err(format!("invalid command: {}", e)))?;
                return Err(e.into());
            }
        };

        info!("Step {}: {:?}", step, command);
        match execute(driver, &command) {
            Ok(response) => report(&mut output, driver, step, Ok(response))?,
            Err(e) => {
                warn!("Step {} failed: {}", step, e);
                report(&mut output, driver, step, Err(e.to_string()))?;
                return Err(e.into());
            }
        }
    }

    info!("Script finished after {} steps", step);
    Ok(step)
}

fn report<W: Write>(
    output: &mut W,
    driver: &MotionDriver,
    step: usize,
    outcome: Result<Option<String>, String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (status, response, error) = match outcome {
        Ok(response) => (StepStatus::Ok, response, None),
        Err(error) => (StepStatus::Failed, None, Some(error)),
    };
    let report = StepReport {
        step,
        status,
        position: driver.position(),
        response,
        error,
    };
    writeln!(output, "{}", serde_json::to_string(&report)?)?;
    Ok(())
}
