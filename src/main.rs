use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use pipette_gantry::config::DriverConfig;
use pipette_gantry::motor::{self, AxisSet, AxisTargets, ConnectionMode, MotionDriver};
use pipette_gantry::{jog, runtime};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "pipette-gantry", version, about = "Drive a Smoothieware pipette gantry over serial")]
struct Cli {
    /// Substring of the controller's port name or USB descriptor
    #[arg(long, global = true)]
    port_hint: Option<String>,

    /// Never touch the serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Axes to leave out of every move and home, e.g. "BC"
    #[arg(long, global = true)]
    disable: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// List serial ports
    Ports,
    /// Print mode, position and limit switches
    Status,
    /// Home axes (dependent axes are added automatically)
    Home {
        #[arg(default_value = "XYZABC")]
        axes: String,
    },
    /// Move to absolute coordinates (mm)
    Move {
        #[arg(long, allow_hyphen_values = true)]
        x: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        y: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        z: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        a: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        b: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        c: Option<f64>,
        /// mm/s
        #[arg(long)]
        speed: Option<f64>,
    },
    /// Probe along one axis
    Probe {
        axis: char,
        #[arg(allow_hyphen_values = true)]
        distance: f64,
    },
    /// Set motor current (amps) on the given axes
    Current { axes: String, amps: f64 },
    /// Set the combined feed rate (mm/s)
    Speed { mm_per_second: f64 },
    Enable,
    Disable,
    /// Run JSON-lines commands from a file, or stdin when omitted
    Run { script: Option<PathBuf> },
    /// Jog from the keyboard
    Jog,
}

fn main() {
    // Setup logging (set RUST_LOG=info or debug); stdout is kept for reports
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), BoxError> {
    if let CliCommand::Ports = cli.command {
        for port in motor::connection::list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let mut config = DriverConfig::from_env();
    if let Some(hint) = cli.port_hint {
        config.port_hint = hint;
    }
    if cli.simulate {
        config.virtual_controller = true;
    }

    let mut driver = MotionDriver::with_config(config);
    if let Some(axes) = cli.disable {
        driver.set_disabled_axes(AxisSet::from_letters(&axes)?);
    }
    let result = driver
        .connect()
        .map_err(BoxError::from)
        .and_then(|_| dispatch(&mut driver, cli.command));

    // Leave the stage de-energized after any failure
    if let Err(e) = &result {
        if driver.mode() == ConnectionMode::Connected {
            warn!("Disabling motors after failure: {}", e);
            if let Err(disable_err) = driver.disable_motors() {
                warn!("Failed to disable motors: {}", disable_err);
            }
        }
    }
    result
}

fn dispatch(driver: &mut MotionDriver, command: CliCommand) -> Result<(), BoxError> {
    match command {
        CliCommand::Ports => {}
        CliCommand::Status => {
            let position = driver.refresh_position(None)?;
            let switches = driver.switch_state()?;
            let status = json!({
                "mode": driver.mode(),
                "disabled": driver.disabled_axes(),
                "position": position,
                "switches": switches.map(|s| s.trim().to_string()),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        CliCommand::Home { axes } => {
            let homed = driver.home(AxisSet::from_letters(&axes)?)?;
            println!("{}", serde_json::to_string(&homed)?);
        }
        CliCommand::Move { x, y, z, a, b, c, speed } => {
            let targets = AxisTargets { x, y, z, a, b, c };
            driver.move_to(&targets, speed)?;
            println!("{}", serde_json::to_string(&driver.position())?);
        }
        CliCommand::Probe { axis, distance } => {
            println!("{}", driver.probe_axis(axis, distance)?);
        }
        CliCommand::Current { axes, amps } => {
            driver.set_current(AxisSet::from_letters(&axes)?, amps)?;
        }
        CliCommand::Speed { mm_per_second } => driver.set_speed(mm_per_second)?,
        CliCommand::Enable => driver.enable_motors()?,
        CliCommand::Disable => driver.disable_motors()?,
        CliCommand::Run { script } => {
            let steps = match script {
                Some(path) => runtime::run(driver, BufReader::new(File::open(path)?), io::stdout())?,
                None => runtime::run(driver, io::stdin().lock(), io::stdout())?,
            };
            eprintln!("{} steps completed", steps);
        }
        CliCommand::Jog => jog::run(driver)?,
    }
    Ok(())
}
