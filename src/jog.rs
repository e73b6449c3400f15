// Keyboard jog: arrows X/Y, W/S Z, I/K A, R/F step size, H home, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tracing::info;

use crate::motor::{Axis, AxisSet, AxisTargets, MotionDriver};

const STEPS_MM: [f64; 3] = [0.1, 1.0, 10.0];

#[derive(Debug, Clone, Copy, PartialEq)]
enum JogAction {
    Jog(Axis, f64),
    Finer,
    Coarser,
    Home,
    Quit,
    Ignore,
}

fn action_for(code: KeyCode, step: f64) -> JogAction {
    match code {
        KeyCode::Left => JogAction::Jog(Axis::X, -step),
        KeyCode::Right => JogAction::Jog(Axis::X, step),
        KeyCode::Up => JogAction::Jog(Axis::Y, step),
        KeyCode::Down => JogAction::Jog(Axis::Y, -step),
        KeyCode::Char('w') => JogAction::Jog(Axis::Z, step),
        KeyCode::Char('s') => JogAction::Jog(Axis::Z, -step),
        KeyCode::Char('i') => JogAction::Jog(Axis::A, step),
        KeyCode::Char('k') => JogAction::Jog(Axis::A, -step),
        KeyCode::Char('r') => JogAction::Coarser,
        KeyCode::Char('f') => JogAction::Finer,
        KeyCode::Char('h') => JogAction::Home,
        KeyCode::Char('q') | KeyCode::Esc => JogAction::Quit,
        _ => JogAction::Ignore,
    }
}

/// Jog the gantry from the keyboard until Q or Esc
pub fn run(driver: &mut MotionDriver) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Controls: arrows=X/Y, W/S=Z, I/K=A, R/F=step, H=home, Q=quit");
    print_step(1);

    enable_raw_mode()?;
    let result = jog_loop(driver);
    disable_raw_mode()?;

    result
}

fn jog_loop(driver: &mut MotionDriver) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut step_idx: usize = 1;

    loop {
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind == KeyEventKind::Release {
            continue;
        }

        match action_for(code, STEPS_MM[step_idx]) {
            JogAction::Jog(axis, delta) => {
                let target = driver.position().get(axis) + delta;
                driver.move_to(&AxisTargets::new().with(axis, target), None)?;
                info!("{} -> {:.3}", axis, target);
            }
            JogAction::Coarser => {
                step_idx = (step_idx + 1).min(STEPS_MM.len() - 1);
                print_step(step_idx);
            }
            JogAction::Finer => {
                step_idx = step_idx.saturating_sub(1);
                print_step(step_idx);
            }
            JogAction::Home => {
                driver.home(AxisSet::ALL)?;
                info!("Homed: {:?}", driver.position());
            }
            JogAction::Quit => break,
            JogAction::Ignore => {}
        }
    }

    Ok(())
}

fn print_step(idx: usize) {
    info!("Step: {} mm", STEPS_MM[idx]);
}
