// Vehicle command sink - where the autopilot's speed commands go

use crate::models::motion::MotionCommand;
use std::sync::Mutex;
use tracing::debug;

/// Fire-and-forget command interface of the remote vehicle.
///
/// Implementations must not block for long: the autopilot calls these from its
/// tick while holding the motion lock.
pub trait VehicleSink: Send + Sync {
    fn set_speed(&self, forward: i8);

    fn set_turn(&self, turn: i8);

    fn set_flag(&self, engaged: bool);

    /// Write a complete command
    fn send(&self, command: MotionCommand) {
        self.set_speed(command.forward);
        self.set_turn(command.turn);
        self.set_flag(command.engaged);
    }
}

/// Sink that only logs, for running without a vehicle
#[derive(Debug, Default)]
pub struct LoggingSink;

impl VehicleSink for LoggingSink {
    fn set_speed(&self, forward: i8) {
        debug!("vehicle speed {}", forward);
    }

    fn set_turn(&self, turn: i8) {
        debug!("vehicle turn {}", turn);
    }

    fn set_flag(&self, engaged: bool) {
        debug!("vehicle flag {}", engaged as u8);
    }
}

/// Sink that remembers every complete command it received
#[derive(Debug, Default)]
pub struct CommandLog {
    commands: Mutex<Vec<MotionCommand>>,
    pending: Mutex<MotionCommand>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<MotionCommand> {
        self.commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<MotionCommand> {
        self.commands.lock().ok().and_then(|c| c.last().copied())
    }

    pub fn clear(&self) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.clear();
        }
    }
}

impl VehicleSink for CommandLog {
    fn set_speed(&self, forward: i8) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.forward = forward;
        }
    }

    fn set_turn(&self, turn: i8) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.turn = turn;
        }
    }

    // The flag is the last field the autopilot writes, so it completes a command.
    fn set_flag(&self, engaged: bool) {
        let command = match self.pending.lock() {
            Ok(mut pending) => {
                pending.engaged = engaged;
                *pending
            }
            Err(_) => return,
        };
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command);
        }
    }
}
