// Data models for vehicle motion and autopilot notifications

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ==============================================================================
// Motion
// ==============================================================================

/// Speeds in effect after the most recent motion update, together with the
/// speeds that were in effect just before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionSample {
    pub turn: i8,
    pub forward: i8,
    pub prev_turn: i8,
    pub prev_forward: i8,
}

impl MotionSample {
    /// The sample that results from applying `(turn, forward)` on top of `self`
    pub fn advance(&self, turn: i8, forward: i8) -> Self {
        Self {
            turn,
            forward,
            prev_turn: self.turn,
            prev_forward: self.forward,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.turn == 0 && self.forward == 0
    }
}

/// Command written to the vehicle sink by one autopilot tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionCommand {
    pub turn: i8,
    pub forward: i8,
    pub engaged: bool,
}

impl MotionCommand {
    /// Zero motion, disengaged
    pub const NEUTRAL: MotionCommand = MotionCommand {
        turn: 0,
        forward: 0,
        engaged: false,
    };

    pub fn moving(turn: i8, forward: i8) -> Self {
        Self {
            turn,
            forward,
            engaged: true,
        }
    }
}

// ==============================================================================
// Events
// ==============================================================================

/// Notifications pushed from the core to UI and other listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PilotEvent {
    MotionUpdated(MotionSample),
    QueueItemAdded {
        run_number: u32,
        pending: usize,
    },
    QueueItemConsumed {
        run_number: u32,
        file: Option<PathBuf>,
    },
    ConsumptionFinished {
        run_number: u32,
        written: u64,
        dropped: u64,
    },
    PilotInitialized,
    PilotInitError {
        reason: String,
    },
}
