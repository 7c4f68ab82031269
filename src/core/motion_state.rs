// Live motion state shared by the autopilot, the recorder and the UI

use crate::core::events::EventBus;
use crate::models::motion::{MotionSample, PilotEvent};
use std::sync::{Mutex, MutexGuard};

/// Current and previous (turn, forward) speeds.
///
/// Every change publishes [`PilotEvent::MotionUpdated`] while the lock is still
/// held, so listeners observe updates in the order they were applied. Readers get
/// a copy; a snapshot never changes after it was taken.
#[derive(Debug)]
pub struct MotionState {
    current: Mutex<MotionSample>,
    events: EventBus,
}

impl MotionState {
    pub fn new(events: EventBus) -> Self {
        Self {
            current: Mutex::new(MotionSample::default()),
            events,
        }
    }

    /// Consistent copy of the current sample
    pub fn snapshot(&self) -> MotionSample {
        *self.lock()
    }

    /// Apply new speeds; the speeds they replace become the `prev_*` values
    pub fn update(&self, turn: i8, forward: i8) -> MotionSample {
        let mut current = self.lock();
        self.apply(&mut current, turn, forward)
    }

    /// Change only the turn speed
    pub fn set_turn(&self, turn: i8) -> MotionSample {
        let mut current = self.lock();
        let forward = current.forward;
        self.apply(&mut current, turn, forward)
    }

    /// Change only the forward speed
    pub fn set_forward(&self, forward: i8) -> MotionSample {
        let mut current = self.lock();
        let turn = current.turn;
        self.apply(&mut current, turn, forward)
    }

    /// Run `decide` under the motion lock and apply the speeds it returns.
    ///
    /// Anything `decide` does (such as writing a vehicle command) is serialized
    /// against every other motion update. Returning `None` leaves the state untouched.
    pub fn update_with<F>(&self, decide: F) -> Option<MotionSample>
    where
        F: FnOnce(&MotionSample) -> Option<(i8, i8)>,
    {
        let mut current = self.lock();
        let (turn, forward) = decide(&current)?;
        Some(self.apply(&mut current, turn, forward))
    }

    /// Forget all motion history
    pub fn reset(&self) -> MotionSample {
        let mut current = self.lock();
        *current = MotionSample::default();
        self.events.publish(PilotEvent::MotionUpdated(*current));
        *current
    }

    fn apply(&self, current: &mut MotionSample, turn: i8, forward: i8) -> MotionSample {
        *current = current.advance(turn, forward);
        self.events.publish(PilotEvent::MotionUpdated(*current));
        *current
    }

    fn lock(&self) -> MutexGuard<'_, MotionSample> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
