// Autopilot loop - periodic sense → infer → act cycle over the freshest frame

use crate::core::config::Config;
use crate::core::events::EventBus;
use crate::core::features::ImageFeatureExtractor;
use crate::core::inference::{InferenceEngine, InferenceResult, ModelLoadError, Prediction};
use crate::core::mailbox::FrameMailbox;
use crate::core::motion_state::MotionState;
use crate::core::vehicle::VehicleSink;
use crate::models::frame::Frame;
use crate::models::motion::{MotionCommand, MotionSample, PilotEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

// ==============================================================================
// State
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PilotState {
    Stopped,
    Running,
    Resetting,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do (stopped and already halted, resetting, or stopped mid-tick)
    Idle,
    /// First tick after entering Stopped; neutral command issued
    Halted,
    /// Running but no frame arrived since the last tick; neutral command issued
    NoFrame,
    /// Move command issued
    Moved { turn: i8, forward: i8 },
    /// Feature extraction or inference failed; neutral command issued, motion kept
    Failed,
    /// Another tick was still executing
    Skipped,
}

#[derive(Debug)]
struct FlagState {
    state: PilotState,
    halt_issued: bool,
    /// Bumped on every start, stop and reset; a tick only acts for the generation it began in
    generation: u64,
}

/// Counters for logging and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickStats {
    pub ticks: u64,
    pub moves: u64,
    pub empty: u64,
    pub failures: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct TickCounters {
    ticks: AtomicU64,
    moves: AtomicU64,
    empty: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

// ==============================================================================
// Autopilot Loop
// ==============================================================================

/// Drives the vehicle from the frame mailbox at a fixed period.
///
/// Lock order is motion → flag. Every vehicle command is written while the motion
/// lock is held and after the flag has been re-checked, so `stop()` cannot be
/// overtaken by a tick that started before it.
pub struct AutopilotLoop {
    engine: Arc<InferenceEngine>,
    extractor: ImageFeatureExtractor,
    mailbox: Arc<FrameMailbox>,
    motion: Arc<MotionState>,
    sink: Arc<dyn VehicleSink>,
    period: Duration,
    flag: Mutex<FlagState>,
    tick_guard: Mutex<()>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    counters: TickCounters,
}

impl AutopilotLoop {
    /// Create a stopped autopilot. Fails if the model was trained for a different image size.
    pub fn new(
        engine: Arc<InferenceEngine>,
        extractor: ImageFeatureExtractor,
        mailbox: Arc<FrameMailbox>,
        motion: Arc<MotionState>,
        sink: Arc<dyn VehicleSink>,
        period: Duration,
    ) -> Result<Self, ModelLoadError> {
        engine.check_shape(extractor.shape())?;

        Ok(Self {
            engine,
            extractor,
            mailbox,
            motion,
            sink,
            period,
            flag: Mutex::new(FlagState {
                state: PilotState::Stopped,
                halt_issued: false,
                generation: 0,
            }),
            tick_guard: Mutex::new(()),
            scheduler: Mutex::new(None),
            counters: TickCounters::default(),
        })
    }

    /// Load the model named by `config` and build a stopped, unarmed autopilot.
    ///
    /// Publishes [`PilotEvent::PilotInitialized`] on success and a single
    /// [`PilotEvent::PilotInitError`] on failure.
    pub fn load(
        config: &Config,
        mailbox: Arc<FrameMailbox>,
        motion: Arc<MotionState>,
        sink: Arc<dyn VehicleSink>,
        events: &EventBus,
    ) -> Result<Arc<Self>, ModelLoadError> {
        let built = InferenceEngine::load(&config.model_path).and_then(|engine| {
            Self::new(
                Arc::new(engine),
                ImageFeatureExtractor::for_pilot(config),
                mailbox,
                motion,
                sink,
                config.tick_period(),
            )
        });

        match built {
            Ok(pilot) => {
                info!("Pilot model ready ({})", config.model_path.display());
                events.publish(PilotEvent::PilotInitialized);
                Ok(Arc::new(pilot))
            }
            Err(e) => {
                error!("Pilot model {} unusable: {}", config.model_path.display(), e);
                events.publish(PilotEvent::PilotInitError {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn state(&self) -> PilotState {
        self.lock_flag().state
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> TickStats {
        TickStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            moves: self.counters.moves.load(Ordering::Relaxed),
            empty: self.counters.empty.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// Stopped → Running, keeping the motion history. Arms the scheduler if a
    /// tokio runtime is available.
    pub fn start(self: &Arc<Self>) -> bool {
        let started = {
            let mut flag = self.lock_flag();
            if flag.state == PilotState::Stopped {
                flag.state = PilotState::Running;
                flag.halt_issued = false;
                flag.generation += 1;
                true
            } else {
                false
            }
        };

        if started {
            info!("Autopilot started");
        }
        self.arm();
        started
    }

    /// Discard stale input and motion history, then run. The model is not reloaded.
    pub fn reset(self: &Arc<Self>) {
        {
            let mut flag = self.lock_flag();
            flag.state = PilotState::Resetting;
            flag.halt_issued = false;
            flag.generation += 1;
        }

        self.mailbox.clear();
        self.motion.reset();

        {
            let mut flag = self.lock_flag();
            // A concurrent stop() wins over the reset.
            if flag.state == PilotState::Resetting {
                flag.state = PilotState::Running;
            }
        }

        info!("Autopilot reset");
        self.arm();
    }

    /// Enter Stopped and command the vehicle to halt. Returns false when the
    /// autopilot was already stopped and halted, in which case nothing is sent.
    ///
    /// The flag change and the neutral command happen under the motion lock as one
    /// step, so no in-flight tick can issue a move after this returns.
    pub fn stop(&self) -> bool {
        let sample = self.motion.update_with(|_| {
            let mut flag = self.lock_flag();
            if flag.state == PilotState::Stopped && flag.halt_issued {
                return None;
            }
            flag.state = PilotState::Stopped;
            flag.halt_issued = true;
            flag.generation += 1;
            self.sink.send(MotionCommand::NEUTRAL);
            Some((0, 0))
        });

        match sample {
            Some(sample) => {
                info!("Autopilot stopped (motion {:?})", sample);
                true
            }
            None => false,
        }
    }

    /// Stop and disarm the scheduler
    pub fn shutdown(&self) {
        self.stop();
        if let Some(handle) = self.lock_scheduler().take() {
            handle.abort();
        }
    }

    /// Run one sense → infer → act cycle.
    ///
    /// Never overlaps with itself: a tick that finds another one executing returns
    /// [`TickOutcome::Skipped`] immediately.
    pub fn tick(&self) -> TickOutcome {
        let _guard = match self.tick_guard.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                trace!("Autopilot tick skipped, previous tick still running");
                return TickOutcome::Skipped;
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let (state, generation) = self.flag_snapshot();
        match state {
            PilotState::Stopped => return self.halt_once(),
            PilotState::Resetting => return TickOutcome::Idle,
            PilotState::Running => {}
        }

        let Some(frame) = self.mailbox.take_and_clear() else {
            self.counters.empty.fetch_add(1, Ordering::Relaxed);
            return self.command_neutral(TickOutcome::NoFrame, true, generation);
        };

        let motion = self.motion.snapshot();
        match self.predict(&frame, &motion) {
            Ok(prediction) => self.command_move(prediction, generation),
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Autopilot tick failed: {}", e);
                self.command_neutral(TickOutcome::Failed, false, generation)
            }
        }
    }

    fn predict(&self, frame: &Frame, motion: &MotionSample) -> InferenceResult<Prediction> {
        let features = self.extractor.features(frame, motion)?;
        self.engine.infer(&features)
    }

    fn command_move(&self, prediction: Prediction, generation: u64) -> TickOutcome {
        let applied = self.motion.update_with(|_| {
            if !self.is_current(generation) {
                return None;
            }
            self.sink
                .send(MotionCommand::moving(prediction.turn, prediction.forward));
            Some((prediction.turn, prediction.forward))
        });

        match applied {
            Some(sample) => {
                self.counters.moves.fetch_add(1, Ordering::Relaxed);
                debug!("Autopilot move turn={} forward={}", sample.turn, sample.forward);
                TickOutcome::Moved {
                    turn: sample.turn,
                    forward: sample.forward,
                }
            }
            None => TickOutcome::Idle,
        }
    }

    /// Neutral command while running; `zero_motion` also records (0, 0) as the new motion
    fn command_neutral(
        &self,
        outcome: TickOutcome,
        zero_motion: bool,
        generation: u64,
    ) -> TickOutcome {
        let mut issued = false;
        self.motion.update_with(|_| {
            if !self.is_current(generation) {
                return None;
            }
            self.sink.send(MotionCommand::NEUTRAL);
            issued = true;
            zero_motion.then_some((0, 0))
        });

        if issued {
            outcome
        } else {
            TickOutcome::Idle
        }
    }

    fn halt_once(&self) -> TickOutcome {
        let mut issued = false;
        self.motion.update_with(|_| {
            let mut flag = self.lock_flag();
            if flag.state != PilotState::Stopped || flag.halt_issued {
                return None;
            }
            flag.halt_issued = true;
            self.sink.send(MotionCommand::NEUTRAL);
            issued = true;
            Some((0, 0))
        });

        if issued {
            TickOutcome::Halted
        } else {
            TickOutcome::Idle
        }
    }

    fn flag_snapshot(&self) -> (PilotState, u64) {
        let flag = self.lock_flag();
        (flag.state, flag.generation)
    }

    /// Still running, with no start, stop or reset since `generation` was read
    fn is_current(&self, generation: u64) -> bool {
        let flag = self.lock_flag();
        flag.state == PilotState::Running && flag.generation == generation
    }

    // ==========================================================================
    // Scheduling
    // ==========================================================================

    /// Arm the scheduler on the current tokio runtime, if there is one.
    fn arm(self: &Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => self.spawn(&runtime),
            Err(_) => debug!("No tokio runtime; autopilot ticks must be driven manually"),
        }
    }

    /// Spawn the periodic tick task on `runtime` unless one is already running.
    ///
    /// Overdue ticks are skipped rather than queued; each tick runs on the blocking
    /// pool because feature extraction and inference are CPU bound. The task only
    /// holds a weak reference and ends once the loop has been dropped.
    pub fn spawn(self: &Arc<Self>, runtime: &tokio::runtime::Handle) {
        let mut scheduler = self.lock_scheduler();
        if scheduler.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let pilot = Arc::downgrade(self);
        let period = self.period;
        *scheduler = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Autopilot scheduler armed ({:?} period)", period);

            loop {
                ticker.tick().await;
                let Some(pilot) = Weak::upgrade(&pilot) else {
                    debug!("Autopilot dropped; scheduler exiting");
                    break;
                };
                match tokio::task::spawn_blocking(move || pilot.tick()).await {
                    Ok(outcome) => trace!("Autopilot tick: {:?}", outcome),
                    Err(e) => error!("Autopilot tick panicked: {}", e),
                }
            }
        }));
    }

    pub fn is_armed(&self) -> bool {
        self.lock_scheduler()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn lock_flag(&self) -> MutexGuard<'_, FlagState> {
        self.flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_scheduler(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for AutopilotLoop {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.lock_scheduler().take() {
            handle.abort();
        }
    }
}
