// Pilot session - the frame-arrival path shared by the autopilot and the recorder

use crate::core::events::EventBus;
use crate::core::frame_source::FrameSource;
use crate::core::mailbox::FrameMailbox;
use crate::core::motion_state::MotionState;
use crate::core::recorder::Recorder;
use crate::core::recording_queue::EnqueueOutcome;
use crate::models::frame::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Owns the state every arriving frame fans out to
pub struct PilotSession {
    mailbox: Arc<FrameMailbox>,
    motion: Arc<MotionState>,
    recorder: Arc<Recorder>,
    events: EventBus,
    frames_received: AtomicU64,
}

impl PilotSession {
    pub fn new(recorder: Arc<Recorder>, events: EventBus) -> Self {
        Self {
            mailbox: Arc::new(FrameMailbox::new()),
            motion: Arc::new(MotionState::new(events.clone())),
            recorder,
            events,
            frames_received: AtomicU64::new(0),
        }
    }

    pub fn mailbox(&self) -> &Arc<FrameMailbox> {
        &self.mailbox
    }

    pub fn motion(&self) -> &Arc<MotionState> {
        &self.motion
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Hand a newly arrived frame to the autopilot and, while recording, to the
    /// recorder together with the current motion. Never blocks on either consumer.
    pub fn on_frame(&self, frame: Frame) -> EnqueueOutcome {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.mailbox.set(frame.clone());
        self.recorder.enqueue(self.motion.snapshot(), frame)
    }

    /// Feed every frame of `source` into the session until it is exhausted
    pub async fn pump<S: FrameSource + ?Sized>(&self, source: &mut S) -> u64 {
        let mut delivered = 0u64;
        while let Some(frame) = source.next_frame().await {
            self.on_frame(frame);
            delivered += 1;
        }
        info!("Frame source exhausted after {} frames", delivered);
        delivered
    }
}
