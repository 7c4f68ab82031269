// Recording queue - throttled hand-off of (motion, frame) pairs to the recording consumer

use crate::core::events::EventBus;
use crate::core::storage::{prepare_run_directory, RunSession, StorageResult};
use crate::models::frame::Frame;
use crate::models::motion::{MotionSample, PilotEvent};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// One frame to record together with the motion in effect when it arrived
#[derive(Debug, Clone)]
pub struct RecordItem {
    pub sample: MotionSample,
    pub frame: Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Admitted,
    /// Dropped by the frame-skip throttle
    Throttled,
    /// No run is open
    Inactive,
}

/// Shared between the queue and the receiving end of one run
#[derive(Debug, Default)]
struct RunShared {
    pending: AtomicUsize,
    finishing: AtomicBool,
}

#[derive(Debug)]
struct ActiveRun {
    run_number: u32,
    counter: u64,
    sender: mpsc::UnboundedSender<RecordItem>,
    shared: Arc<RunShared>,
}

// ==============================================================================
// Producer Side
// ==============================================================================

/// Unbounded FIFO of recordings for the current run, with a frame-skip throttle.
///
/// The admission counter and the sender live under one mutex: `finish()` drops the
/// sender, so every item admitted before it is already in the channel and the
/// consumer sees it before the channel reports closed.
#[derive(Debug)]
pub struct RecordingQueue {
    skip_count: i32,
    run: Mutex<Option<ActiveRun>>,
    events: EventBus,
}

impl RecordingQueue {
    pub fn new(skip_count: i32, events: EventBus) -> Self {
        Self {
            skip_count,
            run: Mutex::new(None),
            events,
        }
    }

    pub fn skip_count(&self) -> i32 {
        self.skip_count
    }

    /// Open run `run_number`: recreate `output_directory` empty, reset the throttle
    /// and hand back the receiving end.
    ///
    /// A run that is still open is finished first; its consumer drains it as usual.
    pub fn start_run(
        &self,
        run_number: u32,
        output_directory: PathBuf,
    ) -> StorageResult<QueueReceiver> {
        prepare_run_directory(&output_directory)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(RunShared::default());

        let previous = self.lock().replace(ActiveRun {
            run_number,
            counter: 0,
            sender,
            shared: shared.clone(),
        });
        if let Some(previous) = previous {
            warn!(
                "Recording run {} replaced by run {} before it was finished",
                previous.run_number, run_number
            );
            previous.shared.finishing.store(true, Ordering::SeqCst);
        }

        info!(
            "Recording run {} started in {}",
            run_number,
            output_directory.display()
        );

        Ok(QueueReceiver {
            session: RunSession::new(run_number, output_directory),
            receiver,
            shared,
        })
    }

    /// Offer a frame for recording. Never blocks.
    ///
    /// The first frame of a run is always admitted, then one of every
    /// `skip_count + 1` arrivals; `skip_count <= 0` admits everything.
    pub fn enqueue(&self, sample: MotionSample, frame: Frame) -> EnqueueOutcome {
        let mut guard = self.lock();
        let Some(run) = guard.as_mut() else {
            return EnqueueOutcome::Inactive;
        };

        let admit = self.skip_count <= 0 || run.counter % (self.skip_count as u64 + 1) == 0;
        run.counter += 1;
        if !admit {
            return EnqueueOutcome::Throttled;
        }

        run.shared.pending.fetch_add(1, Ordering::SeqCst);
        if run.sender.send(RecordItem { sample, frame }).is_err() {
            run.shared.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Recording run {} has no consumer; frame dropped", run.run_number);
            return EnqueueOutcome::Inactive;
        }

        let pending = run.shared.pending.load(Ordering::SeqCst);
        debug!("Recording queued for run {} ({} pending)", run.run_number, pending);
        self.events.publish(PilotEvent::QueueItemAdded {
            run_number: run.run_number,
            pending,
        });
        EnqueueOutcome::Admitted
    }

    /// Close the current run. Items already admitted are still delivered; returns
    /// the number of the run that was closed.
    pub fn finish(&self) -> Option<u32> {
        let run = self.lock().take()?;
        run.shared.finishing.store(true, Ordering::SeqCst);
        info!(
            "Recording run {} finishing ({} pending)",
            run.run_number,
            run.shared.pending.load(Ordering::SeqCst)
        );
        Some(run.run_number)
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    pub fn current_run(&self) -> Option<u32> {
        self.lock().as_ref().map(|run| run.run_number)
    }

    /// Items admitted to the current run and not yet dequeued
    pub fn pending(&self) -> usize {
        self.lock()
            .as_ref()
            .map(|run| run.shared.pending.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ==============================================================================
// Consumer Side
// ==============================================================================

/// Receiving end of one run, owned by its consumer
#[derive(Debug)]
pub struct QueueReceiver {
    session: RunSession,
    receiver: mpsc::UnboundedReceiver<RecordItem>,
    shared: Arc<RunShared>,
}

impl QueueReceiver {
    pub fn session(&self) -> &RunSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut RunSession {
        &mut self.session
    }

    pub fn run_number(&self) -> u32 {
        self.session.run_number
    }

    /// Oldest pending item, if any. Never blocks.
    pub fn dequeue(&mut self) -> Option<RecordItem> {
        match self.receiver.try_recv() {
            Ok(item) => {
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                Some(item)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next item. Returns `None` once the run is finished and drained.
    ///
    /// Must be called from a plain thread, not from inside an async task.
    pub fn next_blocking(&mut self) -> Option<RecordItem> {
        let item = self.receiver.blocking_recv()?;
        self.shared.pending.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }

    /// `finish()` was called; remaining items are the backlog to drain
    pub fn is_finishing(&self) -> bool {
        self.shared.finishing.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::drain_events;

    fn frame(tag: u8) -> Frame {
        Frame::with_timestamp(tag as i64, vec![tag])
    }

    fn queue(skip: i32) -> (RecordingQueue, tempfile::TempDir) {
        (
            RecordingQueue::new(skip, EventBus::default()),
            tempfile::tempdir().unwrap(),
        )
    }

    fn drain(receiver: &mut QueueReceiver) -> Vec<u8> {
        std::iter::from_fn(|| receiver.dequeue())
            .map(|item| item.frame.data()[0])
            .collect()
    }

    #[test]
    fn test_inactive_without_run() {
        let (queue, _temp) = queue(0);
        assert_eq!(
            queue.enqueue(MotionSample::default(), frame(1)),
            EnqueueOutcome::Inactive
        );
        assert_eq!(queue.finish(), None);
    }

    #[test]
    fn test_throttle_admits_one_of_every_skip_plus_one() {
        let (queue, temp) = queue(2);
        let mut receiver = queue.start_run(1, temp.path().join("run1")).unwrap();

        let outcomes: Vec<_> = (0..7)
            .map(|i| queue.enqueue(MotionSample::default(), frame(i)))
            .collect();

        assert_eq!(
            outcomes,
            vec![
                EnqueueOutcome::Admitted,
                EnqueueOutcome::Throttled,
                EnqueueOutcome::Throttled,
                EnqueueOutcome::Admitted,
                EnqueueOutcome::Throttled,
                EnqueueOutcome::Throttled,
                EnqueueOutcome::Admitted,
            ]
        );
        assert_eq!(queue.pending(), 3);
        assert_eq!(drain(&mut receiver), vec![0, 3, 6]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_non_positive_skip_admits_everything() {
        for skip in [0, -1] {
            let (queue, temp) = queue(skip);
            let mut receiver = queue.start_run(1, temp.path().join("run1")).unwrap();
            for i in 0..5 {
                assert_eq!(
                    queue.enqueue(MotionSample::default(), frame(i)),
                    EnqueueOutcome::Admitted
                );
            }
            assert_eq!(drain(&mut receiver), vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_start_run_resets_throttle() {
        let (queue, temp) = queue(3);
        let _first = queue.start_run(1, temp.path().join("run1")).unwrap();
        queue.enqueue(MotionSample::default(), frame(0));
        queue.enqueue(MotionSample::default(), frame(1));
        queue.finish();

        let mut second = queue.start_run(2, temp.path().join("run2")).unwrap();
        assert_eq!(
            queue.enqueue(MotionSample::default(), frame(9)),
            EnqueueOutcome::Admitted
        );
        assert_eq!(second.run_number(), 2);
        assert_eq!(drain(&mut second), vec![9]);
    }

    #[test]
    fn test_finish_keeps_backlog() {
        let (queue, temp) = queue(0);
        let mut receiver = queue.start_run(4, temp.path().join("run4")).unwrap();
        for i in 0..3 {
            queue.enqueue(MotionSample::default(), frame(i));
        }

        assert_eq!(queue.finish(), Some(4));
        assert!(receiver.is_finishing());
        assert_eq!(
            queue.enqueue(MotionSample::default(), frame(7)),
            EnqueueOutcome::Inactive
        );

        let mut received = Vec::new();
        while let Some(item) = receiver.next_blocking() {
            received.push(item.frame.data()[0]);
        }
        assert_eq!(received, vec![0, 1, 2]);
    }

    #[test]
    fn test_start_run_recreates_directory() {
        let (queue, temp) = queue(0);
        let dir = temp.path().join("run1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("old.png"), b"x").unwrap();

        let receiver = queue.start_run(1, dir.clone()).unwrap();

        assert_eq!(receiver.session().output_directory, dir);
        assert_eq!(receiver.session().sequence, 0);
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_admitted_items_are_announced() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let queue = RecordingQueue::new(1, events);
        let temp = tempfile::tempdir().unwrap();
        let _receiver = queue.start_run(2, temp.path().join("run2")).unwrap();

        for i in 0..4 {
            queue.enqueue(MotionSample::default(), frame(i));
        }

        assert_eq!(
            drain_events(&mut rx),
            vec![
                PilotEvent::QueueItemAdded {
                    run_number: 2,
                    pending: 1
                },
                PilotEvent::QueueItemAdded {
                    run_number: 2,
                    pending: 2
                },
            ]
        );
    }
}
