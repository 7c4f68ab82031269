// Recording consumer - dedicated thread that writes queued samples of one run to disk

use crate::core::events::EventBus;
use crate::core::features::ImageFeatureExtractor;
use crate::core::recording_queue::{QueueReceiver, RecordItem};
use crate::core::storage::{RecordingFormat, RunSession, StorageError, StorageResult};
use crate::models::motion::PilotEvent;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    /// Waiting for the next item
    Idle,
    Processing,
    /// The run was finished; writing the remaining backlog
    Draining,
    Terminated,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerReport {
    pub run_number: u32,
    pub output_directory: PathBuf,
    /// Files written
    pub written: u64,
    /// Items that could not be decoded or written
    pub dropped: u64,
}

/// Settings shared by every run's consumer
#[derive(Debug, Clone)]
pub struct SampleWriter {
    pub extractor: ImageFeatureExtractor,
    pub format: RecordingFormat,
}

impl SampleWriter {
    pub fn new(extractor: ImageFeatureExtractor, format: RecordingFormat) -> Self {
        Self { extractor, format }
    }

    /// Decode, downsample and write one item into `session`
    pub fn write(&self, session: &mut RunSession, item: &RecordItem) -> StorageResult<PathBuf> {
        let image = self.extractor.sample(&item.frame)?;
        session.save_sample(&image, &item.sample, self.format)
    }
}

// ==============================================================================
// Recording Consumer
// ==============================================================================

/// Handle to the thread draining one run.
///
/// The thread sleeps on the channel while the queue is empty, handles items oldest
/// first, and after `finish()` keeps going until the backlog is empty. It then
/// publishes [`PilotEvent::ConsumptionFinished`] once and exits.
pub struct RecordingConsumer {
    run_number: u32,
    state: Arc<Mutex<ConsumerState>>,
    handle: Option<JoinHandle<ConsumerReport>>,
}

impl RecordingConsumer {
    pub fn spawn(
        receiver: QueueReceiver,
        writer: SampleWriter,
        events: EventBus,
    ) -> StorageResult<Self> {
        let run_number = receiver.run_number();
        let state = Arc::new(Mutex::new(ConsumerState::Idle));
        let thread_state = state.clone();

        let handle = std::thread::Builder::new()
            .name(format!("recorder-run{}", run_number))
            .spawn(move || consume(receiver, writer, events, thread_state))?;

        Ok(Self {
            run_number,
            state,
            handle: Some(handle),
        })
    }

    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    pub fn state(&self) -> ConsumerState {
        *lock_state(&self.state)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the thread to drain the run and exit. Only returns after the run's
    /// queue was finished.
    pub fn join(mut self) -> StorageResult<ConsumerReport> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| StorageError::Other("consumer already joined".to_string()))?;

        handle.join().map_err(|_| {
            StorageError::Other(format!("recording consumer for run {} panicked", self.run_number))
        })
    }
}

fn lock_state(state: &Mutex<ConsumerState>) -> MutexGuard<'_, ConsumerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_state(state: &Mutex<ConsumerState>, next: ConsumerState) {
    *lock_state(state) = next;
}

fn consume(
    mut receiver: QueueReceiver,
    writer: SampleWriter,
    events: EventBus,
    state: Arc<Mutex<ConsumerState>>,
) -> ConsumerReport {
    let run_number = receiver.run_number();
    let mut dropped = 0u64;
    debug!("Recording consumer for run {} waiting", run_number);

    while let Some(item) = receiver.next_blocking() {
        let busy = if receiver.is_finishing() {
            ConsumerState::Draining
        } else {
            ConsumerState::Processing
        };
        set_state(&state, busy);

        let file = match writer.write(receiver.session_mut(), &item) {
            Ok(path) => {
                debug!("Recorded {}", path.display());
                Some(path)
            }
            Err(e) => {
                dropped += 1;
                warn!("Dropped recording in run {}: {}", run_number, e);
                None
            }
        };
        events.publish(PilotEvent::QueueItemConsumed { run_number, file });

        if busy == ConsumerState::Processing && receiver.pending() == 0 {
            set_state(&state, ConsumerState::Idle);
        }
    }

    let session = receiver.session();
    let report = ConsumerReport {
        run_number,
        output_directory: session.output_directory.clone(),
        written: session.sequence,
        dropped,
    };

    set_state(&state, ConsumerState::Terminated);
    events.publish(PilotEvent::ConsumptionFinished {
        run_number,
        written: report.written,
        dropped: report.dropped,
    });
    info!(
        "Recording run {} complete: {} written, {} dropped",
        run_number, report.written, report.dropped
    );

    report
}
