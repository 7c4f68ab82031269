// Recorder - run life cycle over the recording queue and its consumer thread

use crate::core::config::Config;
use crate::core::events::EventBus;
use crate::core::features::ImageFeatureExtractor;
use crate::core::recording_consumer::{ConsumerReport, ConsumerState, RecordingConsumer, SampleWriter};
use crate::core::recording_queue::{EnqueueOutcome, RecordingQueue};
use crate::core::storage::{run_directory, RecordingFormat, StorageResult};
use crate::models::frame::Frame;
use crate::models::motion::MotionSample;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Starts and stops recording runs.
///
/// Run numbers increase by one on every `start()` and are never reused by the same
/// recorder. Run `n` is written to `<storage_path>/run{n}`.
pub struct Recorder {
    storage_path: PathBuf,
    writer: SampleWriter,
    queue: RecordingQueue,
    next_run: AtomicU32,
    consumer: Mutex<Option<RecordingConsumer>>,
    events: EventBus,
}

impl Recorder {
    pub fn new(
        storage_path: PathBuf,
        skip_count: i32,
        first_run: u32,
        writer: SampleWriter,
        events: EventBus,
    ) -> Self {
        Self {
            storage_path,
            writer,
            queue: RecordingQueue::new(skip_count, events.clone()),
            next_run: AtomicU32::new(first_run),
            consumer: Mutex::new(None),
            events,
        }
    }

    pub fn from_config(config: &Config, events: EventBus) -> StorageResult<Self> {
        let writer = SampleWriter::new(
            ImageFeatureExtractor::for_recording(config),
            RecordingFormat::from_extension(&config.image_format)?,
        );
        Ok(Self::new(
            config.storage_path.clone(),
            config.skip_count,
            config.initial_run_number,
            writer,
            events,
        ))
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Begin a new run and return its number. A run that is still open is stopped
    /// and drained first.
    pub fn start(&self) -> StorageResult<u32> {
        let mut consumer = self.lock_consumer();
        if let Some(previous) = consumer.take() {
            self.queue.finish();
            Self::join_consumer(previous);
        }

        let run_number = self.next_run.fetch_add(1, Ordering::SeqCst);
        let dir = run_directory(&self.storage_path, run_number);
        let receiver = self.queue.start_run(run_number, dir)?;
        *consumer = Some(RecordingConsumer::spawn(
            receiver,
            self.writer.clone(),
            self.events.clone(),
        )?);

        info!("Recording started (run {})", run_number);
        Ok(run_number)
    }

    /// Offer an arriving frame to the current run
    pub fn enqueue(&self, sample: MotionSample, frame: Frame) -> EnqueueOutcome {
        self.queue.enqueue(sample, frame)
    }

    /// Finish the current run without waiting; the consumer drains it in the
    /// background. Returns the run number that was finished.
    pub fn stop(&self) -> Option<u32> {
        let run = self.queue.finish();
        if let Some(run) = run {
            info!("Recording stopped (run {})", run);
        }
        run
    }

    /// Finish the current run and wait until its backlog is on disk
    pub fn stop_and_wait(&self) -> Option<ConsumerReport> {
        self.stop();
        let consumer = self.lock_consumer().take()?;
        Self::join_consumer(consumer)
    }

    pub fn is_recording(&self) -> bool {
        self.queue.is_active()
    }

    pub fn current_run(&self) -> Option<u32> {
        self.queue.current_run()
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub fn consumer_state(&self) -> Option<ConsumerState> {
        self.lock_consumer().as_ref().map(|c| c.state())
    }

    fn join_consumer(consumer: RecordingConsumer) -> Option<ConsumerReport> {
        match consumer.join() {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Recording consumer failed: {}", e);
                None
            }
        }
    }

    fn lock_consumer(&self) -> MutexGuard<'_, Option<RecordingConsumer>> {
        self.consumer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.queue.finish().is_some() {
            warn!("Recorder dropped while recording; draining");
        }
        if let Some(consumer) = self.lock_consumer().take() {
            Self::join_consumer(consumer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::uniform_frame;

    fn recorder(storage: &Path, skip: i32, first_run: u32) -> Recorder {
        let config = Config {
            storage_path: storage.to_path_buf(),
            skip_count: skip,
            initial_run_number: first_run,
            image_width: 4,
            image_height: 3,
            image_format: "bmp".to_string(),
            ..Config::default()
        };
        Recorder::from_config(&config, EventBus::default()).unwrap()
    }

    #[test]
    fn test_runs_are_numbered_and_placed() {
        let temp = tempfile::tempdir().unwrap();
        let recorder = recorder(temp.path(), 0, 5);

        assert_eq!(recorder.start().unwrap(), 5);
        assert!(recorder.is_recording());
        recorder.enqueue(MotionSample::default(), uniform_frame(8, 6, 90));
        let report = recorder.stop_and_wait().unwrap();
        assert_eq!(report.run_number, 5);
        assert_eq!(report.written, 1);
        assert_eq!(report.output_directory, temp.path().join("run5"));
        assert!(temp.path().join("run5").join("run5_0_0_0_0_0.bmp").is_file());

        assert_eq!(recorder.start().unwrap(), 6);
        assert_eq!(recorder.current_run(), Some(6));
        let report = recorder.stop_and_wait().unwrap();
        assert_eq!(report.written, 0);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_restart_drains_previous_run() {
        let temp = tempfile::tempdir().unwrap();
        let recorder = recorder(temp.path(), 0, 1);

        recorder.start().unwrap();
        for _ in 0..3 {
            recorder.enqueue(MotionSample::default(), uniform_frame(8, 6, 90));
        }
        recorder.start().unwrap();

        assert_eq!(std::fs::read_dir(temp.path().join("run1")).unwrap().count(), 3);
        recorder.stop_and_wait();
    }

    #[test]
    fn test_not_recording() {
        let temp = tempfile::tempdir().unwrap();
        let recorder = recorder(temp.path(), 0, 1);

        assert_eq!(
            recorder.enqueue(MotionSample::default(), uniform_frame(2, 2, 0)),
            EnqueueOutcome::Inactive
        );
        assert_eq!(recorder.stop(), None);
        assert!(recorder.stop_and_wait().is_none());
        assert!(recorder.consumer_state().is_none());
    }

    #[test]
    fn test_rejects_unknown_format() {
        let config = Config {
            image_format: "tiff".to_string(),
            ..Config::default()
        };
        assert!(Recorder::from_config(&config, EventBus::default()).is_err());
    }
}
