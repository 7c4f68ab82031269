// Single-slot frame mailbox - the autopilot always sees the freshest frame

use crate::models::frame::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Holds at most one pending frame. A new `set` replaces whatever has not been
/// taken yet; `take_and_clear` hands the pending frame to exactly one caller.
///
/// The lock is only held for the slot swap, never while a frame is processed.
#[derive(Debug, Default)]
pub struct FrameMailbox {
    slot: Mutex<Option<Frame>>,
    dropped: AtomicU64,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, discarding any frame that was never taken
    pub fn set(&self, frame: Frame) {
        let replaced = self.lock().replace(frame);
        if replaced.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the pending frame, leaving the slot empty
    pub fn take_and_clear(&self) -> Option<Frame> {
        self.lock().take()
    }

    /// Discard the pending frame, if any
    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn has_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Frames overwritten before any consumer took them
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        // The slot is a plain Option; a panic elsewhere cannot leave it half-written.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(tag: u8) -> Frame {
        Frame::with_timestamp(tag as i64, vec![tag])
    }

    #[test]
    fn test_latest_set_wins() {
        let mailbox = FrameMailbox::new();
        for tag in 0..5 {
            mailbox.set(frame(tag));
        }

        let taken = mailbox.take_and_clear().unwrap();
        assert_eq!(taken.data(), &[4]);
        assert_eq!(mailbox.dropped_count(), 4);
    }

    #[test]
    fn test_take_twice_returns_empty() {
        let mailbox = FrameMailbox::new();
        mailbox.set(frame(1));

        assert!(mailbox.take_and_clear().is_some());
        assert!(mailbox.take_and_clear().is_none());
        assert!(!mailbox.has_pending());
    }

    #[test]
    fn test_clear_discards_pending() {
        let mailbox = FrameMailbox::new();
        mailbox.set(frame(1));
        assert!(mailbox.has_pending());

        mailbox.clear();
        assert!(mailbox.take_and_clear().is_none());
    }

    #[test]
    fn test_each_frame_taken_at_most_once() {
        let mailbox = Arc::new(FrameMailbox::new());
        let total = 2000u32;

        let producer = {
            let mailbox = mailbox.clone();
            std::thread::spawn(move || {
                for i in 0..total {
                    mailbox.set(Frame::with_timestamp(i as i64, i.to_le_bytes().to_vec()));
                }
            })
        };

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let mailbox = mailbox.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..total {
                        if let Some(f) = mailbox.take_and_clear() {
                            seen.push(f.timestamp);
                        }
                    }
                    seen
                })
            })
            .collect();

        producer.join().unwrap();
        let mut all: Vec<i64> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        if let Some(f) = mailbox.take_and_clear() {
            all.push(f.timestamp);
        }

        let before = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(before, all.len(), "a frame was delivered twice");
        assert_eq!(
            all.len() as u64 + mailbox.dropped_count(),
            total as u64,
            "every frame is either taken once or overwritten"
        );
    }
}
