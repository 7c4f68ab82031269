// Frame sources - anything that delivers camera frames to the session

use crate::models::frame::Frame;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Delivers encoded frames in arrival order. `None` means the source is exhausted.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Frame>;
}

// ==============================================================================
// Channel Source
// ==============================================================================

/// Frames pushed by a transport through a channel
pub struct ChannelFrameSource {
    receiver: mpsc::Receiver<Frame>,
}

impl ChannelFrameSource {
    /// Source plus the sender a transport feeds it with
    pub fn new(capacity: usize) -> (mpsc::Sender<Frame>, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (sender, Self { receiver })
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }
}

// ==============================================================================
// Directory Replay
// ==============================================================================

/// Replays the image files of a directory in file-name order at a fixed rate
pub struct DirectoryFrameSource {
    files: VecDeque<PathBuf>,
    interval: Interval,
}

impl DirectoryFrameSource {
    /// Must be called from within a tokio runtime
    pub fn open(dir: &Path, fps: u32) -> std::io::Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        files.sort();
        debug!("Replaying {} frames from {}", files.len(), dir.display());

        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Self {
            files: files.into(),
            interval,
        })
    }

    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

#[async_trait]
impl FrameSource for DirectoryFrameSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        while let Some(path) = self.files.pop_front() {
            self.interval.tick().await;
            match tokio::fs::read(&path).await {
                Ok(bytes) => return Some(Frame::new(bytes)),
                Err(e) => warn!("Skipping frame {}: {}", path.display(), e),
            }
        }
        None
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_replay_in_name_order() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("b.png"), b"second").unwrap();
        std::fs::write(temp.path().join("a.png"), b"first").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::create_dir(temp.path().join("c.png")).unwrap();

        let mut source = DirectoryFrameSource::open(temp.path(), 1000).unwrap();
        assert_eq!(source.remaining(), 2);

        assert_eq!(source.next_frame().await.unwrap().data(), b"first");
        assert_eq!(source.next_frame().await.unwrap().data(), b"second");
        assert!(source.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_source_ends_when_sender_drops() {
        let (sender, mut source) = ChannelFrameSource::new(4);
        sender.send(Frame::new(vec![1u8])).await.unwrap();
        drop(sender);

        assert_eq!(source.next_frame().await.unwrap().data(), &[1u8]);
        assert!(source.next_frame().await.is_none());
    }

    #[test]
    fn test_missing_directory() {
        assert!(DirectoryFrameSource::open(Path::new("/nonexistent/frames"), 10).is_err());
    }
}
