// Data structures for camera frames received from the vehicle

use std::fmt;
use std::sync::Arc;

/// One encoded camera image (JPEG/PNG bytes) as delivered by the transport.
///
/// The byte buffer is immutable and reference counted, so handing the same frame to
/// the mailbox and to the recording queue shares one allocation. Nothing mutates a
/// frame after it has been received.
#[derive(Clone)]
pub struct Frame {
    pub timestamp: i64,
    data: Arc<[u8]>,
}

impl Frame {
    /// Wrap freshly received bytes, stamping them with the current time
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self::with_timestamp(chrono::Utc::now().timestamp_millis(), data)
    }

    pub fn with_timestamp(timestamp: i64, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            timestamp,
            data: data.into(),
        }
    }

    /// Encoded image bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when both handles point at the same received buffer
    pub fn same_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("timestamp", &self.timestamp)
            .field("len", &self.data.len())
            .finish()
    }
}
