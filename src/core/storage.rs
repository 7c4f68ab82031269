// Sample storage - run directories and the files recorded into them

use crate::core::features::FeatureError;
use crate::models::motion::MotionSample;
use image::{GrayImage, ImageFormat};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Storage error: {0}")]
    Other(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

// ==============================================================================
// Output Format
// ==============================================================================

/// Image encoding used for recorded samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    #[default]
    Png,
    Bmp,
}

impl RecordingFormat {
    pub fn from_extension(ext: &str) -> StorageResult<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "bmp" => Ok(Self::Bmp),
            other => Err(StorageError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Bmp => "bmp",
        }
    }

    pub fn image_format(&self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Bmp => ImageFormat::Bmp,
        }
    }
}

// ==============================================================================
// Run Session
// ==============================================================================

/// Directory of recording run `run_number` under `base`
pub fn run_directory(base: &Path, run_number: u32) -> PathBuf {
    base.join(format!("run{}", run_number))
}

/// (Re)create `dir` empty. Anything left over from an earlier run with the same
/// number is deleted first.
pub fn prepare_run_directory(dir: &Path) -> StorageResult<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// One live recording run: where samples go and how many have been written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSession {
    pub run_number: u32,
    pub output_directory: PathBuf,
    /// Index of the next sample; increases only when a file was actually written
    pub sequence: u64,
}

impl RunSession {
    pub fn new(run_number: u32, output_directory: PathBuf) -> Self {
        Self {
            run_number,
            output_directory,
            sequence: 0,
        }
    }

    /// `run{run}_{seq}_{prev_turn}_{prev_forward}_{turn}_{forward}.{ext}`
    pub fn file_name(&self, sample: &MotionSample, format: RecordingFormat) -> String {
        format!(
            "run{}_{}_{}_{}_{}_{}.{}",
            self.run_number,
            self.sequence,
            sample.prev_turn,
            sample.prev_forward,
            sample.turn,
            sample.forward,
            format.extension()
        )
    }

    /// Write one prepared sample and advance the sequence
    pub fn save_sample(
        &mut self,
        image: &GrayImage,
        sample: &MotionSample,
        format: RecordingFormat,
    ) -> StorageResult<PathBuf> {
        let path = self
            .output_directory
            .join(self.file_name(sample, format));
        image.save_with_format(&path, format.image_format())?;
        self.sequence += 1;
        Ok(path)
    }

    /// Total size in bytes of the files written so far
    pub fn disk_usage(&self) -> StorageResult<u64> {
        let mut total_size = 0u64;
        for entry in std::fs::read_dir(&self.output_directory)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total_size += entry.metadata()?.len();
            }
        }
        Ok(total_size)
    }
}
