// Image feature extraction - turns an encoded camera frame into a small grayscale sample

use crate::core::config::Config;
use crate::models::frame::Frame;
use crate::models::motion::MotionSample;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use thiserror::Error;

/// Value written for pixels above the threshold level
pub const THRESHOLD_MAX: u8 = 255;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Frame contains no data")]
    EmptyFrame,

    #[error("Failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),
}

pub type FeatureResult<T> = Result<T, FeatureError>;

/// Fixed size of the grayscale sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureShape {
    pub width: u32,
    pub height: u32,
}

impl FeatureShape {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Length of the network input: two previous speeds followed by every pixel
    pub fn input_len(&self) -> usize {
        2 + self.pixel_count()
    }
}

impl Default for FeatureShape {
    fn default() -> Self {
        Self::new(32, 24)
    }
}

/// Decode → grayscale → downsample → optional binary threshold.
///
/// Stateless; every call returns a freshly allocated image, so the autopilot and
/// the recorder can share one extractor across threads.
#[derive(Debug, Clone)]
pub struct ImageFeatureExtractor {
    shape: FeatureShape,
    threshold: Option<u8>,
}

impl ImageFeatureExtractor {
    pub fn new(shape: FeatureShape, threshold: Option<u8>) -> Self {
        Self { shape, threshold }
    }

    /// Extractor for autopilot input
    pub fn for_pilot(config: &Config) -> Self {
        Self::new(
            FeatureShape::new(config.image_width, config.image_height),
            config.threshold_pilot_features.then_some(config.threshold),
        )
    }

    /// Extractor for recorded training samples
    pub fn for_recording(config: &Config) -> Self {
        Self::new(
            FeatureShape::new(config.image_width, config.image_height),
            config.threshold_recordings.then_some(config.threshold),
        )
    }

    pub fn shape(&self) -> FeatureShape {
        self.shape
    }

    pub fn threshold(&self) -> Option<u8> {
        self.threshold
    }

    /// Decode the frame into a full-size grayscale image
    pub fn decode(&self, frame: &Frame) -> FeatureResult<GrayImage> {
        if frame.is_empty() {
            return Err(FeatureError::EmptyFrame);
        }
        Ok(image::load_from_memory(frame.data())?.to_luma8())
    }

    /// Downsample (and threshold, if configured) an already decoded image
    pub fn prepare(&self, image: &GrayImage) -> GrayImage {
        let resized = if image.dimensions() == (self.shape.width, self.shape.height) {
            image.clone()
        } else {
            imageops::resize(image, self.shape.width, self.shape.height, FilterType::Triangle)
        };

        match self.threshold {
            Some(level) => apply_threshold(resized, level),
            None => resized,
        }
    }

    /// Fixed-size sample for a frame
    pub fn sample(&self, frame: &Frame) -> FeatureResult<GrayImage> {
        let decoded = self.decode(frame)?;
        Ok(self.prepare(&decoded))
    }

    /// Network input: `[prev_turn, prev_forward, pixel_0, pixel_1, ...]`, row-major
    pub fn features(&self, frame: &Frame, motion: &MotionSample) -> FeatureResult<Vec<f64>> {
        let sample = self.sample(frame)?;
        Ok(feature_vector(motion.prev_turn, motion.prev_forward, &sample))
    }
}

/// Build the network input from previous speeds and a prepared sample
pub fn feature_vector(prev_turn: i8, prev_forward: i8, sample: &GrayImage) -> Vec<f64> {
    let pixels = sample.as_raw();
    let mut input = Vec::with_capacity(2 + pixels.len());
    input.push(prev_turn as f64);
    input.push(prev_forward as f64);
    input.extend(pixels.iter().map(|&p| p as f64));
    input
}

/// Binary threshold: pixels strictly above `level` become [`THRESHOLD_MAX`], the rest 0
pub fn apply_threshold(mut image: GrayImage, level: u8) -> GrayImage {
    for Luma([value]) in image.pixels_mut() {
        *value = if *value > level { THRESHOLD_MAX } else { 0 };
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn encoded_frame(width: u32, height: u32, fill: impl Fn(u32, u32) -> u8) -> Frame {
        let img = GrayImage::from_fn(width, height, |x, y| Luma([fill(x, y)]));
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        Frame::new(bytes)
    }

    #[test]
    fn test_sample_has_fixed_shape() {
        let extractor = ImageFeatureExtractor::new(FeatureShape::default(), None);
        let frame = encoded_frame(640, 480, |_, _| 90);

        let sample = extractor.sample(&frame).unwrap();
        assert_eq!(sample.dimensions(), (32, 24));
        assert!(sample.pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn test_threshold_is_binary() {
        let extractor = ImageFeatureExtractor::new(FeatureShape::new(4, 2), Some(160));
        // Left half dark, right half bright
        let frame = encoded_frame(4, 2, |x, _| if x < 2 { 100 } else { 200 });

        let sample = extractor.sample(&frame).unwrap();
        assert_eq!(sample.as_raw(), &vec![0, 0, 255, 255, 0, 0, 255, 255]);
    }

    #[test]
    fn test_threshold_boundary_is_exclusive() {
        let img = GrayImage::from_raw(3, 1, vec![160, 161, 0]).unwrap();
        let out = apply_threshold(img, 160);
        assert_eq!(out.as_raw(), &vec![0, 255, 0]);
    }

    #[test]
    fn test_feature_vector_layout() {
        let extractor = ImageFeatureExtractor::new(FeatureShape::new(3, 2), None);
        let frame = encoded_frame(3, 2, |x, y| (y * 3 + x) as u8 * 10);
        let motion = MotionSample {
            turn: 0,
            forward: 0,
            prev_turn: -5,
            prev_forward: 12,
        };

        let features = extractor.features(&frame, &motion).unwrap();
        assert_eq!(features.len(), extractor.shape().input_len());
        assert_eq!(features, vec![-5.0, 12.0, 0.0, 10.0, 20.0, 30.0, 40.0, 50.0]);
    }

    #[test]
    fn test_undecodable_frame_fails() {
        let extractor = ImageFeatureExtractor::new(FeatureShape::default(), None);

        assert!(matches!(
            extractor.sample(&Frame::new(vec![0u8, 1, 2, 3])),
            Err(FeatureError::Decode(_))
        ));
        assert!(matches!(
            extractor.sample(&Frame::new(Vec::<u8>::new())),
            Err(FeatureError::EmptyFrame)
        ));
    }

    #[test]
    fn test_config_constructors() {
        let mut config = Config::default();
        config.threshold_pilot_features = false;

        assert_eq!(ImageFeatureExtractor::for_pilot(&config).threshold(), None);
        assert_eq!(
            ImageFeatureExtractor::for_recording(&config).threshold(),
            Some(160)
        );
    }
}
