// Pilot network - loads the trained model once and maps frame features to speeds

use crate::core::features::{FeatureError, FeatureShape};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

// ==============================================================================
// Errors
// ==============================================================================

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("Failed to read model: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse model: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid model: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Input has {actual} values, model expects {expected}")]
    InputLength { expected: usize, actual: usize },

    #[error("Non-finite value in network output {0}")]
    NonFinite(usize),

    #[error("Feature extraction failed: {0}")]
    Feature(#[from] FeatureError),
}

pub type InferenceResult<T> = Result<T, InferenceError>;

// ==============================================================================
// Model artifact
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Sigmoid,
    Tanh,
    Relu,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Linear => x,
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Relu => x.max(0.0),
        }
    }
}

/// Fully connected layer: `out[o] = activation(biases[o] + Σ weights[o][i] * in[i])`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub activation: Activation,
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<f64>,
}

impl DenseLayer {
    pub fn input_width(&self) -> usize {
        self.weights.first().map(Vec::len).unwrap_or(0)
    }

    pub fn output_width(&self) -> usize {
        self.biases.len()
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.biases)
            .map(|(row, bias)| {
                let sum: f64 = row.iter().zip(input).map(|(w, x)| w * x).sum();
                self.activation.apply(bias + sum)
            })
            .collect()
    }
}

/// Linear mapping between a column's real range and the network's range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeNormalizer {
    pub actual_low: f64,
    pub actual_high: f64,
    pub normalized_low: f64,
    pub normalized_high: f64,
}

impl RangeNormalizer {
    pub fn new(actual_low: f64, actual_high: f64, normalized_low: f64, normalized_high: f64) -> Self {
        Self {
            actual_low,
            actual_high,
            normalized_low,
            normalized_high,
        }
    }

    pub fn normalize(&self, x: f64) -> f64 {
        let actual_span = self.actual_high - self.actual_low;
        if actual_span == 0.0 {
            return (self.normalized_low + self.normalized_high) / 2.0;
        }
        (x - self.actual_low) / actual_span * (self.normalized_high - self.normalized_low)
            + self.normalized_low
    }

    pub fn is_finite(&self) -> bool {
        [
            self.actual_low,
            self.actual_high,
            self.normalized_low,
            self.normalized_high,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    pub fn denormalize(&self, n: f64) -> f64 {
        (n - self.normalized_low) * (self.actual_high - self.actual_low)
            / (self.normalized_high - self.normalized_low)
            + self.actual_low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub inputs: Vec<RangeNormalizer>,
    pub outputs: Vec<RangeNormalizer>,
}

/// Trained network plus the normalization it was trained with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotModel {
    #[serde(default)]
    pub name: String,
    pub input_count: usize,
    pub layers: Vec<DenseLayer>,
    pub normalization: Normalization,
}

impl PilotModel {
    /// Read and validate a JSON model artifact
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        info!("Loading pilot model from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ModelLoadError> {
        let model: PilotModel = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelLoadError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Check layer shapes, normalization arity and parameter sanity
    pub fn validate(&self) -> Result<(), ModelLoadError> {
        if self.layers.is_empty() {
            return Err(ModelLoadError::Invalid("model has no layers".to_string()));
        }

        let mut width = self.input_count;
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.weights.len() != layer.biases.len() {
                return Err(ModelLoadError::Invalid(format!(
                    "layer {} has {} weight rows but {} biases",
                    index,
                    layer.weights.len(),
                    layer.biases.len()
                )));
            }
            if let Some(row) = layer.weights.iter().position(|row| row.len() != width) {
                return Err(ModelLoadError::Invalid(format!(
                    "layer {} row {} has {} weights, expected {}",
                    index,
                    row,
                    layer.weights[row].len(),
                    width
                )));
            }
            let all_finite = layer
                .weights
                .iter()
                .flatten()
                .chain(&layer.biases)
                .all(|v| v.is_finite());
            if !all_finite {
                return Err(ModelLoadError::Invalid(format!(
                    "layer {} contains non-finite parameters",
                    index
                )));
            }
            width = layer.output_width();
        }

        if width != 2 {
            return Err(ModelLoadError::Invalid(format!(
                "model produces {} outputs, expected 2 (turn, forward)",
                width
            )));
        }

        if self.normalization.inputs.len() != self.input_count {
            return Err(ModelLoadError::Invalid(format!(
                "{} input normalizers for {} inputs",
                self.normalization.inputs.len(),
                self.input_count
            )));
        }
        if self.normalization.outputs.len() != 2 {
            return Err(ModelLoadError::Invalid(format!(
                "{} output normalizers, expected 2",
                self.normalization.outputs.len()
            )));
        }

        let degenerate = self
            .normalization
            .inputs
            .iter()
            .chain(&self.normalization.outputs)
            .any(|n| n.normalized_low == n.normalized_high);
        if degenerate {
            return Err(ModelLoadError::Invalid(
                "normalizer with empty normalized range".to_string(),
            ));
        }

        let non_finite = self
            .normalization
            .inputs
            .iter()
            .chain(&self.normalization.outputs)
            .any(|n| !n.is_finite());
        if non_finite {
            return Err(ModelLoadError::Invalid(
                "normalizer contains non-finite bounds".to_string(),
            ));
        }

        // An empty actual range is fine for a constant input column but would pin an output.
        if let Some(index) = self
            .normalization
            .outputs
            .iter()
            .position(|n| n.actual_low == n.actual_high)
        {
            return Err(ModelLoadError::Invalid(format!(
                "output normalizer {} has an empty actual range",
                index
            )));
        }

        Ok(())
    }
}

// ==============================================================================
// Inference Engine
// ==============================================================================

/// Speeds produced by one inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prediction {
    pub turn: i8,
    pub forward: i8,
}

/// Immutable wrapper around a loaded [`PilotModel`]; safe to share through `Arc`
#[derive(Debug)]
pub struct InferenceEngine {
    model: PilotModel,
}

impl InferenceEngine {
    pub fn new(model: PilotModel) -> Result<Self, ModelLoadError> {
        model.validate()?;
        Ok(Self { model })
    }

    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let model = PilotModel::load(path)?;
        info!(
            "Pilot model '{}' ready: {} inputs, {} layers",
            model.name,
            model.input_count,
            model.layers.len()
        );
        Ok(Self { model })
    }

    pub fn model(&self) -> &PilotModel {
        &self.model
    }

    pub fn input_len(&self) -> usize {
        self.model.input_count
    }

    /// Check the model was trained for images of `shape`
    pub fn check_shape(&self, shape: FeatureShape) -> Result<(), ModelLoadError> {
        if shape.input_len() != self.model.input_count {
            return Err(ModelLoadError::Invalid(format!(
                "model expects {} inputs but a {}x{} sample yields {}",
                self.model.input_count,
                shape.width,
                shape.height,
                shape.input_len()
            )));
        }
        Ok(())
    }

    /// Normalize `input`, run the network and denormalize its two outputs
    pub fn infer(&self, input: &[f64]) -> InferenceResult<Prediction> {
        let raw = self.infer_raw(input)?;
        Ok(Prediction {
            turn: to_speed(raw[0]),
            forward: to_speed(raw[1]),
        })
    }

    /// Denormalized outputs before truncation to speeds
    pub fn infer_raw(&self, input: &[f64]) -> InferenceResult<[f64; 2]> {
        if input.len() != self.model.input_count {
            return Err(InferenceError::InputLength {
                expected: self.model.input_count,
                actual: input.len(),
            });
        }

        let mut activations: Vec<f64> = input
            .iter()
            .zip(&self.model.normalization.inputs)
            .map(|(x, n)| n.normalize(*x))
            .collect();

        for layer in &self.model.layers {
            activations = layer.forward(&activations);
        }

        let mut output = [0.0; 2];
        for (index, (value, n)) in activations
            .iter()
            .zip(&self.model.normalization.outputs)
            .enumerate()
        {
            let denormalized = n.denormalize(*value);
            if !denormalized.is_finite() {
                return Err(InferenceError::NonFinite(index));
            }
            output[index] = denormalized;
        }

        debug!("Network output turn={:.3} forward={:.3}", output[0], output[1]);
        Ok(output)
    }
}

/// Truncate toward zero and clamp into the signed-byte speed range
pub fn to_speed(value: f64) -> i8 {
    value.trunc().clamp(i8::MIN as f64, i8::MAX as f64) as i8
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Single linear layer over a `input_count`-wide input with hand-picked weights.
    ///
    /// turn    = 10 + 2 * prev_turn_n + sum(pixels_n) * 0.5
    /// forward = -4 + 1 * prev_forward_n
    /// (all normalizers identity except where noted)
    pub(crate) fn linear_model(input_count: usize) -> PilotModel {
        let identity = RangeNormalizer::new(0.0, 1.0, 0.0, 1.0);
        let mut turn_row = vec![0.5; input_count];
        turn_row[0] = 2.0;
        turn_row[1] = 0.0;
        let mut forward_row = vec![0.0; input_count];
        forward_row[1] = 1.0;

        PilotModel {
            name: "linear-test".to_string(),
            input_count,
            layers: vec![DenseLayer {
                activation: Activation::Linear,
                weights: vec![turn_row, forward_row],
                biases: vec![10.0, -4.0],
            }],
            normalization: Normalization {
                inputs: vec![identity; input_count],
                outputs: vec![identity; 2],
            },
        }
    }

    #[test]
    fn test_range_normalizer_round_trip() {
        let n = RangeNormalizer::new(-100.0, 100.0, -1.0, 1.0);
        assert_eq!(n.normalize(-100.0), -1.0);
        assert_eq!(n.normalize(100.0), 1.0);
        assert_eq!(n.normalize(0.0), 0.0);
        assert!((n.denormalize(n.normalize(37.0)) - 37.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_column_normalizes_to_midpoint() {
        let n = RangeNormalizer::new(5.0, 5.0, -1.0, 1.0);
        assert_eq!(n.normalize(5.0), 0.0);
        assert_eq!(n.normalize(123.0), 0.0);
    }

    #[test]
    fn test_to_speed_truncates_and_clamps() {
        assert_eq!(to_speed(12.9), 12);
        assert_eq!(to_speed(-12.9), -12);
        assert_eq!(to_speed(300.0), 127);
        assert_eq!(to_speed(-300.0), -128);
    }

    #[test]
    fn test_linear_inference() {
        let engine = InferenceEngine::new(linear_model(6)).unwrap();
        // prev_turn=3, prev_forward=7, four pixels of 2
        let prediction = engine.infer(&[3.0, 7.0, 2.0, 2.0, 2.0, 2.0]).unwrap();

        assert_eq!(prediction.turn, 10 + 6 + 4);
        assert_eq!(prediction.forward, 3);
    }

    #[test]
    fn test_golden_output_for_zero_input() {
        // 2x2 sample, tanh hidden layer, scaled output
        let input_count = 6;
        let model = PilotModel {
            name: "golden".to_string(),
            input_count,
            layers: vec![
                DenseLayer {
                    activation: Activation::Tanh,
                    weights: vec![vec![0.1; input_count], vec![-0.2; input_count]],
                    biases: vec![0.5, -0.25],
                },
                DenseLayer {
                    activation: Activation::Linear,
                    weights: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                    biases: vec![0.0, 0.0],
                },
            ],
            normalization: Normalization {
                inputs: vec![RangeNormalizer::new(0.0, 255.0, 0.0, 1.0); input_count],
                outputs: vec![RangeNormalizer::new(-100.0, 100.0, -1.0, 1.0); 2],
            },
        };
        let engine = InferenceEngine::new(model).unwrap();

        let input = vec![0.0; input_count];
        let raw = engine.infer_raw(&input).unwrap();
        // tanh(0.5) * 100 and tanh(-0.25) * 100
        assert!((raw[0] - 46.211_715_726).abs() < 1e-6);
        assert!((raw[1] + 24.491_866_24).abs() < 1e-6);

        let first = engine.infer(&input).unwrap();
        let second = engine.infer(&input).unwrap();
        assert_eq!(first, Prediction { turn: 46, forward: -24 });
        assert_eq!(first, second);
    }

    #[test]
    fn test_wrong_input_length() {
        let engine = InferenceEngine::new(linear_model(6)).unwrap();
        assert!(matches!(
            engine.infer(&[0.0; 5]),
            Err(InferenceError::InputLength { expected: 6, actual: 5 })
        ));
    }

    #[test]
    fn test_validation_rejects_bad_shapes() {
        let mut model = linear_model(6);
        model.layers[0].weights[1].pop();
        assert!(matches!(model.validate(), Err(ModelLoadError::Invalid(_))));

        let mut model = linear_model(6);
        model.normalization.inputs.pop();
        assert!(model.validate().is_err());

        let mut model = linear_model(6);
        model.layers[0].biases.push(0.0);
        model.layers[0].weights.push(vec![0.0; 6]);
        assert!(model.validate().is_err(), "three outputs");

        let mut model = linear_model(6);
        model.normalization.outputs[0].normalized_high = 0.0;
        assert!(model.validate().is_err());

        let mut model = linear_model(6);
        model.layers[0].biases[0] = f64::NAN;
        assert!(model.validate().is_err());

        let mut model = linear_model(6);
        model.normalization.inputs[0].actual_high = f64::INFINITY;
        assert!(model.validate().is_err(), "infinite input bound");
        assert!(InferenceEngine::new(model).is_err());

        let mut model = linear_model(6);
        model.normalization.outputs[1].normalized_low = f64::NAN;
        assert!(model.validate().is_err(), "NaN output bound");

        let mut model = linear_model(6);
        model.normalization.outputs[0].actual_high = model.normalization.outputs[0].actual_low;
        assert!(model.validate().is_err(), "pinned output");

        // A constant input column is still accepted
        let mut model = linear_model(6);
        model.normalization.inputs[3] = RangeNormalizer::new(7.0, 7.0, -1.0, 1.0);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_load_round_trip_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("pilot.json");

        let model = linear_model(6);
        model.save(&path).unwrap();
        let engine = InferenceEngine::load(&path).unwrap();
        assert_eq!(engine.model(), &model);

        assert!(matches!(
            InferenceEngine::load(&dir.path().join("missing.json")),
            Err(ModelLoadError::Io(_))
        ));

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "{ not json").unwrap();
        assert!(matches!(
            InferenceEngine::load(&garbage),
            Err(ModelLoadError::Parse(_))
        ));
    }

    #[test]
    fn test_check_shape() {
        let engine = InferenceEngine::new(linear_model(2 + 32 * 24)).unwrap();
        assert!(engine.check_shape(FeatureShape::new(32, 24)).is_ok());
        assert!(engine.check_shape(FeatureShape::new(16, 12)).is_err());
    }
}
