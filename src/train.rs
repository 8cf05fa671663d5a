//! The training orchestrator: data normalisation, optional parameter
//! loading, the train/test split, and delegation to an optimiser, ending in
//! a JSON report on standard output.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use itertools::Itertools;
use log::info;
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;
use serde_json::Value;

use crate::backend::Backend;
use crate::cost::{CategoricalError, SoftmaxCrossEntropy};
use crate::error::SpikeGradError;
use crate::layer::{Layer, WeightInit};
use crate::model::Model;
use crate::optim::Optimiser;
use crate::{CALIBRATION_CURRENT, RATE_INTERCEPT, RATE_SLOPE};

/// Rescales raw feature values into the current range expected by the
/// simulator's input encoding.
///
/// The first stage maps the data into a target span (roughly [5, 25] by
/// default); the second inverts a previously fitted linear relationship
/// between injected current and decoded firing rate, so that the full
/// simulate-and-decode round trip approximates the original input scale.
/// The slope and intercept are fitted, backend-specific values, exposed
/// here as configuration rather than baked in.
#[derive(Debug, Clone, PartialEq)]
pub struct Normaliser {
    pub target_span: f64,
    pub target_offset: f64,
    pub rate_slope: f64,
    pub rate_intercept: f64,
}

impl Default for Normaliser {
    fn default() -> Self {
        Normaliser {
            target_span: 20.0,
            target_offset: 5.0,
            rate_slope: RATE_SLOPE,
            rate_intercept: RATE_INTERCEPT,
        }
    }
}

impl Normaliser {
    /// Normalise a matrix of raw features, one sample per row.
    pub fn normalise(&self, data: &DMatrix<f64>) -> DMatrix<f64> {
        let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let scaled = if max > 0.0 {
            data.map(|v| v / max * self.target_span + self.target_offset)
        } else {
            data.map(|_| self.target_offset)
        };
        scaled.map(|v| (v + self.rate_intercept) / self.rate_slope)
    }
}

/// Returns a one-hot vector of the given length with 1 at `class`.
pub fn one_hot(class: usize, length: usize) -> Result<DVector<f64>, SpikeGradError> {
    if class >= length {
        return Err(SpikeGradError::InvalidParameter(format!(
            "Class {} out of range for {} output neurons",
            class, length
        )));
    }
    let mut vector = DVector::zeros(length);
    vector[class] = 1.0;
    Ok(vector)
}

/// Parse a JSON array of feature rows into a matrix, one sample per row.
pub fn parse_features(text: &str) -> Result<DMatrix<f64>, SpikeGradError> {
    let rows: Vec<Vec<f64>> = serde_json::from_str(text)
        .map_err(|e| SpikeGradError::IOError(format!("Malformed feature array: {}", e)))?;
    let num_rows = rows.len();
    let num_cols = rows.first().map(|row| row.len()).unwrap_or(0);
    if rows.iter().any(|row| row.len() != num_cols) {
        return Err(SpikeGradError::InvalidParameter(
            "Feature rows must all have the same length".to_string(),
        ));
    }
    Ok(DMatrix::from_fn(num_rows, num_cols, |i, j| rows[i][j]))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Label {
    Class(usize),
    OneHot(Vec<f64>),
}

/// Parse a JSON array of labels, either integer class ids or one-hot rows,
/// into one-hot vectors over `classes` output neurons.
pub fn parse_labels(text: &str, classes: usize) -> Result<Vec<DVector<f64>>, SpikeGradError> {
    let labels: Vec<Label> = serde_json::from_str(text)
        .map_err(|e| SpikeGradError::IOError(format!("Malformed label array: {}", e)))?;
    labels
        .into_iter()
        .map(|label| match label {
            Label::Class(class) => one_hot(class, classes),
            Label::OneHot(values) => {
                if values.len() != classes {
                    return Err(SpikeGradError::ShapeMismatch {
                        expected: (classes, 1),
                        actual: (values.len(), 1),
                    });
                }
                Ok(DVector::from_vec(values))
            }
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Tensor {
    Matrix(Vec<Vec<f64>>),
    Vector(Vec<f64>),
}

/// A runtime that accepts a model and exposes a `train` method to train it
/// with a given optimiser, taking data either in memory or from the process
/// arguments.
pub struct Trainer<B: Backend> {
    model: Model<B>,
    normaliser: Normaliser,
    calibration_current: f64,
}

impl<B: Backend + 'static> Trainer<B> {
    pub fn new(model: Model<B>) -> Self {
        Trainer {
            model,
            normaliser: Normaliser::default(),
            calibration_current: CALIBRATION_CURRENT,
        }
    }

    /// Replace the default data normaliser.
    pub fn with_normaliser(mut self, normaliser: Normaliser) -> Self {
        self.normaliser = normaliser;
        self
    }

    pub fn model(&self) -> &Model<B> {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model<B> {
        &mut self.model
    }

    pub fn normaliser(&self) -> &Normaliser {
        &self.normaliser
    }

    /// Load pretrained parameters from a JSON file holding a flat sequence
    /// of tensors, consumed as alternating (weights, biases) pairs, one pair
    /// per non-final layer, in layer order. Weight tensors are stored
    /// [output, input] and transposed on assignment.
    pub fn load_parameter_file(&mut self, path: &Path) -> Result<(), SpikeGradError> {
        let file = File::open(path).map_err(|e| SpikeGradError::IOError(e.to_string()))?;
        let tensors: Vec<Tensor> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| SpikeGradError::IOError(format!("Malformed parameter file: {}", e)))?;

        let num_assignable = self.model.layers().len().saturating_sub(1);
        if tensors.len() < 2 * num_assignable {
            return Err(SpikeGradError::InvalidParameter(format!(
                "Parameter file holds {} tensors, expected at least {}",
                tensors.len(),
                2 * num_assignable
            )));
        }

        for (index, (weights, biases)) in tensors
            .into_iter()
            .tuples()
            .take(num_assignable)
            .enumerate()
        {
            let (rows, bias) = match (weights, biases) {
                (Tensor::Matrix(rows), Tensor::Vector(bias)) => (rows, bias),
                _ => {
                    return Err(SpikeGradError::InvalidParameter(
                        "Parameter file must alternate weight matrices and bias vectors"
                            .to_string(),
                    ))
                }
            };

            let num_out = rows.len();
            let num_in = rows.first().map(|row| row.len()).unwrap_or(0);
            if rows.iter().any(|row| row.len() != num_in) {
                return Err(SpikeGradError::InvalidParameter(
                    "Weight tensor rows must all have the same length".to_string(),
                ));
            }

            let matrix = DMatrix::from_fn(num_out, num_in, |i, j| rows[i][j]).transpose();
            let layer = &mut self.model.layers_mut()[index];
            layer.set_weights(WeightInit::Matrix(matrix))?;
            layer.set_biases(&DVector::from_vec(bias))?;
        }
        Ok(())
    }

    /// Read features and labels from the process arguments: two JSON-encoded
    /// arrays, features first. The features are normalised; labels may be
    /// integer class ids or one-hot rows.
    fn data_from_args(&self) -> Result<(DMatrix<f64>, Vec<DVector<f64>>), SpikeGradError> {
        let args: Vec<String> = std::env::args().collect();
        if args.len() < 3 {
            return Err(SpikeGradError::MissingTrainingData(
                "Training input and training labels expected as process arguments".to_string(),
            ));
        }
        let xs = self.normaliser.normalise(&parse_features(&args[1])?);
        let ys = parse_labels(&args[2], self.model.output_size())?;
        Ok((xs, ys))
    }

    /// Trains and tests the model with the given optimiser, input data,
    /// expected categorical labels and train/test split.
    ///
    /// Data passed in memory is used as-is; when absent, both arrays are
    /// read from the process arguments and the features normalised. The
    /// model weights are normalised against an all-ones calibration input
    /// before training. The merged report, including the per-epoch
    /// `train_errors`, is printed to standard output as JSON and returned.
    pub fn train<O: Optimiser<B>>(
        &mut self,
        optimiser: &mut O,
        xs: Option<DMatrix<f64>>,
        ys: Option<Vec<DVector<f64>>>,
        split: f64,
    ) -> Result<Value, SpikeGradError> {
        let (xs, ys) = match (xs, ys) {
            (Some(xs), Some(ys)) => (xs, ys),
            _ => self.data_from_args()?,
        };
        if xs.nrows() != ys.len() {
            return Err(SpikeGradError::ShapeMismatch {
                expected: (xs.nrows(), 1),
                actual: (ys.len(), 1),
            });
        }

        // Normalise model weights against a constant calibration input
        let calibration =
            DVector::from_element(self.model.input_size(), self.calibration_current);
        self.model.normalise_weights(&calibration)?;

        let samples: Vec<DVector<f64>> = xs.row_iter().map(|row| row.transpose()).collect();
        let split_at = ((samples.len() as f64) * split).floor() as usize;
        let split_at = split_at.min(samples.len());

        let (x_train, x_test) = samples.split_at(split_at);
        let (y_train, y_test) = ys.split_at(split_at);
        if x_train.is_empty() || x_test.is_empty() {
            return Err(SpikeGradError::DegenerateSplit {
                train: x_train.len(),
                test: x_test.len(),
            });
        }
        info!(
            "training on {} samples, testing on {}",
            x_train.len(),
            x_test.len()
        );

        let errors = optimiser.train(&mut self.model, x_train, y_train, &SoftmaxCrossEntropy)?;
        let report = optimiser.test(&mut self.model, x_test, y_test, &CategoricalError)?;

        let mut dict = report.to_dict()?;
        dict.insert(
            "train_errors".to_string(),
            serde_json::to_value(&errors).map_err(|e| SpikeGradError::IOError(e.to_string()))?,
        );
        let value = Value::Object(dict);

        // Emit the report to stdout for the calling process
        println!("{}", value);
        Ok(value)
    }
}
