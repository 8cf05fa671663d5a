//! Cost functions comparing the decoded network output to target labels,
//! together with the error signals they feed into the backward pass.

use nalgebra::{DMatrix, DVector};

use crate::error::SpikeGradError;

/// Floor added to probabilities before taking logarithms.
pub const COST_EPSILON: f64 = 1e-12;

/// Computes the squared difference between a batch of outputs and labels.
///
/// The output is transposed before subtraction so that `labels` broadcasts
/// along the leading axis of the transposed output, then the squared
/// difference is transposed back to the output's original orientation.
/// Concretely, entry `(i, j)` of the result is `(output[(i, j)] - labels[i])^2`.
/// Callers must supply one label per output row.
pub fn sum_squared_error(
    output: &DMatrix<f64>,
    labels: &DVector<f64>,
) -> Result<DMatrix<f64>, SpikeGradError> {
    if labels.len() != output.nrows() {
        return Err(SpikeGradError::ShapeMismatch {
            expected: (output.nrows(), 1),
            actual: (labels.len(), 1),
        });
    }

    let transposed = output.transpose();
    let squared = DMatrix::from_fn(transposed.nrows(), transposed.ncols(), |j, i| {
        let diff = transposed[(j, i)] - labels[i];
        diff * diff
    });
    Ok(squared.transpose())
}

fn check_same_length(output: &DVector<f64>, target: &DVector<f64>) -> Result<(), SpikeGradError> {
    if output.len() != target.len() {
        return Err(SpikeGradError::ShapeMismatch {
            expected: (output.len(), 1),
            actual: (target.len(), 1),
        });
    }
    Ok(())
}

/// A cost function turns a decoded output vector and a target vector into a
/// scalar cost and into the error signal entering the backward pass.
pub trait CostFunction {
    /// Returns the scalar cost of the output against the target.
    fn cost(&self, output: &DVector<f64>, target: &DVector<f64>) -> Result<f64, SpikeGradError>;

    /// Returns the error signal to propagate backward through the layers.
    fn delta(
        &self,
        output: &DVector<f64>,
        target: &DVector<f64>,
    ) -> Result<DVector<f64>, SpikeGradError>;
}

/// Cross-entropy cost over an output that is already a probability
/// distribution, e.g., the result of [`crate::spike_train::spike_softmax`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftmaxCrossEntropy;

impl CostFunction for SoftmaxCrossEntropy {
    fn cost(&self, output: &DVector<f64>, target: &DVector<f64>) -> Result<f64, SpikeGradError> {
        check_same_length(output, target)?;
        Ok(-output
            .iter()
            .zip(target.iter())
            .map(|(p, t)| t * (p + COST_EPSILON).ln())
            .sum::<f64>())
    }

    fn delta(
        &self,
        output: &DVector<f64>,
        target: &DVector<f64>,
    ) -> Result<DVector<f64>, SpikeGradError> {
        check_same_length(output, target)?;
        Ok(output - target)
    }
}

/// Plain sum of squared differences between output and target.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumSquared;

impl CostFunction for SumSquared {
    fn cost(&self, output: &DVector<f64>, target: &DVector<f64>) -> Result<f64, SpikeGradError> {
        check_same_length(output, target)?;
        Ok((output - target).map(|diff| diff * diff).sum())
    }

    fn delta(
        &self,
        output: &DVector<f64>,
        target: &DVector<f64>,
    ) -> Result<DVector<f64>, SpikeGradError> {
        check_same_length(output, target)?;
        Ok((output - target) * 2.0)
    }
}

/// Zero/one cost over categorical decisions: zero when output and target
/// select the same class, one otherwise. A silent (all-zero) output counts
/// as a miss against any one-hot target.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoricalError;

fn decision_index(vector: &DVector<f64>) -> Option<usize> {
    let max = vector.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max <= 0.0 {
        return None;
    }
    vector.iter().position(|&v| v == max)
}

impl CostFunction for CategoricalError {
    fn cost(&self, output: &DVector<f64>, target: &DVector<f64>) -> Result<f64, SpikeGradError> {
        check_same_length(output, target)?;
        if decision_index(output) == decision_index(target) {
            Ok(0.0)
        } else {
            Ok(1.0)
        }
    }

    fn delta(
        &self,
        output: &DVector<f64>,
        target: &DVector<f64>,
    ) -> Result<DVector<f64>, SpikeGradError> {
        check_same_length(output, target)?;
        Ok(output - target)
    }
}
