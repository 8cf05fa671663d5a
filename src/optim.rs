//! This module provides the optimisation utilities driving multi-epoch
//! training: the optimiser contract, a surrogate gradient-descent optimiser,
//! and the report it produces.

use itertools::izip;
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::Backend;
use crate::cost::CostFunction;
use crate::error::SpikeGradError;
use crate::layer::{Layer, WeightUpdateRule};
use crate::model::Model;
use crate::spike_train::{spike_argmax, spike_softmax, SpikeTrain};

/// The spike count treated as full activation by the surrogate rule; counts
/// are clamped into [0, 1] after dividing by this scale.
pub const SURROGATE_RATE_SCALE: f64 = 80.0;

/// An optimisation algorithm that trains and tests a model.
pub trait Optimiser<B: Backend> {
    /// Train the model on the given samples and return the mean cost per
    /// epoch, in epoch order.
    fn train(
        &mut self,
        model: &mut Model<B>,
        xs: &[DVector<f64>],
        ys: &[DVector<f64>],
        cost: &dyn CostFunction,
    ) -> Result<Vec<f64>, SpikeGradError>;

    /// Evaluate the model on the given samples and return a report.
    fn test(
        &mut self,
        model: &mut Model<B>,
        xs: &[DVector<f64>],
        ys: &[DVector<f64>],
        cost: &dyn CostFunction,
    ) -> Result<Report, SpikeGradError>;
}

/// The surrogate gradient-descent rule.
///
/// Spiking dynamics are not differentiable, so the rule substitutes the
/// rate-normalized spike count of each output neuron for the activation
/// derivative: the weight column of neuron `j` moves by
/// `-learning_rate * activation_j * error_j`, and the error propagated to
/// the previous layer is `W * error`.
#[derive(Debug, Clone)]
pub struct GradientDescentRule {
    learning_rate: f64,
    rate_scale: f64,
}

impl GradientDescentRule {
    pub fn new(learning_rate: f64) -> Self {
        GradientDescentRule {
            learning_rate,
            rate_scale: SURROGATE_RATE_SCALE,
        }
    }

    /// Override the spike count treated as full activation.
    pub fn with_rate_scale(mut self, rate_scale: f64) -> Self {
        self.rate_scale = rate_scale;
        self
    }

    fn activation(&self, train: &SpikeTrain) -> f64 {
        (train.len() as f64 / self.rate_scale).clamp(0.0, 1.0)
    }
}

impl WeightUpdateRule for GradientDescentRule {
    fn update(
        &mut self,
        spikes: &[SpikeTrain],
        weights: &DMatrix<f64>,
        errors: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DVector<f64>), SpikeGradError> {
        if errors.len() != weights.ncols() || spikes.len() != weights.ncols() {
            return Err(SpikeGradError::ShapeMismatch {
                expected: (weights.ncols(), 1),
                actual: (errors.len(), spikes.len()),
            });
        }

        let propagated = weights * errors;

        let mut new_weights = weights.clone();
        for (col, (train, error)) in izip!(spikes, errors.iter()).enumerate() {
            let step = self.learning_rate * self.activation(train) * error;
            for row in 0..new_weights.nrows() {
                new_weights[(row, col)] -= step;
            }
        }

        Ok((new_weights, propagated))
    }
}

/// The outcome of testing a model: categorical hits and misses, the derived
/// accuracy and the per-sample costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub hits: usize,
    pub misses: usize,
    pub accuracy: f64,
    pub errors: Vec<f64>,
}

impl Report {
    /// Serialize the report into a JSON object.
    pub fn to_dict(&self) -> Result<Map<String, Value>, SpikeGradError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(SpikeGradError::IOError(
                "Report did not serialize to a JSON object".to_string(),
            )),
            Err(e) => Err(SpikeGradError::IOError(e.to_string())),
        }
    }
}

/// A gradient-descent optimiser over simulated trials.
///
/// Each sample triggers one trial: the model simulates and stores spikes,
/// the output trains are decoded with a rate-coded softmax, the cost
/// function turns the decoded distribution into an error signal, and the
/// error is propagated backward layer by layer with the surrogate rule.
/// After each sample the updated weights are pushed back to the backend
/// through `restore_weights`.
pub struct GradientDescent {
    epochs: usize,
    rule: GradientDescentRule,
    rng: ChaCha8Rng,
}

impl GradientDescent {
    pub fn new(learning_rate: f64, epochs: usize, seed: u64) -> Self {
        GradientDescent {
            epochs,
            rule: GradientDescentRule::new(learning_rate),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Replace the update rule, keeping the stepping schedule.
    pub fn with_rule(mut self, rule: GradientDescentRule) -> Self {
        self.rule = rule;
        self
    }

    fn check_samples(
        xs: &[DVector<f64>],
        ys: &[DVector<f64>],
    ) -> Result<(), SpikeGradError> {
        if xs.is_empty() || xs.len() != ys.len() {
            return Err(SpikeGradError::MissingTrainingData(format!(
                "Expected matching non-empty samples and labels, got {} and {}",
                xs.len(),
                ys.len()
            )));
        }
        Ok(())
    }
}

impl<B: Backend + 'static> Optimiser<B> for GradientDescent {
    fn train(
        &mut self,
        model: &mut Model<B>,
        xs: &[DVector<f64>],
        ys: &[DVector<f64>],
        cost: &dyn CostFunction,
    ) -> Result<Vec<f64>, SpikeGradError> {
        Self::check_samples(xs, ys)?;

        let mut epoch_errors = Vec::with_capacity(self.epochs);
        for epoch in 0..self.epochs {
            let mut total = 0.0;
            for (x, y) in izip!(xs, ys) {
                let trains = model.simulate(x)?;
                let output = spike_softmax(&trains);
                total += cost.cost(&output, y)?;

                let mut delta = cost.delta(&output, y)?;
                for layer in model.layers_mut().iter_mut().rev() {
                    delta = layer.backward(&delta, &mut self.rule)?;
                }
                for layer in model.layers_mut().iter_mut() {
                    layer.restore_weights()?;
                }
            }
            let mean = total / xs.len() as f64;
            debug!("epoch {}: mean training cost {}", epoch, mean);
            epoch_errors.push(mean);
        }
        info!(
            "trained {} epochs over {} samples",
            self.epochs,
            xs.len()
        );
        Ok(epoch_errors)
    }

    fn test(
        &mut self,
        model: &mut Model<B>,
        xs: &[DVector<f64>],
        ys: &[DVector<f64>],
        cost: &dyn CostFunction,
    ) -> Result<Report, SpikeGradError> {
        Self::check_samples(xs, ys)?;

        let mut hits = 0;
        let mut misses = 0;
        let mut errors = Vec::with_capacity(xs.len());
        for (x, y) in izip!(xs, ys) {
            let trains = model.simulate(x)?;
            let decision = spike_argmax(&trains, true, &mut self.rng);
            let sample_cost = cost.cost(&decision, y)?;
            if sample_cost == 0.0 {
                hits += 1;
            } else {
                misses += 1;
            }
            errors.push(sample_cost);
        }

        let accuracy = hits as f64 / xs.len() as f64;
        info!("tested {} samples: accuracy {}", xs.len(), accuracy);
        Ok(Report {
            hits,
            misses,
            accuracy,
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::cost::{CategoricalError, SoftmaxCrossEntropy};
    use crate::simulator::{RateConfig, RateSim};

    const SEED: u64 = 42;

    fn quiet_model(layer_sizes: &[usize]) -> Model<RateSim> {
        let config = RateConfig {
            jitter_std: 0.0,
            ..RateConfig::default()
        };
        let sim = Rc::new(RefCell::new(RateSim::new(config, SEED)));
        let mut model = Model::build(sim, layer_sizes[0]).unwrap();
        for &size in &layer_sizes[1..] {
            model.push_dense(size).unwrap();
        }
        model
    }

    fn train_with_count(count: usize) -> SpikeTrain {
        let times: Vec<f64> = (0..count).map(|k| k as f64).collect();
        SpikeTrain::build(&times).unwrap()
    }

    #[test]
    fn test_gradient_descent_rule_shapes() {
        let mut rule = GradientDescentRule::new(0.1);
        let weights = DMatrix::from_element(3, 2, 1.0);
        let spikes = vec![train_with_count(40), train_with_count(0)];
        let errors = DVector::from_vec(vec![1.0, -1.0]);

        let (new_weights, propagated) = rule.update(&spikes, &weights, &errors).unwrap();
        assert_eq!(new_weights.shape(), (3, 2));
        assert_eq!(propagated.len(), 3);

        // First column moves against the positive error, the silent second
        // column stays put.
        assert!(new_weights.column(0).iter().all(|&w| w < 1.0));
        assert!(new_weights.column(1).iter().all(|&w| w == 1.0));

        // Propagated error is W * error.
        assert_eq!(propagated, &weights * &errors);
    }

    #[test]
    fn test_gradient_descent_rule_rejects_bad_shapes() {
        let mut rule = GradientDescentRule::new(0.1);
        let weights = DMatrix::from_element(3, 2, 1.0);
        let spikes = vec![train_with_count(1), train_with_count(2)];
        let errors = DVector::from_vec(vec![1.0, 2.0, 3.0]);

        assert!(rule.update(&spikes, &weights, &errors).is_err());
    }

    #[test]
    fn test_train_returns_one_error_per_epoch() {
        let mut model = quiet_model(&[2, 2]);
        let calibration = DVector::from_element(2, crate::CALIBRATION_CURRENT);
        model.normalise_weights(&calibration).unwrap();

        let xs = vec![
            DVector::from_vec(vec![15.0, 5.0]),
            DVector::from_vec(vec![5.0, 15.0]),
        ];
        let ys = vec![
            DVector::from_vec(vec![1.0, 0.0]),
            DVector::from_vec(vec![0.0, 1.0]),
        ];

        let mut optimiser = GradientDescent::new(0.01, 3, SEED);
        let errors = optimiser
            .train(&mut model, &xs, &ys, &SoftmaxCrossEntropy)
            .unwrap();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| e.is_finite()));
    }

    #[test]
    fn test_test_produces_consistent_report() {
        let mut model = quiet_model(&[2, 2]);
        let calibration = DVector::from_element(2, crate::CALIBRATION_CURRENT);
        model.normalise_weights(&calibration).unwrap();

        let xs = vec![
            DVector::from_vec(vec![15.0, 5.0]),
            DVector::from_vec(vec![5.0, 15.0]),
        ];
        let ys = vec![
            DVector::from_vec(vec![1.0, 0.0]),
            DVector::from_vec(vec![0.0, 1.0]),
        ];

        let mut optimiser = GradientDescent::new(0.01, 1, SEED);
        let report = optimiser
            .test(&mut model, &xs, &ys, &CategoricalError)
            .unwrap();

        assert_eq!(report.hits + report.misses, 2);
        assert_eq!(report.errors.len(), 2);
        assert!((report.accuracy - report.hits as f64 / 2.0).abs() < 1e-12);

        let dict = report.to_dict().unwrap();
        assert!(dict.contains_key("accuracy"));
        assert!(dict.contains_key("hits"));
        assert!(dict.contains_key("misses"));
        assert!(dict.contains_key("errors"));
    }

    #[test]
    fn test_empty_samples_are_rejected() {
        let mut model = quiet_model(&[2, 2]);
        let mut optimiser = GradientDescent::new(0.01, 1, SEED);

        assert!(matches!(
            optimiser.train(&mut model, &[], &[], &SoftmaxCrossEntropy),
            Err(SpikeGradError::MissingTrainingData(_))
        ));
    }
}
