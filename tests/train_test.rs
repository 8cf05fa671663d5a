use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;

use spikegrad::cost::CostFunction;
use spikegrad::error::SpikeGradError;
use spikegrad::model::Model;
use spikegrad::optim::{GradientDescent, Optimiser, Report};
use spikegrad::simulator::{RateConfig, RateSim};
use spikegrad::spike_train::{spike_argmax, spike_softmax};
use spikegrad::train::Trainer;

const SEED: u64 = 42;

fn two_class_model() -> Model<RateSim> {
    let config = RateConfig {
        jitter_std: 0.0,
        ..RateConfig::default()
    };
    let sim = Rc::new(RefCell::new(RateSim::new(config, SEED)));
    let mut model = Model::build(sim, 2).unwrap();
    model.push_dense(2).unwrap();
    model
}

fn two_class_data() -> (DMatrix<f64>, Vec<DVector<f64>>) {
    // Ten samples, one feature clearly dominant per class, already scaled
    // into the simulator's input current range.
    let mut rows = vec![];
    let mut labels = vec![];
    for k in 0..5 {
        let bump = k as f64 * 0.1;
        rows.extend_from_slice(&[8.0 + bump, 2.0]);
        labels.push(DVector::from_vec(vec![1.0, 0.0]));
        rows.extend_from_slice(&[2.0, 8.0 + bump]);
        labels.push(DVector::from_vec(vec![0.0, 1.0]));
    }
    (DMatrix::from_row_slice(10, 2, &rows), labels)
}

/// An optimiser that simulates trials but never touches the weights.
struct NoOpOptimiser {
    rng: StdRng,
}

impl NoOpOptimiser {
    fn new(seed: u64) -> Self {
        NoOpOptimiser {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Optimiser<RateSim> for NoOpOptimiser {
    fn train(
        &mut self,
        model: &mut Model<RateSim>,
        xs: &[DVector<f64>],
        ys: &[DVector<f64>],
        cost: &dyn CostFunction,
    ) -> Result<Vec<f64>, SpikeGradError> {
        let mut total = 0.0;
        for (x, y) in xs.iter().zip(ys) {
            let trains = model.simulate(x)?;
            let output = spike_softmax(&trains);
            total += cost.cost(&output, y)?;
        }
        Ok(vec![total / xs.len() as f64])
    }

    fn test(
        &mut self,
        model: &mut Model<RateSim>,
        xs: &[DVector<f64>],
        ys: &[DVector<f64>],
        cost: &dyn CostFunction,
    ) -> Result<Report, SpikeGradError> {
        let mut hits = 0;
        let mut misses = 0;
        let mut errors = vec![];
        for (x, y) in xs.iter().zip(ys) {
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
        Ok(Report {
            hits,
            misses,
            accuracy: hits as f64 / xs.len() as f64,
            errors,
        })
    }
}

#[test]
fn train_with_noop_optimiser_emits_report() {
    let mut trainer = Trainer::new(two_class_model());
    let mut optimiser = NoOpOptimiser::new(SEED);
    let (xs, ys) = two_class_data();

    let report = trainer
        .train(&mut optimiser, Some(xs), Some(ys), 0.8)
        .unwrap();

    let dict = report.as_object().unwrap();
    assert!(dict.contains_key("train_errors"));
    assert!(dict.contains_key("accuracy"));
    assert!(dict.contains_key("hits"));
    assert!(dict.contains_key("misses"));
    assert!(dict.contains_key("errors"));

    let train_errors = dict["train_errors"].as_array().unwrap();
    assert_eq!(train_errors.len(), 1);

    // Eight training samples, two testing samples
    assert_eq!(dict["errors"].as_array().unwrap().len(), 2);
}

#[test]
fn train_with_gradient_descent_emits_report() {
    let mut trainer = Trainer::new(two_class_model());
    let mut optimiser = GradientDescent::new(0.01, 2, SEED);
    let (xs, ys) = two_class_data();

    let report = trainer
        .train(&mut optimiser, Some(xs), Some(ys), 0.8)
        .unwrap();

    let dict = report.as_object().unwrap();
    let train_errors = dict["train_errors"].as_array().unwrap();
    assert_eq!(train_errors.len(), 2);
    assert!(train_errors
        .iter()
        .all(|e| e.as_f64().map(f64::is_finite).unwrap_or(false)));

    let hits = dict["hits"].as_u64().unwrap();
    let misses = dict["misses"].as_u64().unwrap();
    assert_eq!(hits + misses, 2);
}
