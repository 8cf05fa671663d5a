//! Reference rate-coding simulator backend.
//!
//! `RateSim` is a deliberately small backend implementing the [`Backend`]
//! contract: neurons encode their injected current as a firing rate along a
//! fitted line, spike counts follow the rate, and spike times are laid out
//! evenly over the trial with a little Gaussian jitter. Populations are
//! evaluated in creation order, so feed-forward chains built front-to-back
//! simulate correctly; recurrent topologies are rejected.
//!
//! Weights are stored as `f32`, so weight round-trips through the backend
//! are exact only for values representable at that precision.

use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::backend::{Backend, PopulationId, ProjectionId};
use crate::error::SpikeGradError;
use crate::spike_train::SpikeTrain;
use crate::{RATE_INTERCEPT, RATE_SLOPE};

/// Tuning parameters of the rate-coding backend.
///
/// The slope and intercept of the current-to-rate line are fitted, hardware
/// specific values, not universal constants; the defaults reproduce the
/// calibration the crate-level constants record.
#[derive(Debug, Clone, PartialEq)]
pub struct RateConfig {
    /// Slope of the current-to-rate line.
    pub rate_slope: f64,
    /// Intercept of the current-to-rate line.
    pub rate_intercept: f64,
    /// Scaling applied to the summed weighted presynaptic counts before they
    /// enter a downstream neuron as current.
    pub synaptic_gain: f64,
    /// Standard deviation of the Gaussian jitter on spike times.
    pub jitter_std: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        RateConfig {
            rate_slope: RATE_SLOPE,
            rate_intercept: RATE_INTERCEPT,
            synaptic_gain: 0.05,
            jitter_std: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
struct Population {
    size: usize,
    bias: DVector<f64>,
    recording: bool,
    trains: Vec<SpikeTrain>,
    last_trial: u64,
}

#[derive(Debug, Clone)]
struct Projection {
    pre: PopulationId,
    post: PopulationId,
    weights: DMatrix<f32>,
}

/// A deterministic-by-seed rate-coding simulator.
///
/// The first population created is the input population: `run_trial` injects
/// its argument as currents there.
#[derive(Debug, Clone)]
pub struct RateSim {
    config: RateConfig,
    populations: Vec<Population>,
    projections: Vec<Projection>,
    rng: ChaCha8Rng,
    trial: u64,
}

impl RateSim {
    /// Create a new simulator with the given configuration and RNG seed.
    pub fn new(config: RateConfig, seed: u64) -> Self {
        RateSim {
            config,
            populations: vec![],
            projections: vec![],
            rng: ChaCha8Rng::seed_from_u64(seed),
            trial: 0,
        }
    }

    /// The firing rate (spikes per trial) produced by a constant current.
    fn rate_of(&self, current: f64) -> f64 {
        (self.config.rate_slope * current - self.config.rate_intercept).max(0.0)
    }

    fn population(&self, id: PopulationId) -> Result<&Population, SpikeGradError> {
        self.populations
            .get(id)
            .ok_or_else(|| SpikeGradError::OutOfBounds(format!("no population with id {}", id)))
    }

    fn projection(&self, id: ProjectionId) -> Result<&Projection, SpikeGradError> {
        self.projections
            .get(id)
            .ok_or_else(|| SpikeGradError::OutOfBounds(format!("no projection with id {}", id)))
    }

    /// Lay out `count` spikes evenly over the trial, jitter them, and wrap
    /// them into a spike train.
    fn sample_train(
        &mut self,
        count: usize,
        duration: f64,
    ) -> Result<SpikeTrain, SpikeGradError> {
        if count == 0 {
            return Ok(SpikeTrain::empty());
        }

        let jitter = Normal::new(0.0, self.config.jitter_std)
            .map_err(|e| SpikeGradError::BackendError(e.to_string()))?;

        let step = duration / count as f64;
        let upper = duration * (1.0 - 1e-12);
        let times: Vec<f64> = (0..count)
            .map(|k| {
                let t = (k as f64 + 0.5) * step + jitter.sample(&mut self.rng);
                t.clamp(0.0, upper)
            })
            .collect();

        SpikeTrain::build(&times)
    }
}

impl Backend for RateSim {
    fn create_population(&mut self, size: usize) -> PopulationId {
        self.populations.push(Population {
            size,
            bias: DVector::zeros(size),
            recording: false,
            trains: vec![],
            last_trial: 0,
        });
        self.populations.len() - 1
    }

    fn population_size(&self, population: PopulationId) -> Result<usize, SpikeGradError> {
        Ok(self.population(population)?.size)
    }

    fn connect_all_to_all(
        &mut self,
        pre: PopulationId,
        post: PopulationId,
    ) -> Result<ProjectionId, SpikeGradError> {
        if pre == post {
            return Err(SpikeGradError::InvalidParameter(
                "All-to-all projections between a population and itself are not supported"
                    .to_string(),
            ));
        }
        if post < pre {
            return Err(SpikeGradError::BackendError(
                "Recurrent topologies are not supported: populations are evaluated in creation order".to_string(),
            ));
        }
        let pre_size = self.population(pre)?.size;
        let post_size = self.population(post)?.size;

        self.projections.push(Projection {
            pre,
            post,
            weights: DMatrix::zeros(pre_size, post_size),
        });
        Ok(self.projections.len() - 1)
    }

    fn projection_shape(
        &self,
        projection: ProjectionId,
    ) -> Result<(usize, usize), SpikeGradError> {
        Ok(self.projection(projection)?.weights.shape())
    }

    fn set_projection_weights(
        &mut self,
        projection: ProjectionId,
        weights: &DMatrix<f64>,
    ) -> Result<(), SpikeGradError> {
        let expected = self.projection(projection)?.weights.shape();
        if weights.shape() != expected {
            return Err(SpikeGradError::ShapeMismatch {
                expected,
                actual: weights.shape(),
            });
        }
        self.projections[projection].weights = weights.map(|w| w as f32);
        Ok(())
    }

    fn projection_weights(
        &self,
        projection: ProjectionId,
    ) -> Result<DMatrix<f64>, SpikeGradError> {
        Ok(self.projection(projection)?.weights.map(|w| w as f64))
    }

    fn set_population_bias(
        &mut self,
        population: PopulationId,
        bias: &DVector<f64>,
    ) -> Result<(), SpikeGradError> {
        let size = self.population(population)?.size;
        if bias.len() != size {
            return Err(SpikeGradError::ShapeMismatch {
                expected: (size, 1),
                actual: (bias.len(), 1),
            });
        }
        self.populations[population].bias = bias.clone();
        Ok(())
    }

    fn record_spikes(&mut self, population: PopulationId) -> Result<(), SpikeGradError> {
        self.population(population)?;
        self.populations[population].recording = true;
        Ok(())
    }

    fn run_trial(&mut self, input: &DVector<f64>, duration: f64) -> Result<u64, SpikeGradError> {
        if self.populations.is_empty() {
            return Err(SpikeGradError::BackendError(
                "Cannot run a trial without populations".to_string(),
            ));
        }
        if duration <= 0.0 {
            return Err(SpikeGradError::InvalidParameter(
                "Trial duration must be positive".to_string(),
            ));
        }
        if input.len() != self.populations[0].size {
            return Err(SpikeGradError::ShapeMismatch {
                expected: (self.populations[0].size, 1),
                actual: (input.len(), 1),
            });
        }

        // Per-population spike counts, computed in creation order.
        let mut counts: Vec<DVector<f64>> = Vec::with_capacity(self.populations.len());
        for (id, population) in self.populations.iter().enumerate() {
            let mut drive = population.bias.clone();
            if id == 0 {
                drive += input;
            }
            for projection in &self.projections {
                if projection.post != id {
                    continue;
                }
                let weights = projection.weights.map(|w| w as f64);
                drive += weights.transpose() * &counts[projection.pre] * self.config.synaptic_gain;
            }
            let count =
                DVector::from_iterator(population.size, drive.iter().map(|&current| {
                    self.rate_of(current).round()
                }));
            counts.push(count);
        }

        self.trial += 1;

        for id in 0..self.populations.len() {
            if !self.populations[id].recording {
                continue;
            }
            let mut trains = Vec::with_capacity(self.populations[id].size);
            for neuron in 0..self.populations[id].size {
                let count = counts[id][neuron] as usize;
                trains.push(self.sample_train(count, duration)?);
            }
            self.populations[id].trains = trains;
            self.populations[id].last_trial = self.trial;
        }

        Ok(self.trial)
    }

    fn spike_trains(&self, population: PopulationId) -> Result<Vec<SpikeTrain>, SpikeGradError> {
        let population = self.population(population)?;
        if !population.recording {
            return Err(SpikeGradError::BackendError(
                "Population is not recording spikes".to_string(),
            ));
        }
        if population.last_trial != self.trial || self.trial == 0 {
            return Err(SpikeGradError::StaleSpikes(
                "No spike recording for the current trial".to_string(),
            ));
        }
        Ok(population.trains.clone())
    }

    fn trial(&self) -> u64 {
        self.trial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: u64 = 42;

    fn quiet_config() -> RateConfig {
        RateConfig {
            jitter_std: 0.0,
            ..RateConfig::default()
        }
    }

    #[test]
    fn test_rate_encoding_monotonic() {
        let mut sim = RateSim::new(quiet_config(), SEED);
        let population = sim.create_population(2);
        sim.record_spikes(population).unwrap();

        sim.run_trial(&DVector::from_vec(vec![5.0, 25.0]), 50.0)
            .unwrap();
        let trains = sim.spike_trains(population).unwrap();

        // More current, more spikes; both on the fitted line.
        assert!(trains[1].len() > trains[0].len());
        assert_eq!(
            trains[0].len(),
            (RATE_SLOPE * 5.0 - RATE_INTERCEPT).round() as usize
        );
        assert_eq!(
            trains[1].len(),
            (RATE_SLOPE * 25.0 - RATE_INTERCEPT).round() as usize
        );
    }

    #[test]
    fn test_negative_drive_is_silent() {
        let mut sim = RateSim::new(quiet_config(), SEED);
        let population = sim.create_population(1);
        sim.record_spikes(population).unwrap();

        sim.run_trial(&DVector::from_vec(vec![-10.0]), 50.0).unwrap();
        let trains = sim.spike_trains(population).unwrap();
        assert!(trains[0].is_empty());
    }

    #[test]
    fn test_weight_storage_precision() {
        let mut sim = RateSim::new(quiet_config(), SEED);
        let pre = sim.create_population(3);
        let post = sim.create_population(2);
        let projection = sim.connect_all_to_all(pre, post).unwrap();

        let weights = DMatrix::from_element(3, 2, 0.1);
        sim.set_projection_weights(projection, &weights).unwrap();
        let realized = sim.projection_weights(projection).unwrap();

        assert_eq!(realized.shape(), (3, 2));
        // 0.1 is not representable in f32, so the round-trip is close but not exact.
        assert!(realized.iter().all(|&w| (w - 0.1).abs() < 1e-7));
        assert!(realized.iter().all(|&w| w == 0.1f32 as f64));
    }

    #[test]
    fn test_projection_shape_validation() {
        let mut sim = RateSim::new(quiet_config(), SEED);
        let pre = sim.create_population(3);
        let post = sim.create_population(2);
        let projection = sim.connect_all_to_all(pre, post).unwrap();

        assert_eq!(
            sim.set_projection_weights(projection, &DMatrix::zeros(2, 3)),
            Err(SpikeGradError::ShapeMismatch {
                expected: (3, 2),
                actual: (2, 3),
            })
        );
    }

    #[test]
    fn test_feed_forward_propagation() {
        let mut sim = RateSim::new(quiet_config(), SEED);
        let input = sim.create_population(2);
        let output = sim.create_population(1);
        let projection = sim.connect_all_to_all(input, output).unwrap();
        sim.record_spikes(output).unwrap();

        sim.set_projection_weights(projection, &DMatrix::from_element(2, 1, 1.0))
            .unwrap();
        sim.run_trial(&DVector::from_vec(vec![25.0, 25.0]), 50.0)
            .unwrap();

        let trains = sim.spike_trains(output).unwrap();
        let input_count = (RATE_SLOPE * 25.0 - RATE_INTERCEPT).round();
        let drive = 2.0 * input_count * 0.05;
        let expected = (RATE_SLOPE * drive - RATE_INTERCEPT).round() as usize;
        assert_eq!(trains[0].len(), expected);
    }

    #[test]
    fn test_spike_trains_require_recording_and_fresh_trial() {
        let mut sim = RateSim::new(quiet_config(), SEED);
        let population = sim.create_population(1);

        assert_eq!(
            sim.spike_trains(population),
            Err(SpikeGradError::BackendError(
                "Population is not recording spikes".to_string()
            ))
        );

        sim.record_spikes(population).unwrap();
        assert_eq!(
            sim.spike_trains(population),
            Err(SpikeGradError::StaleSpikes(
                "No spike recording for the current trial".to_string()
            ))
        );

        sim.run_trial(&DVector::from_vec(vec![10.0]), 50.0).unwrap();
        assert!(sim.spike_trains(population).is_ok());
        assert_eq!(sim.trial(), 1);
    }

    #[test]
    fn test_recurrent_topology_rejected() {
        let mut sim = RateSim::new(quiet_config(), SEED);
        let first = sim.create_population(2);
        let second = sim.create_population(2);

        assert!(sim.connect_all_to_all(second, first).is_err());
        assert!(sim.connect_all_to_all(first, first).is_err());
    }

    #[test]
    fn test_spike_times_lie_within_trial() {
        let mut sim = RateSim::new(RateConfig::default(), SEED);
        let population = sim.create_population(3);
        sim.record_spikes(population).unwrap();

        let duration = 50.0;
        sim.run_trial(&DVector::from_vec(vec![25.0, 15.0, 5.0]), duration)
            .unwrap();

        for train in sim.spike_trains(population).unwrap() {
            assert!(train
                .times()
                .iter()
                .all(|&t| (0.0..duration).contains(&t)));
            assert!(train.times().windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
