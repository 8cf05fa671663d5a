//! Contract between the learning core and a spiking-network simulator.
//!
//! The core never simulates spikes itself. It creates neuron populations and
//! all-to-all projections through this trait, runs one trial per input
//! sample, and reads back the recorded spike trains and the realized weight
//! matrices. Backends are free to store weights at a lower precision than
//! `f64`; round-trips through [`Backend::set_projection_weights`] and
//! [`Backend::projection_weights`] are therefore lossy and must not be
//! assumed exact beyond the backend's storage precision.

use nalgebra::{DMatrix, DVector};

use crate::error::SpikeGradError;
use crate::spike_train::SpikeTrain;

/// Handle to a neuron population owned by a backend.
pub type PopulationId = usize;

/// Handle to an all-to-all projection between two populations.
pub type ProjectionId = usize;

/// The simulator contract consumed by layers, models and the orchestrator.
pub trait Backend {
    /// Create a new neuron population of the given size and return its handle.
    fn create_population(&mut self, size: usize) -> PopulationId;

    /// Returns the number of neurons in the population.
    fn population_size(&self, population: PopulationId) -> Result<usize, SpikeGradError>;

    /// Create an all-to-all projection from `pre` to `post`.
    fn connect_all_to_all(
        &mut self,
        pre: PopulationId,
        post: PopulationId,
    ) -> Result<ProjectionId, SpikeGradError>;

    /// Returns the projection weight shape as (pre size, post size).
    fn projection_shape(&self, projection: ProjectionId)
        -> Result<(usize, usize), SpikeGradError>;

    /// Write the weight matrix of the projection, at the backend's storage
    /// precision. The matrix shape must match [`Backend::projection_shape`].
    fn set_projection_weights(
        &mut self,
        projection: ProjectionId,
        weights: &DMatrix<f64>,
    ) -> Result<(), SpikeGradError>;

    /// Read back the realized weight matrix of the projection.
    fn projection_weights(
        &self,
        projection: ProjectionId,
    ) -> Result<DMatrix<f64>, SpikeGradError>;

    /// Set a constant bias current injected into every neuron of the
    /// population on each trial.
    fn set_population_bias(
        &mut self,
        population: PopulationId,
        bias: &DVector<f64>,
    ) -> Result<(), SpikeGradError>;

    /// Enable spike recording for the population. Only recorded populations
    /// can be read back with [`Backend::spike_trains`].
    fn record_spikes(&mut self, population: PopulationId) -> Result<(), SpikeGradError>;

    /// Run one simulated trial, injecting `input` as currents into the input
    /// population, and return the trial number (starting at 1).
    fn run_trial(&mut self, input: &DVector<f64>, duration: f64) -> Result<u64, SpikeGradError>;

    /// Returns the spike trains recorded for the population during the most
    /// recent trial, one train per neuron.
    fn spike_trains(&self, population: PopulationId) -> Result<Vec<SpikeTrain>, SpikeGradError>;

    /// Returns the number of completed trials.
    fn trial(&self) -> u64;
}
