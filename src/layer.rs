//! The layers of the network, which must all define a backward pass through
//! the layer (to update the layer weights) as well as getting, setting,
//! restoring and storing weights and spikes.
//!
//! A layer is a thin state container: it owns a weight matrix and the spike
//! trains recorded for its output population during the most recent trial.
//! All learning is delegated to a caller-supplied [`WeightUpdateRule`].

use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::{DMatrix, DVector};

use crate::backend::{Backend, PopulationId, ProjectionId};
use crate::error::SpikeGradError;
use crate::spike_train::SpikeTrain;
use crate::DEFAULT_WEIGHT;

/// A weight assignment: a scalar broadcast over the whole matrix, a full
/// matrix of the projection's exact shape, or a generator of values by
/// (row, column) position.
pub enum WeightInit {
    Scalar(f64),
    Matrix(DMatrix<f64>),
    FromFn(Box<dyn Fn(usize, usize) -> f64>),
}

impl WeightInit {
    /// Wrap a generator of weight values by (row, column) position.
    pub fn from_fn<F: Fn(usize, usize) -> f64 + 'static>(generator: F) -> Self {
        WeightInit::FromFn(Box::new(generator))
    }
}

impl From<f64> for WeightInit {
    fn from(value: f64) -> Self {
        WeightInit::Scalar(value)
    }
}

impl From<DMatrix<f64>> for WeightInit {
    fn from(matrix: DMatrix<f64>) -> Self {
        WeightInit::Matrix(matrix)
    }
}

/// The surrogate learning rule invoked by [`Layer::backward`].
///
/// Given the spikes recorded for the layer's output population, the layer's
/// current weight matrix and the error signal arriving from the next layer,
/// the rule returns the new weight matrix and the error to propagate to the
/// previous layer. The layer never inspects the rule's internals; it only
/// checks that the returned matrix preserves the weight shape.
pub trait WeightUpdateRule {
    fn update(
        &mut self,
        spikes: &[SpikeTrain],
        weights: &DMatrix<f64>,
        errors: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DVector<f64>), SpikeGradError>;
}

/// A neural network layer backed by a simulator projection, with a backward
/// weight update based on existing spikes.
pub trait Layer {
    /// Performs backward optimisation based on the given errors and update
    /// rule, replacing the layer's cached weight matrix, and returns the
    /// errors to propagate to the previous layer.
    ///
    /// Fails with [`SpikeGradError::StaleSpikes`] unless
    /// [`Layer::store_spikes`] has captured the current trial's spikes, and
    /// with [`SpikeGradError::ShapeMismatch`] if the rule does not preserve
    /// the weight shape.
    fn backward(
        &mut self,
        errors: &DVector<f64>,
        update: &mut dyn WeightUpdateRule,
    ) -> Result<DVector<f64>, SpikeGradError>;

    /// Returns the current cached weight matrix.
    fn get_weights(&self) -> &DMatrix<f64>;

    /// Sets the weights of the layer, applying them to the underlying
    /// projection and re-reading the realized matrix back. Round-trips are
    /// only exact up to the backend's storage precision.
    fn set_weights(&mut self, weights: WeightInit) -> Result<(), SpikeGradError>;

    /// Reapplies the layer's own cached weight matrix through
    /// [`Layer::set_weights`] and returns the re-applied weights.
    fn restore_weights(&mut self) -> Result<DMatrix<f64>, SpikeGradError>;

    /// Fetches the most recently simulated output spike trains from the
    /// underlying population recording and caches them, overwriting any
    /// prior cache. Must be called once per trial before
    /// [`Layer::backward`].
    fn store_spikes(&mut self) -> Result<&[SpikeTrain], SpikeGradError>;

    /// Sets the bias currents of the layer's output population.
    fn set_biases(&mut self, biases: &DVector<f64>) -> Result<(), SpikeGradError>;

    /// The size of the input population.
    fn input_size(&self) -> usize;

    /// The size of the output population.
    fn output_size(&self) -> usize;
}

/// A densely connected layer between two populations, assuming an
/// all-to-all projection.
pub struct Dense<B: Backend> {
    sim: Rc<RefCell<B>>,
    projection: ProjectionId,
    post: PopulationId,
    weights: DMatrix<f64>,
    spikes: Vec<SpikeTrain>,
    spike_trial: u64,
}

impl<B: Backend> Dense<B> {
    /// Initialises a densely connected layer between two populations.
    ///
    /// The projection is created all-to-all, spike recording is enabled on
    /// the output population, and all weights default to
    /// [`DEFAULT_WEIGHT`] unless an initialisation is given.
    pub fn new(
        sim: Rc<RefCell<B>>,
        pre: PopulationId,
        post: PopulationId,
        weights: Option<WeightInit>,
    ) -> Result<Self, SpikeGradError> {
        let projection = {
            let mut backend = sim.borrow_mut();
            let projection = backend.connect_all_to_all(pre, post)?;
            backend.record_spikes(post)?;
            projection
        };

        let mut layer = Dense {
            sim,
            projection,
            post,
            weights: DMatrix::zeros(0, 0),
            spikes: vec![],
            spike_trial: 0,
        };
        layer.set_weights(weights.unwrap_or(WeightInit::Scalar(DEFAULT_WEIGHT)))?;
        Ok(layer)
    }
}

impl<B: Backend> Layer for Dense<B> {
    fn backward(
        &mut self,
        errors: &DVector<f64>,
        update: &mut dyn WeightUpdateRule,
    ) -> Result<DVector<f64>, SpikeGradError> {
        let trial = self.sim.borrow().trial();
        if trial == 0 || self.spike_trial != trial {
            return Err(SpikeGradError::StaleSpikes(
                "store_spikes must capture the current trial before backward".to_string(),
            ));
        }

        let (new_weights, propagated) = update.update(&self.spikes, &self.weights, errors)?;
        if new_weights.shape() != self.weights.shape() {
            return Err(SpikeGradError::ShapeMismatch {
                expected: self.weights.shape(),
                actual: new_weights.shape(),
            });
        }

        self.weights = new_weights;
        Ok(propagated)
    }

    fn get_weights(&self) -> &DMatrix<f64> {
        &self.weights
    }

    fn set_weights(&mut self, weights: WeightInit) -> Result<(), SpikeGradError> {
        let (num_pre, num_post) = self.sim.borrow().projection_shape(self.projection)?;

        let matrix = match weights {
            WeightInit::Scalar(value) => DMatrix::from_element(num_pre, num_post, value),
            WeightInit::Matrix(matrix) => {
                if matrix.shape() != (num_pre, num_post) {
                    return Err(SpikeGradError::ShapeMismatch {
                        expected: (num_pre, num_post),
                        actual: matrix.shape(),
                    });
                }
                matrix
            }
            WeightInit::FromFn(generator) => {
                DMatrix::from_fn(num_pre, num_post, |row, col| generator(row, col))
            }
        };

        let mut backend = self.sim.borrow_mut();
        backend.set_projection_weights(self.projection, &matrix)?;
        self.weights = backend.projection_weights(self.projection)?;
        Ok(())
    }

    fn restore_weights(&mut self) -> Result<DMatrix<f64>, SpikeGradError> {
        self.set_weights(WeightInit::Matrix(self.weights.clone()))?;
        Ok(self.weights.clone())
    }

    fn store_spikes(&mut self) -> Result<&[SpikeTrain], SpikeGradError> {
        let (trains, trial) = {
            let backend = self.sim.borrow();
            (backend.spike_trains(self.post)?, backend.trial())
        };
        self.spikes = trains;
        self.spike_trial = trial;
        Ok(&self.spikes)
    }

    fn set_biases(&mut self, biases: &DVector<f64>) -> Result<(), SpikeGradError> {
        self.sim.borrow_mut().set_population_bias(self.post, biases)
    }

    fn input_size(&self) -> usize {
        self.weights.nrows()
    }

    fn output_size(&self) -> usize {
        self.weights.ncols()
    }
}
