//! A model is an ordered sequence of layers over simulator populations,
//! evaluated one trial at a time.

use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::DVector;

use crate::backend::{Backend, PopulationId};
use crate::error::SpikeGradError;
use crate::layer::{Dense, Layer, WeightInit};
use crate::spike_train::SpikeTrain;
use crate::DEFAULT_TRIAL_DURATION;

/// A feed-forward spiking network: an input population followed by densely
/// connected layers, all hosted on a shared simulator backend.
pub struct Model<B: Backend> {
    sim: Rc<RefCell<B>>,
    input: PopulationId,
    input_size: usize,
    output: PopulationId,
    layers: Vec<Box<dyn Layer>>,
    trial_duration: f64,
}

impl<B: Backend + 'static> Model<B> {
    /// Create a model with an input population of the given size.
    pub fn build(sim: Rc<RefCell<B>>, input_size: usize) -> Result<Self, SpikeGradError> {
        let input = {
            let mut backend = sim.borrow_mut();
            let input = backend.create_population(input_size);
            // Input activity is needed for weight normalisation.
            backend.record_spikes(input)?;
            input
        };
        Ok(Model {
            sim,
            input,
            input_size,
            output: input,
            layers: vec![],
            trial_duration: DEFAULT_TRIAL_DURATION,
        })
    }

    /// Append a dense layer projecting the current output population onto a
    /// new population of the given size, with default weights.
    pub fn push_dense(&mut self, size: usize) -> Result<(), SpikeGradError> {
        self.push_dense_with(size, None)
    }

    /// Append a dense layer with an explicit weight initialisation.
    pub fn push_dense_with(
        &mut self,
        size: usize,
        weights: Option<WeightInit>,
    ) -> Result<(), SpikeGradError> {
        let post = self.sim.borrow_mut().create_population(size);
        let layer = Dense::new(self.sim.clone(), self.output, post, weights)?;
        self.output = post;
        self.layers.push(Box::new(layer));
        Ok(())
    }

    /// The layers of the model, in forward order.
    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    /// Mutable access to the layers, in forward order.
    pub fn layers_mut(&mut self) -> &mut [Box<dyn Layer>] {
        &mut self.layers
    }

    /// The size of the input population.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// The size of the final population, i.e., of the decision vector.
    pub fn output_size(&self) -> usize {
        self.layers
            .last()
            .map(|layer| layer.output_size())
            .unwrap_or(self.input_size)
    }

    /// The duration of one simulated trial.
    pub fn trial_duration(&self) -> f64 {
        self.trial_duration
    }

    /// Set the duration of one simulated trial.
    pub fn set_trial_duration(&mut self, duration: f64) {
        self.trial_duration = duration;
    }

    /// Run one simulated trial with the given input currents, capture every
    /// layer's spikes in forward order, and return the output layer's spike
    /// trains.
    pub fn simulate(&mut self, input: &DVector<f64>) -> Result<Vec<SpikeTrain>, SpikeGradError> {
        if input.len() != self.input_size {
            return Err(SpikeGradError::ShapeMismatch {
                expected: (self.input_size, 1),
                actual: (input.len(), 1),
            });
        }

        self.sim.borrow_mut().run_trial(input, self.trial_duration)?;

        let num_layers = self.layers.len();
        let mut output = vec![];
        for (index, layer) in self.layers.iter_mut().enumerate() {
            let trains = layer.store_spikes()?;
            if index + 1 == num_layers {
                output = trains.to_vec();
            }
        }
        if num_layers == 0 {
            output = self.sim.borrow().spike_trains(self.input)?;
        }
        Ok(output)
    }

    /// Rescale every layer's weights so that, for the given calibration
    /// input, the layer's peak output activity matches its peak input
    /// activity. Layers are calibrated front to back, one trial per layer,
    /// so each layer sees the already-normalised activity of its
    /// predecessors.
    pub fn normalise_weights(&mut self, calibration: &DVector<f64>) -> Result<(), SpikeGradError> {
        fn max_count(trains: &[SpikeTrain]) -> usize {
            trains.iter().map(|train| train.len()).max().unwrap_or(0)
        }

        for k in 0..self.layers.len() {
            self.sim
                .borrow_mut()
                .run_trial(calibration, self.trial_duration)?;

            let input_max = if k == 0 {
                max_count(&self.sim.borrow().spike_trains(self.input)?)
            } else {
                max_count(self.layers[k - 1].store_spikes()?)
            };
            let output_max = max_count(self.layers[k].store_spikes()?);

            if input_max > 0 && output_max > 0 {
                let factor = input_max as f64 / output_max as f64;
                let scaled = self.layers[k].get_weights() * factor;
                self.layers[k].set_weights(WeightInit::Matrix(scaled))?;
            }
        }
        Ok(())
    }
}
