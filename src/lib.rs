//! This crate provides tools for training simulated spiking neural networks
//! (SNNs) with surrogate gradients in Rust.
//!
//! Neurons communicate via discrete spike events. A simulator backend
//! executes the forward pass one trial at a time; the recorded spike trains
//! are decoded by rate coding and drive a backward pass through the layers,
//! where a pluggable update rule turns spikes, weights and errors into new
//! weights.
//!
//! # Building Models
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use spikegrad::layer::{Layer, WeightInit};
//! use spikegrad::model::Model;
//! use spikegrad::simulator::{RateConfig, RateSim};
//!
//! // A simulator backend and a 3-2 network on top of it
//! let sim = Rc::new(RefCell::new(RateSim::new(RateConfig::default(), 42)));
//! let mut model = Model::build(sim, 3).unwrap();
//! model.push_dense(2).unwrap();
//!
//! // Weights broadcast from a scalar and live at the backend's precision
//! model.layers_mut()[0].set_weights(WeightInit::Scalar(5.0)).unwrap();
//! assert_eq!(model.layers()[0].get_weights().shape(), (3, 2));
//! assert!(model.layers()[0].get_weights().iter().all(|&w| w == 5.0));
//! ```
//!
//! # Decoding Spikes
//!
//! ```rust
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use spikegrad::spike_train::{spike_argmax, spike_softmax, SpikeTrain};
//!
//! let trains = vec![
//!     SpikeTrain::build(&[1.0, 3.0, 7.0]).unwrap(),
//!     SpikeTrain::build(&[2.0]).unwrap(),
//! ];
//!
//! // The softmax over spike counts is a probability distribution
//! let softmax = spike_softmax(&trains);
//! assert!((softmax.sum() - 1.0).abs() < 1e-12);
//!
//! // The argmax is a one-hot decision over the most active neuron
//! let mut rng = StdRng::seed_from_u64(42);
//! let decision = spike_argmax(&trains, true, &mut rng);
//! assert_eq!(decision[0], 1.0);
//! ```

pub mod backend;
pub mod cost;
pub mod error;
pub mod layer;
pub mod model;
pub mod optim;
pub mod simulator;
pub mod spike_train;
pub mod train;

/// The default weight of a freshly connected layer.
pub const DEFAULT_WEIGHT: f64 = 1.0;
/// The default duration of one simulated trial.
pub const DEFAULT_TRIAL_DURATION: f64 = 50.0;
/// The fitted slope of the current-to-rate line of the reference backend.
pub const RATE_SLOPE: f64 = 3.22500557;
/// The fitted intercept of the current-to-rate line of the reference backend.
pub const RATE_INTERCEPT: f64 = 1.61295370014;
/// The input current used to calibrate model weights before training.
pub const CALIBRATION_CURRENT: f64 = 25.0;
