//! Module implementing the concept of a spike train, together with the
//! rate-coding decoders turning recorded spike trains into values.

use itertools::Itertools;
use nalgebra::DVector;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SpikeGradError;

/// Represents the spikes fired by one neuron during one simulated trial.
///
/// The decoders below only consume the number of spikes; the exact firing
/// times are carried along for collaborators that care about timing.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SpikeTrain {
    /// The (sorted) times at which the neuron fired.
    times: Vec<f64>,
}

impl SpikeTrain {
    /// Create a spike train with the specified firing times.
    /// If necessary, the firing times are sorted.
    /// The function returns an error for non-finite firing times.
    pub fn build(times: &[f64]) -> Result<Self, SpikeGradError> {
        for t in times {
            if !t.is_finite() {
                return Err(SpikeGradError::InvalidParameter(
                    "Firing times must be finite".to_string(),
                ));
            }
        }

        let mut times = times.to_vec();
        times.sort_by(|t1, t2| {
            t1.partial_cmp(t2).unwrap_or_else(|| {
                panic!("Comparison failed: NaN values should have been caught earlier")
            })
        });

        Ok(SpikeTrain { times })
    }

    /// Create an empty spike train (a silent neuron).
    pub fn empty() -> Self {
        SpikeTrain { times: vec![] }
    }

    /// Returns the firing times of the spike train.
    pub fn times(&self) -> &[f64] {
        &self.times[..]
    }

    /// Returns the number of spikes in the train.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Returns true if the neuron never fired during the trial.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Finds the softmax of a list of spike trains by counting the spike rate.
///
/// The counts are shifted by their maximum before exponentiating, which
/// leaves the distribution unchanged but avoids overflow. The output is a
/// probability distribution over the neurons: non-negative and summing to
/// one for any finite count vector, and invariant under adding a constant
/// to every count.
pub fn spike_softmax(spike_trains: &[SpikeTrain]) -> DVector<f64> {
    let counts = DVector::from_iterator(
        spike_trains.len(),
        spike_trains.iter().map(|train| train.len() as f64),
    );
    let max = counts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let e_x = counts.map(|count| (count - max).exp());
    let sum = e_x.sum();
    e_x / sum
}

/// Argmax over the neuron with the largest number of spikes.
///
/// If no spikes exist at all, the all-zero vector is returned: silence is
/// no decision, not a uniform default. Ties between spike counts are broken
/// uniformly at random with the given generator when `randomise_ties` is
/// true, and in favour of the lowest tied index otherwise.
///
/// Returns a one-hot vector with 1 at the selected neuron.
pub fn spike_argmax<R: Rng + ?Sized>(
    spike_trains: &[SpikeTrain],
    randomise_ties: bool,
    rng: &mut R,
) -> DVector<f64> {
    let counts = spike_trains.iter().map(|train| train.len()).collect_vec();
    let max_value = counts.iter().max().copied().unwrap_or(0);

    let mut max_array = DVector::zeros(spike_trains.len());

    if max_value == 0 {
        return max_array;
    }

    let tied_indices = counts.iter().positions(|&count| count == max_value).collect_vec();

    let max_index = if randomise_ties {
        tied_indices[rng.gen_range(0..tied_indices.len())]
    } else {
        tied_indices[0]
    };

    max_array[max_index] = 1.0;

    max_array
}
