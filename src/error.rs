//! Error module for the spikegrad library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq)]
pub enum SpikeGradError {
    /// Error for a backward pass consuming spikes that do not belong to the current trial.
    StaleSpikes(String),
    /// Error for mismatched matrix or vector shapes, e.g., an update rule changing the weight shape.
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    /// Error for training data absent both in memory and on the process boundary.
    MissingTrainingData(String),
    /// Error for a train/test split leaving one of the segments empty.
    DegenerateSplit { train: usize, test: usize },
    /// Error for invalid parameters.
    InvalidParameter(String),
    /// Error for out of bounds access, e.g., population not found.
    OutOfBounds(String),
    /// Error reported by the simulator backend.
    BackendError(String),
    /// Error for I/O operations.
    IOError(String),
}

impl fmt::Display for SpikeGradError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SpikeGradError::StaleSpikes(e) => write!(f, "Stale spike cache: {}", e),
            SpikeGradError::ShapeMismatch { expected, actual } => write!(
                f,
                "Shape mismatch: expected {}x{}, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            SpikeGradError::MissingTrainingData(e) => write!(f, "Missing training data: {}", e),
            SpikeGradError::DegenerateSplit { train, test } => write!(
                f,
                "Degenerate train/test split: {} training and {} testing samples",
                train, test
            ),
            SpikeGradError::InvalidParameter(e) => write!(f, "Invalid parameter: {}", e),
            SpikeGradError::OutOfBounds(e) => write!(f, "Index out of bounds: {}", e),
            SpikeGradError::BackendError(e) => write!(f, "Backend error: {}", e),
            SpikeGradError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for SpikeGradError {}
