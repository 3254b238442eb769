//! Error module for the CA1 analysis library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq, Clone)]
pub enum AnalysisError {
    /// Error for invalid parameters, e.g., a non-positive time step.
    InvalidParameter(String),
    /// Error for a population label that is not part of the configuration.
    UnknownPopulation(String),
    /// Error for a variant tag that does not follow a known naming convention.
    InvalidVariant(String),
    /// Error for a trial file that does not exist.
    MissingTrial(String),
    /// Error for a trial file that exists but cannot be interpreted.
    InvalidTrial(String),
    /// Error for I/O operations.
    IOError(String),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AnalysisError::InvalidParameter(e) => write!(f, "Invalid parameters: {}", e),
            AnalysisError::UnknownPopulation(e) => write!(f, "Unknown population: {}", e),
            AnalysisError::InvalidVariant(e) => write!(f, "Invalid variant: {}", e),
            AnalysisError::MissingTrial(e) => write!(f, "Missing trial: {}", e),
            AnalysisError::InvalidTrial(e) => write!(f, "Invalid trial: {}", e),
            AnalysisError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for AnalysisError {}
