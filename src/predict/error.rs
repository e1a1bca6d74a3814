use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    #[error("invalid element set (line {line}): {message}")]
    Parse { line: usize, message: String },
    #[error("unusable element set epoch: {0}")]
    Epoch(String),
    #[error("kepler solve did not converge after {iterations} iterations at {minutes:.3} min from epoch")]
    PropagationDivergence { minutes: f64, iterations: usize },
    #[error("element set cannot be propagated: {0}")]
    InvalidElements(String),
    #[error("invalid pass search: {0}")]
    InvalidSearch(String),
    #[error("pass search interrupted")]
    Interrupted,
    #[error("element source read error: {0}")]
    ElementSourceRead(String),
    #[error("satellite {0:?} not found in element data")]
    SatelliteNotFound(String),
    #[error("no element set loaded")]
    NoElementSet,
}

impl PredictError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        PredictError::Parse {
            line,
            message: message.into(),
        }
    }

    /// True when retrying with the same element text cannot succeed.
    pub fn is_fatal_for_element_set(&self) -> bool {
        matches!(
            self,
            PredictError::Parse { .. }
                | PredictError::Epoch(_)
                | PredictError::PropagationDivergence { .. }
                | PredictError::InvalidElements(_)
                | PredictError::SatelliteNotFound(_)
        )
    }
}

impl From<std::io::Error> for PredictError {
    fn from(err: std::io::Error) -> Self {
        PredictError::ElementSourceRead(err.to_string())
    }
}
