//! Error taxonomy for sequence analyses
//!
//! Every validation failure is raised at the call boundary with the
//! offending value and the valid range or set in the message. Nothing is
//! clamped or defaulted silently; the one documented exception is the
//! zero-sum guard in [`crate::saliency::normalize`].

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LensError>;

/// Errors produced by the analysis entry points.
#[derive(Debug, Error)]
pub enum LensError {
    /// A requested sequence position falls outside the valid range.
    #[error("position {position} is out of range; accepted values for this sequence are between {min} and {max}")]
    InvalidPosition {
        position: usize,
        min: usize,
        max: usize,
    },

    /// A layer selection is malformed or names layers without recorded data.
    #[error("invalid layer selection: {0}")]
    InvalidLayerRange(String),

    /// No activation tensor was supplied when the record was built.
    #[error("no activation data found; make sure activation collection was enabled when running the model")]
    EmptyActivations,

    /// The target token id is absent from the vocabulary distribution.
    ///
    /// Unreachable for a well-formed vocabulary; treated as a fatal
    /// invariant violation when it occurs.
    #[error("token id {token_id} is not present in the vocabulary distribution (vocabulary size is {vocab_size})")]
    TokenNotFound { token_id: u32, vocab_size: usize },

    /// The requested attribution method was never recorded.
    #[error("unknown attribution method `{method}`; recorded methods are: {available:?}")]
    UnknownAttributionMethod {
        method: String,
        available: Vec<String>,
    },

    /// The record itself violates a construction invariant.
    #[error("malformed sequence record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_position_message() {
        let err = LensError::InvalidPosition {
            position: 2,
            min: 3,
            max: 9,
        };
        let msg = err.to_string();
        assert!(msg.contains('2'));
        assert!(msg.contains("between 3 and 9"));
    }

    #[test]
    fn test_unknown_method_lists_available() {
        let err = LensError::UnknownAttributionMethod {
            method: "ig".to_string(),
            available: vec!["grad_x_input".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("`ig`"));
        assert!(msg.contains("grad_x_input"));
    }
}
