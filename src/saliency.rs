//! Input-saliency attribution storage and normalization
//!
//! Holds precomputed importance scores, one vector per generated token.
//! The vector at generated offset `i` covers source tokens
//! `[0, i + n_input_tokens)` -- causal, so it grows with the offset.

use std::collections::BTreeMap;

use crate::errors::{LensError, Result};

/// Importance scores per attribution method.
///
/// Keyed by method name (e.g. `"grad_x_input"`); each value holds one
/// importance vector per generated-token offset.
#[derive(Debug, Clone, Default)]
pub struct AttributionMap {
    methods: BTreeMap<String, Vec<Vec<f32>>>,
}

impl AttributionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the per-position importance vectors for one method.
    pub fn insert(&mut self, method: impl Into<String>, per_position: Vec<Vec<f32>>) {
        self.methods.insert(method.into(), per_position);
    }

    /// Names of the recorded methods.
    pub fn methods(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// All importance vectors for one method.
    pub fn get(&self, method: &str) -> Result<&[Vec<f32>]> {
        self.methods
            .get(method)
            .map(Vec::as_slice)
            .ok_or_else(|| LensError::UnknownAttributionMethod {
                method: method.to_string(),
                available: self.methods.keys().cloned().collect(),
            })
    }

    /// The importance vector for one generated-token offset.
    ///
    /// Offset 0 is the first generated token. Fails with
    /// [`LensError::InvalidPosition`] when the offset is outside
    /// `[0, n_output_tokens)`.
    pub fn attribution_for(&self, method: &str, generated_offset: usize) -> Result<&[f32]> {
        let entries = self.get(method)?;
        entries
            .get(generated_offset)
            .map(Vec::as_slice)
            .ok_or(LensError::InvalidPosition {
                position: generated_offset,
                min: 0,
                max: entries.len().saturating_sub(1),
            })
    }
}

/// Normalize importance scores into fractional contributions.
///
/// Each score is divided by the vector's sum. An all-zero vector
/// normalizes to all zeros rather than dividing by zero.
pub fn normalize(scores: &[f32]) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    if sum == 0.0 {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|s| s / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> AttributionMap {
        let mut map = AttributionMap::new();
        map.insert(
            "grad_x_input",
            vec![vec![0.2, 0.5, 0.3], vec![0.1, 0.1, 0.4, 0.4]],
        );
        map
    }

    #[test]
    fn test_attribution_lengths_grow_with_offset() {
        let map = sample_map();
        assert_eq!(map.attribution_for("grad_x_input", 0).unwrap().len(), 3);
        assert_eq!(map.attribution_for("grad_x_input", 1).unwrap().len(), 4);
    }

    #[test]
    fn test_unknown_method() {
        let map = sample_map();
        let err = map.get("integrated_gradients").unwrap_err();
        match err {
            LensError::UnknownAttributionMethod { method, available } => {
                assert_eq!(method, "integrated_gradients");
                assert_eq!(available, vec!["grad_x_input".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_offset_out_of_range() {
        let map = sample_map();
        let err = map.attribution_for("grad_x_input", 2).unwrap_err();
        assert!(matches!(
            err,
            LensError::InvalidPosition {
                position: 2,
                min: 0,
                max: 1
            }
        ));
    }

    #[test]
    fn test_normalize_sums_to_one() {
        let normalized = normalize(&[1.0, 3.0, 4.0]);
        assert_eq!(normalized, vec![0.125, 0.375, 0.5]);
    }

    #[test]
    fn test_normalize_all_zero_guard() {
        assert_eq!(normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
        assert!(normalize(&[]).is_empty());
    }
}
