//! Token ranking through the vocabulary projection
//!
//! Both operations sort the full distribution in ascending order, the way
//! the trajectory and watch analyses consume it: top-k is the reversed
//! tail of the sorted probabilities, and a token's rank is its distance
//! from the top of the sorted logits. Rankings are only meaningful from
//! layer 1 onward; the embedding layer has no prediction-head semantics
//! and callers skip it.

use candle_core::Tensor;

use crate::errors::{LensError, Result};
use crate::projection::VocabProjection;

/// Stable ascending argsort over a score vector.
///
/// Ties keep their original index order, so the result is deterministic
/// for a fixed input.
fn ascending_argsort(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

/// Top-k predicted tokens for a hidden state, descending by probability.
///
/// Returns `min(k, vocab_size)` pairs of `(token_id, probability)`.
pub fn layer_topk(
    hidden: &Tensor,
    projection: &VocabProjection,
    k: usize,
) -> Result<Vec<(u32, f32)>> {
    let probs = projection.probabilities(hidden)?;
    let order = ascending_argsort(&probs);
    let take = k.min(order.len());
    let top = order[order.len() - take..]
        .iter()
        .rev()
        .map(|&ix| (ix as u32, probs[ix]))
        .collect();
    Ok(top)
}

/// 1-based rank of `target_id` in the distribution for a hidden state.
///
/// Rank 1 is the highest-scoring token. Fails with
/// [`LensError::TokenNotFound`] when the id lies outside the vocabulary.
pub fn rank_of(hidden: &Tensor, projection: &VocabProjection, target_id: u32) -> Result<u32> {
    let logits = projection.logits_vec(hidden)?;
    let order = ascending_argsort(&logits);
    let index = order
        .iter()
        .position(|&ix| ix == target_id as usize)
        .ok_or(LensError::TokenNotFound {
            token_id: target_id,
            vocab_size: logits.len(),
        })?;
    Ok((logits.len() - index) as u32)
}
