//! Non-negative matrix factorization of neuron activations
//!
//! Decomposes the reshaped activation matrix into a small number of
//! additive components via multiplicative updates, seeded explicitly for
//! reproducibility. The fit runs to convergence or an iteration cap;
//! hitting the cap is an accuracy trade-off, not an error.

use ndarray::{Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::errors::Result;
use crate::view::{FactorView, TokenKind, TokenRecord};

/// Iteration cap used when the caller does not override it.
pub const DEFAULT_MAX_ITER: usize = 500;

/// Relative change in reconstruction error below which the fit stops.
const CONVERGENCE_TOL: f32 = 1e-4;

/// Keeps multiplicative-update denominators away from zero.
const EPS: f32 = 1e-12;

/// Fitted factorization state.
#[derive(Debug, Clone)]
pub struct NmfModel {
    /// Per-position component weights, shape `(position_and_batch, component)`.
    pub weights: Array2<f32>,
    /// Per-neuron component basis, shape `(component, neuron_and_layer)`.
    pub basis: Array2<f32>,
    /// Iterations actually run.
    pub n_iter: usize,
    /// Frobenius reconstruction error at the final iteration.
    pub reconstruction_err: f32,
}

/// Result of factorizing one activation matrix.
#[derive(Debug, Clone)]
pub struct NmfResult {
    /// Component activation curves, shape
    /// `(merged_layer_group = 1, component, position_and_batch)`.
    pub components: Array3<f32>,
    /// The fitted model that produced the curves.
    pub model: NmfModel,
}

/// Factorize a `(neuron_and_layer, position_and_batch)` matrix into
/// `n_components` additive components.
///
/// Negative entries are clamped to zero before fitting (activation
/// functions such as GELU emit small negatives that are semantically
/// noise), and `n_components` is capped at the number of positions so the
/// factorization stays well-posed. The same `seed` always yields the same
/// decomposition.
pub fn factorize(
    matrix: &Array2<f32>,
    n_components: usize,
    seed: u64,
    max_iter: usize,
) -> Result<NmfResult> {
    // Samples-first orientation: (position, neuron), negatives clamped off.
    let x = matrix.t().mapv(|v| v.max(0.0));
    let (n_positions, n_neurons) = x.dim();
    let k = n_components.min(n_positions);

    let mean = x.mean().unwrap_or(0.0);
    let scale = if k == 0 {
        0.0
    } else {
        (mean / k as f32).sqrt()
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let mut w = Array2::from_shape_fn((n_positions, k), |_| rng.gen::<f32>() * scale);
    let mut h = Array2::from_shape_fn((k, n_neurons), |_| rng.gen::<f32>() * scale);

    let err_init = frobenius(&x);
    let mut previous_err = err_init;
    let mut err = err_init;
    let mut n_iter = 0;

    for iter in 1..=max_iter {
        // H <- H * (W'X) / (W'WH), then W <- W * (XH') / (WHH')
        let numer = w.t().dot(&x);
        let denom = w.t().dot(&w).dot(&h) + EPS;
        h = h * numer / denom;

        let numer = x.dot(&h.t());
        let denom = w.dot(&h).dot(&h.t()) + EPS;
        w = w * numer / denom;

        n_iter = iter;
        if iter % 10 == 0 {
            err = frobenius(&(&x - &w.dot(&h)));
            if (previous_err - err).abs() <= CONVERGENCE_TOL * err_init.max(EPS) {
                break;
            }
            previous_err = err;
        }
    }
    if n_iter % 10 != 0 {
        err = frobenius(&(&x - &w.dot(&h)));
    }
    debug!(
        n_iter,
        reconstruction_err = err,
        n_components = k,
        "nmf fit finished"
    );

    // Component curves across positions, wrapped in the single merged
    // layer group.
    let components = w.t().to_owned().insert_axis(Axis(0));

    Ok(NmfResult {
        components,
        model: NmfModel {
            weights: w,
            basis: h,
            n_iter,
            reconstruction_err: err,
        },
    })
}

fn frobenius(matrix: &Array2<f32>) -> f32 {
    matrix.iter().map(|v| v * v).sum::<f32>().sqrt()
}

impl NmfResult {
    /// Number of fitted components.
    pub fn n_components(&self) -> usize {
        self.components.shape()[1]
    }

    /// Package the component curves as renderable factor data.
    ///
    /// When the sequence mixes input and generated tokens, each
    /// component's value at the boundary position is duplicated so every
    /// token carries a value: for inputs the activation reads as a
    /// response, for outputs as a cause. Presentation only; the fitted
    /// components are untouched.
    pub fn factor_view(
        &self,
        tokens: &[String],
        token_ids: &[u32],
        n_input_tokens: usize,
    ) -> FactorView {
        let records = tokens
            .iter()
            .zip(token_ids)
            .enumerate()
            .map(|(idx, (token, &token_id))| TokenRecord {
                token: token.clone(),
                token_id,
                kind: if idx < n_input_tokens {
                    TokenKind::Input
                } else {
                    TokenKind::Output
                },
                position: Some(idx),
                value: None,
            })
            .collect();

        let group = self.components.index_axis(Axis(0), 0);
        let duplicate_boundary = n_input_tokens > 0 && tokens.len() != n_input_tokens;
        let factors: Vec<Vec<f32>> = group
            .outer_iter()
            .map(|component| {
                let curve = component.to_vec();
                if duplicate_boundary && n_input_tokens <= curve.len() {
                    let mut padded = curve[..n_input_tokens].to_vec();
                    padded.extend_from_slice(&curve[n_input_tokens - 1..]);
                    padded
                } else {
                    curve
                }
            })
            .collect();

        FactorView {
            tokens: records,
            factors: vec![factors],
        }
    }
}
