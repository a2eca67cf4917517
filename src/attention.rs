//! Head-averaged attention analysis
//!
//! Per-layer attention tensors captured during generation, each shaped
//! `(batch, heads, seq, seq)`. Weights are normalized by head count
//! before any per-position lookup, and every layer access is
//! bounds-checked against what was actually recorded.

use candle_core::{DType, IndexOp, Tensor};

use crate::errors::{LensError, Result};

/// The attention tensors for one generation run, one per layer.
#[derive(Debug, Clone, Default)]
pub struct AttentionStack {
    layers: Vec<Tensor>,
}

impl AttentionStack {
    pub fn new(layers: Vec<Tensor>) -> Self {
        Self { layers }
    }

    /// Number of layers recorded.
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The raw attention tensor for one layer.
    pub fn layer(&self, layer: usize) -> Result<&Tensor> {
        self.layers.get(layer).ok_or_else(|| {
            LensError::InvalidLayerRange(format!(
                "attention layer {layer} is out of range; {} layers were recorded",
                self.layers.len()
            ))
        })
    }

    /// Head-averaged attention for one layer: `(batch, seq, seq)`.
    pub fn head_mean(&self, layer: usize) -> Result<Tensor> {
        let pattern = self.layer(layer)?;
        Ok(pattern.to_dtype(DType::F32)?.mean(1)?)
    }

    /// Head-averaged attention rows for the first batch item:
    /// one `(seq,)` row per source position.
    pub fn rows(&self, layer: usize) -> Result<Vec<Vec<f32>>> {
        let mean = self.head_mean(layer)?;
        Ok(mean.i(0)?.to_vec2()?)
    }

    /// Attention out of one position, averaged across heads: `(seq,)`.
    pub fn from_position(&self, layer: usize, position: usize) -> Result<Vec<f32>> {
        let mean = self.head_mean(layer)?;
        let seq = mean.dim(1)?;
        if position >= seq {
            return Err(LensError::InvalidPosition {
                position,
                min: 0,
                max: seq.saturating_sub(1),
            });
        }
        Ok(mean.i((0, position, ..))?.to_vec1()?)
    }
}
