//! Vocabulary projection of hidden states
//!
//! Projects a hidden-state vector through the trained output-head weights
//! to a distribution over the vocabulary. The compute device is bound once
//! at construction from the weights tensor; hidden states are moved there
//! explicitly instead of branching on an ambient device flag.

use candle_core::{DType, Device, Tensor};

use crate::errors::Result;

/// The output-head projection matrix, shape `(vocab, hidden)`.
#[derive(Debug, Clone)]
pub struct VocabProjection {
    weights: Tensor,
    device: Device,
}

impl VocabProjection {
    /// Wrap the output-head weights. Fails if the tensor is not 2-D.
    pub fn new(weights: Tensor) -> Result<Self> {
        let _ = weights.dims2()?;
        let device = weights.device().clone();
        Ok(Self { weights, device })
    }

    /// Number of vocabulary entries.
    pub fn vocab_size(&self) -> usize {
        self.weights.dims()[0]
    }

    /// Hidden dimension the projection expects.
    pub fn hidden_size(&self) -> usize {
        self.weights.dims()[1]
    }

    /// Device the projection runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Project a hidden state `(hidden,)` to logits `(vocab,)`.
    pub fn project(&self, hidden: &Tensor) -> Result<Tensor> {
        let hidden = hidden.to_device(&self.device)?.to_dtype(DType::F32)?;
        let logits = hidden
            .unsqueeze(0)?
            .matmul(&self.weights.to_dtype(DType::F32)?.t()?)?
            .squeeze(0)?;
        Ok(logits)
    }

    /// Project and extract logits as a host vector.
    pub fn logits_vec(&self, hidden: &Tensor) -> Result<Vec<f32>> {
        Ok(self.project(hidden)?.to_vec1()?)
    }

    /// Project, softmax, and extract probabilities as a host vector.
    pub fn probabilities(&self, hidden: &Tensor) -> Result<Vec<f32>> {
        let logits = self.project(hidden)?;
        let probs = candle_nn::ops::softmax_last_dim(&logits)?;
        Ok(probs.to_vec1()?)
    }
}
