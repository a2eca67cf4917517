//! Sequence record: the captured internals of one generation run
//!
//! Holds the token ids/text, per-layer hidden states, attention tensors,
//! attribution maps, and raw activations produced by the model runner,
//! and exposes the analysis entry points that package results into
//! view-data for the rendering layer. The record is immutable after
//! construction; every analysis reads it without mutation.
//!
//! Hidden-state convention: `hidden_states[0]` is the embedding layer and
//! each layer tensor is shaped `(position, hidden_dim)`, one position per
//! token except the last (a position's state predicts the next token).

use std::fmt;

use candle_core::{IndexOp, Tensor};
use tracing::debug;

use crate::activations::{reshape_activations, LayerSelection};
use crate::attention::AttentionStack;
use crate::errors::{LensError, Result};
use crate::nmf::{factorize, NmfResult, DEFAULT_MAX_ITER};
use crate::projection::VocabProjection;
use crate::ranking::{layer_topk, rank_of};
use crate::saliency::{normalize, AttributionMap};
use crate::view::{
    format_token, AttentionView, FactorView, LayerPrediction, RankingView, RankingWatchView,
    SaliencyView, TokenKind, TokenRecord, TokenSeriesView,
};

type TokenDecoder = Box<dyn Fn(u32) -> String + Send + Sync>;

/// Everything captured while the model generated one sequence.
pub struct SequenceRecord {
    token_ids: Vec<u32>,
    tokens: Vec<String>,
    n_input_tokens: usize,
    hidden_states: Vec<Tensor>,
    projection: VocabProjection,
    attention: AttentionStack,
    attributions: AttributionMap,
    activations: Option<Tensor>,
    collected_layer_ids: Option<Vec<usize>>,
    decoder: Option<TokenDecoder>,
}

impl fmt::Debug for SequenceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceRecord")
            .field("tokens", &self.tokens.len())
            .field("n_input_tokens", &self.n_input_tokens)
            .field("n_layers", &self.hidden_states.len())
            .field("has_activations", &self.activations.is_some())
            .finish()
    }
}

impl SequenceRecord {
    /// Build a record from the model runner's captures.
    ///
    /// `hidden_states` must include the embedding layer at index 0.
    pub fn new(
        token_ids: Vec<u32>,
        tokens: Vec<String>,
        n_input_tokens: usize,
        hidden_states: Vec<Tensor>,
        projection: VocabProjection,
    ) -> Result<Self> {
        if token_ids.len() != tokens.len() {
            return Err(LensError::InvalidRecord(format!(
                "{} token ids but {} token strings",
                token_ids.len(),
                tokens.len()
            )));
        }
        if n_input_tokens > tokens.len() {
            return Err(LensError::InvalidRecord(format!(
                "n_input_tokens ({n_input_tokens}) exceeds the sequence length ({})",
                tokens.len()
            )));
        }
        Ok(Self {
            token_ids,
            tokens,
            n_input_tokens,
            hidden_states,
            projection,
            attention: AttentionStack::default(),
            attributions: AttributionMap::new(),
            activations: None,
            collected_layer_ids: None,
            decoder: None,
        })
    }

    /// Attach per-layer attention tensors, each `(batch, heads, seq, seq)`.
    pub fn with_attention(mut self, layers: Vec<Tensor>) -> Self {
        self.attention = AttentionStack::new(layers);
        self
    }

    /// Attach precomputed attribution maps.
    pub fn with_attributions(mut self, attributions: AttributionMap) -> Self {
        self.attributions = attributions;
        self
    }

    /// Attach the raw activation tensor `(batch, layer, neuron, position)`
    /// and, when only some layers were collected, their layer ids.
    pub fn with_activations(
        mut self,
        activations: Tensor,
        collected_layer_ids: Option<Vec<usize>>,
    ) -> Self {
        self.activations = Some(activations);
        self.collected_layer_ids = collected_layer_ids;
        self
    }

    /// Attach a vocabulary decoder used to render predicted token ids.
    ///
    /// Without one, predictions outside the recorded sequence render as
    /// `<token_id>`.
    pub fn with_decoder(mut self, decoder: impl Fn(u32) -> String + Send + Sync + 'static) -> Self {
        self.decoder = Some(Box::new(decoder));
        self
    }

    // --- Accessors ---

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn token_ids(&self) -> &[u32] {
        &self.token_ids
    }

    pub fn n_input_tokens(&self) -> usize {
        self.n_input_tokens
    }

    pub fn n_output_tokens(&self) -> usize {
        self.tokens.len() - self.n_input_tokens
    }

    /// Number of recorded layers, embedding included.
    pub fn n_layers(&self) -> usize {
        self.hidden_states.len()
    }

    pub fn projection(&self) -> &VocabProjection {
        &self.projection
    }

    pub fn attributions(&self) -> &AttributionMap {
        &self.attributions
    }

    fn decode_token(&self, token_id: u32) -> String {
        match &self.decoder {
            Some(decode) => decode(token_id),
            None => format!("<{token_id}>"),
        }
    }

    fn token_kind(&self, idx: usize) -> TokenKind {
        if idx < self.n_input_tokens {
            TokenKind::Input
        } else {
            TokenKind::Output
        }
    }

    fn seq_positions(&self) -> Result<usize> {
        let first = self.hidden_states.first().ok_or_else(|| {
            LensError::InvalidRecord("no hidden states were recorded".to_string())
        })?;
        Ok(first.dim(0)?)
    }

    fn require_layers(&self) -> Result<()> {
        if self.hidden_states.len() < 2 {
            return Err(LensError::InvalidRecord(format!(
                "layer analyses need the embedding layer plus at least one \
                 transformer layer; {} recorded",
                self.hidden_states.len()
            )));
        }
        Ok(())
    }

    fn require_input_tokens(&self) -> Result<()> {
        if self.n_input_tokens == 0 {
            return Err(LensError::InvalidRecord(
                "the record has no input tokens".to_string(),
            ));
        }
        Ok(())
    }

    /// A position must name a generated token:
    /// `n_input_tokens <= position <= tokens.len() - 1`.
    fn validate_generated_position(&self, position: usize) -> Result<()> {
        let max = self.tokens.len().saturating_sub(1);
        if position < self.n_input_tokens || position > max {
            return Err(LensError::InvalidPosition {
                position,
                min: self.n_input_tokens,
                max,
            });
        }
        Ok(())
    }

    // --- Analyses ---

    /// The plain token-sequence explorable.
    pub fn explorable_view(&self) -> TokenSeriesView {
        let tokens = self
            .tokens
            .iter()
            .zip(&self.token_ids)
            .enumerate()
            .map(|(idx, (token, &token_id))| TokenRecord {
                token: token.clone(),
                token_id,
                kind: self.token_kind(idx),
                position: None,
                value: None,
            })
            .collect();
        TokenSeriesView { tokens }
    }

    /// Saliency explorable for the first generated token, with the full
    /// per-position attribution vectors attached.
    pub fn saliency_view(&self, method: &str) -> Result<SaliencyView> {
        let scores = self.attributions.attribution_for(method, 0)?;
        let tokens = self
            .tokens
            .iter()
            .zip(&self.token_ids)
            .enumerate()
            .map(|(idx, (token, &token_id))| TokenRecord {
                token: token.clone(),
                token_id,
                kind: self.token_kind(idx),
                position: Some(idx),
                value: Some(scores.get(idx).copied().unwrap_or(0.0).to_string()),
            })
            .collect();
        let attributions = self.attributions.get(method)?.to_vec();
        Ok(SaliencyView {
            tokens,
            attributions,
        })
    }

    /// Token records highlighting the importance of each source token for
    /// the generated token at `position`.
    pub fn position_view(&self, position: usize, method: &str) -> Result<TokenSeriesView> {
        self.validate_generated_position(position)?;
        let offset = position - self.n_input_tokens;
        let scores = self.attributions.attribution_for(method, offset)?;

        let tokens = self
            .tokens
            .iter()
            .zip(&self.token_ids)
            .enumerate()
            .map(|(idx, (token, &token_id))| TokenRecord {
                token: token.clone(),
                token_id,
                kind: self.token_kind(idx),
                position: None,
                // Tokens at or after the analyzed position carry no score.
                value: Some(scores.get(idx).copied().unwrap_or(-1.0).to_string()),
            })
            .collect();
        Ok(TokenSeriesView { tokens })
    }

    /// Percentage contribution of each source token to the generated
    /// token at `position`.
    pub fn normalized_attribution(&self, position: usize, method: &str) -> Result<Vec<f32>> {
        self.validate_generated_position(position)?;
        let offset = position - self.n_input_tokens;
        let scores = self.attributions.attribution_for(method, offset)?;
        Ok(normalize(scores))
    }

    /// Top-k predicted tokens at each layer for one sequence position.
    ///
    /// `layer` restricts the analysis to a single layer; `None` covers
    /// every layer except the embedding. Position 0 has no preceding
    /// hidden state and is rejected.
    pub fn layer_predictions(
        &self,
        position: usize,
        topk: usize,
        layer: Option<usize>,
    ) -> Result<Vec<Vec<LayerPrediction>>> {
        self.require_layers()?;
        let seq_len = self.seq_positions()?;
        if position == 0 || position > seq_len {
            return Err(LensError::InvalidPosition {
                position,
                min: 1,
                max: seq_len,
            });
        }

        let layers: Vec<usize> = match layer {
            Some(l) => {
                if l + 1 >= self.hidden_states.len() {
                    return Err(LensError::InvalidLayerRange(format!(
                        "layer {l} is out of range; rankable layers are 0 to {}",
                        self.hidden_states.len() - 2
                    )));
                }
                vec![l]
            }
            None => (0..self.hidden_states.len() - 1).collect(),
        };

        let mut data = Vec::with_capacity(layers.len());
        for &l in &layers {
            let hidden = self.hidden_states[l + 1].i(position - 1)?;
            let predictions = layer_topk(&hidden, &self.projection, topk)?;
            let layer_data = predictions
                .into_iter()
                .enumerate()
                .map(|(idx, (token_id, prob))| LayerPrediction {
                    token: self.decode_token(token_id),
                    prob: prob.to_string(),
                    ranking: idx + 1,
                    layer: l,
                })
                .collect();
            data.push(layer_data);
        }
        Ok(data)
    }

    /// Rank of each realized output token at every layer.
    ///
    /// Columns start at the final input position (the state that produced
    /// the first output token); rows are layers 1 onward. Cells are
    /// written by explicit (layer, column) index, so the result is
    /// deterministic however the loop is scheduled.
    pub fn rankings(&self) -> Result<RankingView> {
        self.require_layers()?;
        self.require_input_tokens()?;
        let seq_len = self.seq_positions()?;
        if seq_len + 1 != self.tokens.len() {
            return Err(LensError::InvalidRecord(format!(
                "hidden states cover {seq_len} positions for a {}-token sequence; \
                 expected one position per token except the last",
                self.tokens.len()
            )));
        }

        let n_layers = self.hidden_states.len() - 1;
        let n_columns = seq_len - self.n_input_tokens + 1;
        debug!(n_layers, n_columns, "computing ranking trajectory");

        let mut rankings = vec![vec![0u32; n_columns]; n_layers];
        let mut predicted = vec![vec![String::new(); n_columns]; n_layers];
        for (i, level) in self.hidden_states.iter().skip(1).enumerate() {
            for j in 0..n_columns {
                let hidden = level.i(self.n_input_tokens - 1 + j)?;
                let target_id = self.token_ids[self.n_input_tokens + j];
                rankings[i][j] = rank_of(&hidden, &self.projection, target_id)?;
                predicted[i][j] = format_token(&self.tokens[self.n_input_tokens + j]);
            }
        }

        let input_tokens = self.tokens[self.n_input_tokens - 1..self.tokens.len() - 1]
            .iter()
            .map(|t| format_token(t))
            .collect();
        let output_tokens = self.tokens[self.n_input_tokens..]
            .iter()
            .map(|t| format_token(t))
            .collect();
        Ok(RankingView {
            input_tokens,
            output_tokens,
            rankings,
            predicted_tokens: predicted,
        })
    }

    /// Ranks of a watched set of candidate token ids at one position.
    ///
    /// `position: None` reads the last recorded position; `Some(p)` reads
    /// the hidden state that predicts the token at `p` (i.e. position
    /// `p - 1`).
    pub fn rankings_watch(
        &self,
        watch: &[u32],
        position: Option<usize>,
    ) -> Result<RankingWatchView> {
        self.require_layers()?;
        let seq_len = self.seq_positions()?;
        if seq_len == 0 {
            return Err(LensError::InvalidRecord(
                "hidden states cover no positions".to_string(),
            ));
        }
        let row = match position {
            None => seq_len - 1,
            Some(p) => {
                if p == 0 || p > seq_len {
                    return Err(LensError::InvalidPosition {
                        position: p,
                        min: 1,
                        max: seq_len,
                    });
                }
                p - 1
            }
        };

        let n_layers = self.hidden_states.len() - 1;
        debug!(n_layers, watched = watch.len(), row, "computing watch rankings");

        let mut rankings = vec![vec![0u32; watch.len()]; n_layers];
        for (i, level) in self.hidden_states.iter().skip(1).enumerate() {
            let hidden = level.i(row)?;
            for (j, &token_id) in watch.iter().enumerate() {
                rankings[i][j] = rank_of(&hidden, &self.projection, token_id)?;
            }
        }

        let input_tokens = self.tokens.iter().map(|t| format_token(t)).collect();
        let output_tokens = watch
            .iter()
            .map(|&id| format_token(&self.decode_token(id)))
            .collect();
        Ok(RankingWatchView {
            input_tokens,
            output_tokens,
            rankings,
        })
    }

    /// Head-averaged attention out of the final input position at one
    /// layer. The layer is validated against the recorded tensors.
    pub fn attention_view(&self, layer: usize) -> Result<AttentionView> {
        self.require_input_tokens()?;
        let rows = self.attention.rows(layer)?;
        let anchor = self.n_input_tokens - 1;
        let row = rows.get(anchor).ok_or(LensError::InvalidPosition {
            position: anchor,
            min: 0,
            max: rows.len().saturating_sub(1),
        })?;

        let tokens = self
            .tokens
            .iter()
            .zip(&self.token_ids)
            .enumerate()
            .map(|(idx, (token, &token_id))| TokenRecord {
                token: token.clone(),
                token_id,
                kind: self.token_kind(idx),
                position: Some(idx),
                value: Some(row.get(idx).copied().unwrap_or(0.0).to_string()),
            })
            .collect();
        Ok(AttentionView {
            tokens,
            attributions: rows.clone(),
        })
    }

    /// Factorize the collected neuron activations.
    pub fn nmf(
        &self,
        selection: &LayerSelection,
        n_components: usize,
        seed: u64,
    ) -> Result<NmfResult> {
        self.nmf_with_iterations(selection, n_components, seed, DEFAULT_MAX_ITER)
    }

    /// Factorize with an explicit iteration cap.
    pub fn nmf_with_iterations(
        &self,
        selection: &LayerSelection,
        n_components: usize,
        seed: u64,
        max_iter: usize,
    ) -> Result<NmfResult> {
        let activations = self
            .activations
            .as_ref()
            .ok_or(LensError::EmptyActivations)?;
        let matrix =
            reshape_activations(activations, selection, self.collected_layer_ids.as_deref())?;
        debug!(
            neurons = matrix.dim().0,
            positions = matrix.dim().1,
            n_components,
            "factorizing activations"
        );
        factorize(&matrix, n_components, seed, max_iter)
    }

    /// Package a factorization over this record's tokens.
    pub fn factor_view(&self, result: &NmfResult) -> FactorView {
        result.factor_view(&self.tokens, &self.token_ids, self.n_input_tokens)
    }
}
