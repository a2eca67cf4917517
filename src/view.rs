//! View-data contracts consumed by the rendering layer
//!
//! These records are the only surface the notebook/HTML renderer sees.
//! Fields carrying display floats (`value`, `prob`) are serialized as
//! strings so the consuming side never hits JSON float-precision issues.

use serde::Serialize;

/// Whether a token belongs to the prompt or was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Input,
    Output,
}

/// A single token in a rendered sequence.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRecord {
    pub token: String,
    pub token_id: u32,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Display value (saliency score, attention weight), string-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// One predicted token at one layer.
#[derive(Debug, Clone, Serialize)]
pub struct LayerPrediction {
    pub token: String,
    /// Probability, string-encoded.
    pub prob: String,
    /// 1-based rank within the layer's distribution.
    pub ranking: usize,
    pub layer: usize,
}

/// The plain token sequence explorable.
#[derive(Debug, Clone, Serialize)]
pub struct TokenSeriesView {
    pub tokens: Vec<TokenRecord>,
}

/// Saliency explorable: tokens plus the raw importance vectors, one per
/// generated position.
#[derive(Debug, Clone, Serialize)]
pub struct SaliencyView {
    pub tokens: Vec<TokenRecord>,
    pub attributions: Vec<Vec<f32>>,
}

/// Head-averaged attention out of the final input position.
#[derive(Debug, Clone, Serialize)]
pub struct AttentionView {
    pub tokens: Vec<TokenRecord>,
    pub attributions: Vec<Vec<f32>>,
}

/// Rank of each realized output token at every layer.
///
/// `rankings` is (layer, sequence-column); the label vectors index the
/// columns.
#[derive(Debug, Clone, Serialize)]
pub struct RankingView {
    pub input_tokens: Vec<String>,
    pub output_tokens: Vec<String>,
    pub rankings: Vec<Vec<u32>>,
    pub predicted_tokens: Vec<Vec<String>>,
}

/// Ranks of a watched set of candidate tokens at a single position.
#[derive(Debug, Clone, Serialize)]
pub struct RankingWatchView {
    pub input_tokens: Vec<String>,
    pub output_tokens: Vec<String>,
    pub rankings: Vec<Vec<u32>>,
}

/// Factorized activation components over the token sequence.
///
/// `factors` is (batch, component, position); batch is always 1 here.
#[derive(Debug, Clone, Serialize)]
pub struct FactorView {
    pub tokens: Vec<TokenRecord>,
    pub factors: Vec<Vec<Vec<f32>>>,
}

/// Format a token for display, escaping whitespace characters.
pub fn format_token(token: &str) -> String {
    token
        .replace('\n', "\\n")
        .replace('\t', "\\t")
        .replace('\r', "\\r")
}
