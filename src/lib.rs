// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f32 intentional in ML
#![allow(clippy::cast_possible_truncation)] // usize→u32 in vocab indexing
#![allow(clippy::many_single_char_names)] // w, h, i, j standard in math
#![allow(clippy::similar_names)] // related variables like `numer`/`denom`
#![allow(clippy::module_name_repetitions)] // NmfModel in nmf.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::return_self_not_must_use)] // #[must_use] on Self returns

//! lmlens-rs: interpretability analyses for language model generation
//!
//! Consumes the internals captured during one generation run (hidden
//! states, attention, neuron activations, attributions) and derives
//! ranked, normalized, and factorized representations packaged as
//! JSON-serializable view-data for a rendering frontend.
//!
//! ## Architecture
//!
//! - `sequence`: SequenceRecord aggregate holding one run's captures and
//!   exposing the analysis entry points
//! - `projection`: hidden-state projection through the output head
//! - `ranking`: per-layer top-k predictions and token rank trajectories
//! - `saliency`: input-attribution storage and percentage normalization
//! - `attention`: head-averaged attention lookups with validated layers
//! - `activations`: 4-D activation tensor reshaping with layer selection
//! - `nmf`: seeded non-negative matrix factorization of activations
//! - `view`: the JSON view-data contracts consumed by the renderer
//! - `errors`: the error taxonomy shared by all analyses

pub mod activations;
pub mod attention;
pub mod errors;
pub mod nmf;
pub mod projection;
pub mod ranking;
pub mod saliency;
pub mod sequence;
pub mod view;

pub use activations::{reshape_activations, LayerSelection};
pub use attention::AttentionStack;
pub use errors::{LensError, Result};
pub use nmf::{factorize, NmfModel, NmfResult, DEFAULT_MAX_ITER};
pub use projection::VocabProjection;
pub use ranking::{layer_topk, rank_of};
pub use saliency::{normalize, AttributionMap};
pub use sequence::SequenceRecord;
pub use view::{
    format_token, AttentionView, FactorView, LayerPrediction, RankingView, RankingWatchView,
    SaliencyView, TokenKind, TokenRecord, TokenSeriesView,
};
