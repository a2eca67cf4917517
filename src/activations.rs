//! Activation tensor reshaping for factorization
//!
//! Normalizes the raw 4-D activation tensor `(batch, layer, neuron,
//! position)` into the 2-D matrix `(neuron_and_layer, position_and_batch)`
//! that the factorizer consumes: requested layer rows are gathered,
//! concatenated along the neuron axis, transposed neuron-first, and the
//! remaining batch/position axes flattened into one trailing axis.

use candle_core::{DType, IndexOp, Tensor};
use ndarray::Array2;

use crate::errors::{LensError, Result};

/// Which layers of the recorded activations to factorize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSelection {
    /// All recorded layers, in recorded order.
    All,
    /// A contiguous half-open range `[from, to)` of layer ids.
    Range { from: usize, to: usize },
    /// An explicit, possibly discontinuous list of layer ids.
    Ids(Vec<usize>),
}

/// Resolve a selection against the recorded layer ids and reshape.
///
/// `collected_layer_ids` names the layer id stored in each row of the
/// layer axis; `None` means rows 0..n were collected in order. Fails with
/// [`LensError::InvalidLayerRange`] for malformed input or selections
/// naming layers without recorded activations.
pub fn reshape_activations(
    activations: &Tensor,
    selection: &LayerSelection,
    collected_layer_ids: Option<&[usize]>,
) -> Result<Array2<f32>> {
    let dims = activations.dims();
    if dims.len() != 4 {
        return Err(LensError::InvalidLayerRange(format!(
            "activations should have four dimensions (batch, layers, neurons, positions); \
             supplied shape: {dims:?}"
        )));
    }
    let (batch, n_rows, n_neurons, n_positions) = (dims[0], dims[1], dims[2], dims[3]);

    let collected: Vec<usize> = match collected_layer_ids {
        Some(ids) => ids.to_vec(),
        None => (0..n_rows).collect(),
    };

    let layer_ids = resolve_layer_ids(selection, &collected)?;

    // Map each requested layer id to its storage row.
    let mut rows = Vec::with_capacity(layer_ids.len());
    for id in &layer_ids {
        let row = collected.iter().position(|c| c == id).ok_or_else(|| {
            LensError::InvalidLayerRange(format!("layer {id} has no recorded activations"))
        })?;
        rows.push(activations.i((.., row, .., ..))?);
    }

    // Merge the layer axis into the neuron axis, then put neurons first
    // and flatten (batch, position) into the trailing axis.
    let merged = Tensor::cat(&rows, 1)?; // (batch, layers*neurons, position)
    let merged = merged.transpose(0, 1)?.contiguous()?; // (layers*neurons, batch, position)
    let n_merged = layer_ids.len() * n_neurons;
    let merged = merged.reshape((n_merged, batch * n_positions))?;

    let data: Vec<f32> = merged.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
    Ok(Array2::from_shape_vec(
        (n_merged, batch * n_positions),
        data,
    )?)
}

/// Expand a selection into concrete layer ids, validated against the
/// recorded ones.
fn resolve_layer_ids(selection: &LayerSelection, collected: &[usize]) -> Result<Vec<usize>> {
    let layer_ids: Vec<usize> = match selection {
        LayerSelection::All => collected.to_vec(),
        LayerSelection::Range { from, to } => {
            if from == to {
                return Err(LensError::InvalidLayerRange(format!(
                    "from_layer ({from}) and to_layer ({to}) cannot be the same value; \
                     they must be apart by at least one to allow for a layer of activations"
                )));
            }
            if from > to {
                return Err(LensError::InvalidLayerRange(format!(
                    "from_layer ({from}) cannot be larger than to_layer ({to})"
                )));
            }
            (*from..*to).collect()
        }
        LayerSelection::Ids(ids) => ids.clone(),
    };
    if layer_ids.is_empty() {
        return Err(LensError::InvalidLayerRange(
            "the layer selection resolves to no layers".to_string(),
        ));
    }

    let missing: Vec<usize> = layer_ids
        .iter()
        .copied()
        .filter(|id| !collected.contains(id))
        .collect();
    if !missing.is_empty() {
        let mut available = collected.to_vec();
        available.sort_unstable();
        return Err(LensError::InvalidLayerRange(format!(
            "layers {missing:?} in the requested selection have no recorded activations; \
             layers with recorded activations are: {available:?}"
        )));
    }

    Ok(layer_ids)
}
