//! Integration tests for lmlens-rs
//!
//! Builds a small synthetic generation record (identity output head, so
//! logits mirror hidden states) and drives every analysis entry point
//! through the public API.

use candle_core::{Device, Tensor};
use lmlens_rs::{
    AttributionMap, LayerSelection, LensError, SequenceRecord, TokenKind, VocabProjection,
};
use std::io::Write;
use tempfile::NamedTempFile;

const VOCAB: usize = 6;

/// Identity output head: logits equal the hidden vector.
fn identity_projection() -> VocabProjection {
    let mut data = vec![0.0f32; VOCAB * VOCAB];
    for i in 0..VOCAB {
        data[i * VOCAB + i] = 1.0;
    }
    let weights = Tensor::from_vec(data, (VOCAB, VOCAB), &Device::Cpu).unwrap();
    VocabProjection::new(weights).unwrap()
}

/// One layer tensor `(seq, hidden)` with a single peak per position.
fn peaked_layer(seq: usize, peaks: &[(usize, f32)]) -> Tensor {
    let mut data = vec![0.0f32; seq * VOCAB];
    for (position, &(vocab_ix, value)) in peaks.iter().enumerate() {
        data[position * VOCAB + vocab_ix] = value;
    }
    Tensor::from_vec(data, (seq, VOCAB), &Device::Cpu).unwrap()
}

/// Six tokens, three of them input. Hidden states cover 5 positions
/// (embedding + 3 layers); the final layer always predicts the realized
/// next token, earlier layers are stuck on token 0.
fn sample_record() -> SequenceRecord {
    let token_ids: Vec<u32> = (0..6).collect();
    let tokens: Vec<String> = ["The", " cat", " sat", " on", " the", " mat"]
        .iter()
        .map(|s| (*s).to_string())
        .collect();
    let seq = 5;

    let embedding = peaked_layer(seq, &[(0, 0.1), (0, 0.1), (0, 0.1), (0, 0.1), (0, 0.1)]);
    let stuck = &[(0, 1.0), (0, 1.0), (0, 1.0), (0, 1.0), (0, 1.0)];
    // Position p predicts token p + 1.
    let confident = &[(1, 5.0), (2, 5.0), (3, 5.0), (4, 5.0), (5, 5.0)];
    let hidden_states = vec![
        embedding,
        peaked_layer(seq, stuck),
        peaked_layer(seq, stuck),
        peaked_layer(seq, confident),
    ];

    let decode_table = tokens.clone();
    SequenceRecord::new(token_ids, tokens, 3, hidden_states, identity_projection())
        .unwrap()
        .with_decoder(move |id| {
            decode_table
                .get(id as usize)
                .cloned()
                .unwrap_or_else(|| format!("<{id}>"))
        })
}

fn sample_attributions() -> AttributionMap {
    let mut map = AttributionMap::new();
    map.insert(
        "grad_x_input",
        vec![
            vec![0.2, 0.5, 0.3],
            vec![0.1, 0.1, 0.4, 0.4],
            vec![0.0, 0.0, 0.0, 0.0, 0.0],
        ],
    );
    map
}

#[test]
fn test_layer_topk_scenario() {
    // Layer 2 at position 4 with k=3: exactly 3 tokens, descending, and
    // the probabilities stay within a distribution.
    let record = sample_record();
    let data = record.layer_predictions(4, 3, Some(2)).unwrap();
    assert_eq!(data.len(), 1);
    let layer = &data[0];
    assert_eq!(layer.len(), 3);

    let probs: Vec<f32> = layer.iter().map(|p| p.prob.parse().unwrap()).collect();
    assert!(probs[0] > probs[1] && probs[1] >= probs[2]);
    assert!(probs.iter().sum::<f32>() <= 1.0 + 1e-4);

    // Position 4 is predicted from the hidden state at index 3, which
    // peaks on token 4 (" the").
    assert_eq!(layer[0].token, " the");
    assert_eq!(layer[0].ranking, 1);
    assert_eq!(layer[0].layer, 2);
}

#[test]
fn test_layer_predictions_rejects_position_zero() {
    let record = sample_record();
    let err = record.layer_predictions(0, 3, None).unwrap_err();
    assert!(matches!(err, LensError::InvalidPosition { position: 0, .. }));
}

#[test]
fn test_layer_predictions_rejects_unknown_layer() {
    let record = sample_record();
    let err = record.layer_predictions(4, 3, Some(9)).unwrap_err();
    assert!(matches!(err, LensError::InvalidLayerRange(_)));
}

#[test]
fn test_rankings_trajectory() {
    let record = sample_record();
    let view = record.rankings().unwrap();

    // 3 layers, 3 output columns.
    assert_eq!(view.rankings.len(), 3);
    assert_eq!(view.rankings[0].len(), 3);
    assert_eq!(view.input_tokens, vec![" sat", " on", " the"]);
    assert_eq!(view.output_tokens, vec![" on", " the", " mat"]);

    // The final layer always ranks the realized token first.
    assert_eq!(view.rankings[2], vec![1, 1, 1]);
    // Earlier layers are stuck on token 0; ties resolve by index order,
    // so later vocabulary ids rank closer to the top.
    assert_eq!(view.rankings[0], vec![4, 3, 2]);
    assert_eq!(view.rankings[1], vec![4, 3, 2]);
    assert_eq!(view.predicted_tokens[2], vec![" on", " the", " mat"]);
}

#[test]
fn test_rankings_watch_at_position() {
    let record = sample_record();
    let view = record.rankings_watch(&[0], Some(1)).unwrap();
    assert_eq!(view.output_tokens, vec!["The"]);
    // Token 0 is the stuck layers' favorite but the confident layer
    // puts token 1 on top, dropping token 0 to the bottom of the ties.
    assert_eq!(view.rankings, vec![vec![1], vec![1], vec![6]]);
}

#[test]
fn test_rankings_watch_defaults_to_last_position() {
    let record = sample_record();
    let view = record.rankings_watch(&[5, 1], None).unwrap();
    assert_eq!(view.rankings.len(), 3);
    // Final layer at the last position peaks on token 5.
    assert_eq!(view.rankings[2][0], 1);
}

#[test]
fn test_rankings_watch_unknown_token_is_fatal() {
    let record = sample_record();
    let err = record.rankings_watch(&[99], None).unwrap_err();
    assert!(matches!(err, LensError::TokenNotFound { token_id: 99, .. }));
}

#[test]
fn test_explorable_token_kinds() {
    let record = sample_record();
    let view = record.explorable_view();
    assert_eq!(view.tokens.len(), 6);
    assert_eq!(view.tokens[2].kind, TokenKind::Input);
    assert_eq!(view.tokens[3].kind, TokenKind::Output);
    assert!(view.tokens[0].value.is_none());
}

#[test]
fn test_saliency_and_position_views() {
    let record = sample_record().with_attributions(sample_attributions());

    let saliency = record.saliency_view("grad_x_input").unwrap();
    assert_eq!(saliency.attributions.len(), 3);
    assert_eq!(saliency.tokens[1].value.as_deref(), Some("0.5"));
    // Positions past the first generated token carry no score yet.
    assert_eq!(saliency.tokens[4].value.as_deref(), Some("0"));

    let position = record.position_view(4, "grad_x_input").unwrap();
    assert_eq!(position.tokens[3].value.as_deref(), Some("0.4"));
    assert_eq!(position.tokens[5].value.as_deref(), Some("-1"));
}

#[test]
fn test_position_view_range_validation() {
    let record = sample_record().with_attributions(sample_attributions());
    let err = record.position_view(2, "grad_x_input").unwrap_err();
    match err {
        LensError::InvalidPosition { position, min, max } => {
            assert_eq!((position, min, max), (2, 3, 5));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(record.position_view(6, "grad_x_input").is_err());
}

#[test]
fn test_unknown_attribution_method() {
    let record = sample_record().with_attributions(sample_attributions());
    let err = record.saliency_view("integrated_gradients").unwrap_err();
    assert!(matches!(err, LensError::UnknownAttributionMethod { .. }));
}

#[test]
fn test_normalized_attribution() {
    let record = sample_record().with_attributions(sample_attributions());

    let normalized = record.normalized_attribution(3, "grad_x_input").unwrap();
    assert!((normalized.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    assert!((normalized[1] - 0.5).abs() < 1e-6);

    // The all-zero vector at offset 2 normalizes to zeros.
    let zeros = record.normalized_attribution(5, "grad_x_input").unwrap();
    assert!(zeros.iter().all(|v| *v == 0.0));
}

#[test]
fn test_attention_view_validates_layer() {
    let seq = 6;
    let mut data = vec![0.0f32; seq * seq];
    for i in 0..seq {
        for j in 0..=i {
            data[i * seq + j] = 1.0 / (i + 1) as f32;
        }
    }
    let attn = Tensor::from_vec(data, (1, 1, seq, seq), &Device::Cpu).unwrap();
    let record = sample_record().with_attention(vec![attn]);

    let view = record.attention_view(0).unwrap();
    assert_eq!(view.tokens.len(), 6);
    let first: f32 = view.tokens[0].value.as_deref().unwrap().parse().unwrap();
    assert!((first - 1.0 / 3.0).abs() < 1e-6);
    assert_eq!(view.attributions.len(), 6);

    let err = record.attention_view(5).unwrap_err();
    assert!(matches!(err, LensError::InvalidLayerRange(_)));
}

#[test]
fn test_nmf_requires_activations() {
    let record = sample_record();
    let err = record.nmf(&LayerSelection::All, 3, 0).unwrap_err();
    assert!(matches!(err, LensError::EmptyActivations));
}

#[test]
fn test_nmf_through_record() {
    // (batch, layer, neuron, position): 3 layers of 4 neurons over the
    // 5 hidden positions.
    let data: Vec<f32> = (0..60).map(|i| (i % 7) as f32).collect();
    let activations = Tensor::from_vec(data, (1, 3, 4, 5), &Device::Cpu).unwrap();
    let record = sample_record().with_activations(activations, None);

    let result = record.nmf(&LayerSelection::All, 2, 0).unwrap();
    assert_eq!(result.components.shape(), &[1, 2, 5]);
    assert!(result.components.iter().all(|v| *v >= 0.0));

    // Requesting more components than positions caps silently.
    let capped = record.nmf(&LayerSelection::All, 64, 0).unwrap();
    assert_eq!(capped.n_components(), 5);

    // The factor view duplicates the input/output boundary value so all
    // 6 tokens carry one value.
    let view = record.factor_view(&result);
    assert_eq!(view.factors.len(), 1);
    assert_eq!(view.factors[0].len(), 2);
    for component in &view.factors[0] {
        assert_eq!(component.len(), 6);
        assert_eq!(component[2], component[3]);
    }
}

#[test]
fn test_nmf_rejects_bad_layer_range() {
    let activations = Tensor::zeros((1, 3, 4, 5), candle_core::DType::F32, &Device::Cpu).unwrap();
    let record = sample_record().with_activations(activations, None);
    let err = record
        .nmf(&LayerSelection::Range { from: 2, to: 2 }, 2, 0)
        .unwrap_err();
    assert!(matches!(err, LensError::InvalidLayerRange(_)));
}

#[test]
fn test_view_data_serializes_floats_as_strings() {
    let record = sample_record().with_attributions(sample_attributions());
    let predictions = record.layer_predictions(4, 3, None).unwrap();
    let saliency = record.saliency_view("grad_x_input").unwrap();

    // Round-trip through disk, the way a notebook handoff would.
    let mut file = NamedTempFile::new().unwrap();
    let payload = serde_json::json!({
        "predictions": predictions,
        "saliency": saliency,
    });
    write!(file, "{payload}").unwrap();

    let content = std::fs::read_to_string(file.path()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert!(parsed["predictions"][0][0]["prob"].is_string());
    assert!(parsed["saliency"]["tokens"][0]["value"].is_string());
    assert_eq!(parsed["saliency"]["tokens"][0]["type"], "input");
    assert!(parsed["saliency"]["attributions"][0][0].is_number());
}

#[test]
fn test_record_construction_invariants() {
    let err = SequenceRecord::new(
        vec![0, 1],
        vec!["a".to_string()],
        1,
        vec![],
        identity_projection(),
    )
    .unwrap_err();
    assert!(matches!(err, LensError::InvalidRecord(_)));

    let err = SequenceRecord::new(
        vec![0],
        vec!["a".to_string()],
        5,
        vec![],
        identity_projection(),
    )
    .unwrap_err();
    assert!(matches!(err, LensError::InvalidRecord(_)));
}
