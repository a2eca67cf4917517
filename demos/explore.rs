//! Explore Example: drive every analysis on a synthetic generation run
//!
//! Builds a small sequence record by hand (identity output head, peaked
//! hidden states) and prints the JSON view-data each analysis produces,
//! the same payloads a notebook frontend would render.
//!
//! Usage:
//!   cargo run --example explore
//!   cargo run --example explore -- --top-k 5 --position 4 --components 3

use anyhow::Result;
use candle_core::{Device, Tensor};
use clap::Parser;
use lmlens_rs::{AttributionMap, LayerSelection, SequenceRecord, VocabProjection};

#[derive(Parser)]
#[command(name = "explore")]
#[command(about = "Analysis walkthrough on a synthetic generation record")]
struct Args {
    /// Number of top predictions to show per layer
    #[arg(short, long, default_value = "3")]
    top_k: usize,

    /// Sequence position to trace through the layers
    #[arg(short, long, default_value = "4")]
    position: usize,

    /// Number of NMF components
    #[arg(short, long, default_value = "2")]
    components: usize,

    /// Seed for the factorization
    #[arg(long, default_value = "0")]
    seed: u64,
}

const VOCAB: usize = 6;
const TOKENS: [&str; 6] = ["The", " cat", " sat", " on", " the", " mat"];
const N_INPUT: usize = 3;

fn build_record() -> Result<SequenceRecord> {
    let device = Device::Cpu;

    // Identity output head so logits mirror hidden states.
    let mut weights = vec![0.0f32; VOCAB * VOCAB];
    for i in 0..VOCAB {
        weights[i * VOCAB + i] = 1.0;
    }
    let projection = VocabProjection::new(Tensor::from_vec(weights, (VOCAB, VOCAB), &device)?)?;

    // Embedding plus three layers over 5 positions; confidence in the
    // realized next token grows with depth.
    let seq = TOKENS.len() - 1;
    let mut hidden_states = Vec::new();
    for layer in 0..4 {
        let mut data = vec![0.0f32; seq * VOCAB];
        for position in 0..seq {
            let next_token = position + 1;
            data[position * VOCAB + next_token] = layer as f32 * 1.5;
            data[position * VOCAB] = 1.0;
        }
        hidden_states.push(Tensor::from_vec(data, (seq, VOCAB), &device)?);
    }

    let mut attributions = AttributionMap::new();
    attributions.insert(
        "grad_x_input",
        vec![
            vec![0.2, 0.5, 0.3],
            vec![0.1, 0.1, 0.4, 0.4],
            vec![0.05, 0.05, 0.1, 0.3, 0.5],
        ],
    );

    // A uniform causal attention pattern, one layer, one head.
    let full = TOKENS.len();
    let mut attn = vec![0.0f32; full * full];
    for i in 0..full {
        for j in 0..=i {
            attn[i * full + j] = 1.0 / (i + 1) as f32;
        }
    }
    let attention = Tensor::from_vec(attn, (1, 1, full, full), &device)?;

    // (batch, layer, neuron, position) activations with two firing groups.
    let activations: Vec<f32> = (0..(3 * 4 * seq))
        .map(|i| if i % 3 == 0 { (i % 11) as f32 } else { 0.5 })
        .collect();
    let activations = Tensor::from_vec(activations, (1, 3, 4, seq), &device)?;

    let record = SequenceRecord::new(
        (0..TOKENS.len() as u32).collect(),
        TOKENS.iter().map(|s| (*s).to_string()).collect(),
        N_INPUT,
        hidden_states,
        projection,
    )?
    .with_attributions(attributions)
    .with_attention(vec![attention])
    .with_activations(activations, None)
    .with_decoder(|id| {
        TOKENS
            .get(id as usize)
            .map_or_else(|| format!("<{id}>"), |t| (*t).to_string())
    });

    Ok(record)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args = Args::parse();
    let record = build_record()?;

    println!("=== Token sequence ===");
    println!("{}", serde_json::to_string_pretty(&record.explorable_view())?);

    println!("\n=== Layer predictions (position {}) ===", args.position);
    let predictions = record.layer_predictions(args.position, args.top_k, None)?;
    println!("{}", serde_json::to_string_pretty(&predictions)?);

    println!("\n=== Ranking trajectory ===");
    println!("{}", serde_json::to_string_pretty(&record.rankings()?)?);

    println!("\n=== Watch rankings (\" on\" vs \" mat\") ===");
    let watch = record.rankings_watch(&[3, 5], Some(args.position))?;
    println!("{}", serde_json::to_string_pretty(&watch)?);

    println!("\n=== Saliency ===");
    println!(
        "{}",
        serde_json::to_string_pretty(&record.saliency_view("grad_x_input")?)?
    );

    println!("\n=== Attention (layer 0) ===");
    println!("{}", serde_json::to_string_pretty(&record.attention_view(0)?)?);

    println!("\n=== NMF factors ===");
    let nmf = record.nmf(&LayerSelection::All, args.components, args.seed)?;
    println!("{}", serde_json::to_string_pretty(&record.factor_view(&nmf))?);

    Ok(())
}
