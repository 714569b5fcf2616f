// ============================================================
// Layer 5 — Model Heads
// ============================================================
// The three inference modes a compiled CtcModel materialises over
// one shared network:
//
//   Train       [inputs.., labels, input_length, label_length] → CTCloss
//   Predict     [inputs.., input_length]                       → CTCdecode
//   RawPredict  [inputs.., input_length]                       → CTCdecode (raw)
//
// `CompiledHeads` records the node layout of each head; the functions
// below are the heads' computations. Because every head calls the same
// network, weights loaded once are seen by all three.

use std::fmt;

use burn::prelude::*;

use crate::data::batcher::{CtcBatch, InferenceBatch};
use crate::domain::{
    config::DecodeConfig,
    error::{CtcError, Result},
    node::{NodeList, NodeSpec},
};
use crate::ml::{
    ctc_decode::{ctc_decode, DecodeOutput},
    ctc_loss::ctc_batch_cost,
    host,
    network::CtcNetwork,
};

pub const LOSS_NODE:   &str = "CTCloss";
pub const DECODE_NODE: &str = "CTCdecode";

/// Node layout of one head.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadSpec {
    pub inputs: Vec<NodeSpec>,
    pub output: NodeSpec,
}

impl fmt::Display for HeadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs: Vec<String> = self.inputs.iter().map(|n| n.to_string()).collect();
        write!(f, "[{}] -> {}", inputs.join(", "), self.output)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledHeads {
    pub train:       HeadSpec,
    pub predict:     HeadSpec,
    pub raw_predict: HeadSpec,
}

impl CompiledHeads {
    /// Add the CTC auxiliary inputs around the network's own nodes.
    pub fn build(inputs: &NodeList, outputs: &NodeList, decode: &DecodeConfig) -> Result<Self> {
        decode.validate()?;
        if inputs.len() != 1 {
            return Err(CtcError::Config(format!(
                "expected exactly one network input node, got {}", inputs.len()
            )));
        }
        if outputs.len() != 1 {
            return Err(CtcError::Config(format!(
                "expected exactly one network output node, got {}", outputs.len()
            )));
        }

        let labels       = NodeSpec::new("labels", vec![None]);
        let input_length = NodeSpec::new("input_length", vec![Some(1)]);
        let label_length = NodeSpec::new("label_length", vec![Some(1)]);

        let network_inputs = inputs.as_slice().to_vec();
        let with = |extra: &[&NodeSpec]| {
            let mut nodes = network_inputs.clone();
            nodes.extend(extra.iter().map(|&n| n.clone()));
            nodes
        };

        Ok(Self {
            train: HeadSpec {
                inputs: with(&[&labels, &input_length, &label_length]),
                output: NodeSpec::new(LOSS_NODE, vec![Some(1)]),
            },
            predict: HeadSpec {
                inputs: with(&[&input_length]),
                output: NodeSpec::new(DECODE_NODE, vec![Some(decode.paths()), None]),
            },
            raw_predict: HeadSpec {
                inputs: with(&[&input_length]),
                output: NodeSpec::new(DECODE_NODE, vec![None, None]),
            },
        })
    }
}

// ─── Head computations ────────────────────────────────────────────────────────

/// Run the shared network after checking the batch's feature width.
fn forward<B: Backend, N: CtcNetwork<B>>(network: &N, features: &Tensor<B, 3>) -> Result<Tensor<B, 3>> {
    let [_, _, width] = features.dims();
    if width != network.input_width() {
        return Err(CtcError::BatchShape(format!(
            "batch has {width} features per timestep, network expects {}",
            network.input_width()
        )));
    }
    Ok(network.forward(features.clone()))
}

/// Train head: per-example CTC loss, shape [batch].
pub fn train_head<B: Backend, N: CtcNetwork<B>>(network: &N, batch: &CtcBatch<B>) -> Result<Tensor<B, 1>> {
    let y_pred        = forward(network, &batch.features)?;
    let labels        = host::int_rows(batch.labels.clone())?;
    let input_lengths = host::int_vec(batch.input_lengths.clone())?;
    let label_lengths = host::int_vec(batch.label_lengths.clone())?;
    ctc_batch_cost(&labels, y_pred, &input_lengths, &label_lengths)
}

/// Predict head: decoded paths plus log-probabilities.
pub fn predict_head<B: Backend, N: CtcNetwork<B>>(
    network: &N,
    batch:   &InferenceBatch<B>,
    decode:  &DecodeConfig,
) -> Result<DecodeOutput> {
    let y_pred        = forward(network, &batch.features)?;
    let input_lengths = host::int_vec(batch.input_lengths.clone())?;
    ctc_decode(y_pred, &input_lengths, decode)
}

/// RawPredict head: the network output verbatim.
pub fn raw_predict_head<B: Backend, N: CtcNetwork<B>>(
    network: &N,
    batch:   &InferenceBatch<B>,
) -> Result<Tensor<B, 3>> {
    forward(network, &batch.features)
}
