// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that touches Burn tensors and modules:
//
//   network.rs    — the CtcNetwork trait and the default HTR network
//                   (projection → LSTM → per-timestep softmax)
//
//   ctc_loss.rs   — differentiable batched CTC loss (log-space
//                   forward recursion)
//
//   ctc_decode.rs — greedy and prefix beam-search decoding
//
//   heads.rs      — Train / Predict / RawPredict heads over one network
//
//   objective.rs  — loss passthrough objective and optimizer erasure
//
//   callbacks.rs  — epoch log, checkpointing, early stopping and
//                   learning-rate reduction
//
//   ctc_model.rs  — the CtcModel adapter tying the above together
//
// Reference: Burn Book §3 (Building Blocks), §5 (Training)
//            Graves et al. (2006) Connectionist Temporal Classification

use burn::backend::{Autodiff, NdArray};

/// Backend of the application layer. Inference runs on its inner
/// `NdArray` backend through `valid()`.
pub type TrainBackend = Autodiff<NdArray>;

/// Network trait and default HTR network
pub mod network;

/// Batched CTC loss
pub mod ctc_loss;

/// Greedy and beam-search CTC decoding
pub mod ctc_decode;

/// The three heads of a compiled model
pub mod heads;

/// Passthrough objective and optimizer seam
pub mod objective;

/// Training callbacks
pub mod callbacks;

/// The CTC model adapter
pub mod ctc_model;

pub(crate) mod host;
