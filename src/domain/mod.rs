// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust types describing what the CTC adapter works with.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain structs, enums, traits and small pure helpers
//
// What's in this layer:
//
//   config.rs     — CTC decoding parameters (greedy / beam search)
//   node.rs       — input/output node descriptors of a network
//   charset.rs    — character set mapping text <-> token ids
//   prediction.rs — decoded predictions, padding sentinel, loss report
//   traits.rs     — batch generator and batch sequence protocols
//   error.rs      — the library error type

/// CTC decoding configuration
pub mod config;

/// Input / output node descriptors
pub mod node;

/// Character set used to encode transcriptions
pub mod charset;

/// Decoded predictions and loss reports
pub mod prediction;

/// Generator protocols consumed by fit / predict
pub mod traits;

/// Library error type
pub mod error;
