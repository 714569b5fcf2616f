// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File-backed concerns shared by the model and the use cases:
//
//   checkpoint.rs — network weights (Burn named MessagePack recorder)
//                   and the JSON training config used to rebuild the
//                   network before loading weights into it
//
//   metrics.rs    — the `;`-separated per-epoch log appended during
//                   training
//
// Reference: Burn Book §5 (Records and Checkpointing)

/// Weight and config persistence
pub mod checkpoint;

/// Per-epoch CSV log
pub mod metrics;
