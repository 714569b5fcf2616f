// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between a dataset file and the batches fed to the heads.
//
//   dataset file (.jsonl)
//       │
//       ▼
//   JsonlLoader       → parses records, encodes text with the charset
//       │
//       ▼
//   split_train_val   → optional shuffled train/validation split
//       │
//       ▼
//   HtrDataset        → implements Burn's Dataset trait
//       │
//       ▼
//   CtcBatcher        → pads samples into CtcBatch / InferenceBatch
//       │
//       ▼
//   DatasetBatches    → BatchGenerator / BatchSequence over the dataset
//       │
//       ▼
//   Enqueuers         → bounded prefetch queues with worker threads
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads JSON-lines datasets
pub mod loader;

/// Implements Burn's Dataset trait for line samples
pub mod dataset;

/// Implements Burn's Batcher trait for CTC batches
pub mod batcher;

/// Batch generators and sequences over a dataset
pub mod generator;

/// Prefetch queues fed by worker threads
pub mod enqueuer;

/// Shuffles and splits data into train/validation sets
pub mod splitter;
