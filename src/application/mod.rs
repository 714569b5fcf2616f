// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Workflows built from the other layers:
//
//   train    — fit a CTC model on a JSON-lines dataset
//   predict  — transcribe a dataset with a trained model
//   evaluate — loss and character error rate on labelled data
//
// Rules for this layer:
//   - No tensor math or model code here
//   - No printing here (that's Layer 1)
//   - Only workflow coordination

// The training workflow
pub mod train_use_case;

// Restoring a trained model and decoding with it
pub mod predict_use_case;

pub mod evaluate_use_case;
