#![recursion_limit = "256"]
//! CTC model adapter for handwritten text recognition on Burn.
//!
//! A per-timestep network is wrapped in [`ml::ctc_model::CtcModel`], which
//! compiles three heads over shared weights: a training head computing the
//! CTC loss, a predict head decoding labels, and a raw head returning the
//! softmax matrix.

pub mod application;
pub mod cli;
pub mod data;
pub mod domain;
pub mod infra;
pub mod ml;
