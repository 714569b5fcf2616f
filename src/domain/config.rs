// ============================================================
// Layer 3 — Decode Configuration
// ============================================================
// Parameters of the CTC decoding step used by the Predict head.
//
//   greedy     — best class per timestep, collapse repeats, drop blanks
//   beam_width — number of prefixes kept per timestep (beam search)
//   top_paths  — number of candidate sequences returned per example
//
// Greedy decoding always yields exactly one path.

use serde::{Deserialize, Serialize};

use crate::domain::error::{CtcError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeConfig {
    pub greedy:     bool,
    pub beam_width: usize,
    pub top_paths:  usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self { greedy: false, beam_width: 100, top_paths: 1 }
    }
}

impl DecodeConfig {
    pub fn greedy() -> Self {
        Self { greedy: true, ..Self::default() }
    }

    pub fn beam_search(beam_width: usize, top_paths: usize) -> Self {
        Self { greedy: false, beam_width, top_paths }
    }

    /// Number of decode paths the Predict head emits per example.
    pub fn paths(&self) -> usize {
        if self.greedy { 1 } else { self.top_paths }
    }

    /// Reject parameters the decoder cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.top_paths < 1 {
            return Err(CtcError::Config(format!(
                "top_paths must be >= 1, got {}", self.top_paths
            )));
        }
        if self.beam_width < 1 {
            return Err(CtcError::Config(format!(
                "beam_width must be >= 1, got {}", self.beam_width
            )));
        }
        if !self.greedy && self.top_paths > self.beam_width {
            return Err(CtcError::Config(format!(
                "top_paths ({}) cannot exceed beam_width ({})",
                self.top_paths, self.beam_width
            )));
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid_beam_search() {
        let cfg = DecodeConfig::default();
        assert!(!cfg.greedy);
        assert_eq!(cfg.beam_width, 100);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_top_paths_rejected() {
        let cfg = DecodeConfig::beam_search(10, 0);
        assert!(matches!(cfg.validate(), Err(CtcError::Config(_))));
    }

    #[test]
    fn test_zero_beam_width_rejected() {
        let cfg = DecodeConfig { greedy: true, beam_width: 0, top_paths: 1 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_top_paths_above_beam_width_rejected() {
        assert!(DecodeConfig::beam_search(2, 3).validate().is_err());
        assert!(DecodeConfig::beam_search(3, 3).validate().is_ok());
    }

    #[test]
    fn test_greedy_emits_single_path() {
        let cfg = DecodeConfig { greedy: true, beam_width: 5, top_paths: 4 };
        assert_eq!(cfg.paths(), 1);
        assert_eq!(DecodeConfig::beam_search(5, 4).paths(), 4);
    }
}
