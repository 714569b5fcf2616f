// ============================================================
// Layer 5 — CTC Decode
// ============================================================
// Turns per-timestep probabilities into label sequences.
//
//   greedy       argmax per step, collapse repeats, drop blanks
//   beam search  prefix beam search keeping `beam_width` prefixes,
//                returning the best `top_paths`
//
// Decoding runs on host data, so it works the same on every backend.
// The output mirrors a dense decode node: one `-1` padded f32 matrix
// per path plus a [batch][path] table of log-probabilities.

use std::collections::BTreeMap;

use burn::prelude::*;

use crate::domain::{
    config::DecodeConfig,
    error::{CtcError, Result},
    prediction::PADDING,
};
use crate::ml::{
    ctc_loss::{EPSILON, LOG_ZERO},
    host,
};

/// Dense output of the decode step.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutput {
    /// `[path][batch][max_len]`, padded with -1.
    pub paths:     Vec<Vec<Vec<f32>>>,
    /// `[batch][path]` natural-log probabilities.
    pub log_probs: Vec<Vec<f32>>,
}

/// One decoded candidate.
pub type Hypothesis = (Vec<u32>, f32);

pub fn ctc_decode<B: Backend>(
    y_pred:        Tensor<B, 3>,
    input_lengths: &[i64],
    config:        &DecodeConfig,
) -> Result<DecodeOutput> {
    let [batch, time, classes] = y_pred.dims();
    if input_lengths.len() != batch {
        return Err(CtcError::BatchShape(format!(
            "batch of {batch} got {} input lengths", input_lengths.len()
        )));
    }
    if classes == 0 {
        return Err(CtcError::BatchShape("network output has no classes".into()));
    }
    let blank = classes - 1;
    let probs = host::float_cube(y_pred)?;
    let n_paths = config.paths();

    let mut per_example: Vec<Vec<Hypothesis>> = Vec::with_capacity(batch);
    for (b, steps) in probs.into_iter().enumerate() {
        let len = input_lengths[b].clamp(0, time as i64) as usize;
        let log_steps: Vec<Vec<f32>> = steps
            .into_iter()
            .take(len)
            .map(|row| row.into_iter().map(|p| (p + EPSILON).ln()).collect())
            .collect();

        let mut hyps = if config.greedy {
            vec![greedy_decode(&log_steps, blank)]
        } else {
            beam_search_decode(&log_steps, blank, config.beam_width, config.top_paths)
        };
        hyps.resize(n_paths, (Vec::new(), LOG_ZERO));
        per_example.push(hyps);
    }

    tracing::debug!(batch, time, paths = n_paths, greedy = config.greedy, "ctc decode");
    Ok(densify(per_example, n_paths))
}

/// Best class per step; repeats collapse, blanks drop. The log-probability
/// is the sum of the chosen per-step log-probabilities.
pub fn greedy_decode(log_steps: &[Vec<f32>], blank: usize) -> Hypothesis {
    let mut tokens   = Vec::new();
    let mut log_prob = 0.0f32;
    let mut previous = None;

    for row in log_steps {
        let (best, score) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |acc, (i, v)| if v > acc.1 { (i, v) } else { acc });
        log_prob += score;
        if best != blank && previous != Some(best) {
            tokens.push(best as u32);
        }
        previous = Some(best);
    }
    (tokens, log_prob)
}

/// Prefix beam search. Each prefix tracks the log-probability of ending in
/// a blank and of ending in its last token. Results are ordered by score,
/// ties broken by the prefix itself, so the output is deterministic.
pub fn beam_search_decode(
    log_steps:  &[Vec<f32>],
    blank:      usize,
    beam_width: usize,
    top_paths:  usize,
) -> Vec<Hypothesis> {
    // prefix → (ends in blank, ends in token)
    let mut beams: BTreeMap<Vec<u32>, (f32, f32)> = BTreeMap::new();
    beams.insert(Vec::new(), (0.0, LOG_ZERO));

    for row in log_steps {
        let mut next: BTreeMap<Vec<u32>, (f32, f32)> = BTreeMap::new();

        for (prefix, &(p_blank, p_token)) in &beams {
            let total = log_add(p_blank, p_token);
            let last  = prefix.last().copied();

            let entry = next.entry(prefix.clone()).or_insert((LOG_ZERO, LOG_ZERO));
            entry.0 = log_add(entry.0, total + row[blank]);
            if let Some(last) = last {
                entry.1 = log_add(entry.1, p_token + row[last as usize]);
            }

            for (token, &lp) in row.iter().enumerate().filter(|&(c, _)| c != blank) {
                let token = token as u32;
                // a repeated token only extends the prefix after a blank
                let from = if last == Some(token) { p_blank } else { total };
                let mut extended = prefix.clone();
                extended.push(token);
                let entry = next.entry(extended).or_insert((LOG_ZERO, LOG_ZERO));
                entry.1 = log_add(entry.1, from + lp);
            }
        }

        beams = prune(next, beam_width);
    }

    let mut ranked = ranked(beams);
    ranked.truncate(top_paths);
    ranked
}

fn prune(candidates: BTreeMap<Vec<u32>, (f32, f32)>, beam_width: usize) -> BTreeMap<Vec<u32>, (f32, f32)> {
    let mut scored: Vec<(Vec<u32>, (f32, f32))> = candidates.into_iter().collect();
    scored.sort_by(|a, b| {
        let (sa, sb) = (log_add(a.1 .0, a.1 .1), log_add(b.1 .0, b.1 .1));
        sb.total_cmp(&sa).then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(beam_width);
    scored.into_iter().collect()
}

fn ranked(beams: BTreeMap<Vec<u32>, (f32, f32)>) -> Vec<Hypothesis> {
    let mut out: Vec<Hypothesis> = beams
        .into_iter()
        .map(|(prefix, (pb, pt))| (prefix, log_add(pb, pt)))
        .collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

fn log_add(a: f32, b: f32) -> f32 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if lo <= LOG_ZERO {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

fn densify(per_example: Vec<Vec<Hypothesis>>, n_paths: usize) -> DecodeOutput {
    let log_probs = per_example
        .iter()
        .map(|hyps| hyps.iter().map(|(_, lp)| *lp).collect())
        .collect();

    let paths = (0..n_paths)
        .map(|p| {
            let width = per_example.iter().map(|h| h[p].0.len()).max().unwrap_or(0);
            per_example
                .iter()
                .map(|hyps| {
                    let mut row: Vec<f32> = hyps[p].0.iter().map(|&t| t as f32).collect();
                    row.resize(width, PADDING as f32);
                    row
                })
                .collect()
        })
        .collect();

    DecodeOutput { paths, log_probs }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::TensorData};

    type TB = NdArray;

    fn ln_rows(rows: &[&[f32]]) -> Vec<Vec<f32>> {
        rows.iter().map(|r| r.iter().map(|p| p.ln()).collect()).collect()
    }

    #[test]
    fn test_greedy_collapses_repeats_and_blanks() {
        // classes: 0, 1, blank = 2
        let steps = ln_rows(&[
            &[0.8, 0.1, 0.1],
            &[0.7, 0.2, 0.1],
            &[0.1, 0.1, 0.8],
            &[0.6, 0.3, 0.1],
            &[0.2, 0.7, 0.1],
        ]);
        let (tokens, log_prob) = greedy_decode(&steps, 2);
        assert_eq!(tokens, vec![0, 0, 1]);
        let expected = (0.8f32 * 0.7 * 0.8 * 0.6 * 0.7).ln();
        assert!((log_prob - expected).abs() < 1e-5);
    }

    #[test]
    fn test_beam_search_finds_path_greedy_misses() {
        // token 0 = 0.4, blank = 0.6 at both steps
        let steps = ln_rows(&[&[0.4, 0.6], &[0.4, 0.6]]);

        let (greedy, _) = greedy_decode(&steps, 1);
        assert!(greedy.is_empty());

        let beams = beam_search_decode(&steps, 1, 10, 2);
        assert_eq!(beams[0].0, vec![0]);
        assert!((beams[0].1.exp() - 0.64).abs() < 1e-5);
        assert!(beams[1].0.is_empty());
        assert!((beams[1].1.exp() - 0.36).abs() < 1e-5);
    }

    #[test]
    fn test_beam_search_repeat_requires_blank() {
        let steps = ln_rows(&[&[0.9, 0.1], &[0.1, 0.9], &[0.9, 0.1]]);
        let beams = beam_search_decode(&steps, 1, 5, 1);
        assert_eq!(beams[0].0, vec![0, 0]);
    }

    #[test]
    fn test_beam_width_one_is_deterministic() {
        let steps = ln_rows(&[&[0.5, 0.5, 0.0001], &[0.5, 0.5, 0.0001]]);
        let a = beam_search_decode(&steps, 2, 1, 1);
        let b = beam_search_decode(&steps, 2, 1, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_ctc_decode_dense_output() {
        // example 0: tokens 1 then 0; example 1: blank, blank (empty)
        let values = vec![
            0.1, 0.8, 0.1,   0.8, 0.1, 0.1,
            0.1, 0.1, 0.8,   0.1, 0.1, 0.8,
        ];
        let y = Tensor::<TB, 3>::from_data(TensorData::new(values, [2, 2, 3]), &Default::default());
        let out = ctc_decode(y, &[2, 2], &DecodeConfig::greedy()).unwrap();

        assert_eq!(out.paths.len(), 1);
        assert_eq!(out.paths[0], vec![vec![1.0, 0.0], vec![-1.0, -1.0]]);
        assert_eq!(out.log_probs.len(), 2);
        assert_eq!(out.log_probs[0].len(), 1);
    }

    #[test]
    fn test_ctc_decode_respects_input_length() {
        let values = vec![0.9, 0.1, 0.9, 0.1, 0.1, 0.9, 0.9, 0.1];
        let y = Tensor::<TB, 3>::from_data(TensorData::new(values, [1, 4, 2]), &Default::default());
        let out = ctc_decode(y, &[1], &DecodeConfig::greedy()).unwrap();
        assert_eq!(out.paths[0], vec![vec![0.0]]);
    }

    #[test]
    fn test_missing_paths_are_padded() {
        let y = Tensor::<TB, 3>::from_data(
            TensorData::new(vec![0.3f32, 0.7], [1, 1, 2]),
            &Default::default(),
        );
        let out = ctc_decode(y, &[1], &DecodeConfig::beam_search(4, 3)).unwrap();
        assert_eq!(out.paths.len(), 3);
        // only "" and "0" exist after one step
        assert!(out.log_probs[0][2] <= LOG_ZERO);
    }
}
