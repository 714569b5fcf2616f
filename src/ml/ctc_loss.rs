// ============================================================
// Layer 5 — CTC Loss
// ============================================================
// Batched CTC negative log-likelihood, written with tensor ops so
// Burn's autodiff differentiates it like any other layer.
//
// Inputs follow the usual batch-cost convention:
//   y_pred        [batch, time, classes]  softmax probabilities,
//                                          blank = last class
//   labels        per example, padded with -1 past label_length
//   input_lengths valid timesteps per example
//   label_lengths valid label tokens per example
//
// Forward (alpha) recursion in log space over the extended label
//   l' = [blank, l1, blank, l2, ..., blank, lL, blank]   (2L + 1 states)
//
//   alpha_0(0) = log y_0(blank), alpha_0(1) = log y_0(l1)
//   alpha_t(s) = logsumexp(alpha_{t-1}(s),
//                          alpha_{t-1}(s-1),
//                          alpha_{t-1}(s-2) if l'(s) != blank and l'(s) != l'(s-2))
//                + log y_t(l'(s))
//   loss = -logsumexp(alpha_{T-1}(2L), alpha_{T-1}(2L-1))
//
// Examples shorter than the batch keep their alphas frozen once
// t >= input_length. log(0) is represented by LOG_ZERO so the
// max-shifted logsumexp never produces NaN; an impossible alignment
// (input too short for the label) yields a loss near 1e30.

use burn::{prelude::*, tensor::TensorData};

use crate::domain::error::{CtcError, Result};

/// Added to probabilities before taking the log.
pub const EPSILON: f32 = 1e-7;

/// Stand-in for log(0).
pub(crate) const LOG_ZERO: f32 = -1e30;

/// Per-example CTC loss, shape [batch].
pub fn ctc_batch_cost<B: Backend>(
    labels:        &[Vec<i64>],
    y_pred:        Tensor<B, 3>,
    input_lengths: &[i64],
    label_lengths: &[i64],
) -> Result<Tensor<B, 1>> {
    let [batch, time, classes] = y_pred.dims();
    validate(labels, [batch, time, classes], input_lengths, label_lengths)?;

    let device    = y_pred.device();
    let blank     = (classes - 1) as i64;
    let max_label = label_lengths.iter().copied().max().unwrap_or(0) as usize;
    let states    = 2 * max_label + 1;

    // ── Host-side tables ──────────────────────────────────────────────────────
    let mut extended    = vec![blank; batch * states];
    let mut no_skip     = vec![true;  batch * states];
    let mut not_initial = vec![true;  batch * states];
    let mut end_index   = vec![0i64;  batch * 2];
    let mut end_invalid = vec![false; batch * 2];

    for b in 0..batch {
        let len  = label_lengths[b] as usize;
        let base = b * states;
        for (i, &token) in labels[b].iter().take(len).enumerate() {
            extended[base + 2 * i + 1] = token;
        }
        for s in (3..2 * len + 1).step_by(2) {
            if extended[base + s] != extended[base + s - 2] {
                no_skip[base + s] = false;
            }
        }
        not_initial[base] = false;
        if len > 0 {
            not_initial[base + 1] = false;
        }
        end_index[2 * b]       = (2 * len) as i64;
        end_index[2 * b + 1]   = (2 * len).saturating_sub(1) as i64;
        end_invalid[2 * b + 1] = len == 0;
    }

    let bool_mask = |values: Vec<bool>, shape: [usize; 2]| {
        Tensor::<B, 2, Bool>::from_data(TensorData::new(values, shape), &device)
    };
    let no_skip     = bool_mask(no_skip, [batch, states]);
    let not_initial = bool_mask(not_initial, [batch, states]);
    let end_invalid = bool_mask(end_invalid, [batch, 2]);

    // ── Emissions along the extended labels: [batch, time, states] ────────────
    let gather_index: Vec<i64> = (0..batch)
        .flat_map(|b| {
            let row = &extended[b * states..(b + 1) * states];
            std::iter::repeat(row).take(time).flatten().copied()
        })
        .collect();
    let gather_index = Tensor::<B, 3, Int>::from_data(
        TensorData::new(gather_index, [batch, time, states]),
        &device,
    );
    let log_probs = (y_pred + EPSILON).log();
    let emissions = log_probs.gather(2, gather_index);
    let emission  = |t: usize| {
        emissions
            .clone()
            .slice([0..batch, t..t + 1, 0..states])
            .reshape([batch, states])
    };

    // ── Forward recursion ─────────────────────────────────────────────────────
    let mut alpha = emission(0).mask_fill(not_initial, LOG_ZERO);
    for t in 1..time {
        let stay = alpha.clone();
        let step = shift_states(alpha.clone(), 1);
        let skip = shift_states(alpha.clone(), 2).mask_fill(no_skip.clone(), LOG_ZERO);

        let merged = log_sum_exp(Tensor::stack::<3>(vec![stay, step, skip], 2), 2)
            .reshape([batch, states]);
        let next = merged + emission(t);

        alpha = if input_lengths.iter().all(|&len| (t as i64) < len) {
            next
        } else {
            let frozen: Vec<bool> = input_lengths
                .iter()
                .flat_map(|&len| std::iter::repeat((t as i64) >= len).take(states))
                .collect();
            next.mask_where(bool_mask(frozen, [batch, states]), alpha)
        };
    }

    // ── Read out the two accepting states ─────────────────────────────────────
    let end_index = Tensor::<B, 2, Int>::from_data(TensorData::new(end_index, [batch, 2]), &device);
    let ends = alpha.gather(1, end_index).mask_fill(end_invalid, LOG_ZERO);
    let log_likelihood = log_sum_exp(ends, 1).reshape([batch]);

    Ok(log_likelihood.neg())
}

/// Numerically stable log(sum(exp(x))) along `dim`, keeping the dimension.
pub(crate) fn log_sum_exp<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let max = x.clone().max_dim(dim).detach();
    (x - max.clone()).exp().sum_dim(dim).log() + max
}

/// Move every state `k` positions to the right, filling with LOG_ZERO.
fn shift_states<B: Backend>(alpha: Tensor<B, 2>, k: usize) -> Tensor<B, 2> {
    let [batch, states] = alpha.dims();
    let device = alpha.device();
    if k >= states {
        return Tensor::full([batch, states], LOG_ZERO, &device);
    }
    let pad = Tensor::full([batch, k], LOG_ZERO, &device);
    Tensor::cat(vec![pad, alpha.slice([0..batch, 0..states - k])], 1)
}

fn validate(
    labels:        &[Vec<i64>],
    [batch, time, classes]: [usize; 3],
    input_lengths: &[i64],
    label_lengths: &[i64],
) -> Result<()> {
    if labels.len() != batch || input_lengths.len() != batch || label_lengths.len() != batch {
        return Err(CtcError::BatchShape(format!(
            "batch of {batch} got {} label rows, {} input lengths, {} label lengths",
            labels.len(), input_lengths.len(), label_lengths.len()
        )));
    }
    if time == 0 || classes == 0 {
        return Err(CtcError::BatchShape(format!(
            "network output must have time and class dimensions, got [{batch}, {time}, {classes}]"
        )));
    }
    let blank = (classes - 1) as i64;
    for b in 0..batch {
        let input_len = input_lengths[b];
        if input_len < 1 || input_len as usize > time {
            return Err(CtcError::BatchShape(format!(
                "example {b}: input length {input_len} outside 1..={time}"
            )));
        }
        let label_len = label_lengths[b];
        if label_len < 0 || label_len as usize > labels[b].len() {
            return Err(CtcError::BatchShape(format!(
                "example {b}: label length {label_len} exceeds label row of {}", labels[b].len()
            )));
        }
        if let Some(&bad) = labels[b][..label_len as usize]
            .iter()
            .find(|&&token| token < 0 || token >= blank)
        {
            return Err(CtcError::BatchShape(format!(
                "example {b}: label token {bad} outside 0..{blank}"
            )));
        }
    }
    Ok(())
}
