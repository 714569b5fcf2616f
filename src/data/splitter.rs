// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Used when training runs without a separate validation file:
// the loaded lines are shuffled with a seeded RNG and split so the
// monitored `val_loss` is measured on lines the model never trains on.
//
// Shuffling first matters because line datasets are usually stored
// page by page (same writer, same form), and an unshuffled split
// would validate on a single writer.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` with `seed` and split into (train, validation).
///
/// `train_fraction` is clamped to [0, 1]; e.g. 0.8 keeps 80% for training.
///
/// ```
/// use htr_ctc::data::splitter::split_train_val;
///
/// let (train, val) = split_train_val((0..10).collect::<Vec<u32>>(), 0.8, 42);
/// assert_eq!((train.len(), val.len()), (8, 2));
/// ```
pub fn split_train_val<T>(mut samples: Vec<T>, train_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let fraction = train_fraction.clamp(0.0, 1.0);
    let split_at = (((total as f64) * fraction).round() as usize).min(total);

    // After this: samples = [0..split_at], val = [split_at..total]
    let val = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation ({}% / {}%)",
        samples.len(),
        val.len(),
        (samples.len() * 100) / total.max(1),
        (val.len()     * 100) / total.max(1),
    );

    (samples, val)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, val)      = split_train_val(items, 0.8, 1);
        assert_eq!(train.len(), 80);
        assert_eq!(val.len(),   20);
    }

    #[test]
    fn test_all_items_preserved() {
        let items: Vec<usize> = (0..50).collect();
        let (train, val)      = split_train_val(items, 0.7, 2);
        let mut all: Vec<usize> = train.into_iter().chain(val).collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = split_train_val((0..30).collect::<Vec<usize>>(), 0.5, 9);
        let b = split_train_val((0..30).collect::<Vec<usize>>(), 0.5, 9);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_dataset() {
        let items: Vec<usize> = Vec::new();
        let (train, val)      = split_train_val(items, 0.8, 3);
        assert!(train.is_empty());
        assert!(val.is_empty());
    }

    #[test]
    fn test_fraction_clamped() {
        let items: Vec<usize> = (0..10).collect();
        let (train, val)      = split_train_val(items, 1.5, 4);
        assert_eq!(train.len(), 10);
        assert!(val.is_empty());
    }
}
