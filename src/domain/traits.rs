// ============================================================
// Layer 3 — Core Traits (Generator Protocols)
// ============================================================
// fit() and predict() consume batches from one of two producers:
//
//   BatchGenerator — a repeatable producer, pulled one batch at a time.
//                    Access is serialised, so any number of prefetch
//                    workers can share one generator.
//
//   BatchSequence  — an indexable collection of batches. Workers fetch
//                    batches by index, which allows parallel production
//                    without duplicate delivery and with strict order.
//
// Both are generic over the batch type so this layer stays free of
// framework tensor types.

use std::sync::Arc;

use crate::domain::error::Result;

/// A repeatable batch producer.
pub trait BatchGenerator<T>: Send {
    /// Produce the next batch. `Ok(None)` signals end of stream.
    fn next_batch(&mut self) -> Result<Option<T>>;
}

/// An indexable batch collection.
pub trait BatchSequence<T>: Send + Sync {
    /// Number of batches in one pass.
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<T>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Called whenever the consumer wraps around to index 0.
    fn on_epoch_end(&self) {}
}

/// Input of `predict`: either flavour of producer.
pub enum BatchSource<T> {
    Sequence(Arc<dyn BatchSequence<T>>),
    Generator(Box<dyn BatchGenerator<T>>),
}

impl<T> BatchSource<T> {
    pub fn is_sequence(&self) -> bool {
        matches!(self, BatchSource::Sequence(_))
    }
}

/// Closures returning batches are generators.
impl<T, F> BatchGenerator<T> for F
where
    F: FnMut() -> Result<Option<T>> + Send,
{
    fn next_batch(&mut self) -> Result<Option<T>> {
        self()
    }
}
