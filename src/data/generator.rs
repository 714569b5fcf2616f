// ============================================================
// Layer 4 — Dataset Batch Producers
// ============================================================
// `DatasetBatches` turns an HtrDataset plus a CtcBatcher into both
// producer flavours the adapter understands:
//
//   BatchGenerator — endless: walks the dataset batch by batch and
//                    starts over (reshuffling when enabled) at the end
//   BatchSequence  — batch `i` holds samples [i*bs, (i+1)*bs) in
//                    dataset order; the last batch may be short
//
// The batch type O is chosen by the caller (CtcBatch for training,
// InferenceBatch for prediction).

use std::{marker::PhantomData, sync::Arc};

use burn::{data::dataloader::batcher::Batcher, data::dataset::Dataset, prelude::*};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::data::{batcher::CtcBatcher, dataset::{HtrDataset, HtrSample}};
use crate::domain::{
    error::{CtcError, Result},
    traits::{BatchGenerator, BatchSequence},
};

pub struct DatasetBatches<B: Backend, O> {
    dataset:    Arc<HtrDataset>,
    batcher:    CtcBatcher<B>,
    batch_size: usize,
    shuffle:    bool,
    order:      Vec<usize>,
    cursor:     usize,
    rng:        StdRng,
    _batch:     PhantomData<fn() -> O>,
}

impl<B: Backend, O> DatasetBatches<B, O> {
    pub fn new(dataset: Arc<HtrDataset>, batcher: CtcBatcher<B>, batch_size: usize) -> Self {
        let order = (0..dataset.len()).collect();
        Self {
            dataset,
            batcher,
            batch_size: batch_size.max(1),
            shuffle: false,
            order,
            cursor: 0,
            rng: StdRng::seed_from_u64(0),
            _batch: PhantomData,
        }
    }

    /// Reshuffle the sample order at the start of every pass.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.rng     = StdRng::seed_from_u64(seed);
        self.order.shuffle(&mut self.rng);
        self
    }

    /// Batches needed to cover the dataset once.
    pub fn steps_per_epoch(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn collect(&self, indices: &[usize]) -> Vec<HtrSample> {
        indices.iter().filter_map(|&i| self.dataset.get(i)).collect()
    }
}

impl<B, O> BatchGenerator<O> for DatasetBatches<B, O>
where
    B: Backend,
    CtcBatcher<B>: Batcher<HtrSample, O>,
{
    fn next_batch(&mut self) -> Result<Option<O>> {
        if self.order.is_empty() {
            return Ok(None);
        }
        if self.cursor >= self.order.len() {
            self.cursor = 0;
            if self.shuffle {
                self.order.shuffle(&mut self.rng);
            }
        }
        let end   = (self.cursor + self.batch_size).min(self.order.len());
        let items = self.collect(&self.order[self.cursor..end]);
        self.cursor = end;

        tracing::trace!("Generated batch of {} samples", items.len());
        Ok(Some(self.batcher.batch(items)))
    }
}

impl<B, O> BatchSequence<O> for DatasetBatches<B, O>
where
    B: Backend,
    CtcBatcher<B>: Batcher<HtrSample, O>,
{
    fn len(&self) -> usize {
        self.steps_per_epoch()
    }

    fn get(&self, index: usize) -> Result<O> {
        let start = index * self.batch_size;
        if start >= self.dataset.len() {
            return Err(CtcError::Generator(format!(
                "batch index {index} out of range ({} batches)", self.steps_per_epoch()
            )));
        }
        let end     = (start + self.batch_size).min(self.dataset.len());
        let indices: Vec<usize> = (start..end).collect();
        Ok(self.batcher.batch(self.collect(&indices)))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::InferenceBatch;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn dataset(n: usize) -> Arc<HtrDataset> {
        let samples = (0..n)
            .map(|i| HtrSample::new(vec![vec![i as f32]; i + 1], vec![0]).unwrap())
            .collect();
        Arc::new(HtrDataset::new(samples))
    }

    fn first_feature(batch: &InferenceBatch<TB>) -> Vec<f32> {
        let [b, t, _] = batch.features.dims();
        let flat: Vec<f32> = batch.features.clone().into_data().convert::<f32>().to_vec().unwrap();
        (0..b).map(|i| flat[i * t]).collect()
    }

    #[test]
    fn test_steps_per_epoch_rounds_up() {
        let gen: DatasetBatches<TB, InferenceBatch<TB>> =
            DatasetBatches::new(dataset(5), CtcBatcher::new(Default::default()), 2);
        assert_eq!(gen.steps_per_epoch(), 3);
        assert_eq!(BatchSequence::len(&gen), 3);
    }

    #[test]
    fn test_generator_cycles_in_order() {
        let mut gen: DatasetBatches<TB, InferenceBatch<TB>> =
            DatasetBatches::new(dataset(3), CtcBatcher::new(Default::default()), 2);
        let a = gen.next_batch().unwrap().unwrap();
        let b = gen.next_batch().unwrap().unwrap();
        let c = gen.next_batch().unwrap().unwrap();
        assert_eq!(first_feature(&a), vec![0.0, 1.0]);
        assert_eq!(first_feature(&b), vec![2.0]);
        assert_eq!(first_feature(&c), vec![0.0, 1.0]);
    }

    #[test]
    fn test_sequence_get_and_out_of_range() {
        let gen: DatasetBatches<TB, InferenceBatch<TB>> =
            DatasetBatches::new(dataset(3), CtcBatcher::new(Default::default()), 2);
        let last = gen.get(1).unwrap();
        assert_eq!(last.batch_size(), 1);
        assert!(gen.get(2).is_err());
    }

    #[test]
    fn test_empty_dataset_ends_stream() {
        let mut gen: DatasetBatches<TB, InferenceBatch<TB>> =
            DatasetBatches::new(dataset(0), CtcBatcher::new(Default::default()), 2);
        assert!(gen.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_shuffled_covers_every_sample_once_per_pass() {
        let mut gen: DatasetBatches<TB, InferenceBatch<TB>> =
            DatasetBatches::new(dataset(6), CtcBatcher::new(Default::default()), 2).shuffled(7);
        let mut seen: Vec<f32> = (0..3)
            .flat_map(|_| first_feature(&gen.next_batch().unwrap().unwrap()))
            .collect();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }
}
