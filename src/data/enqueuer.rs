// ============================================================
// Layer 4 — Prefetch Enqueuers
// ============================================================
// Bounded producer/consumer queues that keep up to `max_queue_size`
// batches ready while the model works on the current one.
//
//   GeneratorEnqueuer — `workers` threads share one BatchGenerator
//                       behind a mutex. A worker hands its batch to the
//                       queue before releasing the lock, so the queue
//                       order is exactly the generation order.
//
//   OrderedEnqueuer   — `workers` threads fetch BatchSequence items by
//                       index. The consumer keeps a FIFO of pending
//                       indices, so batches come out strictly by index
//                       (0, 1, ..., len-1, 0, 1, ...).
//
// stop() sets the stop flag, drops the consumer side of every channel
// (which wakes blocked workers) and joins all worker threads. Drop
// calls stop(), so a queue never outlives the scope that started it.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{self, Receiver, Sender, SyncSender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use crate::domain::{
    error::{CtcError, Result},
    traits::{BatchGenerator, BatchSequence, BatchSource},
};

/// Common interface of both enqueuers.
pub trait Enqueuer<T>: Send {
    /// Spawn the producers. Zero workers is treated as one.
    fn start(&mut self, workers: usize, max_queue_size: usize) -> Result<()>;

    /// Block until the next batch is available.
    fn next(&mut self) -> Result<T>;

    /// Stop producers and join them. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Number of worker threads that have not exited yet.
    fn active_workers(&self) -> usize;
}

/// Build the enqueuer matching the producer flavour.
pub fn enqueuer_for<T: Send + 'static>(source: BatchSource<T>) -> Box<dyn Enqueuer<T>> {
    match source {
        BatchSource::Sequence(seq) => Box::new(OrderedEnqueuer::new(seq)),
        BatchSource::Generator(generator) => Box::new(GeneratorEnqueuer::new(generator)),
    }
}

/// Decrements the live-worker counter when a worker exits, panics included.
struct WorkerGuard(Arc<AtomicUsize>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn join_all(workers: &mut Vec<JoinHandle<()>>) {
    for handle in workers.drain(..) {
        if handle.join().is_err() {
            tracing::warn!("Prefetch worker panicked");
        }
    }
}

// ─── GeneratorEnqueuer ────────────────────────────────────────────────────────
type SharedGenerator<T> = Arc<Mutex<Box<dyn BatchGenerator<T>>>>;

pub struct GeneratorEnqueuer<T> {
    generator: SharedGenerator<T>,
    receiver:  Option<Receiver<Result<T>>>,
    workers:   Vec<JoinHandle<()>>,
    stop:      Arc<AtomicBool>,
    active:    Arc<AtomicUsize>,
    delivered: usize,
}

impl<T: Send + 'static> GeneratorEnqueuer<T> {
    pub fn new(generator: Box<dyn BatchGenerator<T>>) -> Self {
        Self {
            generator: Arc::new(Mutex::new(generator)),
            receiver:  None,
            workers:   Vec::new(),
            stop:      Arc::new(AtomicBool::new(false)),
            active:    Arc::new(AtomicUsize::new(0)),
            delivered: 0,
        }
    }

    fn worker_loop(
        generator: SharedGenerator<T>,
        sender:    SyncSender<Result<T>>,
        stop:      Arc<AtomicBool>,
        _guard:    WorkerGuard,
    ) {
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let Ok(mut producer) = generator.lock() else { break };
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let item = match producer.next_batch() {
                Ok(Some(batch)) => Ok(batch),
                Ok(None)        => break,
                Err(e)          => Err(e),
            };
            let failed = item.is_err();
            // Sent under the lock so queue order follows generation order
            if sender.send(item).is_err() || failed {
                break;
            }
        }
    }
}

impl<T: Send + 'static> Enqueuer<T> for GeneratorEnqueuer<T> {
    fn start(&mut self, workers: usize, max_queue_size: usize) -> Result<()> {
        if self.is_running() {
            return Err(CtcError::Generator("enqueuer already started".to_string()));
        }
        self.stop.store(false, Ordering::SeqCst);
        self.delivered = 0;

        let (sender, receiver) = mpsc::sync_channel(max_queue_size.max(1));
        for i in 0..workers.max(1) {
            let generator = Arc::clone(&self.generator);
            let sender    = sender.clone();
            let stop      = Arc::clone(&self.stop);
            self.active.fetch_add(1, Ordering::SeqCst);
            let guard = WorkerGuard(Arc::clone(&self.active));
            let handle = thread::Builder::new()
                .name(format!("batch-producer-{i}"))
                .spawn(move || Self::worker_loop(generator, sender, stop, guard))?;
            self.workers.push(handle);
        }
        self.receiver = Some(receiver);

        tracing::debug!(
            "GeneratorEnqueuer started: {} workers, queue size {}",
            workers.max(1), max_queue_size.max(1)
        );
        Ok(())
    }

    fn next(&mut self) -> Result<T> {
        let receiver = self.receiver.as_ref()
            .ok_or_else(|| CtcError::Generator("enqueuer not started".to_string()))?;
        match receiver.recv() {
            Ok(item) => {
                let batch = item?;
                self.delivered += 1;
                Ok(batch)
            }
            // Every producer exited: the generator ran dry
            Err(_) => Err(CtcError::GeneratorExhausted(self.delivered)),
        }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.receiver = None;
        join_all(&mut self.workers);
    }

    fn is_running(&self) -> bool {
        self.receiver.is_some()
    }

    fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl<T> Drop for GeneratorEnqueuer<T> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.receiver = None;
        join_all(&mut self.workers);
    }
}

// ─── OrderedEnqueuer ──────────────────────────────────────────────────────────
type Job<T> = (usize, SyncSender<Result<T>>);

pub struct OrderedEnqueuer<T> {
    sequence:       Arc<dyn BatchSequence<T>>,
    jobs:           Option<Sender<Job<T>>>,
    pending:        VecDeque<Receiver<Result<T>>>,
    workers:        Vec<JoinHandle<()>>,
    stop:           Arc<AtomicBool>,
    active:         Arc<AtomicUsize>,
    next_index:     usize,
    max_queue_size: usize,
}

impl<T: Send + 'static> OrderedEnqueuer<T> {
    pub fn new(sequence: Arc<dyn BatchSequence<T>>) -> Self {
        Self {
            sequence,
            jobs:           None,
            pending:        VecDeque::new(),
            workers:        Vec::new(),
            stop:           Arc::new(AtomicBool::new(false)),
            active:         Arc::new(AtomicUsize::new(0)),
            next_index:     0,
            max_queue_size: 1,
        }
    }

    fn worker_loop(
        sequence: Arc<dyn BatchSequence<T>>,
        jobs:     Arc<Mutex<Receiver<Job<T>>>>,
        stop:     Arc<AtomicBool>,
        _guard:   WorkerGuard,
    ) {
        loop {
            let job = {
                let Ok(queue) = jobs.lock() else { break };
                queue.recv()
            };
            let Ok((index, reply)) = job else { break };
            if stop.load(Ordering::SeqCst) {
                break;
            }
            // The consumer may have gone away; nothing left to do then
            let _ = reply.send(sequence.get(index));
        }
    }

    /// Keep `max_queue_size` indices in flight.
    fn fill(&mut self) -> Result<()> {
        let jobs = self.jobs.as_ref()
            .ok_or_else(|| CtcError::Generator("enqueuer not started".to_string()))?;
        while self.pending.len() < self.max_queue_size {
            let (reply, result) = mpsc::sync_channel(1);
            jobs.send((self.next_index, reply))
                .map_err(|_| CtcError::Generator("all prefetch workers exited".to_string()))?;
            self.pending.push_back(result);

            self.next_index += 1;
            if self.next_index >= self.sequence.len() {
                self.next_index = 0;
                self.sequence.on_epoch_end();
            }
        }
        Ok(())
    }
}

impl<T: Send + 'static> Enqueuer<T> for OrderedEnqueuer<T> {
    fn start(&mut self, workers: usize, max_queue_size: usize) -> Result<()> {
        if self.is_running() {
            return Err(CtcError::Generator("enqueuer already started".to_string()));
        }
        if self.sequence.is_empty() {
            return Err(CtcError::Generator("cannot enqueue an empty sequence".to_string()));
        }
        self.stop.store(false, Ordering::SeqCst);
        self.next_index     = 0;
        self.max_queue_size = max_queue_size.max(1);

        let (sender, receiver) = mpsc::channel::<Job<T>>();
        let receiver = Arc::new(Mutex::new(receiver));
        for i in 0..workers.max(1) {
            let sequence = Arc::clone(&self.sequence);
            let jobs     = Arc::clone(&receiver);
            let stop     = Arc::clone(&self.stop);
            self.active.fetch_add(1, Ordering::SeqCst);
            let guard = WorkerGuard(Arc::clone(&self.active));
            let handle = thread::Builder::new()
                .name(format!("sequence-worker-{i}"))
                .spawn(move || Self::worker_loop(sequence, jobs, stop, guard))?;
            self.workers.push(handle);
        }
        self.jobs = Some(sender);

        tracing::debug!(
            "OrderedEnqueuer started: {} workers, {} batches per pass",
            workers.max(1), self.sequence.len()
        );
        self.fill()
    }

    fn next(&mut self) -> Result<T> {
        let front = self.pending.pop_front()
            .ok_or_else(|| CtcError::Generator("enqueuer not started".to_string()))?;
        let item = front.recv()
            .map_err(|_| CtcError::Generator("prefetch worker exited before replying".to_string()))?;
        self.fill()?;
        item
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.jobs = None;
        self.pending.clear();
        join_all(&mut self.workers);
    }

    fn is_running(&self) -> bool {
        self.jobs.is_some()
    }

    fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl<T> Drop for OrderedEnqueuer<T> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.jobs = None;
        self.pending.clear();
        join_all(&mut self.workers);
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Numbers {
        len: usize,
    }

    impl BatchSequence<usize> for Numbers {
        fn len(&self) -> usize {
            self.len
        }

        fn get(&self, index: usize) -> Result<usize> {
            // Later indices finish first to shake out ordering bugs
            thread::sleep(Duration::from_millis(((self.len - index) % 4) as u64 * 3));
            Ok(index)
        }
    }

    fn counter(limit: usize) -> Box<dyn BatchGenerator<usize>> {
        let mut n = 0;
        Box::new(move || -> Result<Option<usize>> {
            if n >= limit {
                return Ok(None);
            }
            n += 1;
            Ok(Some(n - 1))
        })
    }

    #[test]
    fn test_ordered_enqueuer_keeps_index_order() {
        let mut enq = OrderedEnqueuer::new(Arc::new(Numbers { len: 5 }));
        enq.start(4, 3).unwrap();
        let got: Vec<usize> = (0..12).map(|_| enq.next().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1]);
        enq.stop();
        assert_eq!(enq.active_workers(), 0);
        assert!(!enq.is_running());
    }

    #[test]
    fn test_ordered_enqueuer_rejects_empty_sequence() {
        let mut enq = OrderedEnqueuer::new(Arc::new(Numbers { len: 0 }));
        assert!(enq.start(2, 2).is_err());
    }

    #[test]
    fn test_generator_enqueuer_preserves_generation_order() {
        let mut enq = GeneratorEnqueuer::new(counter(100));
        enq.start(4, 2).unwrap();
        let got: Vec<usize> = (0..50).map(|_| enq.next().unwrap()).collect();
        assert_eq!(got, (0..50).collect::<Vec<_>>());
        enq.stop();
        assert_eq!(enq.active_workers(), 0);
    }

    #[test]
    fn test_generator_exhaustion_reported() {
        let mut enq = GeneratorEnqueuer::new(counter(2));
        enq.start(2, 4).unwrap();
        assert_eq!(enq.next().unwrap(), 0);
        assert_eq!(enq.next().unwrap(), 1);
        assert!(matches!(enq.next(), Err(CtcError::GeneratorExhausted(2))));
    }

    #[test]
    fn test_generator_error_propagates_and_workers_stop() {
        let mut calls = 0usize;
        let failing: Box<dyn BatchGenerator<usize>> = Box::new(move || -> Result<Option<usize>> {
            calls += 1;
            if calls == 3 {
                Err(CtcError::Generator("boom".to_string()))
            } else {
                Ok(Some(calls))
            }
        });
        let mut enq = GeneratorEnqueuer::new(failing);
        enq.start(1, 1).unwrap();
        assert_eq!(enq.next().unwrap(), 1);
        assert_eq!(enq.next().unwrap(), 2);
        assert!(matches!(enq.next(), Err(CtcError::Generator(_))));
        enq.stop();
        assert_eq!(enq.active_workers(), 0);
    }

    #[test]
    fn test_drop_joins_blocked_workers() {
        let active = {
            let mut enq = GeneratorEnqueuer::new(counter(usize::MAX));
            enq.start(3, 1).unwrap();
            assert_eq!(enq.next().unwrap(), 0);
            Arc::clone(&enq.active)
        };
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_next_before_start_fails() {
        let mut enq = GeneratorEnqueuer::new(counter(1));
        assert!(enq.next().is_err());
    }
}
