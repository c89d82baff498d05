// src/dataset/prefetch.rs

//! Chunk dataset: epoch lifecycle and preloader worker threads.
//!
//! `ChunkDataset` ties a `ChunkReader`, an `ExampleSampler`, a
//! `ChunkScheduler` and the batch buffer into one epoch-oriented pipeline.
//! `reset()` rebuilds the buffer and spawns the preloaders; `get_batch()`
//! dequeues uniform batches until the end-of-epoch sentinel; dropping the
//! dataset (or the next `reset()`) stops the buffer and joins every worker
//! before anything is torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::config::ChunkDatasetOptions;
use crate::error::{LoaderError, Result};

use super::buffer::BatchBuffer;
use super::scheduler::ChunkScheduler;
use super::traits::{ChunkReader, ExampleSampler};

/// A stateful dataset that performs hierarchical sampling over chunks and
/// prefetches them with a pool of worker threads.
///
/// Two samplers cooperate: the chunk scheduler decides which chunk each
/// replica loads next, while the example sampler orders the examples within
/// each loaded chunk. Construction spawns nothing; every epoch starts with
/// `reset()`.
pub struct ChunkDataset<R, S>
where
    R: ChunkReader,
    S: ExampleSampler,
{
    chunk_reader: Arc<R>,
    example_sampler: Arc<Mutex<S>>,
    chunk_scheduler: Arc<dyn ChunkScheduler>,
    options: ChunkDatasetOptions,
    batch_buffer: Option<Arc<BatchBuffer<R::Example, S>>>,
    preload_threads: Vec<JoinHandle<()>>,
    quit_worker: Arc<AtomicBool>,
}

impl<R, S> ChunkDataset<R, S>
where
    R: ChunkReader,
    S: ExampleSampler,
{
    pub fn new(
        chunk_reader: R,
        example_sampler: S,
        chunk_scheduler: Arc<dyn ChunkScheduler>,
        options: ChunkDatasetOptions,
    ) -> Self {
        Self {
            chunk_reader: Arc::new(chunk_reader),
            example_sampler: Arc::new(Mutex::new(example_sampler)),
            chunk_scheduler,
            options,
            batch_buffer: None,
            preload_threads: Vec::new(),
            quit_worker: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Dequeue the next batch, or `Ok(None)` once the epoch is exhausted.
    ///
    /// `batch_size` must match the configured batch size; the parameter
    /// exists so callers wired to a generic loader surface fail loudly on
    /// a mismatch instead of silently re-batching.
    ///
    /// # Errors
    ///
    /// Returns an error if `reset()` has not been called, on a batch-size
    /// mismatch, or when re-raising a failure captured by a preloader.
    pub fn get_batch(&self, batch_size: usize) -> Result<Option<Vec<R::Example>>> {
        let buffer = self
            .batch_buffer
            .as_ref()
            .ok_or_else(|| LoaderError::dataset("reset() must be called before get_batch()"))?;

        if batch_size != self.options.batch_size() {
            return Err(LoaderError::batch_size_mismatch(
                batch_size,
                self.options.batch_size(),
            ));
        }

        buffer.get_batch()
    }

    /// Dequeue the next batch at the configured batch size.
    pub fn next_batch(&self) -> Result<Option<Vec<R::Example>>> {
        self.get_batch(self.options.batch_size())
    }

    /// Chunk datasets are stateful streams; they do not advertise a length.
    pub fn size(&self) -> Option<usize> {
        None
    }

    pub fn options(&self) -> &ChunkDatasetOptions {
        &self.options
    }

    /// Iterate over the remaining batches of the current epoch.
    pub fn batches(&self) -> Batches<'_, R, S> {
        Batches {
            dataset: self,
            exhausted: false,
        }
    }

    /// Stop the buffer and join all preloader threads. Idempotent; safe to
    /// call before the first `reset()`.
    fn free_workers(&mut self) {
        if !self.quit_worker.swap(true, Ordering::Relaxed) {
            if let Some(buffer) = &self.batch_buffer {
                buffer.stop();
            }
            for handle in self.preload_threads.drain(..) {
                if handle.join().is_err() {
                    warn!("a preloader thread panicked during teardown");
                }
            }
            debug!("preloader workers joined");
        }
    }
}

impl<R, S> ChunkDataset<R, S>
where
    R: ChunkReader + 'static,
    S: ExampleSampler + 'static,
{
    /// Start a new epoch: tear down any running workers, reset the reader
    /// and the scheduler, rebuild the buffer and spawn the preloaders.
    ///
    /// Batches still queued from the previous epoch are discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if a preloader thread cannot be spawned; the
    /// dataset is left torn down and a later `reset()` may retry.
    pub fn reset(&mut self) -> Result<()> {
        self.free_workers();

        self.chunk_reader.reset();
        self.chunk_scheduler.reset();

        // The scheduler holds the truth about this replica's share; in
        // distributed runs it differs from the reader's chunk count.
        let chunks_to_load = self.chunk_scheduler.local_chunk_count();

        let buffer = Arc::new(BatchBuffer::new(
            chunks_to_load,
            self.options.batch_size(),
            self.options.cache_size(),
            Arc::clone(&self.example_sampler),
        ));
        self.batch_buffer = Some(Arc::clone(&buffer));
        self.quit_worker.store(false, Ordering::Relaxed);

        debug!(
            preloaders = self.options.preloader_count(),
            chunks = chunks_to_load,
            "starting epoch preload"
        );

        for worker_id in 0..self.options.preloader_count() {
            let reader = Arc::clone(&self.chunk_reader);
            let scheduler = Arc::clone(&self.chunk_scheduler);
            let buffer = Arc::clone(&buffer);
            let quit = Arc::clone(&self.quit_worker);

            let spawned = thread::Builder::new()
                .name(format!("chunk-preloader-{worker_id}"))
                .spawn(move || preloader_loop(&*reader, &*scheduler, &buffer, &quit));
            match spawned {
                Ok(handle) => self.preload_threads.push(handle),
                Err(source) => {
                    self.free_workers();
                    return Err(LoaderError::dataset(format!(
                        "failed to spawn preloader thread: {source}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl<R, S> Drop for ChunkDataset<R, S>
where
    R: ChunkReader,
    S: ExampleSampler,
{
    fn drop(&mut self) {
        self.free_workers();
    }
}

fn preloader_loop<R, S>(
    reader: &R,
    scheduler: &dyn ChunkScheduler,
    buffer: &BatchBuffer<R::Example, S>,
    quit: &AtomicBool,
) where
    R: ChunkReader,
    S: ExampleSampler,
{
    while !quit.load(Ordering::Relaxed) {
        let Some(chunk_index) = scheduler.next() else {
            break;
        };
        match reader.read_chunk(chunk_index) {
            Ok(data) if data.is_empty() => buffer.skip_chunk(),
            Ok(data) => buffer.push_chunk(data),
            Err(error) => {
                warn!(chunk_index, %error, "chunk load failed; forwarding to consumer");
                buffer.push_failure(error);
            }
        }
    }
}

/// Iterator over the batches of one epoch, ending at the sentinel.
pub struct Batches<'a, R, S>
where
    R: ChunkReader,
    S: ExampleSampler,
{
    dataset: &'a ChunkDataset<R, S>,
    exhausted: bool,
}

impl<R, S> Iterator for Batches<'_, R, S>
where
    R: ChunkReader,
    S: ExampleSampler,
{
    type Item = Result<Vec<R::Example>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.dataset.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.exhausted = true;
                None
            }
            Err(error) => Some(Err(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::sampler::{RandomExampleSampler, SequentialExampleSampler};
    use crate::dataset::scheduler::{RandomChunkScheduler, SequentialChunkScheduler};
    use crate::dataset::traits::InMemoryChunkReader;

    fn options(preloaders: usize, batch_size: usize, cache_size: usize) -> ChunkDatasetOptions {
        ChunkDatasetOptions::with_cache_size(preloaders, batch_size, cache_size).unwrap()
    }

    fn sequential_dataset(
        chunks: Vec<Vec<u32>>,
        preloaders: usize,
        batch_size: usize,
    ) -> ChunkDataset<InMemoryChunkReader<u32>, SequentialExampleSampler> {
        let reader = InMemoryChunkReader::new(chunks);
        let scheduler = Arc::new(SequentialChunkScheduler::new(reader.chunk_count()));
        ChunkDataset::new(
            reader,
            SequentialExampleSampler::new(),
            scheduler,
            options(preloaders, batch_size, 2048),
        )
    }

    fn drain(dataset: &ChunkDataset<InMemoryChunkReader<u32>, SequentialExampleSampler>) -> Vec<Vec<u32>> {
        dataset.batches().map(|batch| batch.unwrap()).collect()
    }

    #[test]
    fn test_epoch_slices_across_chunk_boundaries() {
        // Four chunks of three examples, batch size four: batches cross
        // chunk boundaries and stay uniform.
        let mut dataset = sequential_dataset(
            vec![
                vec![0, 1, 2],
                vec![10, 11, 12],
                vec![20, 21, 22],
                vec![30, 31, 32],
            ],
            1,
            4,
        );
        dataset.reset().unwrap();

        let batches = drain(&dataset);
        assert_eq!(
            batches,
            vec![
                vec![0, 1, 2, 10],
                vec![11, 12, 20, 21],
                vec![22, 30, 31, 32],
            ]
        );
        // The sentinel is sticky.
        assert_eq!(dataset.next_batch().unwrap(), None);
    }

    #[test]
    fn test_epoch_ends_with_short_tail_batch() {
        let mut dataset =
            sequential_dataset(vec![vec![1, 2, 3, 4, 5], vec![6, 7, 8, 9, 10]], 1, 3);
        dataset.reset().unwrap();

        let sizes: Vec<usize> = drain(&dataset).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_empty_chunks_are_skipped() {
        let mut dataset = sequential_dataset(vec![vec![], vec![5, 6, 7, 8], vec![]], 1, 2);
        dataset.reset().unwrap();

        assert_eq!(drain(&dataset), vec![vec![5, 6], vec![7, 8]]);
    }

    #[test]
    fn test_empty_dataset_yields_sentinel_first() {
        let mut dataset = sequential_dataset(vec![], 1, 2);
        dataset.reset().unwrap();

        assert_eq!(dataset.next_batch().unwrap(), None);
    }

    #[test]
    fn test_multiset_preserved_with_parallel_preloaders() {
        let chunks: Vec<Vec<u32>> = (0..10).map(|i| vec![i]).collect();
        let reader = InMemoryChunkReader::new(chunks);
        let scheduler = Arc::new(RandomChunkScheduler::new(reader.chunk_count()));
        let mut dataset = ChunkDataset::new(
            reader,
            SequentialExampleSampler::new(),
            scheduler,
            options(4, 1, 2048),
        );
        dataset.reset().unwrap();

        let mut all: Vec<u32> = dataset
            .batches()
            .map(|batch| {
                let batch = batch.unwrap();
                assert_eq!(batch.len(), 1);
                batch[0]
            })
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    // Fails on chunk 2; every other chunk yields two examples.
    struct FlakyReader;

    impl ChunkReader for FlakyReader {
        type Example = u32;

        fn read_chunk(&self, chunk_index: usize) -> Result<Vec<u32>> {
            if chunk_index == 2 {
                return Err(LoaderError::chunk(chunk_index, "simulated read failure"));
            }
            let base = chunk_index as u32 * 10;
            Ok(vec![base, base + 1])
        }

        fn chunk_count(&self) -> usize {
            4
        }
    }

    #[test]
    fn test_reader_failure_interleaves_with_batches() {
        let scheduler = Arc::new(SequentialChunkScheduler::new(4));
        let mut dataset = ChunkDataset::new(
            FlakyReader,
            SequentialExampleSampler::new(),
            scheduler,
            options(1, 2, 2048),
        );
        dataset.reset().unwrap();

        assert_eq!(dataset.next_batch().unwrap(), Some(vec![0, 1]));
        assert_eq!(dataset.next_batch().unwrap(), Some(vec![10, 11]));
        let err = dataset.next_batch().unwrap_err();
        assert!(matches!(err, LoaderError::Worker { .. }));
        assert_eq!(dataset.next_batch().unwrap(), Some(vec![30, 31]));
        assert_eq!(dataset.next_batch().unwrap(), None);
    }

    #[test]
    fn test_batches_iterator_survives_reader_failure() {
        let scheduler = Arc::new(SequentialChunkScheduler::new(4));
        let mut dataset = ChunkDataset::new(
            FlakyReader,
            SequentialExampleSampler::new(),
            scheduler,
            options(1, 2, 2048),
        );
        dataset.reset().unwrap();

        // A failure is yielded as an item; iteration keeps going and still
        // ends at the sentinel.
        let items: Vec<_> = dataset.batches().collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].as_ref().unwrap(), &vec![0, 1]);
        assert_eq!(items[1].as_ref().unwrap(), &vec![10, 11]);
        assert!(matches!(items[2], Err(LoaderError::Worker { .. })));
        assert_eq!(items[3].as_ref().unwrap(), &vec![30, 31]);
    }

    #[test]
    fn test_get_batch_requires_reset() {
        let dataset = sequential_dataset(vec![vec![1, 2]], 1, 2);
        let err = dataset.next_batch().unwrap_err();
        assert!(err.to_string().contains("reset()"));
    }

    #[test]
    fn test_get_batch_rejects_mismatched_batch_size() {
        let mut dataset = sequential_dataset(vec![vec![1, 2]], 1, 2);
        dataset.reset().unwrap();

        let err = dataset.get_batch(3).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::BatchSizeMismatch {
                requested: 3,
                configured: 2,
            }
        ));
    }

    #[test]
    fn test_size_is_unknown() {
        let dataset = sequential_dataset(vec![vec![1]], 1, 1);
        assert_eq!(dataset.size(), None);
    }

    #[test]
    fn test_double_reset_matches_single_reset() {
        let chunks: Vec<Vec<u32>> = (0..6).map(|i| (i * 10..i * 10 + 4).collect()).collect();

        let reader = InMemoryChunkReader::new(chunks.clone());
        let scheduler = Arc::new(RandomChunkScheduler::new(reader.chunk_count()));
        let mut once = ChunkDataset::new(
            reader,
            SequentialExampleSampler::new(),
            scheduler,
            options(1, 4, 2048),
        );
        once.reset().unwrap();

        let reader = InMemoryChunkReader::new(chunks);
        let scheduler = Arc::new(RandomChunkScheduler::new(reader.chunk_count()));
        let mut twice = ChunkDataset::new(
            reader,
            SequentialExampleSampler::new(),
            scheduler,
            options(1, 4, 2048),
        );
        twice.reset().unwrap();
        twice.reset().unwrap();

        let first: Vec<_> = once.batches().map(|b| b.unwrap()).collect();
        let second: Vec<_> = twice.batches().map(|b| b.unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mid_epoch_reset_restarts_cleanly() {
        let chunks: Vec<Vec<u32>> = (0..8).map(|i| (i * 10..i * 10 + 3).collect()).collect();
        let mut dataset = sequential_dataset(chunks, 2, 3);

        dataset.reset().unwrap();
        // Consume part of the epoch, then abandon it.
        let _ = dataset.next_batch().unwrap();
        let _ = dataset.next_batch().unwrap();

        dataset.reset().unwrap();
        let total: usize = drain(&dataset).iter().map(Vec::len).sum();
        assert_eq!(total, 24);
    }

    #[test]
    fn test_drop_after_reset_joins_workers() {
        let chunks: Vec<Vec<u32>> = (0..16).map(|i| vec![i; 8]).collect();
        let mut dataset = sequential_dataset(chunks, 4, 4);
        dataset.reset().unwrap();
        // Dropping mid-epoch must stop the buffer and join every worker.
        drop(dataset);
    }

    #[test]
    fn test_progress_when_cache_equals_batch_size() {
        let chunks: Vec<Vec<u32>> = (0..6).map(|i| (i * 4..i * 4 + 4).collect()).collect();
        let reader = InMemoryChunkReader::new(chunks);
        let scheduler = Arc::new(SequentialChunkScheduler::new(reader.chunk_count()));
        let mut dataset = ChunkDataset::new(
            reader,
            SequentialExampleSampler::new(),
            scheduler,
            options(2, 4, 4),
        );
        dataset.reset().unwrap();

        let total: usize = dataset
            .batches()
            .map(|batch| batch.unwrap().len())
            .sum();
        assert_eq!(total, 24);
    }

    #[test]
    fn test_single_preloader_runs_are_bit_identical() {
        let chunks: Vec<Vec<u32>> = (0..5).map(|i| (i * 10..i * 10 + 7).collect()).collect();

        let run = |seed| {
            let reader = InMemoryChunkReader::new(chunks.clone());
            let scheduler = Arc::new(RandomChunkScheduler::new(reader.chunk_count()));
            let mut dataset = ChunkDataset::new(
                reader,
                RandomExampleSampler::new(seed),
                scheduler,
                options(1, 4, 2048),
            );
            dataset.reset().unwrap();
            dataset
                .batches()
                .map(|b| b.unwrap())
                .collect::<Vec<_>>()
        };

        assert_eq!(run(99), run(99));
    }

    #[test]
    fn test_replicas_cover_dataset_with_padding() {
        let chunks: Vec<Vec<u32>> = (0..7).map(|i| vec![i]).collect();

        let mut union = Vec::new();
        for rank in 0..3 {
            let reader = InMemoryChunkReader::new(chunks.clone());
            let scheduler =
                Arc::new(RandomChunkScheduler::with_replicas(7, 3, rank).unwrap());
            let mut dataset = ChunkDataset::new(
                reader,
                SequentialExampleSampler::new(),
                scheduler,
                options(1, 1, 2048),
            );
            dataset.reset().unwrap();

            let emitted: Vec<u32> = dataset
                .batches()
                .map(|batch| batch.unwrap()[0])
                .collect();
            assert_eq!(emitted.len(), 3);
            union.extend(emitted);
        }

        for chunk in 0..7u32 {
            assert!(union.contains(&chunk));
        }
    }
}
