// src/dataset/buffer.rs

//! Bounded producer/consumer buffer between preloader threads and the
//! batch consumer.
//!
//! Preloaders push whole chunks; the buffer slices them into uniform
//! batches under its lock, topping up a partial tail batch first so that
//! every consumer-visible batch except the last of the epoch has exactly
//! `batch_size` examples. Reader failures travel through the same queue in
//! FIFO position and are re-raised from `get_batch`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{LoaderError, Result};

use super::traits::ExampleSampler;

/// One queue slot: a sliced batch or a captured worker failure.
enum BufferEntry<E> {
    Batch(Vec<E>),
    Failure(LoaderError),
}

struct BufferState<E> {
    queue: VecDeque<BufferEntry<E>>,
    /// Examples currently held across all queued batches.
    total_examples_in_queue: usize,
    /// Chunks still owed to this buffer; 0 means the epoch is fully loaded.
    remaining_chunk_count: usize,
}

pub(crate) struct BatchBuffer<E, S> {
    state: Mutex<BufferState<E>>,
    readable: Condvar,
    writable: Condvar,
    stop: AtomicBool,
    batch_size: usize,
    cache_size: usize,
    example_sampler: Arc<Mutex<S>>,
}

impl<E, S: ExampleSampler> BatchBuffer<E, S> {
    pub(crate) fn new(
        remaining_chunk_count: usize,
        batch_size: usize,
        cache_size: usize,
        example_sampler: Arc<Mutex<S>>,
    ) -> Self {
        Self {
            state: Mutex::new(BufferState {
                queue: VecDeque::new(),
                total_examples_in_queue: 0,
                remaining_chunk_count,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            stop: AtomicBool::new(false),
            batch_size,
            cache_size,
            example_sampler,
        }
    }

    /// Slice a freshly loaded chunk into batches and enqueue them.
    ///
    /// Blocks while the queue holds `cache_size` or more examples. A single
    /// chunk is always admitted whole once the queue dips below capacity,
    /// so occupancy can momentarily overshoot `cache_size`.
    pub(crate) fn push_chunk(&self, data: Vec<E>) {
        let mut state = self.wait_writable();
        if self.stop.load(Ordering::Relaxed) {
            return;
        }

        let chunk_size = data.len();
        let mut slots: Vec<Option<E>> = data.into_iter().map(Some).collect();
        let mut remaining = chunk_size;

        let mut sampler = self
            .example_sampler
            .lock()
            .expect("example sampler lock poisoned");
        sampler.reset(chunk_size);

        // Top up the tail batch first so mid-epoch batches stay uniform.
        if let Some(BufferEntry::Batch(tail)) = state.queue.back_mut() {
            if tail.len() < self.batch_size {
                let count = remaining.min(self.batch_size - tail.len());
                Self::draw_into(&mut *sampler, &mut slots, count, tail);
                remaining -= count;
            }
        }

        while remaining > 0 {
            let count = remaining.min(self.batch_size);
            let mut batch = Vec::with_capacity(self.batch_size);
            Self::draw_into(&mut *sampler, &mut slots, count, &mut batch);
            remaining -= count;
            state.queue.push_back(BufferEntry::Batch(batch));
        }
        drop(sampler);

        state.total_examples_in_queue += chunk_size;
        assert!(
            state.remaining_chunk_count > 0,
            "chunk pushed after all chunks were accounted for"
        );
        state.remaining_chunk_count -= 1;
        drop(state);
        self.readable.notify_all();
    }

    /// Enqueue a failure captured while loading a chunk. The failure still
    /// consumes the chunk's slot in `remaining_chunk_count`.
    pub(crate) fn push_failure(&self, error: LoaderError) {
        let mut state = self.wait_writable();
        if self.stop.load(Ordering::Relaxed) {
            return;
        }

        state.queue.push_back(BufferEntry::Failure(error));
        assert!(
            state.remaining_chunk_count > 0,
            "failure pushed after all chunks were accounted for"
        );
        state.remaining_chunk_count -= 1;
        drop(state);
        self.readable.notify_all();
    }

    /// Account for an empty chunk without enqueueing anything.
    pub(crate) fn skip_chunk(&self) {
        let mut state = self.state.lock().expect("batch buffer lock poisoned");
        assert!(
            state.remaining_chunk_count > 0,
            "chunk skipped after all chunks were accounted for"
        );
        state.remaining_chunk_count -= 1;
        drop(state);
        self.readable.notify_all();
    }

    /// Dequeue the next batch, or `None` once the epoch is exhausted.
    ///
    /// Blocks until a full batch is available or no more chunks are owed;
    /// the latter is what releases the short tail batch and, finally, the
    /// end-of-epoch sentinel.
    pub(crate) fn get_batch(&self) -> Result<Option<Vec<E>>> {
        let mut state = self.state.lock().expect("batch buffer lock poisoned");
        while state.total_examples_in_queue < self.batch_size && state.remaining_chunk_count > 0 {
            state = self
                .readable
                .wait(state)
                .expect("batch buffer lock poisoned");
        }

        let Some(entry) = state.queue.pop_front() else {
            assert_eq!(
                state.remaining_chunk_count, 0,
                "woke with an empty queue while chunks remain"
            );
            return Ok(None);
        };

        match entry {
            BufferEntry::Failure(error) => {
                drop(state);
                Err(LoaderError::worker(error))
            }
            BufferEntry::Batch(batch) => {
                state.total_examples_in_queue -= batch.len();
                drop(state);
                self.writable.notify_all();
                Ok(Some(batch))
            }
        }
    }

    /// Unblock and turn away all writers so worker threads can terminate.
    /// Queued batches are dropped with the buffer.
    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        // Take the lock so a writer between its capacity check and its wait
        // cannot miss the wakeup.
        drop(self.state.lock().expect("batch buffer lock poisoned"));
        self.writable.notify_all();
    }

    fn wait_writable(&self) -> std::sync::MutexGuard<'_, BufferState<E>> {
        let mut state = self.state.lock().expect("batch buffer lock poisoned");
        while state.total_examples_in_queue >= self.cache_size
            && !self.stop.load(Ordering::Relaxed)
        {
            state = self
                .writable
                .wait(state)
                .expect("batch buffer lock poisoned");
        }
        state
    }

    fn draw_into(sampler: &mut S, slots: &mut [Option<E>], count: usize, batch: &mut Vec<E>) {
        let indices = sampler
            .next(count)
            .expect("example sampler exhausted before its chunk");
        assert_eq!(
            indices.len(),
            count,
            "example sampler returned a short draw"
        );
        for index in indices {
            let example = slots
                .get_mut(index)
                .and_then(Option::take)
                .expect("example sampler produced an out-of-range or duplicate index");
            batch.push(example);
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.total_examples_in_queue, state.remaining_chunk_count)
    }
}
