// src/dataset/scheduler.rs

//! Chunk schedulers: which chunks a replica loads, and in what order.
//!
//! A scheduler produces a thread-safe stream of chunk indices for one
//! replica and one epoch. In distributed training each replica owns a
//! contiguous slice of the (possibly shuffled) chunk sequence; when
//! `chunk_count` does not divide evenly, early chunks are re-used as
//! padding so every replica emits the same number of chunks per epoch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{LoaderError, Result};

/// A thread-safe source of chunk indices for one replica.
///
/// `next()` is called concurrently by every preloader thread; `reset()` and
/// `set_epoch()` are only called between epochs, while no workers run.
pub trait ChunkScheduler: Send + Sync {
    /// The next chunk index to load, or `None` once this replica's
    /// assignment for the current epoch is exhausted.
    fn next(&self) -> Option<usize>;

    /// Reinitialise for a new enumeration of the current epoch.
    fn reset(&self);

    /// Record the epoch prior to `reset()`; shuffling schedulers derive
    /// their ordering from it.
    fn set_epoch(&self, epoch: usize);

    /// Number of chunks this replica emits per epoch,
    /// `ceil(chunk_count / num_replicas)`.
    fn local_chunk_count(&self) -> usize;
}

fn validate_replicas(num_replicas: usize, rank: usize) -> Result<()> {
    if num_replicas == 0 {
        return Err(LoaderError::config("num_replicas must be greater than 0"));
    }
    if rank >= num_replicas {
        return Err(LoaderError::config(format!(
            "rank {rank} out of range for {num_replicas} replicas"
        )));
    }
    Ok(())
}

/// Emits this replica's chunk slice in ascending order.
#[derive(Debug)]
pub struct SequentialChunkScheduler {
    chunk_count: usize,
    begin_index: usize,
    end_index: usize,
    cursor: AtomicUsize,
}

impl SequentialChunkScheduler {
    /// Single-replica scheduler over `chunk_count` chunks.
    pub fn new(chunk_count: usize) -> Self {
        Self {
            chunk_count,
            begin_index: 0,
            end_index: chunk_count,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Scheduler for `rank` out of `num_replicas` replicas.
    pub fn with_replicas(chunk_count: usize, num_replicas: usize, rank: usize) -> Result<Self> {
        validate_replicas(num_replicas, rank)?;
        let local_chunk_count = chunk_count.div_ceil(num_replicas);
        let begin_index = rank * local_chunk_count;
        Ok(Self {
            chunk_count,
            begin_index,
            end_index: begin_index + local_chunk_count,
            cursor: AtomicUsize::new(begin_index),
        })
    }
}

impl ChunkScheduler for SequentialChunkScheduler {
    fn next(&self) -> Option<usize> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        if index < self.end_index {
            // Indices past chunk_count wrap around: that is the padding
            // which keeps all replicas at the same chunk count.
            Some(index % self.chunk_count)
        } else {
            None
        }
    }

    fn reset(&self) {
        self.cursor.store(self.begin_index, Ordering::Relaxed);
    }

    fn set_epoch(&self, _epoch: usize) {
        // Sequential order is the same every epoch.
    }

    fn local_chunk_count(&self) -> usize {
        self.end_index - self.begin_index
    }
}

/// Emits this replica's chunk slice in an epoch-seeded shuffled order.
///
/// Every replica shuffles the same underlying sequence with the same
/// epoch-derived seed and then takes its own contiguous slice, so the
/// slices partition the shuffled sequence without any coordination.
pub struct RandomChunkScheduler {
    base_indices: Vec<usize>,
    local_chunk_count: usize,
    rank: usize,
    epoch: AtomicUsize,
    // Written only by reset() between epochs; next() takes the read side.
    local_indices: RwLock<Vec<usize>>,
    cursor: AtomicUsize,
}

impl RandomChunkScheduler {
    /// Single-replica scheduler over `chunk_count` chunks.
    pub fn new(chunk_count: usize) -> Self {
        let scheduler = Self {
            base_indices: (0..chunk_count).collect(),
            local_chunk_count: chunk_count,
            rank: 0,
            epoch: AtomicUsize::new(0),
            local_indices: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        };
        scheduler.reset();
        scheduler
    }

    /// Scheduler for `rank` out of `num_replicas` replicas.
    ///
    /// The scheduler comes out primed for epoch 0; call `set_epoch` and
    /// `reset` to move to a different epoch.
    pub fn with_replicas(chunk_count: usize, num_replicas: usize, rank: usize) -> Result<Self> {
        validate_replicas(num_replicas, rank)?;
        let local_chunk_count = chunk_count.div_ceil(num_replicas);

        let base_indices: Vec<usize> = if num_replicas == 1 {
            (0..chunk_count).collect()
        } else {
            // Pad with wrapped indices so every replica's slice has the
            // same length.
            (0..local_chunk_count * num_replicas)
                .map(|i| i % chunk_count)
                .collect()
        };

        let scheduler = Self {
            base_indices,
            local_chunk_count,
            rank,
            epoch: AtomicUsize::new(0),
            local_indices: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        };
        scheduler.reset();
        Ok(scheduler)
    }
}

impl ChunkScheduler for RandomChunkScheduler {
    fn next(&self) -> Option<usize> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        let local = self.local_indices.read().expect("scheduler lock poisoned");
        local.get(index).copied()
    }

    fn reset(&self) {
        let epoch = self.epoch.load(Ordering::Relaxed);
        let mut shuffled = self.base_indices.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(epoch as u64));

        let begin = self.rank * self.local_chunk_count;
        let end = begin + self.local_chunk_count;
        let mut local = self.local_indices.write().expect("scheduler lock poisoned");
        local.clear();
        local.extend_from_slice(&shuffled[begin..end]);
        drop(local);
        self.cursor.store(0, Ordering::Relaxed);
    }

    fn set_epoch(&self, epoch: usize) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }

    fn local_chunk_count(&self) -> usize {
        self.local_chunk_count
    }
}
