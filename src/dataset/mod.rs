// src/dataset/mod.rs

//! Chunk-based dataset loading with hierarchical sampling.
//!
//! Large datasets often come pre-partitioned into coarse *chunks*: an
//! audio file, an image shard, a seek range of a text corpus. This module
//! loads such datasets in two sampling stages: a [`ChunkScheduler`] picks
//! which chunks this replica loads (shuffled or sequential, with
//! distributed-rank partitioning), and an [`ExampleSampler`] orders the
//! examples within each loaded chunk. A pool of preloader threads pulls
//! chunks in parallel while the consumer dequeues uniform batches.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chunkflow::dataset::{
//!     ChunkDataset, ChunkReader, InMemoryChunkReader, RandomChunkScheduler,
//!     RandomExampleSampler,
//! };
//! use chunkflow::ChunkDatasetOptions;
//!
//! let reader = InMemoryChunkReader::new(chunks);
//! let scheduler = Arc::new(RandomChunkScheduler::new(reader.chunk_count()));
//! let options = ChunkDatasetOptions::new(4, 32)?;
//!
//! let mut dataset = ChunkDataset::new(
//!     reader,
//!     RandomExampleSampler::new(42),
//!     scheduler,
//!     options,
//! );
//!
//! for epoch in 0..3 {
//!     dataset.reset()?;
//!     for batch in dataset.batches() {
//!         let batch = batch?;
//!         // Train on batch
//!     }
//! }
//! ```

mod buffer;
mod prefetch;
mod sampler;
mod scheduler;
mod traits;

pub use prefetch::{Batches, ChunkDataset};
pub use sampler::{RandomExampleSampler, SequentialExampleSampler};
pub use scheduler::{ChunkScheduler, RandomChunkScheduler, SequentialChunkScheduler};
pub use traits::{ChunkReader, ExampleSampler, InMemoryChunkReader};
