// src/lib.rs

//! Chunkflow - Concurrent Chunk-Based Data Loading
//!
//! This crate feeds training pipelines with uniform batches drawn from
//! datasets that are naturally partitioned into chunks. A pool of
//! preloader threads reads chunks in parallel behind a bounded cache, so
//! I/O and deserialization amortise behind computation.
//!
//! The moving parts:
//!
//! - A [`dataset::ChunkReader`] you implement for your on-disk format
//! - A [`dataset::ChunkScheduler`] deciding which chunks this replica
//!   loads, and in what order
//! - An [`dataset::ExampleSampler`] ordering examples within each chunk
//! - [`dataset::ChunkDataset`] tying them into an epoch lifecycle:
//!   `reset()` spawns the preloaders, `get_batch()` dequeues batches until
//!   the end-of-epoch sentinel

pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use config::{ChunkDatasetOptions, LoaderConfig};
pub use error::{LoaderError, Result};

pub mod dataset;
pub use dataset::{
    Batches, ChunkDataset, ChunkReader, ChunkScheduler, ExampleSampler, InMemoryChunkReader,
    RandomChunkScheduler, RandomExampleSampler, SequentialChunkScheduler,
    SequentialExampleSampler,
};
