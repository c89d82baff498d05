// src/config.rs

//! Configuration for the chunk-loading engine.
//!
//! This module provides the validated `ChunkDatasetOptions` record consumed
//! by `ChunkDataset`, plus `LoaderConfig`: a TOML-backed configuration with
//! environment variable overrides that can manufacture the matching
//! scheduler and example sampler.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dataset::{
    ChunkScheduler, ExampleSampler, RandomChunkScheduler, RandomExampleSampler,
    SequentialChunkScheduler, SequentialExampleSampler,
};
use crate::error::{LoaderError, Result};

/// Default capacity of the batch cache, in examples.
pub const DEFAULT_CACHE_SIZE: usize = 2048;

/// Validated options for a `ChunkDataset`. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDatasetOptions {
    preloader_count: usize,
    batch_size: usize,
    cache_size: usize,
}

impl ChunkDatasetOptions {
    /// Options with the default cache size.
    ///
    /// # Errors
    ///
    /// Returns an error unless `preloader_count > 0` and `batch_size > 0`.
    pub fn new(preloader_count: usize, batch_size: usize) -> Result<Self> {
        Self::with_cache_size(preloader_count, batch_size, DEFAULT_CACHE_SIZE)
    }

    /// Options with an explicit cache size.
    ///
    /// # Errors
    ///
    /// Returns an error unless `preloader_count > 0`, `batch_size > 0`,
    /// `cache_size > 0` and `cache_size >= batch_size` (the cache must be
    /// able to hold at least one full batch).
    pub fn with_cache_size(
        preloader_count: usize,
        batch_size: usize,
        cache_size: usize,
    ) -> Result<Self> {
        if preloader_count == 0 {
            return Err(LoaderError::config(
                "preloader_count must be greater than 0",
            ));
        }
        if batch_size == 0 {
            return Err(LoaderError::config("batch_size must be greater than 0"));
        }
        if cache_size == 0 {
            return Err(LoaderError::config("cache_size must be greater than 0"));
        }
        if cache_size < batch_size {
            return Err(LoaderError::config(format!(
                "cache_size ({cache_size}) must be at least batch_size ({batch_size})"
            )));
        }
        Ok(Self {
            preloader_count,
            batch_size,
            cache_size,
        })
    }

    /// Number of preloader worker threads.
    pub fn preloader_count(&self) -> usize {
        self.preloader_count
    }

    /// Number of examples per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Capacity of the batch cache, in examples.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }
}

// Top-level loader configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub loader: LoaderSection,
    pub sampling: SamplingConfig,
}

/// Worker and batching knobs; mirrors `ChunkDatasetOptions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSection {
    // Number of preloader worker threads.
    pub preloader_count: usize,
    // Number of examples per batch.
    pub batch_size: usize,
    // Capacity of the batch cache, in examples.
    pub cache_size: usize,
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            preloader_count: 4,
            batch_size: 32,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// Chunk and example ordering, plus the replica layout for distributed runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    // Shuffle the chunk order each epoch (epoch-seeded, replica-consistent).
    pub shuffle_chunks: bool,
    // Shuffle examples within each chunk.
    pub shuffle_examples: bool,
    // Seed for the example sampler.
    pub seed: u64,
    // Total number of replicas in distributed training.
    pub num_replicas: usize,
    // This replica's rank, in [0, num_replicas).
    pub rank: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            shuffle_chunks: true,
            shuffle_examples: true,
            seed: 0,
            num_replicas: 1,
            rank: 0,
        }
    }
}

impl FromStr for LoaderConfig {
    type Err = LoaderError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| LoaderError::config_with_source("failed to parse TOML config", e))
    }
}

impl LoaderConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed, or if the
    // parsed values fail validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::config_with_source(
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Variables are prefixed with `CHUNKFLOW_`:
    // - `CHUNKFLOW_PRELOADER_COUNT`, `CHUNKFLOW_BATCH_SIZE`,
    //   `CHUNKFLOW_CACHE_SIZE` override the `[loader]` section
    // - `CHUNKFLOW_SHUFFLE_CHUNKS`, `CHUNKFLOW_SHUFFLE_EXAMPLES`,
    //   `CHUNKFLOW_SEED`, `CHUNKFLOW_NUM_REPLICAS`, `CHUNKFLOW_RANK`
    //   override the `[sampling]` section
    //
    // Values that fail to parse are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("CHUNKFLOW_PRELOADER_COUNT") {
            if let Ok(v) = val.parse() {
                self.loader.preloader_count = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNKFLOW_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.loader.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNKFLOW_CACHE_SIZE") {
            if let Ok(v) = val.parse() {
                self.loader.cache_size = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNKFLOW_SHUFFLE_CHUNKS") {
            if let Ok(v) = val.parse() {
                self.sampling.shuffle_chunks = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNKFLOW_SHUFFLE_EXAMPLES") {
            if let Ok(v) = val.parse() {
                self.sampling.shuffle_examples = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNKFLOW_SEED") {
            if let Ok(v) = val.parse() {
                self.sampling.seed = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNKFLOW_NUM_REPLICAS") {
            if let Ok(v) = val.parse() {
                self.sampling.num_replicas = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNKFLOW_RANK") {
            if let Ok(v) = val.parse() {
                self.sampling.rank = v;
            }
        }
        self
    }

    // Validate all configuration values.
    pub fn validate(&self) -> Result<()> {
        self.dataset_options()?;

        if self.sampling.num_replicas == 0 {
            return Err(LoaderError::config("num_replicas must be greater than 0"));
        }
        if self.sampling.rank >= self.sampling.num_replicas {
            return Err(LoaderError::config(format!(
                "rank {} out of range for {} replicas",
                self.sampling.rank, self.sampling.num_replicas
            )));
        }
        Ok(())
    }

    /// The validated options record for `ChunkDataset`.
    pub fn dataset_options(&self) -> Result<ChunkDatasetOptions> {
        ChunkDatasetOptions::with_cache_size(
            self.loader.preloader_count,
            self.loader.batch_size,
            self.loader.cache_size,
        )
    }

    /// Build the configured chunk scheduler for a reader with `chunk_count`
    /// chunks.
    pub fn chunk_scheduler(&self, chunk_count: usize) -> Result<Arc<dyn ChunkScheduler>> {
        let sampling = &self.sampling;
        let scheduler: Arc<dyn ChunkScheduler> = if sampling.shuffle_chunks {
            Arc::new(RandomChunkScheduler::with_replicas(
                chunk_count,
                sampling.num_replicas,
                sampling.rank,
            )?)
        } else {
            Arc::new(SequentialChunkScheduler::with_replicas(
                chunk_count,
                sampling.num_replicas,
                sampling.rank,
            )?)
        };
        Ok(scheduler)
    }

    /// Build the configured example sampler.
    pub fn example_sampler(&self) -> Box<dyn ExampleSampler> {
        if self.sampling.shuffle_examples {
            Box::new(RandomExampleSampler::new(self.sampling.seed))
        } else {
            Box::new(SequentialExampleSampler::new())
        }
    }
}
