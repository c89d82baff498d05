// src/dataset/traits.rs

use crate::error::{LoaderError, Result};

/// Reads whole chunks of a dataset.
///
/// A chunk is the coarse unit the dataset is partitioned into: an entire
/// file (an audio clip, an image shard) or a seek range of a larger file.
/// Readers deliver already-parsed examples; file formats, endianness and
/// tensor allocation are the reader's concern, not the engine's.
///
/// `read_chunk` is called concurrently from preloader threads on a shared
/// instance, so implementations must be immutable after construction or
/// internally synchronised.
pub trait ChunkReader: Send + Sync {
    /// The example type a chunk decomposes into.
    type Example: Send + 'static;

    /// Read the chunk at `chunk_index` and return all of its examples.
    fn read_chunk(&self, chunk_index: usize) -> Result<Vec<Self::Example>>;

    /// Total number of chunks this reader can produce.
    fn chunk_count(&self) -> usize;

    /// Clear any reader-internal state between epochs.
    fn reset(&self) {}
}

/// Draws example indices for batch assembly.
///
/// The buffer arms the sampler with `reset(n)` once per chunk and then
/// draws index groups with `next(k)` until the chunk is consumed. Whether
/// draws are with or without replacement is up to the implementation; the
/// engine only requires that a draw of `k` yields `k` distinct in-range
/// indices while examples remain.
pub trait ExampleSampler: Send {
    /// Arm the sampler to draw indices over `[0, example_count)`.
    fn reset(&mut self, example_count: usize);

    /// Draw up to `count` indices, or `None` if the sampler is exhausted.
    fn next(&mut self, count: usize) -> Option<Vec<usize>>;
}

impl<T: ExampleSampler + ?Sized> ExampleSampler for Box<T> {
    fn reset(&mut self, example_count: usize) {
        (**self).reset(example_count)
    }

    fn next(&mut self, count: usize) -> Option<Vec<usize>> {
        (**self).next(count)
    }
}

/// A `ChunkReader` over pre-materialised chunks.
///
/// Useful for tests and for small datasets that fit in memory. Chunks are
/// cloned on read so the reader can serve any number of epochs.
#[derive(Debug, Clone)]
pub struct InMemoryChunkReader<E> {
    chunks: Vec<Vec<E>>,
}

impl<E> InMemoryChunkReader<E> {
    pub fn new(chunks: Vec<Vec<E>>) -> Self {
        Self { chunks }
    }
}

impl<E> ChunkReader for InMemoryChunkReader<E>
where
    E: Clone + Send + Sync + 'static,
{
    type Example = E;

    fn read_chunk(&self, chunk_index: usize) -> Result<Vec<E>> {
        self.chunks
            .get(chunk_index)
            .cloned()
            .ok_or_else(|| LoaderError::chunk(chunk_index, "chunk index out of range"))
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}
