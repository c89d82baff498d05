// src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Dataset error: {message}")]
    Dataset {
        message: String,
    },

    #[error("Failed to read chunk {chunk_index}: {message}")]
    Chunk {
        chunk_index: usize,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Requested batch size {requested} does not match configured batch size {configured}")]
    BatchSizeMismatch {
        requested: usize,
        configured: usize,
    },

    #[error("Preloader worker failed: {source}")]
    Worker {
        #[source]
        source: Box<LoaderError>,
    },
}

pub type Result<T> = std::result::Result<T, LoaderError>;

// Convenience constructors
impl LoaderError {

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn dataset(message: impl Into<String>) -> Self {
        Self::Dataset {
            message: message.into(),
        }
    }

    pub fn chunk(chunk_index: usize, message: impl Into<String>) -> Self {
        Self::Chunk {
            chunk_index,
            message: message.into(),
            source: None,
        }
    }

    pub fn chunk_with_source(
        chunk_index: usize,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Chunk {
            chunk_index,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn batch_size_mismatch(requested: usize, configured: usize) -> Self {
        Self::BatchSizeMismatch {
            requested,
            configured,
        }
    }

    pub fn worker(source: LoaderError) -> Self {
        Self::Worker {
            source: Box::new(source),
        }
    }
}
