//! Batch chunk processing
//!
//! This module splits an in-memory buffer into chunks and runs a caller
//! supplied async processor over them with a concurrency ceiling and a
//! per-chunk timeout. Results come back in chunk order.

use crate::chunk::{split_chunks, Chunk};
use crate::common::{
    ChunkFlowError, ProcessingStats, Result, UnitError, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY,
    DEFAULT_FILE_CHUNK_SIZE, DEFAULT_UNIT_TIMEOUT,
};
use crate::stats::{StatsHandle, StatsTracker};
use crate::unit::run_unit;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Settled result of one chunk: the processor's value or a unit error
pub type ChunkOutcome<T> = std::result::Result<T, UnitError>;

/// Configuration options for batch processing
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Target size of each chunk
    pub chunk_size: usize,
    /// Maximum number of processor calls in flight
    pub concurrency: usize,
    /// Time allowed for a single chunk
    pub chunk_timeout: Duration,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            chunk_timeout: DEFAULT_UNIT_TIMEOUT,
        }
    }
}

impl ChunkOptions {
    /// Options tuned for file-sized streaming chunks (64KB)
    pub fn file() -> Self {
        Self {
            chunk_size: DEFAULT_FILE_CHUNK_SIZE,
            ..Self::default()
        }
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the concurrency limit
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit;
        self
    }

    /// Set the per-chunk timeout
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Reject values that cannot drive a run
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ChunkFlowError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ChunkFlowError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.chunk_timeout.is_zero() {
            return Err(ChunkFlowError::InvalidConfig(
                "chunk timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Concurrent chunk processor with order-preserving results
#[derive(Debug)]
pub struct ChunkRunner {
    options: ChunkOptions,
    stats: Arc<StatsTracker>,
}

impl ChunkRunner {
    /// Create a runner with default settings
    pub fn new() -> Self {
        Self::with_options(ChunkOptions::default())
    }

    /// Create a runner from explicit options
    pub fn with_options(options: ChunkOptions) -> Self {
        Self {
            options,
            stats: StatsTracker::shared(),
        }
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.options = self.options.with_chunk_size(size);
        self
    }

    /// Set the concurrency limit
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.options = self.options.with_concurrency(limit);
        self
    }

    /// Set the per-chunk timeout
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_chunk_timeout(timeout);
        self
    }

    /// Current options
    pub fn options(&self) -> &ChunkOptions {
        &self.options
    }

    /// Process `buffer` chunk by chunk
    ///
    /// The returned vector has one outcome per chunk, in chunk order. A
    /// failing, panicking or timed out chunk yields an `Err(UnitError)` at
    /// its position and does not affect its siblings. Statistics are reset
    /// when the call starts.
    ///
    /// # Errors
    /// Only invalid options are reported as an error.
    pub async fn process<B, F, Fut, T, E>(
        &mut self,
        buffer: B,
        processor: F,
    ) -> Result<Vec<ChunkOutcome<T>>>
    where
        B: Into<Bytes>,
        F: Fn(Bytes, usize) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.options.validate()?;
        let buffer = buffer.into();
        let chunks = split_chunks(&buffer, self.options.chunk_size)?;

        self.stats.reset();
        log::debug!(
            "Processing {} bytes as {} chunks (concurrency {}, timeout {:?})",
            buffer.len(),
            chunks.len(),
            self.options.concurrency,
            self.options.chunk_timeout
        );

        let stats = self.stats.as_ref();
        let processor = &processor;
        let timeout = self.options.chunk_timeout;

        // `buffered` polls at most `concurrency` chunk futures and yields
        // them in submission order.
        let outcomes = stream::iter(chunks.into_iter().map(move |chunk| async move {
            let Chunk { index, data } = chunk;
            let len = data.len();
            run_unit(index, len, async move { processor(data, index).await }, timeout, stats).await
        }))
        .buffered(self.options.concurrency)
        .collect::<Vec<_>>()
        .await;

        let summary = self.stats.snapshot();
        log::debug!(
            "Batch finished: {} chunks, {} errors, {} bytes in {:?}",
            summary.processed_chunks,
            summary.errors,
            summary.total_bytes,
            summary.elapsed()
        );

        Ok(outcomes)
    }

    /// Snapshot of the statistics of the latest run
    pub fn stats(&self) -> ProcessingStats {
        self.stats.snapshot()
    }

    /// Read-only handle for observing statistics while a run is in progress
    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle::new(self.stats.clone())
    }
}

impl Default for ChunkRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Process a buffer in chunks with a fresh runner
pub async fn process_in_chunks<B, F, Fut, T, E>(
    buffer: B,
    processor: F,
    options: ChunkOptions,
) -> Result<Vec<ChunkOutcome<T>>>
where
    B: Into<Bytes>,
    F: Fn(Bytes, usize) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    ChunkRunner::with_options(options)
        .process(buffer, processor)
        .await
}
