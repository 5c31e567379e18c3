//! Common types and constants for the chunk processing engine
//!
//! This module defines the error taxonomy, the default tuning constants and
//! the statistics snapshot shared by the batch runner and the streaming
//! pipeline.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default chunk size for in-memory payload chunking (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default chunk size for file streaming (64 KiB)
pub const DEFAULT_FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of simultaneously in-flight units
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default per-unit timeout
pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a composed pipeline run
pub const DEFAULT_PIPELINE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default timeout for a large-file run
pub const DEFAULT_FILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between progress callbacks
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(1000);

/// Default batch size for [`sequence_to_stream`](crate::adapters::sequence_to_stream)
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Why a single unit did not produce a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitErrorKind {
    /// The processor returned an error
    Failed,
    /// The processor did not settle within the per-unit timeout
    TimedOut,
    /// The processor panicked
    Panicked,
}

/// Error descriptor for one chunk or stream unit
///
/// Unit errors are values: they are reported in place of the unit's result
/// and never abort the surrounding batch or stream on their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitError {
    /// Sequence index of the failed unit
    pub index: usize,
    /// Human readable failure description
    pub message: String,
    /// Failure category
    pub kind: UnitErrorKind,
}

impl UnitError {
    /// Create an error for a processor that returned a failure
    pub fn failed(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
            kind: UnitErrorKind::Failed,
        }
    }

    /// Create an error for a unit that exceeded its timeout
    pub fn timed_out(index: usize, timeout: Duration) -> Self {
        Self {
            index,
            message: format!("chunk {index} timed out after {timeout:?}"),
            kind: UnitErrorKind::TimedOut,
        }
    }

    /// Create an error for a processor that panicked
    pub fn panicked(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
            kind: UnitErrorKind::Panicked,
        }
    }

    /// Whether this unit failed because of its timeout
    pub fn is_timeout(&self) -> bool {
        self.kind == UnitErrorKind::TimedOut
    }
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit {}: {}", self.index, self.message)
    }
}

impl std::error::Error for UnitError {}

/// Error type for chunk processing operations
#[derive(Debug, Error)]
pub enum ChunkFlowError {
    /// Invalid option value, rejected before any processing starts
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Stage list does not form source -> transforms -> sink
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// The whole run exceeded its deadline
    #[error("Pipeline timed out after {0:?}")]
    PipelineTimeout(Duration),

    /// A unit error escalated to a run-fatal failure
    #[error("Unit failure aborted the run: {0}")]
    UnitFailed(UnitError),

    /// An input or output file could not be opened
    #[error("Cannot access '{}': {source}", path.display())]
    FileAccess {
        /// Offending path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for chunk processing operations
pub type Result<T> = std::result::Result<T, ChunkFlowError>;

/// Immutable snapshot of processing statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStats {
    /// Units that settled, successfully or not
    pub processed_chunks: usize,
    /// Bytes of successfully processed units
    pub total_bytes: u64,
    /// Sum of per-unit processing durations (not elapsed wall time)
    pub processing_time: Duration,
    /// Units that failed, timed out or panicked
    pub errors: usize,
    /// When the run started
    pub start_time: Instant,
}

impl ProcessingStats {
    /// Wall-clock time since the run started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Units that produced a result
    pub fn success_count(&self) -> usize {
        self.processed_chunks.saturating_sub(self.errors)
    }

    /// Mean processing time per settled unit
    pub fn average_chunk_time(&self) -> Duration {
        if self.processed_chunks == 0 {
            return Duration::ZERO;
        }
        self.processing_time.div_f64(self.processed_chunks as f64)
    }

    /// Successful bytes per second of elapsed wall time
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.total_bytes as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_error_kinds() {
        let err = UnitError::timed_out(3, Duration::from_millis(50));
        assert!(err.is_timeout());
        assert_eq!(err.index, 3);
        assert!(err.to_string().contains("timed out"));

        let err = UnitError::failed(1, "boom");
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "unit 1: boom");
    }

    #[test]
    fn test_stats_derived_values() {
        let stats = ProcessingStats {
            processed_chunks: 4,
            total_bytes: 300,
            processing_time: Duration::from_millis(400),
            errors: 1,
            start_time: Instant::now(),
        };
        assert_eq!(stats.success_count(), 3);
        let average = stats.average_chunk_time();
        assert!(average.abs_diff(Duration::from_millis(100)) < Duration::from_micros(1));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_average_beyond_u32_units() {
        let stats = ProcessingStats {
            processed_chunks: 1 << 32,
            total_bytes: 0,
            processing_time: Duration::from_secs(1 << 32),
            errors: 0,
            start_time: Instant::now(),
        };
        let average = stats.average_chunk_time();
        assert!(average.abs_diff(Duration::from_secs(1)) < Duration::from_millis(1));
    }

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_CHUNK_SIZE, 1_048_576);
        assert_eq!(DEFAULT_FILE_CHUNK_SIZE, 65_536);
        assert_eq!(DEFAULT_CONCURRENCY, 4);
        assert_eq!(DEFAULT_UNIT_TIMEOUT, Duration::from_secs(30));
        assert_eq!(DEFAULT_PIPELINE_TIMEOUT, Duration::from_secs(300));
    }
}
