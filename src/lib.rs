//! ChunkFlow - chunked stream processing with bounded concurrency
//!
//! This crate splits large binary payloads into bounded-size chunks, runs a
//! caller supplied async processor over them with a concurrency ceiling and
//! per-unit timeouts, and reassembles the results in their original order.
//!
//! # Features
//!
//! - Batch mode: process an in-memory buffer, get one ordered outcome per chunk
//! - Streaming mode: compose sources, transforms and sinks into a pipeline
//!   with native backpressure, a run deadline and periodic progress reports
//! - Order-preserving concurrent transform stage
//! - Throttle and progress passthrough stages
//! - Per-run statistics: units, bytes, processing time, errors
//! - Failed or timed out units are reported in place, never abort the batch
//!
//! # Example - Batch Mode
//!
//! ```no_run
//! use chunkflow::{process_in_chunks, ChunkOptions};
//!
//! # async fn run() -> chunkflow::Result<()> {
//! let pdf = std::fs::read("scan.pdf")?;
//! let outcomes = process_in_chunks(
//!     pdf,
//!     |chunk, index| async move { Ok::<_, String>(format!("{index}: {} bytes", chunk.len())) },
//!     ChunkOptions::default().with_concurrency(2),
//! )
//! .await?;
//!
//! for outcome in outcomes {
//!     match outcome {
//!         Ok(text) => println!("{text}"),
//!         Err(e) => eprintln!("{e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Streaming Mode
//!
//! ```no_run
//! use bytes::Bytes;
//! use chunkflow::{
//!     collect_stream, create_transform_stage, run_pipeline, sequence_to_stream, PipelineOptions,
//!     SequenceOptions, Stage, TransformOptions,
//! };
//!
//! # async fn run() -> chunkflow::Result<()> {
//! let pages = vec!["page one", "page two", "page three"];
//! let (sink, collected) = collect_stream();
//!
//! let stats = run_pipeline(
//!     vec![
//!         Stage::Source(sequence_to_stream(pages, SequenceOptions::default())?),
//!         create_transform_stage(
//!             |page: Bytes, _| async move { Ok::<_, String>(Bytes::from(page.to_ascii_uppercase())) },
//!             TransformOptions::default(),
//!         )?,
//!         Stage::sink(sink),
//!     ],
//!     PipelineOptions::default(),
//! )
//! .await?;
//!
//! assert_eq!(collected.len(), 3);
//! println!("{} units in {:?}", stats.processed_chunks, stats.elapsed());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

// Public modules
pub mod adapters;
pub mod chunk;
pub mod common;
pub mod error;
pub mod file;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod stage;
pub mod stats;
pub mod throttle;
pub mod transform;

mod unit;

// Re-export commonly used types
pub use adapters::{
    collect_stream, reader_stream, sequence_to_stream, CollectSink, Collected, SequenceOptions,
    WriterSink,
};
pub use chunk::{split_chunks, Chunk};
pub use common::{
    ChunkFlowError, ProcessingStats, Result, UnitError, UnitErrorKind, DEFAULT_CHUNK_SIZE,
    DEFAULT_CONCURRENCY, DEFAULT_FILE_CHUNK_SIZE, DEFAULT_PIPELINE_TIMEOUT, DEFAULT_UNIT_TIMEOUT,
};
pub use file::{process_large_file, process_stream, FileOptions};
pub use pipeline::{run_pipeline, PipelineComposer, PipelineOptions, PipelineStatus};
pub use progress::ProgressStage;
pub use runner::{process_in_chunks, ChunkOptions, ChunkOutcome, ChunkRunner};
pub use stage::{Stage, StageItem, StageStream, TransformStage};
pub use stats::{StatsHandle, StatsTracker};
pub use throttle::ThrottleStage;
pub use transform::{create_transform_stage, OrderedTransform, TransformOptions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        // Test that common types are accessible
        let _ = ChunkOptions::default();
        let _ = TransformOptions::default();
        let _ = PipelineOptions::default();

        // Test that functions are accessible
        let chunks = split_chunks(&bytes::Bytes::from_static(b"test"), 2).unwrap();
        assert_eq!(chunks.len(), 2);
    }
}
