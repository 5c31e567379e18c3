//! Large file processing
//!
//! Streams a file through a transform stage into an output file with
//! controlled memory usage. Reads, transforms and writes are connected as a
//! pipeline, so a slow writer throttles the reader.

use crate::adapters::{reader_stream, WriterSink};
use crate::common::{
    ChunkFlowError, ProcessingStats, Result, DEFAULT_FILE_CHUNK_SIZE, DEFAULT_FILE_TIMEOUT,
    DEFAULT_PROGRESS_INTERVAL,
};
use crate::pipeline::{PipelineComposer, PipelineOptions, ProgressCallback};
use crate::stage::{Stage, TransformStage};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite};

/// Configuration options for file processing
#[derive(Clone)]
pub struct FileOptions {
    /// Size of each chunk read from the input
    pub chunk_size: usize,
    /// Deadline for the whole run; `None` or zero disables it
    pub timeout: Option<Duration>,
    /// Interval between progress callbacks
    pub progress_interval: Duration,
    /// Invoked every `progress_interval` while the run is active
    pub on_progress: Option<ProgressCallback>,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_FILE_CHUNK_SIZE,
            timeout: Some(DEFAULT_FILE_TIMEOUT),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            on_progress: None,
        }
    }
}

impl fmt::Debug for FileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileOptions")
            .field("chunk_size", &self.chunk_size)
            .field("timeout", &self.timeout)
            .field("progress_interval", &self.progress_interval)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl FileOptions {
    /// Options tuned for large files (1MB chunks)
    pub fn large_file() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            ..Self::default()
        }
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the run deadline; `None` disables it
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the progress callback and its interval
    pub fn on_progress<F>(mut self, interval: Duration, callback: F) -> Self
    where
        F: Fn(&ProcessingStats) + Send + Sync + 'static,
    {
        self.progress_interval = interval;
        self.on_progress = Some(Arc::new(callback));
        self
    }

    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            timeout: self.timeout,
            progress_interval: self.progress_interval,
            on_progress: self.on_progress.clone(),
        }
    }
}

/// Stream `reader` through `transform` into `writer`
///
/// Returns the final statistics once every chunk has been written and the
/// writer shut down.
pub async fn process_stream<R, W, T>(
    reader: R,
    writer: W,
    transform: T,
    options: FileOptions,
) -> Result<ProcessingStats>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + 'static,
    T: TransformStage + 'static,
{
    let stages = vec![
        Stage::Source(reader_stream(reader, options.chunk_size)?),
        Stage::transform(transform),
        Stage::sink(WriterSink::new(writer)),
    ];

    PipelineComposer::new(stages)
        .with_options(options.pipeline_options())
        .run()
        .await
}

/// Process a file from path to path with streaming
///
/// # Errors
/// [`ChunkFlowError::FileAccess`] when the input cannot be opened or the
/// output cannot be created; otherwise any fatal pipeline error, including
/// [`ChunkFlowError::PipelineTimeout`].
pub async fn process_large_file<P1, P2, T>(
    input_path: P1,
    output_path: P2,
    transform: T,
    options: FileOptions,
) -> Result<ProcessingStats>
where
    P1: AsRef<Path>,
    P2: AsRef<Path>,
    T: TransformStage + 'static,
{
    let input_path = input_path.as_ref();
    let output_path = output_path.as_ref();

    let input = File::open(input_path)
        .await
        .map_err(|source| ChunkFlowError::FileAccess {
            path: input_path.to_path_buf(),
            source,
        })?;
    let output = File::create(output_path)
        .await
        .map_err(|source| ChunkFlowError::FileAccess {
            path: output_path.to_path_buf(),
            source,
        })?;

    log::debug!(
        "Processing '{}' into '{}'",
        input_path.display(),
        output_path.display()
    );

    process_stream(input, output, transform, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{OrderedTransform, TransformOptions};
    use bytes::Bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_round_trip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let input_path = dir.path().join("input.txt");
        let output_path = dir.path().join("output.txt");
        std::fs::write(&input_path, b"hello streaming world")?;

        let transform = OrderedTransform::new(
            |data: Bytes, _: usize| async move {
                Ok::<_, String>(Bytes::from(data.to_ascii_uppercase()))
            },
            TransformOptions::default().with_concurrency(3),
        )?;

        let stats = process_large_file(
            &input_path,
            &output_path,
            transform,
            FileOptions::default().with_chunk_size(4),
        )
        .await?;

        assert_eq!(std::fs::read(&output_path)?, b"HELLO STREAMING WORLD");
        assert_eq!(stats.processed_chunks, 6);
        assert_eq!(stats.total_bytes, 21);
        assert_eq!(stats.errors, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_input_reported() {
        let dir = tempdir().unwrap();
        let transform = OrderedTransform::new(
            |data: Bytes, _: usize| async move { Ok::<_, String>(data) },
            TransformOptions::default(),
        )
        .unwrap();

        let result = process_large_file(
            dir.path().join("missing.bin"),
            dir.path().join("out.bin"),
            transform,
            FileOptions::default(),
        )
        .await;

        match result {
            Err(ChunkFlowError::FileAccess { path, .. }) => {
                assert!(path.ends_with("missing.bin"))
            }
            other => panic!("expected FileAccess error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unwritable_output_reported() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        let input_path = dir.path().join("input.bin");
        std::fs::write(&input_path, b"data")?;
        let output_path = dir.path().join("no-such-dir").join("out.bin");

        let transform = OrderedTransform::new(
            |data: Bytes, _: usize| async move { Ok::<_, String>(data) },
            TransformOptions::default(),
        )?;
        let result =
            process_large_file(&input_path, &output_path, transform, FileOptions::default()).await;

        match result {
            Err(ChunkFlowError::FileAccess { path, .. }) => assert_eq!(path, output_path),
            other => panic!("expected FileAccess error, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_run_hits_file_timeout() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        let input_path = dir.path().join("input.bin");
        let output_path = dir.path().join("output.bin");
        std::fs::write(&input_path, [0u8; 10])?;

        let transform = OrderedTransform::new(
            |data: Bytes, _: usize| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, String>(data)
            },
            TransformOptions::default()
                .with_concurrency(1)
                .with_unit_timeout(Duration::from_secs(120)),
        )?;

        let result = process_large_file(
            &input_path,
            &output_path,
            transform,
            FileOptions::default().with_chunk_size(1),
        )
        .await;

        match result {
            Err(ChunkFlowError::PipelineTimeout(limit)) => {
                assert_eq!(limit, DEFAULT_FILE_TIMEOUT)
            }
            other => panic!("expected PipelineTimeout, got {:?}", other),
        }
        Ok(())
    }
}
