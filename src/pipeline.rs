//! Pipeline composition
//!
//! Connects a source, any number of transform stages and a sink, then drives
//! the composed stream into the sink. Backpressure is the stream's own: the
//! sink pulls only when it is ready, and every stage pulls from its upstream
//! only when it has room.
//!
//! A run ends in exactly one of three ways: completed (final statistics are
//! returned), timed out ([`ChunkFlowError::PipelineTimeout`]) or failed (the
//! first fatal error). Stages and the progress timer are dropped on every
//! exit path.

use crate::common::{
    ChunkFlowError, ProcessingStats, Result, DEFAULT_PIPELINE_TIMEOUT, DEFAULT_PROGRESS_INTERVAL,
};
use crate::stage::{Stage, StageSink, StageStream, TransformStage};
use crate::stats::{StatsHandle, StatsTracker};
use futures::stream::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Callback receiving periodic statistics snapshots
pub type ProgressCallback = Arc<dyn Fn(&ProcessingStats) + Send + Sync>;

/// Configuration options for a pipeline run
#[derive(Clone)]
pub struct PipelineOptions {
    /// Deadline for the whole run; `None` or zero disables it
    pub timeout: Option<Duration>,
    /// Interval between progress callbacks
    pub progress_interval: Duration,
    /// Invoked every `progress_interval` while the run is active
    pub on_progress: Option<ProgressCallback>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_PIPELINE_TIMEOUT),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            on_progress: None,
        }
    }
}

impl fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("timeout", &self.timeout)
            .field("progress_interval", &self.progress_interval)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl PipelineOptions {
    /// Set the run deadline; `None` disables it
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the progress interval
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set the progress callback
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProcessingStats) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Deadline in effect, treating zero as disabled
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }

    /// Reject values that cannot drive a run
    pub fn validate(&self) -> Result<()> {
        if self.progress_interval.is_zero() {
            return Err(ChunkFlowError::InvalidConfig(
                "progress interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Terminal state of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    /// All units reached the sink
    Completed,
    /// The run deadline expired
    TimedOut,
    /// A stage or the sink failed
    Failed,
}

impl PipelineStatus {
    /// Classify the result of a run
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => PipelineStatus::Completed,
            Err(ChunkFlowError::PipelineTimeout(_)) => PipelineStatus::TimedOut,
            Err(_) => PipelineStatus::Failed,
        }
    }
}

/// Builder and driver for one pipeline run
pub struct PipelineComposer {
    stages: Vec<Stage>,
    options: PipelineOptions,
    stats: Arc<StatsTracker>,
}

impl fmt::Debug for PipelineComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineComposer")
            .field("stages", &self.stages)
            .field("options", &self.options)
            .finish()
    }
}

impl PipelineComposer {
    /// Compose `stages` in order: one source, any transforms, one sink
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            options: PipelineOptions::default(),
            stats: StatsTracker::shared(),
        }
    }

    /// Replace the run options
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the run deadline; `None` disables it
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Set the progress callback and its interval
    pub fn on_progress<F>(mut self, interval: Duration, callback: F) -> Self
    where
        F: Fn(&ProcessingStats) + Send + Sync + 'static,
    {
        self.options.progress_interval = interval;
        self.options.on_progress = Some(Arc::new(callback));
        self
    }

    /// Statistics of this run, readable during and after it, including
    /// after a failure
    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle::new(self.stats.clone())
    }

    /// Drive the pipeline to a terminal state
    ///
    /// # Errors
    /// Structural errors are returned before any data flows. Otherwise the
    /// first fatal stage error, or [`ChunkFlowError::PipelineTimeout`].
    pub async fn run(self) -> Result<ProcessingStats> {
        self.options.validate()?;
        let (source, transforms, sink) = assemble(self.stages)?;

        let stats = self.stats;
        stats.reset();

        let names: Vec<&str> = transforms.iter().map(|t| t.name()).collect();
        log::debug!("Starting pipeline: source -> {:?} -> sink", names);

        let mut stream = source;
        for transform in transforms {
            stream = transform.attach(stream, stats.clone());
        }

        let drive = stream.forward(sink);
        tokio::pin!(drive);

        let timeout = self.options.effective_timeout();
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => futures::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let period = self.options.progress_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let on_progress = self.options.on_progress;

        let result = loop {
            tokio::select! {
                biased;
                outcome = &mut drive => break outcome,
                _ = &mut deadline => {
                    break Err(ChunkFlowError::PipelineTimeout(timeout.unwrap_or_default()));
                }
                _ = ticker.tick(), if on_progress.is_some() => {
                    if let Some(callback) = &on_progress {
                        callback(&stats.snapshot());
                    }
                }
            }
        };

        let snapshot = stats.snapshot();
        match result {
            Ok(()) => {
                log::debug!(
                    "Pipeline completed: {} units, {} errors, {} bytes in {:?}",
                    snapshot.processed_chunks,
                    snapshot.errors,
                    snapshot.total_bytes,
                    snapshot.elapsed()
                );
                Ok(snapshot)
            }
            Err(e) => {
                log::warn!(
                    "Pipeline failed after {} units: {}",
                    snapshot.processed_chunks,
                    e
                );
                Err(e)
            }
        }
    }
}

/// Compose and run `stages` with `options`
pub async fn run_pipeline(stages: Vec<Stage>, options: PipelineOptions) -> Result<ProcessingStats> {
    PipelineComposer::new(stages)
        .with_options(options)
        .run()
        .await
}

type Assembled = (StageStream, Vec<Box<dyn TransformStage>>, StageSink);

fn assemble(stages: Vec<Stage>) -> Result<Assembled> {
    let mut stages = stages.into_iter();

    let source = match stages.next() {
        Some(Stage::Source(source)) => source,
        Some(other) => {
            return Err(ChunkFlowError::InvalidPipeline(format!(
                "first stage must be a source, found a {}",
                other.kind()
            )))
        }
        None => {
            return Err(ChunkFlowError::InvalidPipeline(
                "no stages supplied".to_string(),
            ))
        }
    };

    let mut transforms = Vec::new();
    let mut sink = None;
    for stage in stages {
        if sink.is_some() {
            return Err(ChunkFlowError::InvalidPipeline(format!(
                "{} found after the sink",
                stage.kind()
            )));
        }
        match stage {
            Stage::Transform(transform) => transforms.push(transform),
            Stage::Sink(s) => sink = Some(s),
            Stage::Source(_) => {
                return Err(ChunkFlowError::InvalidPipeline(
                    "only the first stage may be a source".to_string(),
                ))
            }
        }
    }

    let sink = sink.ok_or_else(|| {
        ChunkFlowError::InvalidPipeline("last stage must be a sink".to_string())
    })?;

    Ok((source, transforms, sink))
}
