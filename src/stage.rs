//! Pipeline stage vocabulary
//!
//! Units travel between stages as [`StageItem`]s inside a [`StageStream`].
//! The outer `Result` of a stream item carries run-fatal errors; the inner
//! one carries per-unit outcomes, so a failed unit keeps its position in the
//! stream without ending it.

use crate::common::{ChunkFlowError, Result, UnitError};
use crate::stats::StatsTracker;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use futures::Sink;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

/// One unit flowing through a pipeline: payload or unit error
pub type StageItem = std::result::Result<Bytes, UnitError>;

/// Stream of units between two stages
pub type StageStream = BoxStream<'static, Result<StageItem>>;

/// Type-erased pipeline sink
pub type StageSink = Pin<Box<dyn Sink<StageItem, Error = ChunkFlowError> + Send>>;

/// Payload length of a unit; failed units count as zero bytes
pub fn item_len(item: &StageItem) -> usize {
    item.as_ref().map(Bytes::len).unwrap_or(0)
}

/// A stage that sits between a source and a sink
///
/// `attach` consumes the stage and wraps the upstream stream. Stages that
/// execute units record them in `stats`, the tracker owned by the run.
pub trait TransformStage: Send {
    /// Short name used in log output
    fn name(&self) -> &'static str;

    /// Wrap `upstream`, producing this stage's output stream
    fn attach(self: Box<Self>, upstream: StageStream, stats: Arc<StatsTracker>) -> StageStream;
}

/// One element of a composed pipeline
pub enum Stage {
    /// Produces units
    Source(StageStream),
    /// Transforms units
    Transform(Box<dyn TransformStage>),
    /// Consumes units
    Sink(StageSink),
}

impl Stage {
    /// Wrap a stream of stage items as a source
    pub fn source<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<StageItem>> + Send + 'static,
    {
        Stage::Source(stream.boxed())
    }

    /// Wrap a stream of plain payloads as a source
    pub fn bytes_source<S>(stream: S) -> Self
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        Stage::Source(stream.map(|data| Ok(Ok(data))).boxed())
    }

    /// Wrap a transform stage
    pub fn transform<T>(stage: T) -> Self
    where
        T: TransformStage + 'static,
    {
        Stage::Transform(Box::new(stage))
    }

    /// Wrap a sink
    pub fn sink<S>(sink: S) -> Self
    where
        S: Sink<StageItem, Error = ChunkFlowError> + Send + 'static,
    {
        Stage::Sink(Box::pin(sink))
    }

    /// Role of this stage, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Stage::Source(_) => "source",
            Stage::Transform(_) => "transform",
            Stage::Sink(_) => "sink",
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Transform(t) => write!(f, "Stage::Transform({})", t.name()),
            other => write!(f, "Stage::{}", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_len() {
        assert_eq!(item_len(&Ok(Bytes::from_static(b"abc"))), 3);
        assert_eq!(item_len(&Err(UnitError::failed(0, "x"))), 0);
    }

    #[test]
    fn test_stage_kind() {
        let stage = Stage::bytes_source(futures::stream::empty());
        assert_eq!(stage.kind(), "source");
        assert_eq!(format!("{:?}", stage), "Stage::source");
    }
}
