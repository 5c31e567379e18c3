//! Order-preserving concurrent transform stage
//!
//! [`OrderedTransform`] runs a processor over a continuous stream of units
//! with a concurrency ceiling and a per-unit timeout, and emits results in
//! admission order even when units settle out of order.
//!
//! Each admitted unit gets an increasing input index. Settled results wait in
//! an index-keyed reorder buffer until every unit before them has been
//! emitted. New input is pulled from upstream only while the number of
//! unresolved plus buffered units is below the ceiling, so a full window
//! stops polling the source: that is the backpressure signal.

use crate::common::{ChunkFlowError, Result, DEFAULT_CONCURRENCY, DEFAULT_UNIT_TIMEOUT};
use crate::stage::{Stage, StageItem, StageStream, TransformStage};
use crate::stats::StatsTracker;
use crate::unit::run_unit;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{Fuse, FuturesUnordered, Stream, StreamExt};
use futures::FutureExt;
use pin_project::pin_project;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Configuration options for the ordered transform
#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Maximum number of units in flight or awaiting emission
    pub concurrency: usize,
    /// Time allowed for a single unit
    pub unit_timeout: Duration,
    /// Fail the whole stage on the first unit error
    pub fail_fast: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
            fail_fast: false,
        }
    }
}

impl TransformOptions {
    /// Set the concurrency ceiling
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit;
        self
    }

    /// Set the per-unit timeout
    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = timeout;
        self
    }

    /// Enable or disable fail-fast behavior
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Reject values that cannot drive a stage
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ChunkFlowError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.unit_timeout.is_zero() {
            return Err(ChunkFlowError::InvalidConfig(
                "unit timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Transform stage wrapping a `(payload, index) -> payload` processor
pub struct OrderedTransform<P> {
    processor: Arc<P>,
    options: TransformOptions,
}

impl<P> fmt::Debug for OrderedTransform<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedTransform")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<P, Fut, E> OrderedTransform<P>
where
    P: Fn(Bytes, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send,
{
    /// Create a transform, validating its options
    pub fn new(processor: P, options: TransformOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            processor: Arc::new(processor),
            options,
        })
    }

    /// Wrap `upstream` directly, outside of a composed pipeline
    pub fn apply<S>(self, upstream: S, stats: Arc<StatsTracker>) -> OrderedStream<S, P>
    where
        S: Stream<Item = Result<StageItem>>,
    {
        OrderedStream {
            upstream: upstream.fuse(),
            processor: self.processor,
            options: self.options,
            stats,
            in_flight: FuturesUnordered::new(),
            completed: BTreeMap::new(),
            next_input: 0,
            next_output: 0,
            upstream_done: false,
            terminated: false,
        }
    }
}

impl<P, Fut, E> TransformStage for OrderedTransform<P>
where
    P: Fn(Bytes, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send,
{
    fn name(&self) -> &'static str {
        "ordered-transform"
    }

    fn attach(self: Box<Self>, upstream: StageStream, stats: Arc<StatsTracker>) -> StageStream {
        Box::pin((*self).apply(upstream, stats))
    }
}

/// Build an ordered transform ready to be placed in a pipeline
pub fn create_transform_stage<P, Fut, E>(processor: P, options: TransformOptions) -> Result<Stage>
where
    P: Fn(Bytes, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send,
{
    Ok(Stage::transform(OrderedTransform::new(processor, options)?))
}

type UnitFuture = BoxFuture<'static, (usize, StageItem)>;

/// Stream produced by [`OrderedTransform::apply`]
#[pin_project]
pub struct OrderedStream<S, P> {
    #[pin]
    upstream: Fuse<S>,
    processor: Arc<P>,
    options: TransformOptions,
    stats: Arc<StatsTracker>,
    in_flight: FuturesUnordered<UnitFuture>,
    completed: BTreeMap<usize, StageItem>,
    next_input: usize,
    next_output: usize,
    upstream_done: bool,
    terminated: bool,
}

impl<S, P> OrderedStream<S, P> {
    /// Units currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Settled units waiting for an earlier unit to be emitted
    pub fn awaiting_emission(&self) -> usize {
        self.completed.len()
    }
}

impl<S, P> fmt::Debug for OrderedStream<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedStream")
            .field("in_flight", &self.in_flight.len())
            .field("buffered", &self.completed.len())
            .field("next_input", &self.next_input)
            .field("next_output", &self.next_output)
            .finish_non_exhaustive()
    }
}

fn unit_future<P, Fut, E>(
    processor: Arc<P>,
    data: Bytes,
    index: usize,
    timeout: Duration,
    stats: Arc<StatsTracker>,
) -> UnitFuture
where
    P: Fn(Bytes, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send,
{
    async move {
        let len = data.len();
        let work = async move { processor(data, index).await };
        let item = run_unit(index, len, work, timeout, &stats).await;
        (index, item)
    }
    .boxed()
}

impl<S, P, Fut, E> Stream for OrderedStream<S, P>
where
    S: Stream<Item = Result<StageItem>>,
    P: Fn(Bytes, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send,
{
    type Item = Result<StageItem>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.terminated {
            return Poll::Ready(None);
        }

        loop {
            let mut progressed = false;

            // Admit
            while !*this.upstream_done
                && this.in_flight.len() + this.completed.len() < this.options.concurrency
            {
                match this.upstream.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(Ok(data)))) => {
                        let index = *this.next_input;
                        *this.next_input += 1;
                        this.in_flight.push(unit_future(
                            this.processor.clone(),
                            data,
                            index,
                            this.options.unit_timeout,
                            this.stats.clone(),
                        ));
                        progressed = true;
                    }
                    Poll::Ready(Some(Ok(Err(unit_error)))) => {
                        // Failed upstream, keeps its slot in the output order.
                        let index = *this.next_input;
                        *this.next_input += 1;
                        this.completed.insert(index, Err(unit_error));
                        progressed = true;
                    }
                    Poll::Ready(Some(Err(e))) => {
                        *this.terminated = true;
                        this.in_flight.clear();
                        this.completed.clear();
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => *this.upstream_done = true,
                    Poll::Pending => break,
                }
            }

            // Settle
            while let Poll::Ready(Some((index, item))) = this.in_flight.poll_next_unpin(cx) {
                if this.options.fail_fast {
                    if let Err(unit_error) = &item {
                        log::warn!("Fail-fast transform aborting on {}", unit_error);
                        *this.terminated = true;
                        this.in_flight.clear();
                        this.completed.clear();
                        return Poll::Ready(Some(Err(ChunkFlowError::UnitFailed(
                            unit_error.clone(),
                        ))));
                    }
                }
                this.completed.insert(index, item);
                progressed = true;
            }

            // Emit
            let next = *this.next_output;
            if let Some(item) = this.completed.remove(&next) {
                *this.next_output += 1;
                return Poll::Ready(Some(Ok(item)));
            }

            if *this.upstream_done && this.in_flight.is_empty() && this.completed.is_empty() {
                *this.terminated = true;
                log::debug!("Ordered transform drained after {} units", this.next_output);
                return Poll::Ready(None);
            }

            if !progressed {
                return Poll::Pending;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::UnitError;
    use futures::stream;

    fn source(items: &[&'static str]) -> StageStream {
        let items: Vec<_> = items
            .iter()
            .map(|s| Ok(Ok(Bytes::from_static(s.as_bytes()))))
            .collect();
        stream::iter(items).boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_completion_emits_in_order() {
        let transform = OrderedTransform::new(
            |data: Bytes, index: usize| async move {
                // Later units finish first.
                tokio::time::sleep(Duration::from_millis(50 - index as u64 * 10)).await;
                Ok::<_, String>(data)
            },
            TransformOptions::default().with_concurrency(4),
        )
        .unwrap();

        let stats = StatsTracker::shared();
        let output: Vec<_> = transform
            .apply(source(&["a", "b", "c", "d"]), stats.clone())
            .collect()
            .await;

        let payloads: Vec<_> = output
            .into_iter()
            .map(|item| item.unwrap().unwrap())
            .collect();
        assert_eq!(payloads, vec!["a", "b", "c", "d"]);
        assert_eq!(stats.snapshot().processed_chunks, 4);
        assert_eq!(stats.snapshot().total_bytes, 4);
    }

    #[tokio::test]
    async fn test_unit_error_keeps_position() {
        let transform = OrderedTransform::new(
            |data: Bytes, index: usize| async move {
                if index == 1 {
                    Err("unreadable page".to_string())
                } else {
                    Ok(data)
                }
            },
            TransformOptions::default(),
        )
        .unwrap();

        let output: Vec<_> = transform
            .apply(source(&["p0", "p1", "p2"]), StatsTracker::shared())
            .collect()
            .await;

        assert_eq!(output.len(), 3);
        assert!(output[0].as_ref().unwrap().is_ok());
        let err = output[1].as_ref().unwrap().as_ref().unwrap_err();
        assert_eq!(err.index, 1);
        assert!(output[2].as_ref().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_fail_fast_ends_stream() {
        let transform = OrderedTransform::new(
            |_: Bytes, _: usize| async { Err::<Bytes, _>("boom") },
            TransformOptions::default().with_fail_fast(true),
        )
        .unwrap();

        let output: Vec<_> = transform
            .apply(source(&["x", "y"]), StatsTracker::shared())
            .collect()
            .await;

        assert_eq!(output.len(), 1);
        assert!(matches!(output[0], Err(ChunkFlowError::UnitFailed(_))));
    }

    #[tokio::test]
    async fn test_upstream_unit_error_passes_through() {
        let upstream = stream::iter(vec![
            Ok(Ok(Bytes::from_static(b"ok"))),
            Ok(Err(UnitError::failed(7, "upstream"))),
        ])
        .boxed();
        let transform = OrderedTransform::new(
            |data: Bytes, _: usize| async move { Ok::<_, String>(data) },
            TransformOptions::default(),
        )
        .unwrap();

        let stats = StatsTracker::shared();
        let output: Vec<_> = transform.apply(upstream, stats.clone()).collect().await;
        assert_eq!(output.len(), 2);
        assert_eq!(output[1].as_ref().unwrap().as_ref().unwrap_err().index, 7);
        // Only the unit that actually ran is counted.
        assert_eq!(stats.snapshot().processed_chunks, 1);
    }

    #[tokio::test]
    async fn test_fatal_upstream_error_propagates() {
        let upstream = stream::iter(vec![
            Ok(Ok(Bytes::from_static(b"ok"))),
            Err(ChunkFlowError::PipelineTimeout(Duration::from_millis(1))),
        ])
        .boxed();
        let transform = OrderedTransform::new(
            |data: Bytes, _: usize| async move { Ok::<_, String>(data) },
            TransformOptions::default(),
        )
        .unwrap();

        let output: Vec<_> = transform
            .apply(upstream, StatsTracker::shared())
            .collect()
            .await;
        assert!(output.iter().any(|item| item.is_err()));
    }

    #[test]
    fn test_invalid_options() {
        let result = OrderedTransform::new(
            |data: Bytes, _: usize| async move { Ok::<_, String>(data) },
            TransformOptions::default().with_concurrency(0),
        );
        assert!(matches!(result, Err(ChunkFlowError::InvalidConfig(_))));
    }
}
