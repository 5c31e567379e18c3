//! Throughput throttling stage
//!
//! Caps the payload rate of a stream using a one-second accounting window.
//! Units are never dropped: once the window is full the next unit is held
//! until the window expires. A window that admitted more than one second's
//! budget lasts proportionally longer.

use crate::common::{ChunkFlowError, Result};
use crate::stage::{item_len, StageItem, StageStream, TransformStage};
use crate::stats::StatsTracker;
use futures::ready;
use futures::stream::Stream;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{sleep, Instant, Sleep};

const WINDOW: Duration = Duration::from_secs(1);

/// Time a window admitting `bytes` must last to stay within `rate`
fn window_span(bytes: u64, rate: u64) -> Duration {
    WINDOW.max(Duration::from_secs_f64(bytes as f64 / rate as f64))
}

/// Stage limiting throughput to a maximum number of bytes per second
#[derive(Debug, Clone, Copy)]
pub struct ThrottleStage {
    max_bytes_per_second: u64,
}

impl ThrottleStage {
    /// Create a throttle admitting at most `max_bytes_per_second`
    pub fn new(max_bytes_per_second: u64) -> Result<Self> {
        if max_bytes_per_second == 0 {
            return Err(ChunkFlowError::InvalidConfig(
                "max bytes per second must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_bytes_per_second,
        })
    }

    /// Configured rate
    pub fn max_bytes_per_second(&self) -> u64 {
        self.max_bytes_per_second
    }

    /// Wrap `upstream` directly, outside of a composed pipeline
    pub fn apply<S>(self, upstream: S) -> Throttled<S>
    where
        S: Stream<Item = Result<StageItem>>,
    {
        Throttled {
            upstream,
            max_bytes_per_second: self.max_bytes_per_second,
            window_start: None,
            window_bytes: 0,
            delay: None,
            pending: None,
        }
    }
}

impl TransformStage for ThrottleStage {
    fn name(&self) -> &'static str {
        "throttle"
    }

    fn attach(self: Box<Self>, upstream: StageStream, _stats: Arc<StatsTracker>) -> StageStream {
        Box::pin(self.apply(upstream))
    }
}

/// Stream produced by [`ThrottleStage::apply`]
#[pin_project]
#[derive(Debug)]
pub struct Throttled<S> {
    #[pin]
    upstream: S,
    max_bytes_per_second: u64,
    window_start: Option<Instant>,
    window_bytes: u64,
    delay: Option<Pin<Box<Sleep>>>,
    pending: Option<Result<StageItem>>,
}

impl<S> Stream for Throttled<S>
where
    S: Stream<Item = Result<StageItem>>,
{
    type Item = Result<StageItem>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if let Some(delay) = this.delay.as_mut() {
            ready!(delay.as_mut().poll(cx));
            *this.delay = None;
            *this.window_start = Some(Instant::now());
            *this.window_bytes = 0;
            if let Some(item) = this.pending.take() {
                if let Ok(unit) = &item {
                    *this.window_bytes += item_len(unit) as u64;
                }
                return Poll::Ready(Some(item));
            }
        }

        let item = match ready!(this.upstream.as_mut().poll_next(cx)) {
            Some(item) => item,
            None => return Poll::Ready(None),
        };
        let len = match &item {
            Ok(unit) => item_len(unit) as u64,
            Err(_) => return Poll::Ready(Some(item)),
        };

        let now = Instant::now();
        let start = *this.window_start.get_or_insert(now);
        let mut elapsed = now.duration_since(start);
        let span = window_span(*this.window_bytes, *this.max_bytes_per_second);
        if elapsed >= span {
            *this.window_start = Some(now);
            *this.window_bytes = 0;
            elapsed = Duration::ZERO;
        }

        // A unit larger than the whole budget still passes alone, but its
        // window stretches until the rate has paid for it.
        if *this.window_bytes > 0 && *this.window_bytes + len > *this.max_bytes_per_second {
            let wait = span.saturating_sub(elapsed);
            log::debug!("Throttling for {:?} ({} bytes this window)", wait, this.window_bytes);
            *this.pending = Some(item);
            let mut delay = Box::pin(sleep(wait));
            // Register the waker now; the unit is released on the next poll.
            if delay.as_mut().poll(cx).is_pending() {
                *this.delay = Some(delay);
                return Poll::Pending;
            }
            *this.window_start = Some(Instant::now());
            *this.window_bytes = len;
            return Poll::Ready(this.pending.take());
        }

        *this.window_bytes += len;
        Poll::Ready(Some(item))
    }
}
