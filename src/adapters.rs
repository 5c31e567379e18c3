//! Stream adapters
//!
//! Bridges between in-memory data, async readers/writers and pipeline
//! streams: sources that feed a pipeline and sinks that drain it.

use crate::common::{ChunkFlowError, Result, DEFAULT_BATCH_SIZE};
use crate::stage::{StageItem, StageStream};
use bytes::{Buf, Bytes};
use futures::stream::{self, StreamExt};
use futures::{ready, Sink};
use pin_project::pin_project;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Options for [`sequence_to_stream`]
#[derive(Debug, Clone)]
pub struct SequenceOptions {
    /// Items emitted between pauses
    pub batch_size: usize,
    /// Pause between batches; zero disables pacing
    pub delay: Duration,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delay: Duration::ZERO,
        }
    }
}

/// Emit an in-memory sequence as a pipeline source
///
/// Items are emitted in order, `batch_size` at a time, sleeping `delay`
/// between batches. The stream ends after the last item.
pub fn sequence_to_stream<I>(items: I, options: SequenceOptions) -> Result<StageStream>
where
    I: IntoIterator,
    I::Item: Into<Bytes>,
{
    if options.batch_size == 0 {
        return Err(ChunkFlowError::InvalidConfig(
            "batch size must be greater than zero".to_string(),
        ));
    }

    let items: Vec<Bytes> = items.into_iter().map(Into::into).collect();
    let SequenceOptions { batch_size, delay } = options;

    let stream = stream::unfold(
        (items.into_iter(), 0usize),
        move |(mut items, emitted)| async move {
            let item = items.next()?;
            if emitted > 0 && emitted % batch_size == 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Some((Ok(Ok(item)), (items, emitted + 1)))
        },
    );

    Ok(stream.boxed())
}

/// Read `reader` as a stream of chunks of `chunk_size` bytes
///
/// Every chunk except the last is exactly `chunk_size` bytes long. The reader
/// is only polled when the stream is, so a slow consumer slows the reads.
pub fn reader_stream<R>(reader: R, chunk_size: usize) -> Result<StageStream>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    if chunk_size == 0 {
        return Err(ChunkFlowError::InvalidConfig(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    let stream = stream::try_unfold(reader, move |mut reader| async move {
        let mut buffer = vec![0u8; chunk_size];
        let mut filled = 0;
        while filled < chunk_size {
            let bytes_read = reader.read(&mut buffer[filled..]).await?;
            if bytes_read == 0 {
                break;
            }
            filled += bytes_read;
        }

        if filled == 0 {
            return Ok::<_, ChunkFlowError>(None);
        }
        buffer.truncate(filled);
        Ok(Some((Ok(Bytes::from(buffer)), reader)))
    });

    Ok(stream.boxed())
}

/// Sink that stores every item it receives
#[derive(Debug, Clone, Default)]
pub struct CollectSink {
    items: Arc<Mutex<Vec<StageItem>>>,
}

/// Accessor for the items written to a [`CollectSink`]
#[derive(Debug, Clone)]
pub struct Collected {
    items: Arc<Mutex<Vec<StageItem>>>,
}

impl Collected {
    /// Everything written so far, in write order
    pub fn items(&self) -> Vec<StageItem> {
        self.lock().clone()
    }

    /// Successful payloads written so far, in write order
    pub fn payloads(&self) -> Vec<Bytes> {
        self.lock()
            .iter()
            .filter_map(|item| item.as_ref().ok().cloned())
            .collect()
    }

    /// Number of items written so far
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StageItem>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Create a collecting sink and the accessor for its contents
pub fn collect_stream() -> (CollectSink, Collected) {
    let sink = CollectSink::default();
    let collected = Collected {
        items: sink.items.clone(),
    };
    (sink, collected)
}

impl Sink<StageItem> for CollectSink {
    type Error = ChunkFlowError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: StageItem) -> Result<()> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Sink writing payloads to an async writer
///
/// The sink reports ready only after the previous payload has been fully
/// accepted by the writer, so a slow writer holds back the whole pipeline.
/// A failed unit cannot be written and aborts the run.
#[pin_project]
#[derive(Debug)]
pub struct WriterSink<W> {
    #[pin]
    writer: W,
    pending: Bytes,
    bytes_written: u64,
}

impl<W: AsyncWrite> WriterSink<W> {
    /// Wrap an async writer
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pending: Bytes::new(),
            bytes_written: 0,
        }
    }

    /// Bytes accepted by the writer so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Unwrap the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn poll_drain(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let mut this = self.project();
        while !this.pending.is_empty() {
            let written = ready!(this.writer.as_mut().poll_write(cx, &this.pending[..]))?;
            if written == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "writer accepted zero bytes",
                )
                .into()));
            }
            this.pending.advance(written);
            *this.bytes_written += written as u64;
        }
        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite> Sink<StageItem> for WriterSink<W> {
    type Error = ChunkFlowError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.poll_drain(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: StageItem) -> Result<()> {
        match item {
            Ok(data) => {
                *self.project().pending = data;
                Ok(())
            }
            Err(unit_error) => Err(ChunkFlowError::UnitFailed(unit_error)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        ready!(self.as_mut().poll_drain(cx))?;
        self.project().writer.poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        ready!(self.as_mut().poll_drain(cx))?;
        self.project().writer.poll_shutdown(cx).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::UnitError;
    use futures::SinkExt;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_sequence_emits_all_items_in_order() {
        let stream = sequence_to_stream(vec!["a", "b", "c"], SequenceOptions::default()).unwrap();
        let items: Vec<_> = stream.map(|item| item.unwrap().unwrap()).collect().await;
        assert_eq!(items, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_paces_batches() {
        let options = SequenceOptions {
            batch_size: 2,
            delay: Duration::from_millis(100),
        };
        let started = tokio::time::Instant::now();
        let stream = sequence_to_stream(vec![vec![0u8]; 5], options).unwrap();
        assert_eq!(stream.count().await, 5);
        // Pauses before the 3rd and 5th items.
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_sequence_rejects_zero_batch() {
        let options = SequenceOptions {
            batch_size: 0,
            ..SequenceOptions::default()
        };
        assert!(sequence_to_stream(Vec::<Bytes>::new(), options).is_err());
    }

    #[tokio::test]
    async fn test_reader_stream_chunks() {
        let data: Vec<u8> = (0..10u8).collect();
        let chunks: Vec<_> = reader_stream(Cursor::new(data), 4)
            .unwrap()
            .map(|item| item.unwrap().unwrap().len())
            .collect()
            .await;
        assert_eq!(chunks, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_collect_sink_records_in_order() {
        let (mut sink, collected) = collect_stream();
        sink.send(Ok(Bytes::from_static(b"one"))).await.unwrap();
        sink.send(Err(UnitError::failed(1, "lost"))).await.unwrap();
        sink.send(Ok(Bytes::from_static(b"three"))).await.unwrap();

        assert_eq!(collected.len(), 3);
        assert_eq!(collected.payloads(), vec!["one", "three"]);
        assert!(collected.items()[1].is_err());
    }

    #[tokio::test]
    async fn test_writer_sink_writes_payloads() {
        let mut sink = WriterSink::new(Vec::new());
        sink.send(Ok(Bytes::from_static(b"hello "))).await.unwrap();
        sink.send(Ok(Bytes::from_static(b"world"))).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(sink.bytes_written(), 11);
        assert_eq!(sink.into_inner(), b"hello world");
    }

    #[tokio::test]
    async fn test_writer_sink_rejects_failed_unit() {
        let mut sink = WriterSink::new(Vec::new());
        let result = sink.send(Err(UnitError::failed(0, "bad"))).await;
        assert!(matches!(result, Err(ChunkFlowError::UnitFailed(_))));
    }
}
