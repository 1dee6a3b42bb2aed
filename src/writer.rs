//! Dedicated writer task for the TCP transport.
//!
//! The connection writes synchronously (fire-and-forget), so frames are
//! handed to a writer task through a bounded mpsc channel. The task
//! batches whatever is queued into single `write_vectored` calls.
//!
//! # Architecture
//!
//! ```text
//! Connection::send ─► WriterHandle::try_send ─► mpsc ─► Writer Task ─► TcpStream
//! ```

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{FraggleError, Result};
use crate::protocol::{encode_length, LENGTH_PREFIX_SIZE};

/// Default maximum pending frames before writes are refused.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 4096;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the stream.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded length prefix (4 bytes).
    pub prefix: [u8; LENGTH_PREFIX_SIZE],
    /// Encoded record.
    pub record: Bytes,
}

impl OutboundFrame {
    #[inline]
    pub fn new(record: Bytes) -> Self {
        Self {
            prefix: encode_length(record.len() as u32),
            record,
        }
    }

    /// Total size of this frame (prefix + record).
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.record.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before `try_send` refuses.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

/// Receiving end of the frame queue, consumed by [`spawn_writer_task`].
pub struct WriterQueue {
    rx: mpsc::Receiver<OutboundFrame>,
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a frame without waiting.
    ///
    /// Frames queued before the stream is connected are written once the
    /// writer task starts.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(FraggleError::Protocol("Write queue full".to_string()));
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    FraggleError::Protocol("Write queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => FraggleError::Disconnected,
            }
        })
    }

}

/// Create the frame queue. The writer task is spawned separately, once
/// the stream exists.
pub fn writer_channel(config: &WriterConfig) -> (WriterHandle, WriterQueue) {
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        max_pending: config.max_pending_frames,
    };

    (handle, WriterQueue { rx, pending })
}

/// Spawn the writer task draining `queue` into `writer`.
pub fn spawn_writer_task<W>(writer: W, queue: WriterQueue) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(writer_loop(queue, writer))
}

async fn writer_loop<W>(mut queue: WriterQueue, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match queue.rx.recv().await {
            Some(f) => f,
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match queue.rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::warn!(error = %e, "writer task failed");
            return Err(e);
        }

        queue.pending.fetch_sub(batch_size, Ordering::Release);
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(FraggleError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.prefix[..], &frame.record[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::duplex;

    fn frame(record: &'static [u8]) -> OutboundFrame {
        OutboundFrame::new(Bytes::from_static(record))
    }

    #[test]
    fn test_outbound_frame_creation() {
        let f = frame(b"hello");
        assert_eq!(f.prefix, [0, 0, 0, 5]);
        assert_eq!(f.size(), LENGTH_PREFIX_SIZE + 5);
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![frame(b"hello")];
        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_prefix() {
        let batch = vec![frame(b"hello")];
        let slices = build_remaining_slices(&batch, 1);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), LENGTH_PREFIX_SIZE - 1);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_skip_into_second_frame() {
        let batch = vec![frame(b"abc"), frame(b"defg")];
        let slices = build_remaining_slices(&batch, LENGTH_PREFIX_SIZE + 3 + 2);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 2);
        assert_eq!(&*slices[1], b"defg");
    }

    #[test]
    fn test_build_remaining_slices_skips_empty_record() {
        let batch = vec![frame(b"")];
        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 1);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| frame(b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        let written = buf.into_inner();
        assert_eq!(written.len(), 5 * (LENGTH_PREFIX_SIZE + 3));
        assert_eq!(&written[..7], &[0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_frames_queued_before_spawn_are_written() {
        let (client, mut server) = duplex(4096);
        let (handle, queue) = writer_channel(&WriterConfig::default());

        handle.try_send(frame(b"early")).unwrap();
        assert_eq!(handle.pending.load(Ordering::Acquire), 1);

        let _task = spawn_writer_task(client, queue);

        let mut buf = vec![0u8; 64];
        let n = tokio::time::timeout(
            Duration::from_secs(1),
            tokio::io::AsyncReadExt::read(&mut server, &mut buf),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(n, LENGTH_PREFIX_SIZE + 5);
        assert_eq!(&buf[4..9], b"early");
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let config = WriterConfig {
            max_pending_frames: 1,
            channel_capacity: 8,
        };
        let (handle, _queue) = writer_channel(&config);

        handle.try_send(frame(b"a")).unwrap();
        assert!(matches!(
            handle.try_send(frame(b"b")),
            Err(FraggleError::Protocol(msg)) if msg == "Write queue full"
        ));
        assert_eq!(handle.pending.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn test_try_send_after_queue_dropped() {
        let (handle, queue) = writer_channel(&WriterConfig::default());
        drop(queue);

        let result = handle.try_send(frame(b"a"));
        assert!(matches!(result, Err(FraggleError::Disconnected)));
        assert_eq!(handle.pending.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, queue) = writer_channel(&WriterConfig::default());
        let task = spawn_writer_task(client, queue);

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
