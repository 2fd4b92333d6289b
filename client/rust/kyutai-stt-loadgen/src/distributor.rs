use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One slice of the audio source. Immutable, so handing the same chunk to
/// every session never shares a mutable buffer.
pub type Chunk = Bytes;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DistributorStats {
    pub chunks: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    EndOfSource,
    Cancelled,
    NoConsumers,
}

/// Reads the source once, sequentially, and pushes every chunk into each
/// session queue in the same order.
pub struct Distributor<R> {
    source: R,
    buffer_size: usize,
    queues: Vec<Option<mpsc::Sender<Chunk>>>,
}

impl<R> Distributor<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(source: R, buffer_size: usize, queues: Vec<mpsc::Sender<Chunk>>) -> Self {
        Self {
            source,
            buffer_size: buffer_size.max(1),
            queues: queues.into_iter().map(Some).collect(),
        }
    }

    /// Runs until end of source, cancellation, or until every consumer is
    /// gone. Consuming `self` drops all senders, which closes every queue
    /// exactly once.
    pub async fn run(mut self, cancel: CancellationToken) -> DistributorStats {
        let mut stats = DistributorStats::default();
        let mut buf = vec![0u8; self.buffer_size];

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                read = self.source.read(&mut buf) => match read {
                    Ok(0) => break StopReason::EndOfSource,
                    Ok(n) => n,
                    Err(err) => {
                        tracing::warn!(%err, "failed to read audio source, treating as end of stream");
                        break StopReason::EndOfSource;
                    }
                },
            };

            let chunk = Bytes::copy_from_slice(&buf[..n]);
            stats.chunks += 1;
            stats.bytes += n as u64;

            if !self.broadcast(&chunk, &cancel).await {
                break StopReason::Cancelled;
            }
            if self.queues.iter().all(Option::is_none) {
                break StopReason::NoConsumers;
            }
        };

        match reason {
            StopReason::EndOfSource => {
                tracing::debug!(chunks = stats.chunks, bytes = stats.bytes, "audio source exhausted")
            }
            StopReason::Cancelled => {
                tracing::info!(chunks = stats.chunks, "run cancelled, stop writing data")
            }
            StopReason::NoConsumers => {
                tracing::debug!(chunks = stats.chunks, "every session ended, stop reading")
            }
        }
        stats
    }

    /// Places `chunk` on every live queue. A full queue blocks only this
    /// placement. Returns false if cancelled while blocked.
    async fn broadcast(&mut self, chunk: &Chunk, cancel: &CancellationToken) -> bool {
        for (index, slot) in self.queues.iter_mut().enumerate() {
            let Some(tx) = slot.as_ref() else {
                continue;
            };
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                sent = tx.send(chunk.clone()) => sent,
            };
            if sent.is_err() {
                tracing::debug!(session = index + 1, "session queue closed by its worker");
                *slot = None;
            }
        }
        true
    }
}
