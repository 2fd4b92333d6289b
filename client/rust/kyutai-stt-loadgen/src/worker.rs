use crate::config::EngineConfig;
use crate::diagnostics::SessionDiagnostics;
use crate::distributor::Chunk;
use crate::error::SessionError;
use crate::establish::WsStream;
use crate::latency::LatencyTracker;
use crate::protocol::{RecognitionEvent, ResponseFormat, decode_event};
use crate::result::SessionResult;

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Owns one live connection and its inbound chunk queue.
///
/// The exchange with the endpoint is strictly one binary message out, one
/// response in, per chunk. Cancellation is observed while waiting for the
/// next chunk only; a write or read already in flight runs to completion
/// (or to `response_timeout` when configured).
pub struct SessionWorker {
    index: usize,
    ws: WsStream,
    chunks: mpsc::Receiver<Chunk>,
    format: ResponseFormat,
    response_timeout: Option<Duration>,
    close_timeout: Duration,
    diagnostics: SessionDiagnostics,
}

impl SessionWorker {
    pub fn new(
        index: usize,
        ws: WsStream,
        chunks: mpsc::Receiver<Chunk>,
        config: &EngineConfig,
        diagnostics: SessionDiagnostics,
    ) -> Self {
        Self {
            index,
            ws,
            chunks,
            format: config.response_format,
            response_timeout: config.response_timeout(),
            close_timeout: config.close_timeout(),
            diagnostics,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> SessionResult {
        let session = self.index + 1;
        tracing::info!(session, "stream started");

        let start = Instant::now();
        let mut tracker = LatencyTracker::new();
        let outcome = self.stream(&cancel, start, &mut tracker).await;
        let elapsed = start.elapsed();

        // Stop accepting chunks before the close handshake so the
        // distributor never blocks on this queue again.
        self.chunks.close();

        let label = match &outcome {
            Ok(()) => "done streaming",
            Err(SessionError::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        self.diagnostics
            .summary(label, elapsed, tracker.samples(), tracker.last_recognition(), tracker.average_delay())
            .await;

        let error = match outcome {
            Ok(()) => None,
            Err(err) => {
                if !err.is_cancelled() {
                    tracing::warn!(session, error = %err, "session ended with error");
                    self.diagnostics.error(&err).await;
                }
                Some(err.to_string())
            }
        };

        if timeout(self.close_timeout, self.ws.close(None)).await.is_err() {
            tracing::debug!(session, "close handshake timed out");
        }

        tracing::info!(
            session,
            samples = tracker.samples(),
            avg_delay_ms = tracker.average_delay().as_secs_f64() * 1000.0,
            "streaming complete"
        );

        SessionResult {
            index: self.index,
            elapsed,
            samples: tracker.samples(),
            average_delay: tracker.average_delay(),
            last_recognition: tracker.last_recognition(),
            error,
        }
    }

    async fn stream(
        &mut self,
        cancel: &CancellationToken,
        start: Instant,
        tracker: &mut LatencyTracker,
    ) -> Result<(), SessionError> {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                chunk = self.chunks.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => return Ok(()),
                },
            };

            let now = start.elapsed();
            if tracker.arm(now) {
                self.diagnostics.speech_start(now).await;
            }

            self.ws.send(Message::Binary(chunk)).await?;
            let event = self.read_event().await?;

            if let Some(sample) = tracker.observe(&event.partial, start.elapsed()) {
                tracing::trace!(
                    session = self.index + 1,
                    len = event.partial.len(),
                    delay_ms = sample.delay.as_secs_f64() * 1000.0,
                    "recognition update"
                );
                self.diagnostics.recognized(&event.partial, sample).await;
            }
        }
    }

    /// Reads until one data frame arrives. Control frames are skipped.
    async fn read_event(&mut self) -> Result<RecognitionEvent, SessionError> {
        let format = self.format;
        let ws = &mut self.ws;
        let read = async move {
            loop {
                let msg = match ws.next().await {
                    Some(msg) => msg?,
                    None => return Err(SessionError::peer_closed(None, "")),
                };
                if let Some(event) = decode_event(format, msg)? {
                    return Ok(event);
                }
            }
        };

        match self.response_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| SessionError::ResponseTimeout(limit.as_secs_f64()))?,
            None => read.await,
        }
    }
}
