use crate::config::EngineConfig;
use crate::diagnostics::{DiagnosticsConfig, SessionDiagnostics};
use crate::distributor::{Distributor, DistributorStats};
use crate::error::{LoadgenError, Result};
use crate::establish::establish_sessions;
use crate::result::{RunOutcome, SessionResult};
use crate::worker::SessionWorker;

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Entry point of a load run: one audio source replayed to N sessions
/// against one endpoint.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
    diagnostics: Option<DiagnosticsConfig>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            diagnostics: None,
        }
    }

    /// Enables the per-session response and error records. The directories
    /// are expected to exist, see [`DiagnosticsConfig::prepare`].
    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsConfig) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the whole pipeline and blocks until every established session
    /// has reported.
    ///
    /// `requested` is coerced to at least 1. Fails only when no handshake
    /// succeeded, in which case the source is never read. Results come back
    /// in session index order regardless of completion order.
    pub async fn run<R>(
        &self,
        target: &str,
        requested: usize,
        source: R,
        cancel: CancellationToken,
    ) -> Result<RunOutcome>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.config.validate()?;
        let requested = requested.max(1);
        let started = Instant::now();

        let conns = establish_sessions(target, requested, &self.config).await;
        if conns.is_empty() {
            return Err(LoadgenError::NoUsableSession { requested });
        }
        let established = conns.len();

        let mut queues = Vec::with_capacity(established);
        let mut slots = Vec::with_capacity(established);
        for (index, ws) in conns.into_iter().enumerate() {
            let (chunk_tx, chunk_rx) = mpsc::channel(self.config.queue_capacity);
            let (result_tx, result_rx) = oneshot::channel::<SessionResult>();

            let diagnostics = match &self.diagnostics {
                Some(d) => d.open_session(index).await,
                None => SessionDiagnostics::disabled(index),
            };
            let worker = SessionWorker::new(index, ws, chunk_rx, &self.config, diagnostics);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let res = worker.run(cancel).await;
                let _ = result_tx.send(res);
            });

            queues.push(chunk_tx);
            slots.push(result_rx);
        }

        let distributor = Distributor::new(source, self.config.read_buffer_size, queues);
        let distributor = tokio::spawn(distributor.run(cancel.clone()));

        tracing::info!(workers = established, "waiting for workers to finish");
        let results = collect_results(slots).await;

        let stats = match distributor.await {
            Ok(stats) => stats,
            Err(err) => {
                tracing::error!(%err, "distributor task failed");
                DistributorStats::default()
            }
        };

        let outcome = RunOutcome {
            requested,
            results,
            chunks_sent: stats.chunks,
            bytes_read: stats.bytes,
            wall_time: started.elapsed(),
        };
        tracing::info!(
            requested,
            established,
            failed = outcome.failed(),
            chunks = outcome.chunks_sent,
            wall_time_s = outcome.wall_time.as_secs_f64(),
            "run finished"
        );
        Ok(outcome)
    }
}

/// Awaits every result slot in session order. A slot whose worker died
/// without reporting still yields one failed result for its index.
async fn collect_results(slots: Vec<oneshot::Receiver<SessionResult>>) -> Vec<SessionResult> {
    let mut results = Vec::with_capacity(slots.len());
    for (index, slot) in slots.into_iter().enumerate() {
        let res = match slot.await {
            Ok(res) => res,
            Err(_) => {
                tracing::error!(session = index + 1, "session worker dropped its result slot");
                SessionResult::lost(index, "session worker terminated unexpectedly")
            }
        };
        results.push(res);
    }
    results
}
