//! Optional per-session audit files.
//!
//! Every write here is best-effort: a failing disk never changes a session's
//! result or control flow, it only gets logged at debug level.

use crate::error::SessionError;
use crate::latency::LatencySample;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    pub results_dir: PathBuf,
    pub errors_dir: PathBuf,
}

impl DiagnosticsConfig {
    pub fn new(results_dir: impl Into<PathBuf>, errors_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
            errors_dir: errors_dir.into(),
        }
    }

    /// Clears the records of a previous run and recreates both directories.
    pub async fn prepare(&self) -> std::io::Result<()> {
        for dir in [&self.results_dir, &self.errors_dir] {
            reset_dir(dir).await?;
        }
        Ok(())
    }

    pub fn response_path(&self, index: usize) -> PathBuf {
        self.results_dir.join(format!("response_{}.txt", index + 1))
    }

    pub fn error_path(&self, index: usize) -> PathBuf {
        self.errors_dir.join(format!("error_{}.txt", index + 1))
    }

    pub async fn open_session(&self, index: usize) -> SessionDiagnostics {
        let path = self.response_path(index);
        let response = match OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::debug!(session = index + 1, path = %path.display(), %err, "cannot open response record");
                None
            }
        };
        SessionDiagnostics {
            session: index + 1,
            response,
            error_path: Some(self.error_path(index)),
        }
    }
}

async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    tokio::fs::create_dir_all(dir).await
}

pub struct SessionDiagnostics {
    session: usize,
    response: Option<File>,
    error_path: Option<PathBuf>,
}

impl SessionDiagnostics {
    pub fn disabled(index: usize) -> Self {
        Self {
            session: index + 1,
            response: None,
            error_path: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.response.is_some() || self.error_path.is_some()
    }

    async fn append(&mut self, line: String) {
        let Some(file) = self.response.as_mut() else {
            return;
        };
        if let Err(err) = file.write_all(line.as_bytes()).await {
            tracing::debug!(session = self.session, %err, "response record write failed, disabling");
            self.response = None;
        }
    }

    pub async fn speech_start(&mut self, at: Duration) {
        self.append(format!("[speech start], {:.6}\n", at.as_secs_f64())).await
    }

    pub async fn recognized(&mut self, partial: &str, sample: LatencySample) {
        self.append(format!(
            "{partial}, {:.6}, {:.6}\n",
            sample.at.as_secs_f64(),
            sample.delay.as_secs_f64()
        ))
        .await
    }

    pub async fn summary(
        &mut self,
        label: &str,
        elapsed: Duration,
        samples: u64,
        last_recognition: Option<Duration>,
        average_delay: Duration,
    ) {
        let last = last_recognition.unwrap_or_default().as_secs_f64();
        self.append(format!(
            "[{label}], {:.6}\ndrop_count, last_response, avg_delay\n{samples}, {last:.6}, {:.6}\n",
            elapsed.as_secs_f64(),
            average_delay.as_secs_f64()
        ))
        .await;
        if let Some(file) = self.response.as_mut() {
            let _ = file.flush().await;
        }
    }

    pub async fn error(&self, err: &SessionError) {
        let Some(path) = self.error_path.as_ref() else {
            return;
        };
        if let Err(write_err) = tokio::fs::write(path, err.to_string()).await {
            tracing::debug!(session = self.session, %write_err, "error record write failed");
        }
    }
}
