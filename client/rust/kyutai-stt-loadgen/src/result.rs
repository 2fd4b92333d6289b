use serde::Serialize;
use std::time::Duration;

/// Terminal summary of one session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionResult {
    /// Position of the session among the established ones, 0-based.
    pub index: usize,
    /// Time from session start to termination.
    pub elapsed: Duration,
    /// Number of latency samples (drop count).
    pub samples: u64,
    pub average_delay: Duration,
    /// Offset of the last distinguishable recognition update, if any.
    pub last_recognition: Option<Duration>,
    pub error: Option<String>,
}

impl SessionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Error text, empty on success.
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }

    pub(crate) fn lost(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            elapsed: Duration::ZERO,
            samples: 0,
            average_delay: Duration::ZERO,
            last_recognition: None,
            error: Some(reason.into()),
        }
    }
}

/// Everything a run produced, one result per established session in index
/// order.
#[derive(Clone, Debug, Serialize)]
pub struct RunOutcome {
    pub requested: usize,
    pub results: Vec<SessionResult>,
    pub chunks_sent: u64,
    pub bytes_read: u64,
    pub wall_time: Duration,
}

impl RunOutcome {
    pub fn established(&self) -> usize {
        self.results.len()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    pub fn total_samples(&self) -> u64 {
        self.results.iter().map(|r| r.samples).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_text_is_empty_on_success() {
        let ok = SessionResult {
            index: 0,
            elapsed: Duration::from_millis(10),
            samples: 2,
            average_delay: Duration::from_millis(3),
            last_recognition: Some(Duration::from_millis(9)),
            error: None,
        };
        assert!(ok.is_success());
        assert_eq!(ok.error_text(), "");

        let lost = SessionResult::lost(1, "boom");
        assert!(!lost.is_success());
        assert_eq!(lost.error_text(), "boom");
        assert_eq!(lost.average_delay, Duration::ZERO);

        let outcome = RunOutcome {
            requested: 3,
            results: vec![ok, lost],
            chunks_sent: 4,
            bytes_read: 40,
            wall_time: Duration::from_millis(20),
        };
        assert_eq!(outcome.established(), 2);
        assert_eq!(outcome.failed(), 1);
        assert_eq!(outcome.total_samples(), 2);
    }
}
