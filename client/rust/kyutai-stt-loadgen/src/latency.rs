use std::time::Duration;

/// Per-session latency bookkeeping.
///
/// All timestamps are offsets from the session start. The tracker is owned
/// by a single worker, nothing in it is shared across sessions.
#[derive(Clone, Debug, Default)]
pub struct LatencyTracker {
    speech_start: Option<Duration>,
    last_partial_len: usize,
    samples: u64,
    total_delay: Duration,
    last_recognition: Option<Duration>,
}

/// A distinguishable recognition update and the delay attributed to it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencySample {
    pub at: Duration,
    pub delay: Duration,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an utterance window at `now` unless one is already open.
    /// Returns true when a new window was opened.
    pub fn arm(&mut self, now: Duration) -> bool {
        if self.speech_start.is_some() {
            return false;
        }
        self.speech_start = Some(now);
        true
    }

    /// Feeds one decoded fragment. A sample is recorded only for a non-empty
    /// fragment whose length differs from the previously observed one.
    pub fn observe(&mut self, partial: &str, now: Duration) -> Option<LatencySample> {
        let len = partial.len();
        if len == 0 || len == self.last_partial_len {
            return None;
        }

        let start = self.speech_start.take().unwrap_or(now);
        let delay = now.saturating_sub(start);

        self.last_partial_len = len;
        self.samples += 1;
        self.total_delay += delay;
        self.last_recognition = Some(now);

        Some(LatencySample { at: now, delay })
    }

    pub fn is_armed(&self) -> bool {
        self.speech_start.is_some()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn last_recognition(&self) -> Option<Duration> {
        self.last_recognition
    }

    /// Run-long average, zero when nothing was recognized.
    pub fn average_delay(&self) -> Duration {
        match u32::try_from(self.samples) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_delay / n,
            Err(_) => Duration::from_secs_f64(self.total_delay.as_secs_f64() / self.samples as f64),
        }
    }
}
