use crate::error::{LoadgenError, Result};
use crate::protocol::ResponseFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_queue_capacity() -> usize {
    100
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_connect_timeout_s() -> f64 {
    45.0
}

fn default_close_timeout_s() -> f64 {
    2.0
}

/// Tunables for one engine run.
///
/// `queue_capacity` bounds how far the fastest session may run ahead of the
/// slowest one before the distributor blocks. `read_buffer_size` is the
/// maximum chunk length sent as one websocket message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: f64,

    /// Per-response read deadline. `None` waits for the endpoint forever.
    #[serde(default)]
    pub response_timeout_s: Option<f64>,

    #[serde(default = "default_close_timeout_s")]
    pub close_timeout_s: f64,

    #[serde(default)]
    pub response_format: ResponseFormat,

    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            read_buffer_size: default_read_buffer_size(),
            connect_timeout_s: default_connect_timeout_s(),
            response_timeout_s: None,
            close_timeout_s: default_close_timeout_s(),
            response_format: ResponseFormat::default(),
            auth_token: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(LoadgenError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(LoadgenError::InvalidConfig(
                "read_buffer_size must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("connect_timeout_s", Some(self.connect_timeout_s)),
            ("close_timeout_s", Some(self.close_timeout_s)),
            ("response_timeout_s", self.response_timeout_s),
        ] {
            if let Some(v) = value {
                if v <= 0.0 || Duration::try_from_secs_f64(v).is_err() {
                    return Err(LoadgenError::InvalidConfig(format!(
                        "{name} must be a positive number of seconds, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_s)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_s.map(Duration::from_secs_f64)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.close_timeout_s)
    }
}
