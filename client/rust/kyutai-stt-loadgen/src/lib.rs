//! Concurrent load generator for streaming speech-recognition websockets.
//!
//! A run opens N sessions against one endpoint, replays a single audio
//! source to all of them chunk by chunk, and reports one [`SessionResult`]
//! per established session with its partial-recognition latency.

mod error;

pub mod config;
pub mod diagnostics;
pub mod distributor;
pub mod engine;
pub mod establish;
pub mod latency;
pub mod protocol;
pub mod result;
pub mod worker;

pub use config::EngineConfig;
pub use diagnostics::DiagnosticsConfig;
pub use engine::Engine;
pub use error::{LoadgenError, Result, SessionError};
pub use protocol::{RecognitionEvent, ResponseFormat};
pub use result::{RunOutcome, SessionResult};

pub use tokio_util::sync::CancellationToken;
