use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoadgenError>;

/// Failure of a whole run. Per-session failures never surface here, they are
/// folded into the matching [`crate::SessionResult`].
#[derive(Debug, Error)]
pub enum LoadgenError {
    #[error("no usable session: all {requested} handshakes failed")]
    NoUsableSession { requested: usize },

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("handshake timed out after {0:.1}s")]
    HandshakeTimeout(f64),

    #[error("websocket transport error: {0}")]
    Transport(String),

    #[error("no response within {0:.1}s")]
    ResponseTimeout(f64),

    #[error("connection closed by peer{0}")]
    PeerClosed(String),

    #[error("protocol decode error: {0}")]
    Decode(String),

    #[error("run cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }

    pub(crate) fn peer_closed(code: Option<u16>, reason: &str) -> Self {
        let reason = reason.trim();
        let suffix = match (code, reason.is_empty()) {
            (None, _) => String::new(),
            (Some(code), true) => format!(" (code {code})"),
            (Some(code), false) => format!(" (code {code}, reason: {reason})"),
        };
        SessionError::PeerClosed(suffix)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match value {
            WsError::ConnectionClosed | WsError::AlreadyClosed => SessionError::peer_closed(None, ""),
            other => SessionError::Transport(other.to_string()),
        }
    }
}
