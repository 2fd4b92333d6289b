use crate::config::EngineConfig;
use crate::error::SessionError;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one websocket connection, bounded by the configured handshake
/// timeout.
pub async fn connect_ws(target: &str, config: &EngineConfig) -> Result<WsStream, SessionError> {
    let mut req = target
        .into_client_request()
        .map_err(|e| SessionError::Handshake(e.to_string()))?;

    if let Some(token) = config.auth_token.as_deref() {
        let header_value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        req.headers_mut().insert(AUTHORIZATION, header_value);
    }

    let (ws_stream, _resp) = timeout(config.connect_timeout(), connect_async(req))
        .await
        .map_err(|_| SessionError::HandshakeTimeout(config.connect_timeout_s))?
        .map_err(|e| SessionError::Handshake(e.to_string()))?;

    Ok(ws_stream)
}

/// Dials `count` connections concurrently and returns the ones that
/// completed their handshake. Each attempt reports through its own one-shot
/// slot so no attempt ever waits on another.
pub async fn establish_sessions(target: &str, count: usize, config: &EngineConfig) -> Vec<WsStream> {
    let display_target = redact_ws_url(target);
    let mut slots = Vec::with_capacity(count);

    for attempt in 0..count {
        let (tx, rx) = oneshot::channel::<Option<WsStream>>();
        let target = target.to_string();
        let display_target = display_target.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let conn = match connect_ws(&target, &config).await {
                Ok(conn) => Some(conn),
                Err(err) => {
                    tracing::warn!(attempt = attempt + 1, target = %display_target, error = %err, "websocket connection error");
                    None
                }
            };
            let _ = tx.send(conn);
        });
        slots.push(rx);
    }

    let mut ready = Vec::with_capacity(count);
    for rx in slots {
        if let Ok(Some(conn)) = rx.await {
            ready.push(conn);
        }
    }

    tracing::info!(ready = ready.len(), requested = count, "connections ready to stream");
    ready
}

/// Replaces any `token` query parameter so urls can be logged.
pub fn redact_ws_url(target: &str) -> String {
    let Ok(mut url) = Url::parse(target) else {
        return target.to_string();
    };
    if url.query().is_none() {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == "token" {
                (k.to_string(), "REDACTED".to_string())
            } else {
                (k.to_string(), v.to_string())
            }
        })
        .collect();

    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_redacted() {
        assert_eq!(
            redact_ws_url("ws://host:8001/ws?token=secret&lang=en"),
            "ws://host:8001/ws?token=REDACTED&lang=en"
        );
        assert_eq!(redact_ws_url("ws://host:8001/ws"), "ws://host:8001/ws");
        assert_eq!(redact_ws_url("not a url"), "not a url");
    }

    #[tokio::test]
    async fn invalid_target_fails_handshake() {
        let err = connect_ws("definitely not a url", &EngineConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Handshake(_)));
    }

    #[tokio::test]
    async fn unreachable_target_yields_no_sessions() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let ready = establish_sessions(&format!("ws://{addr}/ws"), 3, &EngineConfig::default()).await;
        assert!(ready.is_empty());
    }
}
