use futures_util::{SinkExt, StreamExt};
use kyutai_stt_loadgen::{
    CancellationToken, DiagnosticsConfig, Engine, EngineConfig, LoadgenError, SessionResult,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Behavior {
    /// Replies with a partial one character longer than the previous one.
    Growing,
    /// Like `Growing`, but the first accepted connection vanishes after its
    /// first reply.
    DropFirstAfterOne,
    Garbage,
    Silent,
}

type Received = Arc<Mutex<HashMap<usize, Vec<Vec<u8>>>>>;

struct TestServer {
    addr: SocketAddr,
    received: Received,
}

impl TestServer {
    async fn start(behavior: Behavior) -> Self {
        Self::start_accepting(behavior, usize::MAX).await
    }

    /// Completes only the first `limit` handshakes; later connections are
    /// dropped before the upgrade.
    async fn start_accepting(behavior: Behavior, limit: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received: Received = Arc::default();

        let log = received.clone();
        tokio::spawn(async move {
            let mut next_conn = 0usize;
            while let Ok((stream, _)) = listener.accept().await {
                let conn = next_conn;
                next_conn += 1;
                if conn >= limit {
                    drop(stream);
                    continue;
                }
                let log = log.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    let mut replies = 0usize;
                    while let Some(Ok(msg)) = ws.next().await {
                        let data = match msg {
                            Message::Binary(data) => data,
                            Message::Close(_) => break,
                            _ => continue,
                        };
                        log.lock().unwrap().entry(conn).or_default().push(data.to_vec());

                        let reply = match behavior {
                            Behavior::Silent => continue,
                            Behavior::Garbage => "garbage".to_string(),
                            Behavior::Growing | Behavior::DropFirstAfterOne => {
                                replies += 1;
                                format!(r#"{{"partial":"{}"}}"#, "x".repeat(replies))
                            }
                        };
                        if ws.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                        if behavior == Behavior::DropFirstAfterOne && conn == 0 {
                            return;
                        }
                    }
                });
            }
        });

        Self { addr, received }
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    fn sequences(&self) -> Vec<Vec<Vec<u8>>> {
        let log = self.received.lock().unwrap();
        let mut conns: Vec<_> = log.keys().copied().collect();
        conns.sort();
        conns.into_iter().map(|c| log[&c].clone()).collect()
    }
}

fn small_chunks() -> EngineConfig {
    EngineConfig {
        read_buffer_size: 10,
        ..EngineConfig::default()
    }
}

/// Source that remembers whether anybody tried to read it.
struct TrackingReader {
    inner: Cursor<Vec<u8>>,
    touched: Arc<AtomicBool>,
}

impl AsyncRead for TrackingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.touched.store(true, Ordering::SeqCst);
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

fn assert_ok(res: &SessionResult) {
    assert_eq!(res.error_text(), "", "session {} failed", res.index);
}

#[tokio::test]
async fn three_chunks_two_sessions_record_three_samples_each() {
    let server = TestServer::start(Behavior::Growing).await;
    let engine = Engine::new(small_chunks());

    let outcome = engine
        .run(&server.url(), 2, Cursor::new(vec![1u8; 30]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.requested, 2);
    assert_eq!(outcome.established(), 2);
    assert_eq!(outcome.chunks_sent, 3);
    assert_eq!(outcome.bytes_read, 30);
    for (i, res) in outcome.results.iter().enumerate() {
        assert_eq!(res.index, i);
        assert_ok(res);
        assert_eq!(res.samples, 3);
        assert!(res.average_delay > Duration::ZERO);
        assert!(res.elapsed >= res.average_delay);
        assert!(res.last_recognition.is_some());
    }
}

#[tokio::test]
async fn every_session_observes_the_same_chunk_order() {
    let server = TestServer::start(Behavior::Growing).await;
    let source: Vec<u8> = (0u8..95).collect();
    let engine = Engine::new(EngineConfig {
        queue_capacity: 2,
        ..small_chunks()
    });

    let outcome = engine
        .run(&server.url(), 4, Cursor::new(source.clone()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.established(), 4);
    outcome.results.iter().for_each(assert_ok);

    let sequences = server.sequences();
    assert_eq!(sequences.len(), 4);
    let expected: Vec<Vec<u8>> = source.chunks(10).map(<[u8]>::to_vec).collect();
    for seq in sequences {
        assert_eq!(seq, expected);
    }
}

#[tokio::test]
async fn refused_connections_fail_before_reading_the_source() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let touched = Arc::new(AtomicBool::new(false));
    let source = TrackingReader {
        inner: Cursor::new(vec![0u8; 100]),
        touched: touched.clone(),
    };

    let err = Engine::new(EngineConfig::default())
        .run(&format!("ws://{addr}/ws"), 5, source, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LoadgenError::NoUsableSession { requested: 5 }));
    assert!(err.to_string().starts_with("no usable session"));
    assert!(!touched.load(Ordering::SeqCst));
}

#[tokio::test]
async fn partial_handshake_success_runs_the_survivors() {
    let server = TestServer::start_accepting(Behavior::Growing, 2).await;
    let outcome = Engine::new(small_chunks())
        .run(&server.url(), 5, Cursor::new(vec![3u8; 30]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.requested, 5);
    assert_eq!(outcome.established(), 2);
    assert_eq!(outcome.failed(), 0);
    for (i, res) in outcome.results.iter().enumerate() {
        assert_eq!(res.index, i);
        assert_ok(res);
        assert_eq!(res.samples, 3);
    }
    assert_eq!(server.sequences().len(), 2);
}

#[tokio::test]
async fn zero_requested_sessions_runs_one() {
    let server = TestServer::start(Behavior::Growing).await;
    let outcome = Engine::new(small_chunks())
        .run(&server.url(), 0, Cursor::new(vec![0u8; 10]), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.requested, 1);
    assert_eq!(outcome.established(), 1);
    assert_eq!(outcome.results[0].samples, 1);
}

#[tokio::test]
async fn dropped_connection_only_fails_its_own_session() {
    let server = TestServer::start(Behavior::DropFirstAfterOne).await;
    let outcome = Engine::new(small_chunks())
        .run(&server.url(), 2, Cursor::new(vec![5u8; 30]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.established(), 2);
    assert_eq!(outcome.failed(), 1);

    let failed = outcome.results.iter().find(|r| !r.is_success()).unwrap();
    assert!(!failed.error_text().is_empty());
    assert_eq!(failed.samples, 1);

    let healthy = outcome.results.iter().find(|r| r.is_success()).unwrap();
    assert_eq!(healthy.samples, 3);
    assert!(healthy.average_delay > Duration::ZERO);
}

#[tokio::test]
async fn cancellation_reaches_every_session() {
    let server = TestServer::start(Behavior::Growing).await;
    let cancel = CancellationToken::new();
    let engine = Engine::new(EngineConfig {
        queue_capacity: 4,
        ..small_chunks()
    });

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        engine.run(&server.url(), 3, tokio::io::repeat(9), cancel),
    )
    .await
    .expect("a cancelled run must finish")
    .unwrap();

    assert_eq!(outcome.established(), 3);
    assert!(outcome.chunks_sent > 0);
    for res in &outcome.results {
        assert_eq!(res.error_text(), "run cancelled");
        assert!(res.samples > 0);
    }
}

#[tokio::test]
async fn malformed_response_is_a_session_error() {
    let server = TestServer::start(Behavior::Garbage).await;
    let outcome = Engine::new(small_chunks())
        .run(&server.url(), 2, Cursor::new(vec![0u8; 30]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.failed(), 2);
    for res in &outcome.results {
        assert!(res.error_text().starts_with("protocol decode error"));
        assert_eq!(res.samples, 0);
        assert_eq!(res.average_delay, Duration::ZERO);
    }
}

#[tokio::test]
async fn response_timeout_bounds_a_silent_endpoint() {
    let server = TestServer::start(Behavior::Silent).await;
    let engine = Engine::new(EngineConfig {
        response_timeout_s: Some(0.2),
        ..small_chunks()
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        engine.run(&server.url(), 1, Cursor::new(vec![0u8; 30]), CancellationToken::new()),
    )
    .await
    .expect("response timeout should end the session")
    .unwrap();

    assert_eq!(outcome.results[0].error_text(), "no response within 0.2s");
}

#[tokio::test]
async fn diagnostics_records_are_written_per_session() {
    let server = TestServer::start(Behavior::Growing).await;
    let root = tempfile::tempdir().unwrap();
    let diagnostics = DiagnosticsConfig::new(root.path().join("Results"), root.path().join("errors"));
    diagnostics.prepare().await.unwrap();

    let outcome = Engine::new(small_chunks())
        .with_diagnostics(diagnostics.clone())
        .run(&server.url(), 2, Cursor::new(vec![0u8; 20]), CancellationToken::new())
        .await
        .unwrap();
    outcome.results.iter().for_each(assert_ok);

    for index in 0..2 {
        let record = tokio::fs::read_to_string(diagnostics.response_path(index)).await.unwrap();
        assert!(record.starts_with("[speech start], "));
        assert!(record.contains("[done streaming], "));
        assert!(record.contains("drop_count, last_response, avg_delay\n2, "));
        assert!(!diagnostics.error_path(index).exists());
    }
}
