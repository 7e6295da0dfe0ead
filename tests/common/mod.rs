//! Local push server for the integration tests.
//!
//! Every text frame a client sends is forwarded to [`MockServer::received`].
//! When a client frame is a subscribe command, the scripted replies are
//! written back in order.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const HEARTBEAT: &str = "[1010]";

pub struct MockServer {
    pub url: String,
    pub received: mpsc::UnboundedReceiver<String>,
    connections: Arc<AtomicUsize>,
}

impl MockServer {
    /// Number of accepted TCP connections so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Next client frame, failing the test after two seconds.
    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(2), self.received.recv())
            .await
            .expect("no frame from client in time")
            .expect("server stopped")
    }

    pub async fn next_json(&mut self) -> serde_json::Value {
        serde_json::from_str(&self.next_frame().await).unwrap()
    }
}

/// Start a server on an ephemeral port.
///
/// `heartbeat` keeps clients from hitting their idle timeout; `None` leaves
/// the connection silent after the scripted replies.
pub async fn start(replies: Vec<String>, heartbeat: Option<Duration>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, received) = mpsc::unbounded_channel();
    let connections = Arc::new(AtomicUsize::new(0));

    let accepted = connections.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve(stream, tx.clone(), replies.clone(), heartbeat));
        }
    });

    MockServer {
        url,
        received,
        connections,
    }
}

async fn serve(
    stream: TcpStream,
    frames: mpsc::UnboundedSender<String>,
    replies: Vec<String>,
    heartbeat: Option<Duration>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let mut ticker = tokio::time::interval(heartbeat.unwrap_or(Duration::from_secs(3600)));

    loop {
        tokio::select! {
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_string();
                    let subscribe = text.contains(r#""command":"subscribe""#);
                    let _ = frames.send(text);
                    if subscribe {
                        for reply in &replies {
                            if sink.send(Message::Text(reply.clone().into())).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            _ = ticker.tick(), if heartbeat.is_some() => {
                if sink.send(Message::Text(HEARTBEAT.into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Start a server that completes the handshake, then never reads or writes.
///
/// Once the socket buffers fill up, client writes stall.
pub async fn start_stalled() -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (_tx, received) = mpsc::unbounded_channel();
    let connections = Arc::new(AtomicUsize::new(0));

    let accepted = connections.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                if let Ok(ws) = accept_async(stream).await {
                    std::future::pending::<()>().await;
                    drop(ws);
                }
            });
        }
    });

    MockServer {
        url,
        received,
        connections,
    }
}

/// A text frame far larger than the loopback socket buffers.
pub fn oversized_frame() -> String {
    "x".repeat(64 * 1024 * 1024)
}
