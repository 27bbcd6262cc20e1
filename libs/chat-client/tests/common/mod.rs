use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

use chat_common::Envelope;

/// How the fake gateway treats heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    /// Answer every `ping` with `pong`.
    AnswerPings,
    /// Swallow everything — a silently dead peer.
    Silent,
}

/// Minimal in-test gateway: accepts WebSocket connections, records every
/// parsed inbound envelope, counts accepts, and can push envelopes to all
/// connected sockets. `kill` closes the listener and every live socket.
pub struct TestServer {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
    push_tx: broadcast::Sender<Envelope>,
    close_tx: broadcast::Sender<()>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn(mode: ServerMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (push_tx, _) = broadcast::channel(64);
        let (close_tx, _) = broadcast::channel(1);

        let accept_counter = Arc::clone(&accepted);
        let push_for_conns = push_tx.clone();
        let close_for_conns = close_tx.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accept_counter.fetch_add(1, Ordering::SeqCst);
                // Subscribe before the handshake so nothing pushed after
                // the client observes Connected can be missed.
                let push_rx = push_for_conns.subscribe();
                let close_rx = close_for_conns.subscribe();
                let ws = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => continue,
                };
                tokio::spawn(serve_connection(ws, mode, inbound_tx.clone(), push_rx, close_rx));
            }
        });

        Self {
            addr,
            accepted,
            inbound: inbound_rx,
            push_tx,
            close_tx,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Push an envelope to every connected socket.
    pub fn push(&self, envelope: Envelope) {
        let _ = self.push_tx.send(envelope);
    }

    /// Stop listening and close every live socket.
    pub fn kill(&self) {
        self.accept_task.abort();
        let _ = self.close_tx.send(());
    }
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mode: ServerMode,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
    mut push_rx: broadcast::Receiver<Envelope>,
    mut close_rx: broadcast::Receiver<()>,
) {
    let (mut tx, mut rx) = ws.split();
    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
                            continue;
                        };
                        let answer_pong = mode == ServerMode::AnswerPings
                            && matches!(envelope, Envelope::Ping { .. });
                        let _ = inbound_tx.send(envelope);
                        if answer_pong {
                            let pong = serde_json::to_string(&Envelope::Pong).unwrap();
                            if tx.send(Message::Text(pong.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            pushed = push_rx.recv() => {
                match pushed {
                    Ok(envelope) => {
                        let json = serde_json::to_string(&envelope).unwrap();
                        if tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = close_rx.recv() => {
                let _ = tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
