//! WebSocket transport: accepts peer connections and runs a session for each.
//!
//! Peers connect to `ws://host:port/ws/{peer_id}/{role}`. The read half of
//! every socket becomes the session's [`InboundChannel`]; the write half is
//! owned by a writer task draining the session's [`Outbox`].

use std::net::SocketAddr;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tracing::{debug, error, info, warn};

use crate::channel::{InboundChannel, Outbox, Outgoing};
use crate::error::RelayError;
use crate::hub::RelayHub;
use crate::peer::{PeerId, Role};
use crate::session::{Session, SessionReport};

/// Write half of an accepted WebSocket.
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Read half of an accepted WebSocket.
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Extract the peer id and role from a connection path.
///
/// The canonical form is `/ws/{peer_id}/{role}`; `/ws/{role}/{peer_id}` is
/// also accepted when only the first segment names a role.
pub fn parse_ws_path(path: &str) -> Result<(PeerId, Role), RelayError> {
    let rest = path
        .strip_prefix("/ws/")
        .ok_or_else(|| RelayError::InvalidAddress(format!("expected /ws/{{peer_id}}/{{role}}, got {path}")))?;
    let segments: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
    let [first, second] = segments.as_slice() else {
        return Err(RelayError::InvalidAddress(format!(
            "expected /ws/{{peer_id}}/{{role}}, got {path}"
        )));
    };
    if first.is_empty() || second.is_empty() {
        return Err(RelayError::InvalidAddress(format!("empty segment in {path}")));
    }

    match second.parse::<Role>() {
        Ok(role) => Ok((PeerId::from(*first), role)),
        Err(e) => match first.parse::<Role>() {
            Ok(role) => Ok((PeerId::from(*second), role)),
            Err(_) => Err(e),
        },
    }
}

/// Inbound side of a WebSocket peer.
pub struct WsInbound {
    peer: PeerId,
    stream: WsStream,
}

#[async_trait]
impl InboundChannel for WsInbound {
    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("Ignoring non-UTF-8 binary frame from {}", self.peer),
                },
                Ok(Message::Close(_)) => {
                    debug!("Peer {} sent close", self.peer);
                    return None;
                }
                Ok(_) => {} // Ignore ping/pong/raw frames
                Err(e) => return Some(Err(RelayError::Transport(format!("Read error: {e}")))),
            }
        }
        None
    }
}

/// Accept WebSocket connections on `listener` until shutdown.
///
/// Every accepted connection gets its own task running a [`Session`].
pub async fn start_server(
    listener: TcpListener,
    hub: RelayHub,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), RelayError> {
    let addr = listener.local_addr()?;
    info!("WebSocket relay listening on {addr}");

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        let hub = hub.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer_addr, hub).await {
                                debug!("Connection from {peer_addr} ended early: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("TCP accept failed: {e}");
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("WebSocket relay shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Handshake, then run the session to completion.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: RelayHub,
) -> Result<SessionReport, RelayError> {
    let mut addressed: Option<(PeerId, Role)> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match parse_ws_path(request.uri().path()) {
            Ok(found) => {
                addressed = Some(found);
                Ok(response)
            }
            Err(e) => {
                warn!("Rejecting handshake from {peer_addr}: {e}");
                let mut rejection = ErrorResponse::new(Some(e.to_string()));
                *rejection.status_mut() = StatusCode::BAD_REQUEST;
                Err(rejection)
            }
        }
    };

    let ws_stream = accept_hdr_async(stream, callback)
        .await
        .map_err(|e| RelayError::Transport(format!("Handshake with {peer_addr} failed: {e}")))?;
    let Some((peer_id, role)) = addressed else {
        return Err(RelayError::InvalidAddress(format!("no address from {peer_addr}")));
    };
    debug!("Accepted {role} {peer_id} from {peer_addr}");

    let (sink, stream) = ws_stream.split();
    let (outbox, outgoing) = Outbox::channel();
    let writer = tokio::spawn(write_loop(sink, outgoing, peer_id.clone()));

    let inbound = WsInbound {
        peer: peer_id.clone(),
        stream,
    };
    let report = Session::new(hub, peer_id, role, inbound, outbox).run().await;

    // The writer finishes once the last outbox clone is gone.
    let _ = writer.await;
    Ok(report)
}

/// Drain `outgoing` into the socket until a close is requested or every
/// outbox handle has been dropped.
async fn write_loop(mut sink: WsSink, mut outgoing: mpsc::UnboundedReceiver<Outgoing>, peer: PeerId) {
    while let Some(frame) = outgoing.recv().await {
        match frame {
            Outgoing::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!("Send to {peer} failed: {e}");
                    break;
                }
            }
            Outgoing::Close(reason) => {
                debug!("Closing connection to {peer}: {reason}");
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    #[test]
    fn test_parse_ws_path() {
        assert_eq!(
            parse_ws_path("/ws/C1/client").unwrap(),
            (PeerId::from("C1"), Role::Client)
        );
        assert_eq!(
            parse_ws_path("/ws/server-001/server/").unwrap(),
            (PeerId::from("server-001"), Role::Server)
        );
        // Role-first form used by some clients.
        assert_eq!(
            parse_ws_path("/ws/client/client-1700000000").unwrap(),
            (PeerId::from("client-1700000000"), Role::Client)
        );
    }

    #[test]
    fn test_parse_ws_path_rejects_bad_paths() {
        for path in ["/", "/ws/C1", "/ws//client", "/ws/C1/admin", "/peers", "/ws/a/b/c"] {
            assert!(
                matches!(parse_ws_path(path), Err(RelayError::InvalidAddress(_))),
                "{path} should be rejected"
            );
        }
    }

    async fn start(hub: RelayHub) -> (SocketAddr, broadcast::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(start_server(listener, hub, shutdown_rx));
        (addr, shutdown_tx)
    }

    async fn next_json<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text.to_string()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_pair_and_relay_over_websocket() {
        let hub = RelayHub::default();
        let (addr, shutdown_tx) = start(hub.clone()).await;

        let (mut server, _) = connect_async(format!("ws://{addr}/ws/S1/server")).await.unwrap();
        for _ in 0..100 {
            if hub.peer(&PeerId::from("S1")).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (mut client, _) = connect_async(format!("ws://{addr}/ws/C1/client")).await.unwrap();
        client
            .send(Message::text(r#"{"type":"identify","info":{"os":"x"}}"#.to_string()))
            .await
            .unwrap();

        assert_eq!(
            next_json(&mut client).await,
            serde_json::json!({"type": "connected", "partner": "S1", "partner_role": "server"})
        );
        assert_eq!(
            next_json(&mut server).await,
            serde_json::json!({"type": "client_connected", "partner": "C1", "client_info": {"os": "x"}})
        );

        server
            .send(Message::text(r#"{"type":"command","command":"uptime"}"#.to_string()))
            .await
            .unwrap();
        assert_eq!(next_json(&mut client).await["command"], "uptime");

        client
            .send(Message::text(r#"{"type":"ping"}"#.to_string()))
            .await
            .unwrap();
        assert_eq!(next_json(&mut client).await["type"], "pong");

        server.close(None).await.unwrap();
        assert_eq!(
            next_json(&mut client).await,
            serde_json::json!({"type": "partner_disconnected", "partner_id": "S1"})
        );

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_handshake_rejects_bad_path() {
        let hub = RelayHub::default();
        let (addr, shutdown_tx) = start(hub.clone()).await;

        let result = connect_async(format!("ws://{addr}/ws/only-one-segment")).await;
        assert!(result.is_err());
        assert_eq!(hub.stats().total, 0);

        let _ = shutdown_tx.send(());
    }
}
