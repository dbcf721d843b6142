//! Administrative HTTP surface: peer listing, status and manual pairing.
//!
//! A deliberately small HTTP/1.1 listener. Each connection carries one
//! request; the response is JSON and the connection is closed afterwards.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::error::RelayError;
use crate::hub::RelayHub;
use crate::peer::{PeerId, PeerView};

/// Largest request head accepted.
const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// Deadline for receiving a complete request head.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Status and JSON body of an admin response.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminResponse {
    pub status: u16,
    pub body: Value,
}

impl AdminResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "detail": detail.into() }),
        }
    }

    fn from_relay_error(e: &RelayError) -> Self {
        Self::error(e.status_code(), e.to_string())
    }

    fn serialized<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self::ok(body),
            Err(e) => Self::from_relay_error(&RelayError::Serialization(e)),
        }
    }
}

/// `GET /peers` body.
#[derive(Debug, Serialize)]
pub struct PeerListing {
    pub peers: Vec<PeerView>,
    pub total: usize,
    pub servers: usize,
    pub clients: usize,
    pub paired: usize,
}

/// `GET /status` body.
#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub total_connections: usize,
    pub active_connections: usize,
    pub servers: usize,
    pub clients: usize,
    pub paired_connections: usize,
}

/// Route one request to its handler.
pub fn route(hub: &RelayHub, method: &str, target: &str) -> AdminResponse {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    match (method, path) {
        ("GET", "/peers") => list_peers(hub),
        ("GET", "/status") => status(hub),
        ("POST", "/relay/connect") => connect(hub, &params),
        ("POST", "/relay/disconnect") => disconnect(hub, &params),
        (_, "/peers" | "/status" | "/relay/connect" | "/relay/disconnect") => {
            AdminResponse::error(405, "Method not allowed")
        }
        _ => AdminResponse::error(404, "Not found"),
    }
}

fn list_peers(hub: &RelayHub) -> AdminResponse {
    let peers = hub.snapshot();
    let stats = hub.stats();
    AdminResponse::serialized(&PeerListing {
        total: peers.len(),
        servers: stats.servers,
        clients: stats.clients,
        paired: stats.pairs(),
        peers,
    })
}

fn status(hub: &RelayHub) -> AdminResponse {
    let stats = hub.stats();
    AdminResponse::serialized(&StatusSummary {
        total_connections: stats.total,
        active_connections: stats.active,
        servers: stats.servers,
        clients: stats.clients,
        paired_connections: stats.pairs(),
    })
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str, AdminResponse> {
    match params.get(name).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(AdminResponse::error(400, format!("Missing query parameter: {name}"))),
    }
}

fn connect(hub: &RelayHub, params: &HashMap<String, String>) -> AdminResponse {
    let (a, b) = match (required(params, "peer_a"), required(params, "peer_b")) {
        (Ok(a), Ok(b)) => (PeerId::from(a), PeerId::from(b)),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    match hub.manual_connect(&a, &b) {
        Ok(()) => {
            info!("Admin paired {a} <-> {b}");
            AdminResponse::ok(json!({ "status": "relay established", "peers": [a, b] }))
        }
        Err(e) => AdminResponse::from_relay_error(&e),
    }
}

fn disconnect(hub: &RelayHub, params: &HashMap<String, String>) -> AdminResponse {
    let id = match required(params, "peer_id") {
        Ok(id) => PeerId::from(id),
        Err(resp) => return resp,
    };
    match hub.disconnect(&id) {
        Ok(previous) => {
            match previous {
                Some(partner) => info!("Admin unpaired {id} from {partner}"),
                None => debug!("Admin disconnect on unpaired {id}"),
            }
            AdminResponse::ok(json!({ "status": "relay disconnected", "peer": id }))
        }
        Err(e) => AdminResponse::from_relay_error(&e),
    }
}

// ---------------------------------------------------------------------------
// HTTP plumbing
// ---------------------------------------------------------------------------

enum Head {
    Complete { method: String, target: String },
    Partial,
    Invalid,
}

fn parse_head(buf: &[u8]) -> Head {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(status) if status.is_complete() => match (req.method, req.path) {
            (Some(method), Some(target)) => Head::Complete {
                method: method.to_string(),
                target: target.to_string(),
            },
            _ => Head::Invalid,
        },
        Ok(_) => Head::Partial,
        Err(_) => Head::Invalid,
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        _ => "Internal Server Error",
    }
}

async fn write_response(stream: &mut TcpStream, response: &AdminResponse) -> std::io::Result<()> {
    let body = response.body.to_string();
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason_phrase(response.status),
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.shutdown().await
}

/// Read until the request head is complete. `Ok(None)` if the client hung up.
async fn read_head(stream: &mut TcpStream) -> std::io::Result<Option<Head>> {
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let mut filled = 0;

    loop {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(None);
        }
        filled += n;
        match parse_head(&buf[..filled]) {
            Head::Partial if filled < buf.len() => continue,
            Head::Partial => return Ok(Some(Head::Invalid)),
            head => return Ok(Some(head)),
        }
    }
}

async fn handle_request(
    mut stream: TcpStream,
    hub: RelayHub,
    deadline: Duration,
) -> std::io::Result<()> {
    let head = match tokio::time::timeout(deadline, read_head(&mut stream)).await {
        Ok(head) => head?,
        Err(_) => {
            debug!("Admin request head not received within {deadline:?}");
            return write_response(&mut stream, &AdminResponse::error(408, "Request timeout")).await;
        }
    };
    let (method, target) = match head {
        None => return Ok(()),
        Some(Head::Complete { method, target }) => (method, target),
        Some(_) => {
            return write_response(&mut stream, &AdminResponse::error(400, "Malformed request")).await;
        }
    };

    let response = route(&hub, &method, &target);
    debug!("Admin {method} {target} -> {}", response.status);
    write_response(&mut stream, &response).await
}

/// Serve admin requests on `listener` until shutdown.
pub async fn start_admin(
    listener: TcpListener,
    hub: RelayHub,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), RelayError> {
    let addr = listener.local_addr()?;
    info!("Admin HTTP listening on {addr}");

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        let hub = hub.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_request(stream, hub, REQUEST_TIMEOUT).await {
                                debug!("Admin request from {peer_addr} failed: {e}");
                            }
                        });
                    }
                    Err(e) => error!("Admin accept failed: {e}"),
                }
            }
            _ = shutdown.recv() => {
                info!("Admin HTTP shutting down");
                break;
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
