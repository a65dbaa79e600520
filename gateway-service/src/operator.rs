//! Minimal operator HTTP surface (spec §4.5/§4.7).
//!
//! None of the workspace's dependency stack pulls in a web framework, so
//! this is a hand-rolled request line + `Content-Length` body parser over
//! a raw `tokio::net::TcpListener`, covering `POST /command` plus the
//! param surface needed to drive C7 over the network instead of only
//! through node command frames.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use telemetry_core::{cmds_list, param_get, param_set, params_list, persistable_values, CommandOutcome, ParamDef};

use crate::state::GatewayState;
use crate::transceiver::DiscoverySlot;
use telemetry_core::{build_command_frame, CommandQueue, RadioState};

#[derive(Deserialize)]
struct CommandRequest {
    cmd: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    node_id: String,
    #[serde(default = "default_expected_acks")]
    expected_acks: usize,
    /// Seconds to block waiting for the response before falling back to a
    /// partial-ACK snapshot (spec §6 "optionally awaiting its response").
    #[serde(default)]
    wait_timeout_secs: Option<f64>,
}

fn default_expected_acks() -> usize {
    1
}

#[derive(Deserialize)]
struct ParamSetRequest {
    value: String,
}

pub struct OperatorSurface {
    queue: Arc<CommandQueue>,
    params: Vec<ParamDef>,
    command_names: Vec<String>,
    state: Arc<GatewayState>,
    discovery: DiscoverySlot,
    config_path: PathBuf,
    radio_state: Arc<RadioState>,
}

impl OperatorSurface {
    pub fn new(
        queue: Arc<CommandQueue>,
        params: Vec<ParamDef>,
        command_names: Vec<String>,
        state: Arc<GatewayState>,
        discovery: DiscoverySlot,
        config_path: PathBuf,
        radio_state: Arc<RadioState>,
    ) -> Self {
        Self { queue, params, command_names, state, discovery, config_path, radio_state }
    }

    pub async fn serve(self: Arc<Self>, bind_addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        info!(bind_addr, "operator surface listening");
        loop {
            let (socket, peer) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(socket).await {
                    warn!(error = %e, %peer, "operator connection failed");
                }
            });
        }
    }

    async fn handle_connection(&self, mut socket: TcpStream) -> anyhow::Result<()> {
        let request = read_request(&mut socket).await?;
        // `route` can block the calling thread for up to a command's
        // `wait_timeout_secs` (condvar wait inside `CommandQueue`), so it
        // runs off the async executor the same way `handle_discover`'s
        // blocking wait does.
        let (status, body) = tokio::task::block_in_place(|| self.route(&request));
        write_response(&mut socket, status, &body).await?;
        Ok(())
    }

    fn route(&self, request: &HttpRequest) -> (u16, Value) {
        match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/command") => self.handle_command(request),
            ("GET", "/gateway/params") => self.handle_params_list(request),
            ("GET", path) if path.starts_with("/gateway/param/") => {
                self.handle_param_get(&path["/gateway/param/".len()..])
            }
            ("PUT", path) if path.starts_with("/gateway/param/") => {
                self.handle_param_set(&path["/gateway/param/".len()..], request)
            }
            ("POST", "/gateway/rcfg_radio") => self.handle_rcfg_radio(),
            ("POST", "/gateway/savecfg") => self.handle_savecfg(),
            ("GET", "/commands") => self.handle_cmds_list(request),
            ("GET", "/status") => self.handle_status(),
            ("POST", "/discover") => self.handle_discover(request),
            _ => (404, json!({"e": "not found"})),
        }
    }

    /// Queues `cmd`, then — if `wait_timeout_secs` was given — blocks for
    /// up to that long for the response, falling back to the in-flight
    /// partial-ACK snapshot on timeout (spec §6).
    fn handle_command(&self, request: &HttpRequest) -> (u16, Value) {
        let parsed: CommandRequest = match serde_json::from_str(&request.body) {
            Ok(p) => p,
            Err(e) => return (400, json!({"e": format!("invalid request: {e}")})),
        };

        let (packet, _discarded_id) = build_command_frame(&parsed.cmd, &parsed.args, &parsed.node_id);
        let Some(command_id) =
            self.queue.add(&parsed.cmd, &parsed.args, &parsed.node_id, packet, parsed.expected_acks, None)
        else {
            return (503, json!({"e": "command queue full"}));
        };

        let Some(wait_secs) = parsed.wait_timeout_secs else {
            return (200, json!({"status": "queued", "cmd": parsed.cmd, "target": parsed.node_id, "command_id": command_id}));
        };

        self.queue.config().validate_wait_timeout(wait_secs);

        match self.queue.wait_for_response(&command_id, Duration::from_secs_f64(wait_secs)) {
            Some(CommandOutcome::Single(payload)) => {
                (200, json!({"status": "retired", "command_id": command_id, "response": payload}))
            }
            Some(CommandOutcome::Multi(responses)) => (
                200,
                json!({
                    "status": "retired",
                    "command_id": command_id,
                    "acked_nodes": responses.keys().collect::<Vec<_>>(),
                    "responses": responses,
                }),
            ),
            Some(CommandOutcome::Expired) => {
                (200, json!({"status": "expired", "command_id": command_id}))
            }
            None => {
                let partial = self.queue.partial_acks(&command_id);
                self.queue.cancel(&command_id);
                (
                    200,
                    json!({
                        "status": "timeout",
                        "command_id": command_id,
                        "partial_acks": partial.unwrap_or_default(),
                    }),
                )
            }
        }
    }

    fn handle_params_list(&self, request: &HttpRequest) -> (u16, Value) {
        let offset = request.query_param("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
        let (value, _consumed) = params_list(&self.params, offset);
        (200, value)
    }

    fn handle_param_get(&self, name: &str) -> (u16, Value) {
        (200, param_get(&self.params, name))
    }

    fn handle_param_set(&self, name: &str, request: &HttpRequest) -> (u16, Value) {
        let parsed: ParamSetRequest = match serde_json::from_str(&request.body) {
            Ok(p) => p,
            Err(e) => return (400, json!({"e": format!("invalid request: {e}")})),
        };
        match param_set(&self.params, name, &parsed.value) {
            Ok(()) => (200, json!({"status": "ok", "name": name})),
            Err(e) => (400, json!({"e": e.to_string()})),
        }
    }

    /// The gateway's own transceiver tick applies staged radio params
    /// eagerly (every ~100ms), so there is nothing left to kick off here;
    /// this just reports whether anything was still staged at request
    /// time, for symmetry with the node's `rcfg_radio` command handler
    /// which this endpoint's contract (spec §6) mirrors.
    fn handle_rcfg_radio(&self) -> (u16, Value) {
        let was_pending = self.radio_state.has_pending();
        (202, json!({"status": "accepted", "was_pending": was_pending}))
    }

    /// Walks the parameter registry and atomically persists every
    /// persistable entry's current value (spec §4.7/§6 `savecfg`).
    fn handle_savecfg(&self) -> (u16, Value) {
        let updates = persistable_values(&self.params);
        let update_refs: Vec<(&str, Value)> = updates.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        match telemetry_core::config::update_config_file(&self.config_path, &update_refs) {
            Ok(()) => (200, json!({"status": "saved", "keys": updates.iter().map(|(k, _)| k).collect::<Vec<_>>()})),
            Err(e) => (500, json!({"e": format!("failed to save config: {e}")})),
        }
    }

    fn handle_cmds_list(&self, request: &HttpRequest) -> (u16, Value) {
        let offset = request.query_param("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
        let (value, _consumed) = cmds_list(&self.command_names, offset);
        (200, value)
    }

    fn handle_status(&self) -> (u16, Value) {
        let last = self.state.last_packet();
        (
            200,
            json!({
                "uptime_secs": self.state.uptime().as_secs(),
                "last_packet": last.map(|p| json!({
                    "node_id": p.node_id,
                    "sensor_name": p.sensor_name,
                    "sensor_value": p.sensor_value,
                    "sensor_units": p.sensor_units,
                    "timestamp": p.timestamp,
                })),
            }),
        )
    }

    /// Hands a `DiscoveryRequest` to the transceiver loop and blocks
    /// (already off the async executor — see `handle_connection`) until
    /// its completion signal fires, returning the node list (spec §6
    /// "returning the node list when the request's signal fires").
    fn handle_discover(&self, request: &HttpRequest) -> (u16, Value) {
        let cfg = self.queue.config();
        let retries: u32 = serde_json::from_str::<Value>(&request.body)
            .ok()
            .and_then(|v| v.get("retries").and_then(Value::as_u64))
            .map(|v| v as u32)
            .unwrap_or(cfg.discovery_retries);
        let discovery = self.discovery.request(retries, cfg.initial_retry_ms, cfg.max_retry_ms, cfg.retry_multiplier);
        let wait_budget = discovery_wait_budget(retries, cfg.initial_retry_ms, cfg.max_retry_ms, cfg.retry_multiplier);
        match discovery.wait(wait_budget) {
            Some((nodes, Some(error))) => {
                warn!(?nodes, error, "discovery finished with an error");
                (200, json!({"status": "error", "nodes": nodes, "error": error}))
            }
            Some((nodes, None)) => {
                info!(?nodes, "discovery finished");
                (200, json!({"status": "ok", "nodes": nodes}))
            }
            None => (504, json!({"status": "timeout", "e": "discovery did not finish within its wait window"})),
        }
    }
}

/// Upper bound on how long to block for a discovery sweep to finish:
/// the sum of its worst-case inter-broadcast delays plus per-round
/// receive overhead, with slack, capped at 5 minutes so a caller can't
/// wedge the HTTP thread indefinitely on a pathological retry count.
fn discovery_wait_budget(retries: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> Duration {
    let mut total_ms: u64 = 0;
    let mut delay = initial_ms as f64;
    for _ in 0..retries {
        total_ms += delay as u64;
        delay = (delay * multiplier).min(max_ms as f64);
    }
    Duration::from_millis(total_ms + total_ms / 4 + 2000).min(Duration::from_secs(300))
}

struct HttpRequest {
    method: String,
    path: String,
    query: String,
    body: String,
}

impl HttpRequest {
    fn query_param(&self, key: &str) -> Option<String> {
        self.query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then(|| v.to_string())
        })
    }
}

async fn read_request(socket: &mut TcpStream) -> anyhow::Result<HttpRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("connection closed before headers completed");
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            anyhow::bail!("request headers too large");
        }
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let full_path = parts.next().unwrap_or_default().to_string();
    let (path, query) = full_path.split_once('?').map(|(p, q)| (p.to_string(), q.to_string())).unwrap_or((full_path, String::new()));

    let content_length: usize = lines
        .find_map(|line| line.to_ascii_lowercase().starts_with("content-length:").then(|| line["content-length:".len()..].trim().parse().ok()).flatten())
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest { method, path, query, body: String::from_utf8_lossy(&body).to_string() })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn write_response(socket: &mut TcpStream, status: u16, body: &Value) -> anyhow::Result<()> {
    let body_bytes = serde_json::to_vec(body)?;
    let status_text = match status {
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body_bytes.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.write_all(&body_bytes).await?;
    socket.flush().await?;
    Ok(())
}
