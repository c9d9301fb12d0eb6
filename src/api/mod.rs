//! HTTP control surface.
//!
//! Minimal HTTP/1.1 over `std::net`: one request per connection, JSON bodies, a
//! thread per connection (configure blocks while the previous supervisor drains,
//! previews stream for a while). Routes:
//!
//! - `POST /configure`
//! - `GET /stream/<site>/<index>[?preview=1]`
//! - `GET /sites`, `GET /sites/<site>`, `DELETE /sites/<site>`
//! - `GET /health`

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::MonitorError;
use crate::registry::{ConfigureOutcome, SupervisorRegistry};
use crate::site::{parse_configure_request, SiteDefaults};

#[cfg(feature = "preview")]
pub mod preview;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Connections served concurrently; extra ones get 503.
    pub max_connections: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            max_connections: 32,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stops accepting connections. Requests already in flight finish on their own.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

struct ApiState {
    registry: Arc<SupervisorRegistry>,
    defaults: SiteDefaults,
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: Arc<ApiState>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, registry: Arc<SupervisorRegistry>, defaults: SiteDefaults) -> Self {
        Self {
            cfg,
            state: Arc::new(ApiState { registry, defaults }),
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;
        log::info!("control api listening on http://{}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg.clone();
        let state = self.state.clone();
        let join = std::thread::Builder::new()
            .name("control-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, cfg, state, shutdown_thread) {
                    log::error!("control api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    state: Arc<ApiState>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let in_flight = Arc::new(AtomicUsize::new(0));
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((mut stream, _)) => {
                stream.set_nonblocking(false)?;
                if in_flight.load(Ordering::SeqCst) >= cfg.max_connections {
                    let _ = write_json(&mut stream, 503, &json!({"error": "busy"}));
                    continue;
                }
                in_flight.fetch_add(1, Ordering::SeqCst);
                let state = state.clone();
                let in_flight_conn = in_flight.clone();
                let spawned = std::thread::Builder::new()
                    .name("control-api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &state) {
                            log::warn!("control api request failed: {}", err);
                        }
                        in_flight_conn.fetch_sub(1, Ordering::SeqCst);
                    });
                if let Err(err) = spawned {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    log::error!("control api could not spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
#[error("request exceeds {limit} bytes")]
struct RequestTooLarge {
    limit: usize,
}

fn handle_connection(mut stream: TcpStream, state: &ApiState) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json(&mut stream, 403, &json!({"error": "forbidden"}))?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            if err.downcast_ref::<RequestTooLarge>().is_some() {
                write_json(
                    &mut stream,
                    413,
                    &json!({"error": "payload_too_large", "message": err.to_string()}),
                )?;
            } else {
                write_json(
                    &mut stream,
                    400,
                    &json!({"error": "bad_request", "message": err.to_string()}),
                )?;
            }
            return Err(err);
        }
    };
    log::debug!("{} {}", request.method, request.raw_path);

    let segments: Vec<&str> = request
        .path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["health"]) => {
            let sites = state.registry.sites().len();
            let running = state.registry.running_supervisors();
            // A site whose supervisor died stays listed until it is reconfigured.
            let status = if running < sites { "degraded" } else { "ok" };
            write_json(
                &mut stream,
                200,
                &json!({"status": status, "sites": sites, "running": running}),
            )
        }
        ("POST", ["configure"]) => {
            let (status, body) = configure(state, &request.body);
            write_json(&mut stream, status, &body)
        }
        ("GET", ["sites"]) => {
            let sites: Vec<Value> = state
                .registry
                .sites()
                .iter()
                .map(|config| {
                    json!({
                        "site": config.name,
                        "cameras": config.camera_count(),
                        "storage_target": config.storage_target,
                        "running": state.registry.is_running(&config.name).unwrap_or(false),
                    })
                })
                .collect();
            write_json(&mut stream, 200, &json!({ "sites": sites }))
        }
        ("GET", ["sites", site]) => match state.registry.lookup(site) {
            Some(config) => {
                let mut body = serde_json::to_value(&*config)?;
                body["running"] = json!(state.registry.is_running(site).unwrap_or(false));
                write_json(&mut stream, 200, &body)
            }
            None => write_error(&mut stream, &MonitorError::SiteNotFound(site.to_string())),
        },
        ("DELETE", ["sites", site]) => match state.registry.remove(site) {
            Ok(summary) => write_json(
                &mut stream,
                200,
                &json!({
                    "status": "removed",
                    "site": summary.site,
                    "recordings_drained": summary.drained,
                }),
            ),
            Err(err) => write_anyhow(&mut stream, &err),
        },
        ("GET", ["stream", site, index]) => {
            // Non-numeric indices are out of range like any other.
            let index = index.parse::<usize>().unwrap_or(0);
            let source = match state.registry.stream_source(site, index) {
                Ok(source) => source,
                Err(err) => return write_error(&mut stream, &err),
            };
            if request.query_flag("preview") {
                return stream_preview(&mut stream, state, &source);
            }
            let site = state
                .registry
                .lookup(site)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| site.to_string());
            write_json(
                &mut stream,
                200,
                &json!({"site": site, "camera": index, "source": source}),
            )
        }
        (_, ["health"]) | (_, ["configure"]) | (_, ["sites"]) | (_, ["sites", _]) => {
            write_json(&mut stream, 405, &json!({"error": "method_not_allowed"}))
        }
        (_, ["stream", _, _]) => {
            write_json(&mut stream, 405, &json!({"error": "method_not_allowed"}))
        }
        _ => write_json(&mut stream, 404, &json!({"error": "not_found"})),
    }
}

fn configure(state: &ApiState, body: &[u8]) -> (u16, Value) {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => {
            return error_body(&MonitorError::configuration(
                "body",
                format!("request body is not valid JSON: {}", err),
            ))
        }
    };
    let config = match parse_configure_request(&value, &state.defaults) {
        Ok(config) => config,
        Err(err) => {
            log::info!("configure rejected: {}", err);
            return error_body(&err);
        }
    };
    let site = config.name.clone();
    let cameras = config.camera_count();
    match state.registry.reconfigure(config) {
        Ok(ConfigureOutcome::Created) => (
            201,
            json!({"status": "created", "site": site, "cameras": cameras}),
        ),
        Ok(ConfigureOutcome::Updated) => (
            200,
            json!({"status": "updated", "site": site, "cameras": cameras}),
        ),
        Err(err) => anyhow_body(&err),
    }
}

#[cfg(feature = "preview")]
fn stream_preview(stream: &mut TcpStream, state: &ApiState, source: &str) -> Result<()> {
    let opener = state.registry.context().sources.clone();
    let sent = preview::stream(stream, opener.as_ref(), source, preview::MAX_PREVIEW_FRAMES)?;
    log::debug!("preview of {} ended after {} frames", source, sent);
    Ok(())
}

#[cfg(not(feature = "preview"))]
fn stream_preview(stream: &mut TcpStream, _state: &ApiState, _source: &str) -> Result<()> {
    write_json(
        stream,
        501,
        &json!({"error": "not_implemented", "message": "built without preview support"}),
    )
}

fn error_body(err: &MonitorError) -> (u16, Value) {
    match err {
        MonitorError::Configuration { field, message } => (
            400,
            json!({"error": "invalid_request", "field": field, "message": message}),
        ),
        MonitorError::SiteNotFound(_) | MonitorError::CameraNotFound { .. } => (
            404,
            json!({"error": "not_found", "message": err.to_string()}),
        ),
        _ => (
            500,
            json!({"error": "internal", "message": err.to_string()}),
        ),
    }
}

fn anyhow_body(err: &anyhow::Error) -> (u16, Value) {
    match err.downcast_ref::<MonitorError>() {
        Some(err) => error_body(err),
        None => (
            500,
            json!({"error": "internal", "message": format!("{:#}", err)}),
        ),
    }
}

fn write_error(stream: &mut TcpStream, err: &MonitorError) -> Result<()> {
    let (status, body) = error_body(err);
    write_json(stream, status, &body)
}

fn write_anyhow(stream: &mut TcpStream, err: &anyhow::Error) -> Result<()> {
    let (status, body) = anyhow_body(err);
    write_json(stream, status, &body)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestTooLarge {
                limit: MAX_HEADER_BYTES,
            }
            .into());
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(RequestTooLarge {
            limit: MAX_BODY_BYTES,
        }
        .into());
    }
    let mut body = data[header_end + 4..].to_vec();
    body.truncate(content_length);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        let take = n.min(content_length - body.len());
        body.extend_from_slice(&buf[..take]);
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path,
        raw_path: raw_path.to_string(),
        body,
    })
}

fn write_json(stream: &mut TcpStream, status: u16, body: &Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        201 => "HTTP/1.1 201 Created",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        501 => "HTTP/1.1 501 Not Implemented",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line(status),
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
    body: Vec<u8>,
}

impl HttpRequest {
    /// True for `?name=1`, `?name=true` or a bare `?name`.
    fn query_flag(&self, name: &str) -> bool {
        let Some(query) = self.raw_path.split('?').nth(1) else {
            return false;
        };
        query.split('&').any(|pair| match pair.split_once('=') {
            Some((k, v)) => k == name && matches!(v, "1" | "true" | "yes"),
            None => pair == name,
        })
    }
}
