//! HTTP surface: `/predict`, `/history`, `/results/<name>`, `/live_feed`.
//!
//! Plain HTTP/1.1 over `TcpListener`, one request per connection. The accept
//! loop is non-blocking so `ApiHandle::stop` can end it; each connection is
//! served on its own thread.

pub mod multipart;

use crate::camera::{Camera, CameraConfig};
use crate::config::FirewatchConfig;
use crate::detect::SharedDetector;
use crate::pipeline::{InferencePipeline, Upload};
use crate::storage::StoreError;
use crate::stream::{self, LiveStream};
use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const LIVE_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const NO_IMAGE: &str = "No image provided";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ApiConfig {
    pub fn from_config(config: &FirewatchConfig) -> Self {
        Self {
            addr: config.api_addr.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

/// Everything a request handler needs, shared across connection threads.
pub struct AppState {
    pipeline: InferencePipeline,
    camera: CameraConfig,
    camera_busy: AtomicBool,
}

impl AppState {
    pub fn new(pipeline: InferencePipeline, camera: CameraConfig) -> Self {
        Self {
            pipeline,
            camera,
            camera_busy: AtomicBool::new(false),
        }
    }

    pub fn open(config: &FirewatchConfig, detector: SharedDetector) -> Result<Self> {
        let pipeline = InferencePipeline::open(config, detector)?;
        Ok(Self::new(pipeline, config.camera.clone()))
    }

    pub fn pipeline(&self) -> &InferencePipeline {
        &self.pipeline
    }
}

/// Clears the camera flag when the live stream ends, however it ends.
struct CameraLease<'a>(&'a AtomicBool);

impl<'a> CameraLease<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for CameraLease<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting and signal open live streams to end.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: Arc<AppState>) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let state = self.state;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, state, shutdown_thread) {
                log::error!("api server stopped: {}", err);
            }
        });

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
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let cfg = Arc::new(cfg);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let state = state.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &cfg, &state, &shutdown) {
                        log::warn!("request from {} rejected: {}", peer, err);
                    }
                });
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
enum RequestError {
    #[error("request body of {0} bytes exceeds the upload limit")]
    TooLarge(usize),
    #[error("chunked request bodies are not supported")]
    LengthRequired,
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    state: &AppState,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream, cfg.max_upload_bytes) {
        Ok(request) => request,
        Err(RequestError::TooLarge(len)) => {
            write_error(&mut stream, 413, "payload_too_large")?;
            return Err(anyhow!("upload of {} bytes refused", len));
        }
        Err(RequestError::LengthRequired) => {
            write_error(&mut stream, 411, "length_required")?;
            return Ok(());
        }
        Err(RequestError::Malformed(msg)) => {
            write_error(&mut stream, 400, "bad_request")?;
            return Err(anyhow!("malformed request: {}", msg));
        }
        Err(RequestError::Io(err)) => return Err(err.into()),
    };
    log::debug!("{} {}", request.method, request.path);

    if request.method == "OPTIONS" {
        return write_response(&mut stream, 204, "text/plain", b"");
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json(&mut stream, 200, &json!({"status": "ok"})),
        ("POST", "/predict") => handle_predict(&mut stream, state, &request),
        ("GET", "/history") => handle_history(&mut stream, state),
        ("GET", "/live_feed") => handle_live_feed(stream, state, shutdown),
        ("GET", path) if path.starts_with("/results/") => {
            handle_result(&mut stream, state, &path["/results/".len()..])
        }
        (_, path) if is_known_route(path) => write_error(&mut stream, 405, "method_not_allowed"),
        _ => write_error(&mut stream, 404, "not_found"),
    }
}

fn is_known_route(path: &str) -> bool {
    matches!(path, "/health" | "/predict" | "/history" | "/live_feed")
        || path.starts_with("/results/")
}

fn handle_predict(stream: &mut TcpStream, state: &AppState, request: &HttpRequest) -> Result<()> {
    let upload = match image_upload(request) {
        Some(upload) => upload,
        None => return write_error(stream, 400, NO_IMAGE),
    };
    match state.pipeline.predict(&upload) {
        Ok(response) => {
            let payload = serde_json::to_vec(&response)?;
            write_response(stream, 200, "application/json", &payload)
        }
        Err(err) => {
            log::error!("prediction failed: {:#}", err);
            write_error(stream, 500, &format!("Prediction failed: {:#}", err))
        }
    }
}

/// The non-empty `image` part of a multipart body, if any.
fn image_upload(request: &HttpRequest) -> Option<Upload> {
    let content_type = request.headers.get("content-type")?;
    let boundary = multipart::boundary_from_content_type(content_type)?;
    let parts = match multipart::parse_multipart(&request.body, &boundary) {
        Ok(parts) => parts,
        Err(err) => {
            log::debug!("unreadable multipart body: {}", err);
            return None;
        }
    };
    parts
        .into_iter()
        .find(|part| part.name == "image")
        .filter(|part| !part.data.is_empty())
        .map(|part| Upload {
            filename: part.filename,
            bytes: part.data,
        })
}

fn handle_history(stream: &mut TcpStream, state: &AppState) -> Result<()> {
    match state.pipeline.history() {
        Ok(entries) => {
            let payload = serde_json::to_vec(&entries)?;
            write_response(stream, 200, "application/json", &payload)
        }
        Err(err) => {
            log::error!("history read failed: {:#}", err);
            write_error(stream, 500, &format!("History unavailable: {:#}", err))
        }
    }
}

fn handle_result(stream: &mut TcpStream, state: &AppState, reference: &str) -> Result<()> {
    match state.pipeline.retrieve(reference) {
        Ok(bytes) => write_response(stream, 200, "image/jpeg", &bytes),
        Err(StoreError::NotFound(_)) => write_error(stream, 404, "not_found"),
        Err(err) => {
            log::error!("result lookup for {} failed: {}", reference, err);
            write_error(stream, 500, "result_unavailable")
        }
    }
}

fn handle_live_feed(mut stream: TcpStream, state: &AppState, shutdown: &AtomicBool) -> Result<()> {
    let Some(_lease) = CameraLease::acquire(&state.camera_busy) else {
        return write_error(&mut stream, 503, "camera_busy");
    };
    stream.set_write_timeout(Some(LIVE_WRITE_TIMEOUT))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        stream::content_type()
    );
    stream.write_all(header.as_bytes())?;

    let mut camera = match Camera::open(state.camera.clone()) {
        Ok(camera) => camera,
        Err(err) => {
            log::warn!("live feed: camera unavailable: {:#}", err);
            return Ok(());
        }
    };
    log::info!("live feed started on {}", state.camera.device);
    let pipeline = &state.pipeline;
    let stats = LiveStream::new(
        pipeline.detector(),
        pipeline.params(),
        state.camera.target_fps,
        shutdown,
    )
    .run(&mut camera, &mut stream)?;
    log::info!(
        "live feed ended after {} frames ({:?}); camera captured {}",
        stats.frames_sent,
        stats.reason,
        camera.stats().frames_captured
    );
    Ok(())
}

fn read_request(stream: &mut TcpStream, max_body: usize) -> Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::Malformed("headers too large".to_string()));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("connection closed mid-headers".to_string()));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".to_string()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".to_string()))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".to_string()))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    if headers
        .get("transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    {
        return Err(RequestError::LengthRequired);
    }
    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed(format!("bad content-length '{}'", value)))?,
        None => 0,
    };
    if content_length > max_body {
        return Err(RequestError::TooLarge(content_length));
    }

    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    if body.len() < content_length {
        let already = body.len();
        body.resize(content_length, 0);
        stream.read_exact(&mut body[already..])?;
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

fn write_error(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    write_json(stream, status, &json!({ "error": message }))
}

fn write_json(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    write_response(stream, status, "application/json", body.to_string().as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}
