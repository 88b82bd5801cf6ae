use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::annotate::Annotator;
use crate::config::{ApiSettings, DEFAULT_MAX_INFLIGHT, DEFAULT_MAX_UPLOAD_BYTES};
use crate::detect::{DetectionPipeline, PipelineError};
use crate::satellite::{LiveCatalog, SatelliteStore};
use crate::CompressError;

pub mod multipart;
mod routes;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);
const COMPRESSION_LIMIT_MESSAGE: &str = "Cannot compress image below size limit";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
    pub max_inflight: usize,
    pub io_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5001".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            addr: settings.addr.clone(),
            max_upload_bytes: settings.max_upload_bytes,
            max_inflight: settings.max_inflight,
            ..Self::default()
        }
    }
}

/// Everything a request handler may touch. Only the satellite store is
/// mutable, and it sits behind a mutex.
pub struct ApiState {
    pub pipeline: DetectionPipeline,
    pub annotator: Annotator,
    pub satellites: Mutex<Box<dyn SatelliteStore>>,
    pub catalog: LiveCatalog,
    clock: fn() -> DateTime<Utc>,
}

impl ApiState {
    pub fn new(
        pipeline: DetectionPipeline,
        annotator: Annotator,
        satellites: Box<dyn SatelliteStore>,
        catalog: LiveCatalog,
    ) -> Self {
        Self {
            pipeline,
            annotator,
            satellites: Mutex::new(satellites),
            catalog,
            clock: Utc::now,
        }
    }

    /// Replace the wall clock used for satellite propagation.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
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
    state: Arc<ApiState>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self {
            cfg,
            state: Arc::new(state),
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        if self.cfg.max_inflight == 0 {
            return Err(anyhow!("api max_inflight must be greater than zero"));
        }
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
                log::error!("lookup api stopped: {}", err);
            }
        });
        log::info!("lookup api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

/// Decrements the in-flight counter when a worker finishes.
struct InflightGuard(Arc<AtomicUsize>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    state: Arc<ApiState>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let inflight = Arc::new(AtomicUsize::new(0));
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = configure_stream(&stream, cfg.io_timeout) {
                    log::warn!("dropping connection from {}: {}", peer, err);
                    continue;
                }

                if inflight.fetch_add(1, Ordering::SeqCst) >= cfg.max_inflight {
                    inflight.fetch_sub(1, Ordering::SeqCst);
                    log::warn!("lookup api overloaded; rejecting {}", peer);
                    reject_overloaded(stream);
                    continue;
                }
                let guard = InflightGuard(inflight.clone());
                let state = state.clone();
                let cfg = cfg.clone();
                std::thread::spawn(move || {
                    let _guard = guard;
                    if let Err(err) = handle_connection(stream, &state, &cfg) {
                        log::warn!("lookup api request from {} failed: {}", peer, err);
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

fn configure_stream(stream: &TcpStream, io_timeout: Duration) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(io_timeout))?;
    stream.set_write_timeout(Some(io_timeout))
}

fn reject_overloaded(mut stream: TcpStream) {
    // Runs on the accept thread; never block it for long.
    let _ = stream.set_write_timeout(Some(Duration::from_secs(1)));
    if let Err(write_err) = write_error(&mut stream, &ApiError::Overloaded) {
        log::debug!("failed to write 503: {}", write_err);
    }
}

fn handle_connection(mut stream: TcpStream, state: &ApiState, cfg: &ApiConfig) -> Result<()> {
    let request = match read_request(&mut stream, cfg.max_upload_bytes) {
        Ok(request) => request,
        Err(err) => {
            let api_err = err
                .downcast::<ApiError>()
                .unwrap_or_else(|err| ApiError::BadRequest(format!("malformed request: {}", err)));
            log::info!("rejected request: {}", api_err);
            write_error(&mut stream, &api_err)?;
            return Ok(());
        }
    };

    match routes::dispatch(state, &request) {
        Ok(response) => {
            log::debug!(
                "{} {} -> {} ({} bytes)",
                request.method,
                request.path,
                response.status,
                response.body.len()
            );
            write_response(
                &mut stream,
                response.status,
                response.content_type,
                &response.body,
            )
        }
        Err(err) => {
            match &err {
                ApiError::Internal(inner) => {
                    log::error!("{} {} failed: {:#}", request.method, request.path, inner)
                }
                other => log::info!("{} {} -> {}", request.method, request.path, other),
            }
            write_error(&mut stream, &err)
        }
    }
}

/// Request-level failures, each with a fixed HTTP status.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge(usize),
    BadGateway(String),
    Overloaded,
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::NotFound => 404,
            ApiError::MethodNotAllowed => 405,
            ApiError::PayloadTooLarge(_) => 413,
            ApiError::BadGateway(_) => 502,
            ApiError::Overloaded => 503,
            ApiError::Internal(_) => 500,
        }
    }

    /// Client-facing message. Internal details stay in the log.
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::NotFound => "not_found".to_string(),
            ApiError::MethodNotAllowed => "method_not_allowed".to_string(),
            ApiError::PayloadTooLarge(limit) => {
                format!("request body exceeds {} bytes", limit)
            }
            ApiError::BadGateway(msg) => msg.clone(),
            ApiError::Overloaded => "server busy".to_string(),
            ApiError::Internal(_) => "internal error".to_string(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Internal(err) => write!(f, "{} {}", self.status(), err),
            other => write!(f, "{} {}", other.status(), other.message()),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Decode(err) => ApiError::BadRequest(format!("invalid image: {}", err)),
            PipelineError::Compress(CompressError::LimitExceeded { .. }) => {
                ApiError::BadRequest(COMPRESSION_LIMIT_MESSAGE.to_string())
            }
            PipelineError::Compress(err) => ApiError::Internal(anyhow!(err)),
            PipelineError::Inference(err) => ApiError::BadGateway(format!("{:#}", err)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

pub(crate) struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream, max_body_bytes: usize) -> Result<HttpRequest> {
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(idx) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break idx;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
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
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();

    if headers
        .get("transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    {
        return Err(ApiError::BadRequest("chunked request bodies are not supported".to_string()).into());
    }
    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| ApiError::BadRequest("invalid content-length".to_string()))?,
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(ApiError::PayloadTooLarge(max_body_bytes).into());
    }

    let mut body = data.split_off(header_end + 4);
    if body.len() < content_length
        && headers
            .get("expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    {
        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
    }
    while body.len() < content_length {
        let want = (content_length - body.len()).min(buf.len());
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

fn write_error(stream: &mut TcpStream, err: &ApiError) -> Result<()> {
    let body = serde_json::json!({ "error": err.message() });
    write_response(
        stream,
        err.status(),
        "application/json",
        &serde_json::to_vec(&body)?,
    )
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        502 => "HTTP/1.1 502 Bad Gateway",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_limit_maps_to_fixed_400() {
        let err: ApiError = PipelineError::Compress(CompressError::LimitExceeded {
            attempts: 3,
            last_size: 10,
            budget_bytes: 5,
            last_max_dimension: 210,
        })
        .into();
        assert_eq!(err.status(), 400);
        assert_eq!(err.message(), COMPRESSION_LIMIT_MESSAGE);
    }

    #[test]
    fn inference_failure_is_bad_gateway() {
        let err: ApiError = PipelineError::Inference(anyhow!("upstream 500")).into();
        assert_eq!(err.status(), 502);
        let err: ApiError = PipelineError::Decode(anyhow!("bad magic")).into();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ApiError::Internal(anyhow!("disk on fire"));
        assert_eq!(err.status(), 500);
        assert_eq!(err.message(), "internal error");
    }

    #[test]
    fn api_error_survives_anyhow_round_trip() {
        let err: anyhow::Error = ApiError::PayloadTooLarge(10).into();
        let recovered = err.downcast_ref::<ApiError>().map(ApiError::status);
        assert_eq!(recovered, Some(413));
    }

    #[test]
    fn accepted_streams_get_blocking_io_with_timeouts() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let _client = TcpStream::connect(listener.local_addr()?)?;
        let (stream, _) = loop {
            match listener.accept() {
                Ok(pair) => break pair,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(err) => return Err(err.into()),
            }
        };

        configure_stream(&stream, Duration::from_secs(7))?;
        assert_eq!(stream.read_timeout()?, Some(Duration::from_secs(7)));
        assert_eq!(stream.write_timeout()?, Some(Duration::from_secs(7)));
        Ok(())
    }
}
