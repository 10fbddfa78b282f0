//! Loopback control API.
//!
//! A small blocking HTTP/1.1 server on its own thread. Requests start and
//! stop streams on the shared [`StreamSupervisor`] and list or serve saved
//! alert artifacts. Stream work never runs on the accept thread.

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use url::form_urlencoded;

use crate::config::PresetSettings;
use crate::engine::Preset;
use crate::ingest::{open_source, SourceSpec};
use crate::preview::PreviewViewer;
use crate::storage::AlertRecord;
use crate::stream::RecoverySettings;
use crate::supervisor::StreamSupervisor;

const MAX_REQUEST_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(2);
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const DEFAULT_RECENT_LIMIT: usize = 10;
const ARTIFACT_PREFIX: &str = "/alerts/";
const PREVIEW_PATH: &str = "/stream/preview";
const PREVIEW_POLL: Duration = Duration::from_millis(40);
const PREVIEW_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const PREVIEW_BOUNDARY: &str = "frame";

const ROUTES: &[&str] = &[
    "/health",
    "/api/alerts/recent",
    "/detect/video",
    "/detect/rtsp",
    "/detect/webcam",
    "/streams",
    "/stream/stop",
    PREVIEW_PATH,
];

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Engine constants for streams started over the API.
    pub presets: PresetSettings,
    pub recovery: RecoverySettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8800".to_string(),
            presets: PresetSettings::default(),
            recovery: RecoverySettings::default(),
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
    supervisor: Arc<StreamSupervisor>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, supervisor: Arc<StreamSupervisor>) -> Self {
        Self { cfg, supervisor }
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
        let join = std::thread::Builder::new()
            .name("sentinel-api".to_string())
            .spawn(move || {
                if let Err(err) = self.run(listener, shutdown_thread) {
                    log::error!("control api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }

    fn run(&self, listener: TcpListener, shutdown: Arc<AtomicBool>) -> Result<()> {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(err) = self.handle_connection(stream, &shutdown) {
                        log::warn!("control api request rejected: {}", err);
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream, shutdown: &Arc<AtomicBool>) -> Result<()> {
        stream.set_nonblocking(false)?;
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;
        if local.ip().is_loopback() && !peer.ip().is_loopback() {
            return write_response(&mut stream, &Response::error(403, "forbidden"));
        }

        let request = match read_request(&mut stream) {
            Ok(request) => request,
            Err(err) => {
                write_response(&mut stream, &Response::error(400, "bad_request"))?;
                return Err(err);
            }
        };
        if request.method == "GET" && request.path == PREVIEW_PATH {
            return self.open_preview(stream, &request, shutdown);
        }
        let response = self.route(&request);
        log::debug!(
            "{} {} -> {}",
            request.method,
            request.path,
            response.status
        );
        write_response(&mut stream, &response)
    }

    /// Hand a preview connection to its own thread; the accept loop never
    /// blocks on a viewer.
    fn open_preview(
        &self,
        mut stream: TcpStream,
        request: &HttpRequest,
        shutdown: &Arc<AtomicBool>,
    ) -> Result<()> {
        let Some(id) = request.param("id") else {
            return write_response(&mut stream, &Response::error(400, "missing_id"));
        };
        let slot = match self.supervisor.preview(id)? {
            Some(slot) if !slot.is_closed() => slot,
            Some(_) => return write_response(&mut stream, &Response::error(409, "stream_ended")),
            None => return write_response(&mut stream, &Response::error(404, "unknown_stream")),
        };
        let viewer = slot.attach();
        let shutdown = shutdown.clone();
        let id = id.to_string();
        log::info!("preview of stream {} opened ({} viewers)", id, slot.viewers());
        std::thread::Builder::new()
            .name(format!("preview-{}", id))
            .spawn(move || match serve_preview(stream, viewer, &shutdown) {
                Ok(()) => log::info!("preview of stream {} ended", id),
                Err(err) => log::debug!("preview of stream {} dropped: {:#}", id, err),
            })?;
        Ok(())
    }

    fn route(&self, request: &HttpRequest) -> Response {
        let method = request.method.as_str();
        let path = request.path.as_str();
        let result = match (method, path) {
            ("GET", "/health") => Ok(Response::json(200, &json!({ "status": "ok" }))),
            ("GET", "/api/alerts/recent") => self.recent_alerts(request),
            ("GET", p) if p.starts_with(ARTIFACT_PREFIX) => {
                self.artifact(&p[ARTIFACT_PREFIX.len()..])
            }
            ("POST", "/detect/video") => match request.param("path") {
                Some(path) => {
                    self.launch(request, SourceSpec::File(path.to_string()), Preset::FilePlayback)
                }
                None => Ok(Response::error(400, "missing_path")),
            },
            ("POST", "/detect/rtsp") => {
                match request.param("url").or_else(|| request.param("rtsp_url")) {
                    Some(url) => {
                        self.launch(request, SourceSpec::Network(url.to_string()), Preset::LiveStream)
                    }
                    None => Ok(Response::error(400, "missing_url")),
                }
            }
            ("POST", "/detect/webcam") => {
                match SourceSpec::device(request.param("device").unwrap_or("0")) {
                    Ok(source) => self.launch(request, source, Preset::LiveStream),
                    Err(err) => Ok(Response::error_detail(400, "invalid_source", &err)),
                }
            }
            ("GET", "/streams") => self
                .supervisor
                .list()
                .map(|streams| Response::json(200, &streams)),
            ("POST", "/stream/stop") => self.stop(request),
            (_, p) if ROUTES.contains(&p) || p.starts_with(ARTIFACT_PREFIX) => {
                Ok(Response::error(405, "method_not_allowed"))
            }
            _ => Ok(Response::error(404, "not_found")),
        };
        result.unwrap_or_else(|err| {
            log::error!("control api {} {} failed: {:#}", method, path, err);
            Response::error(500, "internal_error")
        })
    }

    fn recent_alerts(&self, request: &HttpRequest) -> Result<Response> {
        let limit = match request.param("limit") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(limit) => limit,
                Err(_) => return Ok(Response::error(400, "invalid_limit")),
            },
            None => DEFAULT_RECENT_LIMIT,
        };
        let index = self.supervisor.pipeline().sink().index();
        let records = index
            .lock()
            .map_err(|_| anyhow!("alert index lock poisoned"))?
            .recent(limit)?;
        let views: Vec<AlertView<'_>> = records.iter().map(AlertView::from).collect();
        Ok(Response::json(200, &views))
    }

    fn artifact(&self, name: &str) -> Result<Response> {
        let path = match self.supervisor.pipeline().sink().artifact_path(name) {
            Ok(path) => path,
            Err(_) => return Ok(Response::error(404, "not_found")),
        };
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Response {
                status: 200,
                content_type: image_content_type(name),
                body: bytes,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Response::error(404, "not_found"))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn launch(&self, request: &HttpRequest, source: SourceSpec, preset: Preset) -> Result<Response> {
        // Constructing the source validates the identifier without opening it.
        if let Err(err) = open_source(&source) {
            return Ok(Response::error_detail(400, "invalid_source", &err));
        }
        let mut stream_request = self
            .cfg
            .presets
            .stream_request(source, preset, &self.cfg.recovery);
        if let Some(detector) = request.param("detector") {
            if let Err(err) = self.supervisor.pipeline().detectors().resolve(Some(detector)) {
                return Ok(Response::error_detail(400, "unknown_detector", &err));
            }
            stream_request = stream_request.with_detector(detector);
        }
        let label = stream_request.source.to_string();
        let id = self.supervisor.start(stream_request)?;
        Ok(Response::json(
            202,
            &json!({
                "status": "started",
                "stream": id,
                "source": label,
                "preset": preset.as_str(),
            }),
        ))
    }

    fn stop(&self, request: &HttpRequest) -> Result<Response> {
        match request.param("id") {
            Some(id) => {
                if self.supervisor.stop(id)? {
                    Ok(Response::json(200, &json!({ "status": "stopped", "stream": id })))
                } else {
                    Ok(Response::error(404, "unknown_stream"))
                }
            }
            None => {
                let stopped = self.supervisor.stop_all()?;
                Ok(Response::json(200, &json!({ "status": "stopped", "stopped": stopped })))
            }
        }
    }
}

/// Listing entry; `image` is the URL the artifact is served under.
#[derive(Serialize)]
struct AlertView<'a> {
    image: String,
    timestamp: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<&'a str>,
}

impl<'a> From<&'a AlertRecord> for AlertView<'a> {
    fn from(record: &'a AlertRecord) -> Self {
        Self {
            image: format!("{}{}", ARTIFACT_PREFIX, record.image),
            timestamp: &record.timestamp,
            confidence: record.confidence,
            stream: record.stream.as_deref(),
        }
    }
}

fn image_content_type(name: &str) -> &'static str {
    if name.to_ascii_lowercase().ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}

#[derive(Debug)]
struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(err) => {
                log::error!("control api response encoding failed: {}", err);
                Self::error(500, "internal_error")
            }
        }
    }

    fn error(status: u16, code: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: format!(r#"{{"error":"{}"}}"#, code).into_bytes(),
        }
    }

    fn error_detail(status: u16, code: &str, err: &anyhow::Error) -> Self {
        Self::json(status, &json!({ "error": code, "detail": format!("{:#}", err) }))
    }
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    params: HashMap<String, String>,
}

impl HttpRequest {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data.len();
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let target = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let body_start = (header_end + 4).min(data.len());
    let mut body = data[body_start..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let mut params: HashMap<String, String> = HashMap::new();
    let is_form = headers
        .get("content-type")
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        params.extend(form_urlencoded::parse(&body).into_owned());
    }
    params.extend(form_urlencoded::parse(query.as_bytes()).into_owned());

    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        params,
    })
}

/// Write a `multipart/x-mixed-replace` JPEG stream until the stream ends,
/// the server shuts down or the client goes away.
fn serve_preview(
    mut stream: TcpStream,
    mut viewer: PreviewViewer,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_write_timeout(Some(PREVIEW_WRITE_TIMEOUT))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        PREVIEW_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;
    while !shutdown.load(Ordering::SeqCst) {
        match viewer.next_frame()? {
            Some(jpeg) => {
                let part = format!(
                    "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                    PREVIEW_BOUNDARY,
                    jpeg.len()
                );
                stream.write_all(part.as_bytes())?;
                stream.write_all(&jpeg)?;
                stream.write_all(b"\r\n")?;
                stream.flush()?;
            }
            None if viewer.is_closed() => break,
            None => std::thread::sleep(PREVIEW_POLL),
        }
    }
    stream.write_all(format!("--{}--\r\n", PREVIEW_BOUNDARY).as_bytes())?;
    Ok(())
}

fn write_response(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let status_line = match response.status {
        200 => "HTTP/1.1 200 OK",
        202 => "HTTP/1.1 202 Accepted",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = response.content_type,
        len = response.body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&response.body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertSink, SharedAlertIndex};
    use crate::detect::{BackendRegistry, ScriptedBackend};
    use crate::notify::LogNotifier;
    use crate::storage::InMemoryAlertIndex;
    use crate::stream::{Pipeline, StreamStatus};
    use std::sync::Mutex;

    fn server(dir: &std::path::Path) -> Result<(ApiServer, SharedAlertIndex)> {
        let index: SharedAlertIndex = Arc::new(Mutex::new(InMemoryAlertIndex::new()));
        let sink = AlertSink::new(dir, index.clone(), Arc::new(LogNotifier))?;
        let pipeline = Pipeline::new(
            Arc::new(BackendRegistry::with_backend(ScriptedBackend::default())),
            Arc::new(sink),
        );
        let supervisor = Arc::new(StreamSupervisor::new(pipeline));
        Ok((ApiServer::new(ApiConfig::default(), supervisor), index))
    }

    fn request(method: &str, target: &str) -> HttpRequest {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
            params: form_urlencoded::parse(query.as_bytes()).into_owned().collect(),
        }
    }

    fn body(response: &Response) -> serde_json::Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn unknown_routes_and_methods() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (api, _) = server(dir.path())?;
        assert_eq!(api.route(&request("GET", "/nope")).status, 404);
        assert_eq!(api.route(&request("GET", "/detect/video")).status, 405);
        assert_eq!(api.route(&request("DELETE", "/streams")).status, 405);
        assert_eq!(api.route(&request("GET", "/health")).status, 200);
        Ok(())
    }

    #[test]
    fn recent_alerts_are_served_as_urls() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (api, index) = server(dir.path())?;
        {
            let mut index = index.lock().unwrap();
            let mut older = AlertRecord::new("alert_a.jpg", chrono::Local::now(), 0.7, "file-1");
            older.created_at_ms -= 1000;
            index.record(&older)?;
            index.record(&AlertRecord::new("alert_b.jpg", chrono::Local::now(), 0.9, "file-1"))?;
        }

        let response = api.route(&request("GET", "/api/alerts/recent?limit=1"));
        assert_eq!(response.status, 200);
        let listed = body(&response);
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["image"], "/alerts/alert_b.jpg");
        assert_eq!(listed[0]["stream"], "file-1");

        let all = api.route(&request("GET", "/api/alerts/recent"));
        assert_eq!(body(&all).as_array().unwrap().len(), 2);

        assert_eq!(api.route(&request("GET", "/api/alerts/recent?limit=x")).status, 400);
        Ok(())
    }

    #[test]
    fn serves_artifacts_inside_alert_dir_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (api, _) = server(dir.path())?;
        std::fs::write(dir.path().join("alert_1.jpg"), b"\xff\xd8")?;

        let response = api.route(&request("GET", "/alerts/alert_1.jpg"));
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "image/jpeg");
        assert_eq!(response.body, b"\xff\xd8");

        assert_eq!(api.route(&request("GET", "/alerts/missing.jpg")).status, 404);
        assert_eq!(api.route(&request("GET", "/alerts/../secret")).status, 404);
        Ok(())
    }

    #[test]
    fn starts_and_stops_streams() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (api, _) = server(dir.path())?;

        assert_eq!(api.route(&request("POST", "/detect/video")).status, 400);
        assert_eq!(
            api.route(&request("POST", "/detect/rtsp?url=ftp%3A%2F%2Fcam")).status,
            400
        );

        let started = api.route(&request("POST", "/detect/rtsp?url=stub%3A%2F%2Fcam"));
        assert_eq!(started.status, 202);
        let started = body(&started);
        assert_eq!(started["preset"], "live-stream");
        let id = started["stream"].as_str().unwrap().to_string();
        assert!(id.starts_with("network-"));

        let listed = body(&api.route(&request("GET", "/streams")));
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let stopped = api.route(&request("POST", &format!("/stream/stop?id={}", id)));
        assert_eq!(stopped.status, 200);
        assert_eq!(api.supervisor.join(&id)?.status, StreamStatus::Stopped);
        assert_eq!(api.route(&request("POST", "/stream/stop?id=nope")).status, 404);
        Ok(())
    }

    #[test]
    fn file_playback_runs_to_completion() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (api, _) = server(dir.path())?;
        let started = api.route(&request(
            "POST",
            "/detect/video?path=stub%3A%2F%2Fclip%3Fframes%3D4",
        ));
        assert_eq!(started.status, 202);
        let id = body(&started)["stream"].as_str().unwrap().to_string();
        let report = api.supervisor.join(&id)?;
        assert_eq!(report.status, StreamStatus::Completed);
        assert_eq!(report.frames_processed, 4);
        Ok(())
    }
}
