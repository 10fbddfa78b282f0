//! Operator notification.
//!
//! A notifier receives the alert caption and, when available, the saved
//! artifact. Notification runs after the artifact is on disk, so a failed
//! delivery never loses the image.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Caption sent with every alert.
pub fn format_alert_message(confidence: f32, timestamp: &str) -> String {
    format!(
        "⚠️ WEAPON DETECTED\nConfidence: {:.2}\nDate: {}",
        confidence, timestamp
    )
}

pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver `message`, attaching the image at `photo` when given.
    fn notify(&self, message: &str, photo: Option<&Path>) -> Result<()>;
}

/// Notifier used when no delivery channel is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&self, message: &str, photo: Option<&Path>) -> Result<()> {
        let photo = photo.map(|p| p.display().to_string());
        log::warn!(
            "alert: {} (image: {})",
            message.replace('\n', " | "),
            photo.as_deref().unwrap_or("none")
        );
        Ok(())
    }
}

/// Telegram Bot API notifier (`sendPhoto` with caption, or `sendMessage`).
pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let chat_id = chat_id.into();
        if token.trim().is_empty() || chat_id.trim().is_empty() {
            return Err(anyhow!("telegram token and chat id must both be non-empty"));
        }
        Ok(Self {
            token,
            chat_id,
            api_base: TELEGRAM_API_BASE.to_string(),
        })
    }

    /// Point the notifier at another Bot API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn send_message(&self, message: &str) -> Result<()> {
        let response = ureq::post(&self.method_url("sendMessage"))
            .timeout(REQUEST_TIMEOUT)
            .send_form(&[("chat_id", self.chat_id.as_str()), ("text", message)]);
        check_response(response, "sendMessage")
    }

    fn send_photo(&self, message: &str, photo: &Path) -> Result<()> {
        let mut bytes = Vec::new();
        std::fs::File::open(photo)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .with_context(|| format!("read alert image {}", photo.display()))?;
        let file_name = photo
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "alert.jpg".to_string());

        let boundary = format!("----sentinel{:016x}", rand::random::<u64>());
        let body = MultipartBody::new(&boundary)
            .text("chat_id", &self.chat_id)
            .text("caption", message)
            .file("photo", &file_name, "image/jpeg", &bytes)
            .finish();

        let response = ureq::post(&self.method_url("sendPhoto"))
            .timeout(REQUEST_TIMEOUT)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body);
        check_response(response, "sendPhoto")
    }
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn notify(&self, message: &str, photo: Option<&Path>) -> Result<()> {
        match photo {
            Some(photo) => self.send_photo(message, photo),
            None => self.send_message(message),
        }
    }
}

fn check_response(
    response: std::result::Result<ureq::Response, ureq::Error>,
    method: &str,
) -> Result<()> {
    match response {
        Ok(_) => Ok(()),
        Err(ureq::Error::Status(code, response)) => {
            let detail = response.into_string().unwrap_or_default();
            Err(anyhow!("telegram {} failed with {}: {}", method, code, detail))
        }
        // Transport errors include the URL, which carries the bot token.
        Err(ureq::Error::Transport(transport)) => Err(anyhow!(
            "telegram {} transport error: {:?}",
            method,
            transport.kind()
        )),
    }
}

struct MultipartBody {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBody {
    fn new(boundary: &str) -> Self {
        Self {
            boundary: boundary.to_string(),
            body: Vec::new(),
        }
    }

    fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    fn file(mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                self.boundary, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn formats_caption() {
        assert_eq!(
            format_alert_message(0.7234, "2026-01-01 12:00:00"),
            "⚠️ WEAPON DETECTED\nConfidence: 0.72\nDate: 2026-01-01 12:00:00"
        );
    }

    #[test]
    fn rejects_partial_credentials() {
        assert!(TelegramNotifier::new("", "42").is_err());
        assert!(TelegramNotifier::new("token", " ").is_err());
    }

    #[test]
    fn multipart_body_layout() {
        let body = MultipartBody::new("XYZ")
            .text("chat_id", "42")
            .file("photo", "a.jpg", "image/jpeg", b"\xff\xd8")
            .finish();
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--XYZ\r\nContent-Disposition: form-data; name=\"chat_id\"\r\n\r\n42\r\n"));
        assert!(text.contains("filename=\"a.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(text.ends_with("\r\n--XYZ--\r\n"));
    }

    /// Accept one request, answer 200 and hand back the request line and body.
    fn one_shot_server() -> Result<(String, thread::JoinHandle<(String, Vec<u8>)>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(v) = lower.strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = stream;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\n{\"ok\":true}")
                .unwrap();
            (request_line, body)
        });
        Ok((format!("http://{}", addr), handle))
    }

    #[test]
    fn sends_photo_with_caption() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let photo = dir.path().join("alert_x.jpg");
        std::fs::write(&photo, b"\xff\xd8jpeg")?;

        let (base, server) = one_shot_server()?;
        let notifier = TelegramNotifier::new("T0K", "42")?.with_api_base(base);
        notifier.notify(&format_alert_message(0.9, "now"), Some(&photo))?;

        let (request_line, body) = server.join().unwrap();
        assert!(request_line.starts_with("POST /botT0K/sendPhoto "));
        let body = String::from_utf8_lossy(&body);
        assert!(body.contains("WEAPON DETECTED"));
        assert!(body.contains("filename=\"alert_x.jpg\""));
        Ok(())
    }

    #[test]
    fn sends_plain_message() -> Result<()> {
        let (base, server) = one_shot_server()?;
        let notifier = TelegramNotifier::new("T0K", "42")?.with_api_base(base);
        notifier.notify("hello", None)?;
        let (request_line, body) = server.join().unwrap();
        assert!(request_line.starts_with("POST /botT0K/sendMessage "));
        assert_eq!(String::from_utf8_lossy(&body), "chat_id=42&text=hello");
        Ok(())
    }

    #[test]
    fn log_notifier_never_fails() -> Result<()> {
        LogNotifier.notify("msg", None)
    }
}
