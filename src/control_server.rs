//! Minimal embedded control server: `POST /run` accepts a YAML/JSON
//! `RunConfig` and starts a run in the background; `GET /report` returns
//! the most recently completed [`Report`] or a `running` sentinel while one
//! is in flight.
//!
//! Grounded on the original Go `RemoteServer` in `internal/server/remote.go`
//! — same sentinel strings (`running`, `start`), same 10MB body cap, same
//! single-in-flight-run guard via an atomic flag. Hand rolled on top of
//! `httparse` (already in the dependency stack for response parsing)
//! instead of pulling in a server framework the rest of the crate has no
//! other use for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::RunConfig;
use crate::report::FinalSummary;

const MAX_BODY: usize = 10 << 20;
const RUNNING: &str = "running";
const STARTED: &str = "start";

pub struct ControlServer {
    running: AtomicBool,
    last_report: Mutex<Option<FinalSummary>>,
}

impl ControlServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            last_report: Mutex::new(None),
        })
    }

    pub async fn serve(self: Arc<Self>, port: u16) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!(port, "control server listening");
        loop {
            let (stream, _) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle(stream).await {
                    tracing::debug!(error = %e, "control connection failed");
                }
            });
        }
    }

    async fn handle(self: Arc<Self>, mut stream: TcpStream) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(4096);
        let (method, path, header_end, content_length) = loop {
            let mut headers = [httparse::EMPTY_HEADER; 32];
            let mut req = httparse::Request::new(&mut headers);
            let start = buf.len();
            buf.resize(start + 4096, 0);
            let n = stream.read(&mut buf[start..]).await?;
            buf.truncate(start + n);
            if n == 0 {
                return Ok(());
            }
            if let httparse::Status::Complete(header_end) = req.parse(&buf).unwrap_or(httparse::Status::Partial) {
                let content_length = req
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                    .and_then(|h| std::str::from_utf8(h.value).ok())
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0)
                    .min(MAX_BODY);
                break (
                    req.method.unwrap_or("").to_string(),
                    req.path.unwrap_or("").to_string(),
                    header_end,
                    content_length,
                );
            }
        };

        while buf.len() < header_end + content_length {
            let start = buf.len();
            buf.resize(start + 4096, 0);
            let n = stream.read(&mut buf[start..]).await?;
            buf.truncate(start + n);
            if n == 0 {
                break;
            }
        }
        let body = &buf[header_end..(header_end + content_length).min(buf.len())];

        let (status, content_type, response_body) = match (method.as_str(), path.as_str()) {
            ("POST", "/run") => self.clone().handle_run(body),
            ("GET", "/report") => self.handle_report(),
            _ => (404, "text/plain", b"not found".to_vec()),
        };

        let response = format!(
            "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status_text(status),
            response_body.len(),
        );
        stream.write_all(response.as_bytes()).await?;
        stream.write_all(&response_body).await?;
        Ok(())
    }

    fn handle_run(self: Arc<Self>, body: &[u8]) -> (u16, &'static str, Vec<u8>) {
        if self.running.load(Ordering::Acquire) {
            return (200, "text/plain", RUNNING.as_bytes().to_vec());
        }
        let conf = match RunConfig::from_bytes(body) {
            Ok(c) => c,
            Err(e) => return (400, "text/plain", format!("invalid configuration: {e}").into_bytes()),
        };
        if let Err(e) = conf.validate() {
            return (400, "text/plain", format!("invalid configuration: {e}").into_bytes());
        }

        self.running.store(true, Ordering::Release);
        let this = self.clone();
        tokio::spawn(async move {
            let result = crate::controller::run(conf).await;
            if let Ok(report) = result {
                *this.last_report.lock().unwrap() = Some(report.final_summary());
            }
            this.running.store(false, Ordering::Release);
        });

        (200, "text/plain", STARTED.as_bytes().to_vec())
    }

    fn handle_report(&self) -> (u16, &'static str, Vec<u8>) {
        if self.running.load(Ordering::Acquire) {
            return (200, "text/plain", RUNNING.as_bytes().to_vec());
        }
        match self.last_report.lock().unwrap().as_ref() {
            Some(summary) => (
                200,
                "application/x-yaml",
                serde_yaml::to_string(summary).unwrap_or_default().into_bytes(),
            ),
            None => (404, "text/plain", b"no report available".to_vec()),
        }
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}
