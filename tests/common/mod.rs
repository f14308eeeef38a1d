//! A minimal HTTP/1.1 server recording the requests it receives.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hmetrics::{Error, HttpFailureError};

/// Shows the crate's debug output when run with `RUST_LOG=hmetrics=debug`.
pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

#[derive(Debug)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body is json")
    }
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        202 => "Accepted",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn read_http_request(stream: &mut TcpStream) -> CapturedRequest {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .expect("read request line");
    let parts: Vec<&str> = request_line.trim().split(' ').collect();
    let method = parts.first().unwrap_or(&"").to_string();
    let path = parts.get(1).unwrap_or(&"").to_string();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read header");
        if line.trim().is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim().to_lowercase(), value.trim().to_string());
        if key == "content-length" {
            content_length = value.parse().unwrap_or(0);
        }
        headers.push((key, value));
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).expect("read body");
    }

    CapturedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    }
}

/// Answers every request with `status` and reports it on the channel.
pub fn spawn_mock_server(
    listener: TcpListener,
    status: u16,
) -> (SocketAddr, mpsc::Receiver<CapturedRequest>) {
    let addr = listener.local_addr().expect("listener address");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let tx = tx.clone();
            thread::spawn(move || {
                let request = read_http_request(&mut stream);
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status,
                    status_text(status)
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
                let _ = tx.send(request);
            });
        }
    });
    (addr, rx)
}

/// Collects requests arriving within `window`.
pub fn collect_for(rx: &mpsc::Receiver<CapturedRequest>, window: Duration) -> Vec<CapturedRequest> {
    let deadline = Instant::now() + window;
    let mut requests = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(request) => requests.push(request),
            Err(mpsc::RecvTimeoutError::Timeout) => break,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    requests
}

/// What a poster saw of one error.
#[derive(Debug, Clone)]
pub struct Posted {
    pub message: String,
    pub is_cancellation: bool,
    pub http: Option<HttpFailureError>,
}

/// An error poster recording everything it is given.
#[derive(Debug, Clone, Default)]
pub struct RecordingPoster {
    posted: Arc<Mutex<Vec<Posted>>>,
}

impl RecordingPoster {
    pub fn poster(&self) -> impl Fn(&Error) + Send + Sync + 'static {
        let posted = self.posted.clone();
        move |err: &Error| {
            let http = match err {
                Error::HttpStatus(failure) => Some(failure.clone()),
                _ => None,
            };
            posted.lock().unwrap().push(Posted {
                message: err.to_string(),
                is_cancellation: err.is_cancellation(),
                http,
            });
        }
    }

    pub fn posted(&self) -> Vec<Posted> {
        self.posted.lock().unwrap().clone()
    }

    pub fn cancellations(&self) -> usize {
        self.posted().iter().filter(|p| p.is_cancellation).count()
    }

    pub fn failures(&self) -> Vec<Posted> {
        self.posted()
            .into_iter()
            .filter(|p| !p.is_cancellation)
            .collect()
    }
}
