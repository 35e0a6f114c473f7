use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::error::TransportError;
use crate::http::{HttpExchange, HttpRequest, HttpResponse};

/// In-memory exchange playing back scripted outcomes; the last one repeats.
pub(crate) struct FakeExchange {
    name: String,
    outcomes: Vec<Result<HttpResponse, TransportError>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeExchange {
    pub(crate) fn new(name: &str, outcomes: Vec<Result<HttpResponse, TransportError>>) -> Self {
        Self {
            name: name.to_string(),
            outcomes,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests().len()
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }
}

impl HttpExchange for FakeExchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        request: &HttpRequest,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let index = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|_| TransportError::new(crate::error::TransportErrorKind::Network, "poisoned"))?;
            requests.push(request.clone());
            requests.len() - 1
        };
        self.outcomes
            .get(index)
            .or_else(|| self.outcomes.last())
            .cloned()
            .unwrap_or_else(|| Ok(respond(200, b"{}")))
    }
}

pub(crate) fn respond(status: u16, body: &[u8]) -> HttpResponse {
    HttpResponse {
        status,
        headers: Default::default(),
        body: body.to_vec(),
    }
}

pub(crate) fn respond_json(status: u16, value: Value) -> HttpResponse {
    respond(status, value.to_string().as_bytes())
}

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Respond {
        status: u16,
        content_type: Option<String>,
        body: Vec<u8>,
    },
    /// Read the request, then close without answering.
    Drop,
    /// Read the request, then hold the socket open before closing it.
    Stall(Duration),
}

impl Reply {
    pub(crate) fn json(status: u16, value: Value) -> Self {
        Self::Respond {
            status,
            content_type: Some("application/json".to_string()),
            body: value.to_string().into_bytes(),
        }
    }

    pub(crate) fn text(status: u16, body: &str) -> Self {
        Self::Respond {
            status,
            content_type: Some("text/plain".to_string()),
            body: body.as_bytes().to_vec(),
        }
    }

    pub(crate) fn bytes(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self::Respond {
            status,
            content_type: Some(content_type.to_string()),
            body,
        }
    }

    pub(crate) fn untyped(status: u16, body: Vec<u8>) -> Self {
        Self::Respond {
            status,
            content_type: None,
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) head: String,
    pub(crate) body: Vec<u8>,
}

/// Loopback HTTP/1.1 server answering connection `n` with reply `n`; the last
/// reply repeats once the script runs out.
pub(crate) struct ScriptedServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedServer {
    pub(crate) fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let hits_for_thread = Arc::clone(&hits);
        let requests_for_thread = Arc::clone(&requests);
        thread::spawn(move || {
            for (idx, stream) in listener.incoming().enumerate() {
                let Ok(stream) = stream else {
                    continue;
                };
                let reply = replies
                    .get(idx)
                    .or_else(|| replies.last())
                    .cloned()
                    .unwrap_or(Reply::Drop);
                handle(stream, reply, &hits_for_thread, &requests_for_thread);
            }
        });
        Self {
            addr,
            hits,
            requests,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub(crate) fn url_with_host(&self, host: &str, path: &str) -> String {
        format!("http://{}:{}{}", host, self.addr.port(), path)
    }

    pub(crate) fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }
}

fn handle(
    mut stream: TcpStream,
    reply: Reply,
    hits: &AtomicUsize,
    requests: &Mutex<Vec<RecordedRequest>>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let recorded = read_request(&mut stream);
    hits.fetch_add(1, Ordering::SeqCst);
    if let Ok(mut items) = requests.lock() {
        items.push(recorded);
    }
    match reply {
        Reply::Respond {
            status,
            content_type,
            body,
        } => {
            let mut head = format!("HTTP/1.1 {status} {}\r\n", reason(status));
            if let Some(content_type) = content_type {
                head.push_str(&format!("Content-Type: {content_type}\r\n"));
            }
            head.push_str(&format!(
                "Content-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            ));
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
            let _ = stream.flush();
        }
        Reply::Drop => {}
        Reply::Stall(duration) => thread::sleep(duration),
    }
}

fn read_request(stream: &mut TcpStream) -> RecordedRequest {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find(&raw, b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => {
                return RecordedRequest {
                    head: String::from_utf8_lossy(&raw).into_owned(),
                    body: Vec::new(),
                }
            }
            Ok(read) => raw.extend_from_slice(&chunk[..read]),
        }
    };
    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let lowered = head.to_ascii_lowercase();
    let content_length = lowered
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok());
    let chunked = lowered.contains("transfer-encoding: chunked");
    let mut body = raw[header_end..].to_vec();
    loop {
        let complete = match content_length {
            Some(length) => body.len() >= length,
            None if chunked => find(&body, b"0\r\n\r\n").is_some(),
            None => true,
        };
        if complete {
            break;
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(read) => body.extend_from_slice(&chunk[..read]),
        }
    }
    RecordedRequest { head, body }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
