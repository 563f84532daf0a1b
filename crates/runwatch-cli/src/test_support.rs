//! Minimal HTTP/1.1 loopback server for connector and API tests.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use url::Url;

pub fn sse_frame(id: &str, event: &str, data: &str) -> String {
    runwatch_core::sse::encode_frame(&runwatch_core::sse::SseFrame {
        id: Some(id.to_string()),
        event: Some(event.to_string()),
        data: data.to_string(),
        retry_ms: None,
    })
}

enum Reply {
    /// One event-stream body per accepted connection, then close.
    Sse(Vec<String>),
    /// Send stream headers and keep the socket open.
    HoldOpen,
    Json { status: u16, body: String },
}

pub struct LoopbackServer {
    addr: std::net::SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl LoopbackServer {
    pub async fn sse(bodies: Vec<String>) -> Self {
        Self::spawn(Reply::Sse(bodies)).await
    }

    pub async fn hold_open() -> Self {
        Self::spawn(Reply::HoldOpen).await
    }

    pub async fn json(status: u16, body: &str) -> Self {
        Self::spawn(Reply::Json {
            status,
            body: body.to_string(),
        })
        .await
    }

    async fn spawn(reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        tokio::spawn(async move {
            let mut served = 0usize;
            let mut held = Vec::new();
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                seen.lock().await.push(request);
                match &reply {
                    Reply::Sse(bodies) => {
                        let body = bodies.get(served).cloned().unwrap_or_default();
                        served += 1;
                        let _ = socket.write_all(stream_head().as_bytes()).await;
                        let _ = socket.write_all(body.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                    Reply::HoldOpen => {
                        let _ = socket.write_all(stream_head().as_bytes()).await;
                        let _ = socket.write_all(b": open\n\n").await;
                        held.push(socket);
                    }
                    Reply::Json { status, body } => {
                        let head = format!(
                            "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        );
                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(body.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                }
            }
        });
        Self { addr, requests }
    }

    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).expect("base url")
    }

    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

fn stream_head() -> &'static str {
    "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n"
}

/// Reads the request head plus any `Content-Length` body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let read = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        raw.extend_from_slice(&buf[..read]);
        let text = String::from_utf8_lossy(&raw).to_string();
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if raw.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&raw).to_string()
}
