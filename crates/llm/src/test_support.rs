//! Minimal HTTP/1.1 responder for exercising the server engine and the
//! supervisor health loop against a local socket.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use url::Url;

/// One canned response.
pub struct Canned {
    pub status: &'static str,
    pub content_type: &'static str,
    pub body: String,
    /// Send the body in two writes, split at this byte offset
    pub split_at: Option<usize>,
}

impl Canned {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            status: "200 OK",
            content_type: "application/json",
            body: body.to_string(),
            split_at: None,
        }
    }

    pub fn sse(lines: &[&str]) -> Self {
        let body = lines
            .iter()
            .map(|l| format!("{}\n\n", l))
            .collect::<String>();
        Self {
            status: "200 OK",
            content_type: "text/event-stream",
            body,
            split_at: None,
        }
    }

    pub fn status(status: &'static str, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.to_string(),
            split_at: None,
        }
    }
}

/// Serve `responses` in order, one connection each. The handle yields the
/// raw requests received.
pub async fn serve(responses: Vec<Canned>) -> (Url, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for canned in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut socket).await);
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                canned.status,
                canned.content_type,
                canned.body.len(),
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            let body = canned.body.as_bytes();
            match canned.split_at {
                Some(at) => {
                    socket.write_all(&body[..at]).await.unwrap();
                    socket.flush().await.unwrap();
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    socket.write_all(&body[at..]).await.unwrap();
                }
                None => socket.write_all(body).await.unwrap(),
            }
            let _ = socket.shutdown().await;
        }
        requests
    });
    (Url::parse(&format!("http://{}", addr)).unwrap(), handle)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = socket.read(&mut tmp).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
            let length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= pos + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Body of a raw request, parsed as JSON.
pub fn request_json(raw: &str) -> serde_json::Value {
    let body = raw.split("\r\n\r\n").nth(1).unwrap_or("");
    serde_json::from_str(body).unwrap()
}
