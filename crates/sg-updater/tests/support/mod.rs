//! A throwaway HTTP/1.1 server for download and release tests.
//!
//! Every response closes the connection, so truncated bodies surface as an
//! early EOF on the client.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What a path answers with.
#[derive(Debug, Clone)]
pub enum Route {
    /// `body` with `Content-Length: declared` (the real length when `None`).
    Body { body: Vec<u8>, declared: Option<usize> },
    /// A `302` to another path on this server.
    Redirect(String),
    /// An empty response with this status.
    Status(u16),
    /// `status` for the first `times` hits, then `then`.
    FailThen {
        status: u16,
        times: usize,
        then: Box<Route>,
    },
    /// A JSON document.
    Json(String),
    /// An empty response with this status and extra headers.
    WithHeaders {
        status: u16,
        headers: Vec<(&'static str, String)>,
    },
}

impl Route {
    pub fn bytes(len: usize) -> Self {
        Self::Body {
            body: patterned(len),
            declared: None,
        }
    }

    pub fn truncated(sent: usize, declared: usize) -> Self {
        Self::Body {
            body: patterned(sent),
            declared: Some(declared),
        }
    }
}

/// Deterministic non-zero content.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

pub struct TestServer {
    addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl TestServer {
    pub async fn start(routes: Vec<(&str, Route)>) -> Self {
        Self::start_with(|_| {
            routes
                .into_iter()
                .map(|(path, route)| (path.to_string(), route))
                .collect()
        })
        .await
    }

    /// Start a server whose routes need to know its base URL.
    pub async fn start_with<F>(build: F) -> Self
    where
        F: FnOnce(&str) -> Vec<(String, Route)>,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<HashMap<String, Route>> =
            Arc::new(build(&format!("http://{addr}")).into_iter().collect());
        let hits = Arc::new(Mutex::new(HashMap::new()));

        let server_hits = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, Arc::clone(&routes), Arc::clone(&server_hits)));
            }
        });

        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Requests received for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

async fn serve(
    mut socket: TcpStream,
    routes: Arc<HashMap<String, Route>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let head = String::from_utf8_lossy(&request);
    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
    let hit = {
        let mut hits = hits.lock().unwrap();
        let count = hits.entry(path.clone()).or_insert(0);
        *count += 1;
        *count
    };

    let response = render(routes.get(&path), hit);
    let _ = socket.write_all(&response).await;
    let _ = socket.shutdown().await;
}

fn render(route: Option<&Route>, hit: usize) -> Vec<u8> {
    match route {
        None => status_response(404),
        Some(Route::Status(status)) => status_response(*status),
        Some(Route::Redirect(location)) => format!(
            "HTTP/1.1 302 Found\r\nLocation: {location}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        )
        .into_bytes(),
        Some(Route::FailThen {
            status,
            times,
            then,
        }) => {
            if hit <= *times {
                status_response(*status)
            } else {
                render(Some(then), hit)
            }
        }
        Some(Route::WithHeaders { status, headers }) => {
            let extra: String = headers
                .iter()
                .map(|(name, value)| format!("{name}: {value}\r\n"))
                .collect();
            format!(
                "HTTP/1.1 {status} Test\r\n{extra}Content-Length: 0\r\nConnection: close\r\n\r\n"
            )
            .into_bytes()
        }
        Some(Route::Json(body)) => {
            with_body("application/json", body.as_bytes(), body.len())
        }
        Some(Route::Body { body, declared }) => with_body(
            "application/octet-stream",
            body,
            declared.unwrap_or(body.len()),
        ),
    }
}

fn with_body(content_type: &str, body: &[u8], declared: usize) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {declared}\r\nConnection: close\r\n\r\n"
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

fn status_response(status: u16) -> Vec<u8> {
    format!("HTTP/1.1 {status} Test\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").into_bytes()
}

/// A GitHub "latest release" document.
pub fn release_json(tag: &str, assets: &[(&str, String, usize)]) -> String {
    let assets: Vec<serde_json::Value> = assets
        .iter()
        .map(|(name, url, size)| {
            serde_json::json!({
                "name": name,
                "browser_download_url": url,
                "size": size,
                "state": "uploaded",
            })
        })
        .collect();
    serde_json::json!({
        "tag_name": tag,
        "name": format!("StreamGo {tag}"),
        "body": "Bug fixes.",
        "html_url": format!("https://github.com/Bo0ii/StreamGo/releases/tag/{tag}"),
        "published_at": "2026-09-01T12:00:00Z",
        "assets": assets,
    })
    .to_string()
}
