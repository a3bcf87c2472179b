// src/fetch/test_server.rs
//! Minimal HTTP/1.1 server on a local port, for fetch and pipeline tests.
//!
//! Responses are written by hand because `Route::Truncated` needs a
//! Content-Length that disagrees with the body, which a framework would fix up.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

#[derive(Clone)]
pub(crate) enum Route {
    Ok(Vec<u8>),
    Status(u16),
    /// `206 Partial Content` with a Content-Length matching `body`.
    Partial(Vec<u8>),
    /// Announces `claimed` bytes but closes after sending `body`.
    Truncated { body: Vec<u8>, claimed: usize },
}

pub(crate) struct TestServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn spawn(routes: Vec<(&str, Route)>) -> Self {
        let routes: Arc<HashMap<String, Route>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, route)| (path.to_string(), route))
                .collect(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                let routes = routes.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let _ = respond(sock, &routes, &counter).await;
                });
            }
        });
        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// A URL on a port nothing listens on.
pub(crate) async fn unreachable_url(path: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}{}", addr, path)
}

async fn respond(
    mut sock: TcpStream,
    routes: &HashMap<String, Route>,
    hits: &AtomicUsize,
) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = sock.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }
    hits.fetch_add(1, Ordering::SeqCst);

    let text = String::from_utf8_lossy(&request);
    let path = text.split_whitespace().nth(1).unwrap_or("/").to_string();

    let (status, body, claimed) = match routes.get(&path) {
        Some(Route::Ok(body)) => (200, body.clone(), body.len()),
        Some(Route::Status(code)) => (*code, Vec::new(), 0),
        Some(Route::Partial(body)) => (206, body.clone(), body.len()),
        Some(Route::Truncated { body, claimed }) => (200, body.clone(), *claimed),
        None => (404, Vec::new(), 0),
    };
    let head = format!(
        "HTTP/1.1 {} X\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status, claimed
    );
    sock.write_all(head.as_bytes()).await?;
    sock.write_all(&body).await?;
    sock.shutdown().await
}
