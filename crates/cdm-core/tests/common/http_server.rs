//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves a fixed body at every path except `/missing`, which returns 404.
//! The body is written in chunks with a short pause between them so a
//! transfer can be observed (and paused) while it runs.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
            chunk_delay: Duration::ZERO,
        }
    }
}

/// Starts a server in a background thread serving `body`. Returns the base URL
/// (e.g. "http://127.0.0.1:12345/"). The server runs until the process exits.
pub fn start(body: Vec<u8>) -> String {
    start_with_options(body, ServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: ServerOptions) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            thread::spawn(move || handle(stream, &body, opts));
        }
    });
    format!("http://127.0.0.1:{}/", port)
}

fn handle(mut stream: std::net::TcpStream, body: &[u8], opts: ServerOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, path) = parse_request_line(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    if path == "/missing" {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: video/mp4\r\nConnection: close\r\n\r\n",
        body.len()
    );
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }
    for chunk in body.chunks(opts.chunk_size.max(1)) {
        if stream.write_all(chunk).is_err() {
            return;
        }
        if !opts.chunk_delay.is_zero() {
            thread::sleep(opts.chunk_delay);
        }
    }
}

/// Returns (method, path) from the request line.
fn parse_request_line(request: &str) -> (&str, &str) {
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");
    (method, path)
}
