//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves a fixed set of paths with canned status and body; anything else is
//! answered with 404. Every request gets its own connection (`Connection: close`).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Route {
            status: 200,
            content_type: None,
            body: body.into(),
        }
    }

    /// A 200 html page whose body is already encoded in `charset`.
    pub fn html(charset: &str, body: impl Into<Vec<u8>>) -> Self {
        Route {
            content_type: Some(format!("text/html; charset={charset}")),
            ..Route::ok(body)
        }
    }
}

/// Starts a server in a background thread. Returns the origin
/// (e.g. "http://127.0.0.1:12345"). The server runs until the process exits.
pub fn start(routes: HashMap<String, Route>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let routes = Arc::new(routes);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let routes = Arc::clone(&routes);
            thread::spawn(move || handle(stream, &routes));
        }
    });
    format!("http://127.0.0.1:{}", port)
}

fn handle(mut stream: std::net::TcpStream, routes: &HashMap<String, Route>) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    let (status, content_type, body) = match routes.get(&path) {
        Some(route) => (route.status, route.content_type.as_deref(), route.body.as_slice()),
        None => (404, None, &b""[..]),
    };
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let content_type = content_type
        .map(|value| format!("Content-Type: {}\r\n", value))
        .unwrap_or_default();
    let head = format!(
        "HTTP/1.1 {} {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        content_type,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}
