#![allow(dead_code)]

use std::{
    io::{BufRead, BufReader, Write},
    net::{SocketAddr, TcpListener},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

/// Request as seen by the mock frame server.
#[derive(Clone, Debug)]
pub struct SeenRequest {
    pub request_line: String,
    pub headers: Vec<String>,
}

impl SeenRequest {
    pub fn path(&self) -> &str {
        self.request_line.split(' ').nth(1).unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then_some(value.trim())
        })
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .iter()
            .map(|request| request.path().to_string())
            .collect()
    }
}

// Mock frame server answering every request on its own connection
pub fn start_mock_server<F>(respond: F) -> MockServer
where
    F: Fn(&str) -> Vec<u8> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind mock server");
    let addr = listener.local_addr().expect("failed to get local address");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().expect("failed to clone stream"));

            // Read request line and headers
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                continue;
            }
            let mut headers = Vec::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                    break;
                }
                headers.push(line.trim_end().to_string());
            }

            let request = SeenRequest {
                request_line: request_line.trim_end().to_string(),
                headers,
            };
            let response = respond(request.path());
            seen.lock().expect("requests lock poisoned").push(request);

            let _ = stream.write_all(&response);
        }
    });

    MockServer { addr, requests }
}

/// Server that accepts connections and never answers.
pub fn start_silent_server(hold: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind silent server");
    let addr = listener.local_addr().expect("failed to get local address");

    thread::spawn(move || {
        for stream in listener.incoming() {
            let _held = stream;
            thread::sleep(hold);
        }
    });

    addr
}

pub fn response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

pub fn redirect(location: &str) -> Vec<u8> {
    response("302 Found", &[("Location", location)], b"")
}

pub fn not_found() -> Vec<u8> {
    response("404 Not Found", &[], b"")
}
