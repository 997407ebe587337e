//! Loopback listener standing in for the browser popup.
//!
//! The browser is opened on `/popup/<nonce>?proofUrl=<prove url>`, which
//! redirects to the prover. When the prover is done it sends the browser back
//! to the same path with `?proof=<serialized pcd>`, and the listener hands
//! that string to the caller.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use anyhow::Result;

/// Upper bound for a request head; serialized PCDs run to a few KB.
const MAX_REQUEST_BYTES: usize = 256 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Generates a random high localhost port for the callback.
pub fn random_local_port() -> u16 {
    let id = uuid::Uuid::new_v4();
    let bytes = id.as_bytes();
    let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
    49152 + (raw % 16384)
}

/// What a single callback request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Forward the browser to the prover.
    Redirect(String),
    /// The prover returned a serialized PCD.
    Proof(String),
    /// The prover returned a pending (server-side) PCD.
    Pending,
    NotFound,
    BadRequest(&'static str),
}

/// Routes a raw HTTP request against the expected popup nonce.
pub fn route_request(request: &str, nonce: &str) -> Route {
    let Some(request_line) = request.lines().next() else {
        return Route::BadRequest("Empty request");
    };
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Route::BadRequest("Malformed request line");
    };
    if method != "GET" {
        return Route::BadRequest("Only GET is supported");
    }

    let Ok(url) = url::Url::parse(&format!("http://localhost{path}")) else {
        return Route::BadRequest("Malformed request path");
    };
    if url.path() != popup_path(nonce) {
        return Route::NotFound;
    }

    let param = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    };

    if let Some(proof) = param("proof") {
        if proof.trim().is_empty() {
            return Route::BadRequest("Empty proof");
        }
        return Route::Proof(proof);
    }
    if param("encodedPendingPCD").is_some() {
        return Route::Pending;
    }
    if let Some(target) = param("proofUrl") {
        return match url::Url::parse(&target) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Route::Redirect(target),
            _ => Route::BadRequest("Invalid proofUrl"),
        };
    }
    Route::BadRequest("Missing proof")
}

fn popup_path(nonce: &str) -> String {
    format!("/popup/{nonce}")
}

/// Bound loopback listener for one login attempt.
pub struct CallbackServer {
    listener: TcpListener,
    port: u16,
    nonce: String,
}

impl CallbackServer {
    /// Binds `127.0.0.1:<port>`, or a random high port when `port` is `None`.
    ///
    /// # Errors
    /// Returns an error if the port cannot be bound.
    pub fn bind(port: Option<u16>) -> Result<Self> {
        let port = port.unwrap_or_else(random_local_port);
        let listener = TcpListener::bind(("127.0.0.1", port))
            .map_err(|e| anyhow::anyhow!("Failed to bind callback port {port}: {e}"))?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://127.0.0.1:<port>`, shown to the prover as the requester.
    pub fn origin(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Popup URL; also the return URL the prover sends the proof to.
    pub fn popup_url(&self) -> String {
        format!("{}{}", self.origin(), popup_path(&self.nonce))
    }

    /// Waits for the prover to deliver a proof.
    ///
    /// Returns `Ok(None)` on timeout or listener failure so the caller can
    /// fall back to a manual paste.
    ///
    /// # Errors
    /// Returns an error if the prover answered with a pending PCD, which
    /// needs server-side proving this client does not do.
    pub fn wait_for_proof(self, timeout: Duration) -> Result<Option<String>> {
        if let Err(err) = self.listener.set_nonblocking(true) {
            tracing::warn!("Failed to configure callback listener: {err}");
            return Ok(None);
        }

        let (tx, rx) = std::sync::mpsc::channel::<Result<Option<String>>>();
        let Self {
            listener, nonce, ..
        } = self;

        std::thread::spawn(move || {
            let start = Instant::now();
            loop {
                match listener.accept() {
                    Ok((stream, _)) => match handle_connection(stream, &nonce) {
                        Some(Route::Proof(proof)) => {
                            let _ = tx.send(Ok(Some(proof)));
                            break;
                        }
                        Some(Route::Pending) => {
                            let _ = tx.send(Err(anyhow::anyhow!(
                                "Prover returned a pending PCD; server-side proving is not supported"
                            )));
                            break;
                        }
                        _ => {}
                    },
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        if start.elapsed() > timeout {
                            let _ = tx.send(Ok(None));
                            break;
                        }
                        std::thread::sleep(POLL_INTERVAL);
                    }
                    Err(err) => {
                        tracing::warn!("Callback listener failed: {err}");
                        let _ = tx.send(Ok(None));
                        break;
                    }
                }
            }
        });

        // The thread reports its own timeout; this bound only guards against it dying.
        rx.recv_timeout(timeout + Duration::from_secs(5))
            .unwrap_or(Ok(None))
    }
}

/// Serves one request. Returns the route when the request was readable.
fn handle_connection(mut stream: TcpStream, nonce: &str) -> Option<Route> {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(READ_TIMEOUT));

    let request = read_request_head(&mut stream)?;
    let route = route_request(&request, nonce);
    tracing::debug!(route = ?route_label(&route), "callback request");

    let response = match &route {
        Route::Redirect(target) => redirect_response(target),
        Route::Proof(_) => success_response(),
        Route::Pending => error_response(
            400,
            "This proof needs server-side proving, which is not supported. Return to your terminal.",
        ),
        Route::NotFound => error_response(404, "Not found"),
        Route::BadRequest(reason) => error_response(400, reason),
    };
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
    Some(route)
}

fn route_label(route: &Route) -> &'static str {
    match route {
        Route::Redirect(_) => "redirect",
        Route::Proof(_) => "proof",
        Route::Pending => "pending",
        Route::NotFound => "not_found",
        Route::BadRequest(_) => "bad_request",
    }
}

/// Reads until the end of the request head.
fn read_request_head(stream: &mut TcpStream) -> Option<String> {
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    if buffer.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&buffer).into_owned())
}

fn redirect_response(location: &str) -> String {
    format!(
        "HTTP/1.1 302 Found\r\nLocation: {location}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    )
}

fn success_response() -> String {
    let body = "<!doctype html><html><head><meta charset=\"utf-8\" /><title>Proof received</title></head><body><p>Proof received. Return to your terminal to continue; this window can be closed.</p></body></html>";
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn error_response(status: u16, message: &str) -> String {
    let reason = match status {
        404 => "Not Found",
        _ => "Bad Request",
    };
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        message.len(),
        message
    )
}
