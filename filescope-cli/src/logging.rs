use std::io::IsTerminal;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Local;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

// ANSI color codes
struct Colors {
    reset: &'static str,
    dim: &'static str,
    green: &'static str,
    yellow: &'static str,
    red: &'static str,
    cyan: &'static str,
    blue: &'static str,
    magenta: &'static str,
    gray: &'static str,
}

impl Colors {
    fn new() -> Self {
        if std::io::stderr().is_terminal() {
            Self {
                reset: "\x1b[0m",
                dim: "\x1b[2m",
                green: "\x1b[92m",   // 2xx success
                yellow: "\x1b[93m",  // 3xx redirect
                red: "\x1b[91m",     // 4xx, 5xx errors
                cyan: "\x1b[96m",    // Method
                blue: "\x1b[94m",    // Path
                magenta: "\x1b[95m", // Duration
                gray: "\x1b[90m",    // DEBUG content
            }
        } else {
            Self {
                reset: "",
                dim: "",
                green: "",
                yellow: "",
                red: "",
                cyan: "",
                blue: "",
                magenta: "",
                gray: "",
            }
        }
    }

    fn status_color(&self, status: StatusCode) -> &'static str {
        if status.is_success() {
            self.green
        } else if status.is_redirection() {
            self.yellow
        } else {
            self.red
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S,%3f").to_string()
}

fn log_body(colors: &Colors, request_id: &str, label: &str, bytes: &Bytes) {
    if bytes.is_empty() {
        return;
    }
    let (kind, body) = match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(json) => (
            "",
            serde_json::to_string_pretty(&json).unwrap_or_default(),
        ),
        Err(_) => (" (raw)", String::from_utf8_lossy(bytes).into_owned()),
    };
    eprintln!(
        "{} - DEBUG - [{request_id}] {}{label}{kind}:{}\n{}{body}{}",
        timestamp(),
        colors.dim,
        colors.reset,
        colors.gray,
        colors.reset
    );
}

/// Request logging for the HTTP server.
///
/// `verbose >= 1` logs one summary line per request, `verbose >= 2` also
/// logs request and response bodies. Every response carries an
/// `x-request-id` header.
#[derive(Clone)]
pub struct LoggingMiddleware {
    pub verbose: u8,
}

impl LoggingMiddleware {
    pub fn new(verbose: u8) -> Self {
        Self { verbose }
    }

    pub async fn handle(&self, request: Request, next: Next) -> Response {
        let request_id = Uuid::new_v4().to_string();
        if self.verbose == 0 {
            return with_request_id(next.run(request).await, &request_id);
        }

        let colors = Colors::new();
        let method = request.method().clone();
        let path = request.uri().path().to_owned();
        let start = Instant::now();

        let response = if self.verbose >= 2 {
            // Buffer the body so it can be logged and replayed.
            let (parts, body) = request.into_parts();
            let bytes = axum::body::to_bytes(body, usize::MAX)
                .await
                .unwrap_or_default();
            log_body(&colors, &request_id, "Request body", &bytes);
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        } else {
            next.run(request).await
        };

        let status = response.status();
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        eprintln!(
            "{} - INFO - [{request_id}] {}{method}{} {}{path}{} -> {}{}{} in {}{duration_ms:.1}ms{}",
            timestamp(),
            colors.cyan,
            colors.reset,
            colors.blue,
            colors.reset,
            colors.status_color(status),
            status.as_u16(),
            colors.reset,
            colors.magenta,
            colors.reset
        );

        if self.verbose >= 2 {
            let (parts, body) = response.into_parts();
            let bytes = axum::body::to_bytes(body, usize::MAX)
                .await
                .unwrap_or_default();
            log_body(&colors, &request_id, "Response body", &bytes);
            return with_request_id(Response::from_parts(parts, Body::from(bytes)), &request_id);
        }

        with_request_id(response, &request_id)
    }
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
