use super::debug::HttpDebugConfig;
use crate::trace::SessionTrace;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
#[cfg(test)]
use std::sync::{Arc, Mutex};

const STREAMED_BODY_PLACEHOLDER: &str = "<streamed body>";

#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    debug: HttpDebugConfig,
    sink: LogSink,
    trace: Option<SessionTrace>,
}

#[derive(Clone)]
enum LogSink {
    Stderr,
    #[cfg(test)]
    Buffer(Arc<Mutex<Vec<String>>>),
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("debug", &self.debug)
            .finish()
    }
}

impl HttpClient {
    pub fn new(inner: Client, debug: HttpDebugConfig) -> Self {
        Self {
            inner,
            debug,
            sink: LogSink::Stderr,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: SessionTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub async fn get_text(&self, url: &str) -> Result<HttpResponseData, reqwest::Error> {
        let request = self.inner.get(url).build()?;
        self.before_send(&request, "");

        let response = self.execute(request).await?;
        self.read_body(response).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        bearer_token: &str,
        payload: &T,
    ) -> Result<HttpResponseData, reqwest::Error> {
        let body_json = serde_json::to_string(payload)
            .unwrap_or_else(|err| format!("{{\"_serialization_error\":\"{err}\"}}"));

        let request = self
            .inner
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {bearer_token}"))
            .json(payload)
            .build()?;
        self.before_send(&request, &body_json);

        let response = self.execute(request).await?;
        self.read_body(response).await
    }

    /// Sends the request and hands back the live response so the caller can
    /// consume the body incrementally. Only the status line and headers are logged.
    pub async fn post_json_streaming<T: Serialize + ?Sized>(
        &self,
        url: &str,
        bearer_token: &str,
        payload: &T,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let body_json = serde_json::to_string(payload)
            .unwrap_or_else(|err| format!("{{\"_serialization_error\":\"{err}\"}}"));

        let request = self
            .inner
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {bearer_token}"))
            .json(payload)
            .build()?;
        self.before_send(&request, &body_json);

        let response = self.execute(request).await?;
        let status = response.status().as_u16();
        self.after_receive(status, response.headers(), STREAMED_BODY_PLACEHOLDER);
        Ok(response)
    }

    fn before_send(&self, request: &reqwest::Request, body: &str) {
        self.log_request(request, body);
        if let Some(trace) = &self.trace {
            trace.log_http_request(
                request.method().as_str(),
                request.url().as_str(),
                request.headers(),
                body,
            );
        }
    }

    fn after_receive(&self, status: u16, headers: &HeaderMap, body: &str) {
        self.log_response(status, headers, body);
        if let Some(trace) = &self.trace {
            trace.log_http_response(status, headers, body);
        }
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
        match self.inner.execute(request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                if let Some(trace) = &self.trace {
                    trace.log_http_error(&err.to_string());
                }
                Err(err)
            }
        }
    }

    async fn read_body(
        &self,
        response: reqwest::Response,
    ) -> Result<HttpResponseData, reqwest::Error> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                if let Some(trace) = &self.trace {
                    trace.log_http_error(&err.to_string());
                }
                return Err(err);
            }
        };

        self.after_receive(status, &headers, &body);
        Ok(HttpResponseData { status, body })
    }

    fn log_request(&self, request: &reqwest::Request, body: &str) {
        if !self.debug.enabled {
            return;
        }

        for line in request_log_lines(self.debug, request, body) {
            self.log_line(line);
        }
    }

    fn log_response(&self, status: u16, headers: &HeaderMap, body: &str) {
        if !self.debug.enabled {
            return;
        }

        for line in response_log_lines(self.debug, status, headers, body) {
            self.log_line(line);
        }
    }

    fn log_line(&self, line: String) {
        match &self.sink {
            LogSink::Stderr => {
                let mut stderr = io::stderr().lock();
                let _ = writeln!(stderr, "{line}");
            }
            #[cfg(test)]
            LogSink::Buffer(buffer) => {
                if let Ok(mut b) = buffer.lock() {
                    b.push(line);
                }
            }
        }
    }

    #[cfg(test)]
    pub fn with_buffer_sink(
        inner: Client,
        debug: HttpDebugConfig,
    ) -> (Self, Arc<Mutex<Vec<String>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let client = Self {
            inner,
            debug,
            sink: LogSink::Buffer(Arc::clone(&buffer)),
            trace: None,
        };
        (client, buffer)
    }
}

fn request_log_lines(debug: HttpDebugConfig, request: &reqwest::Request, body: &str) -> Vec<String> {
    let mut lines = vec![format!(
        "[http-debug] > {} {}",
        request.method(),
        debug.display_url(request.url())
    )];
    for (name, value) in request.headers() {
        lines.push(format!(
            "[http-debug] > {}: {}",
            name.as_str(),
            debug.display_header(name.as_str(), value)
        ));
    }
    lines.push("[http-debug] >".to_string());
    append_body_lines(&mut lines, '>', &debug.display_body(body));
    lines
}

fn response_log_lines(
    debug: HttpDebugConfig,
    status: u16,
    headers: &HeaderMap,
    body: &str,
) -> Vec<String> {
    let mut lines = vec![format!("[http-debug] < HTTP {status}")];
    for (name, value) in headers {
        lines.push(format!(
            "[http-debug] < {}: {}",
            name.as_str(),
            debug.display_header(name.as_str(), value)
        ));
    }
    lines.push("[http-debug] <".to_string());
    append_body_lines(&mut lines, '<', &debug.display_body(body));
    lines
}

fn append_body_lines(lines: &mut Vec<String>, direction: char, body: &str) {
    if body.is_empty() {
        lines.push(format!("[http-debug] {direction} <empty body>"));
        return;
    }

    for line in body.lines() {
        lines.push(format!("[http-debug] {direction} {line}"));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponseData {
    pub status: u16,
    pub body: String,
}

impl HttpResponseData {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
