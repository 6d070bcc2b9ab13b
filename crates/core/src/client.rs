use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, PRAGMA,
    USER_AGENT,
};
use url::Url;

use crate::config::RemoteConfig;
use crate::request::InterpolationRequest;

/// Status line and body of one round trip, before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Seam between the sample loop and the remote service.
pub trait InterpolationClient {
    fn send(&mut self, request: &InterpolationRequest) -> Result<RawResponse>;
}

pub struct HttpInterpolationClient {
    client: reqwest::blocking::Client,
    endpoint: Url,
}

impl HttpInterpolationClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let endpoint = parse_endpoint(&config.endpoint)?;
        let headers = default_headers(&config.user_agent)?;

        let client = reqwest::blocking::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client for interpolation endpoint")?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl InterpolationClient for HttpInterpolationClient {
    fn send(&mut self, request: &InterpolationRequest) -> Result<RawResponse> {
        let body = request
            .to_json_body()
            .context("failed to encode interpolation request")?;

        let response = self
            .client
            .post(self.endpoint.as_str())
            .body(body)
            .send()
            .with_context(|| format!("request to {} failed", self.endpoint))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("failed reading response body from {}", self.endpoint))?;

        Ok(RawResponse { status, body })
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let parsed = Url::parse(raw).with_context(|| format!("invalid endpoint URL: {raw}"))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => bail!("unsupported endpoint URL scheme '{scheme}' for '{raw}' (expected http/https)"),
    }
}

fn default_headers(user_agent: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent)
            .with_context(|| format!("invalid user agent header value: {user_agent}"))?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,de-DE;q=0.8,de;q=0.7"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain;charset=UTF-8"),
    );
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    use crate::params::{resolve_params, ParamInputs};

    fn spawn_single_response_server(
        raw_response: String,
    ) -> (String, mpsc::Receiver<String>, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let (request_tx, request_rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept test client");
            stream
                .set_read_timeout(Some(Duration::from_secs(2)))
                .expect("set read timeout");

            let mut received = Vec::new();
            let mut buffer = [0u8; 4096];
            while let Ok(read_count) = stream.read(&mut buffer) {
                if read_count == 0 {
                    break;
                }
                received.extend_from_slice(&buffer[..read_count]);
                if request_is_complete(&received) {
                    break;
                }
            }
            let _ = request_tx.send(String::from_utf8_lossy(&received).into_owned());

            stream
                .write_all(raw_response.as_bytes())
                .expect("write response");
            let _ = stream.flush();
        });

        (format!("http://{addr}/api/baseten"), request_rx, handle)
    }

    fn request_is_complete(received: &[u8]) -> bool {
        let text = String::from_utf8_lossy(received);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= content_length
    }

    fn test_config(endpoint: String) -> RemoteConfig {
        RemoteConfig {
            endpoint,
            user_agent: "riffusion-test/1.0".to_string(),
            connect_timeout_secs: 2,
            request_timeout_secs: 5,
        }
    }

    fn sample_request() -> InterpolationRequest {
        let inputs = ParamInputs {
            seed: "1-2".to_string(),
            prompt_words: vec!["drums".to_string()],
            ..Default::default()
        };
        let params = resolve_params(&inputs, || 0).expect("valid inputs");
        InterpolationRequest::for_alpha(&params, 0.25)
    }

    #[test]
    fn posts_json_body_with_fixed_headers() {
        let response = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}".to_string();
        let (endpoint, request_rx, server) = spawn_single_response_server(response);

        let mut client = HttpInterpolationClient::new(&test_config(endpoint)).expect("client");
        let raw = client.send(&sample_request()).expect("request should succeed");
        server.join().expect("server thread join");

        assert_eq!(raw, RawResponse { status: 200, body: "{}".to_string() });

        let received = request_rx.recv().expect("captured request");
        let lower = received.to_ascii_lowercase();
        assert!(received.starts_with("POST /api/baseten "), "request: {received}");
        assert!(lower.contains("user-agent: riffusion-test/1.0"), "request: {received}");
        assert!(lower.contains("content-type: text/plain;charset=utf-8"));
        assert!(lower.contains("cache-control: no-cache"));
        assert!(lower.contains("pragma: no-cache"));
        assert!(lower.contains("accept: */*"));
        assert!(lower.contains("accept-language: en-us,en;q=0.9,de-de;q=0.8,de;q=0.7"));
        assert!(received.contains(r#""worklet_input""#));
        assert!(received.contains(r#""alpha":0.25"#));
    }

    #[test]
    fn non_success_status_is_returned_not_raised() {
        let response = "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy".to_string();
        let (endpoint, _request_rx, server) = spawn_single_response_server(response);

        let mut client = HttpInterpolationClient::new(&test_config(endpoint)).expect("client");
        let raw = client.send(&sample_request()).expect("status is data, not an error");
        server.join().expect("server thread join");

        assert_eq!(raw.status, 503);
        assert_eq!(raw.body, "busy");
    }

    #[test]
    fn connection_failure_is_an_error() {
        let mut client =
            HttpInterpolationClient::new(&test_config("http://127.0.0.1:1/api".to_string()))
                .expect("client");
        assert!(client.send(&sample_request()).is_err());
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let err = HttpInterpolationClient::new(&test_config("ftp://example.com/x".to_string()))
            .err()
            .expect("ftp scheme should be rejected");
        assert!(
            err.to_string().contains("unsupported endpoint URL scheme 'ftp'"),
            "error: {err}"
        );
    }
}
