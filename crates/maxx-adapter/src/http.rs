use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::{AdapterError, AdapterResult};

pub type Headers = Vec<(String, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

impl UpstreamRequest {
    pub fn post_json(url: String, body: Bytes, is_stream: bool) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            headers: vec![("content-type".into(), "application/json".into())],
            body: Some(body),
            is_stream,
        }
    }

    pub fn get(url: String) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            body: None,
            is_stream: false,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", format!("Bearer {token}"))
    }
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    /// Chunk-by-chunk delivery; the sender task ends the channel on EOF
    /// or error.
    Stream(mpsc::Receiver<Result<Bytes, AdapterError>>),
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

const STREAM_CHANNEL_CAPACITY: usize = 64;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Idle cap between chunks on a long-lived stream; the overall call has
/// no deadline by design.
const NONSTREAM_TIMEOUT: Duration = Duration::from_secs(600);

/// Outbound HTTP built on wreq, with streaming bodies bridged onto a
/// bounded channel so the executor owns the read loop and cancellation.
#[derive(Clone)]
pub struct HttpClient {
    client: wreq::Client,
}

impl HttpClient {
    pub fn new(outbound_proxy: Option<&str>) -> AdapterResult<Self> {
        let mut builder = wreq::Client::builder().connect_timeout(CONNECT_TIMEOUT);
        if let Some(proxy) = outbound_proxy {
            let proxy = wreq::Proxy::all(proxy)
                .map_err(|err| AdapterError::InvalidConfig(format!("bad proxy: {err}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|err| AdapterError::Transport(err.to_string()))?;
        Ok(Self { client })
    }

    pub async fn execute(&self, request: UpstreamRequest) -> AdapterResult<UpstreamResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body.clone() {
            builder = builder.body(body);
        }
        if !request.is_stream {
            builder = builder.timeout(NONSTREAM_TIMEOUT);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| AdapterError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        if request.is_stream && (200..300).contains(&status) {
            let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
            tokio::spawn(async move {
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let item = chunk.map_err(|err| AdapterError::Transport(err.to_string()));
                    let failed = item.is_err();
                    if tx.send(item).await.is_err() {
                        // Receiver dropped: client went away, stop reading.
                        return;
                    }
                    if failed {
                        return;
                    }
                }
            });
            Ok(UpstreamResponse {
                status,
                headers,
                body: UpstreamBody::Stream(rx),
            })
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|err| AdapterError::Transport(err.to_string()))?;
            Ok(UpstreamResponse {
                status,
                headers,
                body: UpstreamBody::Bytes(bytes),
            })
        }
    }
}
