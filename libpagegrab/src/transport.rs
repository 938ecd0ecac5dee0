use crate::errors::GrabError;
use async_trait::async_trait;
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Proxy};
use serde_json::Value;
use std::fmt::Formatter;
use url::Url;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

pub type BodyStream = BoxStream<'static, Result<Bytes, GrabError>>;

/// Status line and streamed body of an HTTP exchange.
pub struct Response {
    pub status: u16,
    pub content_length: Option<u64>,
    /// Charset declared in the `Content-Type` header
    pub charset: Option<String>,
    pub body: BodyStream,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("charset", &self.charset)
            .finish_non_exhaustive()
    }
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drains the body into memory.
    pub async fn bytes(mut self) -> Result<Vec<u8>, GrabError> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf)
    }

    /// Drains the body and decodes it with the declared charset, falling
    /// back to utf-8 when none was declared or the label is unknown.
    pub async fn text(self) -> Result<String, GrabError> {
        let encoding = self
            .charset
            .as_deref()
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(UTF_8);
        let bytes = self.bytes().await?;
        let (text, _, had_errors) = encoding.decode(&bytes);
        if had_errors {
            tracing::debug!("Body is not valid {}, replaced bad sequences", encoding.name());
        }
        Ok(text.into_owned())
    }
}

/// The HTTP capability every traversal goes through. Shared read-only by all
/// downloads of a batch.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Response, GrabError>;

    async fn post_json(&self, url: &Url, body: &Value) -> Result<Response, GrabError>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Proxy used for plain http requests
    pub http_proxy: Option<String>,
    /// Proxy used for https requests
    pub https_proxy: Option<String>,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            http_proxy: None,
            https_proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Routes both http and https traffic through `proxy`.
    pub fn with_proxy(mut self, proxy: &str) -> Self {
        self.http_proxy = Some(proxy.to_string());
        self.https_proxy = Some(proxy.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, GrabError> {
        // Only the configured proxies apply, never the ones from the environment.
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .no_proxy();
        if let Some(proxy) = &config.http_proxy {
            builder = builder.proxy(
                Proxy::http(proxy.as_str())
                    .map_err(|e| GrabError::InvalidUrl(format!("{proxy} | {e}")))?,
            );
        }
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(
                Proxy::https(proxy.as_str())
                    .map_err(|e| GrabError::InvalidUrl(format!("{proxy} | {e}")))?,
            );
        }
        let client = builder.build().map_err(|e| {
            tracing::error!("Failed to build http client\nError : {}", e);
            GrabError::UnknownError(e.to_string())
        })?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<Response, GrabError> {
        match self.client.get(url.as_str()).send().await {
            Ok(r) => Ok(into_response(r)),
            Err(e) => {
                tracing::error!("Error requesting {}\nError : {}", url, e);
                Err(GrabError::NetworkError(format!("{url} | {e}")))
            }
        }
    }

    async fn post_json(&self, url: &Url, body: &Value) -> Result<Response, GrabError> {
        match self.client.post(url.as_str()).json(body).send().await {
            Ok(r) => Ok(into_response(r)),
            Err(e) => {
                tracing::error!("Error posting to {}\nError : {}", url, e);
                Err(GrabError::NetworkError(format!("{url} | {e}")))
            }
        }
    }
}

/// Value of the `charset` parameter of a `Content-Type` header.
pub(crate) fn charset_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Adapts reqwest's chunk-at-a-time reads to a body stream. The stream ends
/// after the first read error.
fn into_response(response: reqwest::Response) -> Response {
    let status = response.status().as_u16();
    let content_length = response.content_length();
    let charset = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(charset_of);
    let url = response.url().to_string();
    let body = stream::unfold(Some(response), move |state| {
        let url = url.clone();
        async move {
            let mut response = state?;
            match response.chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(response))),
                Ok(None) => None,
                Err(e) => {
                    tracing::error!("Error reading body of {}\nError : {}", url, e);
                    Some((Err(GrabError::NetworkError(format!("{url} | {e}"))), None))
                }
            }
        }
    })
    .boxed();
    Response {
        status,
        content_length,
        charset,
        body,
    }
}
