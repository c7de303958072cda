//! HTTP server-sent-events source.
//!
//! Connects to `GET {base_url}{stream_path}?conversation_id=<id>` and frames
//! the response body with [`FrameCodec`].

use futures::StreamExt;
use reqwest::header::ACCEPT;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use url::Url;

use super::frame::FrameCodec;
use super::{EventSource, EventStream, TransportError};

/// [`EventSource`] backed by a streaming HTTP response.
#[derive(Clone)]
pub struct HttpEventSource {
    http: reqwest::Client,
    endpoint: Url,
    auth_token: Option<String>,
}

impl std::fmt::Debug for HttpEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEventSource")
            .field("endpoint", &self.endpoint.as_str())
            .field("authenticated", &self.auth_token.is_some())
            .finish()
    }
}

impl HttpEventSource {
    /// Create a source for the stream endpoint at `base_url` + `stream_path`.
    pub fn new(base_url: &str, stream_path: &str) -> crate::Result<Self> {
        let endpoint = Url::parse(base_url)?.join(stream_path)?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            auth_token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` on every connect.
    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    /// Use a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Full URL for one conversation's stream.
    #[must_use]
    pub fn stream_url(&self, conversation_id: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("conversation_id", conversation_id);
        url
    }
}

#[async_trait::async_trait]
impl EventSource for HttpEventSource {
    async fn connect(&self, conversation_id: &str) -> Result<EventStream, TransportError> {
        let url = self.stream_url(conversation_id);

        let mut rb = self
            .http
            .get(url.clone())
            .header(ACCEPT, "text/event-stream");
        if let Some(token) = &self.auth_token {
            rb = rb.bearer_auth(token);
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(url = %url, status = status.as_u16(), "Stream endpoint responded");

        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        let framed = FramedRead::new(StreamReader::new(bytes), FrameCodec::new());

        let records = async_stream::stream! {
            futures::pin_mut!(framed);
            while let Some(record) = framed.next().await {
                yield record.map_err(TransportError::from);
            }
            tracing::debug!(url = %url, "Stream endpoint closed the connection");
        };

        Ok(Box::pin(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        let source = HttpEventSource::new("http://localhost:3000", "/api/thinking/stream").unwrap();
        let url = source.stream_url("conv 1&x");

        assert_eq!(url.path(), "/api/thinking/stream");
        assert_eq!(url.query(), Some("conversation_id=conv+1%26x"));
    }

    #[test]
    fn test_debug_hides_token() {
        let source = HttpEventSource::new("http://localhost:3000", "/s")
            .unwrap()
            .with_auth_token(Some("secret".to_string()));
        let debug = format!("{source:?}");

        assert!(!debug.contains("secret"));
        assert!(debug.contains("authenticated: true"));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpEventSource::new("not a url", "/s").is_err());
    }
}
