//! HTTP plumbing shared by the adapters: status checking, bounded error
//! excerpts, and a line decoder for SSE and NDJSON bodies.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::error::ProviderError;

/// Client with a connect timeout. Per-request deadlines come from the
/// [`CompletionRequest`](crate::types::CompletionRequest).
pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Send `builder`, mapping transport failures and non-success statuses to
/// [`ProviderError`].
pub async fn send(
    provider: &str,
    builder: RequestBuilder,
    timeout: Option<Duration>,
) -> Result<Response, ProviderError> {
    let builder = match timeout {
        Some(t) => builder.timeout(t),
        None => builder,
    };
    let resp = builder
        .send()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, e, timeout))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(provider, status = status.as_u16(), "backend returned non-success status");
        return Err(ProviderError::http(provider, status.as_u16(), &body));
    }
    Ok(resp)
}

/// Read the whole body and decode it as `T`.
pub async fn read_json<T: DeserializeOwned>(
    provider: &str,
    resp: Response,
    timeout: Option<Duration>,
) -> Result<T, ProviderError> {
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, e, timeout))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ProviderError::malformed(provider, format!("{e}: {}", String::from_utf8_lossy(&bytes)))
    })
}

pub fn parse_json<T: DeserializeOwned>(provider: &str, line: &str) -> Result<T, ProviderError> {
    serde_json::from_str(line).map_err(|e| ProviderError::malformed(provider, format!("{e}: {line}")))
}

// ---------------------------------------------------------------------------
// Line decoding
// ---------------------------------------------------------------------------

/// Splits a byte stream into non-empty lines, buffering partial lines
/// across chunk boundaries. Handles `\n` and `\r\n`.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r');
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buf)).to_string();
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

/// Payload of an SSE `data:` line; `None` for comments, `event:` lines, etc.
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Body of `resp` as a stream of lines.
pub fn line_stream(
    provider: String,
    resp: Response,
    timeout: Option<Duration>,
) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    async_stream::stream! {
        let mut decoder = LineDecoder::new();
        let mut body = resp.bytes_stream();
        let mut failed = false;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for line in decoder.push(&bytes) {
                        yield Ok(line);
                    }
                }
                Err(e) => {
                    failed = true;
                    yield Err(ProviderError::from_reqwest(&provider, e, timeout));
                    break;
                }
            }
        }
        if !failed {
            if let Some(line) = decoder.finish() {
                yield Ok(line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks() {
        let mut d = LineDecoder::new();
        assert!(d.push(b"data: {\"a\"").is_empty());
        let lines = d.push(b":1}\r\n\r\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: [DONE]"]);
        assert!(d.finish().is_none());
    }

    #[test]
    fn trailing_line_without_newline() {
        let mut d = LineDecoder::new();
        assert!(d.push(b"{\"done\":true}").is_empty());
        assert_eq!(d.finish().as_deref(), Some("{\"done\":true}"));
    }

    #[test]
    fn sse_data_prefix() {
        assert_eq!(sse_data("data: hello"), Some("hello"));
        assert_eq!(sse_data("data:hello"), Some("hello"));
        assert_eq!(sse_data("event: message_stop"), None);
        assert_eq!(sse_data(": keepalive"), None);
    }
}
