//! `reqwest` implementation of the request issuer.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use futures::stream::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode, Url};

use peerfs_common::{DEFAULT_CONNECT_TIMEOUT_MS, USER_AGENT};
use peerfs_source::{ByteStream, OpenedStream, RequestIssuer, SourceError};

use crate::error::HttpError;

/// Options for the HTTP backend.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// User agent header value.
    pub user_agent: String,
    /// When a server answers a ranged request with the whole file, discard
    /// the bytes before the requested offset instead of delivering them.
    pub skip_unranged_prefix: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            user_agent: USER_AGENT.to_string(),
            skip_unranged_prefix: true,
        }
    }
}

impl HttpOptions {
    /// Set the connect timeout.
    ///
    /// # Arguments
    /// * `timeout` - Connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the user agent.
    ///
    /// # Arguments
    /// * `user_agent` - User agent header value
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Enable or disable prefix skipping for servers that ignore ranges.
    ///
    /// # Arguments
    /// * `skip` - Whether to discard the unrequested prefix
    pub fn with_skip_unranged_prefix(mut self, skip: bool) -> Self {
        self.skip_unranged_prefix = skip;
        self
    }
}

/// RequestIssuer that streams content over HTTP GET with open-ended ranges.
pub struct HttpRequestIssuer {
    /// The underlying HTTP client.
    client: Client,
    options: HttpOptions,
}

impl HttpRequestIssuer {
    /// Create an issuer with its own connection pool.
    ///
    /// # Arguments
    /// * `options` - HTTP options
    pub fn new(options: HttpOptions) -> Result<Self, SourceError> {
        let client: Client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| HttpError::ConfigError(e.to_string()))?;
        Ok(Self { client, options })
    }

    /// Create an issuer from an existing client (for testing or sharing).
    ///
    /// # Arguments
    /// * `client` - Pre-configured client
    /// * `options` - HTTP options
    pub fn from_client(client: Client, options: HttpOptions) -> Self {
        Self { client, options }
    }
}

#[async_trait]
impl RequestIssuer for HttpRequestIssuer {
    async fn open_stream(
        &self,
        url: &str,
        range_start: Option<u64>,
    ) -> Result<OpenedStream, SourceError> {
        let parsed: Url = Url::parse(url).map_err(|e| SourceError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let mut request = self.client.get(parsed);
        if let Some(start) = range_start {
            request = request.header(RANGE, format!("bytes={}-", start));
        }

        let response: Response = request.send().await.map_err(HttpError::from)?;
        let requested: u64 = range_start.unwrap_or(0);

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let start: u64 = content_range_start(response.headers()).unwrap_or(requested);
                Ok(OpenedStream {
                    url: url.to_string(),
                    start,
                    body: body_stream(response),
                })
            }
            StatusCode::OK => {
                if requested > 0 && self.options.skip_unranged_prefix {
                    log::debug!(
                        "{} ignored range at {}, skipping prefix",
                        url,
                        requested
                    );
                    Ok(OpenedStream {
                        url: url.to_string(),
                        start: requested,
                        body: skip_prefix(body_stream(response), requested),
                    })
                } else {
                    Ok(OpenedStream {
                        url: url.to_string(),
                        start: 0,
                        body: body_stream(response),
                    })
                }
            }
            StatusCode::NOT_FOUND => Err(SourceError::NotFound {
                url: url.to_string(),
            }),
            StatusCode::RANGE_NOT_SATISFIABLE => Err(SourceError::RangeNotSatisfiable {
                url: url.to_string(),
                start: requested,
            }),
            status => Err(SourceError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}

/// Turn a response body into a delivery stream.
fn body_stream(response: Response) -> ByteStream {
    response
        .bytes_stream()
        .map(|item| item.map_err(|e| SourceError::from(HttpError::from(e))))
        .boxed()
}

/// First byte position of a `Content-Range: bytes a-b/len` header.
fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    let value: &str = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let spec: &str = value.trim().strip_prefix("bytes")?.trim_start();
    let (first, _) = spec.split_once('-')?;
    first.trim().parse().ok()
}

/// Drop the first `skip` bytes of a stream.
fn skip_prefix(body: ByteStream, skip: u64) -> ByteStream {
    body.scan(skip, |remaining, item| {
        let item: Result<Bytes, SourceError> = item.map(|mut bytes| {
            let drop_len: usize = (*remaining).min(bytes.len() as u64) as usize;
            *remaining -= drop_len as u64;
            bytes.split_off(drop_len)
        });
        future::ready(Some(item))
    })
    .filter(|item| future::ready(!matches!(item, Ok(bytes) if bytes.is_empty())))
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_content_range_start() {
        let mut headers: HeaderMap = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 500-999/1000"));
        assert_eq!(content_range_start(&headers), Some(500));

        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes */1000"));
        assert_eq!(content_range_start(&headers), None);

        assert_eq!(content_range_start(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_skip_prefix_across_deliveries() {
        let body: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"abcd")),
            Ok(Bytes::from_static(b"efgh")),
            Ok(Bytes::from_static(b"ij")),
        ])
        .boxed();

        let out: Vec<Bytes> = skip_prefix(body, 6)
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec![Bytes::from_static(b"gh"), Bytes::from_static(b"ij")]);
    }

    #[tokio::test]
    async fn test_skip_prefix_passes_errors() {
        let body: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(SourceError::transport("reset")),
        ])
        .boxed();

        let out: Vec<Result<Bytes, SourceError>> = skip_prefix(body, 5).collect().await;
        assert_eq!(out, vec![Err(SourceError::transport("reset"))]);
    }

    // ------------------------------------------------------------------------
    // Local server
    // ------------------------------------------------------------------------

    /// Build a raw HTTP/1.1 response.
    fn response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
        let mut out: String = format!("HTTP/1.1 {}\r\n", status);
        for (name, value) in headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        ));
        let mut bytes: Vec<u8> = out.into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    /// Serve one connection with `reply`; the handle yields the request head.
    async fn serve_once(reply: Vec<u8>) -> (String, tokio::task::JoinHandle<String>) {
        let listener: TcpListener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url: String = format!("http://{}/cas/abc", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head: Vec<u8> = Vec::new();
            let mut buf: [u8; 1024] = [0; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n: usize = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(&reply).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&head).to_ascii_lowercase()
        });
        (url, handle)
    }

    async fn body_of(opened: OpenedStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = opened.body.map(|item| item.unwrap()).collect().await;
        chunks.concat()
    }

    fn issuer() -> HttpRequestIssuer {
        HttpRequestIssuer::new(HttpOptions::default()).unwrap()
    }

    fn content() -> Vec<u8> {
        (0..20u8).collect()
    }

    #[tokio::test]
    async fn test_partial_content_uses_content_range_start() {
        let data: Vec<u8> = content();
        let (url, server) = serve_once(response(
            "206 Partial Content",
            &[("Content-Range", "bytes 5-19/20")],
            &data[5..],
        ))
        .await;

        let opened: OpenedStream = issuer().open_stream(&url, Some(5)).await.unwrap();
        assert_eq!(opened.start, 5);
        assert_eq!(opened.url, url);
        assert_eq!(body_of(opened).await, data[5..].to_vec());

        let head: String = server.await.unwrap();
        assert!(head.contains("range: bytes=5-"));
        assert!(head.contains("user-agent: peerfs/"));
    }

    #[tokio::test]
    async fn test_no_range_header_from_zero() {
        let data: Vec<u8> = content();
        let (url, server) = serve_once(response("200 OK", &[], &data)).await;

        let opened: OpenedStream = issuer().open_stream(&url, None).await.unwrap();
        assert_eq!(opened.start, 0);
        assert_eq!(body_of(opened).await, data);
        assert!(!server.await.unwrap().contains("range:"));
    }

    #[tokio::test]
    async fn test_ignored_range_skips_prefix() {
        let data: Vec<u8> = content();
        let (url, _server) = serve_once(response("200 OK", &[], &data)).await;

        let opened: OpenedStream = issuer().open_stream(&url, Some(7)).await.unwrap();
        assert_eq!(opened.start, 7);
        assert_eq!(body_of(opened).await, data[7..].to_vec());
    }

    #[tokio::test]
    async fn test_ignored_range_reports_zero_without_skipping() {
        let data: Vec<u8> = content();
        let (url, _server) = serve_once(response("200 OK", &[], &data)).await;
        let issuer: HttpRequestIssuer =
            HttpRequestIssuer::new(HttpOptions::default().with_skip_unranged_prefix(false))
                .unwrap();

        let opened: OpenedStream = issuer.open_stream(&url, Some(7)).await.unwrap();
        assert_eq!(opened.start, 0);
        assert_eq!(body_of(opened).await, data);
    }

    #[tokio::test]
    async fn test_not_found() {
        let (url, _server) = serve_once(response("404 Not Found", &[], b"")).await;
        let result: Result<OpenedStream, SourceError> = issuer().open_stream(&url, None).await;
        assert_eq!(result.unwrap_err(), SourceError::NotFound { url });
    }

    #[tokio::test]
    async fn test_range_not_satisfiable() {
        let (url, _server) = serve_once(response(
            "416 Range Not Satisfiable",
            &[("Content-Range", "bytes */20")],
            b"",
        ))
        .await;
        let result: Result<OpenedStream, SourceError> =
            issuer().open_stream(&url, Some(900)).await;
        assert_eq!(
            result.unwrap_err(),
            SourceError::RangeNotSatisfiable { url, start: 900 }
        );
    }

    #[tokio::test]
    async fn test_other_status() {
        let (url, _server) = serve_once(response("503 Service Unavailable", &[], b"")).await;
        let result: Result<OpenedStream, SourceError> = issuer().open_stream(&url, Some(3)).await;
        assert_eq!(
            result.unwrap_err(),
            SourceError::HttpStatus { url, status: 503 }
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let listener: TcpListener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url: String = format!("http://{}/cas/abc", listener.local_addr().unwrap());
        drop(listener);

        let result: Result<OpenedStream, SourceError> = issuer().open_stream(&url, None).await;
        assert!(matches!(result, Err(SourceError::Transport { .. })));
    }

    #[test]
    fn test_invalid_url() {
        let issuer: HttpRequestIssuer = HttpRequestIssuer::new(HttpOptions::default()).unwrap();
        let runtime: tokio::runtime::Runtime = tokio::runtime::Runtime::new().unwrap();
        let result: Result<OpenedStream, SourceError> =
            runtime.block_on(issuer.open_stream("not a url", None));
        assert!(matches!(result, Err(SourceError::InvalidUrl { .. })));
    }
}
