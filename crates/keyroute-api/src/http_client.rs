//! Minimal HTTP/1 client over hyper.
//!
//! One connection per request: connect, handshake, send, collect the
//! body. The whole exchange runs under a single deadline.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connect to {address} failed: {message}")]
    Connect { address: String, message: String },

    #[error("request to {address} failed: {message}")]
    Exchange { address: String, message: String },

    #[error("request to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Send one request to `address` (`host:port`).
pub async fn send(
    address: &str,
    method: Method,
    path_and_query: &str,
    body: Option<(Bytes, &'static str)>,
    timeout: Duration,
) -> Result<HttpResponse, HttpError> {
    let uri = format!("http://{address}{path_and_query}");
    let mut builder = http::Request::builder()
        .method(method)
        .uri(&uri)
        .header("host", address)
        .header("user-agent", "keyroute/0.1");
    let payload = match body {
        Some((bytes, content_type)) => {
            builder = builder.header("content-type", content_type);
            bytes
        }
        None => Bytes::new(),
    };
    let request = builder
        .body(Full::new(payload))
        .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| HttpError::Connect {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| HttpError::Connect {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| HttpError::Exchange {
                address: address.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| HttpError::Exchange {
                address: address.to_string(),
                message: e.to_string(),
            })?
            .to_bytes();
        Ok(HttpResponse { status, body })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => {
            if let Err(e) = &result {
                debug!(error = %e, %uri, "http request failed");
            }
            result
        }
        Err(_) => {
            debug!(%uri, ?timeout, "http request timed out");
            Err(HttpError::Timeout {
                address: address.to_string(),
                timeout,
            })
        }
    }
}

/// Bytes escaped in a query value; store paths keep their `/` readable.
const QUERY_VALUE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Percent-encode a query parameter value.
pub fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE_SET).to_string()
}
