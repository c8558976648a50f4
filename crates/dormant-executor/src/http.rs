//! Minimal HTTP/1.1 client over hyper.
//!
//! One connection per request: the inference service and escalation
//! targets are low-traffic local endpoints, so no pooling. Callers bound
//! the whole exchange with their own timeout.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

/// `user-agent` sent on every request.
pub const AGENT: &str = concat!("dormant/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connect to {authority} failed: {reason}")]
    Connect { authority: String, reason: String },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
}

/// Status and fully-read body of a response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub async fn get(url: &str) -> Result<HttpResponse, HttpError> {
    send(Method::GET, url, None).await
}

/// POST `fields` as `application/x-www-form-urlencoded`.
pub async fn post_form(url: &str, fields: &[(&str, &str)]) -> Result<HttpResponse, HttpError> {
    let body = serde_urlencoded::to_string(fields).map_err(|e| HttpError::Request {
        url: url.to_string(),
        reason: format!("encoding form: {e}"),
    })?;
    send(Method::POST, url, Some(body)).await
}

/// POST with an empty body.
pub async fn post(url: &str) -> Result<HttpResponse, HttpError> {
    send(Method::POST, url, None).await
}

async fn send(method: Method, url: &str, form: Option<String>) -> Result<HttpResponse, HttpError> {
    let invalid = |reason: &str| HttpError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let uri: Uri = url.parse().map_err(|_| invalid("unparseable"))?;
    if uri.scheme_str() != Some("http") {
        return Err(invalid("only http:// is supported"));
    }
    let host = uri.host().ok_or_else(|| invalid("missing host"))?;
    let port = uri.port_u16().unwrap_or(80);
    let authority = uri
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_else(|| format!("{host}:{port}"));
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    // IPv6 literals come back bracketed from `Uri::host`.
    let connect_host = host.trim_start_matches('[').trim_end_matches(']');
    let stream = TcpStream::connect((connect_host, port))
        .await
        .map_err(|e| HttpError::Connect {
            authority: authority.clone(),
            reason: e.to_string(),
        })?;

    let request_err = |reason: String| HttpError::Request {
        url: url.to_string(),
        reason,
    };

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| request_err(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "http connection closed with error");
        }
    });

    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, authority.as_str())
        .header(USER_AGENT, AGENT);
    let body = match form {
        Some(form) => {
            builder = builder.header(CONTENT_TYPE, "application/x-www-form-urlencoded");
            Bytes::from(form)
        }
        None => Bytes::new(),
    };
    let req = builder
        .body(Full::new(body))
        .map_err(|e| request_err(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| request_err(e.to_string()))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| request_err(e.to_string()))?
        .to_bytes();

    debug!(%url, %status, "http response");
    Ok(HttpResponse { status, body })
}
