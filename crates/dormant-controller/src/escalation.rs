//! Outward escalation calls.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use dormant_executor::http;

use crate::error::EscalationError;

pub type EscalationFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EscalationError>> + Send + 'a>>;

/// Notifies an external endpoint that a resource saw activity.
pub trait Escalator: Send + Sync {
    fn escalate<'a>(&'a self, target: &'a str, resource_id: &'a str) -> EscalationFuture<'a>;
}

/// POSTs `name=<resource>` to the target; any 2xx is success.
#[derive(Debug, Clone)]
pub struct HttpEscalator {
    timeout: Duration,
}

impl HttpEscalator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn post(&self, target: &str, resource_id: &str) -> Result<(), EscalationError> {
        if !target.starts_with("http://") {
            return Err(EscalationError::InvalidTarget(target.to_string()));
        }
        let resp = tokio::time::timeout(self.timeout, http::post_form(target, &[("name", resource_id)]))
            .await
            .map_err(|_| EscalationError::Timeout(self.timeout))??;

        if !resp.status.is_success() {
            return Err(EscalationError::Status {
                url: target.to_string(),
                status: resp.status.as_u16(),
            });
        }
        debug!(%target, resource = %resource_id, status = %resp.status, "escalation accepted");
        Ok(())
    }
}

impl Escalator for HttpEscalator {
    fn escalate<'a>(&'a self, target: &'a str, resource_id: &'a str) -> EscalationFuture<'a> {
        Box::pin(self.post(target, resource_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Reply to one request with `status` and hand back what was received.
    async fn one_shot_server(status: u16) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind to random port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            while !String::from_utf8_lossy(&received).contains("name=") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            let reply = format!("HTTP/1.1 {status} X\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&received).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn posts_resource_name_as_form() {
        let (base, server) = one_shot_server(202).await;
        let escalator = HttpEscalator::new(Duration::from_secs(5));

        escalator
            .escalate(&format!("{base}/models/llama/report"), "llama")
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /models/llama/report HTTP/1.1"));
        assert!(request.to_lowercase().contains("user-agent: dormant/"));
        assert!(request.ends_with("name=llama"));
    }

    #[tokio::test]
    async fn non_2xx_is_status_error() {
        let (base, _server) = one_shot_server(503).await;
        let err = HttpEscalator::new(Duration::from_secs(5))
            .escalate(&format!("{base}/x"), "llama")
            .await
            .unwrap_err();
        assert!(matches!(err, EscalationError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn unresponsive_target_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and never answer.
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let err = HttpEscalator::new(Duration::from_millis(200))
            .escalate(&format!("http://{addr}/x"), "llama")
            .await
            .unwrap_err();
        assert!(matches!(err, EscalationError::Timeout(_)));
    }

    #[tokio::test]
    async fn rejects_non_http_target() {
        let err = HttpEscalator::new(Duration::from_secs(1))
            .escalate("ftp://example/x", "llama")
            .await
            .unwrap_err();
        assert!(matches!(err, EscalationError::InvalidTarget(_)));
    }
}
