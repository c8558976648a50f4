//! Executor for an inference service that exposes model lifecycle over REST.
//!
//! ```text
//! GET  {base}/models/running        → {"running_models": ["llama", ...]}
//! POST {base}/models/{id}/start     → 200 on accepted
//! POST {base}/models/{id}/stop      → 200 on accepted
//! ```

use serde::Deserialize;
use tracing::{debug, info};

use crate::command;
use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::{validate_resource_id, ExecFuture, LifecycleExecutor};
use crate::http;

#[derive(Debug, Deserialize)]
struct RunningModels {
    running_models: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InferenceServiceExecutor {
    base_url: String,
    shutdown_command: Vec<String>,
}

impl InferenceServiceExecutor {
    pub fn new(base_url: impl Into<String>, shutdown_command: Vec<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            shutdown_command,
        }
    }

    async fn lifecycle_call(&self, op: &'static str, resource_id: &str) -> ExecutorResult<()> {
        validate_resource_id(resource_id)?;
        let url = format!("{}/models/{resource_id}/{op}", self.base_url);
        let resp = http::post(&url).await?;
        if resp.status.as_u16() != 200 {
            return Err(ExecutorError::Status {
                op,
                status: resp.status.as_u16(),
                body: resp.text(),
            });
        }
        info!(resource = %resource_id, op, "inference service accepted request");
        Ok(())
    }

    async fn running(&self, resource_id: &str) -> ExecutorResult<bool> {
        let url = format!("{}/models/running", self.base_url);
        let resp = http::get(&url).await?;
        if resp.status.as_u16() != 200 {
            return Err(ExecutorError::Status {
                op: "is_running",
                status: resp.status.as_u16(),
                body: resp.text(),
            });
        }
        let parsed: RunningModels = serde_json::from_slice(&resp.body)
            .map_err(|e| ExecutorError::Malformed(e.to_string()))?;
        let running = parsed.running_models.iter().any(|m| m == resource_id);
        debug!(resource = %resource_id, running, "running models checked");
        Ok(running)
    }
}

impl LifecycleExecutor for InferenceServiceExecutor {
    fn start<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, ()> {
        Box::pin(self.lifecycle_call("start", resource_id))
    }

    fn stop<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, ()> {
        Box::pin(self.lifecycle_call("stop", resource_id))
    }

    fn is_running<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, bool> {
        Box::pin(self.running(resource_id))
    }

    fn shutdown_system(&self) -> ExecFuture<'_, ()> {
        Box::pin(async move {
            command::run_checked(&self.shutdown_command).await?;
            Ok(())
        })
    }
}
