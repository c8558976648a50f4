//! Starter endpoint: wake a resource from any request that names it.
//!
//! Sits behind a proxy as the fallback for a cold upstream. It never
//! serves the original request; once the resource is ready it answers
//! 504 so the proxy retries against the real upstream.

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use tracing::{debug, info, warn};

use crate::ApiState;

pub fn starter_router(state: ApiState) -> Router {
    Router::new().fallback(start_from_path).with_state(state)
}

async fn start_from_path(State(state): State<ApiState>, uri: Uri) -> impl IntoResponse {
    let path = uri.path();
    let resource_id = {
        let config = state.controller.config();
        match config.matcher.match_rule(path) {
            Some(rule) => rule.resource_id.clone(),
            None => {
                debug!(%path, "starter request matched no rule");
                return (StatusCode::NOT_FOUND, "no resource for path".to_string());
            }
        }
    };

    match state.controller.ensure_active(&resource_id).await {
        Ok(disposition) if disposition.is_ready() => {
            info!(resource = %resource_id, ?disposition, "resource ready, asking upstream to retry");
            (
                StatusCode::GATEWAY_TIMEOUT,
                format!("{resource_id} is ready, retry upstream"),
            )
        }
        Ok(disposition) => {
            warn!(resource = %resource_id, ?disposition, "resource failed to start");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{resource_id} failed to start"),
            )
        }
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use dormant_executor::FakeExecutor;

    use crate::handlers::tests::test_controller;

    async fn status_for(router: Router, path: &str) -> StatusCode {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        router.oneshot(req).await.unwrap().status()
    }

    #[tokio::test(start_paused = true)]
    async fn ready_resource_answers_504() {
        let fake = Arc::new(FakeExecutor::new());
        let controller = test_controller(&fake);
        let router = starter_router(ApiState {
            controller: Arc::clone(&controller),
        });

        assert_eq!(status_for(router, "/llama/v1/chat").await, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(fake.starts("llama"), 1);
        assert!(controller.ledger().get("llama").is_some());
    }

    #[tokio::test]
    async fn unmatched_path_is_404() {
        let fake = Arc::new(FakeExecutor::new());
        let router = starter_router(ApiState {
            controller: test_controller(&fake),
        });

        assert_eq!(status_for(router, "/mistral/x").await, StatusCode::NOT_FOUND);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_is_500() {
        let fake = Arc::new(FakeExecutor::new());
        fake.fail_start("qwen");
        let router = starter_router(ApiState {
            controller: test_controller(&fake),
        });

        assert_eq!(status_for(router, "/qwen/generate").await, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
