use std::{any::Any, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::{
    alert::AlertBatch,
    alert_renderer::AlertRenderer,
    classifier::select_template,
    dingtalk::Dispatcher,
    telemetry_endpoint::Metrics,
};

/// Errors reported to alertmanager. Details are only logged.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid json payload")]
    BadRequest,
    #[error("failed to send notification to dingtalk")]
    DeliveryFailed,
    #[error("internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest => (StatusCode::BAD_REQUEST, "Invalid JSON payload"),
            ApiError::DeliveryFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to send notification to DingTalk",
            ),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

pub struct ReceiverState {
    renderer: AlertRenderer,
    dispatcher: Dispatcher,
}

impl ReceiverState {
    pub fn new(renderer: AlertRenderer, dispatcher: Dispatcher) -> Self {
        Self {
            renderer,
            dispatcher,
        }
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Webhook service is running", "status": "healthy" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// classify, render and forward a single alert batch
async fn prometheus_receiver(
    State(state): State<Arc<ReceiverState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|err| {
        tracing::error!("invalid json received: {}", err);
        ApiError::BadRequest
    })?;

    // fields never fail to deserialize, only scalar bodies end up here
    let batch = AlertBatch::deserialize(payload).map_err(|err| {
        tracing::error!("error processing webhook: {}", err);
        ApiError::Internal
    })?;

    tracing::debug!(
        "received alertmanager webhook: {}",
        String::from_utf8_lossy(&body)
    );
    Metrics::global().received_batches.inc();

    let template = select_template(&batch.alerts);
    tracing::info!("using template: {}", template);
    Metrics::global()
        .selected_templates
        .with_label_values(&[template.name()])
        .inc();

    let message = state.renderer.render(template, &batch);

    state
        .dispatcher
        .deliver(&message, state.dispatcher.msg_type())
        .await
        .map_err(|_| ApiError::DeliveryFailed)?;

    Ok(Json(json!({
        "status": "success",
        "message": "Alert notification sent to DingTalk",
    })))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic payload"
    };

    tracing::error!("error processing webhook: {}", details);

    ApiError::Internal.into_response()
}

pub fn router(state: Arc<ReceiverState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/webhook", post(prometheus_receiver))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_prometheus_receiver(addr: SocketAddr, state: Arc<ReceiverState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("could not bind alertmanager receiver to {addr}"))?;

    tracing::info!("listening for alertmanager webhooks on {}", addr);

    axum::serve(listener, router(state))
        .await
        .context("alertmanager receiver crashed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use axum::{body::Body, http::Request};
    use httptest::{
        matchers::{eq, json_decoded, request},
        responders::json_encoded,
        all_of, Expectation, Server,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        alert_renderer::{RenderError, TemplateContext, TemplateStore, TeraTemplateStore},
        classifier::TemplateId,
        dingtalk::{DingTalkSettings, MsgType},
    };

    const HIGH_CPU: &str = r#"{"status":"firing","alerts":[{"labels":{"alertname":"HighCPU"},"annotations":{}}], "groupLabels":{}, "externalURL":""}"#;

    struct PanickingStore;

    impl TemplateStore for PanickingStore {
        fn render(&self, _: TemplateId, _: &TemplateContext<'_>) -> Result<String, RenderError> {
            panic!("template store exploded")
        }
    }

    fn renderer() -> AlertRenderer {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates");
        AlertRenderer::new(Arc::new(TeraTemplateStore::load(&dir)))
    }

    fn dispatcher(webhook_url: Option<String>) -> Dispatcher {
        Dispatcher::new(DingTalkSettings {
            webhook_url,
            secret: None,
            msg_type: MsgType::Markdown,
            timeout: Duration::from_secs(10),
        })
        .unwrap()
    }

    fn app(renderer: AlertRenderer, webhook_url: Option<String>) -> Router {
        router(Arc::new(ReceiverState::new(renderer, dispatcher(webhook_url))))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_webhook(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn root_reports_running() {
        let (status, body) = send(app(renderer(), None), get_request("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"message": "Webhook service is running", "status": "healthy"})
        );
    }

    #[tokio::test]
    async fn health_is_healthy() {
        let (status, body) = send(app(renderer(), None), get_request("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn forwards_alert_to_robot() {
        let batch: AlertBatch = serde_json::from_str(HIGH_CPU).unwrap();
        let expected = renderer().render(TemplateId::Default, &batch);
        assert!(expected.contains("firing"), "{expected}");
        assert!(expected.contains("HighCPU"), "{expected}");

        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/robot/send"),
                request::body(json_decoded(eq(json!({
                    "msgtype": "markdown",
                    "markdown": {"title": "Prometheus Alert", "text": expected}
                })))),
            ])
            .respond_with(json_encoded(json!({"errcode": 0, "errmsg": "ok"}))),
        );

        let app = app(renderer(), Some(server.url_str("/robot/send")));
        let (status, body) = send(app, post_webhook(HIGH_CPU)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "success", "message": "Alert notification sent to DingTalk"})
        );
    }

    #[tokio::test]
    async fn non_json_body_is_bad_request() {
        let (status, body) = send(app(renderer(), None), post_webhook("this is not json")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"detail": "Invalid JSON payload"}));
    }

    #[tokio::test]
    async fn loosely_typed_batch_is_still_delivered() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/robot/send"))
                .times(4)
                .respond_with(json_encoded(json!({"errcode": 0, "errmsg": "ok"}))),
        );

        let payloads = [
            r#"{"status":"firing","alerts":[{"labels":{"alertname":"HighCPU"},"annotations":{},"startsAt":""}],"groupLabels":{},"externalURL":""}"#,
            r#"{"status":"firing","alerts":[{"labels":{"alertname":"HighCPU"},"annotations":{},"fingerprint":42}],"groupLabels":{},"externalURL":""}"#,
            r#"{"status":null,"alerts":[{"labels":{"alertname":"HighCPU"},"annotations":{}}],"groupLabels":null,"externalURL":""}"#,
            r#"{"status":"firing","alerts":null,"groupLabels":{},"externalURL":null}"#,
        ];

        for payload in payloads {
            let app = app(renderer(), Some(server.url_str("/robot/send")));
            let (status, body) = send(app, post_webhook(payload)).await;

            assert_eq!(status, StatusCode::OK, "{payload}");
            assert_eq!(
                body,
                json!({"status": "success", "message": "Alert notification sent to DingTalk"})
            );
        }
    }

    #[tokio::test]
    async fn non_object_json_is_internal_error() {
        let (status, body) = send(app(renderer(), None), post_webhook(r#""just a string""#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"detail": "Internal server error"}));
    }

    #[tokio::test]
    async fn unreachable_robot_is_server_error() {
        let app = app(renderer(), Some("http://127.0.0.1:1/robot/send".into()));
        let (status, body) = send(app, post_webhook(HIGH_CPU)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"detail": "Failed to send notification to DingTalk"}));
    }

    #[tokio::test]
    async fn missing_webhook_url_is_server_error() {
        let (status, _) = send(app(renderer(), None), post_webhook(HIGH_CPU)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn panics_become_generic_server_errors() {
        let app = app(AlertRenderer::new(Arc::new(PanickingStore)), None);
        let (status, body) = send(app, post_webhook(HIGH_CPU)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"detail": "Internal server error"}));
    }
}
