//! Here we expose prometheus metrics about the relay
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, TextEncoder};

static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// counters shared by all requests
#[derive(Debug, Clone)]
pub struct Metrics {
    /// deserialized alert batches
    pub received_batches: IntCounter,
    /// templates picked by the classifier
    pub selected_templates: IntCounterVec,
    /// renders that fell back to the minimal message
    pub render_fallbacks: IntCounter,
    /// delivery attempts by outcome
    pub deliveries: IntCounterVec,
}

impl Metrics {
    pub fn global() -> &'static Self {
        &METRICS
    }

    #[allow(clippy::expect_used)]
    fn new() -> Self {
        use prometheus::{opts, register_int_counter, register_int_counter_vec};

        let received_batches = register_int_counter!(opts!(
            "received_batches",
            "total number of deserialized alert batches"
        )
        .namespace("dingtalk_relay")
        .subsystem("alertmanager_webhook"))
        .expect("failed to register received_batches");

        let selected_templates = register_int_counter_vec!(
            opts!("selected_templates", "templates selected for alert batches")
                .namespace("dingtalk_relay")
                .subsystem("renderer"),
            &["template"]
        )
        .expect("failed to register selected_templates");

        let render_fallbacks = register_int_counter!(opts!(
            "fallbacks",
            "number of alert batches rendered with the fallback message"
        )
        .namespace("dingtalk_relay")
        .subsystem("renderer"))
        .expect("failed to register render fallbacks");

        let deliveries = register_int_counter_vec!(
            opts!("deliveries", "delivery attempts to the dingtalk robot")
                .namespace("dingtalk_relay")
                .subsystem("dingtalk"),
            &["outcome"]
        )
        .expect("failed to register deliveries");

        Self {
            received_batches,
            selected_templates,
            render_fallbacks,
            deliveries,
        }
    }
}

async fn metrics_handler() -> Response {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("failed to encode metrics: {:?}", err);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    ([(CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

pub fn router() -> Router {
    // make sure the counters show up before the first alert arrives
    Lazy::force(&METRICS);

    Router::new().route("/metrics", get(metrics_handler))
}

pub async fn run_telemetry_endpoint(addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("could not bind telemetry endpoint to {addr}"))?;

    tracing::info!("serving metrics on {}", addr);

    axum::serve(listener, router())
        .await
        .context("telemetry endpoint crashed")?;

    Ok(())
}
