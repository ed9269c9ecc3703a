//! prometheus alertmanager receiver that forwards alerts to a dingtalk robot
//!
//! Features:
//! - picks a template per alert batch (certificate expiry, service down, default)
//! - tera templates loaded from the template directory, with a minimal fallback message
//! - signed security mode for dingtalk robots

use std::sync::Arc;

use anyhow::{Context, Result};
use settings::Settings;

use crate::{
	alert_renderer::{AlertRenderer, TeraTemplateStore},
	alertmanager_webhook_receiver::ReceiverState,
	dingtalk::{DingTalkSettings, Dispatcher},
};

mod alert;
mod alert_renderer;
mod alertmanager_webhook_receiver;
mod classifier;
mod dingtalk;
mod log;
mod settings;
mod signer;
mod telemetry_endpoint;

/// the entry point of the program
#[tokio::main]
pub async fn main() -> Result<()> {
	let settings = Settings::load().context("failed to load config and command line arguments")?;

	log::setup_logging(&settings.log_level).context("could not setup logging")?;

	let dingtalk = DingTalkSettings::from_settings(&settings).context("invalid dingtalk settings")?;
	if dingtalk.webhook_url.is_none() {
		tracing::warn!("DINGTALK_WEBHOOK_URL not configured, alerts can't be delivered");
	}
	if dingtalk.secret.is_some() {
		tracing::info!("dingtalk signed security mode enabled");
	}

	let dispatcher = Dispatcher::new(dingtalk).context("failed to construct dingtalk client")?;
	let renderer = AlertRenderer::new(Arc::new(TeraTemplateStore::load(&settings.template_dir)));
	let state = Arc::new(ReceiverState::new(renderer, dispatcher));

	if let Some(addr) = settings.metrics_addr() {
		tokio::spawn(async move {
			if let Err(err) = telemetry_endpoint::run_telemetry_endpoint(addr).await {
				tracing::error!("{:#}", err);
			}
		});
	}

	alertmanager_webhook_receiver::run_prometheus_receiver(settings.to_socket_addr(), state).await
}
