//! Renders alert batches via tera templates.
//!
//! Rendering never fails from the point of view of the caller: if the
//! template is missing or broken a minimal message containing the status and
//! the number of alerts is produced instead.

use std::{collections::HashMap, path::Path, sync::Arc};

use serde::Serialize;
use tera::Tera;
use thiserror::Error;

use crate::{
    alert::{Alert, AlertBatch, AlertStatus},
    classifier::TemplateId,
    telemetry_endpoint::Metrics,
};

/// Values available inside templates
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext<'a> {
    pub status: &'a AlertStatus,
    pub alerts: &'a [Alert],
    pub group_labels: &'a HashMap<String, String>,
    pub common_labels: &'a HashMap<String, String>,
    pub common_annotations: &'a HashMap<String, String>,
    pub external_url: &'a str,
}

impl<'a> From<&'a AlertBatch> for TemplateContext<'a> {
    fn from(batch: &'a AlertBatch) -> Self {
        Self {
            status: &batch.status,
            alerts: &batch.alerts,
            group_labels: &batch.group_labels,
            common_labels: &batch.common_labels,
            common_annotations: &batch.common_annotations,
            external_url: &batch.external_url,
        }
    }
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to render template: {0:?}")]
    Template(#[from] tera::Error),
}

/// named templates used to render alert batches
pub trait TemplateStore: Send + Sync {
    fn render(&self, id: TemplateId, context: &TemplateContext<'_>) -> Result<String, RenderError>;
}

/// [TemplateStore] backed by [Tera]
pub struct TeraTemplateStore {
    tera: Tera,
}

impl TeraTemplateStore {
    /// Loads `{name}.tera` from `dir` for every [TemplateId].
    ///
    /// Templates that can't be loaded are skipped, rendering them falls back
    /// to the minimal message.
    pub fn load(dir: &Path) -> Self {
        let mut tera = Tera::default();

        for id in TemplateId::ALL {
            let path = dir.join(format!("{}.tera", id.name()));

            match tera.add_template_file(&path, Some(id.name())) {
                Ok(()) => tracing::info!("loaded template {} from {:?}", id, path),
                Err(err) => tracing::error!("could not load template {} from {:?}: {:?}", id, path, err),
            }
        }

        Self { tera }
    }

    /// Same as [TeraTemplateStore::load] but takes the template sources directly.
    pub fn from_raw(templates: &[(TemplateId, &str)]) -> Self {
        let mut tera = Tera::default();

        for (id, source) in templates {
            if let Err(err) = tera.add_raw_template(id.name(), source) {
                tracing::error!("could not compile template {}: {:?}", id, err);
            }
        }

        Self { tera }
    }
}

impl TemplateStore for TeraTemplateStore {
    fn render(&self, id: TemplateId, context: &TemplateContext<'_>) -> Result<String, RenderError> {
        let context = tera::Context::from_serialize(context)?;

        Ok(self.tera.render(id.name(), &context)?)
    }
}

/// Alert renderer
#[derive(Clone)]
pub struct AlertRenderer {
    store: Arc<dyn TemplateStore>,
}

impl AlertRenderer {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }

    /// Renders the batch with the template `id`. If rendering fails the error
    /// is logged and [fallback_message] is returned.
    ///
    /// # Arguments
    ///
    /// * `id` - template selected for the batch
    ///
    /// * `batch` - unrendered alert batch
    pub fn render(&self, id: TemplateId, batch: &AlertBatch) -> String {
        match self.store.render(id, &TemplateContext::from(batch)) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!("failed to render template {}: {:?}", id, err);
                Metrics::global().render_fallbacks.inc();

                fallback_message(&batch.status, batch.alerts.len())
            }
        }
    }
}

/// message used if the template couldn't be rendered
pub fn fallback_message(status: &AlertStatus, alert_count: usize) -> String {
    format!("**Prometheus Alert**\n\nStatus: {status}\nAlert Count: {alert_count}")
}
