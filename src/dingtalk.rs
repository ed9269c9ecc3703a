//! Delivery of rendered alerts to a dingtalk robot webhook.
//!
//! Every call to [Dispatcher::deliver] results in at most one http request.
//! Failures are returned as [DeliveryError], nothing is retried.

use std::{str::FromStr, time::Duration};

use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{settings::Settings, signer, telemetry_endpoint::Metrics};

/// title of markdown messages
pub const MARKDOWN_TITLE: &str = "Prometheus Alert";

/// response bodies of failed requests are truncated to this many bytes
const MAX_ERROR_BODY_LEN: usize = 512;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("no dingtalk webhook url configured")]
    ConfigurationMissing,
    #[error("unsupported message type {0:?}")]
    UnsupportedType(String),
    #[error("request to dingtalk timed out")]
    Timeout,
    #[error("request to dingtalk failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("dingtalk responded with {status}: {body}")]
    NonSuccessStatus { status: StatusCode, body: String },
}

impl DeliveryError {
    /// label used for the deliveries metric
    fn outcome(&self) -> &'static str {
        match self {
            DeliveryError::ConfigurationMissing => "configuration_missing",
            DeliveryError::UnsupportedType(_) => "unsupported_type",
            DeliveryError::Timeout => "timeout",
            DeliveryError::Transport(_) => "transport_failure",
            DeliveryError::NonSuccessStatus { .. } => "non_success_status",
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return DeliveryError::Timeout;
        }

        // the url carries the signature
        DeliveryError::Transport(err.without_url())
    }
}

/// Result of a single delivery attempt
pub type DeliveryOutcome = Result<(), DeliveryError>;

/// message types understood by the robot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MsgType {
    Text,
    #[default]
    Markdown,
}

impl FromStr for MsgType {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MsgType::Text),
            "markdown" => Ok(MsgType::Markdown),
            other => Err(DeliveryError::UnsupportedType(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "msgtype", rename_all = "lowercase")]
enum Payload<'a> {
    Text { text: TextContent<'a> },
    Markdown { markdown: MarkdownContent<'a> },
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MarkdownContent<'a> {
    title: &'a str,
    text: &'a str,
}

impl<'a> Payload<'a> {
    fn new(message: &'a str, msg_type: MsgType) -> Self {
        match msg_type {
            MsgType::Text => Payload::Text {
                text: TextContent { content: message },
            },
            MsgType::Markdown => Payload::Markdown {
                markdown: MarkdownContent {
                    title: MARKDOWN_TITLE,
                    text: message,
                },
            },
        }
    }
}

/// body of robot responses. the robot answers most errors with http 200
#[derive(Debug, Deserialize)]
struct RobotResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[derive(Debug, Clone)]
pub struct DingTalkSettings {
    /// robot webhook url including the access token
    pub webhook_url: Option<String>,
    /// secret for signed security mode
    pub secret: Option<String>,
    /// message type used for rendered alerts
    pub msg_type: MsgType,
    pub timeout: Duration,
}

impl DingTalkSettings {
    /// Extracts the robot settings. Empty url and secret count as unset.
    pub fn from_settings(settings: &Settings) -> Result<Self, DeliveryError> {
        let non_empty = |value: &Option<String>| value.clone().filter(|value| !value.is_empty());

        Ok(Self {
            webhook_url: non_empty(&settings.dingtalk_webhook_url),
            secret: non_empty(&settings.dingtalk_secret),
            msg_type: settings.dingtalk_msg_type.parse()?,
            timeout: settings.dingtalk_timeout,
        })
    }
}

/// Sends messages to the robot
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    settings: DingTalkSettings,
    clock: fn() -> i64,
}

impl Dispatcher {
    pub fn new(settings: DingTalkSettings) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(settings.timeout).build()?;

        Ok(Self {
            client,
            settings,
            clock: || Utc::now().timestamp_millis(),
        })
    }

    /// replace the source of the signature timestamps
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// message type configured for rendered alerts
    pub fn msg_type(&self) -> MsgType {
        self.settings.msg_type
    }

    /// The webhook url, with `timestamp` and `sign` appended if a secret is
    /// configured.
    pub fn signed_url(&self) -> Result<String, DeliveryError> {
        let url = self
            .settings
            .webhook_url
            .as_deref()
            .ok_or(DeliveryError::ConfigurationMissing)?;

        let Some(secret) = self.settings.secret.as_deref() else {
            return Ok(url.to_string());
        };

        let signer::Signature { timestamp, sign } = signer::sign(secret, (self.clock)());
        let separator = if url.contains('?') { '&' } else { '?' };

        tracing::debug!("using signed webhook url for dingtalk");

        Ok(format!("{url}{separator}timestamp={timestamp}&sign={sign}"))
    }

    /// Sends `message` to the robot.
    ///
    /// # Arguments
    ///
    /// * `message` - the rendered alert
    ///
    /// * `msg_type` - how the robot should display `message`
    pub async fn deliver(&self, message: &str, msg_type: MsgType) -> DeliveryOutcome {
        let outcome = self.send(message, msg_type).await;

        match &outcome {
            Ok(()) => {
                tracing::info!("message sent to dingtalk successfully");
                Metrics::global().deliveries.with_label_values(&["success"]).inc();
            }
            Err(err) => {
                tracing::error!("failed to send message to dingtalk: {}", err);
                Metrics::global()
                    .deliveries
                    .with_label_values(&[err.outcome()])
                    .inc();
            }
        }

        outcome
    }

    async fn send(&self, message: &str, msg_type: MsgType) -> DeliveryOutcome {
        let url = self.signed_url()?;
        let payload = Payload::new(message, msg_type);

        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = error_body(response).await;

            return Err(DeliveryError::NonSuccessStatus { status, body });
        }

        match response.json::<RobotResponse>().await {
            Ok(RobotResponse { errcode: 0, .. }) => {}
            Ok(RobotResponse { errcode, errmsg }) => {
                tracing::warn!("dingtalk accepted the request but reported error {}: {}", errcode, errmsg);
            }
            Err(err) => {
                tracing::debug!("could not decode dingtalk response: {}", err);
            }
        }

        Ok(())
    }
}

/// Reads at most [MAX_ERROR_BODY_LEN] bytes of the response body
async fn error_body(mut response: reqwest::Response) -> String {
    let mut body = Vec::new();

    while body.len() < MAX_ERROR_BODY_LEN {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(err) => {
                tracing::debug!("could not read dingtalk error response: {}", err);
                break;
            }
        }
    }

    body.truncate(MAX_ERROR_BODY_LEN);
    String::from_utf8_lossy(&body).into_owned()
}
