use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Arg, Command};
use config::{Config, Environment};
use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DurationSeconds};

/// Configuration of the relay. Keys are the lower-cased environment variable
/// names, e.g. `DINGTALK_WEBHOOK_URL` becomes `dingtalk_webhook_url`.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub dingtalk_webhook_url: Option<String>,
    #[serde(default)]
    pub dingtalk_secret: Option<String>,
    pub dingtalk_msg_type: String,
    #[serde_as(as = "DurationSeconds<f64, Flexible>")]
    pub dingtalk_timeout: Duration,
    pub host: IpAddr,
    pub port: u16,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    pub template_dir: PathBuf,
    pub log_level: String,
}

impl Settings {
    /// Loads `.env`, the command line arguments, the optional config file and
    /// the environment.
    pub fn load() -> Result<Self> {
        // a missing .env file is fine
        dotenv::dotenv().ok();

        let opts = Command::new(clap::crate_name!())
            .version(clap::crate_version!())
            .about(clap::crate_description!())
            .author(clap::crate_authors!())
            .args([
                Arg::new("config")
                    .help("path of config file")
                    .short('c')
                    .long("config")
                    .default_value("./config.yaml"),
                Arg::new("level")
                    .help("log level")
                    .value_parser(["error", "warn", "info", "debug", "trace"])
                    .ignore_case(true)
                    .long("log"),
            ])
            .get_matches();

        let config_path = opts
            .get_one::<String>("config")
            .context("missing config path")?;

        let mut settings = Self::from_sources(config_path, Environment::default())?;

        if let Some(level) = opts.get_one::<String>("level") {
            settings.log_level = level.to_lowercase();
        }

        Ok(settings)
    }

    /// Merges defaults, the config file at `config_path` (if it exists) and
    /// `environment`. Later sources win.
    pub fn from_sources(config_path: &str, environment: Environment) -> Result<Self> {
        let conf = Config::builder()
            .set_default("dingtalk_msg_type", "markdown")?
            .set_default("dingtalk_timeout", 10.0)?
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8000)?
            .set_default("template_dir", "templates")?
            .set_default("log_level", "info")?
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(environment.try_parsing(true))
            .build()
            .context("can't load config")?;

        conf.try_deserialize().context("can't load config")
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// address of the prometheus endpoint, if enabled
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_port.map(|port| SocketAddr::new(self.host, port))
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            dingtalk_webhook_url: None,
            dingtalk_secret: None,
            dingtalk_msg_type: "markdown".into(),
            dingtalk_timeout: Duration::from_secs(10),
            host: IpAddr::from([127, 0, 0, 1]),
            port: 8000,
            metrics_port: None,
            template_dir: PathBuf::from("templates"),
            log_level: "info".into(),
        }
    }
}
