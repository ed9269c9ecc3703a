use std::str::FromStr;

use anyhow::{Context, Result};
use tracing_subscriber::{
    filter::LevelFilter, fmt, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
    EnvFilter,
};

/// Installs the global tracing subscriber
///
/// * `level` - one of `error`, `warn`, `info`, `debug`, `trace`
pub fn setup_logging(level: &str) -> Result<()> {
    let level = tracing::Level::from_str(level).context(format!("invalid log level {level:?}"))?;

    let fmt_layer = fmt::layer();

    let filter_layer = EnvFilter::default()
        .add_directive(LevelFilter::from_level(level).into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("tower_http=info".parse()?);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(())
}
