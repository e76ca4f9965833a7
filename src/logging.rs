use anyhow::{Error, Result};
use tracing_subscriber::{fmt, fmt::writer::BoxMakeWriter, EnvFilter};

use crate::config::AppConfig;

/// Installs the global subscriber. Logs go to stderr unless `log_directory`
/// is set, in which case they roll daily under that directory.
pub fn init(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;
    let writer = match &config.log_directory {
        Some(dir) => {
            let prefix = format!("{}.log", config.service_name);
            BoxMakeWriter::new(tracing_appender::rolling::daily(dir, prefix))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.log_directory.is_none())
        .try_init()
        .map_err(Error::msg)?;
    Ok(())
}
