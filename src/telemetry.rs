use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// How log lines are rendered on stderr
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Initialize tracing
///
/// Logs go to stderr so stdout stays free for the hook outcome.
pub fn init(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let logger = match format {
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let collector = Registry::default().with(logger).with(env_filter);
    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}
