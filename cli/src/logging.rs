//! Log subscriber setup.
//!
//! Logs go to stderr so `pull -o -` can stream the bundle on stdout.
//! `RUST_LOG` selects the filter (default `warn`) and
//! `CNAB_OCI_LOG_FORMAT=json` switches to one JSON object per event.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Format named by `CNAB_OCI_LOG_FORMAT`; anything unknown is text.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let format = LogFormat::from_env_value(std::env::var("CNAB_OCI_LOG_FORMAT").ok().as_deref());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
