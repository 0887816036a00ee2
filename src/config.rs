use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "BOLETIMD_LOG";
pub const WORKSPACE_ENV: &str = "BOLETIMD_WORKSPACE";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process-level settings, read once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub workspace: Option<PathBuf>,
}

impl DaemonConfig {
    /// Reads the environment, after loading a `.env` file when one exists.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            log_filter: non_blank(LOG_ENV).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            workspace: non_blank(WORKSPACE_ENV).map(PathBuf::from),
        }
    }
}

/// stdout carries the protocol, so log lines go to stderr.
pub fn init_logging(cfg: &DaemonConfig) {
    let filter = EnvFilter::try_new(&cfg.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
