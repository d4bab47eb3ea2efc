use std::path::PathBuf;

use clap::Parser;

use smithery_common::{ConfigError, GlobalConfigPatch, parse_credentials_json};

/// Flags override the config file, which overrides built-in defaults, so
/// every value here is optional.
#[derive(Debug, Parser)]
#[command(name = "smithery2api", version, about)]
pub(crate) struct Cli {
    /// JSON config file.
    #[arg(long, env = "SMITHERY_CONFIG")]
    pub(crate) config: Option<PathBuf>,
    /// Listen address [default: 0.0.0.0].
    #[arg(long, env = "HOST")]
    pub(crate) host: Option<String>,
    /// Listen port [default: 8000].
    #[arg(long, env = "PORT")]
    pub(crate) port: Option<u16>,
    /// Client key; "1" or empty disables authentication.
    #[arg(long, env = "API_MASTER_KEY", hide_env_values = true)]
    pub(crate) master_key: Option<String>,
    /// JSON array of upstream credentials.
    #[arg(long, env = "SMITHERY_CREDENTIALS", hide_env_values = true)]
    pub(crate) credentials: Option<String>,
    /// Outbound proxy for upstream calls.
    #[arg(long, env = "SMITHERY_PROXY")]
    pub(crate) proxy: Option<String>,
    /// Upstream timeout in seconds [default: 180].
    #[arg(long, env = "API_REQUEST_TIMEOUT")]
    pub(crate) timeout_secs: Option<u64>,
    /// Hidden-model file [default: ./data/hidden_models.json].
    #[arg(long, env = "MODEL_VISIBILITY_PATH")]
    pub(crate) visibility_path: Option<PathBuf>,
    /// Request records kept in memory [default: 5000].
    #[arg(long, env = "METRICS_MAX_IN_MEMORY_RECORDS")]
    pub(crate) metrics_max_records: Option<usize>,
    /// SQLite file that keeps request metrics across restarts.
    #[arg(long, env = "METRICS_DB_PATH")]
    pub(crate) metrics_db_path: Option<PathBuf>,
}

impl Cli {
    pub(crate) fn to_patch(&self) -> Result<GlobalConfigPatch, ConfigError> {
        let credentials = self
            .credentials
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(parse_credentials_json)
            .transpose()?;
        Ok(GlobalConfigPatch {
            host: self.host.clone(),
            port: self.port,
            master_key: self.master_key.clone(),
            proxy: self.proxy.clone(),
            timeout_secs: self.timeout_secs,
            visibility_path: self.visibility_path.clone(),
            metrics_max_records: self.metrics_max_records,
            metrics_db_path: self.metrics_db_path.clone(),
            credentials,
            ..GlobalConfigPatch::default()
        })
    }

    /// Defaults, then the config file, then flags and environment.
    pub(crate) fn load_patch(&self) -> Result<GlobalConfigPatch, ConfigError> {
        let mut patch = match &self.config {
            Some(path) => GlobalConfigPatch::from_file(path)?,
            None => GlobalConfigPatch::default(),
        };
        patch.overlay(self.to_patch()?);
        Ok(patch)
    }
}
