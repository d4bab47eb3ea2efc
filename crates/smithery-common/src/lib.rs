use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_METRICS_MAX_RECORDS: usize = 5000;
pub const DEFAULT_VISIBILITY_PATH: &str = "./data/hidden_models.json";
pub const DEFAULT_UPSTREAM_URL: &str = "https://smithery.ai/api/chat";
pub const DEFAULT_PROJECT_REF: &str = "spjawbfpwezjfmicopsl";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const DEFAULT_KNOWN_MODELS: &[&str] = &[
    "claude-haiku-4.5",
    "claude-sonnet-4.5",
    "gpt-5",
    "gpt-5-mini",
    "gpt-5-nano",
    "gemini-2.5-flash-lite",
    "gemini-2.5-pro",
    "glm-4.6",
    "grok-4-fast-non-reasoning",
    "grok-4-fast-reasoning",
    "kimi-k2",
    "deepseek-reasoner",
];

pub const DEFAULT_HIDDEN_MODELS: &[&str] = &["gemini-2.5-flash-lite", "gemini-2.5-pro"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid credentials json: {0}")]
    Credentials(#[source] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// One upstream session as supplied by the operator.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Display label; defaults to `token-<n>` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    pub expires_at: i64,
    #[serde(default)]
    pub user: JsonValue,
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("name", &self.name)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Final, merged configuration used by the running process.
///
/// Merge order: CLI/ENV > config file > defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// `None` disables client authentication.
    pub master_key: Option<String>,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    pub timeout_secs: u64,
    pub visibility_path: PathBuf,
    pub metrics_max_records: usize,
    /// SQLite file for request metrics; in-memory records when unset.
    pub metrics_db_path: Option<PathBuf>,
    pub credentials: Vec<CredentialConfig>,
    pub model_aliases: BTreeMap<String, String>,
    pub known_models: Vec<String>,
    /// Hidden set used until the visibility file exists.
    pub hidden_models: Vec<String>,
    pub system_prompt: Option<String>,
    pub upstream_url: String,
    pub project_ref: String,
    pub retry_next_credential: bool,
}

impl GlobalConfig {
    pub fn auth_enabled(&self) -> bool {
        self.master_key.is_some()
    }
}

/// Optional layer used for merging config. Also the on-disk file shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub master_key: Option<String>,
    pub proxy: Option<String>,
    pub timeout_secs: Option<u64>,
    pub visibility_path: Option<PathBuf>,
    pub metrics_max_records: Option<usize>,
    pub metrics_db_path: Option<PathBuf>,
    pub credentials: Option<Vec<CredentialConfig>>,
    pub model_aliases: Option<BTreeMap<String, String>>,
    pub known_models: Option<Vec<String>>,
    pub hidden_models: Option<Vec<String>>,
    pub system_prompt: Option<String>,
    pub upstream_url: Option<String>,
    pub project_ref: Option<String>,
    pub retry_next_credential: Option<bool>,
}

impl GlobalConfigPatch {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(
                    if other.$field.is_some() {
                        self.$field = other.$field;
                    }
                )*
            };
        }
        take!(
            host,
            port,
            master_key,
            proxy,
            timeout_secs,
            visibility_path,
            metrics_max_records,
            metrics_db_path,
            credentials,
            model_aliases,
            known_models,
            hidden_models,
            system_prompt,
            upstream_url,
            project_ref,
            retry_next_credential,
        );
    }

    pub fn into_config(self) -> Result<GlobalConfig, ConfigError> {
        let timeout_secs = self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        let metrics_max_records = self
            .metrics_max_records
            .unwrap_or(DEFAULT_METRICS_MAX_RECORDS);
        if metrics_max_records == 0 {
            return Err(ConfigError::InvalidValue {
                field: "metrics_max_records",
                reason: "must be greater than zero".to_string(),
            });
        }

        let credentials = self.credentials.unwrap_or_default();
        for (index, credential) in credentials.iter().enumerate() {
            if credential.access_token.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "credentials",
                    reason: format!("credential {index} has an empty access_token"),
                });
            }
        }

        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            master_key: self.master_key.and_then(normalize_master_key),
            proxy: self.proxy.filter(|proxy| !proxy.trim().is_empty()),
            timeout_secs,
            visibility_path: self
                .visibility_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VISIBILITY_PATH)),
            metrics_max_records,
            metrics_db_path: self
                .metrics_db_path
                .filter(|path| !path.as_os_str().is_empty()),
            credentials,
            model_aliases: self.model_aliases.unwrap_or_default(),
            known_models: self.known_models.unwrap_or_else(|| owned(DEFAULT_KNOWN_MODELS)),
            hidden_models: self
                .hidden_models
                .unwrap_or_else(|| owned(DEFAULT_HIDDEN_MODELS)),
            system_prompt: Some(
                self.system_prompt
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            )
            .filter(|prompt| !prompt.is_empty()),
            upstream_url: self
                .upstream_url
                .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
            project_ref: self
                .project_ref
                .unwrap_or_else(|| DEFAULT_PROJECT_REF.to_string()),
            retry_next_credential: self.retry_next_credential.unwrap_or(false),
        })
    }
}

/// `"1"` and blank keys mean "no authentication".
fn normalize_master_key(key: String) -> Option<String> {
    let trimmed = key.trim();
    if trimmed.is_empty() || trimmed == "1" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Parses the `--credentials` / `SMITHERY_CREDENTIALS` value: a JSON array of
/// credential objects.
pub fn parse_credentials_json(raw: &str) -> Result<Vec<CredentialConfig>, ConfigError> {
    serde_json::from_str(raw).map_err(ConfigError::Credentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(token: &str) -> CredentialConfig {
        CredentialConfig {
            name: None,
            access_token: token.to_string(),
            refresh_token: "r".to_string(),
            token_type: None,
            expires_in: None,
            expires_at: 1_900_000_000,
            user: serde_json::json!({"email": "someone@example.com"}),
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = GlobalConfigPatch::default().into_config().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.timeout_secs, 180);
        assert_eq!(config.metrics_max_records, 5000);
        assert_eq!(config.visibility_path, PathBuf::from("./data/hidden_models.json"));
        assert_eq!(config.known_models.len(), DEFAULT_KNOWN_MODELS.len());
        assert_eq!(config.hidden_models, vec!["gemini-2.5-flash-lite", "gemini-2.5-pro"]);
        assert_eq!(config.system_prompt.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));
        assert!(!config.auth_enabled());
        assert!(!config.retry_next_credential);
        assert_eq!(config.metrics_db_path, None);
    }

    #[test]
    fn blank_metrics_db_path_keeps_records_in_memory() {
        let config = GlobalConfigPatch {
            metrics_db_path: Some(PathBuf::new()),
            ..Default::default()
        }
        .into_config()
        .unwrap();
        assert_eq!(config.metrics_db_path, None);

        let config = GlobalConfigPatch {
            metrics_db_path: Some(PathBuf::from("./data/metrics.db")),
            ..Default::default()
        }
        .into_config()
        .unwrap();
        assert_eq!(config.metrics_db_path, Some(PathBuf::from("./data/metrics.db")));
    }

    #[test]
    fn overlay_prefers_later_layer() {
        let mut base = GlobalConfigPatch {
            port: Some(9000),
            proxy: Some("http://file-proxy:8080".to_string()),
            credentials: Some(vec![credential("a")]),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(9100),
            master_key: Some("secret".to_string()),
            ..Default::default()
        });

        let config = base.into_config().unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.proxy.as_deref(), Some("http://file-proxy:8080"));
        assert_eq!(config.master_key.as_deref(), Some("secret"));
        assert_eq!(config.credentials.len(), 1);
    }

    #[test]
    fn master_key_one_disables_auth() {
        for key in ["1", "", "   "] {
            let config = GlobalConfigPatch {
                master_key: Some(key.to_string()),
                ..Default::default()
            }
            .into_config()
            .unwrap();
            assert!(!config.auth_enabled(), "key {key:?}");
        }
    }

    #[test]
    fn rejects_zero_timeout_and_blank_tokens() {
        let err = GlobalConfigPatch {
            timeout_secs: Some(0),
            ..Default::default()
        }
        .into_config()
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "timeout_secs", .. }));

        let err = GlobalConfigPatch {
            credentials: Some(vec![credential(" ")]),
            ..Default::default()
        }
        .into_config()
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "credentials", .. }));
    }

    #[test]
    fn parses_credentials_array() {
        let parsed = parse_credentials_json(
            r#"[{"name":"main","access_token":"a","refresh_token":"r","expires_at":1,"user":{"id":"u"}}]"#,
        )
        .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name.as_deref(), Some("main"));
        assert!(parse_credentials_json("{}").is_err());
    }

    #[test]
    fn debug_output_hides_tokens() {
        let rendered = format!("{:?}", credential("very-secret-token"));
        assert!(!rendered.contains("very-secret-token"));
    }

    #[test]
    fn reads_file_layer() {
        let dir = std::env::temp_dir().join(format!("smithery-common-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(
            &path,
            r#"{"port": 8100, "model_aliases": {"haiku": "claude-haiku-4.5"}, "retry_next_credential": true}"#,
        )
        .unwrap();

        let config = GlobalConfigPatch::from_file(&path).unwrap().into_config().unwrap();
        assert_eq!(config.port, 8100);
        assert_eq!(config.model_aliases.get("haiku").map(String::as_str), Some("claude-haiku-4.5"));
        assert!(config.retry_next_credential);

        std::fs::write(&path, r#"{"unknown_field": 1}"#).unwrap();
        assert!(matches!(
            GlobalConfigPatch::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
