use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use smithery_provider_core::ModelVisibility;

use crate::{StorageError, StorageResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibilityDescription {
    pub known_models: Vec<String>,
    pub visible_models: Vec<String>,
    pub hidden_models: Vec<String>,
}

/// Which catalog models are hidden from clients, persisted as a JSON array.
///
/// Reads are lock-free snapshots. Only names from the known catalog are
/// ever stored.
pub struct ModelVisibilityStore {
    known: Vec<String>,
    hidden: ArcSwap<HashSet<String>>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl ModelVisibilityStore {
    /// A persisted file, when present and readable, wins over `default_hidden`.
    pub fn load(
        known_models: &[String],
        default_hidden: &[String],
        path: Option<PathBuf>,
    ) -> Self {
        let known = normalize(known_models.iter().map(String::as_str));
        let persisted = path.as_deref().and_then(read_hidden_file);
        let source = persisted.as_deref().unwrap_or(default_hidden);
        let hidden: HashSet<String> = normalize(source.iter().map(String::as_str))
            .into_iter()
            .filter(|model| known.contains(model))
            .collect();

        Self {
            known,
            hidden: ArcSwap::from_pointee(hidden),
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory(known_models: &[String], default_hidden: &[String]) -> Self {
        Self::load(known_models, default_hidden, None)
    }

    pub fn known_models(&self) -> Vec<String> {
        self.known.clone()
    }

    pub fn hidden_models(&self) -> Vec<String> {
        let hidden = self.hidden.load();
        self.known
            .iter()
            .filter(|model| hidden.contains(*model))
            .cloned()
            .collect()
    }

    pub fn visible_models(&self) -> Vec<String> {
        let hidden = self.hidden.load();
        self.known
            .iter()
            .filter(|model| !hidden.contains(*model))
            .cloned()
            .collect()
    }

    pub fn describe(&self) -> VisibilityDescription {
        VisibilityDescription {
            known_models: self.known_models(),
            visible_models: self.visible_models(),
            hidden_models: self.hidden_models(),
        }
    }

    /// Replaces the hidden set and persists it. Unknown names, blanks and
    /// duplicates are dropped; the stored list follows catalog order.
    pub async fn set_hidden(&self, models: &[String]) -> StorageResult<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        let requested = normalize(models.iter().map(String::as_str));
        let hidden: Vec<String> = self
            .known
            .iter()
            .filter(|model| requested.contains(model))
            .cloned()
            .collect();

        if let Some(path) = &self.path {
            write_hidden_file(path, &hidden).await?;
        }
        self.hidden
            .store(Arc::new(hidden.iter().cloned().collect()));
        info!(event = "visibility_updated", hidden = ?hidden);
        Ok(hidden)
    }
}

impl ModelVisibility for ModelVisibilityStore {
    fn is_hidden(&self, model: &str) -> bool {
        self.hidden.load().contains(model)
    }

    fn known_models(&self) -> Vec<String> {
        self.known.clone()
    }
}

fn normalize<'a>(models: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    models
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .filter(|model| seen.insert(model.to_string()))
        .map(str::to_string)
        .collect()
}

fn read_hidden_file(path: &Path) -> Option<Vec<String>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(event = "visibility_load_failed", path = %path.display(), error = %err);
            return None;
        }
    };
    match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
        Ok(values) => Some(
            values
                .into_iter()
                .filter_map(|value| value.as_str().map(str::to_string))
                .collect(),
        ),
        Err(err) => {
            warn!(event = "visibility_load_failed", path = %path.display(), error = %err);
            None
        }
    }
}

async fn write_hidden_file(path: &Path, hidden: &[String]) -> StorageResult<()> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let payload = serde_json::to_string_pretty(hidden)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, payload).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("smithery-visibility-{tag}-{}", std::process::id()))
            .join("hidden_models.json")
    }

    #[test]
    fn defaults_are_limited_to_known_models() {
        let store = ModelVisibilityStore::in_memory(
            &names(&["gpt-5", "gemini-2.5-pro", "kimi-k2"]),
            &names(&["gemini-2.5-pro", "not-a-model"]),
        );
        assert_eq!(store.hidden_models(), names(&["gemini-2.5-pro"]));
        assert_eq!(store.visible_models(), names(&["gpt-5", "kimi-k2"]));
        assert!(store.is_hidden("gemini-2.5-pro"));
        assert!(!store.is_hidden("not-a-model"));
    }

    #[tokio::test]
    async fn set_hidden_normalizes_and_persists() {
        let path = temp_path("persist");
        let _ = std::fs::remove_file(&path);
        let known = names(&["gpt-5", "glm-4.6", "kimi-k2"]);

        let store = ModelVisibilityStore::load(&known, &[], Some(path.clone()));
        let hidden = store
            .set_hidden(&names(&[" kimi-k2 ", "gpt-5", "kimi-k2", "", "unknown"]))
            .await
            .unwrap();
        assert_eq!(hidden, names(&["gpt-5", "kimi-k2"]));
        assert_eq!(
            store.describe(),
            VisibilityDescription {
                known_models: known.clone(),
                visible_models: names(&["glm-4.6"]),
                hidden_models: names(&["gpt-5", "kimi-k2"]),
            }
        );

        let reloaded = ModelVisibilityStore::load(&known, &names(&["glm-4.6"]), Some(path.clone()));
        assert_eq!(reloaded.hidden_models(), names(&["gpt-5", "kimi-k2"]));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let store =
            ModelVisibilityStore::load(&names(&["gpt-5"]), &names(&["gpt-5"]), Some(path.clone()));
        assert_eq!(store.hidden_models(), names(&["gpt-5"]));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
