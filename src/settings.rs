use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Overrides `data_dir` when set.
pub const DATA_DIR_ENV: &str = "IOLTA_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: String,
    pub user_name: String,
    /// Owner of personal categorization rules. Unset means the system
    /// context, which manages global rules.
    pub user_id: Option<i64>,
    pub log_level: String,
    /// How long categorization waits on an attached classifier.
    pub classifier_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            user_name: String::new(),
            user_id: None,
            log_level: "warn".to_string(),
            classifier_timeout_ms: 2000,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("iolta")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("iolta")
}

fn parse_settings(content: &str) -> Settings {
    serde_json::from_str(content).unwrap_or_default()
}

/// Loads settings, falling back to defaults field by field. A missing or
/// unreadable file yields the defaults.
pub fn load_settings() -> Settings {
    let mut settings = match std::fs::read_to_string(settings_path()) {
        Ok(content) => parse_settings(&content),
        Err(_) => Settings::default(),
    };
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            settings.data_dir = dir;
        }
    }
    settings
}

pub fn save_settings(settings: &Settings) -> anyhow::Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(settings_path(), format!("{json}\n")).context("writing settings.json")?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert!(s.user_name.is_empty());
        assert_eq!(s.user_id, None);
        assert_eq!(s.log_level, "warn");
        assert_eq!(s.classifier_timeout_ms, 2000);
        assert!(s.data_dir.ends_with("iolta"));
    }

    #[test]
    fn test_partial_file_merges_with_defaults() {
        let s = parse_settings(r#"{"data_dir": "/tmp/firm", "user_id": 4}"#);
        assert_eq!(s.data_dir, "/tmp/firm");
        assert_eq!(s.user_id, Some(4));
        assert_eq!(s.log_level, "warn");
        assert_eq!(s.classifier_timeout_ms, 2000);
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let s = parse_settings("not json");
        assert_eq!(s.log_level, "warn");
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            data_dir: "/tmp/test".to_string(),
            user_name: "Alice".to_string(),
            user_id: Some(1),
            log_level: "debug".to_string(),
            classifier_timeout_ms: 250,
        };
        std::fs::write(&path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();
        let loaded = parse_settings(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(loaded.user_name, "Alice");
        assert_eq!(loaded.classifier_timeout_ms, 250);
    }
}
