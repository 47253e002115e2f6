use crate::export::{ExportOptions, PagePolicy, DEFAULT_DATE_FONT_SIZE, DEFAULT_RENDER_SCALE};
use crate::signing::{AUTO_APPLY_INDICATOR_MS, HIGHLIGHT_DURATION_MS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// User-configurable parameters for signing and export.
/// Stored in the platform config directory (`$XDG_CONFIG_HOME/signpad/` or `%APPDATA%\signpad\`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pixels per point used when rasterizing pages for export.
    pub export_render_scale: f64,
    /// Output page sizing for exported documents.
    pub output_page: PagePolicy,
    /// Date text size in points, before fit scaling.
    pub date_font_size: f64,
    /// How long the next field stays highlighted, in milliseconds.
    pub highlight_ms: u64,
    /// Minimum time the auto-apply indicator is shown, in milliseconds.
    pub auto_apply_indicator_ms: u64,
    /// Where signed documents are uploaded. Uploading is disabled when unset.
    pub upload_endpoint: Option<String>,
    /// Optional URL notified with the uploaded document's location.
    pub metadata_callback: Option<String>,
    pub upload_timeout_secs: u64,
    /// Used to pre-fill typed signatures and initials.
    pub signer_first_name: String,
    pub signer_last_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            export_render_scale: DEFAULT_RENDER_SCALE,
            output_page: PagePolicy::default(),
            date_font_size: DEFAULT_DATE_FONT_SIZE,
            highlight_ms: HIGHLIGHT_DURATION_MS,
            auto_apply_indicator_ms: AUTO_APPLY_INDICATOR_MS,
            upload_endpoint: None,
            metadata_callback: None,
            upload_timeout_secs: 60,
            signer_first_name: String::new(),
            signer_last_name: String::new(),
        }
    }
}

impl Config {
    /// Load config from `config.json` in the config directory, or return defaults.
    /// Nothing is written; see [`Config::write_default`].
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No config file at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(dir) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                log::warn!("Failed to create {}: {}", dir.display(), e);
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::warn!("Failed to write config to {}: {}", path.display(), e);
                }
            }
            Err(e) => {
                log::warn!("Failed to serialize config: {}", e);
            }
        }
    }

    /// Write a default `config.json` unless one exists. Returns its path.
    pub fn write_default() -> PathBuf {
        let path = config_path();
        if path.exists() {
            log::info!("Keeping existing config at {}", path.display());
        } else {
            Self::default().save_to(&path);
        }
        path
    }

    pub fn export_options(&self) -> ExportOptions {
        let render_scale = if self.export_render_scale > 0.0 {
            self.export_render_scale
        } else {
            DEFAULT_RENDER_SCALE
        };
        ExportOptions {
            render_scale,
            policy: self.output_page,
            date_font_size: self.date_font_size,
        }
    }

    pub fn highlight_duration(&self) -> Duration {
        Duration::from_millis(self.highlight_ms)
    }

    pub fn indicator_duration(&self) -> Duration {
        Duration::from_millis(self.auto_apply_indicator_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs.max(1))
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("signpad")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"upload_endpoint": "https://example.test/upload",
                "output_page": {"kind": "match_source"}}"#,
        )
        .unwrap();
        assert_eq!(config.upload_endpoint.as_deref(), Some("https://example.test/upload"));
        assert_eq!(config.output_page, PagePolicy::MatchSource);
        assert_eq!(config.highlight_ms, 1500);
        assert_eq!(config.export_render_scale, 2.0);
    }

    #[test]
    fn test_default_output_is_a4_fit() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["output_page"]["kind"], "fit");
        assert_eq!(json["output_page"]["width"], 595.28);
    }

    #[test]
    fn test_export_options_guard_scale() {
        let config = Config {
            export_render_scale: 0.0,
            ..Default::default()
        };
        assert_eq!(config.export_options().render_scale, DEFAULT_RENDER_SCALE);
    }

    #[test]
    fn test_load_missing_file_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signpad").join("config.json");
        assert_eq!(Config::load_from(&path), Config::default());
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signpad").join("config.json");
        let config = Config {
            signer_first_name: "Ada".into(),
            highlight_ms: 900,
            ..Default::default()
        };
        config.save_to(&path);
        assert_eq!(Config::load_from(&path), config);
    }
}
