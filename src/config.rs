//! Capture configuration.
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. JSON file at `$SCREENCAP_CONFIG`, else `<config_dir>/screencap/config.json`
//! 3. `SCREENCAP_*` environment variables (a `.env` file is loaded first)
//!
//! Storage root defaults to the platform pictures directory:
//!   macOS:   ~/Pictures/screencap/
//!   Linux:   ~/Pictures/screencap/ (XDG_PICTURES_DIR)
//!   Windows: %USERPROFILE%\Pictures\screencap\

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name given to the mirrored surface.
pub const DEFAULT_SURFACE_NAME: &str = "screencap";

/// Encoding used for persisted frames. The file extension follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg { quality: u8 },
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg { .. } => "jpg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    #[default]
    Png,
    Jpeg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Directory the numbered image files are written to.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    #[serde(default)]
    pub format: FormatKind,

    /// Only used when `format` is `jpeg`.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Trim the stride padding columns before encoding.
    #[serde(default = "default_true")]
    pub crop_row_padding: bool,

    #[serde(default = "default_surface_name")]
    pub surface_name: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            format: FormatKind::default(),
            jpeg_quality: default_jpeg_quality(),
            crop_row_padding: true,
            surface_name: default_surface_name(),
        }
    }
}

impl CaptureConfig {
    /// Load config from the config file and `SCREENCAP_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = std::env::var_os("SCREENCAP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path);

        let mut config = if path.is_file() {
            log::info!("[CONFIG] Reading {}", path.display());
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `SCREENCAP_*` overrides fetched through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("SCREENCAP_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(root);
        }
        if let Some(format) = lookup("SCREENCAP_FORMAT") {
            self.format = match format.trim().to_ascii_lowercase().as_str() {
                "png" => FormatKind::Png,
                "jpeg" | "jpg" => FormatKind::Jpeg,
                _ => return Err(ConfigError::Invalid("SCREENCAP_FORMAT", format)),
            };
        }
        if let Some(quality) = lookup("SCREENCAP_JPEG_QUALITY") {
            self.jpeg_quality = quality
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("SCREENCAP_JPEG_QUALITY", quality))?;
        }
        if let Some(crop) = lookup("SCREENCAP_CROP_PADDING") {
            self.crop_row_padding = match crop.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::Invalid("SCREENCAP_CROP_PADDING", crop)),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(
                "jpeg_quality",
                self.jpeg_quality.to_string(),
            ));
        }
        if self.surface_name.trim().is_empty() {
            return Err(ConfigError::Invalid("surface_name", self.surface_name.clone()));
        }
        Ok(())
    }

    pub fn output_format(&self) -> OutputFormat {
        match self.format {
            FormatKind::Png => OutputFormat::Png,
            FormatKind::Jpeg => OutputFormat::Jpeg {
                quality: self.jpeg_quality,
            },
        }
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("screencap")
        .join("config.json")
}

fn default_storage_root() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("screencap")
}

fn default_jpeg_quality() -> u8 {
    100
}

fn default_true() -> bool {
    true
}

fn default_surface_name() -> String {
    DEFAULT_SURFACE_NAME.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {0}: '{1}'")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_config(name: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("screencap-config-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_write_png_under_screencap() {
        let config = CaptureConfig::default();
        assert_eq!(config.output_format(), OutputFormat::Png);
        assert!(config.storage_root.ends_with("screencap"));
        assert!(config.crop_row_padding);
        assert_eq!(config.surface_name, "screencap");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: CaptureConfig =
            serde_json::from_str(r#"{ "format": "jpeg", "jpeg_quality": 90 }"#).unwrap();
        assert_eq!(config.output_format(), OutputFormat::Jpeg { quality: 90 });
        assert_eq!(config.output_format().extension(), "jpg");
        assert_eq!(config.surface_name, DEFAULT_SURFACE_NAME);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = CaptureConfig::default();
        config
            .apply_env(env(&[
                ("SCREENCAP_STORAGE_ROOT", "/tmp/shots"),
                ("SCREENCAP_FORMAT", "JPG"),
                ("SCREENCAP_JPEG_QUALITY", "80"),
                ("SCREENCAP_CROP_PADDING", "off"),
            ]))
            .unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/tmp/shots"));
        assert_eq!(config.output_format(), OutputFormat::Jpeg { quality: 80 });
        assert!(!config.crop_row_padding);
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut config = CaptureConfig::default();
        let err = config
            .apply_env(env(&[("SCREENCAP_FORMAT", "gif")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("SCREENCAP_FORMAT", _)));
    }

    #[test]
    fn zero_quality_fails_validation() {
        let config = CaptureConfig {
            jpeg_quality: 0,
            ..CaptureConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_file_on_disk_is_read() {
        let path = write_config(
            "read",
            r#"{ "storage_root": "/tmp/screencap-shots", "format": "jpeg", "jpeg_quality": 70 }"#,
        );
        let config = CaptureConfig::from_file(&path).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/tmp/screencap-shots"));
        assert_eq!(config.output_format(), OutputFormat::Jpeg { quality: 70 });
        assert!(config.crop_row_padding);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn malformed_config_file_reports_parse_error() {
        let path = write_config("malformed", r#"{ "format": "jpeg", "#);
        let err = CaptureConfig::from_file(&path).unwrap_err();
        match err {
            ConfigError::Parse { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("expected Parse, got {:?}", other),
        }
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_config_file_reports_read_error() {
        let path = std::env::temp_dir().join("screencap-config-absent").join("config.json");
        let err = CaptureConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_follows_config_env_var() {
        let good = write_config("load", r#"{ "format": "jpeg", "jpeg_quality": 55 }"#);
        let bad = write_config("load-bad", r#"{ "jpeg_quality": 0 }"#);

        // Both cases share one test so the process-wide variable is not raced.
        std::env::set_var("SCREENCAP_CONFIG", &good);
        let loaded = CaptureConfig::load();
        std::env::set_var("SCREENCAP_CONFIG", &bad);
        let rejected = CaptureConfig::load();
        std::env::remove_var("SCREENCAP_CONFIG");

        assert_eq!(loaded.unwrap().output_format(), OutputFormat::Jpeg { quality: 55 });
        assert!(matches!(rejected, Err(ConfigError::Invalid("jpeg_quality", _))));
        let _ = std::fs::remove_dir_all(good.parent().unwrap());
        let _ = std::fs::remove_dir_all(bad.parent().unwrap());
    }
}
