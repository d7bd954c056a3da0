//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// Selects which backend transcribes the audio.
///
/// | Variant | Backend                               | Needs network | Needs key |
/// |---------|---------------------------------------|---------------|-----------|
/// | Device  | OS speech recognizer                  | No            | No        |
/// | Server  | Generic streaming WebSocket server    | Yes           | No        |
/// | Cloud   | Cloud streaming API                   | Yes           | Yes       |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// On-device recognizer — private, no network.
    Device,
    /// Self-hosted streaming server.
    Server,
    /// Cloud streaming API — highest accuracy, requires an API key.
    Cloud,
}

impl Default for SourceKind {
    fn default() -> Self {
        Self::Device
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SourceKind::Device => "device",
            SourceKind::Server => "server",
            SourceKind::Cloud => "cloud",
        })
    }
}

// ---------------------------------------------------------------------------
// DeviceConfig
// ---------------------------------------------------------------------------

/// Settings for the on-device recognizer source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Recognition language as a BCP 47 tag (e.g. `"en-US"`).
    pub language: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            language: "en-US".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Settings for the generic streaming-server source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket URL of the streaming server.
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:2177".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// CloudConfig
// ---------------------------------------------------------------------------

/// Settings for the cloud streaming source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// API key — the source refuses to start without one.
    pub api_key: Option<String>,
    /// Model identifier sent in the streaming query.
    pub model: String,
    /// Recognition language code (e.g. `"en"`).
    pub language: String,
    /// Base WebSocket URL of the streaming endpoint.
    pub url: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "nova-3".into(),
            language: "en".into(),
            url: "wss://api.deepgram.com/v1/listen".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_stream::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Selected backend source.
    pub source: SourceKind,
    /// On-device recognizer settings.
    pub device: DeviceConfig,
    /// Streaming-server settings.
    pub server: ServerConfig,
    /// Cloud streaming settings.
    pub cloud: CloudConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Verify that a default `AppConfig` can be serialised to TOML and
    /// deserialised back without any data loss.
    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.source, loaded.source);
        assert_eq!(original.device.language, loaded.device.language);
        assert_eq!(original.server.url, loaded.server.url);
        assert_eq!(original.cloud.api_key, loaded.cloud.api_key);
        assert_eq!(original.cloud.model, loaded.cloud.model);
        assert_eq!(original.cloud.language, loaded.cloud.language);
        assert_eq!(original.cloud.url, loaded.cloud.url);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        let default = AppConfig::default();

        assert_eq!(config.source, default.source);
        assert_eq!(config.server.url, default.server.url);
        assert_eq!(config.cloud.model, default.cloud.model);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.source, SourceKind::Device);
        assert_eq!(cfg.device.language, "en-US");
        assert_eq!(cfg.server.url, "ws://localhost:2177");
        assert!(cfg.cloud.api_key.is_none());
        assert_eq!(cfg.cloud.model, "nova-3");
        assert_eq!(cfg.cloud.language, "en");
        assert_eq!(cfg.cloud.url, "wss://api.deepgram.com/v1/listen");
    }

    /// Verify that modified non-default values survive a round trip.
    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.source = SourceKind::Cloud;
        cfg.device.language = "de-DE".into();
        cfg.server.url = "ws://stt.example.net:6006".into();
        cfg.cloud.api_key = Some("dg-test".into());
        cfg.cloud.model = "nova-2".into();
        cfg.cloud.language = "fr".into();

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.source, SourceKind::Cloud);
        assert_eq!(loaded.device.language, "de-DE");
        assert_eq!(loaded.server.url, "ws://stt.example.net:6006");
        assert_eq!(loaded.cloud.api_key, Some("dg-test".into()));
        assert_eq!(loaded.cloud.model, "nova-2");
        assert_eq!(loaded.cloud.language, "fr");
    }

    /// A partial file (older version, hand-edited) fills gaps from defaults.
    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "source = \"server\"\n").expect("write");

        let loaded = AppConfig::load_from(&path).expect("load");
        assert_eq!(loaded.source, SourceKind::Server);
        assert_eq!(loaded.server.url, ServerConfig::default().url);
        assert_eq!(loaded.cloud.model, CloudConfig::default().model);
    }

    #[test]
    fn source_kind_display() {
        assert_eq!(SourceKind::Device.to_string(), "device");
        assert_eq!(SourceKind::Server.to_string(), "server");
        assert_eq!(SourceKind::Cloud.to_string(), "cloud");
    }
}
