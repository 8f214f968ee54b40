//! Persistent application configuration model and defaults.

use std::path::{Path, PathBuf};

use log::{info, warn};

const APP_DIR_NAME: &str = "tunedeck";

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Where the track store and downloaded media live.
    pub storage: StorageConfig,
    #[serde(default)]
    /// Event bus and render pacing.
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage locations. Empty paths resolve to the platform data directory.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub database_path: PathBuf,
    #[serde(default)]
    pub downloads_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// Upper bound for render publications driven by position ticks.
    #[serde(default = "default_render_updates_per_second")]
    pub render_updates_per_second: u32,
    /// How often the engine reports playback position.
    #[serde(default = "default_position_poll_interval_ms")]
    pub position_poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    #[default]
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
            render_updates_per_second: default_render_updates_per_second(),
            position_poll_interval_ms: default_position_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Debug,
        }
    }
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_render_updates_per_second() -> u32 {
    10
}

fn default_position_poll_interval_ms() -> u64 {
    200
}

/// Directory holding `config.toml`.
pub fn config_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

impl StorageConfig {
    pub fn resolved_database_path(&self) -> PathBuf {
        if self.database_path.as_os_str().is_empty() {
            data_root().join("tunedeck.db")
        } else {
            self.database_path.clone()
        }
    }

    pub fn resolved_downloads_dir(&self) -> PathBuf {
        if self.downloads_dir.as_os_str().is_empty() {
            data_root().join("downloads")
        } else {
            self.downloads_dir.clone()
        }
    }

    /// Directory for thumbnails; kept next to the downloaded media.
    pub fn resolved_thumbnails_dir(&self) -> PathBuf {
        self.resolved_downloads_dir().join("thumbnails")
    }
}

/// Clamps values that would stall the bus or the render loop.
pub fn sanitize_config(config: Config) -> Config {
    Config {
        storage: config.storage,
        runtime: RuntimeConfig {
            bus_capacity: config.runtime.bus_capacity.clamp(64, 65_536),
            render_updates_per_second: config.runtime.render_updates_per_second.clamp(1, 60),
            position_poll_interval_ms: config.runtime.position_poll_interval_ms.clamp(20, 2_000),
        },
        logging: config.logging,
    }
}

/// Reads `config_file`, writing a default one first when it does not exist.
/// Unreadable or malformed files fall back to defaults.
pub fn load_or_create_config(config_file: &Path) -> Config {
    if !config_file.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        if let Some(parent) = config_file.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!("Failed to create config directory {}: {}", parent.display(), err);
            }
        }
        match toml::to_string(&Config::default()) {
            Ok(serialized) => {
                if let Err(err) = std::fs::write(config_file, serialized) {
                    warn!("Failed to write default config {}: {}", config_file.display(), err);
                }
            }
            Err(err) => warn!("Failed to serialize default config: {}", err),
        }
    }

    let content = match std::fs::read_to_string(config_file) {
        Ok(content) => content,
        Err(err) => {
            warn!("Failed to read config {}: {}", config_file.display(), err);
            return Config::default();
        }
    };
    let parsed = toml::from_str::<Config>(&content).unwrap_or_else(|err| {
        warn!("Invalid config {}: {}", config_file.display(), err);
        Config::default()
    });
    sanitize_config(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();
        assert!(config.storage.database_path.as_os_str().is_empty());
        assert!(config.storage.downloads_dir.as_os_str().is_empty());
        assert_eq!(config.runtime.bus_capacity, 1024);
        assert_eq!(config.runtime.render_updates_per_second, 10);
        assert_eq!(config.runtime.position_poll_interval_ms, 200);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_partial_config_fills_missing_sections_with_defaults() {
        let partial = r#"
[logging]
level = "warn"

[runtime]
bus_capacity = 256
"#;
        let parsed: Config = toml::from_str(partial).expect("config should parse");
        assert_eq!(parsed.logging.level, LogLevel::Warn);
        assert_eq!(parsed.runtime.bus_capacity, 256);
        assert_eq!(parsed.runtime.render_updates_per_second, 10);
        assert_eq!(parsed.storage, StorageConfig::default());
    }

    #[test]
    fn test_sanitize_config_clamps_runtime_values() {
        let mut config = Config::default();
        config.runtime.bus_capacity = 1;
        config.runtime.render_updates_per_second = 0;
        config.runtime.position_poll_interval_ms = 60_000;
        let sanitized = sanitize_config(config);
        assert_eq!(sanitized.runtime.bus_capacity, 64);
        assert_eq!(sanitized.runtime.render_updates_per_second, 1);
        assert_eq!(sanitized.runtime.position_poll_interval_ms, 2_000);
    }

    #[test]
    fn test_explicit_storage_paths_win_over_platform_defaults() {
        let storage = StorageConfig {
            database_path: PathBuf::from("/srv/music/store.db"),
            downloads_dir: PathBuf::from("/srv/music/media"),
        };
        assert_eq!(
            storage.resolved_database_path(),
            PathBuf::from("/srv/music/store.db")
        );
        assert_eq!(
            storage.resolved_thumbnails_dir(),
            PathBuf::from("/srv/music/media/thumbnails")
        );
        assert!(StorageConfig::default()
            .resolved_database_path()
            .ends_with("tunedeck/tunedeck.db"));
    }

    #[test]
    fn test_load_or_create_config_writes_defaults_and_survives_garbage() {
        let dir = std::env::temp_dir().join(format!("tunedeck_config_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let config_file = dir.join("config.toml");

        let created = load_or_create_config(&config_file);
        assert!(config_file.exists());
        assert_eq!(created, Config::default());

        std::fs::write(&config_file, "this is = = not toml").expect("write");
        assert_eq!(load_or_create_config(&config_file), Config::default());
        let _ = std::fs::remove_dir_all(dir);
    }
}
