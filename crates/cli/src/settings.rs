//! Host settings: `listctl.yaml`, an optional explicit file, then
//! `LISTCTL__`-prefixed environment variables.

use config::{Config, ConfigError, Environment, File};
use lifecycle::manager::DEFAULT_SHUTDOWN_TIMEOUT;
use lifecycle::process_engine::{DEFAULT_BINARY, DEFAULT_OUTBOUND_PROBE_URL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_FILE_NAME: &str = "listctl.yaml";
pub const ENV_PREFIX: &str = "LISTCTL";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    /// Private host directory holding preferences and the engine data root.
    pub app_dir: Option<PathBuf>,
    pub engine: EngineSettings,
    pub assets: AssetSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EngineSettings {
    pub binary: PathBuf,
    pub extra_args: Vec<String>,
    pub shutdown_timeout_ms: u64,
    pub outbound_probe_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            extra_args: Vec::new(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
            outbound_probe_url: DEFAULT_OUTBOUND_PROBE_URL.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AssetSettings {
    /// Directory standing in for the application's bundled resources.
    pub resource_root: Option<PathBuf>,
    /// Application package archive used when no resource layout matches.
    pub package_archive: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub show_time: bool,
    pub json: bool,
    pub redaction: RedactionConfig,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_time: true,
            json: false,
            redaction: RedactionConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RedactionConfig {
    pub enabled: bool,
    /// Mask the initial admin password wherever it shows up in a log line.
    pub use_default_patterns: bool,
    pub patterns: Vec<RedactionPattern>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_default_patterns: true,
            patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedactionPattern {
    pub name: String,
    pub regex: String,
    pub placeholder: String,
}

impl Settings {
    /// Resolved host directory: the configured one, else the user's data
    /// directory, else `./.listctl`.
    pub fn app_dir(&self) -> PathBuf {
        self.app_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("listctl")))
            .unwrap_or_else(|| PathBuf::from(".listctl"))
    }
}

/// Load settings. `explicit` must exist when given; the working-directory
/// file is optional.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name(SETTINGS_FILE_NAME).required(false));
    if let Some(path) = explicit {
        builder = builder.add_source(File::from(path).required(true));
    }
    builder
        // LISTCTL__ENGINE__BINARY=/opt/openlist/openlist
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(" ")
                .with_list_parse_key("engine.extra_args")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    struct EnvGuard(&'static str);
    impl EnvGuard {
        fn new(key: &'static str, val: &str) -> Self {
            env::set_var(key, val);
            Self(key)
        }
    }
    impl Drop for EnvGuard {
        fn drop(&mut self) {
            env::remove_var(self.0);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_sources() {
        let settings = load_settings(None).expect("defaults should load");
        assert_eq!(settings.engine.binary, PathBuf::from("openlist"));
        assert_eq!(settings.engine.shutdown_timeout(), Duration::from_millis(5000));
        assert_eq!(settings.logging.level, "info");
        assert!(settings.logging.redaction.enabled);
        assert!(settings.assets.resource_root.is_none());
    }

    #[test]
    #[serial]
    fn test_explicit_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("custom.yaml");
        std::fs::write(
            &path,
            r#"
app_dir: /srv/listctl
engine:
  binary: /opt/openlist/openlist
  shutdown_timeout_ms: 1500
logging:
  level: debug
  redaction:
    patterns:
      - name: token
        regex: "token=\\w+"
        placeholder: "token=***"
"#,
        )
        .unwrap();

        let settings = load_settings(Some(&path)).expect("should load");
        assert_eq!(settings.app_dir(), PathBuf::from("/srv/listctl"));
        assert_eq!(settings.engine.binary, PathBuf::from("/opt/openlist/openlist"));
        assert_eq!(settings.engine.shutdown_timeout_ms, 1500);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.redaction.patterns.len(), 1);
        // Untouched sections keep their defaults.
        assert_eq!(settings.engine.outbound_probe_url, DEFAULT_OUTBOUND_PROBE_URL);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_settings(Some(&tmp.path().join("absent.yaml"))).is_err());
    }

    #[test]
    #[serial]
    fn test_env_var_override() {
        let _binary = EnvGuard::new("LISTCTL__ENGINE__BINARY", "/usr/local/bin/openlist");
        let _timeout = EnvGuard::new("LISTCTL__ENGINE__SHUTDOWN_TIMEOUT_MS", "250");
        let _json = EnvGuard::new("LISTCTL__LOGGING__JSON", "true");

        let settings = load_settings(None).expect("should load");
        assert_eq!(settings.engine.binary, PathBuf::from("/usr/local/bin/openlist"));
        assert_eq!(settings.engine.shutdown_timeout_ms, 250);
        assert!(settings.logging.json);
    }

    #[test]
    #[serial]
    fn test_env_var_list() {
        let _args = EnvGuard::new("LISTCTL__ENGINE__EXTRA_ARGS", "--debug --no-prefix");
        let settings = load_settings(None).expect("should load");
        assert_eq!(settings.engine.extra_args, vec!["--debug", "--no-prefix"]);
    }
}
