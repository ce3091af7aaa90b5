//! Engine configuration document (`config.json` in the data directory).
//!
//! The engine owns the schema; this module only touches the handful of
//! keys the host manages and passes everything else through untouched.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A parsed `config.json`. Unrecognized keys are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    root: Map<String, Value>,
}

impl ConfigDocument {
    /// Parse a document; anything that is not a JSON object is treated as
    /// an empty document.
    pub fn parse(text: &str) -> Self {
        Self::try_parse(text).unwrap_or_default()
    }

    /// `None` unless `text` is a JSON object.
    pub fn try_parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(root)) => Some(Self { root }),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn http_port(&self) -> Option<u16> {
        self.root
            .get("scheme")
            .and_then(|s| s.get("http_port"))
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
    }

    /// Set `scheme.http_port`, keeping any sibling keys under `scheme`.
    pub fn set_http_port(&mut self, port: u16) {
        let scheme = self
            .root
            .entry("scheme")
            .or_insert_with(|| Value::Object(Map::new()));
        if !scheme.is_object() {
            *scheme = Value::Object(Map::new());
        }
        if let Value::Object(scheme) = scheme {
            scheme.insert("http_port".into(), Value::from(port));
        }
    }

    pub fn proxy_address(&self) -> Option<&str> {
        self.root.get("proxy_address").and_then(Value::as_str)
    }

    pub fn set_proxy_address(&mut self, address: &str) {
        self.root
            .insert("proxy_address".into(), Value::String(address.to_string()));
    }

    pub fn dist_dir(&self) -> Option<&str> {
        self.root.get("dist_dir").and_then(Value::as_str)
    }

    pub fn set_dist_dir(&mut self, path: &str) {
        self.root
            .insert("dist_dir".into(), Value::String(path.to_string()));
    }

    pub fn to_pretty_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(&self.root)?)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Read-modify-write access to `<data_dir>/config.json`.
///
/// Not safe for concurrent writers; the lifecycle manager only mutates
/// config while the engine is stopped.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CONFIG_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing, unreadable or malformed files all load as empty.
    pub fn load(&self) -> ConfigDocument {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                let doc = ConfigDocument::parse(&text);
                if doc.is_empty() && !text.trim().is_empty() {
                    tracing::warn!(path = %self.path.display(), "config is not a JSON object, starting from empty");
                }
                doc
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigDocument::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "config unreadable, starting from empty");
                ConfigDocument::default()
            }
        }
    }

    pub fn save(&self, doc: &ConfigDocument) -> Result<(), ConfigError> {
        let text = doc.to_pretty_string()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, text).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Load, mutate in memory, write back the whole file.
    pub fn update<F>(&self, mutate: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut ConfigDocument),
    {
        let mut doc = self.load();
        mutate(&mut doc);
        self.save(&doc)
    }

    pub fn apply_http_port(&self, port: u16) -> Result<(), ConfigError> {
        self.update(|doc| doc.set_http_port(port))
    }

    pub fn apply_proxy_address(&self, address: &str) -> Result<(), ConfigError> {
        self.update(|doc| doc.set_proxy_address(address))
    }

    /// Point `dist_dir` at the bootstrap target unless an operator already
    /// set it. Returns `true` when the file was written. A file that exists
    /// but cannot be read or parsed is left alone.
    pub fn ensure_dist_dir(&self, dist_path: &Path) -> Result<bool, ConfigError> {
        let mut doc = match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => ConfigDocument::default(),
            Ok(text) => match ConfigDocument::try_parse(&text) {
                Some(doc) => doc,
                None => {
                    tracing::warn!(path = %self.path.display(), "config is not a JSON object, leaving dist_dir unset");
                    return Ok(false);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigDocument::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "config unreadable, leaving dist_dir unset");
                return Ok(false);
            }
        };
        let blank = doc.dist_dir().map_or(true, |d| d.trim().is_empty());
        if !blank {
            return Ok(false);
        }
        let dist = absolute(dist_path);
        doc.set_dist_dir(&dist.display().to_string());
        self.save(&doc)?;
        tracing::info!(dist_dir = %dist.display(), "config dist_dir set");
        Ok(true)
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyMode {
    #[default]
    None,
    System,
    Custom,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::None => "none",
            ProxyMode::System => "system",
            ProxyMode::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ProxyMode::None),
            "system" => Ok(ProxyMode::System),
            "custom" => Ok(ProxyMode::Custom),
            other => Err(format!(
                "unknown proxy mode: {} (expected none, system or custom)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub mode: ProxyMode,
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    /// The `proxy_address` value for this choice. Empty disables the proxy.
    pub fn resolve(&self, system_proxy: impl FnOnce() -> Option<(String, u16)>) -> String {
        match self.mode {
            ProxyMode::None => String::new(),
            ProxyMode::Custom => format!("http://{}:{}", self.host, self.port),
            ProxyMode::System => match system_proxy() {
                Some((host, port)) if !host.is_empty() && port > 0 => {
                    format!("http://{}:{}", host, port)
                }
                _ => String::new(),
            },
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_http_port_round_trip_keeps_unknown_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path());
        std::fs::write(
            store.path(),
            r#"{"foo":"bar","scheme":{"https_port":-1},"nested":{"a":[1,2]}}"#,
        )
        .unwrap();

        store.apply_http_port(8080).unwrap();

        let doc = store.load();
        assert_eq!(doc.get("foo").unwrap(), "bar");
        assert_eq!(doc.http_port(), Some(8080));
        let raw = read_json(store.path());
        assert_eq!(raw["scheme"]["https_port"], -1);
        assert_eq!(raw["nested"]["a"][1], 2);
    }

    #[test]
    fn test_load_missing_and_malformed_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path());
        assert!(store.load().is_empty());

        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_empty());

        std::fs::write(store.path(), "[1, 2]").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_scheme_of_wrong_type_is_replaced() {
        let mut doc = ConfigDocument::parse(r#"{"scheme": "oops"}"#);
        doc.set_http_port(5244);
        assert_eq!(doc.http_port(), Some(5244));
    }

    #[test]
    fn test_ensure_dist_dir_sets_blank_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path());
        let dist = tmp.path().join("public/dist");

        assert!(store.ensure_dist_dir(&dist).unwrap());
        assert_eq!(store.load().dist_dir(), Some(dist.to_str().unwrap()));

        std::fs::write(store.path(), r#"{"dist_dir": "   "}"#).unwrap();
        assert!(store.ensure_dist_dir(&dist).unwrap());

        std::fs::write(store.path(), r#"{"dist_dir": "/srv/custom"}"#).unwrap();
        assert!(!store.ensure_dist_dir(&dist).unwrap());
        assert_eq!(store.load().dist_dir(), Some("/srv/custom"));
    }

    #[test]
    fn test_ensure_dist_dir_leaves_malformed_file_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path());
        let broken = r#"{"jwt_secret":"s3cr3t","database":{"type":"sqlite3"},}"#;
        std::fs::write(store.path(), broken).unwrap();

        assert!(!store.ensure_dist_dir(&tmp.path().join("public/dist")).unwrap());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), broken);
    }

    #[test]
    fn test_unknown_numbers_are_written_back_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path());
        std::fs::write(
            store.path(),
            r#"{"max_size": 18446744073709551616, "ratio": 1.10}"#,
        )
        .unwrap();

        store.apply_http_port(5244).unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\"max_size\": 18446744073709551616"));
        assert!(text.contains("\"ratio\": 1.10"));
    }

    #[test]
    fn test_save_is_pretty_printed_in_key_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path());
        std::fs::write(store.path(), r#"{"zeta":1,"alpha":2}"#).unwrap();
        store.apply_proxy_address("").unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("{\n  \"zeta\": 1,\n  \"alpha\": 2"));
        assert!(text.contains("\"proxy_address\": \"\""));
    }

    #[test]
    fn test_save_failure_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let store = ConfigStore::new(&blocker.join("data"));
        assert!(store.apply_http_port(1).is_err());
    }

    #[test]
    fn test_proxy_resolution() {
        let custom = ProxyConfig {
            mode: ProxyMode::Custom,
            host: "10.0.0.5".into(),
            port: 8888,
        };
        assert_eq!(custom.resolve(|| None), "http://10.0.0.5:8888");

        let none = ProxyConfig {
            mode: ProxyMode::None,
            ..custom.clone()
        };
        assert_eq!(none.resolve(|| Some(("h".into(), 1))), "");

        let system = ProxyConfig {
            mode: ProxyMode::System,
            ..custom
        };
        assert_eq!(
            system.resolve(|| Some(("proxy.lan".into(), 3128))),
            "http://proxy.lan:3128"
        );
        assert_eq!(system.resolve(|| Some((String::new(), 3128))), "");
        assert_eq!(system.resolve(|| None), "");
    }

    #[test]
    fn test_proxy_mode_parse() {
        assert_eq!("system".parse::<ProxyMode>(), Ok(ProxyMode::System));
        assert!("socks".parse::<ProxyMode>().is_err());
        assert_eq!(ProxyMode::Custom.to_string(), "custom");
    }
}
