//! Platform-specific implementations of capability traits.
//!
//! - [`DirAssetSource`]: packaged resources backed by a directory
//! - [`NoAssets`]: empty resource namespace
//! - [`JsonPreferences`]: preferences persisted as a small JSON file
//! - [`MemoryPreferences`]: in-process preferences
//! - [`StdSystem`]: proxy env vars, interface enumeration, settings launcher
//! - [`HeadlessSystem`]: same, but never launches anything

use crate::traits::*;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Read;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ===========================================================================
// Assets – wraps std::fs
// ===========================================================================

/// Resource namespace rooted at a directory on disk, e.g. the `assets/`
/// folder shipped next to the host binary.
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut out = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
            out.push(part);
        }
        out
    }
}

impl AssetSource for DirAssetSource {
    fn list(&self, path: &str) -> CapResult<Vec<String>> {
        let dir = self.resolve(path);
        if dir.is_file() {
            return Ok(vec![]);
        }
        let entries = std::fs::read_dir(&dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CapError::NotFound(dir.display().to_string()),
            _ => CapError::Io(e),
        })?;
        let mut names = Vec::new();
        for entry in entries {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn open(&self, path: &str) -> CapResult<Box<dyn Read + '_>> {
        let file = self.resolve(path);
        if !file.is_file() {
            return Err(CapError::NotFound(file.display().to_string()));
        }
        Ok(Box::new(std::fs::File::open(file)?))
    }
}

/// A build without packaged resources.
pub struct NoAssets;

impl AssetSource for NoAssets {
    fn list(&self, path: &str) -> CapResult<Vec<String>> {
        Err(CapError::NotFound(path.to_string()))
    }

    fn open(&self, path: &str) -> CapResult<Box<dyn Read + '_>> {
        Err(CapError::NotFound(path.to_string()))
    }
}

// ===========================================================================
// Preferences
// ===========================================================================

/// Preferences stored as a flat JSON object of strings. Every write
/// rewrites the file.
pub struct JsonPreferences {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl JsonPreferences {
    /// Open (or lazily create) the file at `path`. A missing or corrupt
    /// file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<Map<String, Value>>(&text).ok())
            .map(|map| {
                map.into_iter()
                    .filter_map(|(k, v)| match v {
                        Value::String(s) => Some((k, s)),
                        Value::Number(n) => Some((k, n.to_string())),
                        Value::Bool(b) => Some((k, b.to_string())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &HashMap<String, String>) -> CapResult<()> {
        let mut sorted: Vec<_> = values.iter().collect();
        sorted.sort();
        let map: Map<String, Value> = sorted
            .into_iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let text = serde_json::to_string_pretty(&map)
            .map_err(|e| CapError::Other(format!("serialize preferences: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

impl PreferenceStore for JsonPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> CapResult<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| CapError::Other("preferences lock poisoned".into()))?;
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> CapResult<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| CapError::Other("preferences lock poisoned".into()))?;
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> CapResult<()> {
        self.values
            .lock()
            .map_err(|_| CapError::Other("preferences lock poisoned".into()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> CapResult<()> {
        self.values
            .lock()
            .map_err(|_| CapError::Other("preferences lock poisoned".into()))?
            .remove(key);
        Ok(())
    }
}

// ===========================================================================
// System – env proxy, interfaces, settings launcher
// ===========================================================================

pub struct StdSystem;

impl SystemOps for StdSystem {
    fn system_proxy(&self) -> Option<(String, u16)> {
        env_proxy()
    }

    fn local_ipv4_addresses(&self) -> CapResult<Vec<Ipv4Addr>> {
        interface_ipv4_addresses()
    }

    fn open_autostart_settings(&self) -> CapResult<()> {
        if crate::types::detect_headless() {
            return Err(CapError::Unsupported(
                "no desktop session to open settings in".into(),
            ));
        }
        #[cfg(target_os = "macos")]
        {
            run_launcher(
                "open",
                &["x-apple.systempreferences:com.apple.LoginItems-Settings.extension"],
            )
        }
        #[cfg(target_os = "linux")]
        {
            linux_open_autostart()
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            Err(CapError::Unsupported(
                "auto-start settings not implemented for this OS".into(),
            ))
        }
    }
}

/// [`StdSystem`] for environments without a desktop session.
pub struct HeadlessSystem;

impl SystemOps for HeadlessSystem {
    fn system_proxy(&self) -> Option<(String, u16)> {
        env_proxy()
    }

    fn local_ipv4_addresses(&self) -> CapResult<Vec<Ipv4Addr>> {
        interface_ipv4_addresses()
    }

    fn open_autostart_settings(&self) -> CapResult<()> {
        Err(CapError::Unsupported(
            "auto-start settings unavailable in headless environment".into(),
        ))
    }
}

fn interface_ipv4_addresses() -> CapResult<Vec<Ipv4Addr>> {
    let interfaces = if_addrs::get_if_addrs()?;
    Ok(interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .collect())
}

fn env_proxy() -> Option<(String, u16)> {
    ["HTTP_PROXY", "http_proxy"]
        .into_iter()
        .filter_map(|k| std::env::var(k).ok())
        .find_map(|v| parse_proxy(&v))
}

/// Parse `[scheme://][user@]host:port[/]` into `(host, port)`.
pub fn parse_proxy(value: &str) -> Option<(String, u16)> {
    let value = value.trim();
    let rest = value.split_once("://").map_or(value, |(_, r)| r);
    let rest = rest.split('/').next().unwrap_or(rest);
    let rest = rest.rsplit_once('@').map_or(rest, |(_, r)| r);
    let (host, port) = rest.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if host.is_empty() || port == 0 {
        return None;
    }
    Some((host.to_string(), port))
}

#[cfg(target_os = "linux")]
fn linux_open_autostart() -> CapResult<()> {
    // Try the GNOME tweak tool first, then the raw autostart directory.
    if run_launcher("gnome-session-properties", &[]).is_ok() {
        return Ok(());
    }
    let dir = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .map_err(|_| CapError::NotFound("no config home".into()))?
        .join("autostart");
    std::fs::create_dir_all(&dir)?;
    let dir = dir.display().to_string();
    run_launcher("xdg-open", &[dir.as_str()])
}

#[cfg(any(target_os = "macos", target_os = "linux"))]
fn run_launcher(cmd: &str, args: &[&str]) -> CapResult<()> {
    std::process::Command::new(cmd)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CapError::DependencyMissing(format!("{} not found", cmd))
            } else {
                CapError::Io(e)
            }
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_assets_list_and_open() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("openlist/dist/js")).unwrap();
        std::fs::write(tmp.path().join("openlist/dist/index.html"), "hi").unwrap();

        let src = DirAssetSource::new(tmp.path());
        assert_eq!(src.list("openlist/dist").unwrap(), vec!["index.html", "js"]);
        assert!(src.list("openlist/dist/index.html").unwrap().is_empty());
        assert!(matches!(src.list("missing"), Err(CapError::NotFound(_))));

        let mut body = String::new();
        src.open("openlist/dist/index.html")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "hi");
        assert!(src.open("openlist/dist").is_err());
    }

    #[test]
    fn test_json_preferences_persist() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prefs.json");
        {
            let prefs = JsonPreferences::open(&path);
            prefs.set("http_port", "9000").unwrap();
            prefs.set("proxy_mode", "custom").unwrap();
            prefs.remove("proxy_mode").unwrap();
        }
        let reopened = JsonPreferences::open(&path);
        assert_eq!(reopened.get("http_port").as_deref(), Some("9000"));
        assert_eq!(reopened.get("proxy_mode"), None);
    }

    #[test]
    fn test_json_preferences_corrupt_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prefs.json");
        std::fs::write(&path, "garbage").unwrap();
        let prefs = JsonPreferences::open(&path);
        assert_eq!(prefs.get("anything"), None);
        prefs.set("k", "v").unwrap();
        assert_eq!(JsonPreferences::open(&path).get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_parse_proxy() {
        assert_eq!(
            parse_proxy("http://proxy.lan:3128/"),
            Some(("proxy.lan".into(), 3128))
        );
        assert_eq!(
            parse_proxy("user:pw@10.1.1.1:8080"),
            Some(("10.1.1.1".into(), 8080))
        );
        assert_eq!(parse_proxy("proxy.lan"), None);
        assert_eq!(parse_proxy("http://:8080"), None);
        assert_eq!(parse_proxy("http://h:0"), None);
    }

    #[test]
    fn test_headless_system_refuses_settings() {
        assert!(matches!(
            HeadlessSystem.open_autostart_settings(),
            Err(CapError::Unsupported(_))
        ));
    }
}
