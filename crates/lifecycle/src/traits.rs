use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Result type for capability operations that may be unsupported.
pub type CapResult<T> = Result<T, CapError>;

#[derive(Debug, thiserror::Error)]
pub enum CapError {
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("dependency missing: {0}")]
    DependencyMissing(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Engine control – the external file-serving engine
// ---------------------------------------------------------------------------

/// Narrow control surface of the embedded engine.
///
/// Implementations wrap whatever binding the host has (an in-process
/// library, a child process). Calls may block; `shutdown` blocks up to
/// its timeout.
pub trait EngineControl: Send + Sync {
    fn set_data_dir(&self, dir: &Path) -> CapResult<()>;
    fn set_log_stdout(&self, enabled: bool) -> CapResult<()>;
    fn init(&self, log: Arc<dyn LogObserver>, events: Arc<dyn EventObserver>) -> CapResult<()>;
    fn start(&self) -> CapResult<()>;
    fn shutdown(&self, timeout: Duration) -> CapResult<()>;
    /// Authoritative running status. `probe` is passed through untouched.
    fn is_running(&self, probe: &str) -> CapResult<bool>;
    /// Address the engine is observed from when talking to the outside.
    fn outbound_address(&self) -> CapResult<String>;
    fn set_admin_password(&self, password: &str) -> CapResult<()>;
}

/// Receives every log line the engine emits. Invoked on engine threads.
pub trait LogObserver: Send + Sync {
    fn on_log(&self, level: i16, timestamp_ms: i64, message: &str);
}

/// Lifecycle notifications pushed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StartError { kind: String, message: String },
    Shutdown { reason: String },
    ProcessExit { code: i64 },
}

/// Receives engine lifecycle events. Invoked on engine threads.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: EngineEvent);
}

// ---------------------------------------------------------------------------
// Packaged resources
// ---------------------------------------------------------------------------

/// Read-only namespace of resources bundled with the application.
///
/// Paths are `/`-separated and relative to the namespace root; `""` is
/// the root itself.
pub trait AssetSource: Send + Sync {
    /// Child names directly under `path`. Files list as empty.
    fn list(&self, path: &str) -> CapResult<Vec<String>>;
    fn open(&self, path: &str) -> CapResult<Box<dyn Read + '_>>;
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

/// Small private key/value store that lives outside the data directory.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> CapResult<()>;
    fn remove(&self, key: &str) -> CapResult<()>;
}

// ---------------------------------------------------------------------------
// Operating system affordances
// ---------------------------------------------------------------------------

pub trait SystemOps: Send + Sync {
    /// The OS-wide HTTP proxy as `(host, port)`, if one is configured.
    fn system_proxy(&self) -> Option<(String, u16)>;

    /// IPv4 addresses of interfaces that are not loopback, in OS order.
    fn local_ipv4_addresses(&self) -> CapResult<Vec<std::net::Ipv4Addr>>;

    /// Best-effort jump to the OS screen controlling launch-at-login.
    fn open_autostart_settings(&self) -> CapResult<()>;
}

/// Shows and withdraws the notice that keeps the host process in the
/// foreground while the engine runs.
pub trait ForegroundNotifier: Send + Sync {
    fn show(&self, notice: &crate::host::ForegroundNotice) -> CapResult<()>;
    fn cancel(&self, id: u32) -> CapResult<()>;
}
