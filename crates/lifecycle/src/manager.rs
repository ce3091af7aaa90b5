//! Engine lifecycle state machine.
//!
//! `Uninitialized -> Initialized -> Running -> Stopped`, and back to
//! `Uninitialized` on shutdown. The running flag is the only state the
//! engine's callback threads touch; it is an atomic shared with
//! [`RunFlagObserver`]. Everything else is caller-side bookkeeping.

use crate::assets::{dist_dir, AssetBootstrapper, BootstrapOutcome};
use crate::config::{ConfigError, ConfigStore, ProxyConfig, ProxyMode};
use crate::context::HostContext;
use crate::credentials::{CredentialScanner, CredentialStore};
use crate::traits::{CapError, EngineEvent, EventObserver, LogObserver};
use rand::Rng;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const DEFAULT_HTTP_PORT: u16 = 5244;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(5000);
pub const KEY_HTTP_PORT: &str = "http_port";
pub const KEY_PROXY_MODE: &str = "proxy_mode";

const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;

// Visually ambiguous characters (0/O, 1/l/I) are left out.
const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";
const PASSWORD_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("engine is running; stop it before changing configuration")]
    AlreadyRunning,

    #[error("engine is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("preferences: {0}")]
    Preferences(#[source] CapError),

    #[error("engine call `{call}` failed: {source}")]
    EngineCall {
        call: &'static str,
        #[source]
        source: CapError,
    },
}

fn engine_err(call: &'static str) -> impl FnOnce(CapError) -> LifecycleError {
    move |source| LifecycleError::EngineCall { call, source }
}

// ---------------------------------------------------------------------------
// Event observer
// ---------------------------------------------------------------------------

/// Clears the running flag whenever the engine reports it went away.
pub struct RunFlagObserver {
    running: Arc<AtomicBool>,
}

impl EventObserver for RunFlagObserver {
    fn on_event(&self, event: EngineEvent) {
        match event {
            // The start() caller sees the failure synchronously.
            EngineEvent::StartError { kind, message } => {
                tracing::error!(%kind, %message, "engine start error")
            }
            EngineEvent::Shutdown { reason } => {
                tracing::info!(%reason, "engine shut down");
                self.running.store(false, Ordering::SeqCst);
            }
            EngineEvent::ProcessExit { code } => {
                tracing::info!(code, "engine process exited");
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct Lifecycle {
    state: EngineState,
    data_dir: Option<PathBuf>,
}

pub struct LifecycleManager {
    ctx: HostContext,
    assets: AssetBootstrapper,
    credentials: CredentialStore,
    log_observer: Arc<CredentialScanner>,
    event_observer: Arc<RunFlagObserver>,
    running: Arc<AtomicBool>,
    lifecycle: Mutex<Lifecycle>,
}

impl LifecycleManager {
    pub fn new(ctx: HostContext) -> Self {
        let running = Arc::new(AtomicBool::new(false));
        let credentials = CredentialStore::new(ctx.prefs());
        Self {
            assets: AssetBootstrapper::new(
                ctx.assets(),
                ctx.package_archive().map(Path::to_path_buf),
            ),
            log_observer: Arc::new(CredentialScanner::new(credentials.clone())),
            event_observer: Arc::new(RunFlagObserver {
                running: Arc::clone(&running),
            }),
            credentials,
            running,
            lifecycle: Mutex::new(Lifecycle {
                state: EngineState::Uninitialized,
                data_dir: None,
            }),
            ctx,
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn context(&self) -> &HostContext {
        &self.ctx
    }

    pub fn state(&self) -> EngineState {
        let state = self.lifecycle().state;
        match (state, self.running.load(Ordering::SeqCst)) {
            (EngineState::Running, false) => EngineState::Stopped,
            (state, _) => state,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle().state != EngineState::Uninitialized
    }

    /// Current data directory, defaulting it if nothing was chosen yet.
    pub fn data_dir(&self) -> PathBuf {
        self.resolve_data_dir(None)
    }

    fn resolve_data_dir(&self, requested: Option<&Path>) -> PathBuf {
        let mut lc = self.lifecycle();
        if let Some(dir) = requested.filter(|d| !d.as_os_str().is_empty()) {
            lc.data_dir = Some(dir.to_path_buf());
        }
        lc.data_dir
            .get_or_insert_with(|| self.ctx.default_data_dir())
            .clone()
    }

    /// Prepare the data directory and hand it to the engine.
    ///
    /// A non-empty `data_dir` replaces the current one. On failure the
    /// manager stays `Uninitialized` and may be retried.
    pub fn initialize(&self, data_dir: Option<&Path>) -> Result<PathBuf, LifecycleError> {
        if self.running.load(Ordering::SeqCst) {
            let dir = self.data_dir();
            tracing::debug!(data_dir = %dir.display(), "engine running, initialize skipped");
            return Ok(dir);
        }

        let dir = self.resolve_data_dir(data_dir);
        match self.initialize_at(&dir) {
            Ok(()) => {
                self.lifecycle().state = EngineState::Initialized;
                tracing::info!(data_dir = %dir.display(), "engine initialized");
                Ok(dir)
            }
            Err(e) => {
                self.lifecycle().state = EngineState::Uninitialized;
                tracing::error!(data_dir = %dir.display(), error = %e, "engine initialization failed");
                Err(e)
            }
        }
    }

    fn initialize_at(&self, dir: &Path) -> Result<(), LifecycleError> {
        std::fs::create_dir_all(dir).map_err(|e| {
            LifecycleError::Initialization(format!("cannot create {}: {}", dir.display(), e))
        })?;

        match self.assets.ensure(dir) {
            BootstrapOutcome::Missing { reason } => {
                tracing::warn!(%reason, "continuing without web assets")
            }
            outcome => tracing::debug!(?outcome, "web assets ready"),
        }

        ConfigStore::new(dir)
            .ensure_dist_dir(&dist_dir(dir))
            .map_err(|e| LifecycleError::Initialization(e.to_string()))?;

        let engine = self.ctx.engine();
        let init = || -> Result<(), CapError> {
            engine.set_data_dir(dir)?;
            engine.set_log_stdout(true)?;
            let log: Arc<dyn LogObserver> = self.log_observer.clone();
            let events: Arc<dyn EventObserver> = self.event_observer.clone();
            engine.init(log, events)
        };
        init().map_err(|e| LifecycleError::Initialization(format!("engine init: {}", e)))
    }

    /// Start the engine, initializing first if needed. Starting an engine
    /// that is already running is a successful no-op.
    pub fn start(&self) -> Result<(), LifecycleError> {
        if !self.is_initialized() {
            self.initialize(None)?;
        }

        // The engine's own answer wins, but a crashed probe must not hide
        // a start this manager already performed.
        let engine_running = self.ctx.engine().is_running("").unwrap_or_else(|e| {
            tracing::debug!(error = %e, "engine status probe failed");
            false
        });
        if engine_running || self.running.load(Ordering::SeqCst) {
            tracing::debug!("engine already running");
            self.running.store(true, Ordering::SeqCst);
            self.lifecycle().state = EngineState::Running;
            return Ok(());
        }

        // Raised before the call so an exit callback racing the start
        // still lands on a set flag and clears it.
        self.running.store(true, Ordering::SeqCst);
        if let Err(e) = self.ctx.engine().start() {
            self.running.store(false, Ordering::SeqCst);
            tracing::error!(error = %e, "engine start failed");
            return Err(engine_err("start")(e));
        }
        self.lifecycle().state = EngineState::Running;
        tracing::info!(port = self.http_port(), "engine started");
        Ok(())
    }

    /// Ask the engine to stop, waiting up to `timeout`. Whatever the engine
    /// does, the manager ends up not running and uninitialized.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), LifecycleError> {
        let result = self.ctx.engine().shutdown(timeout);
        self.running.store(false, Ordering::SeqCst);
        self.lifecycle().state = EngineState::Uninitialized;
        match result {
            Ok(()) => {
                tracing::info!("engine shut down");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, timeout_ms = timeout.as_millis() as u64, "engine shutdown did not complete cleanly");
                Err(engine_err("shutdown")(e))
            }
        }
    }

    /// Authoritative status from the engine, or the local flag when the
    /// engine cannot answer.
    pub fn is_running(&self) -> bool {
        match self.ctx.engine().is_running("") {
            Ok(running) => running,
            Err(e) => {
                tracing::debug!(error = %e, "engine status probe failed, using local flag");
                self.running.load(Ordering::SeqCst)
            }
        }
    }

    /// Persist port and proxy choices. Rejected while the engine runs.
    pub fn apply_config(&self, http_port: u16, proxy: &ProxyConfig) -> Result<(), LifecycleError> {
        if self.is_running() {
            return Err(LifecycleError::AlreadyRunning);
        }

        let dir = self.data_dir();
        std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Write {
            path: dir.clone(),
            source,
        })?;

        let address = proxy.resolve(|| self.ctx.system().system_proxy());
        ConfigStore::new(&dir).update(|doc| {
            doc.set_http_port(http_port);
            doc.set_proxy_address(&address);
        })?;

        let prefs = self.ctx.prefs();
        prefs
            .set(KEY_HTTP_PORT, &http_port.to_string())
            .and_then(|()| prefs.set(KEY_PROXY_MODE, proxy.mode.as_str()))
            .map_err(LifecycleError::Preferences)?;

        tracing::info!(http_port, proxy_mode = %proxy.mode, proxy_address = %address, "config applied");
        Ok(())
    }

    pub fn http_port(&self) -> u16 {
        self.ctx
            .prefs()
            .get(KEY_HTTP_PORT)
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_HTTP_PORT)
    }

    pub fn proxy_mode(&self) -> ProxyMode {
        self.ctx
            .prefs()
            .get(KEY_PROXY_MODE)
            .and_then(|m| m.parse().ok())
            .unwrap_or_default()
    }

    /// Address clients should use to reach the engine.
    ///
    /// Without a proxy this is the first non-loopback IPv4 address. Behind a
    /// proxy the engine's outbound-observed address is preferred.
    pub fn service_address(&self) -> String {
        if self.proxy_mode() == ProxyMode::None {
            return self.local_address().to_string();
        }
        match self.ctx.engine().outbound_address() {
            Ok(addr) if !addr.trim().is_empty() => addr.trim().to_string(),
            Ok(_) => self.local_address().to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "outbound address unavailable, using local address");
                self.local_address().to_string()
            }
        }
    }

    fn local_address(&self) -> Ipv4Addr {
        match self.ctx.system().local_ipv4_addresses() {
            Ok(addrs) => addrs.into_iter().next().unwrap_or(LOOPBACK),
            Err(e) => {
                tracing::debug!(error = %e, "interface enumeration failed");
                LOOPBACK
            }
        }
    }

    pub fn initial_admin_password(&self) -> Option<String> {
        self.credentials.read()
    }

    pub fn clear_initial_admin_password(&self) -> Result<(), LifecycleError> {
        self.credentials.clear().map_err(LifecycleError::Preferences)
    }

    /// Generate a fresh admin password and have the engine adopt it.
    pub fn reset_admin_password(&self) -> Result<String, LifecycleError> {
        if !self.is_initialized() {
            return Err(LifecycleError::NotInitialized);
        }
        let password = generate_password(PASSWORD_LENGTH);
        self.ctx
            .engine()
            .set_admin_password(&password)
            .map_err(engine_err("set_admin_password"))?;
        tracing::info!("admin password reset");
        Ok(password)
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            let _ = self.shutdown(DEFAULT_SHUTDOWN_TIMEOUT);
        }
    }
}

fn generate_password(length: usize) -> String {
    let mut rng = rand::rngs::OsRng;
    (0..length)
        .map(|_| PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
