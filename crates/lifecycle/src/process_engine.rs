//! [`EngineControl`] over the external `openlist` binary.
//!
//! The engine runs as a child process: `openlist server --data <dir>`.
//! Its stdout and stderr lines feed the log observer, and a monitor thread
//! reports the exit of a process nobody asked to stop.

use crate::config::ConfigStore;
use crate::traits::*;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const DEFAULT_BINARY: &str = "openlist";
pub const DEFAULT_OUTBOUND_PROBE_URL: &str = "https://api.ipify.org";

const LEVEL_INFO: i16 = 4;
const LEVEL_WARN: i16 = 5;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MONITOR_INTERVAL: Duration = Duration::from_millis(200);
const STARTUP_GRACE: Duration = Duration::from_millis(300);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ProcessEngineOptions {
    pub binary: PathBuf,
    pub extra_args: Vec<String>,
    pub outbound_probe_url: String,
}

impl Default for ProcessEngineOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            extra_args: Vec::new(),
            outbound_probe_url: DEFAULT_OUTBOUND_PROBE_URL.to_string(),
        }
    }
}

type ChildSlot = Arc<Mutex<Option<Child>>>;

#[derive(Default)]
struct Setup {
    data_dir: Option<PathBuf>,
    log_stdout: bool,
    observers: Option<(Arc<dyn LogObserver>, Arc<dyn EventObserver>)>,
}

pub struct ProcessEngine {
    options: ProcessEngineOptions,
    setup: Mutex<Setup>,
    child: ChildSlot,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_error(binary: &Path) -> impl FnOnce(std::io::Error) -> CapError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CapError::DependencyMissing(format!("{} not found", binary.display()))
        } else {
            CapError::Io(e)
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

impl ProcessEngine {
    pub fn new(options: ProcessEngineOptions) -> Self {
        Self {
            options,
            setup: Mutex::new(Setup::default()),
            child: Arc::new(Mutex::new(None)),
        }
    }

    pub fn options(&self) -> &ProcessEngineOptions {
        &self.options
    }

    fn data_dir(&self) -> CapResult<PathBuf> {
        lock(&self.setup)
            .data_dir
            .clone()
            .ok_or_else(|| CapError::Other("engine data directory not set".into()))
    }

    fn server_command(&self, data_dir: &Path, log_stdout: bool) -> Command {
        let mut cmd = Command::new(&self.options.binary);
        cmd.arg("server").arg("--data").arg(data_dir);
        if log_stdout {
            cmd.arg("--log-std");
        }
        cmd.args(&self.options.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Forward each line of `stream` to `log` on a background thread. Lines
/// are decoded lossily; the pipe stays open until EOF so the engine never
/// writes into a closed pipe.
fn forward_lines<R: Read + Send + 'static>(stream: R, level: i16, log: Arc<dyn LogObserver>) {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    log.on_log(level, now_ms(), line.trim_end_matches(&['\n', '\r'][..]));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!(error = %e, "engine output stream closed");
                    break;
                }
            }
        }
    });
}

/// Watch the child until it exits on its own. If the slot is emptied first,
/// a shutdown took the child over and reports instead.
fn monitor(slot: ChildSlot, events: Arc<dyn EventObserver>) {
    std::thread::spawn(move || loop {
        {
            let mut guard = lock(&slot);
            let Some(child) = guard.as_mut() else { return };
            match child.try_wait() {
                Ok(Some(status)) => {
                    guard.take();
                    drop(guard);
                    let code = status.code().map(i64::from).unwrap_or(-1);
                    events.on_event(EngineEvent::ProcessExit { code });
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "lost track of engine process");
                    return;
                }
            }
        }
        std::thread::sleep(MONITOR_INTERVAL);
    });
}

/// Poll `child` until it exits or `timeout` passes.
fn wait_for_exit(child: &mut Child, timeout: Duration) -> CapResult<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait()?.is_some() {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> CapResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id())
        .map_err(|_| CapError::Other(format!("pid {} out of range", child.id())))?;
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(CapError::Io(std::io::Error::from(errno))),
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> CapResult<()> {
    child.kill().map_err(CapError::Io)
}

impl EngineControl for ProcessEngine {
    fn set_data_dir(&self, dir: &Path) -> CapResult<()> {
        lock(&self.setup).data_dir = Some(dir.to_path_buf());
        Ok(())
    }

    fn set_log_stdout(&self, enabled: bool) -> CapResult<()> {
        lock(&self.setup).log_stdout = enabled;
        Ok(())
    }

    fn init(&self, log: Arc<dyn LogObserver>, events: Arc<dyn EventObserver>) -> CapResult<()> {
        let mut setup = lock(&self.setup);
        if setup.data_dir.is_none() {
            return Err(CapError::Other("engine data directory not set".into()));
        }
        setup.observers = Some((log, events));
        tracing::debug!(binary = %self.options.binary.display(), "process engine initialized");
        Ok(())
    }

    fn start(&self) -> CapResult<()> {
        if self.is_running("")? {
            return Ok(());
        }
        let (data_dir, log_stdout, log, events) = {
            let setup = lock(&self.setup);
            let (log, events) = setup
                .observers
                .clone()
                .ok_or_else(|| CapError::Other("engine not initialized".into()))?;
            let dir = setup
                .data_dir
                .clone()
                .ok_or_else(|| CapError::Other("engine data directory not set".into()))?;
            (dir, setup.log_stdout, log, events)
        };

        let mut child = self
            .server_command(&data_dir, log_stdout)
            .spawn()
            .map_err(spawn_error(&self.options.binary))?;
        if let Some(out) = child.stdout.take() {
            forward_lines(out, LEVEL_INFO, log.clone());
        }
        if let Some(err) = child.stderr.take() {
            forward_lines(err, LEVEL_WARN, log);
        }

        // A server that cannot bind dies almost immediately.
        if wait_for_exit(&mut child, STARTUP_GRACE)? {
            let code = child.try_wait()?.and_then(|s| s.code()).unwrap_or(-1);
            let message = format!("engine exited during startup with code {}", code);
            events.on_event(EngineEvent::StartError {
                kind: "process".into(),
                message: message.clone(),
            });
            return Err(CapError::Other(message));
        }

        tracing::info!(pid = child.id(), data_dir = %data_dir.display(), "engine process started");
        *lock(&self.child) = Some(child);
        monitor(Arc::clone(&self.child), events);
        Ok(())
    }

    fn shutdown(&self, timeout: Duration) -> CapResult<()> {
        let Some(mut child) = lock(&self.child).take() else {
            return Ok(());
        };
        let events = lock(&self.setup).observers.as_ref().map(|(_, e)| Arc::clone(e));
        let notify = |reason: &str| {
            if let Some(events) = &events {
                events.on_event(EngineEvent::Shutdown {
                    reason: reason.to_string(),
                });
            }
        };

        if let Err(e) = request_termination(&mut child) {
            tracing::warn!(pid = child.id(), error = %e, "could not request engine termination");
        }
        if wait_for_exit(&mut child, timeout)? {
            notify("terminated");
            return Ok(());
        }

        tracing::warn!(pid = child.id(), "engine ignored termination request, killing");
        child.kill()?;
        child.wait()?;
        notify("killed after timeout");
        Err(CapError::Timeout)
    }

    fn is_running(&self, _probe: &str) -> CapResult<bool> {
        let mut guard = lock(&self.child);
        match guard.as_mut() {
            Some(child) => Ok(child.try_wait()?.is_none()),
            None => Ok(false),
        }
    }

    fn outbound_address(&self) -> CapResult<String> {
        let data_dir = self.data_dir()?;
        let proxy = ConfigStore::new(&data_dir)
            .load()
            .proxy_address()
            .unwrap_or_default()
            .to_string();

        let mut builder = reqwest::blocking::Client::builder().timeout(PROBE_TIMEOUT);
        if !proxy.is_empty() {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| CapError::Network(format!("invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| CapError::Network(format!("failed to build HTTP client: {}", e)))?;

        let url = &self.options.outbound_probe_url;
        let resp = client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                CapError::Timeout
            } else {
                CapError::Network(format!("GET {}: {}", url, e))
            }
        })?;
        if !resp.status().is_success() {
            return Err(CapError::Network(format!("GET {}: HTTP {}", url, resp.status())));
        }
        let body = resp
            .text()
            .map_err(|e| CapError::Network(format!("reading body: {}", e)))?;
        Ok(body.trim().to_string())
    }

    fn set_admin_password(&self, password: &str) -> CapResult<()> {
        let data_dir = self.data_dir()?;
        let output = Command::new(&self.options.binary)
            .args(["admin", "set", password, "--data"])
            .arg(&data_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(spawn_error(&self.options.binary))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(CapError::Other(format!(
                "`admin set` exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        if let Some(mut child) = lock(&self.child).take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
