//! In-memory fakes for capability traits, shared by unit tests.

use crate::traits::*;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Engine double that records calls and lets tests drive callbacks.
#[derive(Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<String>>,
    pub running: AtomicBool,
    pub probe_fails: AtomicBool,
    pub fail_init: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_shutdown: AtomicBool,
    pub outbound: Mutex<Option<String>>,
    pub admin_password: Mutex<Option<String>>,
    observers: Mutex<Option<(Arc<dyn LogObserver>, Arc<dyn EventObserver>)>>,
}

impl FakeEngine {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls whose name is `name`.
    pub fn count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split(' ').next() == Some(name))
            .count()
    }

    pub fn emit_log(&self, message: &str) {
        let observers = self.observers.lock().unwrap().clone();
        if let Some((log, _)) = observers {
            log.on_log(4, 0, message);
        }
    }

    pub fn emit_event(&self, event: EngineEvent) {
        if matches!(event, EngineEvent::ProcessExit { .. } | EngineEvent::Shutdown { .. }) {
            self.running.store(false, Ordering::SeqCst);
        }
        let observers = self.observers.lock().unwrap().clone();
        if let Some((_, events)) = observers {
            events.on_event(event);
        }
    }
}

impl EngineControl for FakeEngine {
    fn set_data_dir(&self, dir: &Path) -> CapResult<()> {
        self.record(format!("set_data_dir {}", dir.display()));
        Ok(())
    }

    fn set_log_stdout(&self, enabled: bool) -> CapResult<()> {
        self.record(format!("set_log_stdout {}", enabled));
        Ok(())
    }

    fn init(&self, log: Arc<dyn LogObserver>, events: Arc<dyn EventObserver>) -> CapResult<()> {
        self.record("init");
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(CapError::Other("init refused".into()));
        }
        *self.observers.lock().unwrap() = Some((log, events));
        Ok(())
    }

    fn start(&self) -> CapResult<()> {
        self.record("start");
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CapError::Other("port in use".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self, _timeout: Duration) -> CapResult<()> {
        self.record("shutdown");
        self.running.store(false, Ordering::SeqCst);
        if self.fail_shutdown.load(Ordering::SeqCst) {
            return Err(CapError::Timeout);
        }
        Ok(())
    }

    fn is_running(&self, _probe: &str) -> CapResult<bool> {
        if self.probe_fails.load(Ordering::SeqCst) {
            return Err(CapError::Other("probe unavailable".into()));
        }
        Ok(self.running.load(Ordering::SeqCst))
    }

    fn outbound_address(&self) -> CapResult<String> {
        self.outbound
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CapError::Network("no route".into()))
    }

    fn set_admin_password(&self, password: &str) -> CapResult<()> {
        self.record("set_admin_password");
        *self.admin_password.lock().unwrap() = Some(password.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSystem {
    pub proxy: Mutex<Option<(String, u16)>>,
    pub addrs: Mutex<Vec<Ipv4Addr>>,
    pub autostart_fails: AtomicBool,
    pub autostart_calls: AtomicUsize,
}

impl SystemOps for FakeSystem {
    fn system_proxy(&self) -> Option<(String, u16)> {
        self.proxy.lock().unwrap().clone()
    }

    fn local_ipv4_addresses(&self) -> CapResult<Vec<Ipv4Addr>> {
        Ok(self.addrs.lock().unwrap().clone())
    }

    fn open_autostart_settings(&self) -> CapResult<()> {
        self.autostart_calls.fetch_add(1, Ordering::SeqCst);
        if self.autostart_fails.load(Ordering::SeqCst) {
            return Err(CapError::Unsupported("no settings app".into()));
        }
        Ok(())
    }
}

/// Notifier double recording shown and cancelled notice ids.
#[derive(Default)]
pub struct FakeNotifier {
    pub shown: Mutex<Vec<u32>>,
    pub cancelled: Mutex<Vec<u32>>,
}

impl ForegroundNotifier for FakeNotifier {
    fn show(&self, notice: &crate::host::ForegroundNotice) -> CapResult<()> {
        self.shown.lock().unwrap().push(notice.id);
        Ok(())
    }

    fn cancel(&self, id: u32) -> CapResult<()> {
        self.cancelled.lock().unwrap().push(id);
        Ok(())
    }
}
