//! Process host – keeps the hosting process in the foreground while the
//! engine runs and maps OS lifecycle events onto the manager.

use crate::manager::{LifecycleManager, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::traits::ForegroundNotifier;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const FOREGROUND_ID: u32 = 5244;
pub const CHANNEL_ID: &str = "openlist_service";

/// What the foreground notice shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundNotice {
    pub id: u32,
    pub channel_id: String,
    pub channel_name: String,
    pub title: String,
    pub text: String,
    pub ongoing: bool,
}

impl Default for ForegroundNotice {
    fn default() -> Self {
        Self {
            id: FOREGROUND_ID,
            channel_id: CHANNEL_ID.to_string(),
            channel_name: "OpenList Service".to_string(),
            title: "OpenList service running".to_string(),
            text: "Local file service started".to_string(),
            ongoing: true,
        }
    }
}

pub struct ProcessHost {
    manager: Arc<LifecycleManager>,
    notifier: Arc<dyn ForegroundNotifier>,
    notice: ForegroundNotice,
    shutdown_timeout: Duration,
    created: AtomicBool,
}

impl ProcessHost {
    pub fn new(manager: Arc<LifecycleManager>, notifier: Arc<dyn ForegroundNotifier>) -> Self {
        Self {
            manager,
            notifier,
            notice: ForegroundNotice::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            created: AtomicBool::new(false),
        }
    }

    /// How long `on_destroy` waits for the engine to stop.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn manager(&self) -> &LifecycleManager {
        &self.manager
    }

    pub fn is_active(&self) -> bool {
        self.created.load(Ordering::SeqCst)
    }

    /// Host came up: post the foreground notice.
    pub fn on_create(&self) {
        if self.created.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.notifier.show(&self.notice) {
            tracing::warn!(error = %e, "failed to show foreground notice");
        }
    }

    /// Host asked to (re)start work. Repeated calls are harmless.
    pub fn on_start_command(&self) -> bool {
        match self.manager.start() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "failed to start engine");
                false
            }
        }
    }

    /// Host is going away: stop the engine and withdraw the notice.
    pub fn on_destroy(&self) {
        if let Err(e) = self.manager.shutdown(self.shutdown_timeout) {
            tracing::warn!(error = %e, "engine shutdown reported an error");
        }
        if self.created.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.notifier.cancel(self.notice.id) {
                tracing::warn!(error = %e, "failed to cancel foreground notice");
            }
        }
    }

    /// `startService` entry point.
    pub fn start_service(&self) -> bool {
        self.on_create();
        self.on_start_command()
    }

    /// `stopService` entry point.
    pub fn stop_service(&self) -> bool {
        self.on_destroy();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostContext;
    use crate::testing::{FakeEngine, FakeNotifier};

    fn host() -> (tempfile::TempDir, Arc<FakeEngine>, Arc<FakeNotifier>, ProcessHost) {
        let app = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let manager = Arc::new(LifecycleManager::new(HostContext::new(
            app.path(),
            engine.clone(),
        )));
        let notifier = Arc::new(FakeNotifier::default());
        let host = ProcessHost::new(manager, notifier.clone());
        (app, engine, notifier, host)
    }

    #[test]
    fn test_start_service_shows_notice_once_and_starts() {
        let (_app, engine, notifier, host) = host();
        assert!(host.start_service());
        assert!(host.start_service());
        assert_eq!(*notifier.shown.lock().unwrap(), vec![FOREGROUND_ID]);
        assert_eq!(engine.count("start"), 1);
        assert!(host.manager().is_running());
    }

    #[test]
    fn test_stop_service_shuts_down_and_cancels() {
        let (_app, engine, notifier, host) = host();
        host.start_service();
        assert!(host.stop_service());
        assert_eq!(engine.count("shutdown"), 1);
        assert_eq!(*notifier.cancelled.lock().unwrap(), vec![FOREGROUND_ID]);
        assert!(!host.is_active());
        assert!(!host.manager().is_running());
    }

    #[test]
    fn test_start_failure_keeps_notice_but_reports_false() {
        let (_app, engine, notifier, host) = host();
        engine.fail_start.store(true, Ordering::SeqCst);
        assert!(!host.start_service());
        assert!(host.is_active());
        assert_eq!(notifier.shown.lock().unwrap().len(), 1);
    }
}
