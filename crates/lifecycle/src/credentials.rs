//! One-time admin credential captured from engine log output.

use crate::traits::{CapResult, LogObserver, PreferenceStore};
use std::sync::Arc;

pub const KEY_INITIAL_PASSWORD: &str = "initial_admin_password";

/// Text the engine prints right before the generated admin password.
pub const PASSWORD_MARKER: &str =
    "Successfully created the admin user and the initial password is:";

#[derive(Clone)]
pub struct CredentialStore {
    prefs: Arc<dyn PreferenceStore>,
}

impl CredentialStore {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        Self { prefs }
    }

    /// Replace the current credential.
    pub fn save(&self, password: &str) -> CapResult<()> {
        self.prefs.set(KEY_INITIAL_PASSWORD, password)
    }

    pub fn read(&self) -> Option<String> {
        self.prefs.get(KEY_INITIAL_PASSWORD)
    }

    pub fn clear(&self) -> CapResult<()> {
        self.prefs.remove(KEY_INITIAL_PASSWORD)
    }
}

/// Pull the credential out of a single log line.
pub fn extract_password(message: &str) -> Option<&str> {
    let (_, rest) = message.split_once(PASSWORD_MARKER)?;
    let pwd = rest.trim();
    (!pwd.is_empty()).then_some(pwd)
}

/// Log observer that watches for the credential marker and forwards every
/// line to the diagnostic log.
pub struct CredentialScanner {
    store: CredentialStore,
}

impl CredentialScanner {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }
}

impl LogObserver for CredentialScanner {
    fn on_log(&self, level: i16, timestamp_ms: i64, message: &str) {
        if !message.trim().is_empty() {
            if let Some(pwd) = extract_password(message) {
                match self.store.save(pwd) {
                    Ok(()) => tracing::info!("captured initial admin password"),
                    Err(e) => tracing::error!(error = %e, "failed to store initial admin password"),
                }
            }
        }
        tracing::debug!(target: "openlist", engine_level = level, timestamp_ms, "{}", message);
    }
}
