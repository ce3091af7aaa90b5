//! Host context – holds capability trait objects and host paths.

use crate::platform::{HeadlessSystem, JsonPreferences, NoAssets, StdSystem};
use crate::traits::*;
use crate::types::detect_headless;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory name of the engine's data root under the app directory.
pub const DATA_DIR_NAME: &str = "openlist";

/// File name of the preference store under the app directory.
pub const PREFS_FILE_NAME: &str = "openlist_prefs.json";

/// Everything the lifecycle manager needs from its host.
///
/// Capabilities are trait objects so each shell (CLI, desktop, tests) can
/// swap implementations.
pub struct HostContext {
    app_dir: PathBuf,
    engine: Arc<dyn EngineControl>,
    assets: Arc<dyn AssetSource>,
    package_archive: Option<PathBuf>,
    prefs: Arc<dyn PreferenceStore>,
    system: Arc<dyn SystemOps>,
}

impl HostContext {
    /// Context with real platform implementations rooted at `app_dir`,
    /// the host's private storage directory.
    pub fn new(app_dir: impl Into<PathBuf>, engine: Arc<dyn EngineControl>) -> Self {
        let app_dir = app_dir.into();
        let system: Arc<dyn SystemOps> = if detect_headless() {
            Arc::new(HeadlessSystem)
        } else {
            Arc::new(StdSystem)
        };
        Self {
            prefs: Arc::new(JsonPreferences::open(app_dir.join(PREFS_FILE_NAME))),
            app_dir,
            engine,
            assets: Arc::new(NoAssets),
            package_archive: None,
            system,
        }
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetSource>) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_package_archive(mut self, archive: Option<PathBuf>) -> Self {
        self.package_archive = archive;
        self
    }

    pub fn with_preferences(mut self, prefs: Arc<dyn PreferenceStore>) -> Self {
        self.prefs = prefs;
        self
    }

    pub fn with_system(mut self, system: Arc<dyn SystemOps>) -> Self {
        self.system = system;
        self
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn default_data_dir(&self) -> PathBuf {
        self.app_dir.join(DATA_DIR_NAME)
    }

    pub fn engine(&self) -> &dyn EngineControl {
        self.engine.as_ref()
    }

    pub fn assets(&self) -> Arc<dyn AssetSource> {
        Arc::clone(&self.assets)
    }

    pub fn package_archive(&self) -> Option<&Path> {
        self.package_archive.as_deref()
    }

    pub fn prefs(&self) -> Arc<dyn PreferenceStore> {
        Arc::clone(&self.prefs)
    }

    pub fn system(&self) -> &dyn SystemOps {
        self.system.as_ref()
    }
}
