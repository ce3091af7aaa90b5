//! Static web bundle bootstrap.
//!
//! The engine serves its UI from `<data_dir>/public/dist`. On first run the
//! bundle is materialized there from the application's packaged resources.
//! Build variants package it under different namespaces, so several
//! candidates are probed before falling back to reading the application
//! archive directly.

use crate::traits::{AssetSource, CapError, CapResult};
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Bundle location relative to the data directory.
pub const DIST_RELATIVE: &str = "public/dist";

/// Presence of this file under the bundle root means bootstrap is done.
pub const MARKER_FILE: &str = "index.html";

/// Resource namespaces that may hold the bundle, highest priority first.
pub const ASSET_CANDIDATES: [&str; 3] = [
    "openlist/dist",
    "flutter_assets/openlist/dist",
    "flutter_assets/android/app/src/main/assets/openlist/dist",
];

/// Entry prefixes of the bundle inside the application archive.
pub const ARCHIVE_PREFIXES: [&str; 2] = [
    "assets/openlist/dist/",
    "assets/flutter_assets/openlist/dist/",
];

pub fn dist_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(DIST_RELATIVE)
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFailure {
    pub path: String,
    pub error: String,
}

/// Per-file results of a bulk copy. A failed file never stops the pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: Vec<PathBuf>,
    pub failed: Vec<CopyFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Marker was already there; nothing was touched.
    AlreadyPresent,
    /// Copied from a packaged resource namespace.
    Copied { source: String, report: CopyReport },
    /// Extracted from the application archive.
    Extracted { files: usize },
    /// No usable bundle was found. The engine will run without its UI.
    Missing { reason: String },
}

impl BootstrapOutcome {
    pub fn is_ready(&self) -> bool {
        !matches!(self, BootstrapOutcome::Missing { .. })
    }
}

// ---------------------------------------------------------------------------
// Bootstrapper
// ---------------------------------------------------------------------------

pub struct AssetBootstrapper {
    source: Arc<dyn AssetSource>,
    package_archive: Option<PathBuf>,
}

impl AssetBootstrapper {
    pub fn new(source: Arc<dyn AssetSource>, package_archive: Option<PathBuf>) -> Self {
        Self {
            source,
            package_archive,
        }
    }

    /// Make sure a bundle exists under `data_dir`. Never fails hard: a
    /// missing bundle is reported as [`BootstrapOutcome::Missing`].
    pub fn ensure(&self, data_dir: &Path) -> BootstrapOutcome {
        let target = dist_dir(data_dir);
        let marker = target.join(MARKER_FILE);
        if marker.exists() {
            return BootstrapOutcome::AlreadyPresent;
        }

        tracing::info!(target_dir = %target.display(), "bootstrapping web assets");
        self.log_probe();

        let mut copied = None;
        match self.find_source_root() {
            Some(root) => {
                tracing::info!(source = root, "copying web assets");
                let report = self.copy_tree(root, &target);
                if !report.failed.is_empty() {
                    tracing::warn!(
                        copied = report.copied.len(),
                        failed = report.failed.len(),
                        "some asset files could not be copied"
                    );
                }
                if marker.exists() {
                    return BootstrapOutcome::Copied {
                        source: root.to_string(),
                        report,
                    };
                }
                tracing::warn!(source = root, "marker missing after copy, trying package archive");
                copied = Some(root);
            }
            None => {
                tracing::info!("web assets not found in packaged resources, trying package archive")
            }
        }

        let reason = match self.extract_from_package(&target) {
            Ok(files) if marker.exists() => {
                tracing::info!(files, "extracted web assets from package archive");
                return BootstrapOutcome::Extracted { files };
            }
            Ok(files) => format!("package archive yielded {} files but no {}", files, MARKER_FILE),
            Err(e) => format!("package archive extraction failed: {}", e),
        };
        let reason = match copied {
            Some(root) => format!("copy from {} incomplete; {}", root, reason),
            None => reason,
        };
        tracing::warn!(%reason, "web assets unavailable");
        BootstrapOutcome::Missing { reason }
    }

    /// First candidate whose marker can be opened.
    fn find_source_root(&self) -> Option<&'static str> {
        ASSET_CANDIDATES.into_iter().find(|base| {
            let probe = format!("{}/{}", base, MARKER_FILE);
            self.source.open(&probe).is_ok()
        })
    }

    fn log_probe(&self) {
        let roots = ["", "openlist", "flutter_assets", "flutter_assets/openlist"];
        for ns in roots.into_iter().chain(ASSET_CANDIDATES) {
            match self.source.list(ns) {
                Ok(entries) => tracing::debug!(namespace = ns, ?entries, "asset namespace"),
                Err(e) => tracing::debug!(namespace = ns, error = %e, "asset namespace unavailable"),
            }
        }
    }

    fn copy_tree(&self, root: &str, target: &Path) -> CopyReport {
        let mut report = CopyReport::default();
        self.copy_path(root, root, target, &mut report);
        report
    }

    fn copy_path(&self, path: &str, root: &str, target: &Path, report: &mut CopyReport) {
        let children = self.source.list(path).unwrap_or_default();
        if !children.is_empty() {
            for name in children {
                let child = format!("{}/{}", path, name);
                self.copy_path(&child, root, target, report);
            }
            return;
        }

        let rel = path.strip_prefix(root).unwrap_or(path).trim_start_matches('/');
        let out = target.join(rel);
        match self.copy_file(path, &out) {
            Ok(()) => {
                tracing::trace!(asset = path, dest = %out.display(), "copied asset");
                report.copied.push(out);
            }
            Err(e) => report.failed.push(CopyFailure {
                path: path.to_string(),
                error: e.to_string(),
            }),
        }
    }

    fn copy_file(&self, path: &str, out: &Path) -> CapResult<()> {
        let mut input = self.source.open(path)?;
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut output = File::create(out)?;
        std::io::copy(&mut input, &mut output)?;
        Ok(())
    }

    /// Extract every archive entry under a known prefix. Returns the number
    /// of files written.
    fn extract_from_package(&self, target: &Path) -> CapResult<usize> {
        let archive_path = self
            .package_archive
            .as_deref()
            .ok_or_else(|| CapError::NotFound("no package archive configured".into()))?;
        let file = File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| CapError::Other(format!("{}: {}", archive_path.display(), e)))?;

        let mut count = 0;
        for i in 0..archive.len() {
            let mut entry = match archive.by_index(i) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(index = i, error = %e, "unreadable archive entry");
                    continue;
                }
            };
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let Some(rel) = ARCHIVE_PREFIXES.iter().find_map(|p| name.strip_prefix(p)) else {
                continue;
            };
            let Some(rel) = contained_relative(rel) else {
                tracing::warn!(entry = %name, "skipping archive entry outside bundle root");
                continue;
            };

            let out = target.join(rel);
            let written = (|| -> CapResult<()> {
                if let Some(parent) = out.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut output = File::create(&out)?;
                std::io::copy(&mut entry, &mut output)?;
                Ok(())
            })();
            match written {
                Ok(()) => count += 1,
                Err(e) => tracing::warn!(entry = %name, error = %e, "failed to extract archive entry"),
            }
        }
        Ok(count)
    }
}

/// `rel` as a path that cannot escape its parent, or `None`.
fn contained_relative(rel: &str) -> Option<PathBuf> {
    let path = Path::new(rel);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

// ===========================================================================
// Tests
// ===========================================================================
