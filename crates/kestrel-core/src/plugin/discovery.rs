use std::path::{Path, PathBuf};

use kestrel_types::{PluginMetadata, RuntimeKind};
use tracing::{debug, info, warn};

use crate::{Error, Result};

pub const MANIFEST_FILENAME: &str = "plugin.json";

/// A host-backed plugin found on disk
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub metadata: PluginMetadata,
    pub directory: PathBuf,
}

impl DiscoveredPlugin {
    /// Load a plugin manifest from a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is missing or invalid.
    pub fn load(directory: PathBuf) -> Result<Self> {
        let manifest_path = directory.join(MANIFEST_FILENAME);
        if !manifest_path.exists() {
            return Err(Error::Plugin(format!(
                "{} not found in {}",
                MANIFEST_FILENAME,
                directory.display()
            )));
        }

        let content = std::fs::read_to_string(&manifest_path)?;
        let metadata: PluginMetadata = serde_json::from_str(&content).map_err(|e| {
            Error::Plugin(format!(
                "Failed to parse manifest at {}: {}",
                manifest_path.display(),
                e
            ))
        })?;

        if metadata.id.trim().is_empty() {
            return Err(Error::Plugin(format!(
                "Manifest at {} has an empty id",
                manifest_path.display()
            )));
        }

        Ok(Self {
            metadata,
            directory,
        })
    }

    /// Whether the manifest allows the current operating system
    #[must_use]
    pub fn supports_current_os(&self) -> bool {
        let os = current_os();
        self.metadata.supported_os.is_empty()
            || self
                .metadata
                .supported_os
                .iter()
                .any(|s| s.eq_ignore_ascii_case(os) || (os == "darwin" && s == "macos"))
    }
}

fn current_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Scan the immediate sub-directories of `dir` for plugin manifests.
///
/// Invalid manifests are logged and skipped. Native manifests are skipped
/// too: native plugins are compiled in and registered directly. The result
/// is sorted by directory name.
///
/// # Errors
///
/// Returns an error if `dir` itself cannot be read.
pub fn discover_plugins(dir: &Path) -> Result<Vec<DiscoveredPlugin>> {
    let mut directories: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    directories.sort();

    let mut found = Vec::new();
    for path in directories {
        if !path.join(MANIFEST_FILENAME).exists() {
            continue;
        }

        match DiscoveredPlugin::load(path.clone()) {
            Ok(plugin) if plugin.metadata.runtime == RuntimeKind::Native => {
                debug!(
                    "[{}] Skipping native manifest in {}",
                    plugin.metadata.id,
                    path.display()
                );
            }
            Ok(plugin) if !plugin.supports_current_os() => {
                debug!(
                    "[{}] Skipping plugin - not supported on '{}'",
                    plugin.metadata.id,
                    current_os()
                );
            }
            Ok(plugin) => {
                debug!(
                    "[{}] Discovered {} plugin in {}",
                    plugin.metadata.id,
                    plugin.metadata.runtime,
                    path.display()
                );
                found.push(plugin);
            }
            Err(e) => {
                warn!("Failed to load plugin from {}: {}", path.display(), e);
            }
        }
    }

    info!("Discovered {} plugin(s) in {}", found.len(), dir.display());
    Ok(found)
}
