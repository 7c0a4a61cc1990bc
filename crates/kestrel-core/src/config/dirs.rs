use crate::{Error, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

/// Application directories following XDG conventions
#[derive(Debug, Clone)]
pub struct Directories {
    /// Config directory (~/.config/kestrel)
    pub config: PathBuf,

    /// User plugins directory (~/.config/kestrel/plugins)
    pub plugins: PathBuf,

    /// Config file path
    pub config_file: PathBuf,
}

impl Directories {
    /// Create a new `Directories` instance with standard XDG paths.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the system's project directories cannot be determined.
    pub fn new() -> Result<Self> {
        let project = ProjectDirs::from("", "", "kestrel").ok_or_else(|| {
            Error::Config("Failed to determine project directories".to_string())
        })?;

        Ok(Self::with_base(project.config_dir().to_path_buf()))
    }

    #[must_use]
    pub fn with_base(base: PathBuf) -> Self {
        Self {
            plugins: base.join("plugins"),
            config_file: base.join("config.json"),
            config: base,
        }
    }
}
