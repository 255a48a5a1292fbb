//! Locates the per-user session file.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "SHADEBOX_CONFIG_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "shadebox";
const APPLICATION: &str = "shadebox";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
}

impl AppPaths {
    /// Uses `SHADEBOX_CONFIG_DIR` when set, the platform config directory otherwise.
    pub fn discover() -> Result<Self> {
        if let Some(dir) = env::var_os(ENV_CONFIG_DIR).filter(|value| !value.is_empty()) {
            return Ok(Self {
                config_dir: PathBuf::from(dir),
            });
        }
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;
        Ok(Self {
            config_dir: project_dirs.config_dir().to_path_buf(),
        })
    }

    pub fn session_file(&self) -> PathBuf {
        self.config_dir.join("session.toml")
    }
}
