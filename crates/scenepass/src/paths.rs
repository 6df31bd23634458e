use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use directories_next::ProjectDirs;

pub const ENV_CONFIG: &str = "SCENEPASS_CONFIG";
pub const ENV_ASSETS_DIR: &str = "SCENEPASS_ASSETS_DIR";
pub const CONFIG_FILE_NAME: &str = "scenepass.toml";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "Scenepass";
const APPLICATION: &str = "scenepass";

/// Where the active configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    Flag,
    Environment,
    UserConfig,
    BuiltIn,
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigOrigin::Flag => "--config",
            ConfigOrigin::Environment => ENV_CONFIG,
            ConfigOrigin::UserConfig => "user config",
            ConfigOrigin::BuiltIn => "built-in defaults",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocation {
    pub origin: ConfigOrigin,
    /// `None` for the built-in defaults.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: Option<PathBuf>,
    assets_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Self {
        let config_dir = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .map(|dirs| dirs.config_dir().to_path_buf());
        if config_dir.is_none() {
            tracing::debug!("no user config directory available on this platform");
        }
        let assets_dir = env_override(ENV_ASSETS_DIR).unwrap_or_else(bundled_assets_dir);
        Self {
            config_dir,
            assets_dir,
        }
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    pub fn user_config_file(&self) -> Option<PathBuf> {
        self.config_dir.as_ref().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    /// Picks the configuration source: the flag, then the environment, then
    /// an existing user config file, then the built-in defaults.
    pub fn locate_config(&self, flag: Option<&Path>) -> ConfigLocation {
        if let Some(path) = flag {
            return ConfigLocation {
                origin: ConfigOrigin::Flag,
                path: Some(path.to_path_buf()),
            };
        }
        if let Some(path) = env_override(ENV_CONFIG) {
            return ConfigLocation {
                origin: ConfigOrigin::Environment,
                path: Some(path),
            };
        }
        if let Some(path) = self.user_config_file().filter(|path| path.is_file()) {
            return ConfigLocation {
                origin: ConfigOrigin::UserConfig,
                path: Some(path),
            };
        }
        ConfigLocation {
            origin: ConfigOrigin::BuiltIn,
            path: None,
        }
    }
}

#[cfg(test)]
impl AppPaths {
    pub fn from_raw(config_dir: Option<PathBuf>, assets_dir: PathBuf) -> Self {
        Self {
            config_dir,
            assets_dir,
        }
    }
}

fn bundled_assets_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets")
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}
