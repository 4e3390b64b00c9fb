use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::classify::NACL_OS_ABI;

const PROJECT_CONFIG_NAMES: &[&str] = &[".lit-sandbox.yaml", ".lit-sandbox.yml"];

const EXAMPLE_CONFIG: &str = r#"# lit-sandbox configuration
#
# All keys are optional. Project values (.lit-sandbox.yaml, nearest parent
# directory wins) override the global ~/.config/lit-sandbox/config.yaml.

# Wrapper command prepended to sandboxed binaries.
# launcher: zvsh

# Prefix marking file arguments for the wrapper's filesystem mapping.
# path_marker: "@"

# Null device on the host and its name inside the sandbox.
# null_device: /dev/null
# null_replacement: "@null"

# Arguments containing this substring are treated as files even when they do
# not exist yet (lit temporary outputs).
# temp_hint: .tmp

# ELF OS/ABI byte identifying sandboxed binaries (123 = NaCl).
# os_abi: 123

# Directories searched for command heads, PATH syntax. Defaults to $PATH.
# search_path: /opt/llvm-nacl/bin:/usr/bin
"#;

/// Configuration for lit-sandbox, read from .lit-sandbox.yaml
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Wrapper command prepended to sandboxed binaries. Default: zvsh
    #[serde(default)]
    pub launcher: Option<String>,

    /// Prefix for file arguments of sandboxed binaries. Default: @
    #[serde(default)]
    pub path_marker: Option<String>,

    /// Host null device path. Default: /dev/null
    #[serde(default)]
    pub null_device: Option<String>,

    /// Replacement for the null device. Default: @null
    #[serde(default)]
    pub null_replacement: Option<String>,

    /// Substring that marks not-yet-created output files. Default: .tmp
    #[serde(default)]
    pub temp_hint: Option<String>,

    /// ELF OS/ABI value of sandboxed binaries. Default: 123
    #[serde(default)]
    pub os_abi: Option<u8>,

    /// Executable search path (PATH syntax). Default: process PATH
    #[serde(default)]
    pub search_path: Option<String>,
}

impl Config {
    pub fn launcher(&self) -> &str {
        self.launcher.as_deref().unwrap_or("zvsh")
    }

    pub fn path_marker(&self) -> &str {
        self.path_marker.as_deref().unwrap_or("@")
    }

    pub fn null_device(&self) -> &str {
        self.null_device.as_deref().unwrap_or("/dev/null")
    }

    pub fn null_replacement(&self) -> &str {
        self.null_replacement.as_deref().unwrap_or("@null")
    }

    pub fn temp_hint(&self) -> &str {
        self.temp_hint.as_deref().unwrap_or(".tmp")
    }

    pub fn os_abi(&self) -> u8 {
        self.os_abi.unwrap_or(NACL_OS_ABI)
    }

    /// Configured search path, or None to use the process PATH.
    pub fn search_path(&self) -> Option<OsString> {
        self.search_path
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(OsString::from)
    }

    /// Load and merge global and project configurations.
    pub fn load() -> anyhow::Result<Self> {
        debug!("config:loading");
        let global_config = Self::load_global()?.unwrap_or_default();
        let project_config = Self::load_project()?.unwrap_or_default();
        let config = global_config.merge(project_config);
        debug!(launcher = config.launcher(), "config:loaded");
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "config:reading file");
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config at {}: {}", path.display(), e))?;
        Ok(Some(config))
    }

    /// Load the global configuration file from the XDG config directory.
    fn load_global() -> anyhow::Result<Option<Self>> {
        if let Some(home_dir) = home::home_dir() {
            for name in ["config.yaml", "config.yml"] {
                let path = home_dir.join(".config/lit-sandbox").join(name);
                if path.exists() {
                    return Self::load_from_path(&path);
                }
            }
        }
        Ok(None)
    }

    fn load_project() -> anyhow::Result<Option<Self>> {
        let start_dir = std::env::current_dir().unwrap_or_default();
        match find_project_config(&start_dir) {
            Some(path) => Self::load_from_path(&path),
            None => Ok(None),
        }
    }

    /// Merge a project config into a global config. Project values win.
    pub fn merge(self, project: Self) -> Self {
        Self {
            launcher: project.launcher.or(self.launcher),
            path_marker: project.path_marker.or(self.path_marker),
            null_device: project.null_device.or(self.null_device),
            null_replacement: project.null_replacement.or(self.null_replacement),
            temp_hint: project.temp_hint.or(self.temp_hint),
            os_abi: project.os_abi.or(self.os_abi),
            search_path: project.search_path.or(self.search_path),
        }
    }

    /// Write an example .lit-sandbox.yaml into the current directory.
    pub fn init() -> anyhow::Result<()> {
        let path = PathBuf::from(PROJECT_CONFIG_NAMES[0]);
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        fs::write(&path, EXAMPLE_CONFIG)?;
        println!("Created {}", path.display());
        Ok(())
    }
}

/// Find the nearest project config walking upward from `start_dir`.
pub fn find_project_config(start_dir: &Path) -> Option<PathBuf> {
    start_dir.ancestors().find_map(|dir| {
        PROJECT_CONFIG_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}
