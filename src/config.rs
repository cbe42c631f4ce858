//! Git execution configuration (~/.tidyflow/git.toml)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the credential helper executable shipped with the core
pub const ASKPASS_BINARY: &str = "tidyflow-askpass";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

/// Configuration for the git execution layer
///
/// Everything platform-dependent is resolved here, once, and handed to the
/// runner at construction time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GitConfig {
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub trampoline: TrampolineSection,
    #[serde(default)]
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSection {
    /// Path to the git executable
    #[serde(default = "default_git_binary")]
    pub binary: PathBuf,
    /// Default deadline for every invocation; unset means no deadline
    pub timeout_secs: Option<u64>,
    /// How long a cancelled process gets between SIGTERM and SIGKILL
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            timeout_secs: None,
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

fn default_git_binary() -> PathBuf {
    which::which("git").unwrap_or_else(|_| PathBuf::from("git"))
}

fn default_kill_grace_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrampolineSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Helper executable git runs as askpass / credential helper
    #[serde(default = "default_helper_path")]
    pub helper_path: PathBuf,
}

impl Default for TrampolineSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            helper_path: default_helper_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_helper_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(ASKPASS_BINARY)))
        .unwrap_or_else(|| PathBuf::from(ASKPASS_BINARY))
}

/// Platform-derived switches, decided by the host and passed in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Route SSH passphrase / host key prompts through the trampoline
    #[serde(default = "default_true")]
    pub ssh_askpass: bool,
    /// Install the trampoline as git's credential helper
    #[serde(default = "default_true")]
    pub credential_helper: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            ssh_askpass: true,
            credential_helper: true,
        }
    }
}

impl GitConfig {
    /// Default location: ~/.tidyflow/git.toml
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".tidyflow").join("git.toml"))
    }

    /// Load from the default location, or defaults if there is none
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load config from a file; a missing file yields the defaults
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.git.timeout_secs.map(Duration::from_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.git.kill_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GitConfig::default();
        assert!(config.trampoline.enabled);
        assert_eq!(config.trampoline.bind_address, "127.0.0.1");
        assert_eq!(config.git.kill_grace_ms, 2000);
        assert!(config.default_timeout().is_none());
        assert!(config.features.ssh_askpass);
        assert!(config.features.credential_helper);
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[git]
binary = "/opt/git/bin/git"
timeout_secs = 300

[trampoline]
enabled = false
helper_path = "/Applications/TidyFlow.app/Contents/MacOS/tidyflow-askpass"

[features]
ssh_askpass = false
"#;
        let config = GitConfig::parse(toml_str).unwrap();
        assert_eq!(config.git.binary, PathBuf::from("/opt/git/bin/git"));
        assert_eq!(config.default_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.kill_grace(), Duration::from_millis(2000));
        assert!(!config.trampoline.enabled);
        assert_eq!(config.trampoline.bind_address, "127.0.0.1");
        assert!(!config.features.ssh_askpass);
        assert!(config.features.credential_helper);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GitConfig::load(&dir.path().join("git.toml")).unwrap();
        assert!(config.trampoline.enabled);
    }

    #[test]
    fn test_parse_error() {
        let err = GitConfig::parse("[git]\nkill_grace_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
