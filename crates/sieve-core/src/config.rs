use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Settings for one filtering run. Every field has a default, so an empty
/// YAML document is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Mailbox used by `keep` and the implicit keep.
    #[serde(default = "default_mailbox")]
    pub default_mailbox: String,
    #[serde(default)]
    pub mailbox_autocreate: bool,
    #[serde(default)]
    pub mailbox_autosubscribe: bool,
    /// Sender of generated notifications.
    #[serde(default = "default_postmaster")]
    pub postmaster_address: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Maximum number of actions in one result; 0 = unlimited.
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
    /// Error budget for the run's diagnostic handler; 0 = unlimited.
    #[serde(default)]
    pub max_errors: u32,
    #[serde(default)]
    pub log_info: bool,
    #[serde(default)]
    pub log_debug: bool,
    /// Copy every diagnostic into the process-wide master log as well.
    #[serde(default)]
    pub log_master: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_postmaster() -> String {
    "postmaster@localhost".to_string()
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_max_actions() -> usize {
    32
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_mailbox: default_mailbox(),
            mailbox_autocreate: false,
            mailbox_autosubscribe: false,
            postmaster_address: default_postmaster(),
            username: None,
            hostname: default_hostname(),
            max_actions: default_max_actions(),
            max_errors: 0,
            log_info: false,
            log_debug: false,
            log_master: false,
            log_file: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&data)
    }

    pub fn from_yaml_str(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.default_mailbox.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "default_mailbox must not be empty".to_string(),
            });
        }

        if let Err(e) = crate::message::Address::parse(&self.postmaster_address) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("postmaster_address is invalid: {e}"),
            });
        }

        if self.mailbox_autosubscribe && !self.mailbox_autocreate {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "mailbox_autosubscribe has no effect without mailbox_autocreate"
                    .to_string(),
            });
        }

        if self.max_actions == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "max_actions is 0: the number of actions per run is unlimited"
                    .to_string(),
            });
        }

        warnings
    }
}
