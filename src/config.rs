// src/config.rs

//! Terminal configuration loaded from TOML.
//!
//! Every section is optional; a missing file or section falls back to the
//! defaults below. Example:
//!
//! ```toml
//! [process]
//! shell = "/bin/sh"
//! poll_interval_ms = 100
//!
//! [process.environment]
//! FEATURES = "parallel-fetch"
//!
//! [resume]
//! killed_head = "skip"
//!
//! [classifier]
//! warning = ["(?i)\\bwarning:"]
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default marker emitted by portage while it regenerates its metadata cache
pub const DEFAULT_CACHE_MARKER: &str = ">>> Updating Portage cache...";

/// Top-level terminal configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TerminalConfig {
    /// Child process and polling settings
    #[serde(default)]
    pub process: ProcessConfig,

    /// Resume behaviour for killed jobs
    #[serde(default)]
    pub resume: ResumeConfig,

    /// Line classification patterns
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Finished-job history
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Settings for spawning and draining child processes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProcessConfig {
    /// Shell used to run command lines (`<shell> -c <command>`)
    #[serde(default = "default_shell")]
    pub shell: PathBuf,

    /// Attach children to a pseudo-terminal (required for soft interrupts)
    #[serde(default = "default_true")]
    pub use_pty: bool,

    /// Extra environment for every child, on top of the inherited one
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Interval of the consumer step in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long the idle reader waits for work before re-checking shutdown
    #[serde(default = "default_idle_interval")]
    pub idle_interval_ms: u64,

    /// Maximum bytes taken from the source per read
    #[serde(default = "default_read_chunk")]
    pub read_chunk_size: usize,
}

fn default_shell() -> PathBuf {
    PathBuf::from("/bin/sh")
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    100
}

fn default_idle_interval() -> u64 {
    500
}

fn default_read_chunk() -> usize {
    4096
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            use_pty: true,
            environment: HashMap::new(),
            poll_interval_ms: default_poll_interval(),
            idle_interval_ms: default_idle_interval(),
            read_chunk_size: default_read_chunk(),
        }
    }
}

impl ProcessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

/// What to do with a killed, resumable head when another job is queued
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KilledHeadPolicy {
    /// Re-run the killed job with the resume flag
    #[default]
    Resume,
    /// Drop the killed job (its callback still runs) and start the next one
    Skip,
}

/// Flags appended to a killed job's command when it is resumed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResumeConfig {
    #[serde(default = "default_resume_flag")]
    pub resume_flag: String,

    #[serde(default = "default_skip_first_flag")]
    pub skip_first_flag: String,

    #[serde(default)]
    pub killed_head: KilledHeadPolicy,
}

fn default_resume_flag() -> String {
    "--resume".to_string()
}

fn default_skip_first_flag() -> String {
    "--skipfirst".to_string()
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            resume_flag: default_resume_flag(),
            skip_first_flag: default_skip_first_flag(),
            killed_head: KilledHeadPolicy::default(),
        }
    }
}

/// Regular expressions used by the pattern classifier
///
/// Order of evaluation: command echo, info (error refines info), warning,
/// caution. The first matching group wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    #[serde(default = "default_command_echo")]
    pub command_echo: Vec<String>,

    #[serde(default = "default_info")]
    pub info: Vec<String>,

    /// Fatal conditions; only counted inside info, warning or caution lines
    #[serde(default = "default_error")]
    pub error: Vec<String>,

    #[serde(default = "default_warning")]
    pub warning: Vec<String>,

    #[serde(default = "default_caution")]
    pub caution: Vec<String>,

    /// Partial line flushed without waiting for a line feed
    #[serde(default = "default_cache_marker")]
    pub cache_marker: Option<String>,
}

fn default_command_echo() -> Vec<String> {
    vec![r"^>>> emerge \(\s*\d+ of \d+\) ".to_string()]
}

fn default_info() -> Vec<String> {
    vec![r"^ ?\* ".to_string(), r"^!!! ".to_string()]
}

fn default_error() -> Vec<String> {
    vec![r"^!!! ERROR".to_string(), r"(?i)^!!! .*\bfailed\b".to_string()]
}

fn default_warning() -> Vec<String> {
    vec![r"(?i)\bwarning:".to_string()]
}

fn default_caution() -> Vec<String> {
    vec![r"^QA Notice".to_string(), r"(?i)\bcaution\b".to_string()]
}

fn default_cache_marker() -> Option<String> {
    Some(DEFAULT_CACHE_MARKER.to_string())
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            command_echo: default_command_echo(),
            info: default_info(),
            error: default_error(),
            warning: default_warning(),
            caution: default_caution(),
            cache_marker: default_cache_marker(),
        }
    }
}

/// Finished-job history settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    /// Number of finished jobs kept for display
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    100
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
        }
    }
}

impl TerminalConfig {
    /// Default per-user configuration path (`~/.config/buildterm/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("buildterm").join("config.toml"))
    }

    /// Load configuration from `path`, or from the default path when it
    /// exists, or fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default),
                _ => {
                    debug!("No configuration file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration back to TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.process.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be greater than zero".into()));
        }
        if self.process.idle_interval_ms == 0 {
            return Err(Error::Config("idle_interval_ms must be greater than zero".into()));
        }
        if self.process.read_chunk_size == 0 {
            return Err(Error::Config("read_chunk_size must be greater than zero".into()));
        }
        if self.process.shell.as_os_str().is_empty() {
            return Err(Error::Config("shell must not be empty".into()));
        }
        if self.resume.resume_flag.trim().is_empty() {
            return Err(Error::Config("resume_flag must not be empty".into()));
        }
        if self.resume.skip_first_flag.trim().is_empty() {
            return Err(Error::Config("skip_first_flag must not be empty".into()));
        }
        if let Some(marker) = &self.classifier.cache_marker {
            if marker.is_empty() {
                return Err(Error::Config("cache_marker must not be empty; omit it instead".into()));
            }
        }
        Ok(())
    }
}
