// src/classify.rs

//! Line classification
//!
//! The decoder hands every completed line to a [`LineClassifier`]. The
//! engine only consumes the resulting category and fatal flag; the rules
//! themselves are pluggable. [`PatternClassifier`] is the bundled
//! implementation, driven by the `[classifier]` configuration section.

use crate::config::ClassifierConfig;
use crate::error::Result;
use regex::RegexSet;

/// Severity category of a completed output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineCategory {
    /// Package manager announcing the next package of a merge
    CommandEcho,
    Info,
    Warning,
    Caution,
    /// Informational line reporting a fatal build error
    Error,
    /// Anything else, including carriage-return segments
    Plain,
}

impl LineCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandEcho => "command-echo",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Caution => "caution",
            Self::Error => "error",
            Self::Plain => "plain",
        }
    }

    /// Categories in which a fatal line fails the enclosing job
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Caution | Self::Error)
    }
}

impl std::fmt::Display for LineCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of classifying one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: LineCategory,
    pub fatal: bool,
}

impl Classification {
    pub fn new(category: LineCategory) -> Self {
        Self {
            category,
            fatal: false,
        }
    }

    pub fn fatal(category: LineCategory) -> Self {
        Self {
            category,
            fatal: true,
        }
    }

    pub fn plain() -> Self {
        Self::new(LineCategory::Plain)
    }
}

/// Maps a completed line of text to a category
pub trait LineClassifier: Send + Sync {
    fn classify(&self, line: &str) -> Classification;
}

/// Any plain function works as a classifier (handy in tests)
impl<F> LineClassifier for F
where
    F: Fn(&str) -> Classification + Send + Sync,
{
    fn classify(&self, line: &str) -> Classification {
        self(line)
    }
}

/// Regex-driven classifier
///
/// Order of checks matters: command echo first, then info (an error
/// pattern turns an info line into a fatal error), then warning, then
/// caution. Error patterns never match on their own.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    command_echo: RegexSet,
    info: RegexSet,
    error: RegexSet,
    warning: RegexSet,
    caution: RegexSet,
}

impl PatternClassifier {
    /// Compile the configured pattern lists
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        Ok(Self {
            command_echo: RegexSet::new(&config.command_echo)?,
            info: RegexSet::new(&config.info)?,
            error: RegexSet::new(&config.error)?,
            warning: RegexSet::new(&config.warning)?,
            caution: RegexSet::new(&config.caution)?,
        })
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        // Built-in patterns always compile; empty sets classify as plain
        Self::from_config(&ClassifierConfig::default()).unwrap_or_else(|_| Self {
            command_echo: RegexSet::empty(),
            info: RegexSet::empty(),
            error: RegexSet::empty(),
            warning: RegexSet::empty(),
            caution: RegexSet::empty(),
        })
    }
}

impl LineClassifier for PatternClassifier {
    fn classify(&self, line: &str) -> Classification {
        // 1. Command echo
        if self.command_echo.is_match(line) {
            return Classification::new(LineCategory::CommandEcho);
        }

        let fatal = self.error.is_match(line);

        // 2. Info, refined to error
        if self.info.is_match(line) {
            return if fatal {
                Classification::fatal(LineCategory::Error)
            } else {
                Classification::new(LineCategory::Info)
            };
        }

        // 3. Warning
        if self.warning.is_match(line) {
            return Classification {
                category: LineCategory::Warning,
                fatal,
            };
        }

        // 4. Caution
        if self.caution.is_match(line) {
            return Classification {
                category: LineCategory::Caution,
                fatal,
            };
        }

        Classification::plain()
    }
}
