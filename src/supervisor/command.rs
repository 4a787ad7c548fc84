// src/supervisor/command.rs

//! Command-line helpers: pretend detection, resume composition and the
//! remaining-package count of a merge

use crate::config::ResumeConfig;
use regex::Regex;
use std::sync::LazyLock;

static MERGE_PROGRESS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\(\s*(\d+)\s+of\s+(\d+)\s*\)").ok());

/// Whether a command only pretends (`--pretend`, or a short option
/// cluster such as `-pv` containing `p`)
pub fn is_pretend(command: &str) -> bool {
    command.split_whitespace().any(|word| {
        if word == "--pretend" {
            return true;
        }
        match word.strip_prefix('-') {
            Some(cluster) if !cluster.starts_with('-') => cluster.contains('p'),
            _ => false,
        }
    })
}

/// Command that continues a killed job
pub fn resume_command(command: &str, skip_first: bool, flags: &ResumeConfig) -> String {
    let mut resumed = format!("{} {}", command, flags.resume_flag);
    if skip_first {
        resumed.push(' ');
        resumed.push_str(&flags.skip_first_flag);
    }
    resumed
}

/// Packages still to go after the one announced by a `(x of y)` line
pub fn remaining_packages(line: &str) -> Option<u32> {
    let captures = MERGE_PROGRESS.as_ref()?.captures(line)?;
    let current: u32 = captures.get(1)?.as_str().parse().ok()?;
    let total: u32 = captures.get(2)?.as_str().parse().ok()?;
    Some(total.saturating_sub(current))
}
