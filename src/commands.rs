// src/commands.rs
//! Command handlers for the buildterm CLI

use anyhow::{Context, Result, anyhow, bail};
use buildterm::{
    BufferKind, JobStatus, Line, OutputObserver, ProcessManager, RunReport, TerminalConfig,
};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::interrupt;

/// Prints process-buffer lines to stdout as they arrive
struct StdoutSink {
    quiet: bool,
}

impl OutputObserver for StdoutSink {
    fn on_line(&self, kind: BufferKind, line: &Line, _overwrite: bool) {
        if self.quiet || kind != BufferKind::Process {
            return;
        }
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", line.numbered());
    }

    fn on_status(&self, status: &str) {
        debug!("status: {}", status);
    }
}

/// Split `NAME=COMMAND`
fn parse_job(spec: &str) -> Result<(&str, &str)> {
    let (name, command) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("Job '{}' is not of the form NAME=COMMAND", spec))?;
    let (name, command) = (name.trim(), command.trim());
    if name.is_empty() || command.is_empty() {
        bail!("Job '{}' needs both a name and a command", spec);
    }
    Ok((name, command))
}

/// Where to save logs after a run, and which ones
pub struct SaveTarget<'a> {
    dir: &'a Path,
    kinds: Vec<BufferKind>,
}

/// Resolve `--save-dir` and `--buffers`; no names means every log
pub fn save_target<'a>(dir: Option<&'a Path>, names: &[String]) -> Result<Option<SaveTarget<'a>>> {
    let kinds = parse_buffers(names)?;
    Ok(dir.map(|dir| SaveTarget { dir, kinds }))
}

fn parse_buffers(names: &[String]) -> Result<Vec<BufferKind>> {
    if names.is_empty() {
        return Ok(BufferKind::all().to_vec());
    }
    let mut kinds = Vec::new();
    for name in names {
        let kind = BufferKind::parse(name.trim()).ok_or_else(|| {
            anyhow!(
                "Unknown log '{}' (expected process, warning, caution or info)",
                name
            )
        })?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

fn save_all(manager: &ProcessManager, target: &SaveTarget<'_>) -> Result<()> {
    let dir = target.dir;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    for kind in &target.kinds {
        let path = dir.join(format!("{}.log", kind));
        manager.save_buffer(*kind, &path)?;
        info!("Saved {} log to {}", kind, path.display());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "Warnings: {}  Cautions: {}  Bytes: {}",
        report.warnings, report.cautions, report.bytes_decoded
    );
    if report.hard_failure {
        println!("Fatal errors were reported");
    }
}

/// Run jobs through the queue until all are done
pub fn cmd_run(
    mut config: TerminalConfig,
    jobs: &[String],
    no_pty: bool,
    save: Option<SaveTarget<'_>>,
    quiet: bool,
) -> Result<()> {
    if no_pty {
        config.process.use_pty = false;
    }

    let parsed = jobs
        .iter()
        .map(|spec| parse_job(spec))
        .collect::<Result<Vec<_>>>()?;

    let manager = Arc::new(ProcessManager::new(config)?.with_observer(StdoutSink { quiet }));
    let _interrupts = interrupt::install(Arc::downgrade(&manager))?;

    for (name, command) in parsed {
        let outcome = manager.enqueue(name, command, None)?;
        info!("{}: {:?}", name, outcome);
    }

    manager.run_until_idle(None);

    println!();
    println!("{}", manager.status_message());
    if let Some(report) = manager.last_report() {
        print_report(&report);
    }

    let history = manager.history();
    for summary in &history {
        println!(
            "  [{:>9}] {} ({})",
            summary.status.as_str(),
            summary.package_name,
            summary.command
        );
    }

    if let Some(target) = &save {
        save_all(&manager, target)?;
    }

    // Jobs left behind after a kill
    let leftover = manager.jobs();
    if !leftover.is_empty() {
        bail!("{} job(s) did not finish", leftover.len());
    }

    let failed = history
        .iter()
        .filter(|summary| summary.status == JobStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{} of {} job(s) failed", failed, history.len());
    }
    Ok(())
}

/// Replay a log file and print its classification summary
pub fn cmd_replay(
    config: TerminalConfig,
    file: &Path,
    save: Option<SaveTarget<'_>>,
    quiet: bool,
) -> Result<()> {
    let manager = Arc::new(ProcessManager::new(config)?.with_observer(StdoutSink { quiet }));
    let _interrupts = interrupt::install(Arc::downgrade(&manager))?;
    manager.open_log(file)?;
    manager.run_until_idle(None);

    println!();
    println!("{}", manager.status_message());
    if let Some(report) = manager.last_report() {
        print_report(&report);
    }

    for kind in [BufferKind::Warning, BufferKind::Caution, BufferKind::Info] {
        println!("{}: {} line(s)", kind, manager.lines(kind).len());
    }

    if let Some(target) = &save {
        save_all(&manager, target)?;
    }
    Ok(())
}

/// Print the effective configuration
pub fn cmd_show_config(config: &TerminalConfig) -> Result<()> {
    if let Some(path) = TerminalConfig::default_path() {
        println!("# default path: {}", path.display());
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
