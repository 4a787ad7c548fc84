// src/spawn.rs

//! Child process spawning
//!
//! A [`Spawner`] runs a shell command line and hands back the merged
//! output stream, an optional controlling-terminal writer (used for soft
//! interrupts) and a handle on the child. [`PtySpawner`] attaches the child
//! to a fresh pseudo-terminal so line discipline and `^C` work the way they
//! do in an interactive terminal; [`PipeSpawner`] uses a plain pipe.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::pty::{OpenptyResult, Winsize, openpty};
use nix::sys::signal::{Signal, killpg};
use nix::sys::termios::Termios;
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, warn};

/// Exit information of a reaped child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Exit code, `None` when the child died from a signal
    pub code: Option<i32>,
}

impl ChildExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Handle on a running child process
pub trait ChildHandle: Send {
    fn id(&self) -> u32;

    /// Reap the child if it has exited, without blocking
    fn try_wait(&mut self) -> io::Result<Option<ChildExit>>;

    /// Block until the child exits
    fn wait(&mut self) -> io::Result<ChildExit>;

    /// SIGKILL the child's whole process group
    fn kill_group(&mut self) -> io::Result<()>;
}

/// A freshly started child
pub struct SpawnedProcess {
    /// Merged stdout/stderr
    pub output: Box<dyn Read + Send>,
    /// Controlling terminal, when the child has one
    pub control: Option<Box<dyn Write + Send>>,
    pub child: Box<dyn ChildHandle>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.child.id())
            .field("control", &self.control.is_some())
            .finish()
    }
}

/// Starts shell command lines
pub trait Spawner: Send + Sync {
    fn spawn(&self, command: &str, env: &HashMap<String, String>) -> Result<SpawnedProcess>;
}

/// [`ChildHandle`] over a std child that leads its own process group
#[derive(Debug)]
pub struct OsChild {
    child: Child,
}

impl OsChild {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

impl ChildHandle for OsChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ChildExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ChildExit { code: status.code() }))
    }

    fn wait(&mut self) -> io::Result<ChildExit> {
        let status = self.child.wait()?;
        Ok(ChildExit {
            code: status.code(),
        })
    }

    fn kill_group(&mut self) -> io::Result<()> {
        let pgid = Pid::from_raw(self.child.id() as i32);
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

fn shell_command(shell: &Path, command: &str, env: &HashMap<String, String>) -> Command {
    let mut cmd = Command::new(shell);
    cmd.arg("-c").arg(command).envs(env);
    cmd
}

fn spawn_error(command: &str, source: io::Error) -> Error {
    Error::Spawn {
        command: command.to_string(),
        source,
    }
}

/// Runs commands on a new pseudo-terminal
#[derive(Debug, Clone)]
pub struct PtySpawner {
    shell: PathBuf,
}

impl PtySpawner {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for PtySpawner {
    fn default() -> Self {
        Self::new("/bin/sh")
    }
}

impl Spawner for PtySpawner {
    fn spawn(&self, command: &str, env: &HashMap<String, String>) -> Result<SpawnedProcess> {
        let OpenptyResult { master, slave } =
            openpty(None::<&Winsize>, None::<&Termios>).map_err(|e| spawn_error(command, e.into()))?;

        let master_fd = master.as_raw_fd();
        let slave_fd = slave.as_raw_fd();

        let mut cmd = shell_command(&self.shell, command, env);
        cmd.stdin(Stdio::from(slave.try_clone()?))
            .stdout(Stdio::from(slave.try_clone()?))
            .stderr(Stdio::from(slave.try_clone()?));

        // SAFETY: the hook runs in the forked child before exec and only
        // makes async-signal-safe calls. Stdio is already on fds 0-2.
        unsafe {
            cmd.pre_exec(move || {
                // New session, with the pty slave as controlling terminal
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                // The openpty descriptors are inherited; the child keeps only 0-2
                libc::close(master_fd);
                if slave_fd > 2 {
                    libc::close(slave_fd);
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| spawn_error(command, e))?;
        // The parent must not hold the slave side, or EOF never arrives
        drop(cmd);
        drop(slave);

        debug!("Spawned pid {} on a pty: {}", child.id(), command);

        let output = File::from(master);
        let control = output.try_clone()?;

        Ok(SpawnedProcess {
            output: Box::new(PtyOutput(output)),
            control: Some(Box::new(control)),
            child: Box::new(OsChild::new(child)),
        })
    }
}

/// Pty master that reports the post-exit EIO as end of file
struct PtyOutput(File);

impl Read for PtyOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf) {
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(0),
            other => other,
        }
    }
}

/// Runs commands with stdout and stderr on one pipe, no terminal
///
/// Kills through this spawner are always hard kills.
#[derive(Debug, Clone)]
pub struct PipeSpawner {
    shell: PathBuf,
}

impl PipeSpawner {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for PipeSpawner {
    fn default() -> Self {
        Self::new("/bin/sh")
    }
}

impl Spawner for PipeSpawner {
    fn spawn(&self, command: &str, env: &HashMap<String, String>) -> Result<SpawnedProcess> {
        let (reader, writer) = io::pipe().map_err(|e| spawn_error(command, e))?;

        let mut cmd = shell_command(&self.shell, command, env);
        cmd.stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer)
            .process_group(0);

        let child = cmd.spawn().map_err(|e| spawn_error(command, e))?;
        drop(cmd);

        debug!("Spawned pid {} on a pipe: {}", child.id(), command);

        Ok(SpawnedProcess {
            output: Box::new(reader),
            control: None,
            child: Box::new(OsChild::new(child)),
        })
    }
}

/// Pick the spawner the configuration asks for
pub fn spawner_for(shell: &Path, use_pty: bool) -> Box<dyn Spawner> {
    if use_pty {
        Box::new(PtySpawner::new(shell))
    } else {
        warn!("Running without a pseudo-terminal; kills cannot be resumed");
        Box::new(PipeSpawner::new(shell))
    }
}
