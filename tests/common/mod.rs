// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use buildterm::{ChildExit, ChildHandle, Error, Result, SpawnedProcess, Spawner, TerminalConfig};
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Exit code a scripted child reports after `^C`
pub const INTERRUPTED_EXIT: i32 = 130;

/// How a fake child behaves
#[derive(Debug, Clone)]
pub struct Script {
    pub output: Vec<u8>,
    pub exit_code: i32,
    /// Keep the output open until `^C` or a group kill
    pub hold_open: bool,
    /// Hand back a controlling terminal
    pub terminal: bool,
    pub fail_spawn: bool,
    /// Close the output at once but exit only after this long
    pub linger: Option<Duration>,
}

impl Script {
    /// Writes `output` and exits with `exit_code`
    pub fn exits(output: &str, exit_code: i32) -> Self {
        Self {
            output: output.as_bytes().to_vec(),
            exit_code,
            hold_open: false,
            terminal: true,
            fail_spawn: false,
            linger: None,
        }
    }

    /// Writes `output` and runs until interrupted
    pub fn runs(output: &str) -> Self {
        Self {
            hold_open: true,
            ..Self::exits(output, 0)
        }
    }

    pub fn fails_to_spawn() -> Self {
        Self {
            fail_spawn: true,
            ..Self::exits("", 0)
        }
    }

    pub fn without_terminal(mut self) -> Self {
        self.terminal = false;
        self
    }

    pub fn lingering(mut self, linger: Duration) -> Self {
        self.linger = Some(linger);
        self
    }
}

impl Default for Script {
    fn default() -> Self {
        Self::exits("", 0)
    }
}

/// Spawner that plays back scripts instead of running commands
///
/// Each spawn takes the next queued script, or the default one (empty
/// output, exit 0) when none is left. Spawned command lines are recorded.
#[derive(Clone, Default)]
pub struct FakeSpawner {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: Script) -> &Self {
        self.scripts.lock().push_back(script);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, command: &str, _env: &HashMap<String, String>) -> Result<SpawnedProcess> {
        self.commands.lock().push(command.to_string());
        let script = self.scripts.lock().pop_front().unwrap_or_default();

        if script.fail_spawn {
            return Err(Error::Spawn {
                command: command.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }

        let (tx, rx) = flume::unbounded();
        if !script.output.is_empty() {
            let _ = tx.send(script.output.clone());
        }

        let shared = Arc::new(FakeShared::default());
        if script.hold_open {
            *shared.sender.lock() = Some(tx);
        } else if let Some(linger) = script.linger {
            drop(tx);
            let shared = Arc::clone(&shared);
            let code = script.exit_code;
            thread::spawn(move || {
                thread::sleep(linger);
                shared.terminate(Some(code));
            });
        } else {
            drop(tx);
            *shared.exit.lock() = Some(ChildExit {
                code: Some(script.exit_code),
            });
        }

        let control: Option<Box<dyn Write + Send>> = if script.terminal {
            Some(Box::new(FakeTerminal(Arc::clone(&shared))))
        } else {
            None
        };

        Ok(SpawnedProcess {
            output: Box::new(FakeOutput {
                chunks: rx,
                pending: Vec::new(),
            }),
            control,
            child: Box::new(FakeChild(shared)),
        })
    }
}

#[derive(Default)]
struct FakeShared {
    /// Dropping the sender ends the output stream
    sender: Mutex<Option<Sender<Vec<u8>>>>,
    exit: Mutex<Option<ChildExit>>,
}

impl FakeShared {
    fn terminate(&self, code: Option<i32>) {
        self.sender.lock().take();
        let mut exit = self.exit.lock();
        if exit.is_none() {
            *exit = Some(ChildExit { code });
        }
    }
}

struct FakeOutput {
    chunks: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for FakeOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.chunks.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct FakeTerminal(Arc<FakeShared>);

impl Write for FakeTerminal {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.contains(&0x03) {
            self.0.terminate(Some(INTERRUPTED_EXIT));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct FakeChild(Arc<FakeShared>);

impl ChildHandle for FakeChild {
    fn id(&self) -> u32 {
        4242
    }

    fn try_wait(&mut self) -> io::Result<Option<ChildExit>> {
        Ok(*self.0.exit.lock())
    }

    fn wait(&mut self) -> io::Result<ChildExit> {
        loop {
            if let Some(exit) = *self.0.exit.lock() {
                return Ok(exit);
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn kill_group(&mut self) -> io::Result<()> {
        self.0.terminate(None);
        Ok(())
    }
}

/// Configuration with short polling intervals
pub fn test_config() -> TerminalConfig {
    let mut config = TerminalConfig::default();
    config.process.poll_interval_ms = 10;
    config.process.idle_interval_ms = 20;
    config
}

/// Upper bound for `run_until_idle` in tests
pub const SETTLE: Duration = Duration::from_secs(10);

/// Callback that counts its invocations
pub fn counting_callback(counter: &Arc<Mutex<usize>>) -> Box<dyn FnOnce() + Send> {
    let counter = Arc::clone(counter);
    Box::new(move || *counter.lock() += 1)
}
