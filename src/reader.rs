// src/reader.rs

//! Background output reader
//!
//! One long-lived thread drains whatever source is attached (the output of
//! the running job, or a log file being replayed) and forwards the bytes,
//! in read order, over the event channel that the consumer polls. The
//! end-of-stream marker goes through the same channel behind the last
//! chunk, so the consumer has decoded every byte before it sees the marker.

use crate::buffers::LineTag;
use crate::error::{Error, Result};
use crate::queue::JobId;
use flume::{Receiver, RecvTimeoutError, Sender};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// What the reader is draining
pub enum InputSource {
    /// Output of a live child process
    Process(Box<dyn Read + Send>),
    /// Saved log replayed through the decoder
    Log { file: File, path: PathBuf },
}

impl InputSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Process(_) => SourceKind::Process,
            Self::Log { .. } => SourceKind::Log,
        }
    }

    fn into_reader(self) -> Box<dyn Read + Send> {
        match self {
            Self::Process(reader) => reader,
            Self::Log { file, .. } => Box::new(file),
        }
    }
}

impl std::fmt::Debug for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process(_) => f.write_str("InputSource::Process"),
            Self::Log { path, .. } => write!(f, "InputSource::Log({})", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Process,
    Log,
}

/// Everything the consumer handles, in the order it must handle it
///
/// Data and end-of-stream come from the reader thread; the other events are
/// queued by the process manager so that they stay ordered with the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// A job is about to be spawned
    JobStarted {
        job: JobId,
        command: String,
        pretend: bool,
    },
    /// A log file is about to be replayed
    ReplayStarted { path: PathBuf },
    /// Engine note for every buffer (spawn failures and the like)
    Notice { text: String, tag: LineTag },
    /// Raw bytes, in read order
    Data(Vec<u8>),
    /// The attached source is exhausted, failed or was cancelled
    EndOfStream {
        kind: SourceKind,
        bytes_read: u64,
        /// Stopped by [`OutputReader::cancel`] before the source ran dry
        cancelled: bool,
    },
}

enum ReaderCommand {
    Attach(InputSource),
}

/// Handle on the reader thread
pub struct OutputReader {
    commands: Sender<ReaderCommand>,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    bytes_read: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl OutputReader {
    /// Start the reader thread
    ///
    /// `chunk_size` bounds every read; `idle_interval` is how often the idle
    /// thread wakes up to check whether it should stop.
    pub fn spawn(events: Sender<OutputEvent>, chunk_size: usize, idle_interval: Duration) -> Result<Self> {
        let (commands, receiver) = flume::unbounded();
        let busy = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let bytes_read = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            commands: receiver,
            events,
            busy: Arc::clone(&busy),
            cancel: Arc::clone(&cancel),
            running: Arc::clone(&running),
            bytes_read: Arc::clone(&bytes_read),
            chunk_size: chunk_size.max(1),
            idle_interval,
        };

        let handle = thread::Builder::new()
            .name("output-reader".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            commands,
            busy,
            cancel,
            running,
            bytes_read,
            handle: Some(handle),
        })
    }

    /// Hand a source to the reader
    ///
    /// Only one source is drained at a time; attaching while busy fails
    /// with [`Error::InvalidState`].
    pub fn attach(&self, source: InputSource) -> Result<()> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState(
                "Output reader is already draining a source".into(),
            ));
        }

        debug!("Attaching {:?}", source);
        self.cancel.store(false, Ordering::SeqCst);
        self.bytes_read.store(0, Ordering::SeqCst);

        if self.commands.send(ReaderCommand::Attach(source)).is_err() {
            self.busy.store(false, Ordering::SeqCst);
            return Err(Error::Reader("Output reader thread has stopped".into()));
        }
        Ok(())
    }

    /// Stop draining at the next read boundary
    ///
    /// Returns false when nothing is being drained. A cancel that lands
    /// after the last read is reported as `cancelled: false` in the
    /// end-of-stream event.
    pub fn cancel(&self) -> bool {
        if !self.is_busy() {
            return false;
        }
        self.cancel.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Bytes read from the current (or last) source
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }

    /// Stop the thread
    ///
    /// A thread blocked on a live process read cannot be woken; it is
    /// detached instead of joined and exits once that read returns.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.store(true, Ordering::SeqCst);

        if let Some(handle) = self.handle.take() {
            if self.is_busy() {
                debug!("Output reader busy at shutdown, detaching");
                return;
            }
            if let Err(e) = handle.join() {
                error!("Output reader thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for OutputReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    commands: Receiver<ReaderCommand>,
    events: Sender<OutputEvent>,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    bytes_read: Arc<AtomicU64>,
    chunk_size: usize,
    idle_interval: Duration,
}

impl Worker {
    fn run(self) {
        debug!("Output reader started");

        while self.running.load(Ordering::SeqCst) {
            // Use recv_timeout to allow checking the running flag
            match self.commands.recv_timeout(self.idle_interval) {
                Ok(ReaderCommand::Attach(source)) => self.drain(source),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("Output reader stopped");
    }

    fn drain(&self, source: InputSource) {
        let kind = source.kind();
        let mut reader = source.into_reader();
        let mut buf = vec![0u8; self.chunk_size];
        let mut total: u64 = 0;
        let mut cancelled = false;

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!("Reading cancelled after {} bytes", total);
                cancelled = true;
                break;
            }

            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    total += n as u64;
                    self.bytes_read.fetch_add(n as u64, Ordering::SeqCst);
                    trace!("Read {} bytes", n);
                    if self.events.send(OutputEvent::Data(buf[..n].to_vec())).is_err() {
                        debug!("Event receiver gone, abandoning source");
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // A dead child and a finished one look the same from here
                    debug!("Read failed, treating as end of stream: {}", e);
                    break;
                }
            }
        }

        // Close the descriptor before reporting, and be attachable again by
        // the time the consumer sees the marker
        drop(reader);
        self.cancel.store(false, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);

        let _ = self.events.send(OutputEvent::EndOfStream {
            kind,
            bytes_read: total,
            cancelled,
        });
    }
}
