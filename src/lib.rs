// src/lib.rs

//! Buildterm: the engine behind a package-manager build terminal
//!
//! Runs queued build/install commands one at a time, decodes their console
//! output as it streams in, and files each line into per-category logs.
//!
//! # Architecture
//!
//! - Job queue: FIFO with reordering; the head is the only job that runs
//!   or waits for a resume after a kill
//! - Process manager: spawns the head on a pseudo-terminal, handles kill,
//!   resume, skip and completion
//! - Output reader: background thread draining the child (or a replayed
//!   log) into a channel
//! - Decoder and classifier: escape stripping, carriage-return overwrite,
//!   line classification into info/warning/caution/error
//! - Line buffers: process, warning, caution and info logs

pub mod buffers;
pub mod classify;
pub mod config;
pub mod decoder;
mod error;
pub mod queue;
pub mod reader;
pub mod spawn;
pub mod supervisor;

pub use buffers::{BufferKind, Line, LineBuffers, LineTag};
pub use classify::{Classification, LineCategory, LineClassifier, PatternClassifier};
pub use config::{KilledHeadPolicy, TerminalConfig};
pub use decoder::{ByteStreamDecoder, DecodedLine, DecoderState};
pub use error::{Error, Result};
pub use queue::{Direction, JobCallback, JobId, JobInfo, JobStatus, JobSummary};
pub use reader::{InputSource, OutputEvent, OutputReader, SourceKind};
pub use spawn::{ChildExit, ChildHandle, PipeSpawner, PtySpawner, SpawnedProcess, Spawner};
pub use supervisor::{
    EnqueueOutcome, FixedDecision, KillOutcome, Outcome, OutputObserver, ProcessManager,
    ProcessState, ResumeDecision, ResumeOptions, ResumePrompt, RunReport,
};
