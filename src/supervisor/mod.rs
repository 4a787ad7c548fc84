// src/supervisor/mod.rs

//! Process manager
//!
//! Runs the job queue one child at a time. The host drives it in two ways:
//! queue operations (enqueue, kill, resume, skip, remove, reorder), callable
//! from any thread, and [`ProcessManager::poll`], the consumer step that
//! drains the reader's event channel, decodes output into the line buffers
//! and handles end-of-stream.
//!
//! Locking: queue and process state sit behind one mutex, the decoder and
//! line buffers behind another. The two are never held together, and job
//! callbacks run after both are released.

mod command;
mod output;
mod prompt;

pub use command::{is_pretend, remaining_packages, resume_command};
pub use output::OutputObserver;
pub use prompt::{FixedDecision, ResumeDecision, ResumePrompt};

use crate::buffers::{BufferKind, Line, LineTag};
use crate::classify::{LineClassifier, PatternClassifier};
use crate::config::{KilledHeadPolicy, TerminalConfig};
use crate::error::{Error, Result};
use crate::queue::{
    Direction, JobCallback, JobHistory, JobId, JobInfo, JobQueue, JobStatus, JobSummary,
};
use crate::reader::{InputSource, OutputEvent, OutputReader, SourceKind};
use crate::spawn::{self, ChildExit, ChildHandle, SpawnedProcess, Spawner};
use chrono::Local;
use flume::{Receiver, Sender};
use output::{OutputState, RunCounters};
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Byte a terminal sends for `^C`
const INTERRUPT: u8 = 0x03;

const KILLED_NOTE: &str = "*** process killed ***";
const COMPLETED_NOTE: &str = "*** process completed ***";

/// Result of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// State of the child process slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Running,
    /// The head was killed and waits for resume, skip or remove.
    /// `resumable` is false after a hard kill.
    Killed { resumable: bool },
    /// The last job finished; counts as idle
    Completed(Outcome),
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Killed { resumable: true } => "killed",
            Self::Killed { resumable: false } => "terminated",
            Self::Completed(Outcome::Success) => "succeeded",
            Self::Completed(Outcome::Failure) => "failed",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What [`ProcessManager::enqueue`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued and started right away
    Started,
    Queued,
    /// Queued after dropping stale entries for the same package
    Requeued,
    /// The same job is already in the queue; nothing changed
    AlreadyQueued,
    /// The killed head was resumed instead of queueing a duplicate
    Resumed,
    /// The prompt cancelled; nothing changed
    Cancelled,
}

/// What [`ProcessManager::kill_active`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// `^C` sent through the terminal; the job can be resumed
    Interrupted,
    /// Process group killed
    Terminated,
    /// The log being replayed stops at the next read
    ReplayCancelled,
}

/// Which resume actions make sense right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeOptions {
    pub resume: bool,
    /// Packages remain after the one that was interrupted
    pub skip_first: bool,
    /// Other jobs wait behind the killed head
    pub skip_queue: bool,
}

/// Statistics of the last finished stream (job run or log replay)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub job: Option<JobId>,
    pub source: SourceKind,
    /// Command line actually run, resume flags included
    pub command: Option<String>,
    pub pretend: bool,
    pub warnings: usize,
    pub cautions: usize,
    pub hard_failure: bool,
    pub exit_code: Option<i32>,
    /// `None` when the run was killed or the replay cancelled
    pub outcome: Option<Outcome>,
    pub bytes_read: u64,
    pub bytes_decoded: u64,
    /// Process buffer line where the run's output starts
    pub command_start: usize,
}

impl RunReport {
    fn from_counters(counters: &RunCounters, source: SourceKind, bytes_read: u64) -> Self {
        Self {
            job: None,
            source,
            command: None,
            pretend: counters.pretend,
            warnings: counters.warnings,
            cautions: counters.cautions,
            hard_failure: counters.hard_failure,
            exit_code: None,
            outcome: None,
            bytes_read,
            bytes_decoded: counters.bytes_decoded,
            command_start: counters.command_start,
        }
    }
}

struct ActiveProcess {
    job: JobId,
    command: String,
    child: Box<dyn ChildHandle>,
    control: Option<Box<dyn Write + Send>>,
    /// Output has ended; the run finishes once the child is reaped
    ended: Option<EndedOutput>,
    /// Set once the child has been reaped
    exit: Option<ChildExit>,
}

struct EndedOutput {
    counters: RunCounters,
    bytes_read: u64,
}

struct Replay {
    path: PathBuf,
}

struct QueueState {
    queue: JobQueue,
    state: ProcessState,
    active: Option<ActiveProcess>,
    replay: Option<Replay>,
    history: JobHistory,
    last_report: Option<RunReport>,
}

impl QueueState {
    /// A spawned child has not been reaped yet
    fn child_alive(&self) -> bool {
        self.active.as_ref().is_some_and(|active| active.exit.is_none())
    }

    /// The reader is (or is about to be) draining something
    fn is_busy(&self) -> bool {
        self.child_alive() || self.replay.is_some()
    }

    fn head_resumable(&self) -> bool {
        matches!(self.state, ProcessState::Killed { .. })
            && !self.child_alive()
            && self
                .queue
                .head()
                .is_some_and(|head| head.status == JobStatus::Killed)
    }
}

/// Queue, child lifecycle and output consumer
pub struct ProcessManager {
    config: TerminalConfig,
    spawner: Box<dyn Spawner>,
    classifier: Arc<dyn LineClassifier>,
    prompt: Box<dyn ResumePrompt>,
    queue: Mutex<QueueState>,
    output: Mutex<OutputState>,
    /// Held by whoever runs `poll`; a second caller skips the tick
    consumer: Mutex<()>,
    events_tx: Sender<OutputEvent>,
    events_rx: Receiver<OutputEvent>,
    reader: OutputReader,
}

impl ProcessManager {
    /// Build a manager with the configured spawner and pattern classifier
    pub fn new(config: TerminalConfig) -> Result<Self> {
        config.validate()?;
        let classifier = PatternClassifier::from_config(&config.classifier)?;
        let spawner = spawn::spawner_for(&config.process.shell, config.process.use_pty);

        let (events_tx, events_rx) = flume::unbounded();
        let reader = OutputReader::spawn(
            events_tx.clone(),
            config.process.read_chunk_size,
            config.process.idle_interval(),
        )?;

        let queue = QueueState {
            queue: JobQueue::new(),
            state: ProcessState::Idle,
            active: None,
            replay: None,
            history: JobHistory::new(config.history.limit),
            last_report: None,
        };
        let output = OutputState::new(config.classifier.cache_marker.as_deref());

        Ok(Self {
            config,
            spawner,
            classifier: Arc::new(classifier),
            prompt: Box::new(FixedDecision::default()),
            queue: Mutex::new(queue),
            output: Mutex::new(output),
            consumer: Mutex::new(()),
            events_tx,
            events_rx,
            reader,
        })
    }

    pub fn with_spawner(mut self, spawner: impl Spawner + 'static) -> Self {
        self.spawner = Box::new(spawner);
        self
    }

    pub fn with_classifier(mut self, classifier: impl LineClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_prompt(mut self, prompt: impl ResumePrompt + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    pub fn with_observer(mut self, observer: impl OutputObserver + 'static) -> Self {
        self.output.get_mut().set_observer(Box::new(observer));
        self
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    // -- Queue operations ---------------------------------------------------

    /// Add a job, starting it if nothing else is running
    ///
    /// - the same `(package_name, command)` already queued: `AlreadyQueued`
    /// - the same job killed at the head: the [`ResumePrompt`] decides
    /// - other entries for the same package behind the head are dropped
    ///   (without their callbacks) and the job goes to the back: `Requeued`
    pub fn enqueue(
        &self,
        package_name: &str,
        command: &str,
        callback: Option<JobCallback>,
    ) -> Result<EnqueueOutcome> {
        let mut callback = callback;
        let mut callbacks = Vec::new();

        let outcome = loop {
            let mut qs = self.queue.lock();

            let killed_head = qs
                .queue
                .head()
                .filter(|head| head.matches(package_name, command))
                .filter(|_| qs.head_resumable())
                .map(|head| head.info());

            if let Some(killed) = killed_head {
                // Never hold the queue lock across the prompt
                drop(qs);
                let decision = self.prompt.decide(&killed);
                info!("{} enqueued again after kill: {}", killed.id, decision);

                let mut qs = self.queue.lock();
                let unchanged = qs.queue.head().is_some_and(|head| head.id == killed.id)
                    && qs.head_resumable();
                if !unchanged {
                    debug!("Queue changed while deciding, re-evaluating");
                    continue;
                }

                match decision {
                    ResumeDecision::Cancel => break EnqueueOutcome::Cancelled,
                    ResumeDecision::Resume => {
                        self.resume_locked(&mut qs, false, &mut callbacks)?;
                        break EnqueueOutcome::Resumed;
                    }
                    ResumeDecision::Execute => {
                        // The killed run is discarded, callback included
                        qs.queue.pop_front();
                        qs.active = None;
                        qs.state = ProcessState::Idle;
                        let id = qs.queue.push(package_name, command, callback.take());
                        self.start_head(&mut qs, &mut callbacks);
                        break placement(&qs, id, EnqueueOutcome::Queued);
                    }
                }
            }

            if qs.queue.iter().any(|job| job.matches(package_name, command)) {
                debug!("'{}' ({}) is already queued", package_name, command);
                break EnqueueOutcome::AlreadyQueued;
            }

            let stale = qs.queue.remove_stale(package_name);
            let id = qs.queue.push(package_name, command, callback.take());
            self.advance(&mut qs, &mut callbacks);

            let queued = if stale.is_empty() {
                EnqueueOutcome::Queued
            } else {
                EnqueueOutcome::Requeued
            };
            break placement(&qs, id, queued);
        };

        run_callbacks(callbacks);
        Ok(outcome)
    }

    /// Interrupt the running job, or cancel a log replay
    ///
    /// With a controlling terminal the job gets `^C` and stays resumable;
    /// without one, or when called again while the interrupted child is
    /// still alive, its process group is killed. The job stays at the head.
    pub fn kill_active(&self) -> Result<KillOutcome> {
        let mut qs = self.queue.lock();

        if let Some(replay) = qs.replay.as_ref() {
            if !self.reader.cancel() {
                return Err(Error::InvalidState(format!(
                    "{} has already been read",
                    replay.path.display()
                )));
            }
            info!("Cancelling replay of {}", replay.path.display());
            return Ok(KillOutcome::ReplayCancelled);
        }

        let state = qs.state;
        let QueueState { queue, active, state: process_state, .. } = &mut *qs;
        let Some(active) = active.as_mut().filter(|active| active.exit.is_none()) else {
            return Err(Error::InvalidState("No running process to kill".into()));
        };

        let outcome = match state {
            ProcessState::Running if send_interrupt(active) => {
                warn!("Interrupted {} (pid {})", active.job, active.child.id());
                *process_state = ProcessState::Killed { resumable: true };
                KillOutcome::Interrupted
            }
            ProcessState::Running | ProcessState::Killed { .. } => {
                warn!("Killing process group of {} (pid {})", active.job, active.child.id());
                active.child.kill_group()?;
                *process_state = ProcessState::Killed { resumable: false };
                KillOutcome::Terminated
            }
            _ => return Err(Error::InvalidState("No running process to kill".into())),
        };

        if let Some(head) = queue.head_mut() {
            head.status = JobStatus::Killed;
        }
        Ok(outcome)
    }

    /// Re-run the killed head with the resume flag (and the skip-first flag)
    ///
    /// Resuming continues the same job: its callback runs once, when the
    /// resumed run completes.
    pub fn resume(&self, skip_first: bool) -> Result<()> {
        let mut callbacks = Vec::new();
        {
            let mut qs = self.queue.lock();
            self.resume_locked(&mut qs, skip_first, &mut callbacks)?;
        }
        run_callbacks(callbacks);
        Ok(())
    }

    /// Drop the head without running it further, run its callback and
    /// start the next job
    pub fn skip_and_advance(&self) -> Result<JobId> {
        let mut callbacks = Vec::new();
        let skipped = {
            let mut qs = self.queue.lock();
            self.skip_locked(&mut qs, &mut callbacks)?
        };
        run_callbacks(callbacks);
        Ok(skipped)
    }

    /// Remove a job that is not running; its callback is not invoked
    pub fn remove(&self, id: JobId) -> Result<()> {
        let mut callbacks = Vec::new();
        {
            let mut qs = self.queue.lock();
            let position = qs.queue.position(id).ok_or(Error::JobNotFound(id))?;

            if position == 0 {
                if qs.child_alive() {
                    return Err(Error::InvalidState(format!(
                        "{} is running; kill or skip it first",
                        id
                    )));
                }
                qs.queue.pop_front();
                qs.active = None;
                qs.state = ProcessState::Idle;
                info!("Removed {} from the head of the queue", id);
                self.start_head(&mut qs, &mut callbacks);
            } else {
                qs.queue.remove_at(position);
                debug!("Removed {} from position {}", id, position);
            }
        }
        run_callbacks(callbacks);
        Ok(())
    }

    /// Swap a job with its neighbour; the head never moves
    pub fn reorder(&self, id: JobId, direction: Direction) -> Result<()> {
        self.queue.lock().queue.swap(id, direction)
    }

    /// Replay a saved log through the decoder
    pub fn open_log(&self, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|source| Error::LogOpen {
            path: path.to_path_buf(),
            source,
        })?;

        let mut qs = self.queue.lock();
        if qs.is_busy() || self.reader.is_busy() {
            return Err(Error::InvalidState(
                "Cannot load a log while a process or another log is being read".into(),
            ));
        }

        let _ = self.events_tx.send(OutputEvent::ReplayStarted {
            path: path.to_path_buf(),
        });
        self.reader.attach(InputSource::Log {
            file,
            path: path.to_path_buf(),
        })?;
        qs.replay = Some(Replay {
            path: path.to_path_buf(),
        });

        info!("Replaying {}", path.display());
        Ok(())
    }

    // -- Consumer step ------------------------------------------------------

    /// Drain every pending output event and reap a child whose output has
    /// ended; returns how many events (and completions) were handled
    ///
    /// Never blocks: if another thread is already polling, this call
    /// returns 0 and leaves the work to it.
    pub fn poll(&self) -> usize {
        let Some(_consumer) = self.consumer.try_lock() else {
            return 0;
        };

        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            handled += 1;
            match event {
                OutputEvent::JobStarted { job, command, pretend } => {
                    debug!("Output of {} starts", job);
                    self.output.lock().begin_job(&command, pretend);
                }
                OutputEvent::ReplayStarted { path } => {
                    let status = format!("*** Loading File : {}", path.display());
                    self.output.lock().begin_replay(status);
                }
                OutputEvent::Notice { text, tag } => {
                    let mut output = self.output.lock();
                    output.note_all(&text, tag);
                    output.set_status(text);
                }
                OutputEvent::Data(bytes) => {
                    self.output.lock().consume(&bytes, self.classifier.as_ref());
                }
                OutputEvent::EndOfStream {
                    kind,
                    bytes_read,
                    cancelled,
                } => {
                    let counters = self.output.lock().finish_run(self.classifier.as_ref());
                    match kind {
                        SourceKind::Process => self.output_ended(counters, bytes_read),
                        SourceKind::Log => self.replay_done(&counters, bytes_read, cancelled),
                    }
                }
            }
        }

        // A child that closed its output early is reaped on a later tick
        if self.reap_exited() {
            handled += 1;
        }
        handled
    }

    /// Nothing is running or replaying and no output is waiting
    pub fn is_settled(&self) -> bool {
        let busy = self.queue.lock().is_busy();
        !busy && self.events_rx.is_empty() && !self.reader.is_busy()
    }

    /// Poll every `poll_interval` until settled; false on timeout
    pub fn run_until_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            self.poll();
            if self.is_settled() {
                return true;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return false;
            }
            thread::sleep(self.config.process.poll_interval());
        }
    }

    // -- Views --------------------------------------------------------------

    pub fn state(&self) -> ProcessState {
        self.queue.lock().state
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        self.queue.lock().queue.iter().map(|job| job.info()).collect()
    }

    pub fn history(&self) -> Vec<JobSummary> {
        self.queue.lock().history.entries()
    }

    pub fn is_replaying(&self) -> bool {
        self.queue.lock().replay.is_some()
    }

    pub fn last_report(&self) -> Option<RunReport> {
        self.queue.lock().last_report.clone()
    }

    pub fn lines(&self, kind: BufferKind) -> Vec<Line> {
        self.output.lock().buffers.lines(kind).to_vec()
    }

    /// Process lines written since the last job or replay started
    pub fn last_command_output(&self) -> Vec<Line> {
        let output = self.output.lock();
        output.buffers.lines_since(output.counters.command_start).to_vec()
    }

    pub fn status_message(&self) -> String {
        self.output.lock().status.clone()
    }

    pub fn resume_options(&self) -> ResumeOptions {
        let (resume, queued) = {
            let qs = self.queue.lock();
            (qs.head_resumable(), qs.queue.len())
        };
        if !resume {
            return ResumeOptions::default();
        }

        let remaining = self
            .output
            .lock()
            .resume_line
            .as_deref()
            .and_then(remaining_packages)
            .unwrap_or(0);

        ResumeOptions {
            resume,
            skip_first: remaining > 0,
            skip_queue: queued > 1,
        }
    }

    pub fn clear_buffers(&self) {
        self.output.lock().clear();
    }

    /// Save one buffer to a file (see [`crate::buffers::LineBuffers::save`])
    pub fn save_buffer(&self, kind: BufferKind, path: &Path) -> Result<()> {
        let mut output = self.output.lock();
        output.buffers.save(kind, path)?;
        output.set_status(format!("*** File saved : {}", path.display()));
        Ok(())
    }

    // -- Internals (queue lock held) ----------------------------------------

    /// Start whatever the head needs once nothing is running
    fn advance(&self, qs: &mut QueueState, callbacks: &mut Vec<JobCallback>) {
        if qs.is_busy() {
            return;
        }

        match qs.queue.head().map(|head| head.status) {
            Some(JobStatus::Killed) => {
                if qs.state != (ProcessState::Killed { resumable: true }) {
                    // Hard-killed heads wait for an explicit resume or skip
                    return;
                }
                match self.config.resume.killed_head {
                    KilledHeadPolicy::Resume => {
                        if let Err(e) = self.resume_locked(qs, false, callbacks) {
                            warn!("Could not resume killed head: {}", e);
                        }
                    }
                    KilledHeadPolicy::Skip => {
                        if let Err(e) = self.skip_locked(qs, callbacks) {
                            warn!("Could not skip killed head: {}", e);
                        }
                    }
                }
            }
            Some(_) => self.start_head(qs, callbacks),
            None => {}
        }
    }

    /// Run pending heads until one starts or the queue is empty
    fn start_head(&self, qs: &mut QueueState, callbacks: &mut Vec<JobCallback>) {
        while !qs.is_busy() {
            let Some(command) = qs
                .queue
                .head()
                .filter(|head| head.status == JobStatus::Pending)
                .map(|head| head.command.clone())
            else {
                return;
            };
            if self.launch(qs, command, callbacks) {
                return;
            }
        }
    }

    /// Spawn `command` for the head job
    ///
    /// A spawn failure fails the job, pops it and queues its callback;
    /// returns whether a child is now running.
    fn launch(&self, qs: &mut QueueState, command: String, callbacks: &mut Vec<JobCallback>) -> bool {
        let Some(job) = qs.queue.head().map(|head| head.id) else {
            return false;
        };
        let pretend = is_pretend(&command);

        // Queued ahead of the child's first byte
        let _ = self.events_tx.send(OutputEvent::JobStarted {
            job,
            command: command.clone(),
            pretend,
        });

        let started = self
            .spawner
            .spawn(&command, &self.config.process.environment)
            .and_then(|process| {
                let SpawnedProcess {
                    output,
                    control,
                    mut child,
                } = process;
                match self.reader.attach(InputSource::Process(output)) {
                    Ok(()) => Ok((control, child)),
                    Err(e) => {
                        let _ = child.kill_group();
                        let _ = child.wait();
                        Err(e)
                    }
                }
            });

        match started {
            Ok((control, child)) => {
                info!("Started {} (pid {}): {}", job, child.id(), command);
                if let Some(head) = qs.queue.head_mut() {
                    head.status = JobStatus::Running;
                    head.started_at = Some(Local::now());
                }
                qs.state = ProcessState::Running;
                qs.active = Some(ActiveProcess {
                    job,
                    command,
                    child,
                    control,
                    ended: None,
                    exit: None,
                });
                true
            }
            Err(e) => {
                warn!("Failed to start {}: {}", job, e);
                let _ = self.events_tx.send(OutputEvent::Notice {
                    text: format!("*** {} ***", e),
                    tag: LineTag::Error,
                });
                self.finish_head(qs, JobStatus::Failed, callbacks);
                qs.state = ProcessState::Completed(Outcome::Failure);
                qs.last_report = Some(RunReport {
                    job: Some(job),
                    command: Some(command),
                    pretend,
                    outcome: Some(Outcome::Failure),
                    ..RunReport::from_counters(&RunCounters::default(), SourceKind::Process, 0)
                });
                false
            }
        }
    }

    fn resume_locked(
        &self,
        qs: &mut QueueState,
        skip_first: bool,
        callbacks: &mut Vec<JobCallback>,
    ) -> Result<()> {
        if qs.replay.is_some() {
            return Err(Error::InvalidState("A log is being replayed".into()));
        }
        let Some(head) = qs.queue.head() else {
            return Err(Error::InvalidState("The queue is empty".into()));
        };
        if head.status != JobStatus::Killed || !matches!(qs.state, ProcessState::Killed { .. }) {
            return Err(Error::InvalidState(format!("{} has not been killed", head.id)));
        }
        if qs.child_alive() {
            return Err(Error::InvalidState(format!(
                "{} has not exited yet",
                head.id
            )));
        }

        let command = resume_command(&head.command, skip_first, &self.config.resume);
        info!("Resuming {}: {}", head.id, command);

        qs.active = None;
        if !self.launch(qs, command, callbacks) {
            self.start_head(qs, callbacks);
        }
        Ok(())
    }

    fn skip_locked(&self, qs: &mut QueueState, callbacks: &mut Vec<JobCallback>) -> Result<JobId> {
        if qs.child_alive() {
            return Err(Error::InvalidState(
                "The head of the queue is running; kill it first".into(),
            ));
        }
        let Some(id) = qs.queue.head().map(|head| head.id) else {
            return Err(Error::InvalidState("The queue is empty".into()));
        };

        self.finish_head(qs, JobStatus::Skipped, callbacks);
        qs.state = ProcessState::Idle;
        self.start_head(qs, callbacks);
        Ok(id)
    }

    /// Pop the head with its final status and queue its callback
    fn finish_head(&self, qs: &mut QueueState, status: JobStatus, callbacks: &mut Vec<JobCallback>) {
        qs.active = None;
        if let Some(mut job) = qs.queue.pop_front() {
            job.status = status;
            info!("{} '{}' {}", job.id, job.package_name, status);
            qs.history.record(&job);
            if let Some(callback) = job.callback.take() {
                callbacks.push(callback);
            }
        }
    }

    // -- End of stream (consumer thread) ------------------------------------

    fn output_ended(&self, counters: RunCounters, bytes_read: u64) {
        {
            let mut qs = self.queue.lock();
            match qs.active.as_mut().filter(|active| active.exit.is_none()) {
                Some(active) => active.ended = Some(EndedOutput { counters, bytes_read }),
                None => {
                    debug!("Output ended with no child to reap");
                    return;
                }
            }
        }
        self.reap_exited();
    }

    /// Finish the run whose output has ended, if its child has exited
    ///
    /// Only ever calls `try_wait`; a child still running after closing its
    /// output keeps the job `Running` until a later tick reaps it.
    fn reap_exited(&self) -> bool {
        let mut callbacks = Vec::new();

        let killed = {
            let mut qs = self.queue.lock();

            let Some(active) = qs
                .active
                .as_mut()
                .filter(|active| active.ended.is_some() && active.exit.is_none())
            else {
                return false;
            };

            let exit = match active.child.try_wait() {
                Ok(Some(exit)) => exit,
                Ok(None) => return false,
                Err(e) => {
                    warn!("Failed to reap pid {}: {}", active.child.id(), e);
                    ChildExit { code: None }
                }
            };
            active.exit = Some(exit);
            let Some(ended) = active.ended.take() else {
                return false;
            };
            let (job, command) = (active.job, active.command.clone());

            let killed = matches!(qs.state, ProcessState::Killed { .. });
            let outcome = if killed {
                info!("Killed job exited ({:?}); waiting for resume or skip", exit.code);
                None
            } else if ended.counters.hard_failure || !exit.success() {
                Some(Outcome::Failure)
            } else {
                Some(Outcome::Success)
            };

            qs.last_report = Some(RunReport {
                job: Some(job),
                command: Some(command),
                exit_code: exit.code,
                outcome,
                ..RunReport::from_counters(&ended.counters, SourceKind::Process, ended.bytes_read)
            });

            if let Some(outcome) = outcome {
                let status = match outcome {
                    Outcome::Success => JobStatus::Succeeded,
                    Outcome::Failure => JobStatus::Failed,
                };
                self.finish_head(&mut qs, status, &mut callbacks);
                qs.state = ProcessState::Completed(outcome);
                self.start_head(&mut qs, &mut callbacks);
            }
            killed
        };

        {
            let mut output = self.output.lock();
            if killed {
                output.note_all(KILLED_NOTE, LineTag::Note);
                output.set_status(KILLED_NOTE);
            } else {
                output.write_summary();
                output.note_all(COMPLETED_NOTE, LineTag::Note);
                output.set_status(COMPLETED_NOTE);
            }
        }

        run_callbacks(callbacks);
        true
    }

    fn replay_done(&self, counters: &RunCounters, bytes_read: u64, cancelled: bool) {
        let mut callbacks = Vec::new();

        let replay = {
            let mut qs = self.queue.lock();
            let replay = qs.replay.take();
            let outcome = match (cancelled, counters.hard_failure) {
                (true, _) => None,
                (false, true) => Some(Outcome::Failure),
                (false, false) => Some(Outcome::Success),
            };
            qs.last_report = Some(RunReport {
                outcome,
                ..RunReport::from_counters(counters, SourceKind::Log, bytes_read)
            });
            // Jobs queued during the replay
            self.advance(&mut qs, &mut callbacks);
            replay
        };

        {
            let mut output = self.output.lock();
            output.write_summary();
            let path = replay
                .as_ref()
                .map(|replay| replay.path.display().to_string())
                .unwrap_or_default();
            let status = if cancelled {
                format!("*** Log loading cancelled : {}", path)
            } else {
                format!("*** Log loading complete : {}", path)
            };
            info!("{}", status);
            output.set_status(status);
        }

        run_callbacks(callbacks);
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        let qs = self.queue.get_mut();
        if let Some(active) = qs.active.as_mut().filter(|active| active.exit.is_none()) {
            warn!("Killing {} (pid {}) on shutdown", active.job, active.child.id());
            if active.child.kill_group().is_ok() {
                let _ = active.child.wait();
            }
        }
        self.reader.shutdown();
    }
}

fn placement(qs: &QueueState, id: JobId, queued: EnqueueOutcome) -> EnqueueOutcome {
    let started = qs.state == ProcessState::Running
        && qs.queue.head().is_some_and(|head| head.id == id);
    if started {
        EnqueueOutcome::Started
    } else {
        queued
    }
}

/// Write `^C` to the controlling terminal, if there is one
fn send_interrupt(active: &mut ActiveProcess) -> bool {
    let Some(control) = active.control.as_mut() else {
        return false;
    };
    match control.write_all(&[INTERRUPT]).and_then(|()| control.flush()) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not send interrupt to pid {}: {}", active.child.id(), e);
            false
        }
    }
}

fn run_callbacks(callbacks: Vec<JobCallback>) {
    for callback in callbacks {
        callback();
    }
}
