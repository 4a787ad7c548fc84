// src/supervisor/output.rs

//! Consumer-side output state: decoder, line buffers and per-run counters
//!
//! Everything here lives behind the process manager's output lock and is
//! only touched by the consumer step and by the read-only views.

use crate::buffers::{BufferKind, Line, LineBuffers, LineTag};
use crate::classify::{LineCategory, LineClassifier};
use crate::decoder::{ByteStreamDecoder, DecodedLine};

/// Receives buffer updates as the consumer applies them
///
/// Called with the output lock held: implementations must not call back
/// into the process manager.
pub trait OutputObserver: Send {
    /// A line was appended to (or, with `overwrite`, replaced in) a buffer
    fn on_line(&self, kind: BufferKind, line: &Line, overwrite: bool);

    fn on_status(&self, _status: &str) {}
}

/// Counters for the stream being decoded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunCounters {
    pub warnings: usize,
    pub cautions: usize,
    pub hard_failure: bool,
    pub pretend: bool,
    /// Process buffer length when the run started
    pub command_start: usize,
    pub bytes_decoded: u64,
    /// Replaying a log rather than running a job
    pub replay: bool,
}

pub(crate) struct OutputState {
    decoder: ByteStreamDecoder,
    pub buffers: LineBuffers,
    pub counters: RunCounters,
    /// Last "emerge (x of y)" line of a live run
    pub resume_line: Option<String>,
    pub status: String,
    observer: Option<Box<dyn OutputObserver>>,
}

impl OutputState {
    pub fn new(cache_marker: Option<&str>) -> Self {
        let decoder = match cache_marker {
            Some(marker) => ByteStreamDecoder::new().with_cache_marker(marker),
            None => ByteStreamDecoder::new(),
        };
        Self {
            decoder,
            buffers: LineBuffers::new(),
            counters: RunCounters::default(),
            resume_line: None,
            status: String::new(),
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn OutputObserver>) {
        self.observer = Some(observer);
    }

    /// Reset per-run state and echo the command into every buffer
    pub fn begin_job(&mut self, command: &str, pretend: bool) {
        self.begin_run(false, pretend);
        let echo = format!("*** {} ***", command);
        self.note_all(&echo, LineTag::Command);
        self.set_status(echo);
    }

    pub fn begin_replay(&mut self, status: String) {
        self.begin_run(true, false);
        self.set_status(status);
    }

    fn begin_run(&mut self, replay: bool, pretend: bool) {
        self.decoder.reset();
        self.counters = RunCounters {
            pretend,
            replay,
            command_start: self.buffers.len(BufferKind::Process),
            ..RunCounters::default()
        };
    }

    pub fn consume(&mut self, bytes: &[u8], classifier: &dyn LineClassifier) {
        self.counters.bytes_decoded += bytes.len() as u64;
        for line in self.decoder.feed(bytes, classifier) {
            self.route(line);
        }
    }

    /// Flush the decoder at end of stream and hand back the run's counters
    pub fn finish_run(&mut self, classifier: &dyn LineClassifier) -> RunCounters {
        if let Some(line) = self.decoder.finish(classifier) {
            self.route(line);
        }
        self.counters.clone()
    }

    /// Warning/caution totals into the info buffer
    pub fn write_summary(&mut self) {
        let counters = self.counters.clone();
        if counters.warnings > 0 {
            let text = format!("*** Total warnings count for merge = {}", counters.warnings);
            self.push(BufferKind::Info, None, text, Some(LineTag::Note));
        }
        if counters.cautions > 0 {
            let text = format!("*** Total cautions count for merge = {}", counters.cautions);
            self.push(BufferKind::Info, None, text, Some(LineTag::Note));
        }
    }

    /// A note in every buffer, the process buffer included
    pub fn note_all(&mut self, text: &str, tag: LineTag) {
        let number = self.push(BufferKind::Process, None, text.to_string(), Some(tag));
        for kind in [BufferKind::Warning, BufferKind::Caution, BufferKind::Info] {
            self.push(kind, Some(number), text.to_string(), Some(tag));
        }
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        if let Some(observer) = &self.observer {
            observer.on_status(&self.status);
        }
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
        self.counters.command_start = 0;
    }

    fn route(&mut self, line: DecodedLine) {
        if !line.complete {
            // Carriage-return segment: display only
            self.write_process(line.text, None, line.overwrite);
            return;
        }

        let tag = LineTag::for_category(line.category);
        let number = if line.overwrite && self.buffers.len(BufferKind::Process) > 0 {
            self.buffers.len(BufferKind::Process)
        } else {
            self.buffers.next_number()
        };

        match line.category {
            LineCategory::CommandEcho => {
                // Identifies the package later messages belong to
                self.push(BufferKind::Info, Some(number), line.text.clone(), tag);
                self.push(BufferKind::Warning, Some(number), line.text.clone(), tag);
                if !self.counters.replay {
                    self.resume_line = Some(line.text.clone());
                    self.set_status(line.text.clone());
                }
            }
            LineCategory::Info | LineCategory::Error => {
                self.push(BufferKind::Info, Some(number), line.text.clone(), tag);
            }
            LineCategory::Warning => {
                self.push(BufferKind::Warning, Some(number), line.text.clone(), tag);
                self.counters.warnings += 1;
            }
            LineCategory::Caution => {
                self.push(BufferKind::Caution, Some(number), line.text.clone(), tag);
                self.counters.cautions += 1;
            }
            LineCategory::Plain => {}
        }

        if line.hard_failure {
            self.counters.hard_failure = true;
        }

        self.write_process(line.text, tag, line.overwrite);
    }

    fn write_process(&mut self, text: String, tag: Option<LineTag>, overwrite: bool) {
        if overwrite {
            let line = self.buffers.overwrite(BufferKind::Process, text, tag);
            if let Some(observer) = &self.observer {
                observer.on_line(BufferKind::Process, line, true);
            }
        } else {
            self.push(BufferKind::Process, None, text, tag);
        }
    }

    /// Append to a buffer and tell the observer; returns the line number
    fn push(&mut self, kind: BufferKind, number: Option<usize>, text: String, tag: Option<LineTag>) -> usize {
        let line = match number {
            Some(number) => self.buffers.append_numbered(kind, number, text, tag),
            None => self.buffers.append(kind, text, tag),
        };
        if let Some(observer) = &self.observer {
            observer.on_line(kind, line, false);
        }
        line.number
    }
}
