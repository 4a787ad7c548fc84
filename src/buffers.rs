// src/buffers.rs

//! Per-category line logs
//!
//! The process buffer holds every line the job printed; the warning,
//! caution and info buffers hold the classified subsets. Line numbers
//! always refer to the process buffer so a side-buffer entry can be found
//! in the full log.

use crate::classify::LineCategory;
use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which log a line lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Raw decoded output, the canonical line sequence
    Process,
    Warning,
    Caution,
    Info,
}

impl BufferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Warning => "warning",
            Self::Caution => "caution",
            Self::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "process" => Some(Self::Process),
            "warning" => Some(Self::Warning),
            "caution" => Some(Self::Caution),
            "info" => Some(Self::Info),
            _ => None,
        }
    }

    pub fn all() -> &'static [BufferKind] {
        &[Self::Process, Self::Warning, Self::Caution, Self::Info]
    }

    fn index(self) -> usize {
        match self {
            Self::Process => 0,
            Self::Warning => 1,
            Self::Caution => 2,
            Self::Info => 3,
        }
    }
}

impl std::fmt::Display for BufferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Display tag attached to a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineTag {
    /// `*** command ***` echo written when a job starts
    Command,
    /// Package manager's own "emerge (x of y)" line
    CommandEcho,
    Info,
    Warning,
    Caution,
    Error,
    /// Engine-generated summary or status note
    Note,
}

impl LineTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::CommandEcho => "command-echo",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Caution => "caution",
            Self::Error => "error",
            Self::Note => "note",
        }
    }

    /// Tag for a classified line; plain lines carry none
    pub fn for_category(category: LineCategory) -> Option<Self> {
        match category {
            LineCategory::CommandEcho => Some(Self::CommandEcho),
            LineCategory::Info => Some(Self::Info),
            LineCategory::Warning => Some(Self::Warning),
            LineCategory::Caution => Some(Self::Caution),
            LineCategory::Error => Some(Self::Error),
            LineCategory::Plain => None,
        }
    }
}

impl std::fmt::Display for LineTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One display line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// 1-based position in the process buffer
    pub number: usize,
    pub text: String,
    pub tag: Option<LineTag>,
}

impl Line {
    /// `000042 text`
    pub fn numbered(&self) -> String {
        format!("{:06} {}", self.number, self.text)
    }
}

/// The four line logs
#[derive(Debug, Clone, Default)]
pub struct LineBuffers {
    buffers: [Vec<Line>; 4],
}

impl LineBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self, kind: BufferKind) -> &[Line] {
        &self.buffers[kind.index()]
    }

    pub fn len(&self, kind: BufferKind) -> usize {
        self.buffers[kind.index()].len()
    }

    /// Number the next process line will get
    pub fn next_number(&self) -> usize {
        self.len(BufferKind::Process) + 1
    }

    /// Process lines from `mark` on (a mark is a previous process length)
    pub fn lines_since(&self, mark: usize) -> &[Line] {
        let process = self.lines(BufferKind::Process);
        &process[mark.min(process.len())..]
    }

    /// Append a line numbered after the current end of the process buffer
    pub fn append(&mut self, kind: BufferKind, text: impl Into<String>, tag: Option<LineTag>) -> &Line {
        let number = self.next_number();
        self.append_numbered(kind, number, text, tag)
    }

    /// Append a line with an explicit process line number
    pub fn append_numbered(
        &mut self,
        kind: BufferKind,
        number: usize,
        text: impl Into<String>,
        tag: Option<LineTag>,
    ) -> &Line {
        let buffer = &mut self.buffers[kind.index()];
        buffer.push(Line {
            number,
            text: text.into(),
            tag,
        });
        &buffer[buffer.len() - 1]
    }

    /// Replace the last line of a buffer, keeping its number
    ///
    /// An empty buffer gets the line appended instead.
    pub fn overwrite(&mut self, kind: BufferKind, text: impl Into<String>, tag: Option<LineTag>) -> &Line {
        let next = self.next_number();
        let buffer = &mut self.buffers[kind.index()];
        match buffer.last_mut() {
            Some(last) => {
                last.text = text.into();
                last.tag = tag;
            }
            None => buffer.push(Line {
                number: next,
                text: text.into(),
                tag,
            }),
        }
        &buffer[buffer.len() - 1]
    }

    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }

    /// Buffer contents as text; the process buffer may be rendered without
    /// line numbers
    pub fn render(&self, kind: BufferKind, with_numbers: bool) -> String {
        let mut out = String::new();
        for line in self.lines(kind) {
            if with_numbers {
                out.push_str(&line.numbered());
            } else {
                out.push_str(&line.text);
            }
            out.push('\n');
        }
        out
    }

    /// Save a buffer to `path`
    ///
    /// The process buffer is written without line numbers, side buffers
    /// with them. An existing file is kept as `<path>~` and put back if the
    /// write fails.
    pub fn save(&self, kind: BufferKind, path: &Path) -> Result<()> {
        let content = self.render(kind, kind != BufferKind::Process);
        let backup = backup_path(path);
        let had_original = path.exists();

        if had_original {
            fs::rename(path, &backup)?;
        }

        let written = fs::File::create(path).and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()
        });

        match written {
            Ok(()) => {
                debug!("Saved {} buffer to {}", kind, path.display());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to save {} buffer to {}: {}", kind, path.display(), e);
                if had_original {
                    if let Err(restore) = fs::rename(&backup, path) {
                        warn!("Could not restore backup {}: {}", backup.display(), restore);
                    }
                }
                Err(Error::Io(e))
            }
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("~");
    PathBuf::from(name)
}
