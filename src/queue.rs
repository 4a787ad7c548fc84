// src/queue.rs

//! Ordered job queue
//!
//! Jobs run strictly one at a time from the front. Index 0 is the only
//! entry that may be running or waiting for a resume after a kill, so
//! reordering never touches it.

use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

/// Opaque handle to a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Status shown next to a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    /// Interrupted, waiting for resume or skip
    Killed,
    Succeeded,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Killed => "killed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Completion callback, run once when the job completes or is skipped
pub type JobCallback = Box<dyn FnOnce() + Send>;

/// Direction for [`JobQueue::swap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards the front of the queue
    Up,
    Down,
}

/// One queued package operation
pub struct Job {
    pub id: JobId,
    pub package_name: String,
    pub command: String,
    pub status: JobStatus,
    pub callback: Option<JobCallback>,
    /// Set when the job was last spawned
    pub started_at: Option<DateTime<Local>>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("package_name", &self.package_name)
            .field("command", &self.command)
            .field("status", &self.status)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Job {
    pub fn matches(&self, package_name: &str, command: &str) -> bool {
        self.package_name == package_name && self.command == command
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            package_name: self.package_name.clone(),
            command: self.command.clone(),
            status: self.status,
        }
    }
}

/// Read-only snapshot of a queue entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    pub package_name: String,
    pub command: String,
    pub status: JobStatus,
}

/// Record of a job that left the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub id: JobId,
    pub package_name: String,
    pub command: String,
    pub status: JobStatus,
    pub finished_at: DateTime<Local>,
}

/// FIFO of jobs with explicit reordering
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
    next_id: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Append a new pending job and return its id
    pub fn push(
        &mut self,
        package_name: impl Into<String>,
        command: impl Into<String>,
        callback: Option<JobCallback>,
    ) -> JobId {
        self.next_id += 1;
        let id = JobId(self.next_id);
        let job = Job {
            id,
            package_name: package_name.into(),
            command: command.into(),
            status: JobStatus::Pending,
            callback,
            started_at: None,
        };
        debug!("Queued {} '{}' ({})", id, job.package_name, job.command);
        self.jobs.push_back(job);
        id
    }

    pub fn head(&self) -> Option<&Job> {
        self.jobs.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut Job> {
        self.jobs.front_mut()
    }

    pub fn position(&self, id: JobId) -> Option<usize> {
        self.jobs.iter().position(|job| job.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Remove entries after the head that belong to `package_name`
    ///
    /// Returns the dropped jobs; their callbacks are the caller's business.
    pub fn remove_stale(&mut self, package_name: &str) -> Vec<Job> {
        let mut removed = Vec::new();
        let mut index = 1;
        while index < self.jobs.len() {
            if self.jobs[index].package_name == package_name {
                if let Some(job) = self.jobs.remove(index) {
                    debug!("Dropping stale {} for '{}'", job.id, package_name);
                    removed.push(job);
                }
            } else {
                index += 1;
            }
        }
        removed
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Job> {
        self.jobs.remove(index)
    }

    pub fn pop_front(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    /// Swap a job with its neighbour
    ///
    /// The head never moves: swapping index 0, or moving index 1 up, is
    /// rejected, as is moving past either end.
    pub fn swap(&mut self, id: JobId, direction: Direction) -> Result<()> {
        let index = self.position(id).ok_or(Error::JobNotFound(id))?;
        if index == 0 {
            return Err(Error::InvalidState(format!(
                "{} is at the head of the queue and cannot be moved",
                id
            )));
        }

        let target = match direction {
            Direction::Up if index == 1 => {
                return Err(Error::InvalidState(format!(
                    "{} cannot move in front of the head of the queue",
                    id
                )));
            }
            Direction::Up => index - 1,
            Direction::Down if index + 1 >= self.jobs.len() => {
                return Err(Error::InvalidState(format!(
                    "{} is already at the end of the queue",
                    id
                )));
            }
            Direction::Down => index + 1,
        };

        self.jobs.swap(index, target);
        debug!("Moved {} from position {} to {}", id, index, target);
        Ok(())
    }
}

/// Bounded list of finished jobs, oldest first
#[derive(Debug, Clone)]
pub struct JobHistory {
    entries: VecDeque<JobSummary>,
    limit: usize,
}

impl JobHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    pub fn record(&mut self, job: &Job) {
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(JobSummary {
            id: job.id,
            package_name: job.package_name.clone(),
            command: job.command.clone(),
            status: job.status,
            finished_at: Local::now(),
        });
    }

    pub fn entries(&self) -> Vec<JobSummary> {
        self.entries.iter().cloned().collect()
    }
}
