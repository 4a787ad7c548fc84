// src/supervisor/prompt.rs

//! Decision for a job enqueued again while its killed run is still at the
//! head of the queue

use crate::queue::JobInfo;

/// What to do with the duplicate of a killed head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Drop the killed entry and queue the job from scratch
    Execute,
    /// Continue the killed job with the resume flag
    Resume,
    /// Leave everything as it is
    Cancel,
}

impl ResumeDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }

}

impl std::fmt::Display for ResumeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Asked (without any lock held) when a killed head is enqueued again
pub trait ResumePrompt: Send + Sync {
    fn decide(&self, killed: &JobInfo) -> ResumeDecision;
}

/// Always gives the same answer; for scripts and tests
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision(pub ResumeDecision);

impl ResumePrompt for FixedDecision {
    fn decide(&self, _killed: &JobInfo) -> ResumeDecision {
        self.0
    }
}

impl Default for FixedDecision {
    fn default() -> Self {
        Self(ResumeDecision::Resume)
    }
}

impl<F> ResumePrompt for F
where
    F: Fn(&JobInfo) -> ResumeDecision + Send + Sync,
{
    fn decide(&self, killed: &JobInfo) -> ResumeDecision {
        self(killed)
    }
}
