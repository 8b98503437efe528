//! Caller-facing progress reporting

/// One step of progress for the caller's progress indicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    /// Percentage points to add
    pub increment: u32,
    pub message: Option<String>,
}

impl ProgressReport {
    pub fn new(increment: u32, message: impl Into<String>) -> Self {
        Self {
            increment,
            message: Some(message.into()),
        }
    }
}

/// Receives progress for a run, e.g. an editor progress notification
pub trait ProgressSink: Send + Sync {
    fn report(&self, report: ProgressReport);
}
