//! Run observation: progress and log callbacks. The core never prints or
//! draws; whatever front end drives a run decides how to surface these.

use std::sync::Arc;

use serde::Serialize;

/// Severity attached to run log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

/// Counts-only progress snapshot. `done` counts settled units, successes and
/// failures alike; `total` is the planned unit count for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub done: usize,
    pub total: usize,
    pub status: String,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;
pub type LogCallback = Arc<dyn Fn(LogLevel, String) + Send + Sync>;

/// Callback bundle a run reports through. Both slots default to no-ops so
/// consumers wire up only what they need.
#[derive(Clone, Default)]
pub struct RunObserver {
    on_progress: Option<ProgressCallback>,
    on_log: Option<LogCallback>,
}

impl RunObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(
        mut self,
        f: impl Fn(ProgressUpdate) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn with_log(mut self, f: impl Fn(LogLevel, String) + Send + Sync + 'static) -> Self {
        self.on_log = Some(Arc::new(f));
        self
    }

    pub fn progress(&self, done: usize, total: usize, status: impl Into<String>) {
        if let Some(f) = &self.on_progress {
            f(ProgressUpdate {
                done,
                total,
                status: status.into(),
            });
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        if let Some(f) = &self.on_log {
            f(level, message.into());
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}
