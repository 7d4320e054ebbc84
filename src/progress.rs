//! Progress events streamed to the caller.
//!
//! One producer (the command runner's event loop, or the scheduler between
//! commands) and one consumer (whoever holds the receiver). Events are
//! transient and dropped after delivery.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};

use serde::Serialize;
use tracing::debug;

use crate::install_state::Phase;

/// Number of output lines retained for display after a run
pub const LOG_WINDOW_LINES: usize = 100;

/// A single status update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// Overall progress in `[0, 1]`
    pub progress: f64,
    /// Human label for the current step
    pub step: String,
    pub is_complete: bool,
    pub needs_privilege: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(phase: Phase, progress: f64, step: impl Into<String>) -> Self {
        Self {
            phase,
            progress: progress.clamp(0.0, 1.0),
            step: step.into(),
            is_complete: false,
            needs_privilege: false,
            command_info: None,
            log_output: None,
            error: None,
        }
    }

    pub fn complete(mut self) -> Self {
        self.is_complete = true;
        self
    }

    pub fn privileged(mut self, needs_privilege: bool) -> Self {
        self.needs_privilege = needs_privilege;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command_info = Some(command.into());
        self
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.log_output = Some(line.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Outbound half of the event stream.
///
/// Sending never fails from the producer's point of view: if the consumer has
/// gone away, events are dropped and the run carries on.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Create a sink together with its receiving end
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    /// A sink that discards everything
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Progress receiver dropped, discarding event");
            }
        }
    }
}

/// Last `capacity` output lines, oldest first.
#[derive(Debug, Clone)]
pub struct LogWindow {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for LogWindow {
    fn default() -> Self {
        Self::with_capacity(LOG_WINDOW_LINES)
    }
}

impl LogWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_progress_is_clamped() {
        let event = ProgressEvent::new(Phase::SystemPackages, 1.7, "x");
        assert_eq!(event.progress, 1.0);
        let event = ProgressEvent::new(Phase::SystemPackages, -0.2, "x");
        assert_eq!(event.progress, 0.0);
    }

    #[test]
    fn test_event_json_omits_empty_fields() {
        let event = ProgressEvent::new(Phase::Prerequisites, 0.05, "Checking").with_log("ok");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""log_output":"ok""#));
        assert!(!json.contains("command_info"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_sink_survives_dropped_receiver() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        sink.emit(ProgressEvent::new(Phase::Complete, 1.0, "done"));
    }

    #[test]
    fn test_log_window_keeps_last_lines() {
        let mut window = LogWindow::with_capacity(3);
        for i in 0..5 {
            window.push(format!("line {}", i));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.lines(), vec!["line 2", "line 3", "line 4"]);
        assert_eq!(window.last(), Some("line 4"));
    }
}
