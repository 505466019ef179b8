//! Progress and diagnostic reporting for long-running operations.

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

/// Receives messages from the scaffolder and the runtime service.
pub trait OperationReporter: Send + Sync {
    fn write_information(&self, message: &str);

    fn write_warning(&self, message: &str);

    fn write_verbose(&self, message: &str);

    fn write_error(&self, message: &str);
}

/// Forwards messages to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl OperationReporter for TracingReporter {
    fn write_information(&self, message: &str) {
        info!(target: "kiln::migrate", "{}", message);
    }

    fn write_warning(&self, message: &str) {
        warn!(target: "kiln::migrate", "{}", message);
    }

    fn write_verbose(&self, message: &str) {
        debug!(target: "kiln::migrate", "{}", message);
    }

    fn write_error(&self, message: &str) {
        error!(target: "kiln::migrate", "{}", message);
    }
}

/// Severity of a reported message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportLevel {
    Information,
    Warning,
    Verbose,
    Error,
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    messages: Mutex<Vec<(ReportLevel, String)>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages in the order they were written.
    pub fn messages(&self) -> Vec<(ReportLevel, String)> {
        self.messages.lock().clone()
    }

    /// Messages of one level.
    pub fn messages_at(&self, level: ReportLevel) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages_at(ReportLevel::Warning)
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }

    fn push(&self, level: ReportLevel, message: &str) {
        self.messages.lock().push((level, message.to_string()));
    }
}

impl OperationReporter for CollectingReporter {
    fn write_information(&self, message: &str) {
        self.push(ReportLevel::Information, message);
    }

    fn write_warning(&self, message: &str) {
        self.push(ReportLevel::Warning, message);
    }

    fn write_verbose(&self, message: &str) {
        self.push(ReportLevel::Verbose, message);
    }

    fn write_error(&self, message: &str) {
        self.push(ReportLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::new();
        reporter.write_information("one");
        reporter.write_warning("two");
        reporter.write_verbose("three");
        reporter.write_error("four");

        assert_eq!(reporter.messages().len(), 4);
        assert_eq!(reporter.warnings(), vec!["two".to_string()]);
        assert_eq!(reporter.messages_at(ReportLevel::Error), vec!["four".to_string()]);

        reporter.clear();
        assert!(reporter.messages().is_empty());
    }

    #[test]
    fn test_tracing_reporter_does_not_panic_without_subscriber() {
        let reporter = TracingReporter;
        reporter.write_information("info");
        reporter.write_warning("warn");
        reporter.write_verbose("verbose");
        reporter.write_error("error");
    }
}
