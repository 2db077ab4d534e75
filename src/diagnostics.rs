//! Sinks for fact-resolution failures that were swallowed instead of raised

use parking_lot::Mutex;
use std::fmt;

/// One swallowed failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Tag pattern(s) being resolved.
    pub pattern: String,
    /// Element that caused the failure, if one was selected.
    pub element: Option<String>,
    /// Raw text of that element.
    pub text: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pattern, self.message)?;
        if let Some(text) = &self.text {
            write!(f, " error at '{}'", text)?;
        }
        Ok(())
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn record(&self, diagnostic: Diagnostic);
}

/// Emits every diagnostic as a `tracing` error event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, diagnostic: Diagnostic) {
        tracing::error!(
            pattern = %diagnostic.pattern,
            element = diagnostic.element.as_deref().unwrap_or(""),
            text = diagnostic.text.as_deref().unwrap_or(""),
            "{}",
            diagnostic.message
        );
    }
}

/// Keeps diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, diagnostic: Diagnostic) {
        self.records.lock().push(diagnostic);
    }
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for &S {
    fn record(&self, diagnostic: Diagnostic) {
        (**self).record(diagnostic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_take() {
        let sink = MemorySink::new();
        sink.record(Diagnostic {
            pattern: "us-gaap:assets$".into(),
            element: Some("us-gaap:assets".into()),
            text: Some("n/a".into()),
            message: "not a number".into(),
        });
        assert_eq!(sink.len(), 1);

        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].to_string(), "us-gaap:assets$: not a number error at 'n/a'");
        assert!(sink.is_empty());
    }
}
