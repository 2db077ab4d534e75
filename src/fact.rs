//! Context-aware fact resolution
//!
//! Given one or more tag patterns, picks the first element whose `contextref`
//! is in the resolved [`ContextSet`] and converts its text into a number,
//! trimming it by its `decimals` attribute.

use crate::context::ContextSet;
use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::document::{Document, Element, NamePattern};
use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

static TRACING_SINK: TracingSink = TracingSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueKind {
    #[default]
    Number,
    String,
}

/// What to do when a fact cannot be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Return the error; callers usually stop extracting.
    #[default]
    Raise,
    /// Return the zero value for this fact.
    Ignore,
    /// Return the zero value and report a [`Diagnostic`].
    IgnoreAndLog,
}

impl TryFrom<u8> for ErrorMode {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            0 => Ok(ErrorMode::Raise),
            1 => Ok(ErrorMode::Ignore),
            2 => Ok(ErrorMode::IgnoreAndLog),
            other => Err(Error::Config(format!("unknown error mode {}", other))),
        }
    }
}

impl FromStr for ErrorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "raise" => Ok(ErrorMode::Raise),
            "1" | "ignore" => Ok(ErrorMode::Ignore),
            "2" | "log" | "ignore-and-log" => Ok(ErrorMode::IgnoreAndLog),
            _ => Err(Error::Config(format!("unknown error mode '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FactValue {
    Number(f64),
    Text(String),
}

impl FactValue {
    /// Value returned when nothing usable was found.
    pub fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Number => FactValue::Number(0.0),
            ValueKind::String => FactValue::Text(String::new()),
        }
    }

    /// Numeric view; text that does not parse reads as 0.
    pub fn as_f64(&self) -> f64 {
        match self {
            FactValue::Number(n) => *n,
            FactValue::Text(s) => s.trim().parse().unwrap_or(0.0),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            FactValue::Number(n) => n.to_string(),
            FactValue::Text(s) => s,
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Number(n) => write!(f, "{}", n),
            FactValue::Text(s) => f.write_str(s),
        }
    }
}

/// Ordered list of name patterns that alias one semantic fact.
///
/// Candidates of the first pattern come before those of the second, and so on.
#[derive(Debug, Clone)]
pub struct TagPatterns {
    patterns: Vec<NamePattern>,
}

impl TagPatterns {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            patterns: vec![NamePattern::new(pattern)?],
        })
    }

    pub fn any<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| NamePattern::new(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn exact(name: &str) -> Result<Self> {
        Ok(Self {
            patterns: vec![NamePattern::exact(name)?],
        })
    }

    /// Matching elements, document order within a pattern, pattern order across.
    pub fn candidates<'d>(&self, doc: &'d Document) -> Vec<Element<'d>> {
        self.patterns
            .iter()
            .flat_map(|pattern| doc.matching(pattern))
            .collect()
    }

    /// Whether any element in the document matches.
    pub fn matches_any(&self, doc: &Document) -> bool {
        self.patterns
            .iter()
            .any(|pattern| doc.find_first(pattern).is_some())
    }
}

impl fmt::Display for TagPatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pattern) in self.patterns.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            f.write_str(pattern.as_str())?;
        }
        Ok(())
    }
}

/// Resolves facts of one document against one context set.
#[derive(Clone, Copy)]
pub struct FactResolver<'a> {
    doc: &'a Document,
    contexts: &'a ContextSet,
    mode: ErrorMode,
    sink: &'a dyn DiagnosticSink,
}

impl<'a> FactResolver<'a> {
    pub fn new(doc: &'a Document, contexts: &'a ContextSet) -> Self {
        Self {
            doc,
            contexts,
            mode: ErrorMode::Raise,
            sink: &TRACING_SINK,
        }
    }

    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_sink(mut self, sink: &'a dyn DiagnosticSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn number(&self, patterns: &TagPatterns) -> Result<f64> {
        self.resolve(patterns, ValueKind::Number, false)
            .map(|v| v.as_f64())
    }

    /// Text of the first candidate, whatever its context.
    pub fn string(&self, patterns: &TagPatterns) -> Result<String> {
        self.resolve(patterns, ValueKind::String, false)
            .map(FactValue::into_text)
    }

    /// First candidate's text if numeric, without context filtering.
    pub fn uncontextualized(&self, patterns: &TagPatterns) -> Result<FactValue> {
        self.resolve(patterns, ValueKind::Number, true)
    }

    pub fn resolve(
        &self,
        patterns: &TagPatterns,
        kind: ValueKind,
        bypass_context: bool,
    ) -> Result<FactValue> {
        let candidates = patterns.candidates(self.doc);

        if kind == ValueKind::String {
            return Ok(candidates
                .first()
                .map(|e| FactValue::Text(e.text().to_string()))
                .unwrap_or_else(|| FactValue::zero(kind)));
        }

        if bypass_context {
            return Ok(match candidates.first() {
                Some(e) if is_number(e.text()) => FactValue::Text(e.text().to_string()),
                _ => FactValue::zero(kind),
            });
        }

        match select_number(&candidates, self.contexts) {
            Ok(value) => Ok(FactValue::Number(value)),
            Err(failure) => self.recover(patterns, failure, kind),
        }
    }

    fn recover(&self, patterns: &TagPatterns, failure: Failure, kind: ValueKind) -> Result<FactValue> {
        match self.mode {
            ErrorMode::Raise => Err(Error::ValueExtraction {
                element: failure.element.unwrap_or_default(),
                reason: failure.reason,
            }),
            ErrorMode::Ignore => Ok(FactValue::zero(kind)),
            ErrorMode::IgnoreAndLog => {
                self.sink.record(Diagnostic {
                    pattern: patterns.to_string(),
                    element: failure.element,
                    text: failure.text,
                    message: failure.reason,
                });
                Ok(FactValue::zero(kind))
            }
        }
    }
}

/// Resolves a single fact in one call.
pub fn resolve_fact(
    doc: &Document,
    patterns: &TagPatterns,
    context_ids: &ContextSet,
    kind: ValueKind,
    bypass_context: bool,
    mode: ErrorMode,
    sink: &dyn DiagnosticSink,
) -> Result<FactValue> {
    FactResolver::new(doc, context_ids)
        .with_error_mode(mode)
        .with_sink(sink)
        .resolve(patterns, kind, bypass_context)
}

struct Failure {
    element: Option<String>,
    text: Option<String>,
    reason: String,
}

impl Failure {
    fn at(element: &Element<'_>, reason: impl Into<String>) -> Self {
        Self {
            element: Some(element.name().to_string()),
            text: Some(element.text().to_string()),
            reason: reason.into(),
        }
    }
}

fn select_number(candidates: &[Element<'_>], contexts: &ContextSet) -> std::result::Result<f64, Failure> {
    let mut selected = None;
    for element in candidates {
        let context_ref = element
            .attr("contextref")
            .ok_or_else(|| Failure::at(element, "missing contextref attribute"))?;
        if selected.is_none() && contexts.contains(context_ref) {
            selected = Some(element);
        }
    }

    let Some(element) = selected else {
        return Ok(0.0);
    };

    let text = element.text();
    if !is_number(text) {
        return Err(Failure::at(element, "not a number"));
    }

    let decimals = element
        .attr("decimals")
        .ok_or_else(|| Failure::at(element, "missing decimals attribute"))?;
    let precision = parse_precision(decimals)
        .ok_or_else(|| Failure::at(element, format!("invalid decimals '{}'", decimals)))?;

    trim_decimals(text, precision)
        .ok_or_else(|| Failure::at(element, format!("cannot trim to {} decimals", precision)))
}

/// Whether `text` reads as a floating point number.
pub fn is_number(text: &str) -> bool {
    text.trim().parse::<f64>().is_ok()
}

/// Reads a `decimals` attribute; `INF` means 0.
pub fn parse_precision(decimals: &str) -> Option<i32> {
    let decimals = decimals.trim();
    if decimals.eq_ignore_ascii_case("INF") {
        Some(0)
    } else {
        decimals.parse().ok()
    }
}

/// Truncates the literal by character offset, not by arithmetic rounding.
///
/// A negative precision drops that many trailing characters, a positive one
/// keeps that many leading characters, 0 keeps the text unchanged. Non-ASCII
/// characters are dropped first. An empty remainder reads as 0; a remainder
/// that no longer parses (`"-"`) yields `None`.
pub fn trim_decimals(text: &str, precision: i32) -> Option<f64> {
    let ascii: String = text.chars().filter(char::is_ascii).collect();
    let len = ascii.len();
    let kept = match precision {
        0 => &ascii[..],
        p if p < 0 => &ascii[..len.saturating_sub(p.unsigned_abs() as usize)],
        p => &ascii[..len.min(p as usize)],
    };

    if kept.is_empty() {
        return Some(0.0);
    }
    kept.trim().parse().ok()
}
