//! xbrl-facts - Extract reporting-period facts from SEC XBRL filings
//!
//! Licensed under AGPL-3.0
//!
//! Raw EDGAR submissions are SGML-wrapped and full of unclosed header tags.
//! The pipeline repairs them, indexes the element tree, resolves which
//! contexts describe the reporting period of interest and reads facts from
//! elements in those contexts.
//!
//! ```no_run
//! use xbrl_facts::{extract_gaap, ExtractOptions, Parser, TracingSink};
//!
//! let doc = Parser::new().parse_file("0000320193-23-000077.txt")?;
//! let facts = extract_gaap(&doc, &ExtractOptions::default(), &TracingSink)?;
//! println!("assets: {:?}", facts.get("assets"));
//! # Ok::<(), xbrl_facts::Error>(())
//! ```

pub mod catalog;
pub mod context;
pub mod diagnostics;
pub mod document;
pub mod fact;
pub mod parser;
pub mod repair;

pub use catalog::{
    extract_custom, extract_dei, extract_filing, extract_gaap, CustomFacts, DeiFacts,
    ExtractOptions, Field, Filing, GaapFacts, Source, GAAP_FIELDS,
};
pub use context::{parse_date, resolve_contexts, ContextSet, PeriodSpec};
pub use diagnostics::{Diagnostic, DiagnosticSink, MemorySink, TracingSink};
pub use document::{Document, Element, ElementFlags, NamePattern};
pub use fact::{resolve_fact, ErrorMode, FactResolver, FactValue, TagPatterns, ValueKind};
pub use parser::{preprocess_and_parse, Parser};
pub use repair::{repair, repair_with_report};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no XBRL root element found")]
    EmptyDocument,

    #[error("no context element found")]
    MissingContextRoot,

    #[error("invalid context spec: {0}")]
    InvalidContextSpec(String),

    #[error("malformed context: {0}")]
    ContextStructure(String),

    #[error("cannot extract value of {element}: {reason}")]
    ValueExtraction { element: String, reason: String },

    #[error("invalid tag pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
