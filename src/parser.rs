//! Entry point: raw bytes in, repaired and indexed [`Document`] out

use crate::document::Document;
use crate::repair::repair_with_report;
use crate::Result;
#[cfg(feature = "mmap")]
use memmap2::Mmap;
use std::borrow::Cow;
#[cfg(feature = "mmap")]
use std::fs::File;
use std::path::Path;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub struct Parser {
    repair: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self { repair: true }
    }

    /// Disable the repair pass for input already known to be well-formed.
    pub fn with_repair(mut self, repair: bool) -> Self {
        self.repair = repair;
        self
    }

    #[cfg(not(feature = "mmap"))]
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Document> {
        let content = std::fs::read(path)?;
        self.parse_bytes(&content)
    }

    #[cfg(feature = "mmap")]
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Document> {
        let file = File::open(path)?;
        // SAFETY: the map is read-only and dropped before this call returns.
        let map = unsafe { Mmap::map(&file)? };
        self.parse_bytes(&map)
    }

    pub fn parse_bytes(&self, data: &[u8]) -> Result<Document> {
        let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
        let text = String::from_utf8_lossy(data);
        self.parse_str(&text)
    }

    pub fn parse_str(&self, text: &str) -> Result<Document> {
        let text = if self.repair {
            let report = repair_with_report(text);
            if report.synthesized > 0 {
                tracing::debug!(synthesized = report.synthesized, "closed unbalanced tags");
            }
            Cow::Owned(report.text)
        } else {
            Cow::Borrowed(text)
        };
        Document::parse(&text)
    }
}

/// Repairs and indexes one document with default settings.
pub fn preprocess_and_parse(raw: &str) -> Result<Document> {
    Parser::new().parse_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NamePattern;
    use crate::Error;

    const SGML_WRAPPED: &str = "<SEC-DOCUMENT>\n<TYPE>EX-101.INS\n<SEQUENCE>7\n<XBRL>\n<xbrli:xbrl>\n<xbrli:context id=\"c\"><xbrli:entity></xbrli:entity></xbrli:context>\n</xbrli:xbrl>\n</XBRL>\n</SEC-DOCUMENT>";

    #[test]
    fn test_repair_runs_before_indexing() {
        let doc = preprocess_and_parse(SGML_WRAPPED).unwrap();
        let kind = doc.find_first(&NamePattern::exact("type").unwrap()).unwrap();
        assert_eq!(kind.text().trim(), "EX-101.INS");
        assert!(kind.children().next().is_none());

        let sequence = doc.find_first(&NamePattern::exact("sequence").unwrap()).unwrap();
        assert_eq!(sequence.text().trim(), "7");
        assert_eq!(doc.root_prefix(), "xbrli:");
    }

    #[test]
    fn test_without_repair_unclosed_tags_nest() {
        let doc = Parser::new().with_repair(false).parse_str(SGML_WRAPPED).unwrap();
        let kind = doc.find_first(&NamePattern::exact("type").unwrap()).unwrap();
        assert!(kind.children().next().is_some());
    }

    #[test]
    fn test_bom_is_skipped() {
        let mut data = UTF8_BOM.to_vec();
        data.extend_from_slice(b"<xbrl><context id=\"a\"></context></xbrl>");
        let doc = Parser::new().parse_bytes(&data).unwrap();
        assert_eq!(doc.roots().next().unwrap().name(), "xbrl");
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(preprocess_and_parse(""), Err(Error::EmptyDocument)));
    }
}
