//! Tolerant tag repair for loosely generated XBRL
//!
//! Many producers emit leaf tags (`<TYPE>10-Q`, `<SEQUENCE>1`) without ever
//! closing them. The repair pass closes such a tag right before the next tag
//! token, and leaves everything else byte-for-byte intact.
//!
//! Only one tag can be pending at a time. Unclosed tags that nest are not
//! repaired correctly; they are closed at the first following tag token.

use ahash::AHashSet;
use regex::Regex;
use std::sync::LazyLock;

/// One tag literal. Comments and CDATA sections are single tokens even when
/// they contain `<` or `>`.
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?-->|<!\[CDATA\[.*?\]\]>|<[^<>]*>").expect("invalid tag regex")
});

/// Classification of a single `<...>` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind<'a> {
    Opening(&'a str),
    Closing(&'a str),
    SelfClosing(&'a str),
    /// `<?...?>`
    ProcessingInstruction,
    /// `<!-- -->`, `<![CDATA[`, `<!DOCTYPE ...>`
    Declaration,
}

impl<'a> TagKind<'a> {
    /// Classifies a `<...>` literal; `None` when `token` is not one.
    pub fn classify(token: &'a str) -> Option<Self> {
        let inner = token.strip_prefix('<')?.strip_suffix('>')?;
        let kind = if let Some(rest) = inner.strip_prefix('/') {
            TagKind::Closing(tag_name(rest))
        } else if inner.starts_with('?') {
            TagKind::ProcessingInstruction
        } else if inner.starts_with('!') {
            TagKind::Declaration
        } else if inner.ends_with('/') {
            TagKind::SelfClosing(tag_name(inner))
        } else {
            TagKind::Opening(tag_name(inner))
        };
        Some(kind)
    }

    /// Whether meeting this token closes the pending tag first.
    #[inline]
    fn flushes_pending(&self) -> bool {
        !matches!(self, TagKind::Declaration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Tag { raw: &'a str, kind: TagKind<'a> },
}

impl<'a> Token<'a> {
    #[inline]
    pub fn as_str(&self) -> &'a str {
        match self {
            Token::Text(text) => text,
            Token::Tag { raw, .. } => raw,
        }
    }
}

/// Splits text into alternating non-tag text and tag literals.
///
/// Empty text runs are skipped, so concatenating every token yields the input.
pub struct Tokens<'a> {
    input: &'a str,
    pos: usize,
    matches: regex::Matches<'static, 'a>,
    next_tag: Option<regex::Match<'a>>,
}

impl<'a> Tokens<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut matches = TAG.find_iter(input);
        let next_tag = matches.next();
        Self {
            input,
            pos: 0,
            matches,
            next_tag,
        }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_tag {
            Some(tag) if tag.start() == self.pos => {
                self.pos = tag.end();
                self.next_tag = self.matches.next();
                let raw = tag.as_str();
                Some(match TagKind::classify(raw) {
                    Some(kind) => Token::Tag { raw, kind },
                    None => Token::Text(raw),
                })
            }
            Some(tag) => {
                let text = &self.input[self.pos..tag.start()];
                self.pos = tag.start();
                Some(Token::Text(text))
            }
            None if self.pos < self.input.len() => {
                let text = &self.input[self.pos..];
                self.pos = self.input.len();
                Some(Token::Text(text))
            }
            None => None,
        }
    }
}

/// Outcome of a repair pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    pub text: String,
    /// Number of synthetic closing tags inserted.
    pub synthesized: usize,
    /// Tag still awaiting closure when the input ran out.
    pub left_open: Option<String>,
}

enum RepairState<'a> {
    Idle,
    Pending(&'a str),
}

/// Repairs `raw` and returns only the repaired text.
pub fn repair(raw: &str) -> String {
    repair_with_report(raw).text
}

pub fn repair_with_report(raw: &str) -> Repair {
    let closed = known_closed(raw);
    let mut out = String::with_capacity(raw.len() + raw.len() / 16);
    let mut state = RepairState::Idle;
    let mut synthesized = 0;

    for token in Tokens::new(raw) {
        if let Token::Tag { kind, .. } = token {
            if kind.flushes_pending() {
                if let RepairState::Pending(name) = state {
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                    synthesized += 1;
                }
                state = RepairState::Idle;
            }

            if let TagKind::Opening(name) = kind {
                if !name.is_empty() && !closed.contains(&name.to_uppercase()) {
                    state = RepairState::Pending(name);
                }
            }
        }
        out.push_str(token.as_str());
    }

    let left_open = match state {
        RepairState::Pending(name) => Some(name.to_string()),
        RepairState::Idle => None,
    };

    tracing::debug!(synthesized, left_open = ?left_open, "repair pass finished");

    Repair {
        text: out,
        synthesized,
        left_open,
    }
}

/// Upper-cased names of every element that has a genuine closing tag.
fn known_closed(raw: &str) -> AHashSet<String> {
    TAG.find_iter(raw)
        .filter_map(|m| match TagKind::classify(m.as_str()) {
            Some(TagKind::Closing(name)) if !name.is_empty() => Some(name.to_uppercase()),
            _ => None,
        })
        .collect()
}

#[inline]
fn tag_name(inner: &str) -> &str {
    let end = inner
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(inner.len());
    &inner[..end]
}
