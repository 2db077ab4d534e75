//! Reporting-period context resolution
//!
//! Picks the ids of the contexts that describe "the" reporting period a caller
//! is interested in: instants on the target date, and whole-entity durations
//! that end on the target date and span the requested number of days (with a
//! 9-day slack for month-length variance).

use crate::document::{Document, Element, NamePattern};
use crate::{Error, Result};
use ahash::AHashSet;
use chrono::{Days, NaiveDate};
use compact_str::CompactString;
use std::fmt;
use std::str::FromStr;

/// Days of slack added on top of the requested period length.
const DURATION_SLACK: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodSpec {
    Instant,
    /// A duration in days; must be a multiple of 90.
    Days(u32),
}

impl PeriodSpec {
    pub const CURRENT: PeriodSpec = PeriodSpec::Days(90);
    pub const YEAR: PeriodSpec = PeriodSpec::Days(360);

    pub fn validate(self) -> Result<Self> {
        match self {
            PeriodSpec::Days(days) if days % 90 != 0 => Err(Error::InvalidContextSpec(format!(
                "period of {} days is not a multiple of 90",
                days
            ))),
            spec => Ok(spec),
        }
    }
}

impl Default for PeriodSpec {
    fn default() -> Self {
        PeriodSpec::CURRENT
    }
}

impl FromStr for PeriodSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let spec = match s.trim().to_ascii_lowercase().as_str() {
            "current" => PeriodSpec::CURRENT,
            "year" => PeriodSpec::YEAR,
            "instant" => PeriodSpec::Instant,
            other => other
                .parse::<u32>()
                .map(PeriodSpec::Days)
                .map_err(|_| Error::InvalidContextSpec(format!("unknown period '{}'", s)))?,
        };
        spec.validate()
    }
}

impl fmt::Display for PeriodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodSpec::Instant => f.write_str("instant"),
            PeriodSpec::Days(days) => write!(f, "{} days", days),
        }
    }
}

/// Dates a context has to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportingWindow {
    pub start: Option<NaiveDate>,
    pub end: NaiveDate,
    /// Accepted `end - start` lengths in days; `None` for instants.
    durations: Option<(i64, i64)>,
}

impl ReportingWindow {
    pub fn new(target: NaiveDate, period: PeriodSpec) -> Result<Self> {
        match period.validate()? {
            PeriodSpec::Instant => Ok(Self {
                start: None,
                end: target,
                durations: None,
            }),
            PeriodSpec::Days(days) => {
                let start = target.checked_sub_days(Days::new(days as u64)).ok_or_else(|| {
                    Error::InvalidContextSpec(format!("{} days before {} is out of range", days, target))
                })?;
                let days = days as i64;
                Ok(Self {
                    start: Some(start),
                    end: target,
                    durations: Some((days, days + DURATION_SLACK)),
                })
            }
        }
    }

    fn accepts_instant(&self, instant: NaiveDate) -> bool {
        instant == self.end
    }

    fn accepts_duration(&self, start: NaiveDate, end: NaiveDate) -> bool {
        let Some((min, max)) = self.durations else {
            return false;
        };
        let length = (end - start).num_days();
        (min..=max).contains(&length) && end == self.end
    }
}

/// Ids of the contexts that matched a [`ReportingWindow`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSet {
    ids: AHashSet<CompactString>,
}

impl ContextSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &str) -> bool {
        self.ids.insert(CompactString::from(id))
    }

    #[inline]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(|id| id.as_str())
    }

    /// Ids in lexical order.
    pub fn sorted(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.iter().collect();
        ids.sort_unstable();
        ids
    }
}

impl<'a> FromIterator<&'a str> for ContextSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = ContextSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

/// Whole-entity context, as far as resolution cares about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub id: CompactString,
    pub instant: Option<NaiveDate>,
    pub duration: Option<(NaiveDate, NaiveDate)>,
}

impl Context {
    /// Reads a context element.
    ///
    /// Returns `Ok(None)` for contexts that resolution skips: no entity, or an
    /// entity scoped by a segment.
    pub fn from_element(element: Element<'_>, prefix: &str) -> Result<Option<Self>> {
        let name = |local: &str| format!("{}{}", prefix, local);

        let Some(entity) = element.find(&name("entity")) else {
            return Ok(None);
        };
        if entity.find(&name("segment")).is_some() {
            return Ok(None);
        }

        let id = element
            .attr("id")
            .ok_or_else(|| Error::ContextStructure(format!("<{}> without an id", element.name())))?;

        let instant = element
            .find(&name("instant"))
            .map(|e| read_date(id, e))
            .transpose()?;

        let duration = match element.find(&name("period")) {
            Some(period) => {
                let start = period.find(&name("startdate")).map(|e| read_date(id, e)).transpose()?;
                let end = period.find(&name("enddate")).map(|e| read_date(id, e)).transpose()?;
                start.zip(end)
            }
            None if instant.is_some() => None,
            None => {
                return Err(Error::ContextStructure(format!(
                    "context '{}' has no period",
                    id
                )))
            }
        };

        Ok(Some(Context {
            id: CompactString::from(id),
            instant,
            duration,
        }))
    }

    pub fn matches(&self, window: &ReportingWindow) -> bool {
        if self.instant.is_some_and(|instant| window.accepts_instant(instant)) {
            return true;
        }
        self.duration
            .is_some_and(|(start, end)| window.accepts_duration(start, end))
    }
}

/// Collects the ids of every whole-entity context matching `period` around
/// `target`. An empty set is not an error.
pub fn resolve_contexts(doc: &Document, target: NaiveDate, period: PeriodSpec) -> Result<ContextSet> {
    let window = ReportingWindow::new(target, period)?;
    let prefix = doc.root_prefix();
    let pattern = NamePattern::new(&format!("{}context", regex::escape(prefix)))?;

    let mut ids = ContextSet::new();
    for element in doc.matching(&pattern) {
        let Some(context) = Context::from_element(element, prefix)? else {
            continue;
        };
        if context.matches(&window) {
            ids.insert(&context.id);
        }
    }

    tracing::debug!(
        period = %period,
        end = %window.end,
        matched = ids.len(),
        "contexts resolved"
    );

    Ok(ids)
}

/// Reads a date from free text using only its first 8 digits (`%Y%m%d`).
///
/// `2023-09-30T00:00:00Z` and `20230930` both read as 2023-09-30.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let digits: String = text.chars().filter(char::is_ascii_digit).take(8).collect();
    NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()
}

fn read_date(id: &str, element: Element<'_>) -> Result<NaiveDate> {
    parse_date(element.text()).ok_or_else(|| {
        Error::ContextStructure(format!(
            "context '{}' has an unreadable <{}> '{}'",
            id,
            element.name(),
            element.text().trim()
        ))
    })
}
