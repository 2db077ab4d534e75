//! Field catalog: the GAAP, DEI and company-specific facts of a filing
//!
//! Every GAAP field is data: a name plus the tag pattern(s) it is read from.
//! Extraction resolves the reporting-period contexts once and then runs each
//! field through the [`FactResolver`].

use crate::context::{resolve_contexts, ContextSet, PeriodSpec};
use crate::diagnostics::DiagnosticSink;
use crate::document::Document;
use crate::fact::{is_number, ErrorMode, FactResolver, TagPatterns};
use crate::Result;
use chrono::{Local, NaiveDate};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;

/// Where a field's value comes from.
#[derive(Debug, Clone, Copy)]
pub enum Source {
    /// One name pattern.
    Pattern(&'static str),
    /// Several aliases, tried in order.
    AnyOf(&'static [&'static str]),
    /// One exact element name.
    Exact(&'static str),
    /// `pattern` when any element matches it at all, otherwise
    /// `minuend - subtrahend` of two fields declared earlier.
    Remainder {
        pattern: &'static str,
        minuend: &'static str,
        subtrahend: &'static str,
    },
}

impl Source {
    pub fn patterns(&self) -> Result<TagPatterns> {
        match *self {
            Source::Pattern(pattern) | Source::Remainder { pattern, .. } => TagPatterns::new(pattern),
            Source::AnyOf(patterns) => TagPatterns::any(patterns),
            Source::Exact(name) => TagPatterns::exact(name),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub source: Source,
}

impl Field {
    const fn new(name: &'static str, source: Source) -> Self {
        Self { name, source }
    }
}

use Source::{AnyOf, Exact, Pattern, Remainder};

/// GAAP facts in output order.
pub const GAAP_FIELDS: &[Field] = &[
    // Balance sheet
    Field::new("assets", Pattern("us-gaap:assets$")),
    Field::new("current_assets", Exact("us-gaap:assetscurrent")),
    Field::new(
        "non_current_assets",
        Remainder {
            pattern: "(us-gaap:)[^s]*(assetsnoncurrent)",
            minuend: "assets",
            subtrahend: "current_assets",
        },
    ),
    Field::new("liabilities_and_equity", Pattern("(us-gaap:)[^s]*(liabilitiesand)")),
    Field::new("liabilities", Pattern("(us-gaap:)[^s]*(liabilities)")),
    Field::new("current_liabilities", Pattern("(us-gaap:)[^s]*(currentliabilities)")),
    Field::new("noncurrent_liabilities", Pattern("(us-gaap:)[^s]*(noncurrentliabilities)")),
    Field::new("commitments_and_contingencies", Pattern("(us-gaap:commitmentsandcontingencies)")),
    Field::new(
        "redeemable_noncontrolling_interest",
        Pattern("(us-gaap:redeemablenoncontrollinginterestequity)"),
    ),
    Field::new("temporary_equity", Pattern("(us-gaap:)[^s]*(temporaryequity)")),
    Field::new("equity", Pattern("(us-gaap:)[^s]*(equity)")),
    Field::new("equity_attributable_interest", Pattern("(us-gaap:minorityinterest)")),
    Field::new("equity_attributable_parent", Pattern("(us-gaap:liabilitiesandpartnerscapital)")),
    Field::new("stockholders_equity", Pattern("(us-gaap:stockholdersequity)")),
    // Income statement
    Field::new("revenues", Pattern("(us-gaap:)[^s]*(revenue)")),
    Field::new(
        "cost_of_revenue",
        AnyOf(&[
            "(us-gaap:costofrevenue)",
            "(us-gaap:costofservices)",
            "(us-gaap:costofgoodssold)",
            "(us-gaap:costofgoodsandservicessold)",
        ]),
    ),
    Field::new("gross_profit", Pattern("(us-gaap:)[^s]*(grossprofit)")),
    Field::new("operating_expenses", Pattern("(us-gaap:operating)[^s]*(expenses)")),
    Field::new("costs_and_expenses", Pattern("(us-gaap:)[^s]*(costsandexpenses)")),
    Field::new("other_operating_income", Pattern("(us-gaap:otheroperatingincome)")),
    Field::new("operating_income_loss", Pattern("(us-gaap:operatingincomeloss)")),
    Field::new("nonoperating_income_loss", Pattern("(us-gaap:nonoperatingincomeloss)")),
    Field::new("interest_and_debt_expense", Pattern("(us-gaap:interestanddebtexpense)")),
    Field::new(
        "income_before_equity_investments",
        Pattern("(us-gaap:incomelossfromcontinuingoperationsbeforeincometaxesminorityinterest)"),
    ),
    Field::new(
        "income_from_equity_investments",
        Pattern("(us-gaap:incomelossfromequitymethodinvestments)"),
    ),
    Field::new("income_tax_expense_benefit", Pattern("(us-gaap:incometaxexpensebenefit)")),
    Field::new(
        "income_continuing_operations_tax",
        Pattern("(us-gaap:IncomeLossBeforeExtraordinaryItemsAndCumulativeEffectOfChangeInAccountingPrinciple)"),
    ),
    Field::new(
        "income_discontinued_operations",
        Pattern("(us-gaap:)[^s]*(discontinuedoperation)"),
    ),
    Field::new("extraordinary_items_gain_loss", Pattern("(us-gaap:extraordinaryitemnetoftax)")),
    Field::new(
        "income_loss",
        AnyOf(&["(us-gaap:)[^s]*(incomeloss)", "(us-gaap:profitloss)"]),
    ),
    Field::new(
        "net_income_shareholders",
        Pattern("(us-gaap:netincomeavailabletocommonstockholdersbasic)"),
    ),
    Field::new(
        "preferred_stock_dividends",
        Pattern("(us-gaap:preferredstockdividendsandotheradjustments)"),
    ),
    Field::new(
        "net_income_loss_noncontrolling",
        Pattern("(us-gaap:netincomelossattributabletononcontrollinginterest)"),
    ),
    Field::new("net_income_loss", Pattern("^us-gaap:netincomeloss$")),
    Field::new("comprehensive_income", Pattern("(us-gaap:comprehensiveincome)")),
    Field::new("comprehensive_income_parent", Pattern("(us-gaap:comprehensiveincomenetoftax)")),
    Field::new(
        "comprehensive_income_interest",
        Pattern("(us-gaap:comprehensiveincomenetoftaxattributabletononcontrollinginterest)"),
    ),
    Field::new(
        "other_comprehensive_income",
        Pattern("(us-gaap:othercomprehensiveincomelossnetoftax)"),
    ),
    // Cash flow statement
    Field::new(
        "net_cash_flows_operating",
        Pattern("(us-gaap:netcashprovidedbyusedinoperatingactivities)"),
    ),
    Field::new(
        "net_cash_flows_investing",
        Pattern("(us-gaap:netcashprovidedbyusedininvestingactivities)"),
    ),
    Field::new(
        "net_cash_flows_financing",
        Pattern("(us-gaap:netcashprovidedbyusedinfinancingactivities)"),
    ),
    Field::new(
        "net_cash_flows_operating_continuing",
        Pattern("(us-gaap:netcashprovidedbyusedinoperatingactivitiescontinuingoperations)"),
    ),
    Field::new(
        "net_cash_flows_investing_continuing",
        Pattern("(us-gaap:netcashprovidedbyusedininvestingactivitiescontinuingoperations)"),
    ),
    Field::new(
        "net_cash_flows_financing_continuing",
        Pattern("(us-gaap:netcashprovidedbyusedinfinancingactivitiescontinuingoperations)"),
    ),
    Field::new(
        "net_cash_flows_operating_discontinued",
        Pattern("(us-gaap:cashprovidedbyusedinoperatingactivitiesdiscontinuedoperations)"),
    ),
    Field::new(
        "net_cash_flows_investing_discontinued",
        Pattern("(us-gaap:cashprovidedbyusedininvestingactivitiesdiscontinuedoperations)"),
    ),
    Field::new(
        "net_cash_flows_discontinued",
        Pattern("(us-gaap:netcashprovidedbyusedindiscontinuedoperations)"),
    ),
    // Shares
    Field::new("common_shares_outstanding", Pattern("(us-gaap:commonstocksharesoutstanding)")),
    Field::new("common_shares_issued", Pattern("(us-gaap:commonstocksharesissued)")),
    Field::new("common_shares_authorized", Pattern("(us-gaap:commonstocksharesauthorized)")),
];

/// Settings for one extraction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// End of the reporting period; today when unset.
    pub doc_date: Option<NaiveDate>,
    pub period: PeriodSpec,
    pub error_mode: ErrorMode,
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_doc_date(mut self, date: NaiveDate) -> Self {
        self.doc_date = Some(date);
        self
    }

    pub fn with_period(mut self, period: PeriodSpec) -> Self {
        self.period = period;
        self
    }

    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    pub fn target_date(&self) -> NaiveDate {
        self.doc_date.unwrap_or_else(|| Local::now().date_naive())
    }
}

/// GAAP facts of one reporting period, in [`GAAP_FIELDS`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct GaapFacts {
    pub period_end: NaiveDate,
    pub period: PeriodSpec,
    /// Number of contexts the facts were read from.
    pub contexts: usize,
    values: Vec<(&'static str, f64)>,
}

impl GaapFacts {
    pub fn get(&self, name: &str) -> Option<f64> {
        lookup(&self.values, name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for GaapFacts {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

fn lookup(values: &[(&'static str, f64)], name: &str) -> Option<f64> {
    values.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

enum Resolved {
    Value(f64),
    Remainder {
        minuend: &'static str,
        subtrahend: &'static str,
    },
}

fn resolve_field(doc: &Document, resolver: &FactResolver<'_>, field: &Field) -> Result<Resolved> {
    let patterns = field.source.patterns()?;
    if let Source::Remainder { minuend, subtrahend, .. } = field.source {
        if !patterns.matches_any(doc) {
            return Ok(Resolved::Remainder { minuend, subtrahend });
        }
    }
    resolver.number(&patterns).map(Resolved::Value)
}

#[cfg(feature = "parallel")]
fn resolve_fields(doc: &Document, resolver: &FactResolver<'_>, fields: &[Field]) -> Vec<Result<Resolved>> {
    use rayon::prelude::*;

    fields
        .par_iter()
        .map(|field| resolve_field(doc, resolver, field))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn resolve_fields(doc: &Document, resolver: &FactResolver<'_>, fields: &[Field]) -> Vec<Result<Resolved>> {
    fields
        .iter()
        .map(|field| resolve_field(doc, resolver, field))
        .collect()
}

/// Reads every field of [`GAAP_FIELDS`] for the period described by `options`.
///
/// In [`ErrorMode::Raise`] the first failing field in declaration order wins.
pub fn extract_gaap(
    doc: &Document,
    options: &ExtractOptions,
    sink: &dyn DiagnosticSink,
) -> Result<GaapFacts> {
    let period_end = options.target_date();
    let contexts = resolve_contexts(doc, period_end, options.period)?;
    if contexts.is_empty() {
        tracing::warn!(date = %period_end, period = %options.period, "no context matches the reporting period");
    }

    let resolver = FactResolver::new(doc, &contexts)
        .with_error_mode(options.error_mode)
        .with_sink(sink);

    let mut values = Vec::with_capacity(GAAP_FIELDS.len());
    for (field, resolved) in GAAP_FIELDS.iter().zip(resolve_fields(doc, &resolver, GAAP_FIELDS)) {
        let value = match resolved? {
            Resolved::Value(value) => value,
            Resolved::Remainder { minuend, subtrahend } => {
                lookup(&values, minuend).unwrap_or(0.0) - lookup(&values, subtrahend).unwrap_or(0.0)
            }
        };
        values.push((field.name, value));
    }

    Ok(GaapFacts {
        period_end,
        period: options.period,
        contexts: contexts.len(),
        values,
    })
}

/// Document and entity information.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DeiFacts {
    pub trading_symbol: String,
    pub company_name: String,
    pub shares_outstanding: f64,
    pub public_float: f64,
}

/// Reads the DEI facts; none of them is filtered by context.
pub fn extract_dei(doc: &Document, mode: ErrorMode, sink: &dyn DiagnosticSink) -> Result<DeiFacts> {
    let contexts = ContextSet::new();
    let resolver = FactResolver::new(doc, &contexts)
        .with_error_mode(mode)
        .with_sink(sink);

    Ok(DeiFacts {
        trading_symbol: resolver
            .string(&TagPatterns::new("(dei:tradingsymbol)")?)?
            .trim()
            .to_string(),
        company_name: resolver
            .string(&TagPatterns::new("(dei:entityregistrantname)")?)?
            .trim()
            .to_string(),
        shares_outstanding: resolver
            .uncontextualized(&TagPatterns::new("(dei:entitycommonstocksharesoutstanding)")?)?
            .as_f64(),
        public_float: resolver
            .uncontextualized(&TagPatterns::new("(dei:entitypublicfloat)")?)?
            .as_f64(),
    })
}

/// Prefixes whose elements are never company-specific.
const STANDARD_PREFIXES: &[&str] = &["us-gaap", "dei", "xbrll", "xbrldi"];

/// Numeric facts outside the standard taxonomies, keyed by local name.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct CustomFacts(BTreeMap<String, String>);

impl CustomFacts {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Sweeps the document for numeric facts with a non-standard prefix.
///
/// Later elements with the same local name overwrite earlier ones.
pub fn extract_custom(doc: &Document) -> CustomFacts {
    let mut facts = BTreeMap::new();
    for element in doc.elements() {
        let mut parts = element.name().split(':');
        let (Some(prefix), Some(local)) = (parts.next(), parts.next()) else {
            continue;
        };
        if STANDARD_PREFIXES.iter().any(|standard| prefix.contains(standard)) {
            continue;
        }
        let text = element.text();
        if is_number(text) {
            facts.insert(local.to_string(), text.trim().to_string());
        }
    }
    CustomFacts(facts)
}

/// Everything extracted from one filing.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Filing {
    pub gaap: GaapFacts,
    pub dei: DeiFacts,
    pub custom: CustomFacts,
}

pub fn extract_filing(
    doc: &Document,
    options: &ExtractOptions,
    sink: &dyn DiagnosticSink,
) -> Result<Filing> {
    Ok(Filing {
        gaap: extract_gaap(doc, options, sink)?,
        dei: extract_dei(doc, options.error_mode, sink)?,
        custom: extract_custom(doc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::parser::preprocess_and_parse;
    use crate::Error;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = include_str!("../fixtures/sample-10q.xml");

    fn quarter() -> ExtractOptions {
        ExtractOptions::new().with_doc_date(NaiveDate::from_ymd_opt(2023, 9, 30).unwrap())
    }

    #[test]
    fn test_field_names_are_unique() {
        let mut names: Vec<_> = GAAP_FIELDS.iter().map(|f| f.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), GAAP_FIELDS.len());
    }

    #[test]
    fn test_every_pattern_compiles() {
        for field in GAAP_FIELDS {
            assert!(field.source.patterns().is_ok(), "{}", field.name);
        }
    }

    #[test]
    fn test_extract_quarter() {
        let doc = preprocess_and_parse(SAMPLE).unwrap();
        let sink = MemorySink::new();
        let facts = extract_gaap(&doc, &quarter(), &sink).unwrap();

        assert_eq!(facts.contexts, 2);
        assert_eq!(facts.len(), GAAP_FIELDS.len());
        assert_eq!(facts.get("assets"), Some(352583.0));
        assert_eq!(facts.get("current_assets"), Some(143566.0));
        assert_eq!(facts.get("non_current_assets"), Some(209017.0));
        assert_eq!(facts.get("liabilities"), Some(290437.0));
        assert_eq!(facts.get("liabilities_and_equity"), Some(352583.0));
        assert_eq!(facts.get("stockholders_equity"), Some(62146.0));
        assert_eq!(facts.get("revenues"), Some(89498.0));
        assert_eq!(facts.get("cost_of_revenue"), Some(49071.0));
        assert_eq!(facts.get("gross_profit"), Some(40427.0));
        assert_eq!(facts.get("operating_expenses"), Some(13458.0));
        assert_eq!(facts.get("operating_income_loss"), Some(26969.0));
        assert_eq!(facts.get("other_operating_income"), Some(120.0));
        assert_ne!(facts.get("operating_income_loss"), facts.get("other_operating_income"));
        assert_eq!(facts.get("net_income_loss"), Some(22956.0));
        assert_eq!(facts.get("common_shares_outstanding"), Some(15550061.0));
        assert_eq!(facts.get("net_cash_flows_operating"), Some(0.0));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_extract_year() {
        let doc = preprocess_and_parse(SAMPLE).unwrap();
        let options = quarter().with_period(PeriodSpec::YEAR);
        let facts = extract_gaap(&doc, &options, &MemorySink::new()).unwrap();

        assert_eq!(facts.get("net_cash_flows_operating"), Some(110543.0));
        assert_eq!(facts.get("revenues"), Some(0.0));
        assert_eq!(facts.get("assets"), Some(352583.0));
    }

    #[test]
    fn test_serializes_in_declaration_order() {
        let doc = preprocess_and_parse(SAMPLE).unwrap();
        let facts = extract_gaap(&doc, &quarter(), &MemorySink::new()).unwrap();
        let json = serde_json::to_string(&facts).unwrap();

        assert!(json.starts_with(r#"{"assets":352583.0,"current_assets":143566.0"#));
        assert!(json.ends_with(r#""common_shares_authorized":0.0}"#));
    }

    #[test]
    fn test_first_error_in_declaration_order() {
        let doc = preprocess_and_parse(
            r#"<xbrli:xbrl>
                 <xbrli:context id="q"><xbrli:entity></xbrli:entity>
                   <xbrli:period><xbrli:instant>2023-09-30</xbrli:instant></xbrli:period></xbrli:context>
                 <us-gaap:Assets contextRef="q" decimals="0">unknown</us-gaap:Assets>
                 <us-gaap:CommonStockSharesIssued contextRef="q">12</us-gaap:CommonStockSharesIssued>
               </xbrli:xbrl>"#,
        )
        .unwrap();

        let err = extract_gaap(&doc, &quarter(), &MemorySink::new()).unwrap_err();
        match err {
            Error::ValueExtraction { element, .. } => assert_eq!(element, "us-gaap:assets"),
            other => panic!("unexpected error {other:?}"),
        }

        let sink = MemorySink::new();
        let options = quarter().with_error_mode(ErrorMode::IgnoreAndLog);
        let facts = extract_gaap(&doc, &options, &sink).unwrap();
        assert_eq!(facts.get("assets"), Some(0.0));
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_extract_dei() {
        let doc = preprocess_and_parse(SAMPLE).unwrap();
        let dei = extract_dei(&doc, ErrorMode::Raise, &MemorySink::new()).unwrap();
        assert_eq!(
            dei,
            DeiFacts {
                trading_symbol: "EXD".into(),
                company_name: "Example Devices Inc.".into(),
                shares_outstanding: 15550061000.0,
                public_float: 2591165000000.0,
            }
        );
    }

    #[test]
    fn test_extract_custom() {
        let doc = preprocess_and_parse(SAMPLE).unwrap();
        let custom = extract_custom(&doc);
        assert_eq!(custom.get("productsrevenue"), Some("67184000000"));
        assert_eq!(custom.get("assets"), None);
        assert_eq!(custom.get("explicitmember"), None);
    }

    #[test]
    fn test_extract_filing() {
        let doc = preprocess_and_parse(SAMPLE).unwrap();
        let filing = extract_filing(&doc, &quarter(), &MemorySink::new()).unwrap();
        let json = serde_json::to_value(&filing).unwrap();
        assert_eq!(json["gaap"]["revenues"], 89498.0);
        assert_eq!(json["dei"]["trading_symbol"], "EXD");
        assert_eq!(json["custom"]["productsrevenue"], "67184000000");
    }
}
