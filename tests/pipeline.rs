use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use std::io::Write;
use xbrl_facts::{
    extract_filing, preprocess_and_parse, repair_with_report, resolve_contexts, resolve_fact,
    ContextSet, Error, ErrorMode, ExtractOptions, FactValue, MemorySink, Parser, PeriodSpec,
    TagPatterns, ValueKind,
};

const SAMPLE: &str = include_str!("../fixtures/sample-10q.xml");

fn sept_30() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 9, 30).unwrap()
}

#[test]
fn repaired_sample_closes_header_tags() {
    let report = repair_with_report(SAMPLE);
    assert_eq!(report.synthesized, 5);
    assert_eq!(report.left_open, None);
    assert!(report.text.contains("<TYPE>EX-101.INS\n</TYPE><SEQUENCE>"));
}

#[test]
fn parse_file_matches_parse_str() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let from_file = Parser::new().parse_file(file.path()).unwrap();
    let from_str = Parser::new().parse_str(SAMPLE).unwrap();
    assert_eq!(from_file.len(), from_str.len());
    assert_eq!(from_file.root_prefix(), "xbrli:");
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Parser::new().parse_file(dir.path().join("missing.txt"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn contexts_for_quarter_and_year() {
    let doc = preprocess_and_parse(SAMPLE).unwrap();

    let quarter = resolve_contexts(&doc, sept_30(), PeriodSpec::CURRENT).unwrap();
    assert_eq!(quarter.sorted(), vec!["FY2023Q3", "I2023Q3"]);

    let year = resolve_contexts(&doc, sept_30(), PeriodSpec::YEAR).unwrap();
    assert_eq!(year.sorted(), vec!["I2023Q3", "YTD"]);

    let instant = resolve_contexts(&doc, sept_30(), PeriodSpec::Instant).unwrap();
    assert_eq!(instant.sorted(), vec!["I2023Q3"]);
}

#[test]
fn segment_contexts_are_never_selected() {
    let doc = preprocess_and_parse(SAMPLE).unwrap();
    let contexts = resolve_contexts(&doc, sept_30(), PeriodSpec::CURRENT).unwrap();
    assert!(!contexts.contains("SegQ"));

    let revenue = resolve_fact(
        &doc,
        &TagPatterns::new("us-gaap:revenues").unwrap(),
        &contexts,
        ValueKind::Number,
        false,
        ErrorMode::Raise,
        &MemorySink::new(),
    )
    .unwrap();
    assert_eq!(revenue, FactValue::Number(89498.0));
}

#[test]
fn fact_from_matching_context_only() {
    let doc = preprocess_and_parse(
        r#"<xbrli:xbrl>
             <xbrli:context id="c1"><xbrli:entity></xbrli:entity>
               <xbrli:period><xbrli:instant>2023-09-30</xbrli:instant></xbrli:period></xbrli:context>
             <xbrli:context id="c2"><xbrli:entity></xbrli:entity>
               <xbrli:period><xbrli:instant>2022-09-30</xbrli:instant></xbrli:period></xbrli:context>
             <us-gaap:AssetsCurrent contextRef="c2" decimals="0">9999</us-gaap:AssetsCurrent>
             <us-gaap:AssetsCurrent contextRef="c1" decimals="0">5000</us-gaap:AssetsCurrent>
           </xbrli:xbrl>"#,
    )
    .unwrap();
    let contexts: ContextSet = ["c1"].into_iter().collect();

    let value = resolve_fact(
        &doc,
        &TagPatterns::new("us-gaap:assetscurrent").unwrap(),
        &contexts,
        ValueKind::Number,
        false,
        ErrorMode::Raise,
        &MemorySink::new(),
    )
    .unwrap();
    assert_eq!(value, FactValue::Number(5000.0));
}

#[test]
fn full_filing_as_json() {
    let doc = preprocess_and_parse(SAMPLE).unwrap();
    let options = ExtractOptions::new().with_doc_date(sept_30());
    let filing = extract_filing(&doc, &options, &MemorySink::new()).unwrap();

    assert_eq!(filing.gaap.get("revenues"), Some(89498.0));
    assert_eq!(filing.dei.company_name, "Example Devices Inc.");

    let json: serde_json::Value = serde_json::to_value(&filing).unwrap();
    assert_eq!(json["gaap"]["non_current_assets"], 209017.0);
    assert_eq!(json["dei"]["shares_outstanding"], 15550061000.0);
}

#[test]
fn document_without_xbrl_root() {
    let result = preprocess_and_parse("<html><body>10-K</body></html>");
    assert!(matches!(result, Err(Error::EmptyDocument)));
}

#[test]
fn word_html_before_instance_is_tolerated() {
    let raw = r#"<SEC-DOCUMENT>
<DOCUMENT>
<TYPE>10-Q
<TEXT>
<html><body><p class=MsoListParagraph><![if !supportLists]>1.<![endif]>Item&nbsp;2</p></body></html>
</TEXT>
</DOCUMENT>
<DOCUMENT>
<TYPE>EX-101.INS
<TEXT>
<XBRL>
<xbrli:xbrl>
  <xbrli:context id="c1"><xbrli:entity></xbrli:entity>
    <xbrli:period><xbrli:instant>2023-09-30</xbrli:instant></xbrli:period></xbrli:context>
  <us-gaap:Assets contextRef="c1" decimals="0">5000</us-gaap:Assets>
</xbrli:xbrl>
</XBRL>
</TEXT>
</DOCUMENT>
</SEC-DOCUMENT>"#;

    let doc = preprocess_and_parse(raw).unwrap();
    assert_eq!(doc.root_prefix(), "xbrli:");

    let contexts = resolve_contexts(&doc, sept_30(), PeriodSpec::Instant).unwrap();
    let assets = resolve_fact(
        &doc,
        &TagPatterns::new("us-gaap:assets$").unwrap(),
        &contexts,
        ValueKind::Number,
        false,
        ErrorMode::Raise,
        &MemorySink::new(),
    )
    .unwrap();
    assert_eq!(assets, FactValue::Number(5000.0));
}
