use serde::Serialize;

use crate::ast::SourceMap;
use super::{Diagnostic, Label};

/// Wire shape of `--json` diagnostics; field order is the key order.
#[derive(Serialize)]
struct Record<'a> {
    severity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    message: &'a str,
    labels: Vec<LabelRecord<'a>>,
    notes: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

#[derive(Serialize)]
struct LabelRecord<'a> {
    start: usize,
    end: usize,
    message: &'a str,
    primary: bool,
    // 1-based, present only when the diagnostic carries its source.
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    col: Option<usize>,
}

impl<'a> LabelRecord<'a> {
    fn new(label: &'a Label, map: Option<&SourceMap<'_>>) -> Self {
        let position = map.map(|m| m.lookup(label.span.start));
        LabelRecord {
            start: label.span.start,
            end: label.span.end,
            message: &label.message,
            primary: label.is_primary,
            line: position.map(|(line, _)| line),
            col: position.map(|(_, col)| col),
        }
    }
}

const FALLBACK: &str = r#"{"severity":"error","message":"internal error serializing diagnostic"}"#;

/// Renders one diagnostic as a single-line JSON object.
pub fn render(d: &Diagnostic) -> String {
    let source_map = d.source.as_deref().map(SourceMap::new);
    let record = Record {
        severity: "error",
        code: d.code,
        message: &d.message,
        labels: d.labels.iter().map(|l| LabelRecord::new(l, source_map.as_ref())).collect(),
        notes: &d.notes,
        suggestion: d.suggestion.as_deref(),
    };
    serde_json::to_string(&record).unwrap_or_else(|_| FALLBACK.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn parse_json(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn render_basic_error() {
        let v = parse_json(&render(&Diagnostic::error("stack overflow (2048 slots)")));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["message"], "stack overflow (2048 slots)");
        assert!(v["labels"].as_array().unwrap().is_empty());
        assert!(v.get("code").is_none());
    }

    #[test]
    fn render_code_and_position() {
        let d = Diagnostic::error("undeclared identifier 'y'")
            .with_code("MZ-P004")
            .with_span(Span::new(16, 17), "here")
            .with_source("var x = 1\nprint y".to_string());
        let v = parse_json(&render(&d));
        assert_eq!(v["code"], "MZ-P004");
        let label = &v["labels"][0];
        assert_eq!(label["start"], 16);
        assert_eq!(label["end"], 17);
        assert_eq!(label["primary"], true);
        assert_eq!(label["line"], 2);
        assert_eq!(label["col"], 7);
    }

    #[test]
    fn render_notes_and_suggestion() {
        let d = Diagnostic::error("step limit of 10 instructions reached")
            .with_note("first")
            .with_note("second")
            .with_suggestion("raise the limit with --max-steps");
        let v = parse_json(&render(&d));
        assert_eq!(v["notes"].as_array().unwrap().len(), 2);
        assert_eq!(v["notes"][1], "second");
        assert_eq!(v["suggestion"], "raise the limit with --max-steps");
    }

    #[test]
    fn label_without_source_has_no_line_col() {
        let d = Diagnostic::error("bad").with_span(Span::new(5, 8), "here");
        let v = parse_json(&render(&d));
        assert!(v["labels"][0].get("line").is_none());
        assert!(v["labels"][0].get("col").is_none());
        assert!(v.get("suggestion").is_none());
    }

    #[test]
    fn output_is_one_line() {
        let d = Diagnostic::error("multi\nline message")
            .with_span(Span::new(0, 5), "primary")
            .with_secondary_span(Span::new(10, 12), "secondary")
            .with_source("hello world test".to_string());
        let out = render(&d);
        assert!(!out.contains('\n'));
        assert_eq!(parse_json(&out)["labels"][1]["primary"], false);
    }

    #[test]
    fn keys_follow_a_fixed_order() {
        let d = Diagnostic::error("division by zero").with_code("MZ-R001");
        assert_eq!(
            render(&d),
            r#"{"severity":"error","code":"MZ-R001","message":"division by zero","labels":[],"notes":[]}"#
        );
    }
}
