use crate::ast::SourceMap;
use super::{Diagnostic, Label};

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, style: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{style}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn bold_red(&self, s: &str) -> String {
        self.paint("1;31", s)
    }

    fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[MZ-G002]: message"
        let head = match d.code {
            Some(code) => format!("error[{code}]"),
            None => "error".to_string(),
        };
        out.push_str(&format!("{}: {}\n", self.bold_red(&head), self.bold(&d.message)));

        let primary = d.labels.iter().find(|l| l.is_primary);
        if let (Some(label), Some(source)) = (primary, &d.source) {
            self.snippet(&mut out, label, source);
        }

        for label in d.labels.iter().filter(|l| !l.is_primary) {
            if !label.message.is_empty() {
                out.push_str(&format!("  {} {}\n", self.dim("="), label.message));
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }

        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} suggestion: {}\n", self.dim("="), suggestion));
        }

        if let Some(code) = d.code {
            out.push_str(&format!(
                "  {} run `mirza --explain {code}` for details\n",
                self.dim("=")
            ));
        }

        out
    }

    fn snippet(&self, out: &mut String, label: &Label, source: &str) {
        let map = SourceMap::new(source);
        let (line, col) = map.lookup(label.span.start);
        let line_text = map.line_text(line);

        out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), line, col));

        let gutter = line.to_string().len();
        let pipe = self.cyan("|");
        let pad = " ".repeat(gutter);

        out.push_str(&format!("{pad} {pipe}\n"));
        let line_num = self.cyan(&format!("{line:>gutter$}"));
        out.push_str(&format!("{line_num} {pipe} {line_text}\n"));

        // Carets cover the span's characters on this line only.
        let indent = " ".repeat(col - 1);
        let marked = line_text.chars().skip(col - 1);
        let span_chars = source
            .get(label.span.start..label.span.end.max(label.span.start))
            .map_or(1, |s| s.chars().count());
        let width = span_chars.min(marked.count()).max(1);
        let carets = self.bold_red(&"^".repeat(width));
        if label.message.is_empty() {
            out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
        } else {
            out.push_str(&format!(
                "{pad} {pipe} {indent}{carets} {}\n",
                self.bold_red(&label.message)
            ));
        }
        out.push_str(&format!("{pad} {pipe}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn make_diag(source: &str, start: usize, end: usize) -> Diagnostic {
        Diagnostic::error("operator '+' cannot be applied to str and i8")
            .with_code("MZ-G001")
            .with_span(Span::new(start, end), "here")
            .with_source(source.to_string())
            .with_note("strings only support print and slen")
            .with_suggestion("print the parts separately")
    }

    fn plain(d: &Diagnostic) -> String {
        AnsiRenderer { use_color: false }.render(d)
    }

    #[test]
    fn render_contains_error_header() {
        let out = plain(&make_diag("print \"a\" + 1", 6, 13));
        assert!(out.starts_with("error[MZ-G001]: operator"), "bad header in:\n{out}");
    }

    #[test]
    fn render_contains_location_and_source_line() {
        let out = plain(&make_diag("print \"a\" + 1", 6, 13));
        assert!(out.contains("--> 1:7"), "missing location in:\n{out}");
        assert!(out.contains("print \"a\" + 1"), "missing source line in:\n{out}");
    }

    #[test]
    fn render_contains_note_suggestion_and_explain_hint() {
        let out = plain(&make_diag("print \"a\" + 1", 6, 13));
        assert!(out.contains("note: strings only support"), "missing note in:\n{out}");
        assert!(out.contains("suggestion: print the parts"), "missing suggestion in:\n{out}");
        assert!(out.contains("mirza --explain MZ-G001"), "missing explain hint in:\n{out}");
    }

    #[test]
    fn render_no_source_still_works() {
        let out = plain(&Diagnostic::error("division by zero at 0x1c"));
        assert!(out.starts_with("error: division by zero"));
        assert!(!out.contains("-->"));
    }

    #[test]
    fn color_toggles_escape_codes() {
        let d = make_diag("print \"a\" + 1", 6, 13);
        assert!(AnsiRenderer { use_color: true }.render(&d).contains("\x1b["));
        assert!(!plain(&d).contains("\x1b["));
    }

    #[test]
    fn render_second_line() {
        let source = "var x = 1\nprint y";
        let d = Diagnostic::error("undeclared identifier 'y'")
            .with_span(Span::new(16, 17), "here")
            .with_source(source.to_string());
        let out = plain(&d);
        assert!(out.contains("--> 2:7"), "expected line 2 in:\n{out}");
        assert!(out.contains("2 | print y"), "expected second line in:\n{out}");
        assert!(out.contains("  |       ^ here"), "misplaced caret in:\n{out}");
    }

    #[test]
    fn caret_length_counts_chars() {
        // "世界" is six bytes but two columns
        let source = "print \"世界\" + 1";
        let d = Diagnostic::error("bad")
            .with_span(Span::new(6, 14), "")
            .with_source(source.to_string());
        let out = plain(&d);
        assert!(out.contains("      ^^^^\n"), "expected 4 carets in:\n{out}");
        assert!(!out.contains("^^^^^"), "too many carets in:\n{out}");
    }

    #[test]
    fn caret_stops_at_line_end() {
        let d = Diagnostic::error("bad")
            .with_span(Span::new(4, 12), "")
            .with_source("if 1 {\nprint 2".to_string());
        let out = plain(&d);
        assert!(out.contains("^^\n"), "expected 2 carets in:\n{out}");
        assert!(!out.contains("^^^"), "caret ran past the line in:\n{out}");
    }
}
