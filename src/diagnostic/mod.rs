pub mod ansi;
pub mod json;
pub mod registry;

use crate::ast::Span;

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

/// A fatal error ready for rendering. Every diagnostic the toolchain produces is an error.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
        self
    }

    pub fn with_secondary_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: false });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for the pipeline's error types ----

impl From<&crate::lexer::LexError> for Diagnostic {
    fn from(e: &crate::lexer::LexError) -> Self {
        let mut d = Diagnostic::error(&e.message)
            .with_code(e.code())
            .with_span(e.span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&crate::parser::ParseError> for Diagnostic {
    fn from(e: &crate::parser::ParseError) -> Self {
        let mut d = Diagnostic::error(&e.message)
            .with_code(e.code)
            .with_span(e.span, "here");
        if let Some(hint) = &e.suggestion {
            d = d.with_suggestion(hint.clone());
        }
        d
    }
}

impl From<&crate::codegen::GenError> for Diagnostic {
    fn from(e: &crate::codegen::GenError) -> Self {
        use crate::codegen::GenError;
        let d = Diagnostic::error(e.to_string()).with_code(e.code());
        match e {
            GenError::TooLarge { .. } => d.with_note("code and data addresses are 16 bits wide"),
            GenError::BreakOutsideLoop { span } | GenError::ContinueOutsideLoop { span } => {
                d.with_span(*span, "not inside a 'for' body")
            }
            GenError::ReturnOutsideFunction { span } => {
                d.with_span(*span, "not inside a 'func' body")
            }
            GenError::UntypedVariable { span, .. } => d
                .with_span(*span, "read here")
                .with_suggestion("give the variable a type or an initializer before using it"),
            _ => d.with_span(e.span(), "here"),
        }
    }
}

impl From<&crate::vm::VmError> for Diagnostic {
    fn from(e: &crate::vm::VmError) -> Self {
        use crate::vm::VmError;
        let d = Diagnostic::error(e.to_string()).with_code(e.code());
        match e {
            VmError::StepLimit { .. } => d.with_suggestion("raise the limit with --max-steps"),
            VmError::StackOverflow { .. } => d
                .with_note("deep recursion uses one frame per active call")
                .with_suggestion("raise the capacity with --stack-size"),
            _ => d,
        }
    }
}

impl From<&crate::Error> for Diagnostic {
    fn from(e: &crate::Error) -> Self {
        match e {
            crate::Error::Lex(e) => e.into(),
            crate::Error::Parse(e) => e.into(),
            crate::Error::Gen(e) => e.into(),
            crate::Error::Vm(e) => e.into(),
        }
    }
}
