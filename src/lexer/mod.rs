use logos::Logos;
use tracing::debug;

use crate::ast::{Span, Type};

/// Integer literal narrowed at scan time to the smallest type that holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntLiteral {
    pub value: i64,
    pub ty: Type,
}

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\f\v]+")]
#[logos(skip(r"#[^\n]*", allow_greedy = true))]
pub enum Token {
    // Keywords
    #[token("var")]
    Var,
    #[token("print")]
    Print,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("func")]
    Func,
    #[token("ret")]
    Ret,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("=")]
    Assign,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,

    // Literals
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Real(f64),

    #[regex(r"[0-9]+", |lex| {
        lex.slice()
            .parse::<i64>()
            .ok()
            .map(|value| IntLiteral { value, ty: Type::narrowest(value) })
    })]
    Int(IntLiteral),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len() - 1])
    })]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Newlines separate statements; the parser drops them but remembers where they were.
    #[token("\n")]
    Newline,
}

impl Token {
    /// Short human description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Int(lit) => format!("integer {}", lit.value),
            Token::Real(v) => format!("real {v}"),
            Token::Str(_) => "string literal".to_string(),
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::Newline => "newline".to_string(),
            other => format!("'{}'", other.text()),
        }
    }

    fn text(&self) -> &'static str {
        match self {
            Token::Var => "var",
            Token::Print => "print",
            Token::If => "if",
            Token::Else => "else",
            Token::For => "for",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Func => "func",
            Token::Ret => "ret",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::True => "true",
            Token::False => "false",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Eq => "==",
            Token::NotEq => "!=",
            Token::Less => "<",
            Token::LessEq => "<=",
            Token::Greater => ">",
            Token::GreaterEq => ">=",
            Token::Assign => "=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Real(_) | Token::Int(_) | Token::Str(_) | Token::Ident(_) | Token::Newline => "",
        }
    }
}

/// Resolves `\n \t \a \f \r \v \\ \"`; any other escape rejects the literal.
fn unescape(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'a' => '\x07',
            'f' => '\x0c',
            'r' => '\r',
            'v' => '\x0b',
            '\\' => '\\',
            '"' => '"',
            _ => return None,
        });
    }
    Some(out)
}

/// Lex source code into a stream of tokens with positions.
pub fn lex(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, Span::from(lexer.span()))),
            Err(()) => return Err(LexError::at(source, lexer.span().start)),
        }
    }

    debug!(tokens = tokens.len(), "lexed");
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    UnterminatedString,
    BadEscape(char),
    IntegerOutOfRange,
    UnexpectedChar,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Lex error at byte {start}: {message} '{snippet}'. {suggestion}", start = .span.start)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub span: Span,
    pub snippet: String,
    pub message: String,
    pub suggestion: String,
}

impl LexError {
    pub fn code(&self) -> &'static str {
        match self.kind {
            LexErrorKind::UnterminatedString => "MZ-L001",
            LexErrorKind::BadEscape(_) => "MZ-L002",
            LexErrorKind::IntegerOutOfRange => "MZ-L003",
            LexErrorKind::UnexpectedChar => "MZ-L004",
        }
    }

    /// Works out why scanning stopped at `start` by looking at the text itself.
    fn at(source: &str, start: usize) -> Self {
        let rest = &source[start..];
        let (kind, len) = classify(rest);
        let snippet = rest[..len].to_string();
        let (message, suggestion) = match kind {
            LexErrorKind::UnterminatedString => (
                "unterminated string literal".to_string(),
                "Close the string with '\"' before the end of the line.".to_string(),
            ),
            LexErrorKind::BadEscape(c) => (
                format!("unknown escape sequence '\\{c}' in string literal"),
                "Supported escapes are \\n \\t \\a \\f \\r \\v \\\\ and \\\".".to_string(),
            ),
            LexErrorKind::IntegerOutOfRange => (
                "integer literal out of range".to_string(),
                format!("Integer literals must fit in i64 (at most {}).", i64::MAX),
            ),
            LexErrorKind::UnexpectedChar => {
                let hint = match snippet.as_str() {
                    "!" => "Use 'not' for negation or '!=' for inequality.".to_string(),
                    "'" => "Strings use double quotes.".to_string(),
                    _ => format!("Remove '{snippet}'."),
                };
                ("unexpected character".to_string(), hint)
            }
        };
        LexError {
            kind,
            span: Span::new(start, start + len),
            snippet,
            message,
            suggestion,
        }
    }
}

fn classify(rest: &str) -> (LexErrorKind, usize) {
    let line_len = rest.find('\n').unwrap_or(rest.len());
    if rest.starts_with('"') {
        let mut chars = rest.char_indices().skip(1);
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => break,
                '\n' => return (LexErrorKind::UnterminatedString, i),
                '\\' => match chars.next() {
                    Some((_, e)) if matches!(e, 'n' | 't' | 'a' | 'f' | 'r' | 'v' | '\\' | '"') => {}
                    Some((j, e)) => return (LexErrorKind::BadEscape(e), j + e.len_utf8()),
                    None => break,
                },
                _ => {}
            }
        }
        return (LexErrorKind::UnterminatedString, line_len);
    }
    if rest.starts_with(|c: char| c.is_ascii_digit()) {
        let len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        return (LexErrorKind::IntegerOutOfRange, len);
    }
    let len = rest
        .char_indices()
        .find(|&(_, c)| c.is_alphanumeric() || c.is_whitespace() || c == '_' || c == '"')
        .map(|(i, _)| i)
        .filter(|&i| i > 0)
        .unwrap_or_else(|| rest.chars().next().map_or(0, char::len_utf8));
    (LexErrorKind::UnexpectedChar, len)
}
