//! Module implement the stanza format used for canonical serializations.
//!
//! Rosters, revisions and conflict files are all rendered as a sequence
//! of stanzas. A stanza is a run of lines, each carrying a bare symbol
//! followed by one or more values; a value is either a quoted string or
//! a bracketed hex identifier. Symbols within one stanza are right
//! aligned to the longest symbol, and stanzas are separated by a single
//! blank line. The rendering is deterministic, byte for byte, which is
//! what makes the forms hashable.

use std::{fmt, result};

use crate::Result;

/// A single value on a stanza line.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Rendered as `"..."`, with `\` and `"` escaped.
    Str(String),
    /// Rendered as `[...]`, lowercase hex.
    Hex(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            Value::Str(s) => {
                let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{}\"", escaped)
            }
            Value::Hex(h) => write!(f, "[{}]", h),
        }
    }
}

/// One stanza, an ordered list of `(symbol, values)` lines.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stanza {
    entries: Vec<(String, Vec<Value>)>,
}

impl Stanza {
    pub fn new() -> Stanza {
        Stanza::default()
    }

    pub fn push_str(&mut self, sym: &str, val: &str) -> &mut Self {
        self.entries.push((sym.to_string(), vec![Value::Str(val.to_string())]));
        self
    }

    pub fn push_hex(&mut self, sym: &str, val: &str) -> &mut Self {
        self.entries.push((sym.to_string(), vec![Value::Hex(val.to_string())]));
        self
    }

    /// A line with several values, like `attr "key" "value"`.
    pub fn push_multi(&mut self, sym: &str, vals: Vec<Value>) -> &mut Self {
        self.entries.push((sym.to_string(), vals));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulate stanzas into their textual form.
#[derive(Default)]
pub struct Printer {
    buf: String,
}

impl Printer {
    pub fn new() -> Printer {
        Printer::default()
    }

    pub fn push_stanza(&mut self, st: &Stanza) {
        let width = st.entries.iter().map(|(sym, _)| sym.len()).max().unwrap_or(0);
        for (sym, vals) in st.entries.iter() {
            for _ in 0..(width - sym.len()) {
                self.buf.push(' ');
            }
            self.buf.push_str(sym);
            for val in vals.iter() {
                self.buf.push(' ');
                self.buf.push_str(&val.to_string());
            }
            self.buf.push('\n');
        }
        self.buf.push('\n');
    }

    pub fn unwrap(self) -> String {
        self.buf
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Sym(String),
    Str(String),
    Hex(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Sym(s) => format!("symbol '{}'", s),
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Hex(h) => format!("hex [{}]", h),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = vec![];
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(ch) = chars.next() {
        match ch {
            '\n' => line += 1,
            c if c.is_whitespace() => (),
            '"' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(c @ ('\\' | '"')) => s.push(c),
                            _ => err_at!(
                                DecodeFail, msg: "line {}, bad escape in string", line
                            )?,
                        },
                        Some('"') => break,
                        Some('\n') => {
                            // embedded newlines are legal inside strings.
                            s.push('\n');
                            line += 1;
                        }
                        Some(c) => s.push(c),
                        None => err_at!(
                            DecodeFail, msg: "line {}, unterminated string", line
                        )?,
                    }
                }
                tokens.push((line, Token::Str(s)));
            }
            '[' => {
                let mut h = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(c) if c.is_ascii_hexdigit() => h.push(c),
                        _ => err_at!(
                            DecodeFail, msg: "line {}, bad hex identifier", line
                        )?,
                    }
                }
                tokens.push((line, Token::Hex(h)));
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut s = String::new();
                s.push(c);
                while let Some(c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        s.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((line, Token::Sym(s)));
            }
            c => err_at!(DecodeFail, msg: "line {}, unexpected character {:?}", line, c)?,
        }
    }

    Ok(tokens)
}

/// Pull-parser over a tokenized stanza stream. Errors cite the line and
/// token where the mismatch occurred.
pub struct Parser {
    tokens: Vec<(usize, Token)>,
    off: usize,
}

impl Parser {
    pub fn new(text: &str) -> Result<Parser> {
        Ok(Parser { tokens: tokenize(text)?, off: 0 })
    }

    pub fn eof(&self) -> bool {
        self.off >= self.tokens.len()
    }

    fn next(&mut self, what: &str) -> Result<(usize, Token)> {
        match self.tokens.get(self.off) {
            Some(tok) => {
                self.off += 1;
                Ok(tok.clone())
            }
            None => err_at!(DecodeFail, msg: "unexpected end of input, expected {}", what),
        }
    }

    /// Consume the next token, which must be a symbol.
    pub fn sym(&mut self) -> Result<String> {
        match self.next("a symbol")? {
            (_, Token::Sym(s)) => Ok(s),
            (line, tok) => {
                err_at!(DecodeFail, msg: "line {}, expected a symbol, got {}", line, tok.describe())
            }
        }
    }

    /// Consume the next token, which must be the symbol `expected`.
    pub fn esym(&mut self, expected: &str) -> Result<()> {
        match self.next(expected)? {
            (_, Token::Sym(s)) if s == expected => Ok(()),
            (line, tok) => err_at!(
                DecodeFail, msg: "line {}, expected '{}', got {}", line, expected, tok.describe()
            ),
        }
    }

    /// Whether the next token is the symbol `expected`, without
    /// consuming it.
    pub fn symp(&mut self, expected: &str) -> bool {
        matches!(self.tokens.get(self.off), Some((_, Token::Sym(s))) if s == expected)
    }

    /// Whether the next token is any symbol.
    pub fn at_sym(&mut self) -> bool {
        matches!(self.tokens.get(self.off), Some((_, Token::Sym(_))))
    }

    /// Whether the next token is a string.
    pub fn at_str(&mut self) -> bool {
        matches!(self.tokens.get(self.off), Some((_, Token::Str(_))))
    }

    /// Consume the next token, which must be a quoted string.
    pub fn str_val(&mut self) -> Result<String> {
        match self.next("a string")? {
            (_, Token::Str(s)) => Ok(s),
            (line, tok) => {
                err_at!(DecodeFail, msg: "line {}, expected a string, got {}", line, tok.describe())
            }
        }
    }

    /// Consume the next token, which must be a hex identifier.
    pub fn hex_val(&mut self) -> Result<String> {
        match self.next("a hex identifier")? {
            (_, Token::Hex(h)) => Ok(h),
            (line, tok) => err_at!(
                DecodeFail, msg: "line {}, expected a hex identifier, got {}", line, tok.describe()
            ),
        }
    }
}

#[cfg(test)]
#[path = "basic_io_test.rs"]
mod basic_io_test;
