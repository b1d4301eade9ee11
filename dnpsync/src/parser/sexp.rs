//! Lossless S-expression reader and writer.
//!
//! KiCad schematics, boards and footprint libraries are single S-expressions.
//! Every parsed node remembers the whitespace in front of it and quoted atoms keep
//! their original spelling, so an untouched tree renders back byte for byte.
//! Nodes built in code carry no whitespace and are separated by one space.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("Parse error at position {0}: {1}")]
    ParseError(usize, String),
}

/// A bare symbol (`smd`, `yes`) or a quoted string (`"F.Cu"`).
#[derive(Debug, Clone)]
pub struct Atom {
    value: String,
    quoted: bool,
    /// Source spelling including quotes; dropped once the value changes.
    raw: Option<String>,
    lead: Option<String>,
}

#[derive(Debug, Clone)]
pub struct List {
    items: Vec<SExp>,
    lead: Option<String>,
    /// Whitespace between the last item and the closing paren.
    tail: String,
}

#[derive(Debug, Clone)]
pub enum SExp {
    Atom(Atom),
    List(List),
}

/// Structural equality: atom values and list items, formatting ignored.
impl PartialEq for SExp {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SExp::Atom(a), SExp::Atom(b)) => a.value == b.value,
            (SExp::List(a), SExp::List(b)) => a.items == b.items,
            _ => false,
        }
    }
}

impl SExp {
    pub fn symbol(value: impl Into<String>) -> Self {
        SExp::Atom(Atom {
            value: value.into(),
            quoted: false,
            raw: None,
            lead: None,
        })
    }

    pub fn string(value: impl Into<String>) -> Self {
        SExp::Atom(Atom {
            value: value.into(),
            quoted: true,
            raw: None,
            lead: None,
        })
    }

    pub fn list(items: Vec<SExp>) -> Self {
        SExp::List(List {
            items,
            lead: None,
            tail: String::new(),
        })
    }

    pub fn with_lead(mut self, lead: impl Into<String>) -> Self {
        self.set_lead(Some(lead.into()));
        self
    }

    pub fn lead(&self) -> Option<&str> {
        match self {
            SExp::Atom(a) => a.lead.as_deref(),
            SExp::List(l) => l.lead.as_deref(),
        }
    }

    pub fn set_lead(&mut self, lead: Option<String>) {
        match self {
            SExp::Atom(a) => a.lead = lead,
            SExp::List(l) => l.lead = lead,
        }
    }

    pub fn is_quoted(&self) -> bool {
        matches!(self, SExp::Atom(a) if a.quoted)
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            SExp::Atom(a) => Some(&a.value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExp]> {
        match self {
            SExp::List(l) => Some(&l.items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<SExp>> {
        match self {
            SExp::List(l) => Some(&mut l.items),
            _ => None,
        }
    }

    /// Head atom of a list: `footprint` for `(footprint "R_0603" ...)`.
    pub fn tag(&self) -> Option<&str> {
        self.as_list()?.first()?.as_atom()
    }

    pub fn get(&self, key: &str) -> Option<&SExp> {
        if let SExp::List(l) = self {
            for item in &l.items {
                if let SExp::List(sublist) = item {
                    if let Some(first) = sublist.items.first() {
                        if first.as_atom() == Some(key) {
                            // (key value) yields the value, longer lists yield themselves
                            if sublist.items.len() == 2 {
                                return Some(&sublist.items[1]);
                            } else if sublist.items.len() > 2 {
                                return Some(item);
                            }
                        }
                    }
                }
            }
        }
        None
    }

    pub fn get_all(&self, key: &str) -> Vec<&SExp> {
        match self.as_list() {
            Some(items) => items.iter().filter(|item| item.tag() == Some(key)).collect(),
            None => Vec::new(),
        }
    }

    /// First child list headed by `key`.
    pub fn find(&self, key: &str) -> Option<&SExp> {
        self.as_list()?.iter().find(|item| item.tag() == Some(key))
    }

    pub fn find_mut(&mut self, key: &str) -> Option<&mut SExp> {
        self.as_list_mut()?
            .iter_mut()
            .find(|item| item.tag() == Some(key))
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.as_list()?.iter().position(|item| item.tag() == Some(key))
    }

    /// Second atom of the child headed by `key`: `"F.Cu"` for `(layer "F.Cu")`.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.find(key)?.as_list()?.get(1)?.as_atom()
    }

    /// Replaces an atom's value. Returns whether anything changed.
    pub fn set_atom(&mut self, value: &str) -> bool {
        match self {
            SExp::Atom(a) if a.value != value => {
                a.value = value.to_string();
                a.raw = None;
                true
            }
            _ => false,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out, true);
        out
    }

    fn write_into(&self, out: &mut String, first: bool) {
        match self.lead() {
            Some(ws) => out.push_str(ws),
            None if !first => out.push(' '),
            None => {}
        }
        match self {
            SExp::Atom(a) => match &a.raw {
                Some(raw) => out.push_str(raw),
                None if a.quoted || needs_quotes(&a.value) => push_quoted(out, &a.value),
                None => out.push_str(&a.value),
            },
            SExp::List(l) => {
                out.push('(');
                for (i, item) in l.items.iter().enumerate() {
                    item.write_into(out, i == 0);
                }
                out.push_str(&l.tail);
                out.push(')');
            }
        }
    }
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '(' || c == ')' || c == '"')
}

fn push_quoted(out: &mut String, value: &str) {
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out.push('"');
}

impl fmt::Display for SExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

pub struct SExpParser {
    input: Vec<char>,
    pos: usize,
}

impl SExpParser {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    pub fn parse(&mut self) -> Result<SExp, ParseError> {
        let lead = self.take_whitespace();
        if self.is_eof() {
            return Err(ParseError::UnexpectedEof);
        }
        let mut node = self.parse_sexp()?;
        node.set_lead(Some(lead));
        Ok(node)
    }

    /// Parses a whole file: one root expression followed only by whitespace.
    /// Returns the root and the trailing whitespace.
    pub fn parse_document(&mut self) -> Result<(SExp, String), ParseError> {
        let root = self.parse()?;
        let trailing = self.take_whitespace();
        if !self.is_eof() {
            return Err(ParseError::ParseError(
                self.pos,
                "unexpected data after root expression".to_string(),
            ));
        }
        Ok((root, trailing))
    }

    fn parse_sexp(&mut self) -> Result<SExp, ParseError> {
        if self.is_eof() {
            return Err(ParseError::UnexpectedEof);
        }

        if self.peek() == '(' {
            self.parse_list()
        } else {
            self.parse_atom()
        }
    }

    fn parse_list(&mut self) -> Result<SExp, ParseError> {
        self.expect_char('(')?;
        let mut items = Vec::new();

        let tail = loop {
            let ws = self.take_whitespace();

            if self.is_eof() {
                return Err(ParseError::UnexpectedEof);
            }

            if self.peek() == ')' {
                self.advance();
                break ws;
            }

            let mut item = self.parse_sexp()?;
            item.set_lead(Some(ws));
            items.push(item);
        };

        Ok(SExp::List(List {
            items,
            lead: None,
            tail,
        }))
    }

    fn parse_atom(&mut self) -> Result<SExp, ParseError> {
        if self.peek() == '"' {
            self.parse_string()
        } else {
            self.parse_symbol()
        }
    }

    fn parse_string(&mut self) -> Result<SExp, ParseError> {
        let start = self.pos;
        self.expect_char('"')?;
        let mut s = String::new();
        let mut escaped = false;

        loop {
            if self.is_eof() {
                return Err(ParseError::UnexpectedEof);
            }
            let ch = self.peek();
            self.advance();

            if escaped {
                match ch {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    _ => s.push(ch),
                }
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                break;
            } else {
                s.push(ch);
            }
        }

        Ok(SExp::Atom(Atom {
            value: s,
            quoted: true,
            raw: Some(self.input[start..self.pos].iter().collect()),
            lead: None,
        }))
    }

    fn parse_symbol(&mut self) -> Result<SExp, ParseError> {
        let mut s = String::new();

        while !self.is_eof() {
            let ch = self.peek();
            if ch.is_whitespace() || ch == '(' || ch == ')' {
                break;
            }
            s.push(ch);
            self.advance();
        }

        if s.is_empty() {
            Err(ParseError::UnexpectedToken(format!(
                "'{}' at position {}",
                self.peek(),
                self.pos
            )))
        } else {
            Ok(SExp::Atom(Atom {
                value: s,
                quoted: false,
                raw: None,
                lead: None,
            }))
        }
    }

    fn take_whitespace(&mut self) -> String {
        let start = self.pos;
        while !self.is_eof() && self.peek().is_whitespace() {
            self.advance();
        }
        self.input[start..self.pos].iter().collect()
    }

    fn peek(&self) -> char {
        if self.pos < self.input.len() {
            self.input[self.pos]
        } else {
            '\0'
        }
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            self.pos += 1;
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        if self.is_eof() {
            return Err(ParseError::UnexpectedEof);
        }

        let ch = self.peek();
        if ch == expected {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken(format!(
                "Expected '{}', found '{}'",
                expected, ch
            )))
        }
    }
}
