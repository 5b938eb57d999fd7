// src/core/filter.rs

//! A parser for the string representation of search filters (RFC 4515).
//!
//! Filters are parsed before any request is issued so that a malformed filter
//! fails the operation up front instead of after a connection has been set up.
//! The parsed [`Filter`] renders back to a canonical string with `Display`,
//! which is what the transport finally sends.

use std::fmt;
use thiserror::Error;

/// The `(|)` filter: an empty disjunction, which never matches anything.
pub const MATCH_NOTHING: &str = "(|)";

/// The filter used when the caller passes an empty filter string.
pub const MATCH_ALL: &str = "(objectClass=*)";

/// Deepest `&`/`|`/`!` nesting accepted. Limits recursion in the parser.
pub const MAX_FILTER_DEPTH: usize = 64;

/// A parse failure, carrying the byte offset at which it was detected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at position {position}")]
pub struct FilterParseError {
    pub position: usize,
    pub message: String,
}

/// A parsed search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality { attr: String, value: Vec<u8> },
    Approx { attr: String, value: Vec<u8> },
    GreaterOrEqual { attr: String, value: Vec<u8> },
    LessOrEqual { attr: String, value: Vec<u8> },
    Present { attr: String },
    Substring {
        attr: String,
        initial: Option<Vec<u8>>,
        any: Vec<Vec<u8>>,
        final_: Option<Vec<u8>>,
    },
    Extensible {
        attr: Option<String>,
        rule: Option<String>,
        dn_attributes: bool,
        value: Vec<u8>,
    },
}

impl Filter {
    /// Parses a filter string. Surrounding whitespace is ignored and a bare
    /// item such as `mail=a@example.org` is accepted as if parenthesized.
    pub fn parse(input: &str) -> Result<Filter, FilterParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(FilterParseError {
                position: 0,
                message: "empty filter".to_string(),
            });
        }
        let wrapped;
        let source = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({trimmed})");
            wrapped.as_str()
        };

        let mut parser = Parser {
            input: source.as_bytes(),
            pos: 0,
        };
        let filter = parser.filter(1)?;
        if parser.pos != parser.input.len() {
            return Err(parser.error("unexpected trailing characters"));
        }
        Ok(filter)
    }

    /// Returns true for an empty disjunction, which can never match.
    pub fn is_match_nothing(&self) -> bool {
        matches!(self, Filter::Or(list) if list.is_empty())
    }
}

impl std::str::FromStr for Filter {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> FilterParseError {
        FilterParseError {
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), FilterParseError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    fn filter(&mut self, depth: usize) -> Result<Filter, FilterParseError> {
        if depth > MAX_FILTER_DEPTH {
            return Err(self.error("filter nesting depth limit exceeded"));
        }
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.filter_list(depth + 1)?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.filter_list(depth + 1)?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter(depth + 1)?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn filter_list(&mut self, depth: usize) -> Result<Vec<Filter>, FilterParseError> {
        let mut list = Vec::new();
        while self.peek() == Some(b'(') {
            list.push(self.filter(depth)?);
        }
        Ok(list)
    }

    fn item(&mut self) -> Result<Filter, FilterParseError> {
        let attr = self.attribute_description()?;

        match self.peek() {
            Some(b':') => return self.extensible(attr),
            Some(b'~') | Some(b'>') | Some(b'<') => {
                let op = self.input[self.pos];
                self.pos += 1;
                self.expect(b'=')?;
                let attr = require_attr(attr, self)?;
                let value = self.value()?;
                return Ok(match op {
                    b'~' => Filter::Approx { attr, value },
                    b'>' => Filter::GreaterOrEqual { attr, value },
                    _ => Filter::LessOrEqual { attr, value },
                });
            }
            Some(b'=') => self.pos += 1,
            _ => return Err(self.error("expected a filter operator")),
        }

        let attr = require_attr(attr, self)?;

        // `attr=*` is a presence test; any other use of `*` is a substring match.
        if self.input[self.pos..].starts_with(b"*)") {
            self.pos += 1;
            return Ok(Filter::Present { attr });
        }

        let mut parts = vec![self.value()?];
        while self.peek() == Some(b'*') {
            self.pos += 1;
            parts.push(self.value()?);
        }

        if parts.len() == 1 {
            let value = parts.pop().unwrap_or_default();
            return Ok(Filter::Equality { attr, value });
        }

        let final_part = parts.pop().unwrap_or_default();
        let mut rest = parts.into_iter();
        let initial = rest.next().filter(|p| !p.is_empty());
        let any: Vec<Vec<u8>> = rest.collect();
        if any.iter().any(Vec::is_empty) {
            return Err(self.error("empty substring between consecutive '*'"));
        }
        Ok(Filter::Substring {
            attr,
            initial,
            any,
            final_: Some(final_part).filter(|p| !p.is_empty()),
        })
    }

    // attr [":dn"] [":" rule] ":=" value, or the attribute-less form ":" rule ":=" value.
    fn extensible(&mut self, attr: Option<String>) -> Result<Filter, FilterParseError> {
        let mut dn_attributes = false;
        let mut rule = None;

        loop {
            self.expect(b':')?;
            if self.peek() == Some(b'=') {
                self.pos += 1;
                break;
            }
            let word = self.attribute_description()?.ok_or_else(|| {
                self.error("expected 'dn' or a matching rule in extensible match")
            })?;
            if word.eq_ignore_ascii_case("dn") && !dn_attributes && rule.is_none() {
                dn_attributes = true;
            } else if rule.is_none() {
                rule = Some(word);
            } else {
                return Err(self.error("unexpected component in extensible match"));
            }
        }

        if attr.is_none() && rule.is_none() {
            return Err(self.error("extensible match needs an attribute or a matching rule"));
        }
        let value = self.value()?;
        Ok(Filter::Extensible {
            attr,
            rule,
            dn_attributes,
            value,
        })
    }

    // Attribute descriptions: a descriptor or numeric OID, optionally followed
    // by `;option` suffixes.
    fn attribute_description(&mut self) -> Result<Option<String>, FilterParseError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'.' || b == b';' || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Ok(None);
        }
        let attr = &self.input[start..self.pos];
        if attr.starts_with(b";") || attr.ends_with(b";") {
            return Err(FilterParseError {
                position: start,
                message: "malformed attribute description".to_string(),
            });
        }
        Ok(Some(String::from_utf8_lossy(attr).into_owned()))
    }

    // An assertion value up to the next unescaped `*` or `)`.
    fn value(&mut self) -> Result<Vec<u8>, FilterParseError> {
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            match b {
                b'*' | b')' => break,
                b'(' => return Err(self.error("unescaped '(' in assertion value")),
                b'\\' => {
                    let hex = self
                        .input
                        .get(self.pos + 1..self.pos + 3)
                        .and_then(|h| std::str::from_utf8(h).ok())
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or_else(|| self.error("invalid escape sequence"))?;
                    out.push(hex);
                    self.pos += 3;
                }
                0 => return Err(self.error("NUL byte in assertion value")),
                _ => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
        if self.peek().is_none() {
            return Err(self.error("unexpected end of filter"));
        }
        Ok(out)
    }
}

fn require_attr(attr: Option<String>, parser: &Parser<'_>) -> Result<String, FilterParseError> {
    attr.ok_or_else(|| parser.error("missing attribute description"))
}

/// Writes an assertion value, escaping the characters RFC 4515 reserves.
/// Values that are not valid UTF-8 have every non-ASCII byte escaped.
fn write_value(f: &mut fmt::Formatter<'_>, value: &[u8]) -> fmt::Result {
    match std::str::from_utf8(value) {
        Ok(s) => {
            for c in s.chars() {
                match c {
                    '*' | '(' | ')' | '\\' | '\0' => write!(f, "\\{:02x}", c as u32)?,
                    _ => write!(f, "{c}")?,
                }
            }
        }
        Err(_) => {
            for &b in value {
                match b {
                    b'*' | b'(' | b')' | b'\\' | 0 | 0x80..=0xff => write!(f, "\\{b:02x}")?,
                    _ => write!(f, "{}", b as char)?,
                }
            }
        }
    }
    Ok(())
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(list) | Filter::Or(list) => {
                f.write_str(if matches!(self, Filter::And(_)) { "(&" } else { "(|" })?;
                for item in list {
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Filter::Not(inner) => write!(f, "(!{inner})"),
            Filter::Equality { attr, value } => {
                write!(f, "({attr}=")?;
                write_value(f, value)?;
                f.write_str(")")
            }
            Filter::Approx { attr, value } => {
                write!(f, "({attr}~=")?;
                write_value(f, value)?;
                f.write_str(")")
            }
            Filter::GreaterOrEqual { attr, value } => {
                write!(f, "({attr}>=")?;
                write_value(f, value)?;
                f.write_str(")")
            }
            Filter::LessOrEqual { attr, value } => {
                write!(f, "({attr}<=")?;
                write_value(f, value)?;
                f.write_str(")")
            }
            Filter::Present { attr } => write!(f, "({attr}=*)"),
            Filter::Substring {
                attr,
                initial,
                any,
                final_,
            } => {
                write!(f, "({attr}=")?;
                if let Some(initial) = initial {
                    write_value(f, initial)?;
                }
                f.write_str("*")?;
                for part in any {
                    write_value(f, part)?;
                    f.write_str("*")?;
                }
                if let Some(final_) = final_ {
                    write_value(f, final_)?;
                }
                f.write_str(")")
            }
            Filter::Extensible {
                attr,
                rule,
                dn_attributes,
                value,
            } => {
                f.write_str("(")?;
                if let Some(attr) = attr {
                    f.write_str(attr)?;
                }
                if *dn_attributes {
                    f.write_str(":dn")?;
                }
                if let Some(rule) = rule {
                    write!(f, ":{rule}")?;
                }
                f.write_str(":=")?;
                write_value(f, value)?;
                f.write_str(")")
            }
        }
    }
}
