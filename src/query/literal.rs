//! Relaxed shell literal decoding.
//!
//! Arguments in `db.books.find({ year: { $gt: 1990 } }, { title: 1 })` are written in
//! shell syntax rather than strict JSON: keys may be unquoted, strings may use single
//! quotes, trailing commas are allowed, and a few helper constructors (`ObjectId`,
//! `ISODate`, `NumberLong`, ...) produce typed BSON values. Decoding never evaluates code.

use bson::oid::ObjectId;
use bson::{Bson, DateTime, Document, Regex};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

const MAX_DEPTH: usize = 64;

/// Regex options accepted by the server; `g` is tolerated and dropped.
const REGEX_OPTIONS: &str = "imsux";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {offset}")]
pub struct LiteralError {
    pub offset: usize,
    pub message: String,
}

/// Parses a comma-separated argument list. Empty or blank input yields no arguments.
///
/// # Errors
/// Returns an error on any malformed literal.
pub fn parse_arguments(text: &str) -> Result<Vec<Bson>, LiteralError> {
    let mut r = Reader::new(text);
    let mut out = Vec::new();
    r.skip_trivia()?;
    while !r.at_end() {
        out.push(r.value(0)?);
        r.skip_trivia()?;
        match r.peek() {
            None => break,
            Some(',') => {
                r.bump();
                r.skip_trivia()?;
            }
            Some(c) => return Err(r.error(format!("expected ',' between arguments, found '{c}'"))),
        }
    }
    Ok(out)
}

/// Parses exactly one literal value.
///
/// # Errors
/// Returns an error on a malformed literal or trailing input.
pub fn parse_value(text: &str) -> Result<Bson, LiteralError> {
    let mut r = Reader::new(text);
    let v = r.value(0)?;
    r.skip_trivia()?;
    if let Some(c) = r.peek() {
        return Err(r.error(format!("unexpected trailing character '{c}'")));
    }
    Ok(v)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn error(&self, message: impl Into<String>) -> LiteralError {
        LiteralError { offset: self.pos, message: message.into() }
    }

    fn expect(&mut self, want: char) -> Result<(), LiteralError> {
        match self.peek() {
            Some(c) if c == want => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{want}', found '{c}'"))),
            None => Err(self.error(format!("expected '{want}', found end of input"))),
        }
    }

    /// Skips whitespace and `//` / `/* */` comments.
    fn skip_trivia(&mut self) -> Result<(), LiteralError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.pos += 2;
                    match self.src[self.pos..].find("*/") {
                        Some(i) => self.pos += i + 2,
                        None => return Err(self.error("unterminated comment")),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn ident(&mut self) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.bump();
        }
        &src[start..self.pos]
    }

    fn value(&mut self, depth: usize) -> Result<Bson, LiteralError> {
        if depth > MAX_DEPTH {
            return Err(self.error("literal nested too deeply"));
        }
        self.skip_trivia()?;
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('{') => self.document(depth).map(Bson::Document),
            Some('[') => self.array(depth),
            Some(q @ ('"' | '\'')) => self.string(q).map(Bson::String),
            Some('/') => self.regex(),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if is_ident_start(c) => self.word(depth),
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
        }
    }

    fn document(&mut self, depth: usize) -> Result<Document, LiteralError> {
        self.expect('{')?;
        let mut doc = Document::new();
        loop {
            self.skip_trivia()?;
            match self.peek() {
                Some('}') => {
                    self.bump();
                    return Ok(doc);
                }
                None => return Err(self.error("unterminated document")),
                _ => {}
            }
            let key = self.key()?;
            self.skip_trivia()?;
            self.expect(':')?;
            let value = self.value(depth + 1)?;
            doc.insert(key, value);
            self.skip_trivia()?;
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some('}') => {
                    self.bump();
                    return Ok(doc);
                }
                Some(c) => return Err(self.error(format!("expected ',' or '}}', found '{c}'"))),
                None => return Err(self.error("unterminated document")),
            }
        }
    }

    fn key(&mut self) -> Result<String, LiteralError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => self.string(q),
            Some(c) if is_ident_char(c) => Ok(self.ident().to_string()),
            Some(c) => Err(self.error(format!("expected a key, found '{c}'"))),
            None => Err(self.error("expected a key, found end of input")),
        }
    }

    fn array(&mut self, depth: usize) -> Result<Bson, LiteralError> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_trivia()?;
            match self.peek() {
                Some(']') => {
                    self.bump();
                    return Ok(Bson::Array(items));
                }
                None => return Err(self.error("unterminated array")),
                _ => {}
            }
            items.push(self.value(depth + 1)?);
            self.skip_trivia()?;
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(']') => {
                    self.bump();
                    return Ok(Bson::Array(items));
                }
                Some(c) => return Err(self.error(format!("expected ',' or ']', found '{c}'"))),
                None => return Err(self.error("unterminated array")),
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<String, LiteralError> {
        self.expect(quote)?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => self.escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), LiteralError> {
        let c = match self.bump() {
            None => return Err(self.error("unterminated escape")),
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('b') => '\u{8}',
            Some('f') => '\u{c}',
            Some('v') => '\u{b}',
            Some('0') => '\0',
            // line continuation
            Some('\n') => return Ok(()),
            Some('x') => {
                let code = self.hex_digits(2)?;
                char::from_u32(code).ok_or_else(|| self.error("invalid \\x escape"))?
            }
            Some('u') => self.unicode_escape()?,
            Some(c) => c,
        };
        out.push(c);
        Ok(())
    }

    fn unicode_escape(&mut self) -> Result<char, LiteralError> {
        let hi = self.hex_digits(4)?;
        if !(0xD800..0xDC00).contains(&hi) {
            return char::from_u32(hi).ok_or_else(|| self.error("invalid \\u escape"));
        }
        if self.peek() != Some('\\') || self.peek_at(1) != Some('u') {
            return Err(self.error("unpaired surrogate in \\u escape"));
        }
        self.pos += 2;
        let lo = self.hex_digits(4)?;
        if !(0xDC00..0xE000).contains(&lo) {
            return Err(self.error("invalid surrogate pair"));
        }
        let code = 0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00);
        char::from_u32(code).ok_or_else(|| self.error("invalid surrogate pair"))
    }

    fn hex_digits(&mut self, n: usize) -> Result<u32, LiteralError> {
        let mut code = 0u32;
        for _ in 0..n {
            let d = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid hex digit in escape"))?;
            code = code * 16 + d;
        }
        Ok(code)
    }

    fn regex(&mut self) -> Result<Bson, LiteralError> {
        self.expect('/')?;
        let mut pattern = String::new();
        let mut in_class = false;
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error("unterminated regular expression")),
                Some('\\') => {
                    pattern.push('\\');
                    match self.bump() {
                        Some(c) => pattern.push(c),
                        None => return Err(self.error("unterminated regular expression")),
                    }
                }
                Some('[') => {
                    in_class = true;
                    pattern.push('[');
                }
                Some(']') => {
                    in_class = false;
                    pattern.push(']');
                }
                Some('/') if !in_class => break,
                Some(c) => pattern.push(c),
            }
        }
        let flags = self.ident().to_string();
        regex_value(pattern, &flags).map_err(|m| self.error(m))
    }

    fn number(&mut self) -> Result<Bson, LiteralError> {
        let start = self.pos;
        let negative = match self.peek() {
            Some('-') => {
                self.bump();
                true
            }
            Some('+') => {
                self.bump();
                false
            }
            _ => false,
        };
        if self.peek().is_some_and(is_ident_start) {
            return match self.ident() {
                "Infinity" => Ok(Bson::Double(if negative { f64::NEG_INFINITY } else { f64::INFINITY })),
                other => Err(self.error(format!("invalid number '{other}'"))),
            };
        }
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.pos += 2;
            let digits = self.ident();
            let v = i64::from_str_radix(digits, 16)
                .map_err(|_| self.error(format!("invalid hex number '0x{digits}'")))?;
            return Ok(integer(if negative { -v } else { v }));
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    if matches!(self.peek_at(1), Some('+' | '-')) {
                        self.bump();
                    }
                }
                _ => break,
            }
            self.bump();
        }
        let text = &self.src[start..self.pos];
        if !is_float {
            if let Ok(v) = text.parse::<i64>() {
                return Ok(integer(v));
            }
        }
        text.parse::<f64>()
            .map(Bson::Double)
            .map_err(|_| LiteralError { offset: start, message: format!("invalid number '{text}'") })
    }

    fn word(&mut self, depth: usize) -> Result<Bson, LiteralError> {
        let start = self.pos;
        let word = self.ident();
        match word {
            "true" => Ok(Bson::Boolean(true)),
            "false" => Ok(Bson::Boolean(false)),
            "null" | "undefined" => Ok(Bson::Null),
            "Infinity" => Ok(Bson::Double(f64::INFINITY)),
            "NaN" => Ok(Bson::Double(f64::NAN)),
            "new" => {
                self.skip_trivia()?;
                let name = self.ident();
                if name.is_empty() {
                    return Err(self.error("expected a constructor after 'new'"));
                }
                self.constructor(name, depth)
            }
            "ObjectId" | "ISODate" | "Date" | "NumberInt" | "NumberLong" | "RegExp" => {
                self.constructor(word, depth)
            }
            other => Err(LiteralError { offset: start, message: format!("unknown identifier '{other}'") }),
        }
    }

    fn constructor(&mut self, name: &str, depth: usize) -> Result<Bson, LiteralError> {
        self.skip_trivia()?;
        self.expect('(')?;
        let mut args = Vec::new();
        loop {
            self.skip_trivia()?;
            if self.peek() == Some(')') {
                self.bump();
                break;
            }
            args.push(self.value(depth + 1)?);
            self.skip_trivia()?;
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(')') => {
                    self.bump();
                    break;
                }
                _ => return Err(self.error(format!("expected ',' or ')' in {name}(...)"))),
            }
        }
        construct(name, &args).map_err(|m| self.error(m))
    }
}

fn integer(v: i64) -> Bson {
    match i32::try_from(v) {
        Ok(i) => Bson::Int32(i),
        Err(_) => Bson::Int64(v),
    }
}

fn integral(v: &Bson) -> Option<i64> {
    match v {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        #[allow(clippy::cast_possible_truncation)]
        Bson::Double(d) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
        Bson::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn regex_value(pattern: String, flags: &str) -> Result<Bson, String> {
    let mut options: Vec<char> = Vec::new();
    for f in flags.chars() {
        if f == 'g' {
            continue;
        }
        if !REGEX_OPTIONS.contains(f) {
            return Err(format!("unsupported regular expression flag '{f}'"));
        }
        if !options.contains(&f) {
            options.push(f);
        }
    }
    options.sort_unstable();
    Ok(Bson::RegularExpression(Regex { pattern, options: options.into_iter().collect() }))
}

fn parse_date(s: &str) -> Option<DateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(DateTime::from_chrono(dt.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_chrono(naive.and_utc()));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::from_chrono(naive.and_utc()))
}

fn construct(name: &str, args: &[Bson]) -> Result<Bson, String> {
    match (name, args) {
        ("ObjectId", []) => Ok(Bson::ObjectId(ObjectId::new())),
        ("ObjectId", [Bson::String(hex)]) => ObjectId::parse_str(hex)
            .map(Bson::ObjectId)
            .map_err(|e| format!("invalid ObjectId: {e}")),
        ("ISODate" | "Date", []) => Ok(Bson::DateTime(DateTime::now())),
        ("ISODate" | "Date", [Bson::String(s)]) => {
            parse_date(s).map(Bson::DateTime).ok_or_else(|| format!("invalid date '{s}'"))
        }
        ("ISODate" | "Date", [n]) => integral(n)
            .map(|ms| Bson::DateTime(DateTime::from_millis(ms)))
            .ok_or_else(|| format!("invalid {name} argument")),
        ("NumberInt", [v]) => integral(v)
            .and_then(|i| i32::try_from(i).ok())
            .map(Bson::Int32)
            .ok_or_else(|| "NumberInt expects a 32-bit integer".to_string()),
        ("NumberLong", [v]) => integral(v)
            .map(Bson::Int64)
            .ok_or_else(|| "NumberLong expects an integer".to_string()),
        ("RegExp", [Bson::String(p)]) => regex_value(p.clone(), ""),
        ("RegExp", [Bson::String(p), Bson::String(flags)]) => regex_value(p.clone(), flags),
        ("RegExp", [Bson::RegularExpression(re)]) => Ok(Bson::RegularExpression(re.clone())),
        _ => Err(format!("unsupported arguments for {name}(...)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn unquoted_keys_and_trailing_commas() {
        let v = parse_value("{ title: 'Dune', year: 1965, tags: ['a', 'b',], }").unwrap();
        assert_eq!(v, Bson::Document(doc! { "title": "Dune", "year": 1965, "tags": ["a", "b"] }));
    }

    #[test]
    fn operators_keep_dollar_keys() {
        let v = parse_value("{pages: {$gte: 100, $lt: 2.5e2}}").unwrap();
        assert_eq!(v, Bson::Document(doc! { "pages": { "$gte": 100, "$lt": 250.0 } }));
    }

    #[test]
    fn large_integers_widen_to_int64() {
        assert_eq!(parse_value("3000000000").unwrap(), Bson::Int64(3_000_000_000));
        assert_eq!(parse_value("-7").unwrap(), Bson::Int32(-7));
    }

    #[test]
    fn regex_literal_with_flags() {
        let v = parse_value("/^the\\s[a-z/]+/gi").unwrap();
        match v {
            Bson::RegularExpression(re) => {
                assert_eq!(re.pattern, "^the\\s[a-z/]+");
                assert_eq!(re.options, "i");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn helper_constructors() {
        let v = parse_value("ObjectId('507f1f77bcf86cd799439011')").unwrap();
        assert!(matches!(v, Bson::ObjectId(_)));
        let v = parse_value("new Date('2020-01-01')").unwrap();
        assert_eq!(v, Bson::DateTime(DateTime::from_millis(1_577_836_800_000)));
        assert_eq!(parse_value("NumberLong(5)").unwrap(), Bson::Int64(5));
    }

    #[test]
    fn comments_are_skipped() {
        let args = parse_arguments("{a: 1} /* filter */, // projection\n {b: 1}").unwrap();
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn rejects_code() {
        assert!(parse_value("process.exit(1)").is_err());
        assert!(parse_arguments("{a: 1}; drop()").is_err());
    }

    #[test]
    fn blank_arguments_are_empty() {
        assert!(parse_arguments("   ").unwrap().is_empty());
    }
}
