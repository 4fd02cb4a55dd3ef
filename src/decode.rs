//! Payload decoders.
//!
//! A notification carries its payload as a string. The dispatcher hands that string
//! to a [`Decoder`] before fanning the event out, so every subscriber receives the
//! same typed [`Value`].
//!
//! Two decoders ship with the crate:
//! - [`LiteralDecoder`] (the default) reads Python literal syntax: `None`, `True`,
//!   numbers, quoted strings, lists, tuples, dicts and sets.
//! - [`JsonDecoder`] reads JSON documents via `serde_json`.


use crate::error::DecodeError;
use crate::value::Value;

/// Maximum container nesting accepted by [`LiteralDecoder`].
pub const MAX_NESTING_DEPTH: usize = 200;

/// Converts a raw notification payload into a [`Value`].
pub trait Decoder: Send + Sync {
    /// Decode one payload.
    fn decode(&self, raw: &str) -> Result<Value, DecodeError>;
}

impl<F> Decoder for F
where
    F: Fn(&str) -> Result<Value, DecodeError> + Send + Sync,
{
    fn decode(&self, raw: &str) -> Result<Value, DecodeError> {
        self(raw)
    }
}

/// Decoder for Python literal syntax.
///
/// # Examples
///
/// ```
/// use pgnotifier::decode::{Decoder, LiteralDecoder};
/// use pgnotifier::Value;
///
/// let v = LiteralDecoder.decode("{'id': 7, 'tags': ('a', 'b')}").unwrap();
/// assert_eq!(v.get("id"), Some(&Value::Int(7)));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralDecoder;

impl Decoder for LiteralDecoder {
    fn decode(&self, raw: &str) -> Result<Value, DecodeError> {
        LiteralParser::new(raw).parse()
    }
}

/// Decoder for JSON payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, raw: &str) -> Result<Value, DecodeError> {
        serde_json::from_str::<serde_json::Value>(raw)
            .map(Value::from)
            .map_err(|e| DecodeError::Json { message: e.to_string() })
    }
}

enum StrPiece {
    Text(String),
    Bytes(Vec<u8>),
}

struct LiteralParser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    fn parse(mut self) -> Result<Value, DecodeError> {
        self.skip_ws();
        if self.peek().is_none() {
            return Err(DecodeError::UnexpectedEnd);
        }
        let first = self.parse_expr()?;
        self.skip_ws();

        // A bare comma-separated sequence is a tuple, as in `1, 2`.
        let value = if self.eat(',') {
            let mut items = vec![first];
            loop {
                self.skip_ws();
                if self.peek().is_none() {
                    break;
                }
                items.push(self.parse_expr()?);
                self.skip_ws();
                if !self.eat(',') {
                    break;
                }
            }
            Value::Tuple(items)
        } else {
            first
        };

        self.skip_ws();
        match self.peek() {
            None => Ok(value),
            Some(c) => Err(DecodeError::syntax(self.pos, format!("unexpected '{c}' after value"))),
        }
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

    fn eat(&mut self, want: char) -> bool {
        if self.peek() == Some(want) {
            self.pos += want.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: char) -> Result<(), DecodeError> {
        match self.peek() {
            Some(c) if c == want => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(c) => Err(DecodeError::syntax(self.pos, format!("expected '{want}', found '{c}'"))),
            None => Err(DecodeError::UnexpectedEnd),
        }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else if c == '\\' && matches!(self.peek_at(1), Some('\n')) {
                self.pos += 2;
            } else {
                break;
            }
        }
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(DecodeError::TooDeep {
                limit: MAX_NESTING_DEPTH,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_expr(&mut self) -> Result<Value, DecodeError> {
        self.skip_ws();
        let Some(c) = self.peek() else {
            return Err(DecodeError::UnexpectedEnd);
        };
        match c {
            '[' => self.parse_list(),
            '(' => self.parse_paren(),
            '{' => self.parse_brace(),
            '\'' | '"' => self.parse_strings(),
            '+' | '-' => {
                self.pos += 1;
                self.skip_ws();
                match self.peek() {
                    Some(d) if d.is_ascii_digit() || d == '.' => self.parse_number(c == '-'),
                    Some(d) => Err(DecodeError::Unsupported {
                        literal: format!("unary '{c}' applied to '{d}'"),
                    }),
                    None => Err(DecodeError::UnexpectedEnd),
                }
            }
            c if c.is_ascii_digit() => self.parse_number(false),
            '.' if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) => self.parse_number(false),
            c if c.is_alphabetic() || c == '_' => self.parse_name(),
            c => Err(DecodeError::syntax(self.pos, format!("unexpected '{c}'"))),
        }
    }

    fn parse_name(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let name = &self.src[start..self.pos];

        if matches!(self.peek(), Some('\'' | '"')) && is_string_prefix(name) {
            self.pos = start;
            return self.parse_strings();
        }

        match name {
            "None" => Ok(Value::None),
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "set" => {
                self.skip_ws();
                self.expect('(')?;
                self.skip_ws();
                self.expect(')')?;
                Ok(Value::Set(Vec::new()))
            }
            other => Err(DecodeError::Unsupported {
                literal: format!("name '{other}'"),
            }),
        }
    }

    fn parse_number(&mut self, negative: bool) -> Result<Value, DecodeError> {
        let start = self.pos;
        let mut prev = '\0';
        while let Some(c) = self.peek() {
            let exponent_sign = (c == '+' || c == '-') && matches!(prev, 'e' | 'E') && !is_radix_literal(&self.src[start..self.pos]);
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || exponent_sign {
                self.pos += 1;
                prev = c;
            } else {
                break;
            }
        }
        let literal = &self.src[start..self.pos];

        if literal.starts_with('_') || literal.ends_with('_') || literal.contains("__") {
            return Err(DecodeError::syntax(start, format!("invalid number '{literal}'")));
        }
        if literal.ends_with(['j', 'J']) {
            return Err(DecodeError::Unsupported {
                literal: format!("complex number '{literal}'"),
            });
        }

        let sign = if negative { "-" } else { "" };
        let lower = literal.to_ascii_lowercase();
        let radix = match lower.get(..2) {
            Some("0x") => Some(16),
            Some("0o") => Some(8),
            Some("0b") => Some(2),
            _ => None,
        };

        if let Some(radix) = radix {
            let digits = lower[2..].trim_start_matches('_').replace('_', "");
            if let Ok(v) = i64::from_str_radix(&format!("{sign}{digits}"), radix) {
                return Ok(Value::Int(v));
            }
            return radix_to_decimal(&digits, radix)
                .map(|decimal| big_int(sign, &decimal))
                .ok_or_else(|| DecodeError::syntax(start, format!("invalid number '{literal}'")));
        }

        let cleaned = literal.replace('_', "");
        if cleaned.contains(['.', 'e', 'E']) {
            return format!("{sign}{cleaned}")
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| DecodeError::syntax(start, format!("invalid number '{literal}'")));
        }

        if cleaned.len() > 1 && cleaned.starts_with('0') && cleaned.bytes().any(|b| b != b'0') {
            return Err(DecodeError::syntax(
                start,
                format!("leading zeros in decimal integer '{literal}'"),
            ));
        }
        if cleaned.is_empty() || !cleaned.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DecodeError::syntax(start, format!("invalid number '{literal}'")));
        }
        Ok(format!("{sign}{cleaned}")
            .parse::<i64>()
            .map_or_else(|_| big_int(sign, &cleaned), Value::Int))
    }

    fn parse_list(&mut self) -> Result<Value, DecodeError> {
        self.enter()?;
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(']') {
                break;
            }
            items.push(self.parse_expr()?);
            self.skip_ws();
            if self.eat(']') {
                break;
            }
            self.expect(',')?;
        }
        self.leave();
        Ok(Value::List(items))
    }

    fn parse_paren(&mut self) -> Result<Value, DecodeError> {
        self.enter()?;
        self.expect('(')?;
        self.skip_ws();
        if self.eat(')') {
            self.leave();
            return Ok(Value::Tuple(Vec::new()));
        }

        let first = self.parse_expr()?;
        self.skip_ws();
        if self.eat(')') {
            // Parenthesised expression, not a tuple.
            self.leave();
            return Ok(first);
        }
        self.expect(',')?;

        let mut items = vec![first];
        loop {
            self.skip_ws();
            if self.eat(')') {
                break;
            }
            items.push(self.parse_expr()?);
            self.skip_ws();
            if self.eat(')') {
                break;
            }
            self.expect(',')?;
        }
        self.leave();
        Ok(Value::Tuple(items))
    }

    fn parse_brace(&mut self) -> Result<Value, DecodeError> {
        self.enter()?;
        self.expect('{')?;
        self.skip_ws();
        if self.eat('}') {
            self.leave();
            return Ok(Value::Dict(Vec::new()));
        }

        let first = self.parse_expr()?;
        self.skip_ws();
        let value = if self.eat(':') {
            let first_value = self.parse_expr()?;
            let mut entries: Vec<(Value, Value)> = Vec::new();
            insert_entry(&mut entries, first, first_value)?;
            loop {
                self.skip_ws();
                if self.eat('}') {
                    break;
                }
                self.expect(',')?;
                self.skip_ws();
                if self.eat('}') {
                    break;
                }
                let key = self.parse_expr()?;
                self.skip_ws();
                self.expect(':')?;
                let val = self.parse_expr()?;
                insert_entry(&mut entries, key, val)?;
            }
            Value::Dict(entries)
        } else {
            let mut items: Vec<Value> = Vec::new();
            insert_member(&mut items, first)?;
            loop {
                self.skip_ws();
                if self.eat('}') {
                    break;
                }
                self.expect(',')?;
                self.skip_ws();
                if self.eat('}') {
                    break;
                }
                let item = self.parse_expr()?;
                insert_member(&mut items, item)?;
            }
            Value::Set(items)
        };
        self.leave();
        Ok(value)
    }

    /// Parses one or more adjacent string literals and joins them.
    fn parse_strings(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        let mut joined: Option<StrPiece> = None;
        loop {
            let piece = self.parse_one_string()?;
            joined = Some(match (joined, piece) {
                (None, p) => p,
                (Some(StrPiece::Text(mut a)), StrPiece::Text(b)) => {
                    a.push_str(&b);
                    StrPiece::Text(a)
                }
                (Some(StrPiece::Bytes(mut a)), StrPiece::Bytes(b)) => {
                    a.extend_from_slice(&b);
                    StrPiece::Bytes(a)
                }
                _ => {
                    return Err(DecodeError::syntax(start, "cannot mix bytes and text literals"));
                }
            });

            let save = self.pos;
            self.skip_ws();
            if !self.at_string_start() {
                self.pos = save;
                break;
            }
        }

        match joined {
            Some(StrPiece::Text(s)) => Ok(Value::String(s)),
            Some(StrPiece::Bytes(b)) => Ok(Value::Bytes(b)),
            None => Err(DecodeError::UnexpectedEnd),
        }
    }

    fn at_string_start(&self) -> bool {
        let rest = &self.src[self.pos..];
        let prefix_len = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_alphabetic())
            .map_or(rest.len(), |(i, _)| i);
        (prefix_len == 0 || is_string_prefix(&rest[..prefix_len]))
            && matches!(rest[prefix_len..].chars().next(), Some('\'' | '"'))
    }

    fn parse_one_string(&mut self) -> Result<StrPiece, DecodeError> {
        let start = self.pos;
        let mut raw = false;
        let mut bytes = false;
        while let Some(c) = self.peek() {
            match c.to_ascii_lowercase() {
                'r' => raw = true,
                'b' => bytes = true,
                'u' => {}
                'f' => {
                    return Err(DecodeError::Unsupported {
                        literal: "f-string".to_string(),
                    })
                }
                _ => break,
            }
            self.pos += 1;
        }

        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(DecodeError::syntax(start, "expected string literal")),
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.pos += 2;
        }

        let mut text = String::new();
        let mut out: Vec<u8> = Vec::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(DecodeError::syntax(start, "unterminated string literal"));
            };

            if c == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.pos += 2;
                    break;
                }
            } else if c == '\n' && !triple {
                return Err(DecodeError::syntax(start, "unterminated string literal"));
            } else if c == '\\' {
                if raw {
                    push_char(&mut text, &mut out, bytes, '\\', self.pos)?;
                    if let Some(next) = self.bump() {
                        push_char(&mut text, &mut out, bytes, next, self.pos)?;
                    }
                } else {
                    self.parse_escape(&mut text, &mut out, bytes)?;
                }
                continue;
            }

            push_char(&mut text, &mut out, bytes, c, self.pos)?;
        }

        Ok(if bytes { StrPiece::Bytes(out) } else { StrPiece::Text(text) })
    }

    fn parse_escape(&mut self, text: &mut String, out: &mut Vec<u8>, bytes: bool) -> Result<(), DecodeError> {
        let at = self.pos;
        let Some(c) = self.bump() else {
            return Err(DecodeError::UnexpectedEnd);
        };
        let simple = match c {
            '\n' => return Ok(()),
            '\\' => Some('\\'),
            '\'' => Some('\''),
            '"' => Some('"'),
            'a' => Some('\u{07}'),
            'b' => Some('\u{08}'),
            'f' => Some('\u{0C}'),
            'n' => Some('\n'),
            'r' => Some('\r'),
            't' => Some('\t'),
            'v' => Some('\u{0B}'),
            _ => None,
        };
        if let Some(s) = simple {
            return push_char(text, out, bytes, s, at);
        }

        match c {
            '0'..='7' => {
                let mut code = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            self.pos += 1;
                        }
                        None => break,
                    }
                }
                push_code(text, out, bytes, code, at)
            }
            'x' => {
                let code = self.read_hex(2, at)?;
                push_code(text, out, bytes, code, at)
            }
            'u' | 'U' if !bytes => {
                let width = if c == 'u' { 4 } else { 8 };
                let code = self.read_hex(width, at)?;
                push_code(text, out, bytes, code, at)
            }
            'N' if !bytes => Err(DecodeError::Unsupported {
                literal: "named unicode escape".to_string(),
            }),
            other => {
                // Unknown escapes keep the backslash.
                push_char(text, out, bytes, '\\', at)?;
                push_char(text, out, bytes, other, at)
            }
        }
    }

    fn read_hex(&mut self, width: usize, at: usize) -> Result<u32, DecodeError> {
        let end = self.pos + width;
        let digits = self
            .src
            .get(self.pos..end)
            .filter(|d| d.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| DecodeError::syntax(at, "truncated hex escape"))?;
        let code = u32::from_str_radix(digits, 16).map_err(|_| DecodeError::syntax(at, "invalid hex escape"))?;
        self.pos = end;
        Ok(code)
    }
}

fn is_string_prefix(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "r" | "u" | "b" | "br" | "rb" | "f" | "fr" | "rf"
    )
}

fn is_radix_literal(literal: &str) -> bool {
    matches!(
        literal.get(..2).map(str::to_ascii_lowercase).as_deref(),
        Some("0x" | "0o" | "0b")
    )
}

/// Integer outside the `i64` range, kept exactly as decimal text.
fn big_int(sign: &str, digits: &str) -> Value {
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Value::Int(0);
    }
    Value::BigInt(format!("{sign}{digits}"))
}

/// Converts a hex/octal/binary digit string to decimal. `None` on an invalid digit.
fn radix_to_decimal(digits: &str, radix: u32) -> Option<String> {
    const LIMB: u64 = 1_000_000_000;

    if digits.is_empty() {
        return None;
    }
    // Little-endian base-10^9 limbs.
    let mut limbs: Vec<u64> = vec![0];
    for c in digits.chars() {
        let mut carry = u64::from(c.to_digit(radix)?);
        for limb in &mut limbs {
            let v = *limb * u64::from(radix) + carry;
            *limb = v % LIMB;
            carry = v / LIMB;
        }
        if carry > 0 {
            limbs.push(carry);
        }
    }

    let mut out = String::new();
    let mut iter = limbs.iter().rev();
    if let Some(top) = iter.next() {
        out.push_str(&top.to_string());
    }
    for limb in iter {
        out.push_str(&format!("{limb:09}"));
    }
    Some(out)
}

fn push_char(text: &mut String, out: &mut Vec<u8>, bytes: bool, c: char, at: usize) -> Result<(), DecodeError> {
    if bytes {
        if !c.is_ascii() {
            return Err(DecodeError::syntax(at, "bytes can only contain ASCII literal characters"));
        }
        out.push(c as u8);
    } else {
        text.push(c);
    }
    Ok(())
}

fn push_code(text: &mut String, out: &mut Vec<u8>, bytes: bool, code: u32, at: usize) -> Result<(), DecodeError> {
    if bytes {
        let byte = u8::try_from(code).map_err(|_| DecodeError::syntax(at, "escape out of byte range"))?;
        out.push(byte);
        return Ok(());
    }
    let c = char::from_u32(code).ok_or_else(|| DecodeError::syntax(at, "invalid unicode escape"))?;
    text.push(c);
    Ok(())
}

fn check_hashable(value: &Value) -> Result<(), DecodeError> {
    match value {
        Value::List(_) | Value::Dict(_) | Value::Set(_) => Err(DecodeError::Unsupported {
            literal: format!("unhashable type: '{}'", value.type_name()),
        }),
        Value::Tuple(items) => items.iter().try_for_each(check_hashable),
        _ => Ok(()),
    }
}

fn insert_entry(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) -> Result<(), DecodeError> {
    check_hashable(&key)?;
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some(existing) => existing.1 = value,
        None => entries.push((key, value)),
    }
    Ok(())
}

fn insert_member(items: &mut Vec<Value>, item: Value) -> Result<(), DecodeError> {
    check_hashable(&item)?;
    if !items.contains(&item) {
        items.push(item);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(raw: &str) -> Value {
        LiteralDecoder.decode(raw).unwrap()
    }

    fn lit_err(raw: &str) -> DecodeError {
        LiteralDecoder.decode(raw).unwrap_err()
    }

    #[test]
    fn test_primitives() {
        assert_eq!(lit("None"), Value::None);
        assert_eq!(lit("True"), Value::Bool(true));
        assert_eq!(lit(" False "), Value::Bool(false));
        assert_eq!(lit("42"), Value::Int(42));
        assert_eq!(lit("-7"), Value::Int(-7));
        assert_eq!(lit("+3"), Value::Int(3));
        assert_eq!(lit("1_000"), Value::Int(1000));
        assert_eq!(lit("0"), Value::Int(0));
        assert_eq!(lit("000"), Value::Int(0));
    }

    #[test]
    fn test_radix_integers() {
        assert_eq!(lit("0xff"), Value::Int(255));
        assert_eq!(lit("0o17"), Value::Int(15));
        assert_eq!(lit("0b1010"), Value::Int(10));
        assert_eq!(lit("-0x10"), Value::Int(-16));
    }

    #[test]
    fn test_integer_bounds() {
        assert_eq!(lit("-9223372036854775808"), Value::Int(i64::MIN));
        assert_eq!(lit("9223372036854775807"), Value::Int(i64::MAX));
        assert_eq!(lit("9223372036854775808"), Value::BigInt("9223372036854775808".to_string()));
        assert_eq!(lit("-9223372036854775809"), Value::BigInt("-9223372036854775809".to_string()));
        assert_eq!(
            lit("{'id': 12345678901234567890}").get("id"),
            Some(&Value::BigInt("12345678901234567890".to_string()))
        );
    }

    #[test]
    fn test_big_radix_integers() {
        assert_eq!(lit("0xffffffffffffffff"), Value::BigInt("18446744073709551615".to_string()));
        assert_eq!(
            lit("-0x1_0000_0000_0000_0000"),
            Value::BigInt("-18446744073709551616".to_string())
        );
        assert_eq!(lit("0b1"), Value::Int(1));
        assert_eq!(lit("0o7777777777777777777777"), Value::BigInt("73786976294838206463".to_string()));
        assert!(matches!(lit_err("0xfg"), DecodeError::Syntax { .. }));
    }

    #[test]
    fn test_floats() {
        assert_eq!(lit("1.5"), Value::Float(1.5));
        assert_eq!(lit(".5"), Value::Float(0.5));
        assert_eq!(lit("2."), Value::Float(2.0));
        assert_eq!(lit("1e3"), Value::Float(1000.0));
        assert_eq!(lit("-2.5e-1"), Value::Float(-0.25));
    }

    #[test]
    fn test_strings() {
        assert_eq!(lit("'orders'"), Value::from("orders"));
        assert_eq!(lit("\"it's\""), Value::from("it's"));
        assert_eq!(lit(r"'a\nb'"), Value::from("a\nb"));
        assert_eq!(lit(r"'\x41é\101'"), Value::from("Aé\u{41}"));
        assert_eq!(lit(r"r'\d+'"), Value::from(r"\d+"));
        assert_eq!(lit(r"'\q'"), Value::from(r"\q"));
        assert_eq!(lit("'a' \"b\""), Value::from("ab"));
        assert_eq!(lit("'''x\n'y'''"), Value::from("x\n'y"));
        assert_eq!(lit("u'ü'"), Value::from("ü"));
    }

    #[test]
    fn test_bytes() {
        assert_eq!(lit(r"b'ab\x00'"), Value::Bytes(vec![b'a', b'b', 0]));
        assert!(matches!(lit_err("b'a' 'b'"), DecodeError::Syntax { .. }));
        assert!(matches!(lit_err("b'é'"), DecodeError::Syntax { .. }));
    }

    #[test]
    fn test_sequences() {
        assert_eq!(lit("[1, 2, 3]"), Value::from(vec![1, 2, 3]));
        assert_eq!(lit("[]"), Value::List(vec![]));
        assert_eq!(lit("[1, [2, [3]],]").to_string(), "[1, [2, [3]]]");
        assert_eq!(lit("()"), Value::Tuple(vec![]));
        assert_eq!(lit("(1,)"), Value::Tuple(vec![Value::Int(1)]));
        assert_eq!(lit("(1)"), Value::Int(1));
        assert_eq!(lit("1, 'a'"), Value::Tuple(vec![Value::Int(1), Value::from("a")]));
    }

    #[test]
    fn test_mappings_and_sets() {
        let v = lit("{'id': 1, 'rows': [(1, 'a')], 'id': 2}");
        assert_eq!(v.as_dict().map(<[_]>::len), Some(2));
        assert_eq!(v.get("id"), Some(&Value::Int(2)));
        assert_eq!(lit("{}"), Value::Dict(vec![]));
        assert_eq!(lit("{1, 2, 2}"), Value::Set(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(lit("set()"), Value::Set(vec![]));
        assert_eq!(lit("{(1, 2): None}").to_string(), "{(1, 2): None}");
    }

    #[test]
    fn test_unhashable_keys_rejected() {
        assert!(matches!(lit_err("{[1]: 2}"), DecodeError::Unsupported { .. }));
        assert!(matches!(lit_err("{{1}}"), DecodeError::Unsupported { .. }));
    }

    #[test]
    fn test_multiline_and_comments() {
        let v = lit("[\n  1,  # first\n  2,\n]");
        assert_eq!(v, Value::from(vec![1, 2]));
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(matches!(lit_err("not-valid-literal((("), DecodeError::Unsupported { .. }));
        assert!(matches!(lit_err(""), DecodeError::UnexpectedEnd));
        assert!(matches!(lit_err("[1, 2"), DecodeError::UnexpectedEnd));
        assert!(matches!(lit_err("'abc"), DecodeError::Syntax { .. }));
        assert!(matches!(lit_err("1 2"), DecodeError::Syntax { .. }));
        assert!(matches!(lit_err("012"), DecodeError::Syntax { .. }));
        assert!(matches!(lit_err("--1"), DecodeError::Unsupported { .. }));
        assert!(matches!(lit_err("1j"), DecodeError::Unsupported { .. }));
        assert!(matches!(lit_err("f'x'"), DecodeError::Unsupported { .. }));
        assert!(matches!(lit_err("os.system('x')"), DecodeError::Unsupported { .. }));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}{}", "[".repeat(MAX_NESTING_DEPTH + 1), "]".repeat(MAX_NESTING_DEPTH + 1));
        assert!(matches!(lit_err(&deep), DecodeError::TooDeep { .. }));

        let ok = format!("{}{}", "[".repeat(MAX_NESTING_DEPTH), "]".repeat(MAX_NESTING_DEPTH));
        assert!(LiteralDecoder.decode(&ok).is_ok());
    }

    #[test]
    fn test_json_decoder() {
        let v = JsonDecoder.decode(r#"{"op": "insert", "ids": [1, 2]}"#).unwrap();
        assert_eq!(v.get("op").and_then(Value::as_str), Some("insert"));
        assert!(matches!(
            JsonDecoder.decode("{'op': 1}").unwrap_err(),
            DecodeError::Json { .. }
        ));
    }

    #[test]
    fn test_closure_decoder() {
        let upper = |raw: &str| -> Result<Value, DecodeError> { Ok(Value::from(raw.to_uppercase())) };
        assert_eq!(upper.decode("abc").unwrap(), Value::from("ABC"));
    }
}
