// Recursive-descent JSON reader
use std::any::Any;
use std::collections::HashMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::number::Number;
use crate::registry::{Reader, Source, read_all};
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
pub struct JsonOptions {
    /// Deepest container nesting accepted
    pub max_depth: usize,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self { max_depth: 512 }
    }
}

/// Parses one value starting at the current (unconsumed) character.
pub type JsonReadHook = fn(&mut JsonParser<'_>) -> Result<Value>;

#[derive(Default)]
pub struct JsonReader {
    pub opts: JsonOptions,
    hooks: HashMap<u8, JsonReadHook>,
}

impl JsonReader {
    pub fn with_options(opts: JsonOptions) -> Self {
        Self {
            opts,
            hooks: HashMap::new(),
        }
    }

    /// Installs a hook for values whose first significant character is `ch`.
    pub fn hook(&mut self, ch: u8, func: JsonReadHook) -> Option<JsonReadHook> {
        self.hooks.insert(ch, func)
    }

    pub fn unhook(&mut self, ch: u8) -> Option<JsonReadHook> {
        self.hooks.remove(&ch)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Value> {
        let mut p = JsonParser {
            data,
            pos: 0,
            depth: 0,
            opts: self.opts,
            hooks: &self.hooks,
            escape_warned: false,
        };
        let v = p.parse_value()?;
        p.skip_ws();
        if p.pos < data.len() {
            return Err(p.error("trailing characters after document"));
        }
        debug!(bytes = data.len(), "json document decoded");
        Ok(v)
    }
}

impl Reader for JsonReader {
    fn probe(&self, head: &[u8]) -> u32 {
        let mut seen = 0;
        for &b in head {
            if b.is_ascii_whitespace() {
                continue;
            }
            if !b.is_ascii_graphic() {
                return 0;
            }
            if b == b'{' || b == b'[' {
                return 50;
            }
            seen += 1;
            if seen == 5 {
                break;
            }
        }
        if seen > 0 { 10 } else { 0 }
    }

    fn read(&self, src: &mut dyn Source) -> Result<Value> {
        let data = read_all(src)?;
        self.decode(&data)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct JsonParser<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
    opts: JsonOptions,
    hooks: &'a HashMap<u8, JsonReadHook>,
    #[cfg_attr(feature = "charset", allow(dead_code))]
    escape_warned: bool,
}

impl<'a> JsonParser<'a> {
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    pub fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    pub fn error(&self, msg: impl Into<String>) -> Error {
        Error::Syntax {
            pos: self.pos,
            msg: msg.into(),
        }
    }

    fn expect(&mut self, want: u8) -> Result<()> {
        match self.bump() {
            Some(b) if b == want => Ok(()),
            Some(b) => Err(Error::Syntax {
                pos: self.pos - 1,
                msg: format!("expected '{}', found '{}'", want as char, b as char),
            }),
            None => Err(self.error(format!("expected '{}', found end of input", want as char))),
        }
    }

    /// Dispatches on the next significant character.
    pub fn parse_value(&mut self) -> Result<Value> {
        self.skip_ws();
        let c = self.peek().ok_or_else(|| self.error("unexpected end of input"))?;
        if let Some(&hook) = self.hooks.get(&c) {
            return hook(self);
        }
        match c {
            b'{' => self.nested(Self::parse_object),
            b'[' => self.nested(Self::parse_array),
            b'"' | b'\'' => Ok(Value::string(self.parse_string()?)),
            b'0'..=b'9' | b'-' | b'+' | b'.' => self.parse_number(),
            b't' | b'f' | b'T' | b'F' => self.parse_boolean(),
            b'n' | b'N' => self.parse_null(),
            other => Err(self.error(format!("unexpected character '{}'", other as char))),
        }
    }

    fn nested(&mut self, f: fn(&mut Self) -> Result<Value>) -> Result<Value> {
        if self.depth >= self.opts.max_depth {
            return Err(self.error(format!("nesting deeper than {}", self.opts.max_depth)));
        }
        self.depth += 1;
        let v = f(self);
        self.depth -= 1;
        v
    }

    fn parse_object(&mut self) -> Result<Value> {
        self.expect(b'{')?;
        let dict = Value::dictionary();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(dict);
        }
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'"' | b'\'') => {}
                _ => return Err(self.error("expected string key")),
            }
            let key = self.parse_string()?;
            self.skip_ws();
            self.expect(b':')?;
            let val = self.parse_value()?;
            dict.insert_key(key, val)?;
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b'}') => break,
                _ => return Err(self.error("expected ',' or '}' in object")),
            }
        }
        Ok(dict)
    }

    fn parse_array(&mut self) -> Result<Value> {
        self.expect(b'[')?;
        let arr = Value::array();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(arr);
        }
        loop {
            arr.push(self.parse_value()?)?;
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b']') => break,
                _ => return Err(self.error("expected ',' or ']' in array")),
            }
        }
        Ok(arr)
    }

    /// Quoted string with either quote character; escapes resolved.
    pub fn parse_string(&mut self) -> Result<String> {
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let b = self
                .bump()
                .ok_or_else(|| self.error("unterminated string"))?;
            match b {
                b if b == quote => break,
                b'\\' => {
                    let e = self
                        .bump()
                        .ok_or_else(|| self.error("unterminated escape"))?;
                    match e {
                        b'"' | b'\'' | b'\\' | b'/' => buf.push(e),
                        b'b' => buf.push(0x08),
                        b'f' => buf.push(0x0C),
                        b'n' => buf.push(b'\n'),
                        b'r' => buf.push(b'\r'),
                        b't' => buf.push(b'\t'),
                        b'u' => self.unicode_escape(&mut buf)?,
                        other => {
                            return Err(self.error(format!("invalid escape '\\{}'", other as char)));
                        }
                    }
                }
                _ => buf.push(b),
            }
        }
        Ok(String::from_utf8(buf)?)
    }

    fn hex4(&mut self) -> Result<u16> {
        let digits = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| self.error("truncated \\u escape"))?;
        let s = std::str::from_utf8(digits).map_err(|_| self.error("invalid \\u escape"))?;
        let v = u16::from_str_radix(s, 16).map_err(|_| self.error("invalid \\u escape"))?;
        self.pos += 4;
        Ok(v)
    }

    #[cfg(feature = "charset")]
    fn unicode_escape(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        let hi = self.hex4()?;
        let mut code = hi as u32;
        if (0xD800..0xDC00).contains(&hi) && self.data[self.pos..].starts_with(b"\\u") {
            let save = self.pos;
            self.pos += 2;
            let lo = self.hex4()?;
            if (0xDC00..0xE000).contains(&lo) {
                code = 0x10000 + (((hi as u32) - 0xD800) << 10) + ((lo as u32) - 0xDC00);
            } else {
                self.pos = save;
            }
        }
        let ch = char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
        let mut tmp = [0u8; 4];
        buf.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
        Ok(())
    }

    // Without charset support the hex digits are kept as written.
    #[cfg(not(feature = "charset"))]
    fn unicode_escape(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        if !self.escape_warned {
            tracing::warn!("json: charset support disabled, \\u escapes kept verbatim");
            self.escape_warned = true;
        }
        let start = self.pos;
        self.hex4()?;
        buf.extend_from_slice(&self.data[start..self.pos]);
        Ok(())
    }

    /// Narrowest representation that holds the literal.
    fn parse_number(&mut self) -> Result<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;
        let text = text.strip_prefix('+').unwrap_or(text);
        let bad = || Error::Syntax {
            pos: start,
            msg: format!("invalid number '{text}'"),
        };
        let is_float = text.contains(['.', 'e', 'E']);
        let n = if is_float {
            Number::from_float(text.parse::<f64>().map_err(|_| bad())?)
        } else if text.starts_with('-') {
            match text.parse::<i64>() {
                Ok(v) => Number::from_signed(v),
                Err(_) => Number::from_float(text.parse::<f64>().map_err(|_| bad())?),
            }
        } else {
            match text.parse::<u64>() {
                Ok(v) => Number::from_unsigned(v),
                Err(_) => Number::from_float(text.parse::<f64>().map_err(|_| bad())?),
            }
        };
        Ok(Value::number(n))
    }

    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        // ASCII letters only
        std::str::from_utf8(&self.data[start..self.pos]).unwrap_or_default()
    }

    fn parse_boolean(&mut self) -> Result<Value> {
        let start = self.pos;
        let w = self.word();
        if w.eq_ignore_ascii_case("true") {
            Ok(Value::boolean(true))
        } else if w.eq_ignore_ascii_case("false") {
            Ok(Value::boolean(false))
        } else {
            Err(Error::Syntax {
                pos: start,
                msg: format!("invalid literal '{w}'"),
            })
        }
    }

    fn parse_null(&mut self) -> Result<Value> {
        let start = self.pos;
        let w = self.word();
        if w.eq_ignore_ascii_case("null") {
            Ok(Value::null())
        } else {
            Err(Error::Syntax {
                pos: start,
                msg: format!("invalid literal '{w}'"),
            })
        }
    }
}
