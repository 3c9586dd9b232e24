// JSON writer: pretty (4-space indent) or deflated (no whitespace)
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write;

use crate::error::{Error, Result};
use crate::number::Number;
use crate::registry::{Format, Writer};
use crate::value::{Kind, Value};

const INDENT: &str = "    ";

/// Writes `value` at nesting `level` (0 for the root).
pub type JsonWriteHook = fn(&mut JsonEncoder<'_>, &Value, usize) -> Result<()>;

#[derive(Default)]
pub struct JsonWriter {
    hooks: HashMap<Kind, JsonWriteHook>,
}

impl JsonWriter {
    pub fn hook(&mut self, kind: Kind, func: JsonWriteHook) -> Option<JsonWriteHook> {
        self.hooks.insert(kind, func)
    }

    pub fn unhook(&mut self, kind: Kind) -> Option<JsonWriteHook> {
        self.hooks.remove(&kind)
    }

    pub fn encode(&self, root: &Value, deflate: bool) -> Result<String> {
        let mut enc = JsonEncoder {
            out: String::new(),
            deflate,
            hooks: &self.hooks,
        };
        enc.write_value(root, 0)?;
        enc.newline();
        Ok(enc.out)
    }
}

impl Writer for JsonWriter {
    fn write(&self, value: &Value, sink: &mut dyn Write, deflate: bool) -> Result<usize> {
        let text = self.encode(value, deflate)?;
        sink.write_all(text.as_bytes())?;
        Ok(text.len())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct JsonEncoder<'a> {
    out: String,
    deflate: bool,
    hooks: &'a HashMap<Kind, JsonWriteHook>,
}

impl JsonEncoder<'_> {
    pub fn is_deflate(&self) -> bool {
        self.deflate
    }

    pub fn push_str(&mut self, s: &str) {
        self.out.push_str(s);
    }

    pub fn newline(&mut self) {
        if !self.deflate {
            self.out.push('\n');
        }
    }

    pub fn indent(&mut self, level: usize) {
        if !self.deflate {
            for _ in 0..level {
                self.out.push_str(INDENT);
            }
        }
    }

    pub fn write_value(&mut self, v: &Value, level: usize) -> Result<()> {
        let kind = v.kind();
        if let Some(&hook) = self.hooks.get(&kind) {
            return hook(self, v, level);
        }
        match kind {
            Kind::Null => self.out.push_str("null"),
            Kind::Boolean => {
                let b = v.as_bool().unwrap_or_default();
                self.out.push_str(if b { "true" } else { "false" });
            }
            Kind::Number => {
                if let Some(n) = v.as_number() {
                    self.write_number(n);
                }
            }
            Kind::String => {
                let s = v.to_string_value().unwrap_or_default();
                self.write_string(&s);
            }
            Kind::Array => {
                let items = v.items();
                if items.is_empty() {
                    self.out.push_str("[]");
                    return Ok(());
                }
                self.out.push('[');
                self.newline();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                        self.newline();
                    }
                    self.indent(level + 1);
                    self.write_value(item, level + 1)?;
                }
                self.newline();
                self.indent(level);
                self.out.push(']');
            }
            Kind::Dictionary => {
                let entries = v.entries();
                if entries.is_empty() {
                    self.out.push_str("{}");
                    return Ok(());
                }
                self.out.push('{');
                self.newline();
                for (i, (key, val)) in entries.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                        self.newline();
                    }
                    self.indent(level + 1);
                    self.write_string(key);
                    self.out.push_str(if self.deflate { ":" } else { ": " });
                    self.write_value(val, level + 1)?;
                }
                self.newline();
                self.indent(level);
                self.out.push('}');
            }
            Kind::Data | Kind::Date => {
                return Err(Error::UnsupportedKind {
                    format: Format::Json,
                    kind,
                });
            }
        }
        Ok(())
    }

    // floats in shortest round-trip form; non-finite values have no JSON spelling
    fn write_number(&mut self, n: Number) {
        match n {
            Number::F32(f) if f.is_finite() => {
                write!(self.out, "{f:?}").ok();
            }
            Number::F64(f) if f.is_finite() => {
                write!(self.out, "{f:?}").ok();
            }
            Number::F32(_) | Number::F64(_) => self.out.push_str("null"),
            _ => {
                write!(self.out, "{n}").ok();
            }
        }
    }

    pub fn write_string(&mut self, s: &str) {
        self.out.push('"');
        self.out.push_str(&escape_json(s));
        self.out.push('"');
    }
}

pub fn escape_json(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            c if c.is_control() => {
                write!(&mut out, "\\u{:04x}", c as u32).ok();
            }
            c => out.push(c),
        }
    }
    out
}
