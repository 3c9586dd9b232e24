// Writer for the compact TLV binary format ("tbo00")
use std::any::Any;
use std::collections::HashMap;
use std::io::Write;

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use crate::binfmt::{MAGIC, TYPE_REF, xor_payload};
use crate::error::Result;
use crate::number::Number;
use crate::registry::Writer;
use crate::value::{Kind, Value};

/// Encodes one value, header included.
pub type BinWriteHook = fn(&mut BinEncoder<'_>, &Value) -> Result<()>;

#[derive(Default)]
pub struct BinWriter {
    hooks: HashMap<Kind, BinWriteHook>,
}

impl BinWriter {
    pub fn hook(&mut self, kind: Kind, func: BinWriteHook) -> Option<BinWriteHook> {
        self.hooks.insert(kind, func)
    }

    pub fn unhook(&mut self, kind: Kind) -> Option<BinWriteHook> {
        self.hooks.remove(&kind)
    }

    pub fn encode(&self, root: &Value) -> Result<Vec<u8>> {
        let mut w = BinEncoder::new(&self.hooks);
        w.out.extend_from_slice(MAGIC);
        w.write_value(root)?;
        debug!(objects = w.next, bytes = w.out.len(), "bin document encoded");
        Ok(w.out)
    }
}

impl Writer for BinWriter {
    // the binary form has no layout choices; deflate is ignored
    fn write(&self, value: &Value, sink: &mut dyn Write, _deflate: bool) -> Result<usize> {
        let bytes = self.encode(value)?;
        sink.write_all(&bytes)?;
        Ok(bytes.len())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Encode state for one document.
pub struct BinEncoder<'a> {
    out: Vec<u8>,
    // identity -> back-reference index
    objects: HashMap<usize, u64>,
    // dictionary key content -> back-reference index
    keys: HashMap<String, u64>,
    next: u64,
    hooks: &'a HashMap<Kind, BinWriteHook>,
}

impl<'a> BinEncoder<'a> {
    fn new(hooks: &'a HashMap<Kind, BinWriteHook>) -> Self {
        Self {
            out: Vec::with_capacity(1024),
            objects: HashMap::new(),
            keys: HashMap::new(),
            next: 0,
            hooks,
        }
    }

    /// Writes a child of a container: a back-reference when the same object
    /// was already emitted, otherwise the object itself, numbered afterwards.
    pub fn write_child(&mut self, v: &Value) -> Result<()> {
        if let Some(&index) = self.objects.get(&v.id()) {
            self.write_type_size(TYPE_REF, index);
            return Ok(());
        }
        self.write_value(v)?;
        self.objects.insert(v.id(), self.next);
        self.next += 1;
        Ok(())
    }

    /// Dictionary keys are String objects deduplicated by content.
    pub fn write_key(&mut self, key: &str) {
        if let Some(&index) = self.keys.get(key) {
            self.write_type_size(TYPE_REF, index);
            return;
        }
        self.write_type_size(Kind::String.id() as u16, key.len() as u64);
        self.write_xor(key.as_bytes());
        self.keys.insert(key.to_string(), self.next);
        self.next += 1;
    }

    fn write_value(&mut self, v: &Value) -> Result<()> {
        let kind = v.kind();
        if let Some(&hook) = self.hooks.get(&kind) {
            return hook(self, v);
        }
        let ty = kind.id() as u16;
        match kind {
            Kind::Null => self.write_type_size(ty, 0),
            Kind::Boolean => {
                let b = v.as_bool().unwrap_or_default();
                self.write_type_size(ty, b as u64)
            }
            Kind::Date => self.write_type_size(ty, v.as_date().unwrap_or_default() as u64),
            Kind::Number => {
                if let Some(n) = v.as_number() {
                    self.write_number(n);
                }
            }
            Kind::String => {
                let s = v.to_string_value().unwrap_or_default();
                self.write_type_size(ty, s.len() as u64);
                self.write_xor(s.as_bytes());
            }
            Kind::Data => {
                let bytes = v.as_bytes().map(|b| b.to_vec()).unwrap_or_default();
                self.write_type_size(ty, bytes.len() as u64);
                self.write_xor(&bytes);
            }
            Kind::Array => {
                let items = v.items();
                self.write_type_size(ty, items.len() as u64);
                for item in &items {
                    self.write_child(item)?;
                }
            }
            Kind::Dictionary => {
                let entries = v.entries();
                self.write_type_size(ty, entries.len() as u64);
                for (key, val) in &entries {
                    self.write_key(key);
                    self.write_child(val)?;
                }
            }
        }
        Ok(())
    }

    fn write_number(&mut self, n: Number) {
        self.write_type_size(Kind::Number.id() as u16, n.number_type() as u64);
        let mut buf = [0u8; 8];
        let len = match n {
            Number::U8(v) => {
                buf[0] = v;
                1
            }
            Number::I8(v) => {
                buf[0] = v as u8;
                1
            }
            Number::U16(v) => {
                BigEndian::write_u16(&mut buf, v);
                2
            }
            Number::I16(v) => {
                BigEndian::write_i16(&mut buf, v);
                2
            }
            Number::U32(v) => {
                BigEndian::write_u32(&mut buf, v);
                4
            }
            Number::I32(v) => {
                BigEndian::write_i32(&mut buf, v);
                4
            }
            Number::U64(v) => {
                BigEndian::write_u64(&mut buf, v);
                8
            }
            Number::I64(v) => {
                BigEndian::write_i64(&mut buf, v);
                8
            }
            Number::F32(v) => {
                BigEndian::write_f32(&mut buf, v);
                4
            }
            Number::F64(v) => {
                BigEndian::write_f64(&mut buf, v);
                8
            }
        };
        self.out.extend_from_slice(&buf[..len]);
    }

    /// Header with the narrowest size encoding.
    pub fn write_type_size(&mut self, ty: u16, size: u64) {
        let (nibble, width) = size_encoding(size);
        if ty < 0xF {
            self.out.push(((ty as u8) << 4) | nibble);
        } else {
            self.out.push(0xF0 | nibble);
            self.out.push(ty as u8);
        }
        if width > 0 {
            let mut buf = [0u8; 8];
            BigEndian::write_uint(&mut buf, size, width);
            self.out.extend_from_slice(&buf[..width]);
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    /// Payload bytes under the rolling XOR
    pub fn write_xor(&mut self, bytes: &[u8]) {
        let start = self.out.len();
        self.out.extend_from_slice(bytes);
        xor_payload(&mut self.out[start..]);
    }
}

/// Low nibble and trailing width for `size`
fn size_encoding(size: u64) -> (u8, usize) {
    match size {
        0..=11 => (size as u8, 0),
        12..=0xFF => (12, 1),
        0x100..=0xFFFF => (13, 2),
        0x1_0000..=0xFFFF_FFFF => (14, 4),
        _ => (15, 8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_encoding_picks_narrowest() {
        assert_eq!(size_encoding(11), (11, 0));
        assert_eq!(size_encoding(12), (12, 1));
        assert_eq!(size_encoding(255), (12, 1));
        assert_eq!(size_encoding(256), (13, 2));
        assert_eq!(size_encoding(65536), (14, 4));
        assert_eq!(size_encoding(1 << 32), (15, 8));
    }

    #[test]
    fn extended_type_header() {
        let hooks = HashMap::new();
        let mut w = BinEncoder::new(&hooks);
        w.write_type_size(20, 300);
        assert_eq!(w.out, vec![0xFD, 20, 0x01, 0x2C]);
    }
}
