//! Apple binary property list writer.
//!
//! Pass 1 flattens the graph depth first into an emission list, one entry per
//! distinct object (identity for values, content for dictionary keys); the
//! root is object 0. Pass 2 emits the entries in order, then the offset table
//! and the trailer using the narrowest widths that fit.

use std::any::Any;
use std::collections::HashMap;
use std::io::Write;

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use crate::bplist::{APPLE_EPOCH_OFFSET, MAGIC, UID_KEY, tag};
use crate::error::Result;
use crate::number::{Number, need_bytes};
use crate::registry::Writer;
use crate::value::{Kind, Value};

/// One object of the emission list. Containers carry the indices of their
/// children; dictionaries list all key indices, then all value indices.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub refs: Vec<u64>,
}

pub type BplistWriteHook = fn(&mut BplistEncoder<'_>, &Entry) -> Result<()>;

#[derive(Default)]
pub struct BplistWriter {
    hooks: HashMap<Kind, BplistWriteHook>,
}

impl BplistWriter {
    pub fn hook(&mut self, kind: Kind, func: BplistWriteHook) -> Option<BplistWriteHook> {
        self.hooks.insert(kind, func)
    }

    pub fn unhook(&mut self, kind: Kind) -> Option<BplistWriteHook> {
        self.hooks.remove(&kind)
    }

    pub fn encode(&self, root: &Value) -> Result<Vec<u8>> {
        let mut flat = Flattener::default();
        flat.visit(root);
        let entries = flat.entries;

        let count = entries.len() as u64;
        let ref_size = need_bytes(count.saturating_sub(1));
        let mut enc = BplistEncoder {
            out: Vec::with_capacity(1024),
            ref_size,
            hooks: &self.hooks,
            charset_warned: false,
        };
        enc.out.extend_from_slice(MAGIC);

        let mut offsets = Vec::with_capacity(entries.len());
        for entry in &entries {
            offsets.push(enc.out.len() as u64);
            enc.write_entry(entry)?;
        }

        let offset_table = enc.out.len() as u64;
        let offset_size = need_bytes(offset_table);
        for &off in &offsets {
            enc.write_uint(off, offset_size);
        }

        // trailer: padding, widths, count, root, table offset
        enc.out.extend_from_slice(&[0u8; 6]);
        enc.out.push(offset_size as u8);
        enc.out.push(ref_size as u8);
        enc.write_uint(count, 8);
        enc.write_uint(0, 8);
        enc.write_uint(offset_table, 8);

        debug!(
            objects = count,
            ref_size,
            offset_size,
            bytes = enc.out.len(),
            "bplist document encoded"
        );
        Ok(enc.out)
    }
}

impl Writer for BplistWriter {
    fn write(&self, value: &Value, sink: &mut dyn Write, _deflate: bool) -> Result<usize> {
        let bytes = self.encode(value)?;
        sink.write_all(&bytes)?;
        Ok(bytes.len())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Default)]
struct Flattener {
    entries: Vec<Entry>,
    // entries hold a handle to every value, so ids stay unique
    ids: HashMap<usize, u64>,
    keys: HashMap<String, u64>,
}

impl Flattener {
    fn push(&mut self, value: Value) -> u64 {
        let index = self.entries.len() as u64;
        self.entries.push(Entry {
            value,
            refs: Vec::new(),
        });
        index
    }

    fn visit(&mut self, v: &Value) -> u64 {
        if let Some(&index) = self.ids.get(&v.id()) {
            return index;
        }
        let index = self.push(v.clone());
        self.ids.insert(v.id(), index);
        let refs = match v.kind() {
            Kind::Array => v.items().iter().map(|item| self.visit(item)).collect(),
            Kind::Dictionary if uid_of(v).is_none() => {
                let entries = v.entries();
                let mut refs: Vec<u64> = entries.iter().map(|(k, _)| self.visit_key(k)).collect();
                refs.extend(entries.iter().map(|(_, val)| self.visit(val)));
                refs
            }
            _ => Vec::new(),
        };
        self.entries[index as usize].refs = refs;
        index
    }

    fn visit_key(&mut self, key: &str) -> u64 {
        if let Some(&index) = self.keys.get(key) {
            return index;
        }
        let index = self.push(Value::string(key));
        self.keys.insert(key.to_string(), index);
        index
    }
}

/// `{"CF$UID": n}` with a non-negative integer `n` is written as a UID object.
fn uid_of(v: &Value) -> Option<u64> {
    if v.len() != 1 {
        return None;
    }
    let n = v.get_key(UID_KEY)?.as_number()?.as_i128()?;
    u64::try_from(n).ok()
}

pub struct BplistEncoder<'a> {
    out: Vec<u8>,
    ref_size: usize,
    hooks: &'a HashMap<Kind, BplistWriteHook>,
    #[cfg_attr(feature = "charset", allow(dead_code))]
    charset_warned: bool,
}

impl BplistEncoder<'_> {
    fn write_entry(&mut self, entry: &Entry) -> Result<()> {
        let v = &entry.value;
        let kind = v.kind();
        if let Some(&hook) = self.hooks.get(&kind) {
            return hook(self, entry);
        }
        match kind {
            Kind::Null => self.out.push(tag::NULL),
            Kind::Boolean => {
                let b = v.as_bool().unwrap_or_default();
                self.out.push(if b { tag::TRUE } else { tag::FALSE });
            }
            Kind::Number => {
                if let Some(n) = v.as_number() {
                    self.write_number(n);
                }
            }
            Kind::Date => {
                let secs = v.as_date().unwrap_or_default() - APPLE_EPOCH_OFFSET;
                self.out.push(tag::DATE | 3);
                self.write_f64(secs as f64);
            }
            Kind::Data => {
                let bytes = v.as_bytes().map(|b| b.to_vec()).unwrap_or_default();
                self.write_marker(tag::DATA, bytes.len());
                self.out.extend_from_slice(&bytes);
            }
            Kind::String => {
                let s = v.to_string_value().unwrap_or_default();
                self.write_string(&s);
            }
            Kind::Array => {
                self.write_marker(tag::ARRAY, entry.refs.len());
                self.write_refs(&entry.refs);
            }
            Kind::Dictionary => match uid_of(v) {
                Some(uid) => {
                    let width = need_bytes(uid);
                    self.out.push(tag::UID | (width as u8 - 1));
                    self.write_uint(uid, width);
                }
                None => {
                    self.write_marker(tag::DICT, entry.refs.len() / 2);
                    self.write_refs(&entry.refs);
                }
            },
        }
        Ok(())
    }

    /// Narrowest integer form; negatives use 8 signed bytes, values above
    /// `i64::MAX` the 16-byte form.
    pub fn write_int(&mut self, v: i128) {
        if v < 0 || v > u64::MAX as i128 {
            self.out.push(tag::INT | 3);
            self.write_uint(v as i64 as u64, 8);
            return;
        }
        let u = v as u64;
        match need_bytes(u) {
            1 => {
                self.out.push(tag::INT);
                self.out.push(u as u8);
            }
            2 => {
                self.out.push(tag::INT | 1);
                self.write_uint(u, 2);
            }
            4 => {
                self.out.push(tag::INT | 2);
                self.write_uint(u, 4);
            }
            _ if u <= i64::MAX as u64 => {
                self.out.push(tag::INT | 3);
                self.write_uint(u, 8);
            }
            _ => {
                self.out.push(tag::INT | 4);
                self.write_uint(0, 8);
                self.write_uint(u, 8);
            }
        }
    }

    fn write_number(&mut self, n: Number) {
        match n {
            Number::F32(f) => {
                self.out.push(tag::REAL | 2);
                let mut buf = [0u8; 4];
                BigEndian::write_f32(&mut buf, f);
                self.out.extend_from_slice(&buf);
            }
            Number::F64(f) => {
                self.out.push(tag::REAL | 3);
                self.write_f64(f);
            }
            _ => self.write_int(n.as_i128().unwrap_or_default()),
        }
    }

    #[cfg(feature = "charset")]
    fn write_string(&mut self, s: &str) {
        if s.is_ascii() {
            self.write_marker(tag::ASCII, s.len());
            self.out.extend_from_slice(s.as_bytes());
            return;
        }
        let units: Vec<u16> = s.encode_utf16().collect();
        self.write_marker(tag::UNICODE, units.len());
        for u in units {
            let mut buf = [0u8; 2];
            BigEndian::write_u16(&mut buf, u);
            self.out.extend_from_slice(&buf);
        }
    }

    // Without charset support strings are written as raw bytes.
    #[cfg(not(feature = "charset"))]
    fn write_string(&mut self, s: &str) {
        if !s.is_ascii() && !self.charset_warned {
            tracing::warn!("bplist: charset support disabled, non-ASCII strings written as UTF-8 bytes");
            self.charset_warned = true;
        }
        self.write_marker(tag::ASCII, s.len());
        self.out.extend_from_slice(s.as_bytes());
    }

    /// Marker byte with inline size, or 0xF plus an integer object.
    pub fn write_marker(&mut self, high: u8, size: usize) {
        if size < 15 {
            self.out.push(high | size as u8);
        } else {
            self.out.push(high | 0x0F);
            self.write_int(size as i128);
        }
    }

    pub fn write_refs(&mut self, refs: &[u64]) {
        for &r in refs {
            self.write_uint(r, self.ref_size);
        }
    }

    pub fn write_uint(&mut self, v: u64, width: usize) {
        let mut buf = [0u8; 8];
        BigEndian::write_uint(&mut buf, v, width);
        self.out.extend_from_slice(&buf[..width]);
    }

    fn write_f64(&mut self, f: f64) {
        let mut buf = [0u8; 8];
        BigEndian::write_f64(&mut buf, f);
        self.out.extend_from_slice(&buf);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    pub fn ref_size(&self) -> usize {
        self.ref_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_bytes(v: i128) -> Vec<u8> {
        let hooks = HashMap::new();
        let mut enc = BplistEncoder {
            out: Vec::new(),
            ref_size: 1,
            hooks: &hooks,
            charset_warned: false,
        };
        enc.write_int(v);
        enc.out
    }

    #[test]
    fn integers_use_narrowest_width() {
        assert_eq!(int_bytes(255), vec![0x10, 0xFF]);
        assert_eq!(int_bytes(256), vec![0x11, 0x01, 0x00]);
        assert_eq!(int_bytes(65536), vec![0x12, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(int_bytes(-1), [vec![0x13], vec![0xFF; 8]].concat());
        assert_eq!(int_bytes(u64::MAX as i128).len(), 17);
    }
}
