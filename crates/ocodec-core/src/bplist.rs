//! Apple binary property list reader ("bplist00").
//!
//! Decoding is trailer driven and runs in two passes. Pass 1 decodes every
//! object slot on its own; containers only record the slot indices of their
//! children. Pass 2, once every object exists, links those indices into real
//! child handles. Pending child indices live in a side table scoped to one
//! decode, never on the values themselves.
//!
//! Minor malformations are tolerated: a non-root object that fails to decode
//! leaves an empty slot, and container entries pointing at bad or empty slots
//! are skipped with a warning. So are entries that would close a cycle; the
//! linked graph is always acyclic.

use std::any::Any;
use std::collections::{HashMap, HashSet};

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::number::Number;
use crate::registry::{Format, Reader, Source, read_all};
use crate::value::{Kind, Value};

pub const MAGIC: &[u8; 8] = b"bplist00";
pub const TRAILER_LEN: usize = 32;

/// Seconds between 1970-01-01 and 2001-01-01 (UTC)
pub const APPLE_EPOCH_OFFSET: i64 = 978_307_200;

/// Dictionary key used to carry UID objects
pub const UID_KEY: &str = "CF$UID";

pub mod tag {
    pub const SIMPLE: u8 = 0x00;
    pub const NULL: u8 = 0x00;
    pub const FALSE: u8 = 0x08;
    pub const TRUE: u8 = 0x09;
    pub const INT: u8 = 0x10;
    pub const REAL: u8 = 0x20;
    pub const DATE: u8 = 0x30;
    pub const DATA: u8 = 0x40;
    pub const ASCII: u8 = 0x50;
    pub const UNICODE: u8 = 0x60;
    pub const UID: u8 = 0x80;
    pub const ARRAY: u8 = 0xA0;
    pub const SET: u8 = 0xC0;
    pub const DICT: u8 = 0xD0;
}

/// Result of decoding one object slot in pass 1.
#[derive(Debug)]
pub enum Decoded {
    Value(Value),
    /// Child slot indices still to be linked
    Array(Vec<u64>),
    Dictionary { keys: Vec<u64>, values: Vec<u64> },
}

/// Decodes one object given its marker byte, split into the high-nibble tag
/// and the low-nibble inline info.
pub type BplistReadHook = fn(&mut BplistDecoder<'_>, u8, u8) -> Result<Decoded>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub offset_size: u8,
    pub ref_size: u8,
    pub object_count: u64,
    pub root: u64,
    pub offset_table: u64,
}

impl Trailer {
    pub fn parse(data: &[u8]) -> Result<Trailer> {
        if data.len() < MAGIC.len() + TRAILER_LEN {
            return Err(Error::InvalidTrailer(format!(
                "document too short ({} bytes)",
                data.len()
            )));
        }
        // 6 bytes of padding precede the fields
        let t = &data[data.len() - 26..];
        let trailer = Trailer {
            offset_size: t[0],
            ref_size: t[1],
            object_count: BigEndian::read_u64(&t[2..10]),
            root: BigEndian::read_u64(&t[10..18]),
            offset_table: BigEndian::read_u64(&t[18..26]),
        };
        trace!(?trailer, "bplist trailer");
        trailer.validate(data.len())?;
        Ok(trailer)
    }

    fn validate(&self, len: usize) -> Result<()> {
        let width_ok = |w: u8| (1..=8).contains(&w);
        if !width_ok(self.offset_size) || !width_ok(self.ref_size) {
            return Err(Error::InvalidTrailer(format!(
                "bad widths: offset {} ref {}",
                self.offset_size, self.ref_size
            )));
        }
        if self.object_count == 0 {
            return Err(Error::InvalidTrailer("no objects".into()));
        }
        if self.root >= self.object_count {
            return Err(Error::IndexOutOfRange {
                format: Format::Bplist,
                index: self.root,
                count: self.object_count,
            });
        }
        let table_end = self
            .object_count
            .checked_mul(self.offset_size as u64)
            .and_then(|n| n.checked_add(self.offset_table));
        match table_end {
            Some(end) if self.offset_table >= MAGIC.len() as u64 && end <= (len - TRAILER_LEN) as u64 => {
                Ok(())
            }
            _ => Err(Error::InvalidTrailer(format!(
                "offset table at {} does not fit",
                self.offset_table
            ))),
        }
    }
}

#[derive(Default)]
pub struct BplistReader {
    hooks: HashMap<u8, BplistReadHook>,
}

impl BplistReader {
    /// Installs a decode hook for a high-nibble tag (e.g. `tag::UID`).
    pub fn hook(&mut self, tag: u8, func: BplistReadHook) -> Option<BplistReadHook> {
        self.hooks.insert(tag & 0xF0, func)
    }

    pub fn unhook(&mut self, tag: u8) -> Option<BplistReadHook> {
        self.hooks.remove(&(tag & 0xF0))
    }

    pub fn decode(&self, data: &[u8]) -> Result<Value> {
        if !data.starts_with(MAGIC) {
            return Err(Error::BadMagic {
                format: Format::Bplist,
            });
        }
        let trailer = Trailer::parse(data)?;
        let mut d = BplistDecoder {
            data,
            pos: 0,
            ref_size: trailer.ref_size as usize,
            hooks: &self.hooks,
            charset_warned: false,
        };
        let slots = d.decode_slots(&trailer)?;
        link(slots, trailer.root)
    }
}

impl Reader for BplistReader {
    fn probe(&self, head: &[u8]) -> u32 {
        if head.starts_with(b"bplist") { 80 } else { 0 }
    }

    fn read(&self, src: &mut dyn Source) -> Result<Value> {
        let data = read_all(src)?;
        self.decode(&data)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct BplistDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    ref_size: usize,
    hooks: &'a HashMap<u8, BplistReadHook>,
    #[cfg_attr(feature = "charset", allow(dead_code))]
    charset_warned: bool,
}

impl<'a> BplistDecoder<'a> {
    /// Pass 1: one decode per offset-table entry.
    fn decode_slots(&mut self, trailer: &Trailer) -> Result<Vec<Option<Decoded>>> {
        let count = trailer.object_count as usize;
        let width = trailer.offset_size as usize;
        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            let at = trailer.offset_table as usize + i * width;
            let offset = BigEndian::read_uint(&self.data[at..at + width], width);
            self.pos = offset as usize;
            match self.decode_object() {
                Ok(decoded) => slots.push(Some(decoded)),
                Err(e) if i as u64 == trailer.root => return Err(e),
                Err(e) => {
                    warn!(slot = i, offset, error = %e, "bplist: object skipped");
                    slots.push(None);
                }
            }
        }
        debug!(objects = count, root = trailer.root, "bplist pass 1 done");
        Ok(slots)
    }

    fn decode_object(&mut self) -> Result<Decoded> {
        let marker = self.read_u8()?;
        let (high, info) = (marker & 0xF0, marker & 0x0F);
        if let Some(&hook) = self.hooks.get(&high) {
            return hook(self, high, info);
        }
        let value = match high {
            tag::SIMPLE => match marker {
                tag::NULL => Value::null(),
                tag::FALSE => Value::boolean(false),
                tag::TRUE => Value::boolean(true),
                _ => return Err(unknown(marker)),
            },
            tag::INT => Value::number(self.read_int(info)?),
            tag::REAL => Value::number(self.read_real(info)?),
            tag::DATE => {
                let secs = self.read_real(info)?.as_f64();
                Value::date(secs.floor() as i64 + APPLE_EPOCH_OFFSET)
            }
            tag::DATA => {
                let len = self.read_size(info)?;
                Value::data(self.read_slice(len)?)
            }
            tag::ASCII => {
                let len = self.read_size(info)?;
                Value::string(String::from_utf8(self.read_slice(len)?.to_vec())?)
            }
            tag::UNICODE => {
                let units = self.read_size(info)?;
                let bytes = self.read_slice(units.checked_mul(2).ok_or_else(eof)?)?;
                Value::string(self.utf16_string(bytes)?)
            }
            tag::UID => {
                let bytes = self.read_slice(info as usize + 1)?;
                let id = bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
                Value::dictionary_from([(UID_KEY, Value::number(Number::from_unsigned(id)))])
            }
            tag::ARRAY | tag::SET => {
                let count = self.read_size(info)?;
                return Ok(Decoded::Array(self.read_refs(count)?));
            }
            tag::DICT => {
                let count = self.read_size(info)?;
                let keys = self.read_refs(count)?;
                let values = self.read_refs(count)?;
                return Ok(Decoded::Dictionary { keys, values });
            }
            _ => return Err(unknown(marker)),
        };
        Ok(Decoded::Value(value))
    }

    /// `info` encodes the width as a power of two
    pub fn read_int(&mut self, info: u8) -> Result<Number> {
        Ok(match info {
            0 => Number::U8(self.read_u8()?),
            1 => Number::U16(BigEndian::read_u16(self.read_slice(2)?)),
            2 => Number::U32(BigEndian::read_u32(self.read_slice(4)?)),
            3 => Number::from_signed(BigEndian::read_i64(self.read_slice(8)?)),
            // 128-bit: only the low 64 bits are kept
            4 => Number::from_unsigned(BigEndian::read_u128(self.read_slice(16)?) as u64),
            _ => {
                return Err(Error::InvalidPayload {
                    format: Format::Bplist,
                    msg: format!("integer width 2^{info}"),
                });
            }
        })
    }

    pub fn read_real(&mut self, info: u8) -> Result<Number> {
        Ok(match info {
            2 => Number::F32(BigEndian::read_f32(self.read_slice(4)?)),
            3 => Number::F64(BigEndian::read_f64(self.read_slice(8)?)),
            _ => {
                return Err(Error::InvalidPayload {
                    format: Format::Bplist,
                    msg: format!("real width 2^{info}"),
                });
            }
        })
    }

    /// Inline size, or 0xF followed by an integer object.
    pub fn read_size(&mut self, info: u8) -> Result<usize> {
        if info != 0x0F {
            return Ok(info as usize);
        }
        let marker = self.read_u8()?;
        if marker & 0xF0 != tag::INT {
            return Err(Error::InvalidPayload {
                format: Format::Bplist,
                msg: format!("size marker {marker:#04x} is not an integer"),
            });
        }
        let n = self.read_int(marker & 0x0F)?;
        usize::try_from(n.as_u64()).map_err(|_| eof())
    }

    /// `count` child slot indices of the trailer's ref width
    pub fn read_refs(&mut self, count: usize) -> Result<Vec<u64>> {
        let width = self.ref_size;
        let bytes = self.read_slice(count.checked_mul(width).ok_or_else(eof)?)?;
        Ok(bytes
            .chunks_exact(width)
            .map(|c| BigEndian::read_uint(c, width))
            .collect())
    }

    #[cfg(feature = "charset")]
    fn utf16_string(&mut self, bytes: &[u8]) -> Result<String> {
        let units: Vec<u16> = bytes.chunks_exact(2).map(BigEndian::read_u16).collect();
        String::from_utf16(&units).map_err(|e| Error::InvalidPayload {
            format: Format::Bplist,
            msg: e.to_string(),
        })
    }

    // Without charset support only the ASCII range survives.
    #[cfg(not(feature = "charset"))]
    fn utf16_string(&mut self, bytes: &[u8]) -> Result<String> {
        if !self.charset_warned {
            warn!("bplist: charset support disabled, UTF-16 strings reduced to ASCII");
            self.charset_warned = true;
        }
        Ok(bytes
            .chunks_exact(2)
            .map(BigEndian::read_u16)
            .map(|u| if u < 0x80 { u as u8 as char } else { '?' })
            .collect())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self.data.get(self.pos).ok_or_else(eof)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(eof)?;
        let s = self.data.get(self.pos..end).ok_or_else(eof)?;
        self.pos = end;
        Ok(s)
    }
}

/// Container entries `(owner, child)` that reach back to a container still
/// being walked. Iterative DFS over slot indices, root first, so nesting depth
/// costs heap rather than stack.
fn back_edges(slots: &[Option<Decoded>], root: usize) -> HashSet<(usize, u64)> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Open,
        Done,
    }

    // dictionary keys must be strings, so only values can nest
    fn children(slot: Option<&Decoded>) -> &[u64] {
        match slot {
            Some(Decoded::Array(items)) => items.as_slice(),
            Some(Decoded::Dictionary { values, .. }) => values.as_slice(),
            _ => &[],
        }
    }

    let mut marks = vec![Mark::New; slots.len()];
    let mut back = HashSet::new();
    let starts = std::iter::once(root).chain(0..slots.len());
    for start in starts {
        if marks.get(start) != Some(&Mark::New) {
            continue;
        }
        marks[start] = Mark::Open;
        let mut stack = vec![(start, 0usize)];
        while let Some(&(node, next)) = stack.last() {
            let Some(&child) = children(slots[node].as_ref()).get(next) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            match marks.get(child as usize) {
                Some(Mark::New) => {
                    marks[child as usize] = Mark::Open;
                    stack.push((child as usize, 0));
                }
                Some(Mark::Open) => {
                    back.insert((node, child));
                }
                _ => {}
            }
        }
    }
    back
}

/// Pass 2: materialize every slot, then link container children.
fn link(slots: Vec<Option<Decoded>>, root: u64) -> Result<Value> {
    let cyclic = back_edges(&slots, root as usize);

    let values: Vec<Option<Value>> = slots
        .iter()
        .map(|slot| {
            slot.as_ref().map(|d| match d {
                Decoded::Value(v) => v.clone(),
                Decoded::Array(_) => Value::array(),
                Decoded::Dictionary { .. } => Value::dictionary(),
            })
        })
        .collect();

    let lookup = |owner: usize, index: u64| -> Option<Value> {
        if cyclic.contains(&(owner, index)) {
            warn!(slot = owner, index, "bplist: entry would form a cycle, skipped");
            return None;
        }
        match values.get(index as usize) {
            Some(Some(v)) => Some(v.clone()),
            Some(None) => {
                warn!(slot = owner, index, "bplist: entry refers to an empty slot, skipped");
                None
            }
            None => {
                warn!(slot = owner, index, count = values.len(), "bplist: entry index out of range, skipped");
                None
            }
        }
    };

    for (i, slot) in slots.iter().enumerate() {
        let Some(container) = values[i].as_ref() else {
            continue;
        };
        match slot {
            Some(Decoded::Array(items)) => {
                for &index in items {
                    if let Some(v) = lookup(i, index) {
                        container.push(v)?;
                    }
                }
            }
            Some(Decoded::Dictionary { keys, values: vals }) => {
                for (&k, &v) in keys.iter().zip(vals) {
                    let Some(key) = lookup(i, k) else { continue };
                    if key.kind() != Kind::String {
                        warn!(slot = i, index = k, kind = ?key.kind(), "bplist: non-string key skipped");
                        continue;
                    }
                    let Some(val) = lookup(i, v) else { continue };
                    container.insert_key(key.to_string_value().unwrap_or_default(), val)?;
                }
            }
            _ => {}
        }
    }

    values
        .get(root as usize)
        .cloned()
        .flatten()
        .ok_or(Error::IndexOutOfRange {
            format: Format::Bplist,
            index: root,
            count: values.len() as u64,
        })
}

fn unknown(marker: u8) -> Error {
    Error::UnknownType {
        format: Format::Bplist,
        tag: marker as u16,
    }
}

fn eof() -> Error {
    Error::Io(std::io::ErrorKind::UnexpectedEof.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apple_epoch_matches_calendar() {
        let epoch = chrono::NaiveDate::from_ymd_opt(2001, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp());
        assert_eq!(epoch, Some(APPLE_EPOCH_OFFSET));
    }

    #[test]
    fn trailer_rejects_short_documents() {
        assert!(matches!(
            Trailer::parse(b"bplist00"),
            Err(Error::InvalidTrailer(_))
        ));
    }
}
