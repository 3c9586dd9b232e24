// Reader for the compact TLV binary format ("tbo00")
use std::any::Any;
use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::number::{Number, NumberType};
use crate::registry::{Format, Reader, Source, read_all};
use crate::value::{Kind, Value};

pub const MAGIC: &[u8; 5] = b"tbo00";

/// Header type used for back-references
pub const TYPE_REF: u16 = 0;

/// Decodes one object whose header has already been consumed.
/// `size` is the header size field: a length, a count or an inline payload.
pub type BinReadHook = fn(&mut BinDecoder<'_>, u16, u64) -> Result<Value>;

#[derive(Debug, Clone, Copy)]
pub struct BinOptions {
    /// Deepest object nesting accepted, hooked objects included
    pub max_depth: usize,
}

impl Default for BinOptions {
    fn default() -> Self {
        Self { max_depth: 512 }
    }
}

/// Registered reader for the binary format. Hooks override or extend
/// decoding per header type id.
#[derive(Default)]
pub struct BinReader {
    pub opts: BinOptions,
    hooks: HashMap<u16, BinReadHook>,
}

impl BinReader {
    pub fn with_options(opts: BinOptions) -> Self {
        Self {
            opts,
            hooks: HashMap::new(),
        }
    }

    /// Installs a decode hook for `type_id`, returning the replaced one.
    pub fn hook(&mut self, type_id: u16, func: BinReadHook) -> Option<BinReadHook> {
        self.hooks.insert(type_id, func)
    }

    pub fn unhook(&mut self, type_id: u16) -> Option<BinReadHook> {
        self.hooks.remove(&type_id)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Value> {
        let mut d = BinDecoder::new(data, self.opts, &self.hooks);
        d.read_document()
    }
}

impl Reader for BinReader {
    fn probe(&self, head: &[u8]) -> u32 {
        if head.starts_with(b"tbo") { 80 } else { 0 }
    }

    fn read(&self, src: &mut dyn Source) -> Result<Value> {
        let data = read_all(src)?;
        self.decode(&data)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Decode state for one document: cursor plus the decode-order object list.
pub struct BinDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    objects: Vec<Value>,
    depth: usize,
    opts: BinOptions,
    hooks: &'a HashMap<u16, BinReadHook>,
}

impl<'a> BinDecoder<'a> {
    fn new(data: &'a [u8], opts: BinOptions, hooks: &'a HashMap<u16, BinReadHook>) -> Self {
        Self {
            data,
            pos: 0,
            objects: Vec::new(),
            depth: 0,
            opts,
            hooks,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Objects numbered so far
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn read_document(&mut self) -> Result<Value> {
        let magic = self.read_slice(MAGIC.len())?;
        if magic != MAGIC {
            return Err(Error::BadMagic {
                format: Format::Bin,
            });
        }
        let (ty, size) = self.read_type_size()?;
        if ty == TYPE_REF {
            // nothing is numbered before the root
            return Err(Error::IndexOutOfRange {
                format: Format::Bin,
                index: size,
                count: 0,
            });
        }
        let root = self.read_object(ty, size)?;
        debug!(objects = self.objects.len(), "bin document decoded");
        Ok(root)
    }

    /// Reads one child: either a back-reference or a new object, which is
    /// numbered once it is complete.
    pub fn read_child(&mut self) -> Result<Value> {
        let (ty, size) = self.read_type_size()?;
        if ty == TYPE_REF {
            return self
                .objects
                .get(size as usize)
                .cloned()
                .ok_or(Error::IndexOutOfRange {
                    format: Format::Bin,
                    index: size,
                    count: self.objects.len() as u64,
                });
        }
        let v = self.read_object(ty, size)?;
        self.objects.push(v.clone());
        Ok(v)
    }

    fn read_object(&mut self, ty: u16, size: u64) -> Result<Value> {
        if self.depth >= self.opts.max_depth {
            return Err(Error::InvalidPayload {
                format: Format::Bin,
                msg: format!("nesting deeper than {}", self.opts.max_depth),
            });
        }
        self.depth += 1;
        let v = self.read_object_at_depth(ty, size);
        self.depth -= 1;
        v
    }

    fn read_object_at_depth(&mut self, ty: u16, size: u64) -> Result<Value> {
        trace!(ty, size, pos = self.pos, depth = self.depth, "bin object");
        if let Some(&hook) = self.hooks.get(&ty) {
            return hook(self, ty, size);
        }
        match Kind::from_id(ty as u64) {
            Some(Kind::Null) => Ok(Value::null()),
            Some(Kind::Boolean) => Ok(Value::boolean(size != 0)),
            Some(Kind::Date) => Ok(Value::date(size as i64)),
            Some(Kind::Number) => self.read_number(size),
            Some(Kind::String) => {
                let bytes = self.read_xor(size)?;
                let s = match String::from_utf8(bytes) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(pos = self.pos, "bin: string is not UTF-8, invalid bytes replaced");
                        String::from_utf8_lossy(e.as_bytes()).into_owned()
                    }
                };
                Ok(Value::string(s))
            }
            Some(Kind::Data) => Ok(Value::data(self.read_xor(size)?)),
            Some(Kind::Array) => self.read_array(size),
            Some(Kind::Dictionary) => self.read_dictionary(size),
            None => Err(Error::UnknownType {
                format: Format::Bin,
                tag: ty,
            }),
        }
    }

    fn read_number(&mut self, size: u64) -> Result<Value> {
        let ty = NumberType::from_id(size).ok_or_else(|| Error::InvalidPayload {
            format: Format::Bin,
            msg: format!("unknown number type {size}"),
        })?;
        let b = self.read_slice(ty.width())?;
        let n = match ty {
            NumberType::U8 => Number::U8(b[0]),
            NumberType::I8 => Number::I8(b[0] as i8),
            NumberType::U16 => Number::U16(BigEndian::read_u16(b)),
            NumberType::I16 => Number::I16(BigEndian::read_i16(b)),
            NumberType::U32 => Number::U32(BigEndian::read_u32(b)),
            NumberType::I32 => Number::I32(BigEndian::read_i32(b)),
            NumberType::U64 => Number::U64(BigEndian::read_u64(b)),
            NumberType::I64 => Number::I64(BigEndian::read_i64(b)),
            NumberType::F32 => Number::F32(BigEndian::read_f32(b)),
            NumberType::F64 => Number::F64(BigEndian::read_f64(b)),
        };
        Ok(Value::number(n))
    }

    fn read_array(&mut self, count: u64) -> Result<Value> {
        let arr = Value::array();
        for _ in 0..count {
            arr.push(self.read_child()?)?;
        }
        Ok(arr)
    }

    fn read_dictionary(&mut self, count: u64) -> Result<Value> {
        let dict = Value::dictionary();
        for _ in 0..count {
            let key = self.read_child()?;
            let key = key.to_string_value().ok_or_else(|| Error::InvalidPayload {
                format: Format::Bin,
                msg: format!("dictionary key is a {:?}", key.kind()),
            })?;
            let val = self.read_child()?;
            dict.insert_key(key, val)?;
        }
        Ok(dict)
    }

    /// Header: type/size nibbles, optional extended type byte, optional sized length.
    pub fn read_type_size(&mut self) -> Result<(u16, u64)> {
        let b = self.read_u8()?;
        let mut ty = (b >> 4) as u16;
        if ty == 0xF {
            ty = self.read_u8()? as u16;
        }
        let nibble = b & 0x0F;
        let size = match nibble {
            12 => self.read_u8()? as u64,
            13 => BigEndian::read_u16(self.read_slice(2)?) as u64,
            14 => BigEndian::read_u32(self.read_slice(4)?) as u64,
            15 => BigEndian::read_u64(self.read_slice(8)?),
            n => n as u64,
        };
        Ok((ty, size))
    }

    /// Reads `len` payload bytes and undoes the rolling XOR.
    pub fn read_xor(&mut self, len: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(len).map_err(|_| Error::InvalidPayload {
            format: Format::Bin,
            msg: format!("payload length {len} too large"),
        })?;
        let mut bytes = self.read_slice(len)?.to_vec();
        xor_payload(&mut bytes);
        Ok(bytes)
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

fn eof() -> Error {
    Error::Io(std::io::ErrorKind::UnexpectedEof.into())
}

/// Key byte for position 0 of an `len`-byte payload
pub(crate) fn xor_seed(len: usize) -> u8 {
    (((len >> 8) & 0xFF) | (len & 0xFF)) as u8
}

/// Self-inverse rolling XOR applied to String and Data payloads.
pub fn xor_payload(bytes: &mut [u8]) {
    let mut key = xor_seed(bytes.len());
    for b in bytes.iter_mut() {
        *b ^= key;
        key = key.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_is_self_inverse() {
        let mut buf = b"hello world".to_vec();
        xor_payload(&mut buf);
        assert_ne!(buf, b"hello world");
        xor_payload(&mut buf);
        assert_eq!(buf, b"hello world");
    }

    #[test]
    fn xor_seed_mixes_both_length_bytes() {
        assert_eq!(xor_seed(3), 3);
        assert_eq!(xor_seed(0x0102), 0x03);
        assert_eq!(xor_seed(0x1F0), 0xF1);
    }

    #[test]
    fn header_decodes_extended_type_and_sizes() {
        let hooks = HashMap::new();
        // type 20 via extension byte, size via u16
        let data = [0xFD, 20, 0x01, 0x00];
        let mut d = BinDecoder::new(&data, BinOptions::default(), &hooks);
        assert_eq!(d.read_type_size().unwrap(), (20, 256));

        let data = [0x4B];
        let mut d = BinDecoder::new(&data, BinOptions::default(), &hooks);
        assert_eq!(d.read_type_size().unwrap(), (4, 11));
    }
}
