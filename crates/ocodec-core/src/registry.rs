//! Format table: probe, decode and encode entry points per format.
//!
//! A [`Registry`] is an ordinary value. `Registry::default()` carries the
//! built-in binary, bplist and JSON codecs; `Registry::new()` starts empty.
//! Each codec owns its own hook table, reachable through
//! [`Registry::reader_mut`] / [`Registry::writer_mut`].

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::value::Value;

/// Bytes handed to each probe
pub const PROBE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum Format {
    Bin = 1,
    Bplist = 2,
    Xplist = 3,
    Xml = 4,
    Json = 5,
}

impl Format {
    pub const ALL: [Format; 5] = [
        Format::Bin,
        Format::Bplist,
        Format::Xplist,
        Format::Xml,
        Format::Json,
    ];

    pub fn from_id(id: u16) -> Result<Format> {
        Format::ALL
            .into_iter()
            .find(|f| *f as u16 == id)
            .ok_or(Error::UnknownFormatId(id))
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Bin => "bin",
            Format::Bplist => "bplist",
            Format::Xplist => "xplist",
            Format::Xml => "xml",
            Format::Json => "json",
        }
    }

    /// Text formats are dumped as text, the rest as hex
    pub fn is_text(self) -> bool {
        matches!(self, Format::Xplist | Format::Xml | Format::Json)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Format> {
        Format::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or(Error::UnknownFormat)
    }
}

/// Output format plus the independent deflate (compact) bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteFormat {
    pub format: Format,
    pub deflate: bool,
}

impl WriteFormat {
    pub const DEFLATE_BIT: u16 = 0x100;

    pub fn new(format: Format) -> Self {
        Self {
            format,
            deflate: false,
        }
    }

    pub fn deflated(format: Format) -> Self {
        Self {
            format,
            deflate: true,
        }
    }

    pub fn bits(self) -> u16 {
        let deflate = if self.deflate { Self::DEFLATE_BIT } else { 0 };
        self.format as u16 | deflate
    }

    pub fn from_bits(bits: u16) -> Result<Self> {
        Ok(Self {
            format: Format::from_id(bits & 0xFF)?,
            deflate: bits & Self::DEFLATE_BIT != 0,
        })
    }
}

impl From<Format> for WriteFormat {
    fn from(format: Format) -> Self {
        Self::new(format)
    }
}

/// Seekable byte source
pub trait Source: Read + Seek {}
impl<T: Read + Seek> Source for T {}

pub trait Reader: Any {
    /// Confidence that `head` starts a document of this format; 0 = not this format.
    fn probe(&self, head: &[u8]) -> u32;
    fn read(&self, src: &mut dyn Source) -> Result<Value>;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub trait Writer: Any {
    /// Encodes `value`, returning the number of bytes written.
    fn write(&self, value: &Value, sink: &mut dyn Write, deflate: bool) -> Result<usize>;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Default)]
struct Slot {
    reader: Option<Box<dyn Reader>>,
    writer: Option<Box<dyn Writer>>,
}

pub struct Registry {
    // BTreeMap keeps table order = format id order
    slots: BTreeMap<Format, Slot>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut reg = Registry::new();
        reg.register_format(
            Format::Bin,
            Some(Box::new(crate::binfmt::BinReader::default())),
            Some(Box::new(crate::binfmt_write::BinWriter::default())),
        );
        reg.register_format(
            Format::Bplist,
            Some(Box::new(crate::bplist::BplistReader::default())),
            Some(Box::new(crate::bplist_write::BplistWriter::default())),
        );
        reg.register_format(
            Format::Json,
            Some(Box::new(crate::json::JsonReader::default())),
            Some(Box::new(crate::json_write::JsonWriter::default())),
        );
        reg
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    /// Installs (or replaces) the codecs for `format`.
    pub fn register_format(
        &mut self,
        format: Format,
        reader: Option<Box<dyn Reader>>,
        writer: Option<Box<dyn Writer>>,
    ) {
        debug!(%format, reader = reader.is_some(), writer = writer.is_some(), "register format");
        self.slots.insert(format, Slot { reader, writer });
    }

    /// Drops the codecs of `format` together with their hook tables.
    pub fn unregister_format(&mut self, format: Format) -> bool {
        self.slots.remove(&format).is_some()
    }

    pub fn formats(&self) -> Vec<Format> {
        self.slots.keys().copied().collect()
    }

    pub fn has_reader(&self, format: Format) -> bool {
        self.slots.get(&format).is_some_and(|s| s.reader.is_some())
    }

    pub fn has_writer(&self, format: Format) -> bool {
        self.slots.get(&format).is_some_and(|s| s.writer.is_some())
    }

    /// Typed access to a registered reader, e.g. to add hooks
    pub fn reader_mut<R: Reader>(&mut self, format: Format) -> Option<&mut R> {
        self.slots
            .get_mut(&format)?
            .reader
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<R>()
    }

    pub fn writer_mut<W: Writer>(&mut self, format: Format) -> Option<&mut W> {
        self.slots
            .get_mut(&format)?
            .writer
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<W>()
    }

    fn reader(&self, format: Format) -> Result<&dyn Reader> {
        self.slots
            .get(&format)
            .and_then(|s| s.reader.as_deref())
            .ok_or(Error::FormatUnavailable(format))
    }

    fn writer(&self, format: Format) -> Result<&dyn Writer> {
        self.slots
            .get(&format)
            .and_then(|s| s.writer.as_deref())
            .ok_or(Error::FormatUnavailable(format))
    }

    /// Scores of every reader for `head`, best first; zero scores are dropped.
    /// Ties keep table order.
    pub fn probe(&self, head: &[u8]) -> Vec<(Format, u32)> {
        let mut scores: Vec<(Format, u32)> = self
            .slots
            .iter()
            .filter_map(|(f, s)| s.reader.as_ref().map(|r| (*f, r.probe(head))))
            .filter(|(_, score)| *score > 0)
            .collect();
        // stable sort keeps table order among equal scores
        scores.sort_by(|a, b| b.1.cmp(&a.1));
        scores
    }

    /// Best-scoring format for the head of `src`; the source position is restored.
    pub fn detect(&self, src: &mut dyn Source) -> Result<Option<Format>> {
        let start = src.stream_position()?;
        let head = read_head(src)?;
        src.seek(SeekFrom::Start(start))?;
        Ok(self.probe(&head).first().map(|(f, _)| *f))
    }

    /// Auto-detecting decode. Candidates are tried best first with the source
    /// rewound between attempts.
    pub fn read(&self, src: &mut dyn Source) -> Result<Value> {
        let start = src.stream_position()?;
        let head = read_head(src)?;
        let candidates = self.probe(&head);
        let mut last_err = None;
        for (format, score) in candidates {
            src.seek(SeekFrom::Start(start))?;
            debug!(%format, score, "trying reader");
            match self.reader(format)?.read(src) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    warn!(%format, error = %e, "candidate reader failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(Error::UnknownFormat))
    }

    /// Decode with an explicit format; no fallback.
    pub fn read_as(&self, format: Format, src: &mut dyn Source) -> Result<Value> {
        self.reader(format)?.read(src)
    }

    pub fn write(
        &self,
        value: &Value,
        sink: &mut dyn Write,
        format: impl Into<WriteFormat>,
    ) -> Result<usize> {
        let wf = format.into();
        let n = self.writer(wf.format)?.write(value, sink, wf.deflate)?;
        debug!(format = %wf.format, deflate = wf.deflate, bytes = n, "wrote document");
        Ok(n)
    }
}

fn read_head(src: &mut dyn Source) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(PROBE_LEN);
    src.take(PROBE_LEN as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// Bytes remaining in `src`
pub(crate) fn read_all(src: &mut dyn Source) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    src.read_to_end(&mut data)?;
    Ok(data)
}
