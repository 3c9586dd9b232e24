//! ocodec-core: dynamically kinded value graph plus a multi-format codec engine
//!
//! This crate focuses on a small, well-factored surface:
//! - `Value` graph of eight kinds with reference-counted handles
//! - Pluggable `Registry` of readers/writers with format auto-detection
//! - Codecs: compact TLV binary (`tbo00`), Apple binary plist, JSON
//! - Path addressing (`.key[index]`) with bounded macro expansion
//!
//! The free functions below run against `Registry::default()`.
pub mod binfmt;
pub mod binfmt_write;
pub mod bplist;
pub mod bplist_write;
pub mod dump;
pub mod error;
pub mod interop;
pub mod json;
pub mod json_write;
pub mod number;
pub mod registry;
pub mod seek;
pub mod value;

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::PathBuf;

pub use binfmt::BinOptions;
pub use dump::{DumpOptions, find_documents, hex_dump};
pub use error::{Error, Result};
pub use interop::{from_json, to_json};
pub use json::JsonOptions;
pub use number::{Number, NumberType};
pub use registry::{Format, Reader, Registry, Source, WriteFormat, Writer};
pub use seek::{ChildInfo, SeekOptions, list_children, remove_at, seek, seek_with, set_at};
pub use value::{Flags, Kind, Value};

/// Auto-detecting decode from any seekable source.
pub fn read(src: &mut dyn Source) -> Result<Value> {
    Registry::default().read(src)
}

pub fn read_from_bytes(data: &[u8]) -> Result<Value> {
    read(&mut Cursor::new(data))
}

/// Accepts a plain path or a `file://` URL.
pub fn read_from_url(url: &str) -> Result<Value> {
    let path = url_to_path(url)?;
    let mut file = File::open(&path).map_err(|source| Error::Open { path, source })?;
    read(&mut file)
}

pub fn write(value: &Value, sink: &mut dyn Write, format: impl Into<WriteFormat>) -> Result<usize> {
    Registry::default().write(value, sink, format)
}

pub fn write_to_bytes(value: &Value, format: impl Into<WriteFormat>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write(value, &mut out, format)?;
    Ok(out)
}

/// Creates or truncates the target file.
pub fn write_to_url(value: &Value, url: &str, format: impl Into<WriteFormat>) -> Result<usize> {
    let path = url_to_path(url)?;
    let file = File::create(&path).map_err(|source| Error::Open { path, source })?;
    let mut sink = BufWriter::new(file);
    let n = write(value, &mut sink, format)?;
    sink.flush()?;
    Ok(n)
}

/// Shallow copy: a fresh value whose children are retained.
pub fn copy(value: &Value) -> Value {
    value.copy()
}

pub fn to_dump_string(value: &Value, format: impl Into<WriteFormat>) -> Result<String> {
    dump::dump_with(&Registry::default(), value, format, &DumpOptions::default())
}

/// The encoded document wrapped in a Data value.
pub fn to_data_value(value: &Value, format: impl Into<WriteFormat>) -> Result<Value> {
    Ok(Value::data(write_to_bytes(value, format)?))
}

fn url_to_path(url: &str) -> Result<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    match url.split_once("://") {
        Some(_) => Err(Error::UnsupportedUrl(url.to_string())),
        None => Ok(PathBuf::from(url)),
    }
}
