//! Error type shared by the value model, the registry and every codec.

use std::path::PathBuf;
use thiserror::Error;

use crate::registry::Format;
use crate::value::Kind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Leading magic bytes do not match the selected format
    #[error("{format:?}: bad magic")]
    BadMagic { format: Format },

    #[error("{format:?}: unknown type tag {tag:#x}")]
    UnknownType { format: Format, tag: u16 },

    #[error("{format:?}: object index {index} out of range (count: {count})")]
    IndexOutOfRange {
        format: Format,
        index: u64,
        count: u64,
    },

    #[error("bplist: invalid trailer: {0}")]
    InvalidTrailer(String),

    #[error("{format:?}: invalid payload: {msg}")]
    InvalidPayload { format: Format, msg: String },

    #[error("invalid UTF-8 in string payload")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("json: {msg} at byte {pos}")]
    Syntax { pos: usize, msg: String },

    #[error("{format:?} cannot represent a {kind:?} value")]
    UnsupportedKind { format: Format, kind: Kind },

    #[error("no codec registered for {0:?}")]
    FormatUnavailable(Format),

    #[error("unknown format id {0:#x}")]
    UnknownFormatId(u16),

    /// No registered probe recognised the source
    #[error("unrecognised document format")]
    UnknownFormat,

    #[error("value is read-only")]
    ReadOnly,

    #[error("expected {expected:?}, found {found:?}")]
    WrongKind { expected: Kind, found: Kind },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("index {index} out of bounds (len: {len})")]
    OutOfBounds { index: usize, len: usize },

    #[error("invalid path {path:?}: {msg}")]
    InvalidPath { path: String, msg: String },

    #[error("macro expansion deeper than {0} levels")]
    MacroDepth(usize),

    #[error("unsupported url: {0}")]
    UnsupportedUrl(String),
}
