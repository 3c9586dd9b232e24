// Human-readable dumps of encoded documents plus directory scanning.
use std::fmt::Write as _;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::Result;
use crate::registry::{Format, PROBE_LEN, Registry, WriteFormat};
use crate::value::Value;

#[derive(Clone, Copy, Debug)]
pub struct DumpOptions {
    /// Bytes per hex dump line
    pub hex_width: usize,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self { hex_width: 16 }
    }
}

/// Encodes `value` and renders it: text formats as text with leading
/// whitespace trimmed, binary formats as a hex dump.
pub fn dump_with(
    registry: &Registry,
    value: &Value,
    format: impl Into<WriteFormat>,
    opts: &DumpOptions,
) -> Result<String> {
    let wf = format.into();
    let mut bytes = Vec::new();
    registry.write(value, &mut bytes, wf)?;
    if wf.format.is_text() {
        Ok(String::from_utf8_lossy(&bytes).trim_start().to_string())
    } else {
        Ok(hex_dump(&bytes, opts.hex_width))
    }
}

/// Offset, hex bytes and printable ASCII per line.
pub fn hex_dump(bytes: &[u8], width: usize) -> String {
    let width = width.max(1);
    let mut out = String::new();
    for (line, chunk) in bytes.chunks(width).enumerate() {
        write!(out, "{:08x} ", line * width).ok();
        for i in 0..width {
            match chunk.get(i) {
                Some(b) => write!(out, " {b:02x}").ok(),
                None => write!(out, "   ").ok(),
            };
        }
        out.push_str("  |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}

/// Files under `dir` that some registered reader recognises, with the best
/// scoring format, sorted by path.
pub fn find_documents(registry: &Registry, dir: &Path) -> Vec<(PathBuf, Format)> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let mut head = Vec::with_capacity(PROBE_LEN);
        let read = File::open(path).and_then(|f| f.take(PROBE_LEN as u64).read_to_end(&mut head));
        if read.is_err() {
            continue;
        }
        if let Some(&(format, score)) = registry.probe(&head).first() {
            debug!(path = %path.display(), %format, score, "document found");
            out.push((path.to_path_buf(), format));
        }
    }
    out.sort();
    out
}
