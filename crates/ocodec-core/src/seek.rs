// Path addressing over a decoded value graph.
// Highlights:
// - `.key` selects a dictionary entry, `[n]` an array item; `\` escapes `.`, `[` and `]` in keys.
// - Macro mode: a String resolving to `$path` is re-resolved from the root, bounded by depth.
// - Inspect: `seek`, `seek_with`, `list_children`. Modify: `set_at`, `remove_at`.
use tracing::trace;

use crate::error::{Error, Result};
use crate::value::{Kind, Value};

#[derive(Debug, Clone, Copy)]
pub struct SeekOptions {
    pub macro_enabled: bool,
    /// Nested macro expansions allowed before failing
    pub max_macro_depth: usize,
}

impl Default for SeekOptions {
    fn default() -> Self {
        Self {
            macro_enabled: false,
            max_macro_depth: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

pub fn parse_path(path: &str) -> Result<Vec<Segment>> {
    let invalid = |msg: &str| Error::InvalidPath {
        path: path.to_string(),
        msg: msg.to_string(),
    };
    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut key = String::new();
                while let Some(&c) = chars.peek() {
                    if matches!(c, '.' | '[' | ']') {
                        break;
                    }
                    chars.next();
                    if c == '\\' {
                        match chars.next() {
                            Some(escaped) => key.push(escaped),
                            None => return Err(invalid("dangling escape")),
                        }
                    } else {
                        key.push(c);
                    }
                }
                segments.push(Segment::Key(key));
            }
            '[' => {
                let mut digits = String::new();
                while let Some(&c) = chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    digits.push(c);
                    chars.next();
                }
                if chars.next() != Some(']') {
                    return Err(invalid("expected digits followed by ']'"));
                }
                let index = digits.parse().map_err(|_| invalid("bad index"))?;
                segments.push(Segment::Index(index));
            }
            other => return Err(invalid(&format!("unexpected '{other}'"))),
        }
    }
    Ok(segments)
}

fn step(node: &Value, seg: &Segment) -> Result<Value> {
    match seg {
        Segment::Key(key) => {
            expect_kind(node, Kind::Dictionary)?;
            node.get_key(key)
                .ok_or_else(|| Error::KeyNotFound(key.clone()))
        }
        Segment::Index(index) => {
            expect_kind(node, Kind::Array)?;
            node.get(*index).ok_or(Error::OutOfBounds {
                index: *index,
                len: node.len(),
            })
        }
    }
}

fn expect_kind(node: &Value, expected: Kind) -> Result<()> {
    let found = node.kind();
    if found == expected {
        Ok(())
    } else {
        Err(Error::WrongKind { expected, found })
    }
}

/// Resolves `path` from `root`; an empty path yields the root itself.
pub fn seek(root: &Value, path: &str, macro_enabled: bool) -> Result<Value> {
    let opts = SeekOptions {
        macro_enabled,
        ..SeekOptions::default()
    };
    seek_with(root, path, &opts)
}

pub fn seek_with(root: &Value, path: &str, opts: &SeekOptions) -> Result<Value> {
    resolve(root, path, opts, 0)
}

fn resolve(root: &Value, path: &str, opts: &SeekOptions, depth: usize) -> Result<Value> {
    let mut node = root.clone();
    for seg in parse_path(path)? {
        node = step(&node, &seg)?;
        if !opts.macro_enabled {
            continue;
        }
        let target = node.as_str().and_then(|s| s.strip_prefix('$').map(str::to_string));
        if let Some(target) = target {
            if depth >= opts.max_macro_depth {
                return Err(Error::MacroDepth(opts.max_macro_depth));
            }
            trace!(target = %target, depth, "expanding path macro");
            node = resolve(root, &target, opts, depth + 1)?;
        }
    }
    Ok(node)
}

fn split_last(path: &str) -> Result<(Vec<Segment>, Segment)> {
    let mut segments = parse_path(path)?;
    let last = segments.pop().ok_or_else(|| Error::InvalidPath {
        path: path.to_string(),
        msg: "path addresses the root".into(),
    })?;
    Ok((segments, last))
}

fn walk(root: &Value, segments: &[Segment]) -> Result<Value> {
    segments
        .iter()
        .try_fold(root.clone(), |node, seg| step(&node, seg))
}

/// Stores `value` at `path`: a dictionary key is inserted or replaced, an
/// array index must exist (or equal the length to append).
/// Returns the value previously stored there.
pub fn set_at(root: &Value, path: &str, value: Value) -> Result<Option<Value>> {
    let (parents, last) = split_last(path)?;
    let parent = walk(root, &parents)?;
    match last {
        Segment::Key(key) => {
            expect_kind(&parent, Kind::Dictionary)?;
            parent.insert_key(key, value)
        }
        Segment::Index(index) if index == parent.len() && parent.kind() == Kind::Array => {
            parent.push(value)?;
            Ok(None)
        }
        Segment::Index(index) => {
            expect_kind(&parent, Kind::Array)?;
            parent.set_item(index, value).map(Some)
        }
    }
}

/// Detaches and returns the value at `path`.
pub fn remove_at(root: &Value, path: &str) -> Result<Value> {
    let (parents, last) = split_last(path)?;
    let parent = walk(root, &parents)?;
    match last {
        Segment::Key(key) => {
            expect_kind(&parent, Kind::Dictionary)?;
            parent.remove_key(&key)?.ok_or(Error::KeyNotFound(key))
        }
        Segment::Index(index) => {
            expect_kind(&parent, Kind::Array)?;
            parent.remove_at(index)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildInfo {
    pub key_or_index: String,
    pub kind: Kind,
    pub len: Option<usize>,
}

fn child_info(key_or_index: String, v: &Value) -> ChildInfo {
    let kind = v.kind();
    ChildInfo {
        key_or_index,
        kind,
        len: kind.is_container().then(|| v.len()),
    }
}

/// Direct children of the container at `path`; scalars have none.
pub fn list_children(root: &Value, path: &str) -> Result<Vec<ChildInfo>> {
    let node = walk(root, &parse_path(path)?)?;
    Ok(match node.kind() {
        Kind::Dictionary => node
            .entries()
            .iter()
            .map(|(k, v)| child_info(k.clone(), v))
            .collect(),
        Kind::Array => node
            .items()
            .iter()
            .enumerate()
            .map(|(i, v)| child_info(i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_escaped_keys() {
        let segs = parse_path(".a\\.b[3].c").unwrap();
        assert_eq!(
            segs,
            vec![
                Segment::Key("a.b".into()),
                Segment::Index(3),
                Segment::Key("c".into())
            ]
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(matches!(parse_path("[x]"), Err(Error::InvalidPath { .. })));
        assert!(matches!(parse_path("a"), Err(Error::InvalidPath { .. })));
        assert!(matches!(parse_path(".a\\"), Err(Error::InvalidPath { .. })));
    }
}
