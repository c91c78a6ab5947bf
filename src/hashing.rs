//! Hashing System - SHA-256 and canonical JSON
//!
//! Canonical JSON is the hashing input for batch identity, so it must be
//! byte-for-byte stable: keys sorted recursively, arrays in given order,
//! no whitespace.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Deepest nesting accepted while canonicalizing. Matches serde_json's own parse limit.
pub const MAX_CANONICAL_DEPTH: usize = 128;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("Cycle detected: value nests deeper than {0} levels")]
    Cycle(usize),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Stream a file through SHA-256 without holding it in memory.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Convert to canonical JSON (sorted keys, no whitespace)
///
/// Serialization runs through a writer that counts open containers, so a
/// self-referential `Serialize` impl fails with [`CanonicalError::Cycle`]
/// instead of recursing until the stack runs out.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    let mut fence = NestingFence::new(MAX_CANONICAL_DEPTH);
    if let Err(e) = serde_json::to_writer(&mut fence, value) {
        return Err(if fence.tripped {
            CanonicalError::Cycle(MAX_CANONICAL_DEPTH)
        } else {
            CanonicalError::Serialization(e)
        });
    }
    let v: Value = serde_json::from_slice(&fence.buf)?;
    Ok(to_string(&sort_value(&v))?)
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Buffers serializer output and refuses to go deeper than `limit` containers.
struct NestingFence {
    buf: Vec<u8>,
    depth: usize,
    limit: usize,
    in_string: bool,
    escaped: bool,
    tripped: bool,
}

impl NestingFence {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            depth: 0,
            limit,
            in_string: false,
            escaped: false,
            tripped: false,
        }
    }
}

impl Write for NestingFence {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        for &b in bytes {
            if self.in_string {
                match (self.escaped, b) {
                    (true, _) => self.escaped = false,
                    (false, b'\\') => self.escaped = true,
                    (false, b'"') => self.in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => {
                    self.depth += 1;
                    if self.depth > self.limit {
                        self.tripped = true;
                        return Err(io::Error::new(io::ErrorKind::Other, "nesting limit exceeded"));
                    }
                }
                b'}' | b']' => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
        }
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
