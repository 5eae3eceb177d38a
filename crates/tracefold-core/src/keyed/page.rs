//! Encoding of one keyed-store page.
//!
//! ```text
//! u32 entries | entries × (u32 key | u32 len | u32 values[len])
//! ```
//!
//! All integers little-endian, entries in ascending key order. Pages move
//! between containers as opaque bytes in this form.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub(crate) struct KeyedPage {
    pub(crate) id: u32,
    pub(crate) entries: BTreeMap<u32, Vec<u32>>,
    pub(crate) modified: bool,
}

impl KeyedPage {
    pub(crate) fn empty(id: u32) -> Self {
        Self {
            id,
            entries: BTreeMap::new(),
            modified: false,
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let words: usize = self.entries.values().map(|v| v.len() + 2).sum::<usize>() + 1;
        let mut out = Vec::with_capacity(words * 4);
        push_len(&mut out, self.entries.len());
        for (key, values) in &self.entries {
            out.extend_from_slice(&key.to_le_bytes());
            push_len(&mut out, values.len());
            for v in values {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    pub(crate) fn decode(id: u32, bytes: &[u8]) -> Result<Self> {
        let mut words = Words::new(id, bytes)?;
        let count = words.next_len()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = words.next_word()?;
            let len = words.next_len()?;
            let mut values = Vec::with_capacity(len.min(words.remaining()));
            for _ in 0..len {
                values.push(words.next_word()?);
            }
            entries.insert(key, values);
        }
        if words.remaining() != 0 {
            return Err(Error::corrupt_record(
                format!("keyed page {id}"),
                format!("{} trailing words", words.remaining()),
            ));
        }
        Ok(Self {
            id,
            entries,
            modified: false,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn push_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u32).to_le_bytes());
}

struct Words<'a> {
    id: u32,
    chunks: std::slice::ChunksExact<'a, u8>,
}

impl<'a> Words<'a> {
    fn new(id: u32, bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::corrupt_record(
                format!("keyed page {id}"),
                format!("length {} is not a multiple of 4", bytes.len()),
            ));
        }
        Ok(Self {
            id,
            chunks: bytes.chunks_exact(4),
        })
    }

    fn remaining(&self) -> usize {
        self.chunks.len()
    }

    fn next_word(&mut self) -> Result<u32> {
        self.chunks
            .next()
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .ok_or_else(|| Error::corrupt_record(format!("keyed page {}", self.id), "truncated"))
    }

    fn next_len(&mut self) -> Result<usize> {
        let n = self.next_word()?;
        usize::try_from(n).map_err(|e| Error::corrupt_record(format!("keyed page {}", self.id), e))
    }
}
