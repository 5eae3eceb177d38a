//! `{trace}-{thread}.flw` records: one compressed execution trace each.
//!
//! Layout: `u32` LE header length, a bincode [`FlowHeader`], then the base
//! sequence as `u32` LE values. The base holds sub-trace ids of the shared
//! grammar, or of the record's own trace-local grammar when one is embedded.

use bincode::Options;
use serde::{Deserialize, Serialize};
use tracefold_core::grammar::LocalGrammar;
use tracefold_core::{CompressedTrace, IntSequence, RepetitionLevel};

use crate::error::{Error, Result};

/// Current `.flw` header version.
pub const FLOW_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct FlowHeader {
    version: u16,
    levels: Vec<RepetitionLevel>,
    base_len: u64,
    local: Option<LocalGrammar>,
}

/// A decoded execution trace.
#[derive(Debug)]
pub struct FlowRecord<S> {
    /// Compressed sub-trace id stream.
    pub trace: CompressedTrace<S>,
    /// Grammar embedded in the record, if any.
    pub local: Option<LocalGrammar>,
}

/// Entry name for thread `thread` of 1-based trace `trace`.
#[must_use]
pub fn entry_name(trace: usize, thread: usize) -> String {
    format!("{trace}-{thread}.flw")
}

/// Parse an entry name produced by [`entry_name`].
#[must_use]
pub fn parse_entry_name(name: &str) -> Option<(usize, usize)> {
    let stem = name.strip_suffix(".flw")?;
    let (trace, thread) = stem.split_once('-')?;
    Some((trace.parse().ok()?, thread.parse().ok()?))
}

/// Serialize `trace` (and an optional trace-local grammar).
pub fn encode<S: IntSequence>(trace: &mut CompressedTrace<S>, local: Option<&LocalGrammar>) -> Result<Vec<u8>> {
    let base_len = trace.base().len();
    let header = FlowHeader {
        version: FLOW_VERSION,
        levels: trace.levels().to_vec(),
        base_len: base_len as u64,
        local: local.cloned(),
    };
    let head = bincode::serialize(&header).map_err(|e| Error::corrupt("flow header", e))?;
    let head_len = u32::try_from(head.len()).map_err(|e| Error::corrupt("flow header", e))?;

    let mut out = Vec::with_capacity(4 + head.len() + base_len * 4);
    out.extend_from_slice(&head_len.to_le_bytes());
    out.extend_from_slice(&head);
    let base = trace.base_mut();
    for i in 0..base_len {
        out.extend_from_slice(&base.get(i)?.to_le_bytes());
    }
    Ok(out)
}

/// Decode a record, appending its base values to `base`.
pub fn decode<S: IntSequence>(bytes: &[u8], mut base: S) -> Result<FlowRecord<S>> {
    if bytes.len() < 4 {
        return Err(Error::corrupt("flow record", "missing header length"));
    }
    let (len_bytes, rest) = bytes.split_at(4);
    let head_len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if rest.len() < head_len {
        return Err(Error::corrupt("flow record", "truncated header"));
    }
    let (head, body) = rest.split_at(head_len);
    let header: FlowHeader = bincode::options()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(head_len as u64)
        .deserialize(head)
        .map_err(|e| Error::corrupt("flow header", e))?;
    if header.version > FLOW_VERSION {
        return Err(Error::corrupt(
            "flow header",
            format!("unsupported version {}", header.version),
        ));
    }
    let body_len = header
        .base_len
        .checked_mul(4)
        .ok_or_else(|| Error::corrupt("flow record", format!("base length {} overflows", header.base_len)))?;
    if body.len() as u64 != body_len {
        return Err(Error::corrupt(
            "flow record",
            format!("{} body bytes for {} values", body.len(), header.base_len),
        ));
    }
    for c in body.chunks_exact(4) {
        base.push(u32::from_le_bytes([c[0], c[1], c[2], c[3]]))?;
    }
    Ok(FlowRecord {
        trace: CompressedTrace::from_parts(header.levels, base)?,
        local: header.local,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracefold_core::RepetitionCompressor;

    #[test]
    fn record_round_trip() {
        let input = vec![3, 4, 3, 4, 3, 4, 5, 6, 5, 6];
        let mut t = RepetitionCompressor::new().compress_vec(input.clone()).unwrap();
        let local = LocalGrammar {
            sub_sequences: vec![(0, vec![1, 2])],
            sub_traces: vec![(3, vec![0])],
        };
        let bytes = encode(&mut t, Some(&local)).unwrap();
        let mut back = decode(&bytes, Vec::<u32>::new()).unwrap();
        assert_eq!(back.local, Some(local));
        assert_eq!(back.trace.levels(), t.levels());
        assert_eq!(back.trace.reconstruct().unwrap(), input);
    }

    #[test]
    fn truncated_records_fail() {
        let mut t = RepetitionCompressor::new().compress_vec(vec![1, 1, 1, 2]).unwrap();
        let bytes = encode(&mut t, None).unwrap();
        assert!(decode(&bytes[..bytes.len() - 1], Vec::<u32>::new()).is_err());
        assert!(decode(&bytes[..2], Vec::<u32>::new()).is_err());
    }

    fn with_header(header: &FlowHeader, body: &[u8]) -> Vec<u8> {
        let head = bincode::serialize(header).unwrap();
        let mut out = (head.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(&head);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn oversized_base_length_is_corrupt() {
        for base_len in [u64::MAX / 2, u64::MAX, (u64::MAX / 4) + 1] {
            let header = FlowHeader { version: FLOW_VERSION, levels: Vec::new(), base_len, local: None };
            let err = decode(&with_header(&header, &[0; 4]), Vec::<u32>::new()).unwrap_err();
            assert!(matches!(err, Error::CorruptEntry { .. }), "{err}");
        }
    }

    #[test]
    fn hostile_length_prefix_is_rejected() {
        let header = FlowHeader { version: FLOW_VERSION, levels: Vec::new(), base_len: 0, local: None };
        let mut bytes = with_header(&header, &[]);
        // `levels` length prefix follows the u16 version.
        bytes[4 + 2..4 + 10].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            decode(&bytes, Vec::<u32>::new()),
            Err(Error::CorruptEntry { .. })
        ));
    }

    #[test]
    fn entry_names() {
        assert_eq!(entry_name(3, 0), "3-0.flw");
        assert_eq!(parse_entry_name("12-4.flw"), Some((12, 4)));
        assert_eq!(parse_entry_name("12.trc"), None);
    }
}
