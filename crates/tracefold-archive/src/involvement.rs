//! Per-trace involvement blobs.
//!
//! Every blob starts with the trace's success flag (`1` = passed), followed
//! by one of three layouts:
//! - dense: one byte per node, `1` if involved;
//! - sparse: little-endian `u32` 1-based indices of involved nodes;
//! - counts: little-endian `u32` hit count per node.
//!
//! Sparse and count blobs store the flag as a `u32` as well. Any blob may be
//! wrapped in a zstd frame.

use crate::error::{Error, Result};
use crate::status::Layout;

const ZSTD_LEVEL: i32 = 3;

/// Which nodes a trace executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Involvement {
    /// Sorted, distinct 0-based indices of involved nodes.
    Hit(Vec<u32>),
    /// Hit count for every node, in node order.
    Count(Vec<u32>),
}

impl Involvement {
    /// Hit involvement from per-node flags.
    #[must_use]
    pub fn from_flags(flags: &[bool]) -> Self {
        Self::Hit(
            flags
                .iter()
                .enumerate()
                .filter(|(_, f)| **f)
                .filter_map(|(i, _)| u32::try_from(i).ok())
                .collect(),
        )
    }

    /// Whether node `node` was executed.
    #[must_use]
    pub fn is_involved(&self, node: usize) -> bool {
        match self {
            Self::Hit(nodes) => u32::try_from(node).is_ok_and(|n| nodes.binary_search(&n).is_ok()),
            Self::Count(hits) => hits.get(node).is_some_and(|h| *h > 0),
        }
    }

    /// Executions of node `node` (`1` for any involved node of a hit trace).
    #[must_use]
    pub fn hits(&self, node: usize) -> u32 {
        match self {
            Self::Hit(_) => u32::from(self.is_involved(node)),
            Self::Count(hits) => hits.get(node).copied().unwrap_or(0),
        }
    }

    /// Number of involved nodes.
    #[must_use]
    pub fn involved_count(&self) -> usize {
        match self {
            Self::Hit(nodes) => nodes.len(),
            Self::Count(hits) => hits.iter().filter(|h| **h > 0).count(),
        }
    }

    /// Involved node indices, ascending.
    #[must_use]
    pub fn involved_nodes(&self) -> Vec<u32> {
        match self {
            Self::Hit(nodes) => nodes.clone(),
            Self::Count(hits) => hits
                .iter()
                .enumerate()
                .filter(|(_, h)| **h > 0)
                .filter_map(|(i, _)| u32::try_from(i).ok())
                .collect(),
        }
    }

    /// `true` for [`Involvement::Count`].
    #[must_use]
    pub const fn has_counts(&self) -> bool {
        matches!(self, Self::Count(_))
    }

    pub(crate) fn check(&self, node_count: usize) -> Result<()> {
        match self {
            Self::Hit(nodes) => {
                if nodes.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(Error::corrupt("involvement", "node indices not strictly ascending"));
                }
                if nodes.last().is_some_and(|n| *n as usize >= node_count) {
                    return Err(Error::corrupt("involvement", "node index out of range"));
                }
            }
            Self::Count(hits) if hits.len() != node_count => {
                return Err(Error::corrupt(
                    "involvement",
                    format!("{} counts for {node_count} nodes", hits.len()),
                ));
            }
            Self::Count(_) => {}
        }
        Ok(())
    }

    /// Raw row for `layout`, flag first, before optional compression.
    fn row(&self, successful: bool, node_count: usize, layout: Layout) -> Result<Row> {
        self.check(node_count)?;
        let flag = u8::from(successful);
        Ok(match layout {
            Layout::Dense => {
                let mut out = vec![0u8; node_count + 1];
                out[0] = flag;
                for n in self.involved_nodes() {
                    out[n as usize + 1] = 1;
                }
                Row::Bytes(out)
            }
            Layout::Sparse => {
                let mut out = Vec::with_capacity(self.involved_count() + 1);
                out.push(u32::from(flag));
                out.extend(self.involved_nodes().into_iter().map(|n| n + 1));
                Row::Ints(out)
            }
            Layout::Counts => {
                let mut out = Vec::with_capacity(node_count + 1);
                out.push(u32::from(flag));
                out.extend((0..node_count).map(|n| self.hits(n)));
                Row::Ints(out)
            }
        })
    }

    fn from_row(row: Row, node_count: usize, layout: Layout) -> Result<(bool, Self)> {
        let (flag, involvement) = match (layout, row) {
            (Layout::Dense, Row::Bytes(bytes)) => {
                let Some((&flag, flags)) = bytes.split_first() else {
                    return Err(Error::corrupt("involvement", "empty dense row"));
                };
                if flags.len() != node_count {
                    return Err(Error::corrupt(
                        "involvement",
                        format!("{} flags for {node_count} nodes", flags.len()),
                    ));
                }
                let bools: Vec<bool> = flags.iter().map(|b| *b != 0).collect();
                (u32::from(flag), Self::from_flags(&bools))
            }
            (Layout::Sparse, Row::Ints(ints)) => {
                let Some((&flag, nodes)) = ints.split_first() else {
                    return Err(Error::corrupt("involvement", "empty sparse row"));
                };
                let mut out = Vec::with_capacity(nodes.len());
                for n in nodes {
                    let Some(zero_based) = n.checked_sub(1) else {
                        return Err(Error::corrupt("involvement", "sparse index 0"));
                    };
                    out.push(zero_based);
                }
                (flag, Self::Hit(out))
            }
            (Layout::Counts, Row::Ints(ints)) => {
                let Some((&flag, hits)) = ints.split_first() else {
                    return Err(Error::corrupt("involvement", "empty count row"));
                };
                (flag, Self::Count(hits.to_vec()))
            }
            _ => return Err(Error::corrupt("involvement", "row does not match layout")),
        };
        involvement.check(node_count)?;
        Ok((flag == 1, involvement))
    }
}

enum Row {
    Bytes(Vec<u8>),
    Ints(Vec<u32>),
}

fn ints_to_bytes(ints: &[u32]) -> Vec<u8> {
    ints.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_ints(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::corrupt("involvement", "length is not a multiple of 4"));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn pack(bytes: Vec<u8>, compressed: bool) -> Result<Vec<u8>> {
    if !compressed {
        return Ok(bytes);
    }
    zstd::encode_all(bytes.as_slice(), ZSTD_LEVEL).map_err(|e| Error::corrupt("involvement", e))
}

fn unpack(bytes: &[u8], compressed: bool) -> Result<Vec<u8>> {
    if !compressed {
        return Ok(bytes.to_vec());
    }
    zstd::decode_all(bytes).map_err(|e| Error::corrupt("involvement", e))
}

/// Encode one trace's blob.
pub fn encode_blob(
    involvement: &Involvement,
    successful: bool,
    node_count: usize,
    layout: Layout,
    compressed: bool,
) -> Result<Vec<u8>> {
    let raw = match involvement.row(successful, node_count, layout)? {
        Row::Bytes(b) => b,
        Row::Ints(i) => ints_to_bytes(&i),
    };
    pack(raw, compressed)
}

/// Decode one trace's blob into `(successful, involvement)`.
pub fn decode_blob(
    bytes: &[u8],
    node_count: usize,
    layout: Layout,
    compressed: bool,
) -> Result<(bool, Involvement)> {
    let raw = unpack(bytes, compressed)?;
    let row = match layout {
        Layout::Dense => Row::Bytes(raw),
        Layout::Sparse | Layout::Counts => Row::Ints(bytes_to_ints(&raw)?),
    };
    Involvement::from_row(row, node_count, layout)
}

/* ---------------- Legacy single table ---------------- */

/// Encode all traces into one `involvementTable` blob.
///
/// Dense rows are concatenated; sparse and count rows are stored as a row
/// count followed by length-prefixed rows.
pub fn encode_table<'a, I>(rows: I, node_count: usize, layout: Layout, compressed: bool) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a Involvement, bool)>,
{
    let mut bytes = Vec::new();
    let mut ints: Vec<u32> = vec![0];
    for (involvement, successful) in rows {
        match involvement.row(successful, node_count, layout)? {
            Row::Bytes(b) => bytes.extend_from_slice(&b),
            Row::Ints(i) => {
                ints[0] += 1;
                ints.push(u32::try_from(i.len()).map_err(|e| Error::corrupt("involvementTable", e))?);
                ints.extend_from_slice(&i);
            }
        }
    }
    let raw = match layout {
        Layout::Dense => bytes,
        Layout::Sparse | Layout::Counts => ints_to_bytes(&ints),
    };
    pack(raw, compressed)
}

/// Decode an `involvementTable` blob.
pub fn decode_table(
    bytes: &[u8],
    node_count: usize,
    layout: Layout,
    compressed: bool,
) -> Result<Vec<(bool, Involvement)>> {
    let raw = unpack(bytes, compressed)?;
    let mut out = Vec::new();
    match layout {
        Layout::Dense => {
            for row in raw.chunks(node_count + 1) {
                out.push(Involvement::from_row(Row::Bytes(row.to_vec()), node_count, layout)?);
            }
        }
        Layout::Sparse | Layout::Counts => {
            let ints = bytes_to_ints(&raw)?;
            let Some((&rows, mut rest)) = ints.split_first() else {
                return Ok(out);
            };
            for _ in 0..rows {
                let Some((&len, tail)) = rest.split_first() else {
                    return Err(Error::corrupt("involvementTable", "truncated row header"));
                };
                let len = len as usize;
                if tail.len() < len {
                    return Err(Error::corrupt("involvementTable", "truncated row"));
                }
                let (row, tail) = tail.split_at(len);
                out.push(Involvement::from_row(Row::Ints(row.to_vec()), node_count, layout)?);
                rest = tail;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_blob_layout() {
        let inv = Involvement::Hit(vec![0, 2]);
        let raw = encode_blob(&inv, true, 4, Layout::Dense, false).unwrap();
        assert_eq!(raw, vec![1, 1, 0, 1, 0]);
        assert_eq!(decode_blob(&raw, 4, Layout::Dense, false).unwrap(), (true, inv));
    }

    #[test]
    fn sparse_indices_are_one_based() {
        let inv = Involvement::Hit(vec![0, 3]);
        let raw = encode_blob(&inv, false, 5, Layout::Sparse, false).unwrap();
        assert_eq!(bytes_to_ints(&raw).unwrap(), vec![0, 1, 4]);
        let packed = encode_blob(&inv, false, 5, Layout::Sparse, true).unwrap();
        assert_eq!(decode_blob(&packed, 5, Layout::Sparse, true).unwrap(), (false, inv));
    }

    #[test]
    fn counts_keep_hit_numbers() {
        let inv = Involvement::Count(vec![0, 7, 1]);
        let packed = encode_blob(&inv, true, 3, Layout::Counts, true).unwrap();
        let (ok, back) = decode_blob(&packed, 3, Layout::Counts, true).unwrap();
        assert!(ok);
        assert_eq!(back.hits(1), 7);
        assert_eq!(back.involved_nodes(), vec![1, 2]);
    }

    #[test]
    fn legacy_tables() {
        let a = Involvement::Hit(vec![1]);
        let b = Involvement::Hit(vec![0, 1, 2]);
        for layout in [Layout::Dense, Layout::Sparse] {
            let blob = encode_table([(&a, true), (&b, false)], 3, layout, true).unwrap();
            let rows = decode_table(&blob, 3, layout, true).unwrap();
            assert_eq!(rows, vec![(true, a.clone()), (false, b.clone())]);
        }
    }

    #[test]
    fn malformed_rows_are_rejected() {
        assert!(decode_blob(&[1, 0], 3, Layout::Dense, false).is_err());
        assert!(decode_blob(&ints_to_bytes(&[1, 0]), 3, Layout::Sparse, false).is_err());
        assert!(decode_blob(&ints_to_bytes(&[1, 9]), 3, Layout::Sparse, false).is_err());
        assert!(encode_blob(&Involvement::Count(vec![1]), true, 3, Layout::Counts, false).is_err());
    }
}
