//! Identifier tables and the optional component-name index.
//!
//! Tables are identifiers joined by a tab. With indexing enabled, every
//! `:`-separated component except the last is replaced by its position in a
//! shared name table (stored as the `index` entry), so
//! `org/x/Foo.java:bar:17` becomes `0:1:17`.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Separator between identifiers in a table entry.
pub const DELIMITER: char = '\t';

const COMPONENT: char = ':';

/// Join identifiers into one table entry, rejecting any containing a tab.
pub fn join<'a, I>(identifiers: I) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::new();
    for (i, id) in identifiers.into_iter().enumerate() {
        if id.contains(DELIMITER) {
            return Err(Error::InvalidIdentifier(id.to_owned()));
        }
        if i > 0 {
            out.push(DELIMITER);
        }
        out.push_str(id);
    }
    Ok(out)
}

/// Split a table entry. An empty entry is an empty table.
#[must_use]
pub fn split(table: &str) -> Vec<String> {
    if table.is_empty() {
        return Vec::new();
    }
    table.split(DELIMITER).map(str::to_owned).collect()
}

/// Component-name table shared by all indexed identifiers of a container.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentifierIndex {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl IdentifierIndex {
    /// Empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index over a stored `index` entry.
    #[must_use]
    pub fn from_table(table: &str) -> Self {
        let names = split(table);
        let positions = names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
        Self { names, positions }
    }

    /// Names in index order, ready for [`join`].
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Compact `identifier`, registering new component names.
    pub fn compact(&mut self, identifier: &str) -> Result<String> {
        if identifier.contains(DELIMITER) {
            return Err(Error::InvalidIdentifier(identifier.to_owned()));
        }
        let parts: Vec<&str> = identifier.split(COMPONENT).collect();
        let Some((last, prefix)) = parts.split_last() else {
            return Ok(String::new());
        };
        let mut out = String::with_capacity(identifier.len());
        for part in prefix {
            let next = self.names.len();
            let pos = *self.positions.entry((*part).to_owned()).or_insert(next);
            if pos == next {
                self.names.push((*part).to_owned());
            }
            out.push_str(&pos.to_string());
            out.push(COMPONENT);
        }
        out.push_str(last);
        Ok(out)
    }

    /// Restore an identifier produced by [`Self::compact`].
    pub fn expand(&self, compacted: &str) -> Result<String> {
        let parts: Vec<&str> = compacted.split(COMPONENT).collect();
        let Some((last, prefix)) = parts.split_last() else {
            return Ok(String::new());
        };
        let mut out = String::with_capacity(compacted.len() * 2);
        for part in prefix {
            let name = part
                .parse::<usize>()
                .ok()
                .and_then(|i| self.names.get(i))
                .ok_or_else(|| Error::corrupt("index", format!("bad component reference {part:?}")))?;
            out.push_str(name);
            out.push(COMPONENT);
        }
        out.push_str(last);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_split() {
        let t = join(["a", "b:c", ""]).unwrap();
        assert_eq!(t, "a\tb:c\t");
        assert_eq!(split(&t), vec!["a", "b:c", ""]);
        assert!(split("").is_empty());
        assert!(matches!(join(["x\ty"]), Err(Error::InvalidIdentifier(_))));
    }

    #[test]
    fn compaction_round_trips_through_the_table() {
        let mut idx = IdentifierIndex::new();
        let a = idx.compact("org/x/Foo.java:bar:17").unwrap();
        let b = idx.compact("org/x/Foo.java:baz:18").unwrap();
        assert_eq!(a, "0:1:17");
        assert_eq!(b, "0:2:18");

        let stored = join(idx.names().iter().map(String::as_str)).unwrap();
        let back = IdentifierIndex::from_table(&stored);
        assert_eq!(back.expand(&a).unwrap(), "org/x/Foo.java:bar:17");
        assert_eq!(back.expand("plain").unwrap(), "plain");
        assert!(back.expand("9:1").is_err());
    }
}
