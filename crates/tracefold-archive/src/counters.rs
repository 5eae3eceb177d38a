//! Per-node pass/fail counters derived from involvement.

use serde::{Deserialize, Serialize};

use crate::container::TraceEntry;

/// How often a node was (not) executed by failing and passing traces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectrumCounters {
    /// Failing traces that executed the node.
    pub ef: u32,
    /// Passing traces that executed the node.
    pub ep: u32,
    /// Failing traces that did not execute the node.
    pub nf: u32,
    /// Passing traces that did not execute the node.
    pub np: u32,
}

impl SpectrumCounters {
    /// Traces counted.
    #[inline]
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.ef + self.ep + self.nf + self.np
    }
}

/// Counters for every node of a container with `node_count` nodes.
#[must_use]
pub fn spectrum_counters(traces: &[TraceEntry], node_count: usize) -> Vec<SpectrumCounters> {
    let mut out = vec![SpectrumCounters::default(); node_count];
    let (failed, passed) = traces.iter().fold((0u32, 0u32), |(f, p), t| {
        if t.successful() { (f, p + 1) } else { (f + 1, p) }
    });
    for t in traces {
        for n in t.involvement().involved_nodes() {
            if let Some(c) = out.get_mut(n as usize) {
                if t.successful() {
                    c.ep += 1;
                } else {
                    c.ef += 1;
                }
            }
        }
    }
    for c in &mut out {
        c.nf = failed - c.ef;
        c.np = passed - c.ep;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::TraceContainer;
    use crate::involvement::Involvement;
    use tracefold_core::StoreConfig;

    #[test]
    fn counters_partition_traces() {
        let nodes = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let mut c = TraceContainer::new(nodes, &StoreConfig::default());
        c.add_trace("t1", true, Involvement::Hit(vec![0, 1])).unwrap();
        c.add_trace("t2", false, Involvement::Hit(vec![1])).unwrap();
        c.add_trace("t3", false, Involvement::Count(vec![0, 4, 2])).unwrap();

        let counters = c.counters();
        assert_eq!(counters[0], SpectrumCounters { ef: 0, ep: 1, nf: 2, np: 0 });
        assert_eq!(counters[1], SpectrumCounters { ef: 2, ep: 1, nf: 0, np: 0 });
        assert_eq!(counters[2], SpectrumCounters { ef: 1, ep: 0, nf: 1, np: 1 });
        assert!(counters.iter().all(|k| k.total() == 3));
    }
}
