//! Subclone lifts: candidate tree nodes where one sample of a conflicting pattern
//! is restricted to one of its two subclones

use crate::pattern::{CloneSet, ConflictGraph, Pattern, Slot};
use serde::{Deserialize, Serialize};

/// A candidate tree node: a pattern, possibly with one sample lifted into a subclone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateNode {
    pub set: CloneSet,
    pub pattern: Pattern,
    /// Samples this node splits into subclones
    pub split: Pattern,
}

impl CandidateNode {
    pub fn plain(pattern: Pattern) -> Self {
        Self {
            set: CloneSet::from_pattern(&pattern),
            pattern,
            split: Pattern::ABSENT,
        }
    }

    pub fn lifted(pattern: Pattern, sample: usize, slot: Slot) -> Self {
        Self {
            set: CloneSet::from_pattern(&pattern).restrict(sample, slot),
            pattern,
            split: Pattern::from_samples([sample]),
        }
    }

    pub fn is_lift(&self) -> bool {
        !self.split.is_empty()
    }
}

/// Candidate nodes for the given distinct patterns, in their order. With `lift` set,
/// every non-founder pattern that conflicts with another one is followed by its
/// lifts, two per sample it contains.
pub fn candidate_nodes(patterns: &[Pattern], no_samples: usize, lift: bool) -> Vec<CandidateNode> {
    let conflicts = ConflictGraph::build(patterns);
    let mut nodes = Vec::with_capacity(patterns.len());
    for (idx, pattern) in patterns.iter().enumerate() {
        nodes.push(CandidateNode::plain(*pattern));
        if !lift || pattern.is_founder(no_samples) || conflicts.degree(idx) == 0 {
            continue;
        }
        for sample in pattern.samples() {
            nodes.push(CandidateNode::lifted(*pattern, sample, Slot::A));
            nodes.push(CandidateNode::lifted(*pattern, sample, Slot::B));
        }
    }
    nodes
}

/// Two candidate nodes conflict when their slot sets overlap without nesting,
/// or when they represent the same pattern
pub fn node_conflicts(nodes: &[CandidateNode]) -> ConflictGraph {
    ConflictGraph::from_fn(nodes.len(), |i, j| {
        nodes[i].pattern == nodes[j].pattern || !nodes[i].set.is_compatible(&nodes[j].set)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(samples: &[usize]) -> Pattern {
        Pattern::from_samples(samples.iter().copied())
    }

    #[test]
    fn test_no_lifts_without_detection() {
        let patterns = vec![p(&[0, 1]), p(&[1, 2])];
        let nodes = candidate_nodes(&patterns, 3, false);
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| !n.is_lift()));
    }

    #[test]
    fn test_lifts_of_conflicting_patterns() {
        let patterns = vec![p(&[0, 1, 2]), p(&[0, 1]), p(&[1, 2]), p(&[0])];
        let nodes = candidate_nodes(&patterns, 3, true);

        // founder and {1} stay plain; {1,2} and {2,3} get two lifts per sample
        assert_eq!(nodes.len(), 4 + 4 + 4);
        assert_eq!(nodes.iter().filter(|n| n.pattern == p(&[0, 1])).count(), 5);
        assert!(nodes.iter().filter(|n| n.pattern == p(&[0, 1, 2])).all(|n| !n.is_lift()));
    }

    #[test]
    fn test_lifts_resolve_conflict() {
        let patterns = vec![p(&[0, 1]), p(&[1, 2])];
        let nodes = candidate_nodes(&patterns, 3, true);
        let graph = node_conflicts(&nodes);

        let left = nodes
            .iter()
            .position(|n| *n == CandidateNode::lifted(p(&[0, 1]), 1, Slot::A))
            .unwrap();
        let right = nodes
            .iter()
            .position(|n| *n == CandidateNode::lifted(p(&[1, 2]), 1, Slot::B))
            .unwrap();
        assert!(!graph.conflicts(left, right));
        assert!(graph.conflicts(0, 1));

        // lifts of one pattern exclude each other and the plain pattern
        let other_left = nodes
            .iter()
            .position(|n| *n == CandidateNode::lifted(p(&[0, 1]), 0, Slot::B))
            .unwrap();
        assert!(graph.conflicts(left, other_left));
        assert!(graph.conflicts(0, left));
    }
}
