//! Rooted evolutionary tree built from a set of compatible patterns

use crate::pattern::{CloneSet, Pattern, Slot};
use crate::{TreeError, TreeResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Index of the germline root
pub const GERMLINE: usize = 0;
/// Index of the founder (trunk) node, the only child of the germline root
pub const FOUNDER: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Germline,
    /// Inner node shared by several samples
    Clone,
    /// A sample, or one subclone of a split sample
    Sample,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub set: CloneSet,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Variants acquired on the edge into this node, ascending
    pub mutations: Vec<usize>,
    pub kind: NodeKind,
}

impl TreeNode {
    fn new(set: CloneSet, mutations: Vec<usize>, kind: NodeKind) -> Self {
        Self {
            set,
            parent: None,
            children: Vec::new(),
            mutations,
            kind,
        }
    }

    pub fn samples(&self) -> Pattern {
        self.set.project()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    no_samples: usize,
    split: Pattern,
}

impl Tree {
    /// Arrange realized node sets, each with the variants acquired there, into a tree.
    /// The founder node and one leaf per sample (or subclone) are always present.
    pub fn build(realized: Vec<(CloneSet, Vec<usize>)>, no_samples: usize) -> TreeResult<Self> {
        let full = CloneSet::from_pattern(&Pattern::founder(no_samples));

        for (i, (set, _)) in realized.iter().enumerate() {
            if set.is_empty() || !set.is_subset_of(&full) {
                return Err(TreeError::InvalidTree(format!(
                    "node set {:?} does not fit {} samples",
                    set.bits(),
                    no_samples
                )));
            }
            for (other, _) in &realized[i + 1..] {
                if set == other {
                    return Err(TreeError::InvalidTree("duplicate node set".to_string()));
                }
                if !set.is_compatible(other) {
                    return Err(TreeError::InvalidTree(format!(
                        "incompatible node sets {} and {}",
                        set.project(),
                        other.project()
                    )));
                }
            }
        }

        let split = realized
            .iter()
            .fold(0u64, |bits, (set, _)| bits | set.split_samples().bits());
        let split = Pattern::from_bits(split);

        let mut trunk = Vec::new();
        let mut inner = Vec::new();
        for (set, mut mutations) in realized {
            mutations.sort_unstable();
            if set == full {
                trunk = mutations;
            } else {
                inner.push((set, mutations));
            }
        }
        // larger sets first so that every parent precedes its children
        inner.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.bits().cmp(&b.0.bits())));

        let mut nodes = vec![
            TreeNode::new(full, Vec::new(), NodeKind::Germline),
            TreeNode::new(full, trunk, NodeKind::Clone),
        ];
        nodes.extend(
            inner
                .into_iter()
                .map(|(set, mutations)| TreeNode::new(set, mutations, NodeKind::Clone)),
        );

        for sample in 0..no_samples {
            let leaves = if split.contains(sample) {
                vec![
                    CloneSet::from_slot(sample, Slot::A),
                    CloneSet::from_slot(sample, Slot::B),
                ]
            } else {
                vec![CloneSet::from_pattern(&Pattern::from_samples([sample]))]
            };
            for leaf in leaves {
                match (FOUNDER..nodes.len()).find(|&id| nodes[id].set == leaf) {
                    // a single sample: the founder is its own leaf
                    Some(FOUNDER) => {}
                    Some(id) => nodes[id].kind = NodeKind::Sample,
                    None => nodes.push(TreeNode::new(leaf, Vec::new(), NodeKind::Sample)),
                }
            }
        }

        nodes[FOUNDER].parent = Some(GERMLINE);
        for id in (FOUNDER + 1)..nodes.len() {
            let set = nodes[id].set;
            let parent = (FOUNDER..nodes.len())
                .filter(|&j| j != id && set.is_strict_subset_of(&nodes[j].set))
                .min_by_key(|&j| (nodes[j].set.len(), j))
                .unwrap_or(FOUNDER);
            nodes[id].parent = Some(parent);
        }
        for id in FOUNDER..nodes.len() {
            if let Some(parent) = nodes[id].parent {
                nodes[parent].children.push(id);
            }
        }

        Ok(Self {
            nodes,
            no_samples,
            split,
        })
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &TreeNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn no_samples(&self) -> usize {
        self.no_samples
    }

    /// Samples represented by two subclone leaves
    pub fn split_samples(&self) -> Pattern {
        self.split
    }

    pub fn find(&self, set: &CloneSet) -> Option<usize> {
        (FOUNDER..self.nodes.len()).find(|&id| self.nodes[id].set == *set)
    }

    /// (parent, child) pairs
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, node)| node.parent.map(|p| (p, id)))
    }

    pub fn ancestors(&self, id: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = self.nodes[id].parent;
        while let Some(node) = current {
            path.push(node);
            current = self.nodes[node].parent;
        }
        path
    }

    /// All variants acquired on the path from the root to the node
    pub fn path_mutations(&self, id: usize) -> BTreeSet<usize> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .flat_map(|n| self.nodes[n].mutations.iter().copied())
            .collect()
    }

    pub fn sample_leaves(&self, sample: usize) -> Vec<usize> {
        (FOUNDER..self.nodes.len())
            .filter(|&id| {
                let node = &self.nodes[id];
                node.children.is_empty() && node.set.project().contains(sample)
            })
            .collect()
    }

    /// Variants the tree places in a sample, over all of its subclones
    pub fn mutations_in_sample(&self, sample: usize) -> BTreeSet<usize> {
        self.sample_leaves(sample)
            .into_iter()
            .flat_map(|leaf| self.path_mutations(leaf))
            .collect()
    }

    pub fn placed_mutations(&self) -> usize {
        self.nodes.iter().map(|n| n.mutations.len()).sum()
    }

    pub fn median_mutations_per_sample(&self) -> f64 {
        let mut counts: Vec<usize> = (0..self.no_samples)
            .map(|s| self.mutations_in_sample(s).len())
            .collect();
        if counts.is_empty() {
            return f64::NAN;
        }
        counts.sort_unstable();
        let mid = counts.len() / 2;
        if counts.len() % 2 == 0 {
            (counts[mid - 1] + counts[mid]) as f64 / 2.0
        } else {
            counts[mid] as f64
        }
    }

    /// Check monotone inheritance: children cover strictly fewer samples than their
    /// parents, and every node inherits exactly the variants whose node contains it
    pub fn validate(&self) -> TreeResult<()> {
        let root = &self.nodes[GERMLINE];
        if root.parent.is_some() || root.kind != NodeKind::Germline {
            return Err(TreeError::InvalidTree("germline root is malformed".to_string()));
        }

        let mut placed: HashMap<usize, CloneSet> = HashMap::new();
        for (id, node) in self.nodes.iter().enumerate().skip(FOUNDER) {
            let parent = node
                .parent
                .ok_or_else(|| TreeError::InvalidTree(format!("node {} has no parent", id)))?;
            if !self.nodes[parent].children.contains(&id) {
                return Err(TreeError::InvalidTree(format!(
                    "node {} is missing from the children of {}",
                    id, parent
                )));
            }
            if id == FOUNDER {
                if parent != GERMLINE || node.set != root.set {
                    return Err(TreeError::InvalidTree(
                        "founder must cover all samples".to_string(),
                    ));
                }
            } else if !node.set.is_strict_subset_of(&self.nodes[parent].set) {
                return Err(TreeError::InvalidTree(format!(
                    "node {} does not cover strictly fewer samples than its parent {}",
                    id, parent
                )));
            }
            for &variant in &node.mutations {
                if placed.insert(variant, node.set).is_some() {
                    return Err(TreeError::InvalidTree(format!(
                        "variant {} is acquired on more than one edge",
                        variant
                    )));
                }
            }
        }

        for id in FOUNDER..self.nodes.len() {
            let set = self.nodes[id].set;
            let expected: BTreeSet<usize> = placed
                .iter()
                .filter(|(_, node_set)| set.is_subset_of(node_set))
                .map(|(&variant, _)| variant)
                .collect();
            if self.path_mutations(id) != expected {
                return Err(TreeError::InvalidTree(format!(
                    "inherited mutations of node {} do not match its samples",
                    id
                )));
            }
        }

        Ok(())
    }
}
