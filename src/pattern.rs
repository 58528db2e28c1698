//! Mutation patterns, their grouping and the pairwise conflict relation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Presence/absence of a variant across samples, one bit per sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pattern(u64);

fn sample_mask(no_samples: usize) -> u64 {
    if no_samples >= 64 {
        u64::MAX
    } else {
        (1u64 << no_samples) - 1
    }
}

impl Pattern {
    pub const ABSENT: Pattern = Pattern(0);

    pub fn from_bits(bits: u64) -> Self {
        Pattern(bits)
    }

    pub fn from_calls(calls: &[bool]) -> Self {
        Pattern(
            calls
                .iter()
                .enumerate()
                .filter(|(_, &present)| present)
                .fold(0u64, |bits, (s, _)| bits | (1 << s)),
        )
    }

    pub fn from_samples<I: IntoIterator<Item = usize>>(samples: I) -> Self {
        Pattern(samples.into_iter().fold(0u64, |bits, s| bits | (1 << s)))
    }

    /// The pattern present in every one of `no_samples` samples
    pub fn founder(no_samples: usize) -> Self {
        Pattern(sample_mask(no_samples))
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn is_absent(&self) -> bool {
        self.0 == 0
    }

    pub fn is_founder(&self, no_samples: usize) -> bool {
        self.0 == sample_mask(no_samples)
    }

    pub fn contains(&self, sample: usize) -> bool {
        self.0 & (1 << sample) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn samples(&self) -> impl Iterator<Item = usize> + '_ {
        (0..64).filter(move |&s| self.contains(s))
    }

    pub fn is_subset_of(&self, other: &Pattern) -> bool {
        self.0 & other.0 == self.0
    }

    /// Two patterns fit on one tree iff their sample sets are nested or disjoint
    pub fn is_compatible(&self, other: &Pattern) -> bool {
        let shared = self.0 & other.0;
        shared == 0 || shared == self.0 || shared == other.0
    }

    pub fn labels(&self, sample_names: &[String]) -> Vec<String> {
        self.samples()
            .filter_map(|s| sample_names.get(s).cloned())
            .collect()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let samples: Vec<String> = self.samples().map(|s| (s + 1).to_string()).collect();
        write!(f, "{{{}}}", samples.join(","))
    }
}

/// Sample set in subclone slot space: every sample owns two slots (subclone a and b).
/// A sample that is not split always occupies both of its slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CloneSet(u128);

/// Subclone slot of a split sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    fn offset(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }
}

impl CloneSet {
    pub fn from_pattern(pattern: &Pattern) -> Self {
        CloneSet(
            pattern
                .samples()
                .fold(0u128, |bits, s| bits | (0b11u128 << (2 * s))),
        )
    }

    pub fn from_slot(sample: usize, slot: Slot) -> Self {
        CloneSet(1u128 << (2 * sample + slot.offset()))
    }

    /// Restrict one sample of the set to a single subclone slot
    pub fn restrict(&self, sample: usize, slot: Slot) -> Self {
        let other = match slot {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        };
        CloneSet(self.0 & !(1u128 << (2 * sample + other.offset())))
    }

    pub fn bits(&self) -> u128 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Samples with at least one slot in the set
    pub fn project(&self) -> Pattern {
        let mut bits = 0u64;
        for s in 0..64 {
            if (self.0 >> (2 * s)) & 0b11 != 0 {
                bits |= 1 << s;
            }
        }
        Pattern::from_bits(bits)
    }

    /// Samples present in exactly one of their two slots
    pub fn split_samples(&self) -> Pattern {
        let mut bits = 0u64;
        for s in 0..64 {
            let slots = (self.0 >> (2 * s)) & 0b11;
            if slots == 0b01 || slots == 0b10 {
                bits |= 1 << s;
            }
        }
        Pattern::from_bits(bits)
    }

    pub fn slot_of(&self, sample: usize) -> Option<Slot> {
        match (self.0 >> (2 * sample)) & 0b11 {
            0b01 => Some(Slot::A),
            0b10 => Some(Slot::B),
            _ => None,
        }
    }

    pub fn is_subset_of(&self, other: &CloneSet) -> bool {
        self.0 & other.0 == self.0
    }

    pub fn is_strict_subset_of(&self, other: &CloneSet) -> bool {
        self.is_subset_of(other) && self.0 != other.0
    }

    pub fn is_compatible(&self, other: &CloneSet) -> bool {
        let shared = self.0 & other.0;
        shared == 0 || shared == self.0 || shared == other.0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Human-readable members; split samples carry their subclone suffix
    pub fn labels(&self, sample_names: &[String]) -> Vec<String> {
        self.project()
            .samples()
            .filter_map(|s| {
                let name = sample_names.get(s)?;
                Some(match self.slot_of(s) {
                    Some(Slot::A) => format!("{}a", name),
                    Some(Slot::B) => format!("{}b", name),
                    None => name.clone(),
                })
            })
            .collect()
    }
}

/// A distinct pattern together with the variants sharing it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternEntry {
    pub pattern: Pattern,
    pub variants: Vec<usize>,
    pub weight: f64,
}

/// Distinct patterns in order of first occurrence
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    entries: Vec<PatternEntry>,
    index: HashMap<Pattern, usize>,
}

impl PatternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group variants by pattern, weighting each by its variant count.
    /// Variants absent from every sample are left out.
    pub fn from_patterns(patterns: &[Pattern]) -> Self {
        let mut table = Self::new();
        for (variant, pattern) in patterns.iter().enumerate() {
            if !pattern.is_absent() {
                table.add(*pattern, variant, 1.0);
            }
        }
        table
    }

    pub fn add(&mut self, pattern: Pattern, variant: usize, weight: f64) -> usize {
        let entries = &mut self.entries;
        let idx = *self.index.entry(pattern).or_insert_with(|| {
            entries.push(PatternEntry {
                pattern,
                variants: Vec::new(),
                weight: 0.0,
            });
            entries.len() - 1
        });
        let entry = &mut self.entries[idx];
        entry.variants.push(variant);
        entry.weight += weight;
        idx
    }

    pub fn entries(&self) -> &[PatternEntry] {
        &self.entries
    }

    pub fn get(&self, idx: usize) -> &PatternEntry {
        &self.entries[idx]
    }

    pub fn index_of(&self, pattern: &Pattern) -> Option<usize> {
        self.index.get(pattern).copied()
    }

    pub fn patterns(&self) -> Vec<Pattern> {
        self.entries.iter().map(|e| e.pattern).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Symmetric conflict relation over a list of items, stored as bit rows
#[derive(Debug, Clone)]
pub struct ConflictGraph {
    rows: Vec<Vec<u64>>,
}

impl ConflictGraph {
    /// Conflicts among patterns: pairs that cannot both be edges of one tree
    pub fn build(patterns: &[Pattern]) -> Self {
        Self::from_fn(patterns.len(), |i, j| !patterns[i].is_compatible(&patterns[j]))
    }

    /// Build from an arbitrary symmetric predicate, evaluated once per unordered pair
    pub fn from_fn<F: Fn(usize, usize) -> bool>(no_items: usize, conflict: F) -> Self {
        let words = no_items.div_ceil(64);
        let mut rows = vec![vec![0u64; words]; no_items];
        for i in 0..no_items {
            for j in (i + 1)..no_items {
                if conflict(i, j) {
                    rows[i][j / 64] |= 1 << (j % 64);
                    rows[j][i / 64] |= 1 << (i % 64);
                }
            }
        }
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn conflicts(&self, i: usize, j: usize) -> bool {
        self.rows[i][j / 64] & (1 << (j % 64)) != 0
    }

    pub fn neighbors(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.rows[i].iter().enumerate().flat_map(|(w, &word)| {
            (0..64)
                .filter(move |b| word & (1 << b) != 0)
                .map(move |b| w * 64 + b)
        })
    }

    pub fn degree(&self, i: usize) -> usize {
        self.rows[i].iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn conflicting_pairs(&self) -> Vec<(usize, usize)> {
        (0..self.len())
            .flat_map(|i| self.neighbors(i).filter(move |&j| j > i).map(move |j| (i, j)))
            .collect()
    }

    pub fn no_conflicts(&self) -> usize {
        (0..self.len()).map(|i| self.degree(i)).sum::<usize>() / 2
    }
}
