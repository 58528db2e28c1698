//! Maximum compatible tree: keep the heaviest conflict-free set of observed
//! patterns and ignore the variants of every other pattern

use crate::events::{EventSink, SolverEvent};
use crate::optimizer::{Choice, Client, SelectionProblem, SolveStatus};
use crate::pattern::{CloneSet, ConflictGraph, Pattern, PatternTable};
use crate::tree::Tree;
use crate::{TreeError, TreeResult};
use std::time::{Duration, Instant};

/// Result of the maximum compatible tree search
#[derive(Debug, Clone)]
pub struct SimpleSolution {
    pub patterns: PatternTable,
    /// Indices into `patterns` of the realized patterns
    pub selected: Vec<usize>,
    pub compatible_mutations: Vec<usize>,
    /// Present variants whose pattern was left out of the tree
    pub conflicting_mutations: Vec<usize>,
    pub weight: f64,
    pub status: SolveStatus,
    pub tree: Tree,
}

impl SimpleSolution {
    pub fn is_selected(&self, pattern_idx: usize) -> bool {
        self.selected.binary_search(&pattern_idx).is_ok()
    }
}

/// Select the maximum-weight set of pairwise compatible patterns, where the weight
/// of a pattern is its number of variants. `patterns` holds one pattern per variant.
pub fn find_max_compatible_tree(
    patterns: &[Pattern],
    no_samples: usize,
    time_limit: Option<Duration>,
    sink: &dyn EventSink,
) -> TreeResult<SimpleSolution> {
    let table = PatternTable::from_patterns(patterns);
    let conflicts = ConflictGraph::build(&table.patterns());

    let clients: Vec<Client> = table
        .entries()
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            Client::new(
                vec![Choice {
                    item: idx,
                    score: entry.weight,
                    reassigned: false,
                }],
                0.0,
                true,
            )
        })
        .collect();

    sink.record(&SolverEvent::SolveStarted {
        solver: "simple",
        patterns: table.len(),
        conflicts: conflicts.no_conflicts(),
        clients: clients.len(),
    });

    let start = Instant::now();
    let problem = SelectionProblem::new(conflicts, clients);
    let outcome = problem.solve(time_limit, 1);
    let best = outcome.best().ok_or_else(|| {
        let reason = "no feasible pattern selection within the time limit".to_string();
        sink.record(&SolverEvent::NoTree {
            reason: reason.clone(),
        });
        TreeError::NoSolution(reason)
    })?;

    // extend an interrupted search by every pattern that still fits
    let mut selected = best.realized.clone();
    for idx in 0..table.len() {
        if !selected.contains(&idx)
            && selected.iter().all(|&other| !problem.conflicts().conflicts(idx, other))
        {
            selected.push(idx);
        }
    }
    selected.sort_unstable();

    let weight: f64 = selected.iter().map(|&idx| table.get(idx).weight).sum();
    sink.record(&SolverEvent::SolveFinished {
        solver: "simple",
        status: outcome.status,
        objective: weight,
        nodes: outcome.nodes,
        solutions: outcome.solutions.len(),
        elapsed: start.elapsed(),
    });

    let mut compatible_mutations: Vec<usize> = Vec::new();
    let mut conflicting_mutations: Vec<usize> = Vec::new();
    for (idx, entry) in table.entries().iter().enumerate() {
        if selected.binary_search(&idx).is_ok() {
            compatible_mutations.extend(&entry.variants);
        } else {
            conflicting_mutations.extend(&entry.variants);
        }
    }
    compatible_mutations.sort_unstable();
    conflicting_mutations.sort_unstable();

    sink.record(&SolverEvent::ConflictsResolved {
        compatible: compatible_mutations.len(),
        conflicting: conflicting_mutations.len(),
    });

    let realized = selected
        .iter()
        .map(|&idx| {
            let entry = table.get(idx);
            (CloneSet::from_pattern(&entry.pattern), entry.variants.clone())
        })
        .collect();
    let tree = Tree::build(realized, no_samples)?;

    for sample in 0..no_samples {
        let mutations = compatible_mutations
            .iter()
            .copied()
            .filter(|&v| patterns[v].contains(sample))
            .collect();
        sink.record(&SolverEvent::SampleMutations { sample, mutations });
    }

    Ok(SimpleSolution {
        patterns: table,
        selected,
        compatible_mutations,
        conflicting_mutations,
        weight,
        status: outcome.status,
        tree,
    })
}
