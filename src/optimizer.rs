//! Exact branch-and-bound optimizer for compatible pattern selection.
//!
//! The integer program: one binary decision per item (a candidate tree node),
//! pairwise exclusion of conflicting items, and for every client (a pattern
//! group or a single variant) exactly one choice among its allowed items or its
//! fallback. A choice is only allowed if its item is selected. The objective
//! maximizes the summed client scores minus a penalty per split sample, with
//! ties broken by the number of reassigned clients.
//!
//! The search runs depth-first, including before excluding, and prunes with an
//! upper bound where every client takes its best item that is still available.
//! Optionally the `pool_size` best distinct solutions are kept.

use crate::pattern::ConflictGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// How often (in search nodes) the wall clock is consulted
const CLOCK_INTERVAL: u64 = 256;

/// One allowed assignment of a client
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Choice {
    pub item: usize,
    pub score: f64,
    pub reassigned: bool,
}

/// A unit that must be assigned: a pattern group or a variant
#[derive(Debug, Clone)]
pub struct Client {
    choices: Vec<Choice>,
    fallback: f64,
    fallback_reassigned: bool,
    multiplicity: usize,
}

impl Client {
    /// Choices are ordered by score, then unchanged before reassigned, then item index
    pub fn new(mut choices: Vec<Choice>, fallback: f64, fallback_reassigned: bool) -> Self {
        choices.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.reassigned.cmp(&b.reassigned))
                .then(a.item.cmp(&b.item))
        });
        Self {
            choices,
            fallback,
            fallback_reassigned,
            multiplicity: 1,
        }
    }

    pub fn with_multiplicity(mut self, multiplicity: usize) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn multiplicity(&self) -> usize {
        self.multiplicity
    }

    /// Best choice among available items, or `None` for the fallback
    fn best<F: Fn(usize) -> bool>(&self, available: F) -> (Option<&Choice>, Score) {
        let fallback = Score {
            value: self.fallback,
            reassignments: usize::from(self.fallback_reassigned),
        };
        match self.choices.iter().find(|c| available(c.item)) {
            Some(choice) => {
                let score = Score {
                    value: choice.score,
                    reassignments: usize::from(choice.reassigned),
                };
                if fallback.is_better_than(&score) {
                    (None, fallback)
                } else {
                    (Some(choice), score)
                }
            }
            None => (None, fallback),
        }
    }
}

/// Objective value with the reassignment count as secondary criterion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: f64,
    pub reassignments: usize,
}

impl Score {
    pub const ZERO: Score = Score {
        value: 0.0,
        reassignments: 0,
    };

    fn tolerance(&self, other: &Score) -> f64 {
        1e-9 * (1.0 + self.value.abs().max(other.value.abs()))
    }

    /// Strictly better: higher value, or equal value with fewer reassignments
    pub fn is_better_than(&self, other: &Score) -> bool {
        let tol = self.tolerance(other);
        if self.value > other.value + tol {
            return true;
        }
        (self.value - other.value).abs() <= tol && self.reassignments < other.reassignments
    }

    fn add(&mut self, other: Score, multiplicity: usize) {
        self.value += other.value * multiplicity as f64;
        self.reassignments += other.reassignments * multiplicity;
    }
}

/// Outcome of one solve with respect to proven optimality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Optimal,
    /// Time limit reached; best feasible solution found so far
    TimeLimit,
}

/// A feasible solution of the selection problem
#[derive(Debug, Clone)]
pub struct Selection {
    /// Items that received at least one client, ascending
    pub realized: Vec<usize>,
    /// Chosen item per client, `None` for the fallback
    pub assignment: Vec<Option<usize>>,
    pub score: Score,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Best solution first
    pub solutions: Vec<Selection>,
    pub status: SolveStatus,
    pub nodes: u64,
}

impl SearchOutcome {
    pub fn best(&self) -> Option<&Selection> {
        self.solutions.first()
    }
}

/// Selection problem over items with conflicts and clients
#[derive(Debug, Clone)]
pub struct SelectionProblem {
    conflicts: ConflictGraph,
    split_masks: Vec<u64>,
    split_penalty: f64,
    clients: Vec<Client>,
}

impl SelectionProblem {
    pub fn new(conflicts: ConflictGraph, clients: Vec<Client>) -> Self {
        let no_items = conflicts.len();
        Self {
            conflicts,
            split_masks: vec![0; no_items],
            split_penalty: 0.0,
            clients,
        }
    }

    /// Samples split into subclones by each item, and the cost per split sample
    pub fn with_splits(mut self, split_masks: Vec<u64>, split_penalty: f64) -> Self {
        assert_eq!(split_masks.len(), self.conflicts.len());
        self.split_masks = split_masks;
        self.split_penalty = split_penalty;
        self
    }

    pub fn no_items(&self) -> usize {
        self.conflicts.len()
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn conflicts(&self) -> &ConflictGraph {
        &self.conflicts
    }

    /// Search for the `pool_size` best solutions (at least one)
    pub fn solve(&self, time_limit: Option<Duration>, pool_size: usize) -> SearchOutcome {
        let order = self.search_order();
        let mut position = vec![0; order.len()];
        for (pos, &item) in order.iter().enumerate() {
            position[item] = pos;
        }

        let mut search = Search {
            problem: self,
            order,
            position,
            included: vec![false; self.no_items()],
            blocked: vec![0; self.no_items()],
            split_counts: [0; 64],
            pool: Pool::new(pool_size.max(1)),
            start: Instant::now(),
            time_limit,
            nodes: 0,
            timed_out: false,
        };
        search.descend(0);

        SearchOutcome {
            status: if search.timed_out {
                SolveStatus::TimeLimit
            } else {
                SolveStatus::Optimal
            },
            nodes: search.nodes,
            solutions: search.pool.solutions,
        }
    }

    /// Items ordered by how much they can gain, then fewest conflicts, then index
    fn search_order(&self) -> Vec<usize> {
        let mut gain = vec![0.0f64; self.no_items()];
        for client in &self.clients {
            for choice in &client.choices {
                let delta = choice.score - client.fallback;
                if delta > 0.0 {
                    gain[choice.item] += delta * client.multiplicity as f64;
                }
            }
        }
        let mut order: Vec<usize> = (0..self.no_items()).collect();
        order.sort_by(|&a, &b| {
            gain[b]
                .total_cmp(&gain[a])
                .then(self.conflicts.degree(a).cmp(&self.conflicts.degree(b)))
                .then(a.cmp(&b))
        });
        order
    }
}

struct Pool {
    capacity: usize,
    solutions: Vec<Selection>,
    keys: HashSet<Vec<usize>>,
}

impl Pool {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            solutions: Vec::new(),
            keys: HashSet::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.solutions.len() >= self.capacity
    }

    fn worst(&self) -> Option<&Score> {
        self.solutions.last().map(|s| &s.score)
    }

    fn offer(&mut self, selection: Selection) {
        if self.keys.contains(&selection.realized) {
            // the same tree reached with extra unused items scores identically
            return;
        }
        if self.is_full() {
            match self.worst() {
                Some(worst) if selection.score.is_better_than(worst) => {
                    if let Some(dropped) = self.solutions.pop() {
                        self.keys.remove(&dropped.realized);
                    }
                }
                _ => return,
            }
        }
        let at = self
            .solutions
            .iter()
            .position(|s| selection.score.is_better_than(&s.score))
            .unwrap_or(self.solutions.len());
        self.keys.insert(selection.realized.clone());
        self.solutions.insert(at, selection);
    }
}

struct Search<'a> {
    problem: &'a SelectionProblem,
    order: Vec<usize>,
    position: Vec<usize>,
    included: Vec<bool>,
    blocked: Vec<u32>,
    split_counts: [u32; 64],
    pool: Pool,
    start: Instant,
    time_limit: Option<Duration>,
    nodes: u64,
    timed_out: bool,
}

impl Search<'_> {
    fn descend(&mut self, depth: usize) {
        self.nodes += 1;
        if self.nodes % CLOCK_INTERVAL == 0 && !self.pool.solutions.is_empty() {
            if let Some(limit) = self.time_limit {
                if self.start.elapsed() >= limit {
                    self.timed_out = true;
                }
            }
        }
        if self.timed_out {
            return;
        }

        if self.pool.is_full() {
            let bound = self.bound(depth);
            if let Some(worst) = self.pool.worst() {
                if !bound.is_better_than(worst) {
                    return;
                }
            }
        }

        if depth == self.order.len() {
            let selection = self.evaluate();
            self.pool.offer(selection);
            return;
        }

        let item = self.order[depth];
        if self.blocked[item] == 0 {
            self.include(item);
            self.descend(depth + 1);
            self.remove(item);
            if self.timed_out {
                return;
            }
        }
        self.descend(depth + 1);
    }

    fn include(&mut self, item: usize) {
        self.included[item] = true;
        for other in self.problem.conflicts.neighbors(item) {
            self.blocked[other] += 1;
        }
        let mask = self.problem.split_masks[item];
        for (s, count) in self.split_counts.iter_mut().enumerate() {
            if mask & (1 << s) != 0 {
                *count += 1;
            }
        }
    }

    fn remove(&mut self, item: usize) {
        self.included[item] = false;
        for other in self.problem.conflicts.neighbors(item) {
            self.blocked[other] -= 1;
        }
        let mask = self.problem.split_masks[item];
        for (s, count) in self.split_counts.iter_mut().enumerate() {
            if mask & (1 << s) != 0 {
                *count -= 1;
            }
        }
    }

    fn split_penalty(&self) -> f64 {
        let split = self.split_counts.iter().filter(|&&c| c > 0).count();
        self.problem.split_penalty * split as f64
    }

    /// No leaf below `depth` can score better than this
    fn bound(&self, depth: usize) -> Score {
        let available = |item: usize| {
            self.included[item] || (self.position[item] >= depth && self.blocked[item] == 0)
        };
        let mut total = Score::ZERO;
        for client in &self.problem.clients {
            let (_, score) = client.best(&available);
            total.add(score, client.multiplicity);
        }
        total.value -= self.split_penalty();
        total
    }

    fn evaluate(&self) -> Selection {
        let mut total = Score::ZERO;
        let mut assignment = Vec::with_capacity(self.problem.clients.len());
        let mut used = vec![false; self.problem.no_items()];
        for client in &self.problem.clients {
            let (choice, score) = client.best(|item| self.included[item]);
            total.add(score, client.multiplicity);
            let item = choice.map(|c| c.item);
            if let Some(item) = item {
                used[item] = true;
            }
            assignment.push(item);
        }

        let realized: Vec<usize> = (0..used.len()).filter(|&i| used[i]).collect();
        let splits = realized
            .iter()
            .fold(0u64, |mask, &item| mask | self.problem.split_masks[item]);
        total.value -= self.problem.split_penalty * splits.count_ones() as f64;

        Selection {
            realized,
            assignment,
            score: total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;

    fn single(item: usize, score: f64) -> Client {
        Client::new(
            vec![Choice {
                item,
                score,
                reassigned: false,
            }],
            0.0,
            true,
        )
    }

    #[test]
    fn test_max_weight_compatible_selection() {
        // {1,2} weight 3, {2,3} weight 2, {3} weight 1
        let patterns = vec![
            Pattern::from_samples([0, 1]),
            Pattern::from_samples([1, 2]),
            Pattern::from_samples([2]),
        ];
        let problem = SelectionProblem::new(
            ConflictGraph::build(&patterns),
            vec![single(0, 3.0), single(1, 2.0), single(2, 1.0)],
        );
        let outcome = problem.solve(None, 1);
        let best = outcome.best().unwrap();

        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(best.realized, vec![0, 2]);
        assert_eq!(best.assignment, vec![Some(0), None, Some(2)]);
        assert_eq!(best.score.value, 4.0);
    }

    #[test]
    fn test_pool_enumerates_distinct_solutions() {
        let patterns = vec![Pattern::from_samples([0, 1]), Pattern::from_samples([1, 2])];
        let problem = SelectionProblem::new(
            ConflictGraph::build(&patterns),
            vec![single(0, 3.0), single(1, 2.0)],
        );
        let outcome = problem.solve(None, 5);

        assert_eq!(outcome.solutions.len(), 3);
        assert_eq!(outcome.solutions[0].realized, vec![0]);
        assert_eq!(outcome.solutions[1].realized, vec![1]);
        assert!(outcome.solutions[2].realized.is_empty());
    }

    #[test]
    fn test_reassignment_tie_break() {
        // both choices score equally; the unchanged one must win
        let patterns = vec![Pattern::from_samples([0]), Pattern::from_samples([0, 1])];
        let client = Client::new(
            vec![
                Choice {
                    item: 0,
                    score: -1.0,
                    reassigned: true,
                },
                Choice {
                    item: 1,
                    score: -1.0,
                    reassigned: false,
                },
            ],
            -10.0,
            true,
        );
        let problem = SelectionProblem::new(ConflictGraph::build(&patterns), vec![client]);
        let best = problem.solve(None, 1).solutions.remove(0);
        assert_eq!(best.realized, vec![1]);
        assert_eq!(best.score.reassignments, 0);
    }

    #[test]
    fn test_split_penalty_applied() {
        let problem =
            SelectionProblem::new(ConflictGraph::from_fn(1, |_, _| false), vec![single(0, 2.0)])
                .with_splits(vec![0b1], 5.0);
        let best = problem.solve(None, 1).solutions.remove(0);
        // using the item gains 2 but costs 5
        assert!(best.realized.is_empty());
        assert_eq!(best.score.value, 0.0);
    }

    #[test]
    fn test_multiplicity_weights_clients() {
        let patterns = vec![Pattern::from_samples([0, 1]), Pattern::from_samples([1, 2])];
        let problem = SelectionProblem::new(
            ConflictGraph::build(&patterns),
            vec![single(0, 1.0), single(1, 1.0).with_multiplicity(3)],
        );
        let best = problem.solve(None, 1).solutions.remove(0);
        assert_eq!(best.realized, vec![1]);
        assert_eq!(best.score.value, 3.0);
    }

    #[test]
    fn test_zero_time_limit_still_feasible() {
        let patterns: Vec<Pattern> = (1..40u64).map(Pattern::from_bits).collect();
        let clients = (0..patterns.len()).map(|i| single(i, 1.0 + i as f64)).collect();
        let problem = SelectionProblem::new(ConflictGraph::build(&patterns), clients);
        let outcome = problem.solve(Some(Duration::ZERO), 1);
        assert!(outcome.best().is_some());
    }

    #[test]
    fn test_time_limit_flagged() {
        // without pruning from a full pool every subset of 20 free items is a leaf
        let clients = (0..20).map(|i| single(i, 1.0)).collect();
        let problem = SelectionProblem::new(ConflictGraph::from_fn(20, |_, _| false), clients);
        let outcome = problem.solve(Some(Duration::ZERO), 100_000);

        assert_eq!(outcome.status, SolveStatus::TimeLimit);
        assert!(outcome.nodes >= CLOCK_INTERVAL);
        assert!(outcome.nodes < 1 << 21);
        let best = outcome.best().unwrap();
        assert_eq!(best.realized.len(), 20);
        assert_eq!(best.score.value, 20.0);

        let small = SelectionProblem::new(
            ConflictGraph::from_fn(3, |_, _| false),
            (0..3).map(|i| single(i, 1.0)).collect(),
        );
        assert_eq!(small.solve(Some(Duration::ZERO), 1).status, SolveStatus::Optimal);
    }

    #[test]
    fn test_empty_problem() {
        let problem = SelectionProblem::new(ConflictGraph::from_fn(0, |_, _| false), Vec::new());
        let outcome = problem.solve(None, 1);
        assert_eq!(outcome.solutions.len(), 1);
        assert!(outcome.solutions[0].realized.is_empty());
    }
}
