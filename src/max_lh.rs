//! Maximum-likelihood tree: variants may move to one of their most likely
//! alternative patterns when this resolves conflicts at a lower total cost than
//! discarding variants

use crate::events::{EventSink, SolverEvent};
use crate::likelihood::{compute_likelihoods, CandidatePattern, Classification, VariantLikelihood};
use crate::optimizer::{Choice, Client, Selection, SelectionProblem, SolveStatus};
use crate::pattern::{CloneSet, Pattern};
use crate::subclone::{candidate_nodes, node_conflicts, CandidateNode};
use crate::tree::{Tree, FOUNDER};
use crate::{Dataset, InferenceConfig, TreeError, TreeResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

const SOLVER_NAME: &str = "max-likelihood";

/// Final placement of one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantAssignment {
    pub variant: usize,
    /// Most likely pattern given the evidence alone
    pub ml_pattern: Pattern,
    pub assigned: Pattern,
    /// Tree node on whose incoming edge the variant is acquired
    pub node: Option<usize>,
    pub log_likelihood: f64,
    pub classification: Vec<Classification>,
    /// Left off the tree only because none of its candidate patterns fit
    pub residual_conflict: bool,
}

impl VariantAssignment {
    pub fn is_reassigned(&self) -> bool {
        self.assigned != self.ml_pattern
    }
}

#[derive(Debug, Clone)]
pub struct MaxLhSolution {
    pub tree: Tree,
    pub assignments: Vec<VariantAssignment>,
    pub status: SolveStatus,
    /// Total log-likelihood of the assignment minus the subclone split penalties
    pub log_likelihood: f64,
    /// Node sets of every tree in the solution pool, best first
    pub pool: Vec<Vec<CloneSet>>,
}

impl MaxLhSolution {
    pub fn count(&self, class: Classification) -> usize {
        self.assignments
            .iter()
            .flat_map(|a| &a.classification)
            .filter(|&&c| c == class)
            .count()
    }

    pub fn residual_conflicts(&self) -> usize {
        self.assignments.iter().filter(|a| a.residual_conflict).count()
    }

    pub fn placed_variants(&self) -> usize {
        self.assignments.iter().filter(|a| a.node.is_some()).count()
    }
}

/// Variants sharing identical candidates, solved as one client
#[derive(Debug, Clone)]
struct ClientGroup {
    variants: Vec<usize>,
    multiplicity: usize,
}

struct Formulation {
    nodes: Vec<CandidateNode>,
    groups: Vec<ClientGroup>,
    problem: SelectionProblem,
}

impl Formulation {
    /// Realized node sets with the variants acquired on them
    fn realize(&self, selection: &Selection) -> Vec<(CloneSet, Vec<usize>)> {
        let mut acquired: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (group, item) in self.groups.iter().zip(&selection.assignment) {
            if let Some(item) = item {
                acquired.entry(*item).or_default().extend(&group.variants);
            }
        }
        acquired
            .into_iter()
            .map(|(item, variants)| (self.nodes[item].set, variants))
            .collect()
    }
}

/// Likelihood data of a dataset, ready to be solved repeatedly
pub struct MaxLhPhylogeny<'a> {
    dataset: &'a Dataset,
    config: &'a InferenceConfig,
    likelihoods: Vec<VariantLikelihood>,
    ml_patterns: Vec<Pattern>,
    absent_log_likelihoods: Vec<f64>,
    candidates: Vec<Vec<CandidatePattern>>,
}

impl<'a> MaxLhPhylogeny<'a> {
    pub fn new(dataset: &'a Dataset, config: &'a InferenceConfig) -> Self {
        let likelihoods = compute_likelihoods(dataset, config);
        let ml_patterns = likelihoods.iter().map(|l| l.max_likelihood_pattern()).collect();
        let absent_log_likelihoods = likelihoods
            .iter()
            .map(|l| l.pattern_log_likelihood(&Pattern::ABSENT))
            .collect();
        let candidates = likelihoods
            .par_iter()
            .map(|l| l.candidate_patterns(config.max_no_mps, config.candidate_log_gap))
            .collect();

        Self {
            dataset,
            config,
            likelihoods,
            ml_patterns,
            absent_log_likelihoods,
            candidates,
        }
    }

    pub fn dataset(&self) -> &Dataset {
        self.dataset
    }

    pub fn config(&self) -> &InferenceConfig {
        self.config
    }

    pub fn likelihoods(&self) -> &[VariantLikelihood] {
        &self.likelihoods
    }

    pub fn ml_patterns(&self) -> &[Pattern] {
        &self.ml_patterns
    }

    fn check_feasible(&self, sink: &dyn EventSink) -> TreeResult<()> {
        if self.config.max_no_mps == Some(0) {
            let reason = "no candidate pattern is allowed per variant (max_no_mps = 0)".to_string();
            sink.record(&SolverEvent::NoTree {
                reason: reason.clone(),
            });
            return Err(TreeError::Infeasible(reason));
        }
        Ok(())
    }

    fn group_key(&self, variant: usize) -> Vec<u64> {
        std::iter::once(self.absent_log_likelihoods[variant].to_bits())
            .chain(
                self.candidates[variant]
                    .iter()
                    .flat_map(|c| [c.pattern.bits(), c.log_likelihood.to_bits()]),
            )
            .collect()
    }

    /// Build the selection problem for variants drawn `count` times each
    fn formulate(&self, counts: &[(usize, usize)]) -> Formulation {
        let mut groups: Vec<ClientGroup> = Vec::new();
        let mut index: HashMap<Vec<u64>, usize> = HashMap::new();
        for &(variant, count) in counts {
            // variants most likely absent everywhere stay off the tree
            if count == 0 || self.ml_patterns[variant].is_absent() {
                continue;
            }
            let key = self.group_key(variant);
            match index.get(&key) {
                Some(&g) => {
                    groups[g].variants.push(variant);
                    groups[g].multiplicity += count;
                }
                None => {
                    index.insert(key, groups.len());
                    groups.push(ClientGroup {
                        variants: vec![variant],
                        multiplicity: count,
                    });
                }
            }
        }

        let mut universe = Vec::new();
        let mut seen = HashSet::new();
        for group in &groups {
            for candidate in &self.candidates[group.variants[0]] {
                if !candidate.pattern.is_absent() && seen.insert(candidate.pattern) {
                    universe.push(candidate.pattern);
                }
            }
        }

        let nodes = candidate_nodes(
            &universe,
            self.dataset.no_samples(),
            self.config.subclone_detection,
        );
        let mut by_pattern: HashMap<Pattern, Vec<usize>> = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            by_pattern.entry(node.pattern).or_default().push(idx);
        }

        let clients = groups
            .iter()
            .map(|group| {
                let representative = group.variants[0];
                let ml = self.ml_patterns[representative];
                let choices = self.candidates[representative]
                    .iter()
                    .filter(|c| !c.pattern.is_absent())
                    .flat_map(|c| {
                        by_pattern
                            .get(&c.pattern)
                            .into_iter()
                            .flatten()
                            .map(move |&item| Choice {
                                item,
                                score: c.log_likelihood,
                                reassigned: c.pattern != ml,
                            })
                    })
                    .collect();
                Client::new(choices, self.absent_log_likelihoods[representative], true)
                    .with_multiplicity(group.multiplicity)
            })
            .collect();

        let mut problem = SelectionProblem::new(node_conflicts(&nodes), clients);
        if self.config.subclone_detection {
            let masks = nodes.iter().map(|n| n.split.bits()).collect();
            problem = problem.with_splits(masks, self.config.subclone_split_penalty);
        }

        Formulation {
            nodes,
            groups,
            problem,
        }
    }

    /// Log-likelihood of the variants that are no clients of the problem
    fn excluded_log_likelihood(&self, counts: &[(usize, usize)]) -> f64 {
        counts
            .iter()
            .filter(|&&(v, _)| self.ml_patterns[v].is_absent())
            .map(|&(v, count)| self.absent_log_likelihoods[v] * count as f64)
            .sum()
    }

    fn assignment(
        &self,
        variant: usize,
        item: Option<usize>,
        nodes: &[CandidateNode],
        tree: &Tree,
    ) -> VariantAssignment {
        let likelihood = &self.likelihoods[variant];
        let ml_pattern = self.ml_patterns[variant];
        let (assigned, node) = match item {
            Some(item) => (nodes[item].pattern, tree.find(&nodes[item].set)),
            None => (Pattern::ABSENT, None),
        };
        let residual_conflict = item.is_none()
            && !ml_pattern.is_absent()
            && !self.candidates[variant].iter().any(|c| c.pattern.is_absent());

        // calls of unplaced variants are neither confirmed nor refuted
        let classification = if residual_conflict {
            likelihood.classify_unresolved()
        } else {
            likelihood.classify(&assigned)
        };

        VariantAssignment {
            variant,
            ml_pattern,
            assigned,
            node,
            log_likelihood: likelihood.pattern_log_likelihood(&assigned),
            classification,
            residual_conflict,
        }
    }

    /// Solve for all variants of the dataset
    pub fn infer(&self, sink: &dyn EventSink) -> TreeResult<MaxLhSolution> {
        self.check_feasible(sink)?;

        let no_variants = self.dataset.no_variants();
        let no_samples = self.dataset.no_samples();
        let counts: Vec<(usize, usize)> = (0..no_variants).map(|v| (v, 1)).collect();
        let formulation = self.formulate(&counts);

        sink.record(&SolverEvent::SolveStarted {
            solver: SOLVER_NAME,
            patterns: formulation.nodes.len(),
            conflicts: formulation.problem.conflicts().no_conflicts(),
            clients: formulation.groups.len(),
        });

        let start = Instant::now();
        let outcome = formulation
            .problem
            .solve(Some(self.config.time_limit), self.config.pool_size.max(1));
        let best = outcome.best().ok_or_else(|| {
            let reason = "no feasible assignment within the time limit".to_string();
            sink.record(&SolverEvent::NoTree {
                reason: reason.clone(),
            });
            TreeError::NoSolution(reason)
        })?;

        let log_likelihood = best.score.value + self.excluded_log_likelihood(&counts);
        sink.record(&SolverEvent::SolveFinished {
            solver: SOLVER_NAME,
            status: outcome.status,
            objective: log_likelihood,
            nodes: outcome.nodes,
            solutions: outcome.solutions.len(),
            elapsed: start.elapsed(),
        });

        let tree = Tree::build(formulation.realize(best), no_samples)?;

        let mut items = vec![None; no_variants];
        for (group, item) in formulation.groups.iter().zip(&best.assignment) {
            for &variant in &group.variants {
                items[variant] = *item;
            }
        }
        let assignments: Vec<VariantAssignment> = (0..no_variants)
            .map(|v| self.assignment(v, items[v], &formulation.nodes, &tree))
            .collect();

        for a in assignments.iter().filter(|a| a.is_reassigned()) {
            sink.record(&SolverEvent::VariantMoved {
                variant: self.dataset.variants()[a.variant].to_string(),
                from: a.ml_pattern,
                to: a.assigned,
                residual_conflict: a.residual_conflict,
            });
        }

        let pool = if self.config.pool_size > 0 {
            outcome
                .solutions
                .iter()
                .map(|s| Tree::build(formulation.realize(s), no_samples).map(|t| node_sets(&t)))
                .collect::<TreeResult<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let solution = MaxLhSolution {
            tree,
            assignments,
            status: outcome.status,
            log_likelihood,
            pool,
        };

        sink.record(&SolverEvent::Classified {
            false_positives: solution.count(Classification::FalsePositive),
            false_negatives: solution.count(Classification::FalseNegative),
            false_negative_unknowns: solution.count(Classification::FalseNegativeUnknown),
            residual_conflicts: solution.residual_conflicts(),
        });

        Ok(solution)
    }

    /// Solve for a resampled variant multiset given as (variant, draws) pairs
    pub fn solve_replicate(&self, counts: &[(usize, usize)]) -> TreeResult<(SolveStatus, Tree)> {
        if self.config.max_no_mps == Some(0) {
            return Err(TreeError::Infeasible("max_no_mps is 0".to_string()));
        }
        let formulation = self.formulate(counts);
        let outcome = formulation.problem.solve(Some(self.config.time_limit), 1);
        let best = outcome
            .best()
            .ok_or_else(|| TreeError::NoSolution("no feasible assignment".to_string()))?;
        let tree = Tree::build(formulation.realize(best), self.dataset.no_samples())?;
        Ok((outcome.status, tree))
    }
}

/// Sets of all nodes below the germline root
pub fn node_sets(tree: &Tree) -> Vec<CloneSet> {
    tree.nodes().iter().skip(FOUNDER).map(|n| n.set).collect()
}
