//! Solver strategies and the combined inference result

use crate::confidence::{estimate, ConfidenceReport};
use crate::events::{EventSink, SolverEvent};
use crate::likelihood::{compute_likelihoods, Classification};
use crate::max_lh::{MaxLhPhylogeny, VariantAssignment};
use crate::optimizer::SolveStatus;
use crate::pattern::Pattern;
use crate::simple::find_max_compatible_tree;
use crate::tree::Tree;
use crate::{validate_config, Dataset, InferenceConfig, TreeError, TreeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How conflicting patterns are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Solver {
    /// Keep the heaviest compatible set of observed patterns, ignore the rest
    Simple,
    /// Reassign variants to likely alternative patterns, maximizing the likelihood
    MaxLikelihood,
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Solver::Simple => write!(f, "simple"),
            Solver::MaxLikelihood => write!(f, "max-likelihood"),
        }
    }
}

impl FromStr for Solver {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" | "maxcompatible" | "max-compatible" => Ok(Solver::Simple),
            "maxlh" | "max-lh" | "ml" | "max-likelihood" => Ok(Solver::MaxLikelihood),
            other => Err(TreeError::InvalidConfig(format!("unknown solver: {}", other))),
        }
    }
}

/// Headline numbers of an inference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub samples: usize,
    /// Variants observed in at least one sample
    pub present_variants: usize,
    pub compatible_variants: usize,
    pub conflicting_variants: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub false_negative_unknowns: usize,
    pub residual_conflicts: usize,
    pub median_mutations_per_sample: f64,
}

impl Summary {
    fn fraction(count: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            count as f64 / total as f64
        }
    }

    pub fn excluded_fraction(&self) -> f64 {
        Self::fraction(self.conflicting_variants, self.present_variants)
    }

    /// Relative to all (sample, present variant) pairs
    pub fn false_positive_rate(&self) -> f64 {
        Self::fraction(self.false_positives, self.samples * self.present_variants)
    }

    pub fn false_negative_rate(&self) -> f64 {
        Self::fraction(self.false_negatives, self.samples * self.present_variants)
    }

    pub fn false_negative_unknown_rate(&self) -> f64 {
        Self::fraction(self.false_negative_unknowns, self.samples * self.present_variants)
    }

    pub fn residual_conflict_fraction(&self) -> f64 {
        Self::fraction(self.residual_conflicts, self.present_variants)
    }
}

/// Everything an inference hands to its consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inference {
    pub solver: Solver,
    pub status: SolveStatus,
    /// Total weight (simple) or total log-likelihood (max-likelihood)
    pub objective: f64,
    pub tree: Tree,
    pub summary: Summary,
    /// Per-variant placement; only filled by the max-likelihood solver
    pub assignments: Vec<VariantAssignment>,
    /// Variants left off the tree
    pub conflicting: Vec<usize>,
    pub confidence: Option<ConfidenceReport>,
}

impl Solver {
    pub fn infer(
        &self,
        dataset: &Dataset,
        config: &InferenceConfig,
        sink: &dyn EventSink,
    ) -> TreeResult<Inference> {
        validate_config(config)?;
        match self {
            Solver::Simple => infer_simple(dataset, config, sink),
            Solver::MaxLikelihood => infer_max_lh(dataset, config, sink),
        }
    }
}

fn infer_simple(
    dataset: &Dataset,
    config: &InferenceConfig,
    sink: &dyn EventSink,
) -> TreeResult<Inference> {
    if config.subclone_detection {
        sink.record(&SolverEvent::OptionIgnored {
            option: "subclone_detection",
            reason: "subclones are only detected by the max-likelihood solver",
        });
    }
    if config.pool_size > 0 || config.no_bootstrap_samples > 0 {
        sink.record(&SolverEvent::OptionIgnored {
            option: "confidence estimation",
            reason: "edge support is only estimated by the max-likelihood solver",
        });
    }

    let patterns: Vec<Pattern> = compute_likelihoods(dataset, config)
        .iter()
        .map(|l| l.observed_pattern())
        .collect();
    let solution = find_max_compatible_tree(
        &patterns,
        dataset.no_samples(),
        Some(config.time_limit),
        sink,
    )?;

    let present_variants = patterns.iter().filter(|p| !p.is_absent()).count();
    let summary = Summary {
        samples: dataset.no_samples(),
        present_variants,
        compatible_variants: solution.compatible_mutations.len(),
        conflicting_variants: solution.conflicting_mutations.len(),
        median_mutations_per_sample: solution.tree.median_mutations_per_sample(),
        ..Summary::default()
    };
    sink.record(&SolverEvent::Summarized {
        solver: Solver::Simple,
        summary: summary.clone(),
    });

    Ok(Inference {
        solver: Solver::Simple,
        status: solution.status,
        objective: solution.weight,
        tree: solution.tree,
        summary,
        assignments: Vec::new(),
        conflicting: solution.conflicting_mutations,
        confidence: None,
    })
}

fn infer_max_lh(
    dataset: &Dataset,
    config: &InferenceConfig,
    sink: &dyn EventSink,
) -> TreeResult<Inference> {
    let phylogeny = MaxLhPhylogeny::new(dataset, config);
    let solution = phylogeny.infer(sink)?;

    let confidence = if config.pool_size > 0 || config.no_bootstrap_samples > 0 {
        Some(estimate(&solution.tree, &solution.pool, &phylogeny, sink)?)
    } else {
        None
    };

    let present_variants = solution
        .assignments
        .iter()
        .filter(|a| {
            a.classification
                .iter()
                .any(|c| {
                    matches!(
                        c,
                        Classification::TruePositive
                            | Classification::FalsePositive
                            | Classification::Unresolved
                    )
                })
        })
        .count();
    let conflicting: Vec<usize> = solution
        .assignments
        .iter()
        .filter(|a| a.node.is_none() && !a.ml_pattern.is_absent())
        .map(|a| a.variant)
        .collect();

    let summary = Summary {
        samples: dataset.no_samples(),
        present_variants,
        compatible_variants: solution.placed_variants(),
        conflicting_variants: conflicting.len(),
        false_positives: solution.count(Classification::FalsePositive),
        false_negatives: solution.count(Classification::FalseNegative),
        false_negative_unknowns: solution.count(Classification::FalseNegativeUnknown),
        residual_conflicts: solution.residual_conflicts(),
        median_mutations_per_sample: solution.tree.median_mutations_per_sample(),
    };
    sink.record(&SolverEvent::Summarized {
        solver: Solver::MaxLikelihood,
        summary: summary.clone(),
    });

    Ok(Inference {
        solver: Solver::MaxLikelihood,
        status: solution.status,
        objective: solution.log_likelihood,
        tree: solution.tree,
        summary,
        assignments: solution.assignments,
        conflicting,
        confidence,
    })
}
