//! Structured solver events and the sinks receiving them

use crate::optimizer::SolveStatus;
use crate::pattern::Pattern;
use crate::solver::{Solver, Summary};
use std::sync::Mutex;
use std::time::Duration;

/// Something noteworthy that happened during inference
#[derive(Debug, Clone, PartialEq)]
pub enum SolverEvent {
    SolveStarted {
        solver: &'static str,
        patterns: usize,
        conflicts: usize,
        clients: usize,
    },
    SolveFinished {
        solver: &'static str,
        status: SolveStatus,
        objective: f64,
        nodes: u64,
        solutions: usize,
        elapsed: Duration,
    },
    ConflictsResolved {
        compatible: usize,
        conflicting: usize,
    },
    Classified {
        false_positives: usize,
        false_negatives: usize,
        false_negative_unknowns: usize,
        residual_conflicts: usize,
    },
    /// Compatible mutations carried by one sample
    SampleMutations {
        sample: usize,
        mutations: Vec<usize>,
    },
    VariantMoved {
        variant: String,
        from: Pattern,
        to: Pattern,
        residual_conflict: bool,
    },
    ReplicateFailed {
        kind: &'static str,
        replicate: usize,
        reason: String,
    },
    BootstrapFinished {
        completed: usize,
        requested: usize,
    },
    /// A configured option the chosen solver does not support
    OptionIgnored {
        option: &'static str,
        reason: &'static str,
    },
    Summarized {
        solver: Solver,
        summary: Summary,
    },
    NoTree {
        reason: String,
    },
}

/// Receiver of solver events; injected into every engine entry point
pub trait EventSink: Send + Sync {
    fn record(&self, event: &SolverEvent);
}

/// Forwards events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: &SolverEvent) {
        match event {
            SolverEvent::SolveStarted {
                solver,
                patterns,
                conflicts,
                clients,
            } => log::info!(
                "{} solver: {} candidate patterns, {} conflicting pairs, {} assignment units",
                solver,
                patterns,
                conflicts,
                clients
            ),
            SolverEvent::SolveFinished {
                solver,
                status,
                objective,
                nodes,
                solutions,
                elapsed,
            } => match status {
                SolveStatus::Optimal => log::info!(
                    "{} solver: optimal objective {:.3} after {} nodes in {:.2?} ({} pooled)",
                    solver,
                    objective,
                    nodes,
                    elapsed,
                    solutions
                ),
                SolveStatus::TimeLimit => log::warn!(
                    "{} solver: time limit reached after {} nodes; \
                     best objective {:.3} is not proven optimal",
                    solver,
                    nodes,
                    objective
                ),
            },
            SolverEvent::ConflictsResolved {
                compatible,
                conflicting,
            } => {
                let total = compatible + conflicting;
                log::info!(
                    "{} of {} present mutations are compatible, {} ({:.1}%) were ignored",
                    compatible,
                    total,
                    conflicting,
                    if total > 0 {
                        *conflicting as f64 / total as f64 * 100.0
                    } else {
                        0.0
                    }
                );
            }
            SolverEvent::Classified {
                false_positives,
                false_negatives,
                false_negative_unknowns,
                residual_conflicts,
            } => log::info!(
                "Putative false-positives {}, false-negatives {}, \
                 false-negative unknowns {}, residual conflicts {}",
                false_positives,
                false_negatives,
                false_negative_unknowns,
                residual_conflicts
            ),
            SolverEvent::SampleMutations { sample, mutations } => log::debug!(
                "Compatible mutations present in sample {}: {}, {:?}",
                sample,
                mutations.len(),
                mutations
            ),
            SolverEvent::VariantMoved {
                variant,
                from,
                to,
                residual_conflict,
            } => log::debug!(
                "Variant {} moved from {} to {}{}",
                variant,
                from,
                to,
                if *residual_conflict { " (residual conflict)" } else { "" }
            ),
            SolverEvent::ReplicateFailed {
                kind,
                replicate,
                reason,
            } => log::warn!("{} replicate {} failed: {}", kind, replicate, reason),
            SolverEvent::BootstrapFinished {
                completed,
                requested,
            } => log::info!("Bootstrap: {} of {} replicates completed", completed, requested),
            SolverEvent::OptionIgnored { option, reason } => {
                log::warn!("Option {} is ignored: {}", option, reason)
            }
            SolverEvent::Summarized { solver, summary } => {
                log::info!(
                    "Median number of mutations per sample: {:.1}",
                    summary.median_mutations_per_sample
                );
                if *solver == Solver::MaxLikelihood {
                    log::info!(
                        "Putative false-positives {:.1e}, false-negatives {:.1e}, \
                         false-negative unknowns {:.1e}, residual conflicts {:.1e}",
                        summary.false_positive_rate(),
                        summary.false_negative_rate(),
                        summary.false_negative_unknown_rate(),
                        summary.residual_conflict_fraction()
                    );
                }
            }
            SolverEvent::NoTree { reason } => log::warn!(
                "Conflicts could not be resolved. No evolutionary tree has been created: {}",
                reason
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SolverEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SolverEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn record(&self, event: &SolverEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
