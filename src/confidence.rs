//! Edge support from the solution pool and from bootstrap replicates

use crate::events::{EventSink, SolverEvent};
use crate::max_lh::{node_sets, MaxLhPhylogeny};
use crate::optimizer::SolveStatus;
use crate::pattern::CloneSet;
use crate::tree::{Tree, FOUNDER};
use crate::{TreeError, TreeResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::mpsc;

/// Support of the edge into one node of the primary tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSupport {
    pub node: usize,
    pub set: CloneSet,
    pub pool_support: Option<f64>,
    pub bootstrap_support: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateFailure {
    pub replicate: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub edges: Vec<EdgeSupport>,
    pub pool_solutions: usize,
    pub bootstrap_completed: usize,
    pub bootstrap_failures: Vec<ReplicateFailure>,
}

impl ConfidenceReport {
    pub fn support(&self, node: usize) -> Option<&EdgeSupport> {
        self.edges.iter().find(|e| e.node == node)
    }
}

/// Fraction of runs containing each node of `tree` below the germline root.
/// `None` when there are no runs.
pub fn support_frequencies(tree: &Tree, runs: &[HashSet<CloneSet>]) -> Vec<Option<f64>> {
    tree.nodes()
        .iter()
        .skip(FOUNDER)
        .map(|node| {
            if runs.is_empty() {
                None
            } else {
                let hits = runs.iter().filter(|run| run.contains(&node.set)).count();
                Some(hits as f64 / runs.len() as f64)
            }
        })
        .collect()
}

/// Variants drawn with replacement, as (variant, draws) pairs
fn resample(no_variants: usize, rng: &mut StdRng) -> Vec<(usize, usize)> {
    let mut draws: BTreeMap<usize, usize> = BTreeMap::new();
    for _ in 0..no_variants {
        *draws.entry(rng.gen_range(0..no_variants)).or_default() += 1;
    }
    draws.into_iter().collect()
}

fn run_replicate(
    phylogeny: &MaxLhPhylogeny,
    replicate: usize,
) -> Result<HashSet<CloneSet>, String> {
    let seed = phylogeny.config().seed.wrapping_add(replicate as u64);
    let mut rng = StdRng::seed_from_u64(seed);
    let counts = resample(phylogeny.dataset().no_variants(), &mut rng);
    match phylogeny.solve_replicate(&counts) {
        Ok((SolveStatus::Optimal, tree)) => Ok(node_sets(&tree).into_iter().collect()),
        Ok((SolveStatus::TimeLimit, _)) => Err("time limit reached before optimality".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

type Replicates = (Vec<HashSet<CloneSet>>, Vec<ReplicateFailure>);

/// Run independent replicate tasks on a pool of `threads` workers. Results arrive
/// over a channel; failed replicates are reported to `sink` and kept apart from the
/// completed runs.
fn run_replicates<F>(
    kind: &'static str,
    no_replicates: usize,
    threads: usize,
    sink: &dyn EventSink,
    task: F,
) -> TreeResult<Replicates>
where
    F: Fn(usize) -> Result<HashSet<CloneSet>, String> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| TreeError::InvalidConfig(format!("cannot build worker pool: {}", e)))?;

    let task = &task;
    let (tx, rx) = mpsc::channel();
    pool.scope(|scope| {
        for replicate in 0..no_replicates {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let result = task(replicate);
                // the receiver outlives the scope
                let _ = tx.send((replicate, result));
            });
        }
    });
    drop(tx);

    let mut results: Vec<_> = rx.into_iter().collect();
    results.sort_by_key(|(replicate, _)| *replicate);

    let mut runs = Vec::new();
    let mut failures = Vec::new();
    for (replicate, result) in results {
        match result {
            Ok(sets) => runs.push(sets),
            Err(reason) => {
                sink.record(&SolverEvent::ReplicateFailed {
                    kind,
                    replicate,
                    reason: reason.clone(),
                });
                failures.push(ReplicateFailure { replicate, reason });
            }
        }
    }

    Ok((runs, failures))
}

/// Solve every bootstrap replicate on a pool of `threads` workers
pub fn bootstrap(phylogeny: &MaxLhPhylogeny, sink: &dyn EventSink) -> TreeResult<Replicates> {
    let config = phylogeny.config();
    let (runs, failures) = run_replicates(
        "bootstrap",
        config.no_bootstrap_samples,
        config.threads,
        sink,
        |replicate| run_replicate(phylogeny, replicate),
    )?;
    sink.record(&SolverEvent::BootstrapFinished {
        completed: runs.len(),
        requested: config.no_bootstrap_samples,
    });
    Ok((runs, failures))
}

/// Annotate the edges of `tree` with pool and bootstrap support
pub fn estimate(
    tree: &Tree,
    pool: &[Vec<CloneSet>],
    phylogeny: &MaxLhPhylogeny,
    sink: &dyn EventSink,
) -> TreeResult<ConfidenceReport> {
    let pool_runs: Vec<HashSet<CloneSet>> = pool
        .iter()
        .map(|sets| sets.iter().copied().collect())
        .collect();

    let (bootstrap_runs, bootstrap_failures) = if phylogeny.config().no_bootstrap_samples > 0 {
        bootstrap(phylogeny, sink)?
    } else {
        (Vec::new(), Vec::new())
    };

    let pool_support = support_frequencies(tree, &pool_runs);
    let bootstrap_support = support_frequencies(tree, &bootstrap_runs);
    let edges = (FOUNDER..tree.len())
        .zip(pool_support.into_iter().zip(bootstrap_support))
        .map(|(node, (pool_support, bootstrap_support))| EdgeSupport {
            node,
            set: tree.node(node).set,
            pool_support,
            bootstrap_support,
        })
        .collect();

    Ok(ConfidenceReport {
        edges,
        pool_solutions: pool_runs.len(),
        bootstrap_completed: bootstrap_runs.len(),
        bootstrap_failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::pattern::Pattern;
    use crate::{Dataset, Evidence, InferenceConfig, Variant};

    fn set(samples: &[usize]) -> CloneSet {
        CloneSet::from_pattern(&Pattern::from_samples(samples.iter().copied()))
    }

    fn strong(present: &[bool]) -> Vec<Evidence> {
        present
            .iter()
            .map(|&p| Evidence::Reads {
                alt: if p { 30 } else { 0 },
                depth: 100,
            })
            .collect()
    }

    fn dataset(rows: Vec<Vec<Evidence>>) -> Dataset {
        let samples = (1..=rows[0].len()).map(|s| format!("S{}", s)).collect();
        let variants = (0..rows.len())
            .map(|i| Variant::new("2".into(), 500 + i as u32, "G".into(), "T".into()))
            .collect();
        Dataset::new(samples, variants, rows).unwrap()
    }

    #[test]
    fn test_support_frequencies() {
        let tree = Tree::build(vec![(set(&[0, 1]), vec![0]), (set(&[2]), vec![1])], 3).unwrap();
        let pair = tree.find(&set(&[0, 1])).unwrap();
        let third = tree.find(&set(&[2])).unwrap();

        let runs: Vec<HashSet<CloneSet>> = vec![
            [set(&[0, 1, 2]), set(&[0, 1]), set(&[2])].into_iter().collect(),
            [set(&[0, 1, 2]), set(&[1, 2])].into_iter().collect(),
            [set(&[0, 1, 2]), set(&[0, 1])].into_iter().collect(),
            [set(&[0, 1, 2])].into_iter().collect(),
        ];
        let support = support_frequencies(&tree, &runs);

        assert_eq!(support.len(), tree.len() - 1);
        assert_eq!(support[FOUNDER - 1], Some(1.0));
        assert_eq!(support[pair - 1], Some(0.5));
        assert_eq!(support[third - 1], Some(0.25));
        for value in support.into_iter().flatten() {
            assert!((0.0..=1.0).contains(&value));
        }

        assert!(support_frequencies(&tree, &[]).iter().all(|s| s.is_none()));
    }

    #[test]
    fn test_resample_draws_all_variants() {
        let mut rng = StdRng::seed_from_u64(3);
        let draws = resample(10, &mut rng);
        assert_eq!(draws.iter().map(|(_, c)| c).sum::<usize>(), 10);
        assert!(draws.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_bootstrap_support_in_bounds() {
        let data = dataset(vec![
            strong(&[true, true, true]),
            strong(&[true, true, false]),
            strong(&[true, true, false]),
            strong(&[false, false, true]),
            strong(&[true, true, true]),
        ]);
        let config = InferenceConfig {
            no_bootstrap_samples: 8,
            pool_size: 2,
            threads: 2,
            ..InferenceConfig::default()
        };
        let phylogeny = MaxLhPhylogeny::new(&data, &config);
        let sink = CollectingSink::new();
        let solution = phylogeny.infer(&sink).unwrap();
        let report = estimate(&solution.tree, &solution.pool, &phylogeny, &sink).unwrap();

        assert_eq!(report.bootstrap_completed + report.bootstrap_failures.len(), 8);
        assert_eq!(report.pool_solutions, solution.pool.len());
        assert_eq!(report.edges.len(), solution.tree.len() - 1);
        for edge in &report.edges {
            let pool = edge.pool_support.unwrap();
            assert!((0.0..=1.0).contains(&pool));
            if let Some(boot) = edge.bootstrap_support {
                assert!((0.0..=1.0).contains(&boot));
            }
        }
        // the founder and the sample leaves are part of every tree
        assert_eq!(report.support(FOUNDER).unwrap().bootstrap_support, Some(1.0));
        assert_eq!(report.support(FOUNDER).unwrap().pool_support, Some(1.0));
    }

    #[test]
    fn test_failed_replicates_excluded_from_support() {
        let tree = Tree::build(vec![(set(&[0, 1]), vec![0]), (set(&[2]), vec![1])], 3).unwrap();
        let pair = tree.find(&set(&[0, 1])).unwrap();
        let sink = CollectingSink::new();

        // replicates 2 and 5 fail; the pair is seen in replicates 0 and 4
        let (runs, failures) = run_replicates("bootstrap", 6, 2, &sink, |replicate| {
            if replicate % 3 == 2 {
                return Err("time limit reached before optimality".to_string());
            }
            let mut sets: HashSet<CloneSet> = [set(&[0, 1, 2]), set(&[2])].into_iter().collect();
            if replicate % 2 == 0 {
                sets.insert(set(&[0, 1]));
            }
            Ok(sets)
        })
        .unwrap();

        assert_eq!(runs.len(), 4);
        let failed: Vec<usize> = failures.iter().map(|f| f.replicate).collect();
        assert_eq!(failed, vec![2, 5]);
        let support = support_frequencies(&tree, &runs);
        assert_eq!(support[pair - 1], Some(0.5));
        assert_eq!(support[FOUNDER - 1], Some(1.0));

        let failed_events = sink
            .events()
            .iter()
            .filter(|e| matches!(e, SolverEvent::ReplicateFailed { kind: "bootstrap", .. }))
            .count();
        assert_eq!(failed_events, 2);
    }

    #[test]
    fn test_infeasible_replicates_leave_support_undefined() {
        let data = dataset(vec![strong(&[true, true]), strong(&[true, false])]);
        let config = InferenceConfig {
            max_no_mps: Some(0),
            no_bootstrap_samples: 3,
            threads: 2,
            ..InferenceConfig::default()
        };
        let phylogeny = MaxLhPhylogeny::new(&data, &config);
        let tree = Tree::build(vec![(set(&[0, 1]), vec![0]), (set(&[0]), vec![1])], 2).unwrap();
        let sink = CollectingSink::new();
        let report = estimate(&tree, &[], &phylogeny, &sink).unwrap();

        assert_eq!(report.bootstrap_completed, 0);
        assert_eq!(report.bootstrap_failures.len(), 3);
        assert!(report.edges.iter().all(|e| e.bootstrap_support.is_none()));
        assert!(sink.events().contains(&SolverEvent::BootstrapFinished {
            completed: 0,
            requested: 3,
        }));
    }

    #[test]
    fn test_bootstrap_is_reproducible() {
        let data = dataset(vec![
            strong(&[true, true, false]),
            strong(&[false, true, true]),
            strong(&[true, false, false]),
        ]);
        let config = InferenceConfig {
            no_bootstrap_samples: 5,
            threads: 3,
            ..InferenceConfig::default()
        };
        let phylogeny = MaxLhPhylogeny::new(&data, &config);
        let sink = CollectingSink::new();
        let (first, _) = bootstrap(&phylogeny, &sink).unwrap();
        let (second, _) = bootstrap(&phylogeny, &sink).unwrap();
        assert_eq!(first, second);
    }
}
