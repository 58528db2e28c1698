//! JSON hand-off of an inference with human-readable labels

use crate::confidence::ReplicateFailure;
use crate::likelihood::Classification;
use crate::optimizer::SolveStatus;
use crate::solver::{Inference, Solver, Summary};
use crate::tree::NodeKind;
use crate::utils::create_report;
use crate::{Dataset, TreeResult};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: usize,
    pub parent: Option<usize>,
    pub kind: NodeKind,
    pub samples: Vec<String>,
    /// Variants acquired on the edge into this node
    pub mutations: Vec<String>,
    /// Genes of acquired variants that are known drivers
    pub drivers: Vec<String>,
    pub pool_support: Option<f64>,
    pub bootstrap_support: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentReport {
    pub variant: String,
    pub ml_pattern: Vec<String>,
    pub assigned: Vec<String>,
    pub log_likelihood: f64,
    pub classification: Vec<(String, Classification)>,
    pub residual_conflict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeReport {
    pub solver: Solver,
    pub status: SolveStatus,
    pub objective: f64,
    pub samples: Vec<String>,
    pub summary: Summary,
    pub nodes: Vec<NodeReport>,
    pub conflicting: Vec<String>,
    pub assignments: Vec<AssignmentReport>,
    pub bootstrap_failures: Vec<ReplicateFailure>,
}

pub fn build_report(inference: &Inference, dataset: &Dataset) -> TreeReport {
    let names = dataset.samples();
    let variants = dataset.variants();
    let tree = &inference.tree;

    let nodes = tree
        .nodes()
        .iter()
        .enumerate()
        .map(|(id, node)| {
            let support = inference
                .confidence
                .as_ref()
                .and_then(|c| c.support(id));
            NodeReport {
                id,
                parent: node.parent,
                kind: node.kind,
                samples: node.set.labels(names),
                mutations: node.mutations.iter().map(|&v| variants[v].to_string()).collect(),
                drivers: node
                    .mutations
                    .iter()
                    .filter(|&&v| dataset.is_driver(v))
                    .filter_map(|&v| variants[v].gene.clone())
                    .collect(),
                pool_support: support.and_then(|s| s.pool_support),
                bootstrap_support: support.and_then(|s| s.bootstrap_support),
            }
        })
        .collect();

    let assignments = inference
        .assignments
        .iter()
        .map(|a| AssignmentReport {
            variant: variants[a.variant].to_string(),
            ml_pattern: a.ml_pattern.labels(names),
            assigned: a.assigned.labels(names),
            log_likelihood: a.log_likelihood,
            classification: names.iter().cloned().zip(a.classification.iter().copied()).collect(),
            residual_conflict: a.residual_conflict,
        })
        .collect();

    TreeReport {
        solver: inference.solver,
        status: inference.status,
        objective: inference.objective,
        samples: names.to_vec(),
        summary: inference.summary.clone(),
        nodes,
        conflicting: inference
            .conflicting
            .iter()
            .map(|&v| variants[v].to_string())
            .collect(),
        assignments,
        bootstrap_failures: inference
            .confidence
            .as_ref()
            .map(|c| c.bootstrap_failures.clone())
            .unwrap_or_default(),
    }
}

/// Write the report as pretty JSON, gzip-compressed when the path ends in `.gz`
pub fn write_report(report: &TreeReport, output_path: &Path) -> TreeResult<()> {
    let mut writer = create_report(output_path)?;
    serde_json::to_writer_pretty(&mut writer, report)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

pub fn write_inference(
    inference: &Inference,
    dataset: &Dataset,
    output_path: &Path,
) -> TreeResult<()> {
    let report = build_report(inference, dataset);
    write_report(&report, output_path)?;
    log::info!(
        "Wrote tree with {} nodes to {}",
        report.nodes.len(),
        output_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::{Evidence, InferenceConfig, Variant};
    use flate2::read::GzDecoder;
    use std::fs::File;
    use std::io::Read;
    use tempfile::TempDir;

    fn dataset() -> Dataset {
        let variants = vec![
            Variant::new("17".into(), 7_577_120, "C".into(), "T".into())
                .with_gene(Some("TP53".into())),
            Variant::new("12".into(), 25_398_284, "C".into(), "A".into())
                .with_gene(Some("KRAS".into())),
            Variant::new("5".into(), 112_175_770, "G".into(), "T".into())
                .with_gene(Some("APC".into())),
        ];
        let evidence = vec![
            vec![Evidence::Call(true), Evidence::Call(true)],
            vec![Evidence::Call(true), Evidence::Call(false)],
            vec![Evidence::Call(false), Evidence::Call(true)],
        ];
        Dataset::new(vec!["PT".into(), "LiM".into()], variants, evidence)
            .unwrap()
            .with_drivers(["TP53".to_string(), "KRAS".to_string()].into_iter().collect())
    }

    #[test]
    fn test_build_report_labels() {
        let data = dataset();
        let inference = Solver::Simple
            .infer(&data, &InferenceConfig::default(), &CollectingSink::new())
            .unwrap();
        let report = build_report(&inference, &data);

        assert_eq!(report.samples, vec!["PT", "LiM"]);
        let founder = &report.nodes[1];
        assert_eq!(founder.samples, vec!["PT", "LiM"]);
        assert_eq!(founder.mutations, vec!["17:7577120 C>T (TP53)"]);
        assert_eq!(founder.drivers, vec!["TP53"]);

        let primary = report.nodes.iter().find(|n| n.samples == vec!["PT"]).unwrap();
        assert_eq!(primary.drivers, vec!["KRAS"]);
        let metastasis = report.nodes.iter().find(|n| n.samples == vec!["LiM"]).unwrap();
        assert!(metastasis.drivers.is_empty());
        assert_eq!(metastasis.mutations.len(), 1);
    }

    #[test]
    fn test_write_plain_and_gzipped_json() {
        let data = dataset();
        let config = InferenceConfig::default();
        let inference = Solver::MaxLikelihood
            .infer(&data, &config, &CollectingSink::new())
            .unwrap();
        let dir = TempDir::new().unwrap();

        let plain = dir.path().join("tree.json");
        write_inference(&inference, &data, &plain).unwrap();
        let content = std::fs::read_to_string(&plain).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["solver"], "MaxLikelihood");
        assert_eq!(value["assignments"].as_array().unwrap().len(), 3);

        let gzipped = dir.path().join("tree.json.gz");
        write_inference(&inference, &data, &gzipped).unwrap();
        let mut decoded = String::new();
        GzDecoder::new(File::open(&gzipped).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        let report: TreeReport = serde_json::from_str(&decoded).unwrap();
        assert_eq!(report.nodes.len(), inference.tree.len());
        assert!((report.objective - inference.objective).abs() < 1e-9);
    }
}
