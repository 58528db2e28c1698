//! # clonetree - Clonal Evolution Tree Inference
//!
//! Reconstructs the evolutionary history of a tumor from multi-sample variant
//! evidence. Variants are grouped into mutation patterns (presence/absence
//! across samples), conflicting patterns are resolved by exact combinatorial
//! optimization, and the surviving patterns are arranged into a rooted tree
//! under the infinite-sites assumption.

pub mod confidence;
pub mod events;
pub mod input;
pub mod likelihood;
pub mod max_lh;
pub mod optimizer;
pub mod output;
pub mod pattern;
pub mod simple;
pub mod solver;
pub mod subclone;
pub mod tree;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Maximal number of samples supported by the pattern bit-vectors
pub const MAX_SAMPLES: usize = 64;

/// Wall-clock limit of a single solve unless configured otherwise
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 300;

/// Represents a somatic variant with its locus and alleles
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    pub chrom: String,
    pub pos: u32,
    pub ref_allele: String,
    pub alt_allele: String,
    pub gene: Option<String>,
}

impl Variant {
    pub fn new(chrom: String, pos: u32, ref_allele: String, alt_allele: String) -> Self {
        Self {
            chrom,
            pos,
            ref_allele,
            alt_allele,
            gene: None,
        }
    }

    pub fn with_gene(mut self, gene: Option<String>) -> Self {
        self.gene = gene.filter(|g| !g.is_empty());
        self
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}>{}", self.chrom, self.pos, self.ref_allele, self.alt_allele)?;
        if let Some(gene) = &self.gene {
            write!(f, " ({})", gene)?;
        }
        Ok(())
    }
}

/// Evidence of a variant in one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evidence {
    /// Binary presence call
    Call(bool),
    /// Supporting reads and total coverage at the locus
    Reads { alt: u32, depth: u32 },
}

/// Patient-level dataset: samples, variants and per-(variant, sample) evidence
#[derive(Debug, Clone)]
pub struct Dataset {
    samples: Vec<String>,
    variants: Vec<Variant>,
    evidence: Vec<Vec<Evidence>>,
    drivers: HashSet<String>,
}

impl Dataset {
    /// Build a dataset; `evidence` is variant-major with one entry per sample
    pub fn new(
        samples: Vec<String>,
        variants: Vec<Variant>,
        evidence: Vec<Vec<Evidence>>,
    ) -> TreeResult<Self> {
        if samples.is_empty() {
            return Err(TreeError::InvalidInput("dataset has no samples".to_string()));
        }
        if samples.len() > MAX_SAMPLES {
            return Err(TreeError::InvalidInput(format!(
                "{} samples given but at most {} are supported",
                samples.len(),
                MAX_SAMPLES
            )));
        }
        if variants.is_empty() {
            return Err(TreeError::InvalidInput("dataset has no variants".to_string()));
        }
        if variants.len() != evidence.len() {
            return Err(TreeError::InvalidInput(format!(
                "{} variants but {} evidence rows",
                variants.len(),
                evidence.len()
            )));
        }

        let mut seen = HashSet::new();
        for name in &samples {
            if !seen.insert(name.as_str()) {
                return Err(TreeError::InvalidInput(format!("duplicate sample name: {}", name)));
            }
        }

        for (variant, row) in variants.iter().zip(&evidence) {
            if row.len() != samples.len() {
                return Err(TreeError::InvalidInput(format!(
                    "variant {} has {} evidence entries, expected {}",
                    variant,
                    row.len(),
                    samples.len()
                )));
            }
            for entry in row {
                if let Evidence::Reads { alt, depth } = entry {
                    if alt > depth {
                        return Err(TreeError::InvalidInput(format!(
                            "variant {} has {} supporting reads but coverage {}",
                            variant, alt, depth
                        )));
                    }
                }
            }
        }

        Ok(Self {
            samples,
            variants,
            evidence,
            drivers: HashSet::new(),
        })
    }

    /// Known driver genes; used for labeling only
    pub fn with_drivers(mut self, drivers: HashSet<String>) -> Self {
        self.drivers = drivers;
        self
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn no_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn no_variants(&self) -> usize {
        self.variants.len()
    }

    pub fn evidence(&self, variant: usize) -> &[Evidence] {
        &self.evidence[variant]
    }

    pub fn is_driver(&self, variant: usize) -> bool {
        self.variants[variant]
            .gene
            .as_ref()
            .map(|g| self.drivers.contains(g))
            .unwrap_or(false)
    }
}

/// Error model for turning read counts into presence probabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorModel {
    pub seq_error_rate: f64,     // Per-read probability of a spurious variant read
    pub absent_prior: f64,       // Prior probability that a variant is absent in a sample
    pub pseudo_alpha: f64,       // Beta prior of the variant allele frequency when present
    pub pseudo_beta: f64,
    pub binary_call_error: f64,  // Probability that a binary call is wrong
    pub min_absent_coverage: u32, // Below this coverage an absent call is ambiguous
}

impl Default for ErrorModel {
    fn default() -> Self {
        Self {
            seq_error_rate: 0.005,
            absent_prior: 0.5,
            pseudo_alpha: 1.0,
            pseudo_beta: 1.0,
            binary_call_error: 0.01,
            min_absent_coverage: 10,
        }
    }
}

/// Configuration parameters for tree inference
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Wall-clock limit per solve; on expiry the best solution found so far is kept
    pub time_limit: Duration,
    /// Number of most likely patterns explored per variant
    pub max_no_mps: Option<usize>,
    /// Probability that a mutation along a lineage is lost again
    pub loh_frequency: f64,
    pub subclone_detection: bool,
    /// Number of best solutions enumerated for confidence estimation
    pub pool_size: usize,
    pub no_bootstrap_samples: usize,
    pub error_model: ErrorModel,
    /// Log-likelihood gap bounding the candidates when `max_no_mps` is unset
    pub candidate_log_gap: f64,
    /// Log-likelihood cost of splitting a sample into two subclones
    pub subclone_split_penalty: f64,
    pub threads: usize,
    pub seed: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(DEFAULT_TIME_LIMIT_SECS),
            max_no_mps: None,
            loh_frequency: 0.0,
            subclone_detection: false,
            pool_size: 0,
            no_bootstrap_samples: 0,
            error_model: ErrorModel::default(),
            candidate_log_gap: 20.0,
            subclone_split_penalty: 3.0,
            threads: 1,
            seed: 42,
        }
    }
}

/// Validate inference configuration parameters
pub fn validate_config(config: &InferenceConfig) -> TreeResult<()> {
    let model = &config.error_model;

    if !(0.0..1.0).contains(&config.loh_frequency) {
        return Err(TreeError::InvalidConfig(
            "loh_frequency must be in [0, 1)".to_string(),
        ));
    }

    if model.seq_error_rate <= 0.0 || model.seq_error_rate >= 0.5 {
        return Err(TreeError::InvalidConfig(
            "seq_error_rate must be between 0 and 0.5".to_string(),
        ));
    }

    if model.absent_prior <= 0.0 || model.absent_prior >= 1.0 {
        return Err(TreeError::InvalidConfig(
            "absent_prior must be between 0 and 1".to_string(),
        ));
    }

    if model.pseudo_alpha <= 0.0 || model.pseudo_beta <= 0.0 {
        return Err(TreeError::InvalidConfig(
            "pseudo counts must be positive".to_string(),
        ));
    }

    if model.binary_call_error <= 0.0 || model.binary_call_error >= 0.5 {
        return Err(TreeError::InvalidConfig(
            "binary_call_error must be between 0 and 0.5".to_string(),
        ));
    }

    if !(config.candidate_log_gap > 0.0) {
        return Err(TreeError::InvalidConfig(
            "candidate_log_gap must be positive".to_string(),
        ));
    }

    if config.subclone_split_penalty < 0.0 {
        return Err(TreeError::InvalidConfig(
            "subclone_split_penalty must not be negative".to_string(),
        ));
    }

    if config.threads == 0 {
        return Err(TreeError::InvalidConfig(
            "at least one thread is required".to_string(),
        ));
    }

    Ok(())
}

/// Error types for the clonetree library
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Infeasible problem, no tree produced: {0}")]
    Infeasible(String),

    #[error("Solver found no feasible solution, no tree produced: {0}")]
    NoSolution(String),

    #[error("Tree invariant violated: {0}")]
    InvalidTree(String),
}

pub type TreeResult<T> = Result<T, TreeError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn reads(alt: u32, depth: u32) -> Evidence {
        Evidence::Reads { alt, depth }
    }

    #[test]
    fn test_dataset_rejects_empty_input() {
        let variant = Variant::new("1".into(), 1, "A".into(), "T".into());
        let no_samples = Dataset::new(Vec::new(), vec![variant], vec![Vec::new()]);
        assert!(matches!(no_samples, Err(TreeError::InvalidInput(_))));

        let no_variants = Dataset::new(vec!["S1".to_string()], Vec::new(), Vec::new());
        assert!(matches!(no_variants, Err(TreeError::InvalidInput(_))));
    }

    #[test]
    fn test_dataset_rejects_inconsistent_evidence() {
        let variant = Variant::new("1".into(), 10, "C".into(), "G".into());
        let ragged = Dataset::new(
            vec!["S1".into(), "S2".into()],
            vec![variant.clone()],
            vec![vec![reads(1, 10)]],
        );
        assert!(ragged.is_err());

        let too_many_reads =
            Dataset::new(vec!["S1".into()], vec![variant.clone()], vec![vec![reads(11, 10)]]);
        assert!(too_many_reads.is_err());

        let duplicate = Dataset::new(
            vec!["S1".into(), "S1".into()],
            vec![variant],
            vec![vec![reads(1, 10), reads(2, 10)]],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_driver_labels() {
        let variant = Variant::new("17".into(), 7_577_120, "C".into(), "T".into())
            .with_gene(Some("TP53".to_string()));
        let evidence = vec![vec![Evidence::Call(true)]];
        let dataset = Dataset::new(vec!["S1".into()], vec![variant], evidence)
            .unwrap()
            .with_drivers(["TP53".to_string()].into_iter().collect());
        assert!(dataset.is_driver(0));
        assert_eq!(dataset.variants()[0].to_string(), "17:7577120 C>T (TP53)");
    }

    #[test]
    fn test_validate_config() {
        assert!(validate_config(&InferenceConfig::default()).is_ok());
        assert_eq!(
            InferenceConfig::default().time_limit,
            Duration::from_secs(DEFAULT_TIME_LIMIT_SECS)
        );

        let config = InferenceConfig {
            loh_frequency: 1.0,
            ..InferenceConfig::default()
        };
        assert!(validate_config(&config).is_err());

        let config = InferenceConfig {
            threads: 0,
            ..InferenceConfig::default()
        };
        assert!(validate_config(&config).is_err());

        let mut config = InferenceConfig::default();
        config.error_model.seq_error_rate = 0.0;
        assert!(validate_config(&config).is_err());
    }
}
