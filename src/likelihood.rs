//! Presence/absence likelihoods from variant evidence and the candidate
//! mutation patterns of each variant

use crate::{pattern::Pattern, Dataset, ErrorModel, Evidence, InferenceConfig};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::function::beta::ln_beta;
use statrs::function::factorial::ln_binomial;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Upper bound on candidates per variant when only the likelihood gap limits them
pub const MAX_GAP_CANDIDATES: usize = 128;

/// Numerically stable ln(e^a + e^b)
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Posterior log-probabilities of absence and presence of a variant in one sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleLikelihood {
    pub log_absent: f64,
    pub log_present: f64,
}

impl SampleLikelihood {
    pub fn is_present(&self) -> bool {
        self.log_present > self.log_absent
    }

    /// Log-likelihood of the observation when the tree places the variant in this
    /// sample; the mutation may have been lost again with probability `loh_frequency`
    pub fn log_present_in_tree(&self, loh_frequency: f64) -> f64 {
        if loh_frequency <= 0.0 {
            return self.log_present;
        }
        log_sum_exp(
            (1.0 - loh_frequency).ln() + self.log_present,
            loh_frequency.ln() + self.log_absent,
        )
    }
}

/// Posterior presence of a variant given its evidence in one sample.
///
/// Absent: variant reads are sequencing errors, `k ~ Binomial(n, e)`.
/// Present: the allele frequency is unknown with a Beta prior, so
/// `k ~ BetaBinomial(n, alpha, beta)`.
pub fn sample_likelihood(evidence: &Evidence, model: &ErrorModel) -> SampleLikelihood {
    match *evidence {
        Evidence::Call(present) => {
            let right = (1.0 - model.binary_call_error).ln();
            let wrong = model.binary_call_error.ln();
            if present {
                SampleLikelihood {
                    log_absent: wrong,
                    log_present: right,
                }
            } else {
                SampleLikelihood {
                    log_absent: right,
                    log_present: wrong,
                }
            }
        }
        Evidence::Reads { alt, depth } => {
            let k = alt as f64;
            let n = depth as f64;
            let coefficient = ln_binomial(depth as u64, alt as u64);
            let e = model.seq_error_rate;
            let ll_absent = coefficient + k * e.ln() + (n - k) * (1.0 - e).ln();
            let ll_present = coefficient
                + ln_beta(k + model.pseudo_alpha, n - k + model.pseudo_beta)
                - ln_beta(model.pseudo_alpha, model.pseudo_beta);

            let joint_absent = model.absent_prior.ln() + ll_absent;
            let joint_present = (1.0 - model.absent_prior).ln() + ll_present;
            let norm = log_sum_exp(joint_absent, joint_present);
            SampleLikelihood {
                log_absent: joint_absent - norm,
                log_present: joint_present - norm,
            }
        }
    }
}

/// Per-(variant, sample) classification relative to the assigned pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    TruePositive,
    TrueNegative,
    FalsePositive,
    FalseNegative,
    /// Assigned present but observed absent at too low coverage to tell
    FalseNegativeUnknown,
    /// Observed present in a variant that fits none of its candidate patterns
    Unresolved,
}

/// A pattern a variant may be assigned to, with its log-likelihood
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidatePattern {
    pub pattern: Pattern,
    pub log_likelihood: f64,
}

/// Likelihood data of one variant across all samples
#[derive(Debug, Clone)]
pub struct VariantLikelihood {
    samples: Vec<SampleLikelihood>,
    low_coverage: Vec<bool>,
    loh_frequency: f64,
}

impl VariantLikelihood {
    pub fn new(evidence: &[Evidence], model: &ErrorModel, loh_frequency: f64) -> Self {
        let samples = evidence.iter().map(|e| sample_likelihood(e, model)).collect();
        let low_coverage = evidence
            .iter()
            .map(|e| match e {
                Evidence::Reads { depth, .. } => *depth < model.min_absent_coverage,
                Evidence::Call(_) => false,
            })
            .collect();
        Self {
            samples,
            low_coverage,
            loh_frequency,
        }
    }

    pub fn sample(&self, sample: usize) -> &SampleLikelihood {
        &self.samples[sample]
    }

    /// Pattern of the observed presence calls (posterior presence above one half)
    pub fn observed_pattern(&self) -> Pattern {
        Pattern::from_samples(
            self.samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_present())
                .map(|(idx, _)| idx),
        )
    }

    fn log_terms(&self, sample: usize) -> (f64, f64) {
        let s = &self.samples[sample];
        (s.log_absent, s.log_present_in_tree(self.loh_frequency))
    }

    pub fn pattern_log_likelihood(&self, pattern: &Pattern) -> f64 {
        (0..self.samples.len())
            .map(|s| {
                let (absent, present) = self.log_terms(s);
                if pattern.contains(s) {
                    present
                } else {
                    absent
                }
            })
            .sum()
    }

    /// Most likely pattern; a sample is included only if presence is strictly more likely
    pub fn max_likelihood_pattern(&self) -> Pattern {
        Pattern::from_samples((0..self.samples.len()).filter(|&s| {
            let (absent, present) = self.log_terms(s);
            present > absent
        }))
    }

    /// Candidate patterns in order of decreasing likelihood. Enumeration stops after
    /// `max_no_mps` patterns, or, when unset, once a pattern is more than `log_gap`
    /// below the most likely one.
    pub fn candidate_patterns(
        &self,
        max_no_mps: Option<usize>,
        log_gap: f64,
    ) -> Vec<CandidatePattern> {
        let limit = max_no_mps.unwrap_or(MAX_GAP_CANDIDATES);
        if limit == 0 {
            return Vec::new();
        }

        let best = self.max_likelihood_pattern();
        let best_ll = self.pattern_log_likelihood(&best);

        // cost of moving each sample away from its most likely state, cheapest first
        let mut flips: Vec<(usize, f64)> = (0..self.samples.len())
            .map(|s| {
                let (absent, present) = self.log_terms(s);
                (s, (present - absent).abs())
            })
            .collect();
        flips.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let flipped = |positions: u64| -> Pattern {
            let mut bits = best.bits();
            for (pos, (sample, _)) in flips.iter().enumerate() {
                if positions & (1 << pos) != 0 {
                    bits ^= 1 << sample;
                }
            }
            Pattern::from_bits(bits)
        };

        let mut candidates = vec![CandidatePattern {
            pattern: best,
            log_likelihood: best_ll,
        }];

        // k smallest subset sums over the sorted flip costs
        let mut frontier = BinaryHeap::new();
        if !flips.is_empty() {
            frontier.push(FlipSet {
                cost: flips[0].1,
                last: 0,
                positions: 1,
            });
        }

        while candidates.len() < limit {
            let Some(next) = frontier.pop() else {
                break;
            };
            if max_no_mps.is_none() && next.cost > log_gap {
                break;
            }

            candidates.push(CandidatePattern {
                pattern: flipped(next.positions),
                log_likelihood: best_ll - next.cost,
            });

            let following = next.last + 1;
            if following < flips.len() {
                frontier.push(FlipSet {
                    cost: next.cost + flips[following].1,
                    last: following,
                    positions: next.positions | (1 << following),
                });
                frontier.push(FlipSet {
                    cost: next.cost - flips[next.last].1 + flips[following].1,
                    last: following,
                    positions: (next.positions & !(1 << next.last)) | (1 << following),
                });
            }
        }

        candidates
    }

    /// Label every sample by comparing the observed call with the assigned pattern
    pub fn classify(&self, assigned: &Pattern) -> Vec<Classification> {
        self.samples
            .iter()
            .enumerate()
            .map(|(s, sample)| {
                match (sample.is_present(), assigned.contains(s)) {
                    (true, true) => Classification::TruePositive,
                    (false, false) => Classification::TrueNegative,
                    (true, false) => Classification::FalsePositive,
                    (false, true) if self.low_coverage[s] => Classification::FalseNegativeUnknown,
                    (false, true) => Classification::FalseNegative,
                }
            })
            .collect()
    }

    /// Labels of a variant left off the tree as a residual conflict
    pub fn classify_unresolved(&self) -> Vec<Classification> {
        self.samples
            .iter()
            .map(|sample| {
                if sample.is_present() {
                    Classification::Unresolved
                } else {
                    Classification::TrueNegative
                }
            })
            .collect()
    }
}

/// Min-heap entry of the subset-sum enumeration
#[derive(Debug, Clone, Copy)]
struct FlipSet {
    cost: f64,
    last: usize,
    positions: u64,
}

impl PartialEq for FlipSet {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FlipSet {}

impl PartialOrd for FlipSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlipSet {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap pops the cheapest set first
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.positions.cmp(&self.positions))
    }
}

/// Likelihoods of all variants of a dataset
pub fn compute_likelihoods(dataset: &Dataset, config: &InferenceConfig) -> Vec<VariantLikelihood> {
    (0..dataset.no_variants())
        .into_par_iter()
        .map(|v| {
            VariantLikelihood::new(dataset.evidence(v), &config.error_model, config.loh_frequency)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reads(alt: u32, depth: u32) -> Evidence {
        Evidence::Reads { alt, depth }
    }

    #[test]
    fn test_log_sum_exp() {
        let value = log_sum_exp(0.5f64.ln(), 0.25f64.ln());
        assert!((value - 0.75f64.ln()).abs() < 1e-12);
        assert_eq!(log_sum_exp(f64::NEG_INFINITY, -1.0), -1.0);
    }

    #[test]
    fn test_sample_likelihood_reads() {
        let model = ErrorModel::default();

        let present = sample_likelihood(&reads(20, 100), &model);
        assert!(present.is_present());
        assert!(present.log_present > -1e-6);

        let absent = sample_likelihood(&reads(0, 100), &model);
        assert!(!absent.is_present());

        // no coverage leaves the prior untouched
        let unknown = sample_likelihood(&reads(0, 0), &model);
        assert!((unknown.log_absent - 0.5f64.ln()).abs() < 1e-9);
        assert!((unknown.log_present - 0.5f64.ln()).abs() < 1e-9);
        assert!(!unknown.is_present());

        let total = log_sum_exp(present.log_absent, present.log_present);
        assert!(total.abs() < 1e-9);
    }

    #[test]
    fn test_sample_likelihood_calls() {
        let model = ErrorModel::default();
        let yes = sample_likelihood(&Evidence::Call(true), &model);
        let no = sample_likelihood(&Evidence::Call(false), &model);
        assert!(yes.is_present());
        assert!(!no.is_present());
        assert_eq!(yes.log_absent, no.log_present);
    }

    #[test]
    fn test_loh_softens_presence_penalty() {
        let model = ErrorModel::default();
        let absent = sample_likelihood(&reads(0, 200), &model);
        let strict = absent.log_present_in_tree(0.0);
        let lossy = absent.log_present_in_tree(0.2);
        assert!(lossy > strict);
        assert!(lossy < absent.log_absent);
    }

    #[test]
    fn test_candidate_patterns_ordered() {
        let model = ErrorModel::default();
        let evidence = [reads(30, 100), reads(2, 40), reads(0, 150)];
        let variant = VariantLikelihood::new(&evidence, &model, 0.0);

        let best = variant.max_likelihood_pattern();
        assert_eq!(best, variant.observed_pattern());

        let all = variant.candidate_patterns(Some(100), 0.0);
        assert_eq!(all.len(), 8);
        assert_eq!(all[0].pattern, best);
        for pair in all.windows(2) {
            assert!(pair[0].log_likelihood >= pair[1].log_likelihood - 1e-12);
        }
        for candidate in &all {
            let direct = variant.pattern_log_likelihood(&candidate.pattern);
            assert!((direct - candidate.log_likelihood).abs() < 1e-9);
        }

        let mut distinct: Vec<u64> = all.iter().map(|c| c.pattern.bits()).collect();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 8);

        assert_eq!(variant.candidate_patterns(Some(2), 0.0).len(), 2);
        assert!(variant.candidate_patterns(Some(0), 0.0).is_empty());
    }

    #[test]
    fn test_candidate_patterns_gap() {
        let model = ErrorModel::default();
        let variant = VariantLikelihood::new(&[reads(50, 100), reads(60, 100)], &model, 0.0);
        let candidates = variant.candidate_patterns(None, 1.0);
        assert_eq!(candidates.len(), 1);
        let candidates = variant.candidate_patterns(None, 1e6);
        assert_eq!(candidates.len(), 4);
    }

    #[test]
    fn test_classify() {
        let model = ErrorModel::default();
        let variant = VariantLikelihood::new(
            &[reads(40, 100), reads(0, 100), reads(0, 3), reads(25, 100)],
            &model,
            0.0,
        );
        let assigned = Pattern::from_samples([0, 1, 2]);
        assert_eq!(
            variant.classify(&assigned),
            vec![
                Classification::TruePositive,
                Classification::FalseNegative,
                Classification::FalseNegativeUnknown,
                Classification::FalsePositive,
            ]
        );
        assert_eq!(
            variant.classify_unresolved(),
            vec![
                Classification::Unresolved,
                Classification::TrueNegative,
                Classification::TrueNegative,
                Classification::Unresolved,
            ]
        );
    }
}
