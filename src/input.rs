//! Loading of evidence tables and driver gene lists

use crate::{utils::open_table, Dataset, Evidence, TreeError, TreeResult, Variant};
use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;

const LOCUS_COLUMNS: [&str; 3] = ["Chromosome", "Position", "Change"];
const GENE_COLUMN: &str = "Gene";

/// A tab-separated table with one row per variant and one value column per sample
#[derive(Debug, Clone)]
struct SampleTable {
    samples: Vec<String>,
    variants: Vec<Variant>,
    values: Vec<Vec<String>>,
}

fn parse_change(change: &str) -> TreeResult<(String, String)> {
    match change.split_once('>') {
        Some((ref_allele, alt_allele)) if !ref_allele.is_empty() && !alt_allele.is_empty() => {
            Ok((ref_allele.trim().to_string(), alt_allele.trim().to_string()))
        }
        _ => Err(TreeError::InvalidInput(format!(
            "Invalid change '{}', expected REF>ALT",
            change
        ))),
    }
}

fn read_sample_table<P: AsRef<Path>>(path: P) -> TreeResult<SampleTable> {
    let reader = open_table(&path)?;
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    for (idx, expected) in LOCUS_COLUMNS.iter().enumerate() {
        if headers.get(idx) != Some(*expected) {
            return Err(TreeError::InvalidInput(format!(
                "{}: column {} must be '{}'",
                path.as_ref().display(),
                idx + 1,
                expected
            )));
        }
    }
    let has_gene = headers.get(LOCUS_COLUMNS.len()) == Some(GENE_COLUMN);
    let first_sample = LOCUS_COLUMNS.len() + usize::from(has_gene);
    let samples: Vec<String> = headers.iter().skip(first_sample).map(String::from).collect();

    let mut variants = Vec::new();
    let mut values = Vec::new();
    for result in csv_reader.records() {
        let record = result?;
        if record.len() != headers.len() {
            return Err(TreeError::InvalidInput(format!(
                "{}: row with {} columns, expected {}",
                path.as_ref().display(),
                record.len(),
                headers.len()
            )));
        }

        let pos = record[1]
            .parse::<u32>()
            .map_err(|_| TreeError::InvalidInput(format!("Invalid position: {}", &record[1])))?;
        let (ref_allele, alt_allele) = parse_change(&record[2])?;
        let gene = if has_gene {
            Some(record[3].to_string())
        } else {
            None
        };
        variants.push(
            Variant::new(record[0].to_string(), pos, ref_allele, alt_allele).with_gene(gene),
        );
        values.push(record.iter().skip(first_sample).map(String::from).collect());
    }

    log::debug!(
        "Read {} variants over {} samples from {}",
        variants.len(),
        samples.len(),
        path.as_ref().display()
    );

    Ok(SampleTable {
        samples,
        variants,
        values,
    })
}

fn parse_count(value: &str) -> TreeResult<u32> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| TreeError::InvalidInput(format!("Invalid read count: {}", value)))
}

fn parse_call(value: &str) -> TreeResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(TreeError::InvalidInput(format!("Invalid presence call: {}", other))),
    }
}

/// Read mutant read counts and coverage from two tables with identical layout
pub fn read_read_counts<P: AsRef<Path>>(
    mut_reads_path: P,
    coverage_path: P,
) -> TreeResult<Dataset> {
    let mut_reads = read_sample_table(&mut_reads_path)?;
    let coverage = read_sample_table(&coverage_path)?;

    if mut_reads.samples != coverage.samples {
        return Err(TreeError::InvalidInput(
            "Mutant read and coverage tables list different samples".to_string(),
        ));
    }
    if mut_reads.variants.len() != coverage.variants.len() {
        return Err(TreeError::InvalidInput(format!(
            "Mutant read table has {} variants, coverage table has {}",
            mut_reads.variants.len(),
            coverage.variants.len()
        )));
    }

    let mut evidence = Vec::with_capacity(mut_reads.variants.len());
    for (idx, (variant, other)) in mut_reads.variants.iter().zip(&coverage.variants).enumerate() {
        if (&variant.chrom, variant.pos) != (&other.chrom, other.pos) {
            return Err(TreeError::InvalidInput(format!(
                "Row {}: variant {} does not match coverage row {}",
                idx + 1,
                variant,
                other
            )));
        }
        let row = mut_reads.values[idx]
            .iter()
            .zip(&coverage.values[idx])
            .map(|(alt, depth)| {
                Ok(Evidence::Reads {
                    alt: parse_count(alt)?,
                    depth: parse_count(depth)?,
                })
            })
            .collect::<TreeResult<Vec<_>>>()?;
        evidence.push(row);
    }

    Dataset::new(mut_reads.samples, mut_reads.variants, evidence)
}

/// Read a table of binary presence calls (1/0, true/false or yes/no)
pub fn read_binary_calls<P: AsRef<Path>>(path: P) -> TreeResult<Dataset> {
    let table = read_sample_table(&path)?;
    let evidence = table
        .values
        .iter()
        .map(|row| {
            row.iter()
                .map(|value| parse_call(value).map(Evidence::Call))
                .collect::<TreeResult<Vec<_>>>()
        })
        .collect::<TreeResult<Vec<_>>>()?;
    Dataset::new(table.samples, table.variants, evidence)
}

/// Read driver gene names, one per line; blank lines and `#` comments are skipped
pub fn read_driver_genes<P: AsRef<Path>>(path: P) -> TreeResult<HashSet<String>> {
    let reader = open_table(&path)?;
    let mut genes = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        let gene = line.split('#').next().unwrap_or("").trim();
        if !gene.is_empty() {
            genes.insert(gene.to_string());
        }
    }
    log::info!("Read {} driver genes from {}", genes.len(), path.as_ref().display());
    Ok(genes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_table(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_read_read_counts() {
        let mut_reads = write_table(
            "Chromosome\tPosition\tChange\tGene\tPT1\tPT2\n\
             1\t1000\tC>T\tTP53\t12\t0\n\
             7\t55249071\tC>T\t\t8\t9\n",
        );
        let coverage = write_table(
            "Chromosome\tPosition\tChange\tGene\tPT1\tPT2\n\
             1\t1000\tC>T\tTP53\t60\t80\n\
             7\t55249071\tC>T\t\t40\t45\n",
        );

        let dataset = read_read_counts(mut_reads.path(), coverage.path()).unwrap();
        assert_eq!(dataset.samples(), &["PT1".to_string(), "PT2".to_string()]);
        assert_eq!(dataset.no_variants(), 2);
        assert_eq!(dataset.variants()[0].gene.as_deref(), Some("TP53"));
        assert_eq!(dataset.variants()[1].gene, None);
        assert_eq!(dataset.variants()[1].alt_allele, "T");
        assert_eq!(dataset.evidence(0)[0], Evidence::Reads { alt: 12, depth: 60 });
        assert_eq!(dataset.evidence(1)[1], Evidence::Reads { alt: 9, depth: 45 });
    }

    #[test]
    fn test_mismatched_tables_rejected() {
        let mut_reads = write_table("Chromosome\tPosition\tChange\tPT1\n1\t10\tA>G\t3\n");
        let coverage = write_table("Chromosome\tPosition\tChange\tPT1\n1\t11\tA>G\t30\n");
        assert!(read_read_counts(mut_reads.path(), coverage.path()).is_err());

        let coverage = write_table("Chromosome\tPosition\tChange\tPT2\n1\t10\tA>G\t30\n");
        assert!(read_read_counts(mut_reads.path(), coverage.path()).is_err());

        // more supporting reads than coverage
        let coverage = write_table("Chromosome\tPosition\tChange\tPT1\n1\t10\tA>G\t2\n");
        assert!(matches!(
            read_read_counts(mut_reads.path(), coverage.path()),
            Err(TreeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_read_gzipped_calls() {
        let mut file = NamedTempFile::new().unwrap();
        {
            let mut encoder = GzEncoder::new(file.as_file_mut(), Compression::default());
            write!(
                encoder,
                "Chromosome\tPosition\tChange\tLiM1\tLiM2\tPT\n\
                 3\t178936091\tG>A\t1\t1\t1\n\
                 12\t25398284\tC>A\tyes\tno\t0\n"
            )
            .unwrap();
            encoder.finish().unwrap();
        }

        let dataset = read_binary_calls(file.path()).unwrap();
        assert_eq!(dataset.no_samples(), 3);
        assert_eq!(
            dataset.evidence(1),
            &[Evidence::Call(true), Evidence::Call(false), Evidence::Call(false)]
        );
    }

    #[test]
    fn test_invalid_tables() {
        let bad_header = write_table("Chrom\tPos\tChange\tPT1\n1\t10\tA>G\t1\n");
        assert!(read_binary_calls(bad_header.path()).is_err());

        let bad_change = write_table("Chromosome\tPosition\tChange\tPT1\n1\t10\tAG\t1\n");
        assert!(read_binary_calls(bad_change.path()).is_err());

        let bad_call = write_table("Chromosome\tPosition\tChange\tPT1\n1\t10\tA>G\tmaybe\n");
        assert!(read_binary_calls(bad_call.path()).is_err());

        assert!(matches!(
            read_binary_calls("/nonexistent/calls.tsv"),
            Err(TreeError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_read_driver_genes() {
        let file = write_table("# cancer genes\nTP53\nKRAS  # oncogene\n\nAPC\n");
        let genes = read_driver_genes(file.path()).unwrap();
        assert_eq!(genes.len(), 3);
        assert!(genes.contains("KRAS"));
    }
}
