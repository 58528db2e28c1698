//! File access shared by the evidence readers, the report writer and the CLI

use crate::{TreeError, TreeResult};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Open an evidence table; gzip input is recognized by its magic bytes, not its name
pub fn open_table<P: AsRef<Path>>(path: P) -> TreeResult<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => {
            TreeError::FileNotFound(path.display().to_string())
        }
        _ => TreeError::Io(e),
    })?;

    let mut reader = BufReader::new(file);
    if reader.fill_buf()?.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Refuse to replace an existing report unless `force` is set
pub fn check_report_path<P: AsRef<Path>>(path: P, force: bool) -> TreeResult<()> {
    let path = path.as_ref();
    if path.exists() && !force {
        return Err(TreeError::Io(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("{} already exists, use --force to overwrite", path.display()),
        )));
    }
    Ok(())
}

fn is_gz_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Create a report file along with missing parent directories.
/// Paths ending in `.gz` are gzip-compressed.
pub fn create_report<P: AsRef<Path>>(path: P) -> TreeResult<Box<dyn Write>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    if is_gz_path(path) {
        Ok(Box::new(BufWriter::new(GzEncoder::new(file, Compression::default()))))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Worker threads for bootstrap replicates when none are configured
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::{NamedTempFile, TempDir};

    const TABLE: &str = "Chromosome\tPosition\tChange\tPT\n7\t140453136\tA>T\t1\n";

    #[test]
    fn test_open_plain_and_gzipped_tables() {
        let mut plain = NamedTempFile::new().unwrap();
        plain.write_all(TABLE.as_bytes()).unwrap();

        // a gzipped table without a .gz name is still decompressed
        let mut gzipped = NamedTempFile::new().unwrap();
        {
            let mut encoder = GzEncoder::new(gzipped.as_file_mut(), Compression::default());
            encoder.write_all(TABLE.as_bytes()).unwrap();
            encoder.finish().unwrap();
        }

        for file in [&plain, &gzipped] {
            let mut content = String::new();
            open_table(file.path()).unwrap().read_to_string(&mut content).unwrap();
            assert_eq!(content, TABLE);
        }
    }

    #[test]
    fn test_open_missing_or_empty_table() {
        assert!(matches!(
            open_table("/nonexistent/mut_reads.tsv"),
            Err(TreeError::FileNotFound(_))
        ));

        let empty = NamedTempFile::new().unwrap();
        let mut content = String::new();
        open_table(empty.path()).unwrap().read_to_string(&mut content).unwrap();
        assert!(content.is_empty());
    }

    #[test]
    fn test_create_report_in_new_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("patient7").join("trees").join("tree.json.gz");
        {
            let mut writer = create_report(&path).unwrap();
            writer.write_all(b"{}").unwrap();
            writer.flush().unwrap();
        }

        let mut file = File::open(&path).unwrap();
        let mut magic = [0u8; 2];
        file.read_exact(&mut magic).unwrap();
        assert_eq!(magic, GZIP_MAGIC);
        assert!(!is_gz_path(&dir.path().join("tree.json")));
    }

    #[test]
    fn test_check_report_path() {
        let existing = NamedTempFile::new().unwrap();
        assert!(check_report_path(existing.path(), false).is_err());
        assert!(check_report_path(existing.path(), true).is_ok());

        let dir = TempDir::new().unwrap();
        assert!(check_report_path(dir.path().join("tree.json"), false).is_ok());
        assert!(default_threads() >= 1);
    }
}
