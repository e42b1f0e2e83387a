use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::{Result, TariffError};
use crate::parser::RawRow;

/// How the delimited files inside a bulk archive are laid out.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveOptions {
    pub delimiter: u8,
    /// Skip the first line of every delimited file.
    pub header: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            header: true,
        }
    }
}

// Inner archive sizes come from the zip header and are not trusted beyond this.
const MAX_PREALLOC: u64 = 64 << 20;

fn prealloc_hint(declared: u64) -> usize {
    declared.min(MAX_PREALLOC) as usize
}

fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Read a bulk archive: a zip whose entries are zips of delimited files.
///
/// Expected layout:
///   {bulk}.zip / {inner}.zip / {content}.csv
///
/// Entries that are not inner zips, and inner entries that are not `.csv`,
/// are skipped. Inner archives are decoded in parallel; the returned records
/// keep archive order. Any malformed row fails the whole read.
pub fn read_bulk_archive<R, F>(
    path: &Path,
    options: ArchiveOptions,
    construct: F,
) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(&RawRow<'_>) -> Result<R> + Sync,
{
    let file = File::open(path).map_err(|e| TariffError::io(path, e))?;
    let outer_name = path.display().to_string();
    let mut outer =
        ZipArchive::new(BufReader::new(file)).map_err(|source| TariffError::Archive {
            name: outer_name.clone(),
            source,
        })?;

    // Collect inner archive bytes first so decoding can fan out.
    let mut inner = Vec::new();
    for i in 0..outer.len() {
        let mut entry = outer.by_index(i).map_err(|source| TariffError::Archive {
            name: outer_name.clone(),
            source,
        })?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if !has_extension(&name, "zip") {
            info!("Skipping non-archive entry '{name}' in {outer_name}");
            continue;
        }
        let mut bytes = Vec::with_capacity(prealloc_hint(entry.size()));
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| TariffError::io(path.join(&name), e))?;
        inner.push((name, bytes));
    }

    info!(
        "Reading {} inner archive(s) from {}",
        inner.len(),
        path.display()
    );

    let chunks = inner
        .into_par_iter()
        .map(|(name, bytes)| read_inner_archive(&name, bytes, options, &construct))
        .collect::<Result<Vec<_>>>()?;

    Ok(chunks.into_iter().flatten().collect())
}

fn read_inner_archive<R, F>(
    archive_name: &str,
    bytes: Vec<u8>,
    options: ArchiveOptions,
    construct: &F,
) -> Result<Vec<R>>
where
    F: Fn(&RawRow<'_>) -> Result<R>,
{
    let archive_error = |source: zip::result::ZipError| TariffError::Archive {
        name: archive_name.to_string(),
        source,
    };
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(archive_error)?;
    let mut records = Vec::new();

    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(archive_error)?;
        if entry.is_dir() {
            continue;
        }
        let source_name = format!("{archive_name}/{}", entry.name());
        if !has_extension(entry.name(), "csv") {
            info!("Skipping non-delimited file '{source_name}'");
            continue;
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(options.header)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(entry);

        let before = records.len();
        for (idx, result) in reader.records().enumerate() {
            let values = result.map_err(|source| TariffError::Csv {
                name: source_name.clone(),
                source,
            })?;
            let line = values
                .position()
                .map(|p| p.line())
                .unwrap_or(idx as u64 + 1);
            records.push(construct(&RawRow {
                source_name: &source_name,
                line,
                values: &values,
            })?);
        }
        debug!("{source_name}: {} rows", records.len() - before);
    }

    Ok(records)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::parser::{parse_mfn, parse_prf};

    /// Build a zip in memory from `(name, contents)` pairs.
    pub(crate) fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Write a bulk archive where each inner zip holds one csv file.
    pub(crate) fn write_bulk_archive(path: &Path, csv_files: &[&str]) {
        let inner: Vec<(String, Vec<u8>)> = csv_files
            .iter()
            .enumerate()
            .map(|(i, body)| {
                let bytes = zip_bytes(&[
                    ("[Content_Types].xml", b"<Types/>".as_slice()),
                    (format!("File_{i}.csv").as_str(), body.as_bytes()),
                ]);
                (format!("Inner{i}.zip"), bytes)
            })
            .collect();
        let refs: Vec<(&str, &[u8])> = inner
            .iter()
            .map(|(n, b)| (n.as_str(), b.as_slice()))
            .collect();
        std::fs::write(path, zip_bytes(&refs)).unwrap();
    }

    const MFN_HEADER: &str = "Nomen,Reporter,Year,Product,Name,Sum,Count,Average\n";

    // ── read_bulk_archive ────────────────────────────────────────────

    #[test]
    fn test_reads_all_inner_archives_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mfn.zip");
        write_bulk_archive(
            &path,
            &[
                format!("{MFN_HEADER}H0, 840 ,2000,0101,x,1,1,5.0\n").as_str(),
                format!("{MFN_HEADER}H0,484,2001,0102,x,1,1,7.5\nH0,484,2002,0102,x,1,1,7\n").as_str(),
            ],
        );

        let rows = read_bulk_archive(&path, ArchiveOptions::default(), parse_mfn).unwrap();
        let lines: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            lines,
            vec!["840|2000|0101|5", "484|2001|0102|7.5", "484|2002|0102|7"]
        );
    }

    #[test]
    fn test_skips_entries_that_are_not_archives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prf.zip");
        let inner = zip_bytes(&[(
            "prf.CSV",
            b"h\nH0,840,2000,0101,124,x,x,x,x,1.5\n".as_slice(),
        )]);
        let outer = zip_bytes(&[
            ("readme.txt", b"not data".as_slice()),
            ("Inner.ZIP", inner.as_slice()),
        ]);
        std::fs::write(&path, outer).unwrap();

        let rows = read_bulk_archive(&path, ArchiveOptions::default(), parse_prf).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].to_string(), "840|124|2000|0101|1.5");
    }

    #[test]
    fn test_without_header_reads_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mfn.zip");
        write_bulk_archive(&path, &["H0;840;2000;0101;x;1;1;5\n"]);

        let options = ArchiveOptions {
            delimiter: b';',
            header: false,
        };
        let rows = read_bulk_archive(&path, options, parse_mfn).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_malformed_row_fails_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mfn.zip");
        let body = format!("{MFN_HEADER}H0,840,year,0101,x,1,1,5\n");
        write_bulk_archive(&path, &[body.as_str()]);

        let err = read_bulk_archive(&path, ArchiveOptions::default(), parse_mfn).unwrap_err();
        match err {
            TariffError::MalformedRow {
                source_name, line, ..
            } => {
                assert_eq!(source_name, "Inner0.zip/File_0.csv");
                assert_eq!(line, 2);
            }
            other => panic!("expected malformed row, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_bulk_archive(
            &dir.path().join("absent.zip"),
            ArchiveOptions::default(),
            parse_mfn,
        )
        .unwrap_err();
        assert!(matches!(err, TariffError::Io { .. }));
    }

    #[test]
    fn test_corrupt_archive_is_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.zip");
        std::fs::write(&path, b"definitely not a zip").unwrap();
        let err = read_bulk_archive(&path, ArchiveOptions::default(), parse_mfn).unwrap_err();
        assert!(matches!(err, TariffError::Archive { .. }));
    }

    #[test]
    fn test_declared_entry_size_is_capped() {
        assert_eq!(prealloc_hint(1024), 1024);
        assert_eq!(prealloc_hint(u64::MAX), MAX_PREALLOC as usize);
        assert_eq!(prealloc_hint(1 << 63), MAX_PREALLOC as usize);
    }
}
