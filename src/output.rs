use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tariff_types::BilateralTariffRecord;
use tracing::info;

use crate::engine::TariffSink;
use crate::error::{Result, TariffError};
use crate::select::YearWindow;

pub const SUMMARY_FILE: &str = "run_summary.json";

/// Line format of the resolved tariff files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `reporter|partner|reporter_region|partner_region|type|year|product|tariff`
    #[default]
    Pipe,
    /// One JSON object per line.
    Jsonl,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

/// `prf_union_mfn_target_<target>.txt` (or `.jsonl`).
pub fn output_file_name(target: i32, format: OutputFormat) -> String {
    let ext = match format {
        OutputFormat::Pipe => "txt",
        OutputFormat::Jsonl => "jsonl",
    };
    format!("prf_union_mfn_target_{target}.{ext}")
}

/// Write one record per line to `path`. Returns the number of lines written.
pub fn write_records(
    path: &Path,
    records: &[BilateralTariffRecord],
    mode: WriteMode,
    format: OutputFormat,
) -> Result<usize> {
    info!("Writing {} rows to {}", records.len(), path.display());
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(mode == WriteMode::Append)
        .truncate(mode == WriteMode::Overwrite)
        .open(path)
        .map_err(|e| TariffError::io(path, e))?;
    let mut writer = BufWriter::new(file);

    for record in records {
        let written = match format {
            OutputFormat::Pipe => writeln!(writer, "{record}"),
            OutputFormat::Jsonl => {
                serde_json::to_writer(&mut writer, record)?;
                writeln!(writer)
            }
        };
        written.map_err(|e| TariffError::io(path, e))?;
    }
    writer.flush().map_err(|e| TariffError::io(path, e))?;
    info!("Completed writing to {}", path.display());
    Ok(records.len())
}

/// Writes each window to its own file under one output directory.
#[derive(Debug, Clone)]
pub struct DelimitedSink {
    dir: PathBuf,
    mode: WriteMode,
    format: OutputFormat,
}

impl DelimitedSink {
    /// Creates `dir` if it does not exist yet.
    pub fn new(dir: impl Into<PathBuf>, mode: WriteMode, format: OutputFormat) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| TariffError::io(&dir, e))?;
        Ok(Self { dir, mode, format })
    }

    pub fn path_for(&self, window: YearWindow) -> PathBuf {
        self.dir.join(output_file_name(window.target, self.format))
    }
}

impl TariffSink for DelimitedSink {
    fn write(&mut self, window: YearWindow, records: &[BilateralTariffRecord]) -> Result<String> {
        let path = self.path_for(window);
        write_records(&path, records, self.mode, self.format)?;
        Ok(path.display().to_string())
    }
}

/// Pretty-printed JSON next to the tariff files.
pub fn write_summary<T: Serialize>(dir: &Path, data: &T) -> Result<PathBuf> {
    let path = dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(data)?;
    fs::write(&path, &json).map_err(|e| TariffError::io(&path, e))?;
    info!("{} ({} bytes)", path.display(), json.len());
    Ok(path)
}
