use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tariff_types::BilateralTariffRecord;

use crate::archive::ArchiveOptions;
use crate::engine::{ErrorPolicy, InputPaths, RunOptions};
use crate::error::{Result, TariffError};
use crate::output::{OutputFormat, WriteMode};
use crate::select::YearWindow;

// "1995:2011", "1995-2011", " 1995 : 2011 "
static RE_WINDOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<minimum>\d{4})\s*[:\-]\s*(?P<target>\d{4})\s*$").unwrap()
});

/// Parse a `MIN:TARGET` (or `MIN-TARGET`) year window.
pub fn parse_window(raw: &str) -> Result<YearWindow> {
    let caps = RE_WINDOW.captures(raw).ok_or_else(|| {
        TariffError::InvalidArgument(format!(
            "year window '{raw}' is not of the form MIN:TARGET"
        ))
    })?;
    let year = |name: &str| {
        caps[name].parse::<i32>().map_err(|e| {
            TariffError::InvalidArgument(format!("year window '{raw}': {e}"))
        })
    };
    YearWindow::new(year("minimum")?, year("target")?)
}

// ── Run file ───────────────────────────────────────────────────────

/// Every run setting, all optional. Read from a TOML file and/or built from
/// command-line flags; see [`RunFile::overlay`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunFile {
    pub mfn: Option<PathBuf>,
    pub prf: Option<PathBuf>,
    pub concordance: Option<PathBuf>,
    pub output: Option<PathBuf>,
    /// `MIN:TARGET` strings.
    pub windows: Vec<String>,
    /// Keep rows whose reporter or partner is in one of these regions.
    pub regions: Vec<String>,
    pub reporter_regions: Vec<String>,
    pub partner_regions: Vec<String>,
    pub continue_on_error: Option<bool>,
    pub append: Option<bool>,
    pub parallel: Option<bool>,
    pub format: Option<OutputFormat>,
    pub delimiter: Option<char>,
    pub header: Option<bool>,
}

impl RunFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| TariffError::io(path, e))?;
        toml::from_str(&text)
            .map_err(|e| TariffError::Config(format!("{}: {e}", path.display())))
    }

    /// Values set in `overrides` replace ours; lists replace ours when
    /// non-empty.
    pub fn overlay(self, overrides: RunFile) -> RunFile {
        fn list(base: Vec<String>, over: Vec<String>) -> Vec<String> {
            if over.is_empty() { base } else { over }
        }
        RunFile {
            mfn: overrides.mfn.or(self.mfn),
            prf: overrides.prf.or(self.prf),
            concordance: overrides.concordance.or(self.concordance),
            output: overrides.output.or(self.output),
            windows: list(self.windows, overrides.windows),
            regions: list(self.regions, overrides.regions),
            reporter_regions: list(self.reporter_regions, overrides.reporter_regions),
            partner_regions: list(self.partner_regions, overrides.partner_regions),
            continue_on_error: overrides.continue_on_error.or(self.continue_on_error),
            append: overrides.append.or(self.append),
            parallel: overrides.parallel.or(self.parallel),
            format: overrides.format.or(self.format),
            delimiter: overrides.delimiter.or(self.delimiter),
            header: overrides.header.or(self.header),
        }
    }
}

// ── Validated configuration ────────────────────────────────────────

/// Region restriction applied to every resolved row, ignoring case.
///
/// - `regions`: either the reporter or the partner region is listed.
/// - `reporter_regions` / `partner_regions`: that side's region is listed.
///
/// Every non-empty set must accept the row; an empty set accepts anything.
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    regions: HashSet<String>,
    reporter_regions: HashSet<String>,
    partner_regions: HashSet<String>,
}

impl RowFilter {
    pub fn new(
        regions: &[String],
        reporter_regions: &[String],
        partner_regions: &[String],
    ) -> Self {
        let fold = |regions: &[String]| -> HashSet<String> {
            regions.iter().map(|r| r.to_lowercase()).collect()
        };
        Self {
            regions: fold(regions),
            reporter_regions: fold(reporter_regions),
            partner_regions: fold(partner_regions),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
            && self.reporter_regions.is_empty()
            && self.partner_regions.is_empty()
    }

    pub fn matches(&self, record: &BilateralTariffRecord) -> bool {
        let listed = |set: &HashSet<String>, region: &str| set.contains(&region.to_lowercase());
        let accepts = |set: &HashSet<String>, region: &str| set.is_empty() || listed(set, region);

        (self.regions.is_empty()
            || listed(&self.regions, &record.reporter_region)
            || listed(&self.regions, &record.partner_region))
            && accepts(&self.reporter_regions, &record.reporter_region)
            && accepts(&self.partner_regions, &record.partner_region)
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub inputs: InputPaths,
    pub output_dir: PathBuf,
    pub windows: Vec<YearWindow>,
    pub filter: RowFilter,
    pub options: RunOptions,
    pub write_mode: WriteMode,
    pub format: OutputFormat,
    pub archive: ArchiveOptions,
}

fn required(value: Option<PathBuf>, what: &str, flag: &str) -> Result<PathBuf> {
    value.ok_or_else(|| TariffError::InvalidArgument(format!("missing {what} ({flag})")))
}

/// Check that the inputs of a run are present, without touching the
/// filesystem.
pub fn required_inputs(file: &RunFile) -> Result<InputPaths> {
    Ok(InputPaths {
        mfn: required(file.mfn.clone(), "MFN archive path", "--mfn")?,
        prf: required(file.prf.clone(), "PRF archive path", "--prf")?,
        concordance: required(
            file.concordance.clone(),
            "concordance file path",
            "--concordance",
        )?,
    })
}

pub fn archive_options(file: &RunFile) -> Result<ArchiveOptions> {
    let defaults = ArchiveOptions::default();
    let delimiter = match file.delimiter {
        None => defaults.delimiter,
        Some(c) if c.is_ascii() => c as u8,
        Some(c) => {
            return Err(TariffError::InvalidArgument(format!(
                "delimiter '{c}' is not a single-byte character"
            )));
        }
    };
    Ok(ArchiveOptions {
        delimiter,
        header: file.header.unwrap_or(defaults.header),
    })
}

impl TryFrom<RunFile> for RunConfig {
    type Error = TariffError;

    fn try_from(file: RunFile) -> Result<Self> {
        let inputs = required_inputs(&file)?;
        let output_dir = required(file.output.clone(), "output directory", "--output")?;
        if file.windows.is_empty() {
            return Err(TariffError::InvalidArgument(
                "at least one year window (--window MIN:TARGET) is required".to_string(),
            ));
        }
        let windows = file
            .windows
            .iter()
            .map(|w| parse_window(w))
            .collect::<Result<Vec<_>>>()?;

        let policy = if file.continue_on_error.unwrap_or(false) {
            ErrorPolicy::ContinueOnError
        } else {
            ErrorPolicy::FailFast
        };
        let write_mode = if file.append.unwrap_or(false) {
            WriteMode::Append
        } else {
            WriteMode::Overwrite
        };

        Ok(RunConfig {
            archive: archive_options(&file)?,
            filter: RowFilter::new(
                &file.regions,
                &file.reporter_regions,
                &file.partner_regions,
            ),
            inputs,
            output_dir,
            windows,
            options: RunOptions {
                policy,
                parallel_windows: file.parallel.unwrap_or(false),
            },
            write_mode,
            format: file.format.unwrap_or_default(),
        })
    }
}
