use std::path::PathBuf;

use rayon::prelude::*;
use serde::Serialize;
use tariff_types::{BilateralTariffRecord, MfnTariffRecord, PrfTariffRecord, TariffRecord};
use tracing::{error, info, warn};

use crate::archive::{ArchiveOptions, read_bulk_archive};
use crate::concordance::Concordance;
use crate::error::Result;
use crate::merge::{MergeStats, merge_with_stats};
use crate::parser::{parse_mfn, parse_prf};
use crate::resolve::{resolve_mfn, resolve_prf};
use crate::select::{YearWindow, select};

/// Locations of the three inputs of a run.
#[derive(Debug, Clone)]
pub struct InputPaths {
    pub mfn: PathBuf,
    pub prf: PathBuf,
    pub concordance: PathBuf,
}

/// What to do when one window fails to persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop at the first failing window.
    #[default]
    FailFast,
    /// Log the failure, record it in the summary and carry on.
    ContinueOnError,
}

/// Persistence collaborator receiving each window's resolved records.
pub trait TariffSink {
    /// Store `records` for `window`; returns a description of the destination.
    fn write(&mut self, window: YearWindow, records: &[BilateralTariffRecord]) -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
//  DATASET
// ═══════════════════════════════════════════════════════════════════════

/// MFN rows, PRF rows and the concordance, loaded once per run.
#[derive(Debug, Default)]
pub struct TariffDataset {
    pub mfn: Vec<MfnTariffRecord>,
    pub prf: Vec<PrfTariffRecord>,
    pub concordance: Concordance,
}

/// Counts for one window's resolution.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WindowStats {
    pub minimum: i32,
    pub target: i32,
    pub mfn_selected: usize,
    pub prf_selected: usize,
    #[serde(flatten)]
    pub merge: MergeStats,
}

impl TariffDataset {
    /// Read both bulk archives (concurrently) and the concordance file.
    pub fn load(inputs: &InputPaths, options: ArchiveOptions) -> Result<Self> {
        info!("Constructing MFN and PRF tariff sets and region information");
        let concordance = Concordance::load(&inputs.concordance)?;
        if concordance.is_empty() {
            warn!(
                "{} has no usable entries; every tariff row will be dropped",
                inputs.concordance.display()
            );
        }
        let (mfn, prf) = rayon::join(
            || read_bulk_archive(&inputs.mfn, options, parse_mfn),
            || read_bulk_archive(&inputs.prf, options, parse_prf),
        );
        let dataset = Self {
            mfn: mfn?,
            prf: prf?,
            concordance,
        };
        info!(
            "Loaded {} MFN rows, {} PRF rows, {} concordance entries",
            dataset.mfn.len(),
            dataset.prf.len(),
            dataset.concordance.len()
        );
        Ok(dataset)
    }

    /// Select → resolve → merge for a single window.
    pub fn resolve_window(
        &self,
        window: YearWindow,
    ) -> (Vec<BilateralTariffRecord>, WindowStats) {
        let mfn = select(&self.mfn, window);
        let prf = select(&self.prf, window);
        let mfn_resolved = resolve_mfn(&mfn, &self.concordance);
        let prf_resolved = resolve_prf(&prf, &self.concordance);
        let (records, merge) = merge_with_stats(&self.concordance, &mfn_resolved, &prf_resolved);

        let stats = WindowStats {
            minimum: window.minimum,
            target: window.target,
            mfn_selected: mfn.len(),
            prf_selected: prf.len(),
            merge,
        };
        info!(
            "Window {window}: {} MFN and {} PRF rows selected, {} bilateral rows ({} shadowed)",
            stats.mfn_selected, stats.prf_selected, merge.emitted, merge.shadowed
        );
        (records, stats)
    }

    pub fn overview(&self) -> DatasetOverview {
        DatasetOverview {
            mfn: SeriesOverview::of(&self.mfn),
            prf: SeriesOverview::of(&self.prf),
            concordance_entries: self.concordance.len(),
            regions: {
                let mut regions: Vec<String> = self
                    .concordance
                    .records()
                    .iter()
                    .map(|c| c.region.clone())
                    .collect();
                regions.sort();
                regions.dedup();
                regions
            },
        }
    }
}

// ── Overview ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SeriesOverview {
    pub rows: usize,
    pub series: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_year: Option<i32>,
    pub rows_without_year: usize,
}

impl SeriesOverview {
    fn of<R: TariffRecord>(records: &[R]) -> Self {
        let series: std::collections::HashSet<_> =
            records.iter().map(|r| r.grouping_key()).collect();
        let years = records.iter().filter_map(|r| r.year());
        Self {
            rows: records.len(),
            series: series.len(),
            first_year: years.clone().min(),
            last_year: years.max(),
            rows_without_year: records.iter().filter(|r| r.year().is_none()).count(),
        }
    }
}

/// Shape of the loaded inputs, printed by `inspect`.
#[derive(Debug, Serialize)]
pub struct DatasetOverview {
    pub mfn: SeriesOverview,
    pub prf: SeriesOverview,
    pub concordance_entries: usize,
    pub regions: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════
//  ORCHESTRATION
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub policy: ErrorPolicy,
    /// Resolve all windows concurrently before writing them in order.
    pub parallel_windows: bool,
}

#[derive(Debug, Serialize)]
pub struct WindowSummary {
    #[serde(flatten)]
    pub stats: WindowStats,
    /// Rows removed by the caller's row predicate.
    pub filtered_out: usize,
    pub written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub windows: Vec<WindowSummary>,
}

impl RunSummary {
    pub fn failures(&self) -> usize {
        self.windows.iter().filter(|w| w.error.is_some()).count()
    }
}

/// Resolve every window, keep rows accepted by `predicate`, and hand each
/// window's rows to `sink` in window order.
pub fn run<P, S>(
    dataset: &TariffDataset,
    windows: &[YearWindow],
    options: RunOptions,
    predicate: P,
    sink: &mut S,
) -> Result<RunSummary>
where
    P: Fn(&BilateralTariffRecord) -> bool + Sync,
    S: TariffSink + ?Sized,
{
    let resolve = |window: YearWindow| {
        let (records, stats) = dataset.resolve_window(window);
        let before = records.len();
        let kept: Vec<_> = records.into_par_iter().filter(|r| predicate(r)).collect();
        Resolved {
            window,
            filtered_out: before - kept.len(),
            records: kept,
            stats,
        }
    };

    let mut summary = RunSummary::default();
    if options.parallel_windows {
        let all: Vec<_> = windows.par_iter().map(|&w| resolve(w)).collect();
        for resolved in all {
            persist(resolved, options.policy, sink, &mut summary)?;
        }
    } else {
        for &window in windows {
            persist(resolve(window), options.policy, sink, &mut summary)?;
        }
    }
    Ok(summary)
}

struct Resolved {
    window: YearWindow,
    filtered_out: usize,
    records: Vec<BilateralTariffRecord>,
    stats: WindowStats,
}

fn persist<S: TariffSink + ?Sized>(
    resolved: Resolved,
    policy: ErrorPolicy,
    sink: &mut S,
    summary: &mut RunSummary,
) -> Result<()> {
    let Resolved {
        window,
        filtered_out,
        records,
        stats,
    } = resolved;
    let mut entry = WindowSummary {
        stats,
        filtered_out,
        written: 0,
        destination: None,
        error: None,
    };
    match sink.write(window, &records) {
        Ok(destination) => {
            entry.written = records.len();
            entry.destination = Some(destination);
        }
        Err(e) if policy == ErrorPolicy::ContinueOnError => {
            error!("Window {window} failed: {e}");
            entry.error = Some(e.to_string());
        }
        Err(e) => return Err(e),
    }
    summary.windows.push(entry);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TariffError;
    use tariff_types::{ConcordanceRecord, TariffKind};

    #[derive(Default)]
    struct MemorySink {
        written: Vec<(YearWindow, Vec<String>)>,
        fail_target: Option<i32>,
    }

    impl TariffSink for MemorySink {
        fn write(
            &mut self,
            window: YearWindow,
            records: &[BilateralTariffRecord],
        ) -> Result<String> {
            if self.fail_target == Some(window.target) {
                return Err(TariffError::InvalidArgument("sink refused".into()));
            }
            self.written
                .push((window, records.iter().map(|r| r.to_string()).collect()));
            Ok(format!("memory:{}", window.target))
        }
    }

    fn dataset() -> TariffDataset {
        TariffDataset {
            mfn: vec![MfnTariffRecord::new(
                Some("840".into()),
                Some(2000),
                Some("0101".into()),
                Some(5.0),
            )],
            prf: Vec::new(),
            concordance: Concordance::from_records(vec![
                ConcordanceRecord::new("840", "USA", "NA"),
                ConcordanceRecord::new("484", "MEX", "NA"),
            ]),
        }
    }

    fn windows(pairs: &[(i32, i32)]) -> Vec<YearWindow> {
        pairs
            .iter()
            .map(|&(m, t)| YearWindow::new(m, t).unwrap())
            .collect()
    }

    // ── resolve_window ───────────────────────────────────────────────

    #[test]
    fn test_end_to_end_single_row() {
        let (records, stats) = dataset().resolve_window(YearWindow::new(1995, 2005).unwrap());
        let lines: Vec<String> = records.iter().map(|r| r.to_string()).collect();
        assert_eq!(lines, vec!["USA|MEX|NA|NA|MFN|2000|0101|5"]);
        assert_eq!(stats.mfn_selected, 1);
        assert_eq!(stats.merge.emitted, 1);
    }

    #[test]
    fn test_window_before_data_is_empty() {
        let (records, _) = dataset().resolve_window(YearWindow::new(1990, 1999).unwrap());
        assert!(records.is_empty());
    }

    #[test]
    fn test_prf_falls_back_to_latest_year_in_window() {
        let mut data = dataset();
        let usa_mex = |year: i32, rate: f64| {
            PrfTariffRecord::new(
                Some("840".into()),
                Some("484".into()),
                Some(year),
                Some("0101".into()),
                Some(rate),
            )
        };
        data.prf = vec![usa_mex(1996, 1.0), usa_mex(1998, 0.5)];
        let (records, _) = data.resolve_window(YearWindow::new(1995, 2011).unwrap());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, TariffKind::Prf);
        assert_eq!(records[0].tariff(), Some(0.5));
    }

    // ── run ──────────────────────────────────────────────────────────

    #[test]
    fn test_run_writes_each_window_in_order() {
        let mut sink = MemorySink::default();
        let summary = run(
            &dataset(),
            &windows(&[(1995, 2005), (1990, 1999)]),
            RunOptions::default(),
            |_| true,
            &mut sink,
        )
        .unwrap();
        assert_eq!(sink.written.len(), 2);
        assert_eq!(sink.written[0].0.target, 2005);
        assert_eq!(sink.written[1].1.len(), 0);
        assert_eq!(summary.windows[0].written, 1);
        assert_eq!(summary.windows[0].destination.as_deref(), Some("memory:2005"));
    }

    #[test]
    fn test_run_applies_predicate() {
        let mut sink = MemorySink::default();
        let summary = run(
            &dataset(),
            &windows(&[(1995, 2005)]),
            RunOptions::default(),
            |r| r.partner_alpha3 != "MEX",
            &mut sink,
        )
        .unwrap();
        assert!(sink.written[0].1.is_empty());
        assert_eq!(summary.windows[0].filtered_out, 1);
    }

    #[test]
    fn test_run_fail_fast_stops_at_first_error() {
        let mut sink = MemorySink {
            fail_target: Some(2001),
            ..MemorySink::default()
        };
        let result = run(
            &dataset(),
            &windows(&[(1995, 2001), (1995, 2005)]),
            RunOptions::default(),
            |_| true,
            &mut sink,
        );
        assert!(result.is_err());
        assert!(sink.written.is_empty());
    }

    #[test]
    fn test_run_continue_on_error_records_failure() {
        let mut sink = MemorySink {
            fail_target: Some(2001),
            ..MemorySink::default()
        };
        let options = RunOptions {
            policy: ErrorPolicy::ContinueOnError,
            parallel_windows: false,
        };
        let summary = run(
            &dataset(),
            &windows(&[(1995, 2001), (1995, 2005)]),
            options,
            |_| true,
            &mut sink,
        )
        .unwrap();
        assert_eq!(summary.failures(), 1);
        assert_eq!(sink.written.len(), 1);
        assert_eq!(sink.written[0].0.target, 2005);
    }

    #[test]
    fn test_parallel_windows_match_sequential() {
        let data = dataset();
        let ws = windows(&[(1995, 2005), (1990, 1999), (2000, 2000)]);
        let mut sequential = MemorySink::default();
        run(&data, &ws, RunOptions::default(), |_| true, &mut sequential).unwrap();
        let mut parallel = MemorySink::default();
        let options = RunOptions {
            parallel_windows: true,
            ..RunOptions::default()
        };
        run(&data, &ws, options, |_| true, &mut parallel).unwrap();
        assert_eq!(sequential.written, parallel.written);
    }

    // ── load ─────────────────────────────────────────────────────────

    #[test]
    fn test_load_with_empty_concordance_resolves_nothing() {
        use crate::archive::tests::write_bulk_archive;

        let dir = tempfile::tempdir().unwrap();
        let inputs = InputPaths {
            mfn: dir.path().join("mfn.zip"),
            prf: dir.path().join("prf.zip"),
            concordance: dir.path().join("regions.txt"),
        };
        write_bulk_archive(&inputs.mfn, &["h\nH0,840,2000,0101,x,1,1,5\n"]);
        write_bulk_archive(&inputs.prf, &["h\n"]);
        std::fs::write(&inputs.concordance, "numeric|alpha|region\n840||NA\n").unwrap();

        let data = TariffDataset::load(&inputs, ArchiveOptions::default()).unwrap();
        assert!(data.concordance.is_empty());
        assert_eq!(data.mfn.len(), 1);
        let (records, stats) = data.resolve_window(YearWindow::new(1995, 2005).unwrap());
        assert!(records.is_empty());
        assert_eq!(stats.merge.mfn_unresolved, 1);
    }

    // ── overview ─────────────────────────────────────────────────────

    #[test]
    fn test_overview_counts() {
        let overview = dataset().overview();
        assert_eq!(overview.mfn.rows, 1);
        assert_eq!(overview.mfn.first_year, Some(2000));
        assert_eq!(overview.prf.rows, 0);
        assert_eq!(overview.regions, vec!["NA".to_string()]);
    }
}
