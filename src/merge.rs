use std::collections::HashSet;

use rayon::prelude::*;
use tariff_types::{BilateralTariffRecord, ConcordanceRecord, TariffKind, eq_ignore_case};

use crate::concordance::Concordance;
use crate::resolve::{ResolvedMfn, ResolvedPrf};

/// Row counts observed while merging one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MergeStats {
    pub prf_rows: usize,
    /// PRF rows dropped because a country did not resolve.
    pub prf_unresolved: usize,
    /// PRF rows dropped because reporter and partner are the same country.
    pub prf_self_pairs: usize,
    pub mfn_rows: usize,
    /// MFN rows dropped because the reporter did not resolve.
    pub mfn_unresolved: usize,
    /// Rows produced by the bilateral expansion of MFN rates.
    pub mfn_expanded: usize,
    /// Rows discarded by the union (MFN rows shadowed by PRF, or repeats).
    pub shadowed: usize,
    pub emitted: usize,
}

fn resolved(side: Option<&ConcordanceRecord>) -> Option<&ConcordanceRecord> {
    side.filter(|c| c.is_resolved())
}

/// PRF rows whose reporter and partner both resolved to different
/// countries, as bilateral records.
pub fn prf_branch(rows: &[ResolvedPrf<'_>]) -> Vec<BilateralTariffRecord> {
    rows.par_iter()
        .filter_map(|row| {
            let reporter = resolved(row.reporter)?;
            let partner = resolved(row.partner)?;
            if eq_ignore_case(&reporter.alpha3, &partner.alpha3) {
                return None;
            }
            Some(BilateralTariffRecord::from_parts(
                reporter,
                partner,
                TariffKind::Prf,
                &row.record.fields,
            ))
        })
        .collect()
}

/// Expand each resolved MFN row into one bilateral record per concordance
/// partner, skipping the reporter itself.
///
/// This is reporters × partners and dominates the cost of a run.
pub fn mfn_branch(
    rows: &[ResolvedMfn<'_>],
    concordance: &Concordance,
) -> Vec<BilateralTariffRecord> {
    rows.par_iter()
        .filter_map(|row| resolved(row.reporter).map(|reporter| (row, reporter)))
        .flat_map_iter(move |(row, reporter)| {
            concordance
                .records()
                .iter()
                .filter(|partner| partner.is_resolved())
                .filter(move |partner| !eq_ignore_case(&reporter.alpha3, &partner.alpha3))
                .map(move |partner| {
                    BilateralTariffRecord::from_parts(
                        reporter,
                        partner,
                        TariffKind::Mfn,
                        &row.record.fields,
                    )
                })
        })
        .collect()
}

/// Distinct union by reporter, partner and product (case-insensitive).
///
/// `primary` rows come first and win every collision; within each input the
/// first occurrence wins. Rows without a product never collide.
pub fn union(
    primary: Vec<BilateralTariffRecord>,
    secondary: Vec<BilateralTariffRecord>,
) -> Vec<BilateralTariffRecord> {
    let mut seen = HashSet::with_capacity(primary.len() + secondary.len());
    primary
        .into_iter()
        .chain(secondary)
        .filter(|record| match record.dedup_key() {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect()
}

/// Resolve the bilateral tariff set: PRF rates where present, the
/// importer's MFN rate for every other partner.
pub fn merge(
    concordance: &Concordance,
    mfn: &[ResolvedMfn<'_>],
    prf: &[ResolvedPrf<'_>],
) -> Vec<BilateralTariffRecord> {
    merge_with_stats(concordance, mfn, prf).0
}

pub fn merge_with_stats(
    concordance: &Concordance,
    mfn: &[ResolvedMfn<'_>],
    prf: &[ResolvedPrf<'_>],
) -> (Vec<BilateralTariffRecord>, MergeStats) {
    let preferential = prf_branch(prf);
    let expanded = mfn_branch(mfn, concordance);

    let prf_unresolved = prf
        .iter()
        .filter(|row| resolved(row.reporter).is_none() || resolved(row.partner).is_none())
        .count();
    let mut stats = MergeStats {
        prf_rows: prf.len(),
        prf_unresolved,
        prf_self_pairs: prf.len() - prf_unresolved - preferential.len(),
        mfn_rows: mfn.len(),
        mfn_unresolved: mfn
            .iter()
            .filter(|row| resolved(row.reporter).is_none())
            .count(),
        mfn_expanded: expanded.len(),
        ..MergeStats::default()
    };

    let candidates = preferential.len() + expanded.len();
    let records = union(preferential, expanded);
    stats.shadowed = candidates - records.len();
    stats.emitted = records.len();
    (records, stats)
}
