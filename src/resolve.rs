use rayon::prelude::*;
use tariff_types::{ConcordanceRecord, MfnTariffRecord, PrfTariffRecord};

use crate::concordance::Concordance;

/// An MFN record joined to its reporter's concordance entry, if any.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedMfn<'a> {
    pub record: &'a MfnTariffRecord,
    pub reporter: Option<&'a ConcordanceRecord>,
}

/// A PRF record joined to both countries' concordance entries, if any.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPrf<'a> {
    pub record: &'a PrfTariffRecord,
    pub reporter: Option<&'a ConcordanceRecord>,
    pub partner: Option<&'a ConcordanceRecord>,
}

/// Left outer join of `code` against the concordance: one entry per match,
/// or a single `None` when nothing matches.
fn left_join<'a>(
    concordance: &'a Concordance,
    code: Option<&str>,
) -> Vec<Option<&'a ConcordanceRecord>> {
    let matches: Vec<_> = concordance.lookup(code).map(Some).collect();
    if matches.is_empty() {
        vec![None]
    } else {
        matches
    }
}

/// Attach the reporter's alpha code and region to each MFN record.
///
/// Unmatched rows are kept with `reporter: None`; the merger decides what to
/// do with them.
pub fn resolve_mfn<'a>(
    records: &[&'a MfnTariffRecord],
    concordance: &'a Concordance,
) -> Vec<ResolvedMfn<'a>> {
    records
        .par_iter()
        .flat_map_iter(|&record| {
            left_join(concordance, record.reporter_numeric.as_deref())
                .into_iter()
                .map(move |reporter| ResolvedMfn { record, reporter })
        })
        .collect()
}

/// Attach alpha codes and regions for both the reporter and the partner.
pub fn resolve_prf<'a>(
    records: &[&'a PrfTariffRecord],
    concordance: &'a Concordance,
) -> Vec<ResolvedPrf<'a>> {
    records
        .par_iter()
        .flat_map_iter(|&record| {
            let partners = left_join(concordance, record.partner_numeric.as_deref());
            left_join(concordance, record.reporter_numeric.as_deref())
                .into_iter()
                .flat_map(move |reporter| {
                    partners.clone().into_iter().map(move |partner| ResolvedPrf {
                        record,
                        reporter,
                        partner,
                    })
                })
        })
        .collect()
}
