use std::collections::HashMap;
use std::fmt;

use rayon::prelude::*;
use tariff_types::TariffRecord;

use crate::error::{Result, TariffError};

/// Inclusive `[minimum, target]` year range for one resolution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct YearWindow {
    /// Oldest year accepted as a fallback.
    pub minimum: i32,
    pub target: i32,
}

impl YearWindow {
    pub fn new(minimum: i32, target: i32) -> Result<Self> {
        if minimum > target {
            return Err(TariffError::InvalidArgument(format!(
                "year window minimum {minimum} is after target {target}"
            )));
        }
        Ok(Self { minimum, target })
    }

    /// Absent years are never inside a window.
    pub fn contains(&self, year: Option<i32>) -> bool {
        year.is_some_and(|y| self.minimum <= y && y <= self.target)
    }
}

impl fmt::Display for YearWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.minimum, self.target)
    }
}

/// Keep, for every grouping key, the records of the latest year inside the
/// window.
///
/// This is a per-series "nearest year at or before target" lookup: when the
/// target year is missing for a series, its most recent earlier year (no
/// older than `minimum`) stands in. Several records sharing the latest year
/// of a series are all kept. Output preserves input order.
pub fn select<R>(records: &[R], window: YearWindow) -> Vec<&R>
where
    R: TariffRecord + Sync,
{
    let mut latest: HashMap<(&str, &str), i32> = HashMap::new();
    for record in records {
        if let Some(year) = record.year()
            && window.contains(Some(year))
        {
            latest
                .entry(record.grouping_key())
                .and_modify(|y| *y = (*y).max(year))
                .or_insert(year);
        }
    }

    records
        .par_iter()
        .filter(|record| {
            record
                .year()
                .is_some_and(|year| latest.get(&record.grouping_key()) == Some(&year))
        })
        .collect()
}
