use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tariff_types::ConcordanceRecord;
use tracing::{debug, info};

use crate::error::{Result, TariffError};

/// Country-code lookup table: numeric code → alpha code and region.
///
/// Built once per run and only read afterwards, so it is shared by reference
/// across worker threads.
#[derive(Debug, Clone, Default)]
pub struct Concordance {
    records: Vec<ConcordanceRecord>,
    by_numeric: HashMap<String, Vec<usize>>,
}

impl Concordance {
    /// Index `records` as given. Duplicate numeric codes are kept, so a
    /// lookup on such a code fans out to every match.
    pub fn from_records(records: Vec<ConcordanceRecord>) -> Self {
        let mut by_numeric: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            by_numeric
                .entry(record.numeric3.clone())
                .or_default()
                .push(idx);
        }
        Self {
            records,
            by_numeric,
        }
    }

    /// Load a pipe-delimited `numeric3|alpha3|region` file with a header row.
    ///
    /// Rows missing an alpha code or region are dropped, as are exact
    /// duplicates (first occurrence wins).
    pub fn load(path: &Path) -> Result<Self> {
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| TariffError::io(path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'|')
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(BufReader::new(file));

        let mut rows = Vec::new();
        let mut dropped = 0usize;
        for (idx, result) in reader.records().enumerate() {
            let row = result.map_err(|source| TariffError::Csv {
                name: name.clone(),
                source,
            })?;
            let line = row.position().map(|p| p.line()).unwrap_or(idx as u64 + 2);
            if row.len() < 3 {
                return Err(TariffError::MalformedRow {
                    source_name: name,
                    line,
                    column: row.len(),
                    value: row.iter().collect::<Vec<_>>().join("|"),
                    reason: "expected numeric3|alpha3|region".to_string(),
                });
            }
            let record = ConcordanceRecord::new(&row[0], &row[1], &row[2]);
            if record.is_resolved() {
                rows.push(record);
            } else {
                dropped += 1;
            }
        }

        let records = distinct(rows);
        if dropped > 0 {
            debug!("{name}: dropped {dropped} rows without alpha code or region");
        }
        info!("Loaded {} concordance entries from {name}", records.len());
        Ok(Self::from_records(records))
    }

    /// Every entry matching `numeric`. Absent codes match nothing.
    pub fn lookup(&self, numeric: Option<&str>) -> impl Iterator<Item = &ConcordanceRecord> {
        numeric
            .and_then(|n| self.by_numeric.get(n))
            .into_iter()
            .flatten()
            .map(|&idx| &self.records[idx])
    }

    pub fn records(&self) -> &[ConcordanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Drop exact duplicates, keeping first-seen order.
pub fn distinct(records: Vec<ConcordanceRecord>) -> Vec<ConcordanceRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.clone()))
        .collect()
}
