use csv::StringRecord;
use tariff_types::{MfnTariffRecord, PrfTariffRecord};

use crate::error::{Result, TariffError};

// ── Column layout of the bulk downloads ────────────────────────────
//
// MFN applied rates (one row per reporter/year/product):
//   NomenCode, Reporter_ISO_N, Year, ProductCode, ..., SimpleAverage, ...
//   column 1 = reporter, 2 = year, 3 = product, 7 = simple average rate
//
// PRF applied rates (one row per reporter/partner/year/product):
//   NomenCode, Reporter_ISO_N, Year, ProductCode, Partner, ..., SimpleAverage
//   column 1 = reporter, 2 = year, 3 = product, 4 = partner, 9 = simple average

const MFN_REPORTER: usize = 1;
const MFN_YEAR: usize = 2;
const MFN_PRODUCT: usize = 3;
const MFN_TARIFF: usize = 7;

const PRF_REPORTER: usize = 1;
const PRF_YEAR: usize = 2;
const PRF_PRODUCT: usize = 3;
const PRF_PARTNER: usize = 4;
const PRF_TARIFF: usize = 9;

/// One delimited line read from an archive entry, with its position for
/// error reporting. Values are already trimmed.
#[derive(Debug)]
pub struct RawRow<'a> {
    pub source_name: &'a str,
    /// 1-based line number within the entry.
    pub line: u64,
    pub values: &'a StringRecord,
}

impl RawRow<'_> {
    fn malformed(&self, column: usize, value: &str, reason: impl Into<String>) -> TariffError {
        TariffError::MalformedRow {
            source_name: self.source_name.to_string(),
            line: self.line,
            column,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn field(&self, column: usize) -> Result<&str> {
        self.values.get(column).ok_or_else(|| {
            self.malformed(
                column,
                "",
                format!("row has only {} columns", self.values.len()),
            )
        })
    }

    /// Empty → absent.
    fn text(&self, column: usize) -> Result<Option<String>> {
        let raw = self.field(column)?;
        Ok((!raw.is_empty()).then(|| raw.to_string()))
    }

    fn int(&self, column: usize) -> Result<Option<i32>> {
        let raw = self.field(column)?;
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<i32>()
            .map(Some)
            .map_err(|e| self.malformed(column, raw, format!("expected an integer year: {e}")))
    }

    fn float(&self, column: usize) -> Result<Option<f64>> {
        let raw = self.field(column)?;
        if raw.is_empty() {
            return Ok(None);
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            Ok(_) => Err(self.malformed(column, raw, "rate is not a finite number")),
            Err(e) => Err(self.malformed(column, raw, format!("expected a decimal rate: {e}"))),
        }
    }
}

/// Parse a row of the MFN download.
///
/// The product code is kept verbatim (it may be empty but is never absent).
pub fn parse_mfn(row: &RawRow<'_>) -> Result<MfnTariffRecord> {
    Ok(MfnTariffRecord::new(
        row.text(MFN_REPORTER)?,
        row.int(MFN_YEAR)?,
        Some(row.field(MFN_PRODUCT)?.to_string()),
        row.float(MFN_TARIFF)?,
    ))
}

/// Parse a row of the PRF download.
pub fn parse_prf(row: &RawRow<'_>) -> Result<PrfTariffRecord> {
    Ok(PrfTariffRecord::new(
        row.text(PRF_REPORTER)?,
        row.text(PRF_PARTNER)?,
        row.int(PRF_YEAR)?,
        Some(row.field(PRF_PRODUCT)?.to_string()),
        row.float(PRF_TARIFF)?,
    ))
}
