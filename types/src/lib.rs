//! Record model shared by the tariff resolution engine.
//!
//! Every record is an immutable value built once while a dataset is read or
//! resolved. Equality follows the "absent never matches" rule: a comparison
//! involving a missing year, product, tariff or code is false, even against
//! another missing value. The types therefore implement `PartialEq` but not
//! `Eq`, the same way `f64` treats `NaN`.
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Comparison helpers ───────────────────────────────────────────────────

/// Case-insensitive comparison where an absent side never matches.
fn eq_ci(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => eq_ignore_case(a, b),
        _ => false,
    }
}

/// Case-insensitive string comparison used by every record comparator.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Per-char lowercase folding; `fold(a) == fold(b)` iff `eq_ignore_case(a, b)`.
fn fold(s: &str) -> String {
    s.chars().flat_map(char::to_lowercase).collect()
}

fn eq_present<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

struct Blank<'a, T>(&'a Option<T>);

impl<T: fmt::Display> fmt::Display for Blank<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v}"),
            None => Ok(()),
        }
    }
}

// ── Common fields ────────────────────────────────────────────────────────

/// Year, product and rate carried by every tariff record variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TariffFields {
    pub year: Option<i32>,
    pub product: Option<String>,
    /// Ad valorem rate applied to imports of the product.
    pub tariff: Option<f64>,
}

impl TariffFields {
    pub fn new(year: Option<i32>, product: Option<String>, tariff: Option<f64>) -> Self {
        Self {
            year,
            product,
            tariff,
        }
    }
}

impl PartialEq for TariffFields {
    fn eq(&self, other: &Self) -> bool {
        eq_present(self.year, other.year)
            && eq_ci(self.product.as_deref(), other.product.as_deref())
            && eq_present(self.tariff, other.tariff)
    }
}

/// `year|product|tariff`
impl fmt::Display for TariffFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            Blank(&self.year),
            Blank(&self.product),
            Blank(&self.tariff)
        )
    }
}

// ── Record capability ────────────────────────────────────────────────────

mod sealed {
    pub trait Sealed {}
}

/// Capability shared by the closed set of tariff record types.
///
/// The grouping key identifies "the same tariff series" across years. Each
/// type computes it from its own fields, so there is no way to ask one record
/// type for another's key.
pub trait TariffRecord: sealed::Sealed {
    fn fields(&self) -> &TariffFields;

    fn grouping_key(&self) -> (&str, &str);

    fn year(&self) -> Option<i32> {
        self.fields().year
    }

    fn product(&self) -> Option<&str> {
        self.fields().product.as_deref()
    }

    fn tariff(&self) -> Option<f64> {
        self.fields().tariff
    }
}

// ── MFN ──────────────────────────────────────────────────────────────────

/// Unilateral most-favored-nation rate published by an importer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfnTariffRecord {
    /// ISO 3166-1 numeric code of the importing country.
    pub reporter_numeric: Option<String>,
    #[serde(flatten)]
    pub fields: TariffFields,
}

impl MfnTariffRecord {
    pub fn new(
        reporter_numeric: Option<String>,
        year: Option<i32>,
        product: Option<String>,
        tariff: Option<f64>,
    ) -> Self {
        Self {
            reporter_numeric,
            fields: TariffFields::new(year, product, tariff),
        }
    }
}

impl sealed::Sealed for MfnTariffRecord {}

impl TariffRecord for MfnTariffRecord {
    fn fields(&self) -> &TariffFields {
        &self.fields
    }

    /// Keyed by importer only.
    fn grouping_key(&self) -> (&str, &str) {
        (self.reporter_numeric.as_deref().unwrap_or(""), "")
    }
}

impl PartialEq for MfnTariffRecord {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
            && eq_ci(
                self.reporter_numeric.as_deref(),
                other.reporter_numeric.as_deref(),
            )
    }
}

/// `reporter_numeric|year|product|tariff`
impl fmt::Display for MfnTariffRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", Blank(&self.reporter_numeric), self.fields)
    }
}

// ── PRF ──────────────────────────────────────────────────────────────────

/// Bilateral preferential rate the reporter applies to the partner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrfTariffRecord {
    pub reporter_numeric: Option<String>,
    pub partner_numeric: Option<String>,
    #[serde(flatten)]
    pub fields: TariffFields,
}

impl PrfTariffRecord {
    pub fn new(
        reporter_numeric: Option<String>,
        partner_numeric: Option<String>,
        year: Option<i32>,
        product: Option<String>,
        tariff: Option<f64>,
    ) -> Self {
        Self {
            reporter_numeric,
            partner_numeric,
            fields: TariffFields::new(year, product, tariff),
        }
    }
}

impl sealed::Sealed for PrfTariffRecord {}

impl TariffRecord for PrfTariffRecord {
    fn fields(&self) -> &TariffFields {
        &self.fields
    }

    fn grouping_key(&self) -> (&str, &str) {
        (
            self.reporter_numeric.as_deref().unwrap_or(""),
            self.partner_numeric.as_deref().unwrap_or(""),
        )
    }
}

impl PartialEq for PrfTariffRecord {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
            && eq_ci(
                self.reporter_numeric.as_deref(),
                other.reporter_numeric.as_deref(),
            )
            && eq_ci(
                self.partner_numeric.as_deref(),
                other.partner_numeric.as_deref(),
            )
    }
}

/// `reporter_numeric|partner_numeric|year|product|tariff`
impl fmt::Display for PrfTariffRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            Blank(&self.reporter_numeric),
            Blank(&self.partner_numeric),
            self.fields
        )
    }
}

// ── Concordance ──────────────────────────────────────────────────────────

/// One country's mapping from numeric code to alpha code and region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcordanceRecord {
    pub numeric3: String,
    pub alpha3: String,
    /// User-defined analysis region.
    pub region: String,
}

impl ConcordanceRecord {
    pub fn new(
        numeric3: impl Into<String>,
        alpha3: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            numeric3: numeric3.into(),
            alpha3: alpha3.into(),
            region: region.into(),
        }
    }

    /// True when both the alpha code and region are non-empty.
    pub fn is_resolved(&self) -> bool {
        !self.alpha3.is_empty() && !self.region.is_empty()
    }
}

impl fmt::Display for ConcordanceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.numeric3, self.alpha3, self.region)
    }
}

// ── Bilateral ────────────────────────────────────────────────────────────

/// Where a resolved bilateral rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TariffKind {
    #[serde(rename = "MFN")]
    Mfn,
    #[serde(rename = "PRF")]
    Prf,
}

impl TariffKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mfn => "MFN",
            Self::Prf => "PRF",
        }
    }
}

impl fmt::Display for TariffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate the reporter applies to imports of a product from the partner, after
/// both countries were resolved to alpha codes and regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BilateralTariffRecord {
    pub reporter_alpha3: String,
    pub partner_alpha3: String,
    pub reporter_region: String,
    pub partner_region: String,
    #[serde(rename = "type")]
    pub kind: TariffKind,
    #[serde(flatten)]
    pub fields: TariffFields,
}

/// Union key of a bilateral record: reporter, partner and product, folded to
/// lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub reporter_alpha3: String,
    pub partner_alpha3: String,
    pub product: String,
}

impl BilateralTariffRecord {
    /// Build from a reporter and partner concordance entry.
    pub fn from_parts(
        reporter: &ConcordanceRecord,
        partner: &ConcordanceRecord,
        kind: TariffKind,
        fields: &TariffFields,
    ) -> Self {
        Self {
            reporter_alpha3: reporter.alpha3.clone(),
            partner_alpha3: partner.alpha3.clone(),
            reporter_region: reporter.region.clone(),
            partner_region: partner.region.clone(),
            kind,
            fields: fields.clone(),
        }
    }

    /// Key used by the PRF/MFN union. `None` when the product is absent:
    /// such a row never collides with another.
    pub fn dedup_key(&self) -> Option<DedupKey> {
        let product = self.fields.product.as_deref()?;
        Some(DedupKey {
            reporter_alpha3: fold(&self.reporter_alpha3),
            partner_alpha3: fold(&self.partner_alpha3),
            product: fold(product),
        })
    }
}

impl sealed::Sealed for BilateralTariffRecord {}

impl TariffRecord for BilateralTariffRecord {
    fn fields(&self) -> &TariffFields {
        &self.fields
    }

    fn grouping_key(&self) -> (&str, &str) {
        (&self.reporter_alpha3, &self.partner_alpha3)
    }
}

impl PartialEq for BilateralTariffRecord {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
            && eq_ignore_case(&self.reporter_alpha3, &other.reporter_alpha3)
            && eq_ignore_case(&self.partner_alpha3, &other.partner_alpha3)
            && eq_ignore_case(&self.reporter_region, &other.reporter_region)
            && eq_ignore_case(&self.partner_region, &other.partner_region)
            && self.kind == other.kind
    }
}

/// `reporter_alpha3|partner_alpha3|reporter_region|partner_region|type|year|product|tariff`
impl fmt::Display for BilateralTariffRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            self.reporter_alpha3,
            self.partner_alpha3,
            self.reporter_region,
            self.partner_region,
            self.kind,
            self.fields
        )
    }
}
