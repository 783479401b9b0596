//! Core domain model for Lavoura.
//!
//! Shared, I/O-free types: the raw SIDRA row shape, the normalized and joined
//! representations used by the ingestion pipeline, and the persisted record
//! the rest of the system reads.

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "lavoura-core";

/// Earliest production year the SIDRA table carries data for.
pub const FIRST_SUPPORTED_YEAR: i32 = 2018;

/// Latest year we accept: SIDRA publishes a year only once it has closed.
pub fn latest_supported_year() -> i32 {
    Utc::now().year() - 1
}

/// The two crop metrics ingested per municipality per year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    HarvestedArea,
    QuantityProduced,
}

impl Metric {
    /// SIDRA variable code for table 5457 (`v/216` area, `v/214` quantity).
    pub fn variable_code(&self) -> u32 {
        match self {
            Metric::HarvestedArea => 216,
            Metric::QuantityProduced => 214,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::HarvestedArea => "harvested_area",
            Metric::QuantityProduced => "quantity_produced",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row exactly as SIDRA returns it: every field string-typed.
///
/// The first element of every response repeats the column labels ("Valor",
/// "Município (Código)", ...) instead of data; normalization discards it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawMetricRow {
    #[serde(rename = "NC")]
    pub territorial_level_code: String,
    #[serde(rename = "NN")]
    pub territorial_level: String,
    #[serde(rename = "MC")]
    pub unit_code: String,
    #[serde(rename = "MN")]
    pub unit: String,
    #[serde(rename = "V")]
    pub value: String,
    #[serde(rename = "D1C")]
    pub municipality_code: String,
    #[serde(rename = "D1N")]
    pub municipality_name: String,
    #[serde(rename = "D2C")]
    pub variable_code: String,
    #[serde(rename = "D2N")]
    pub variable_name: String,
    #[serde(rename = "D3C")]
    pub year_code: String,
    #[serde(rename = "D3N")]
    pub year_name: String,
    #[serde(rename = "D4C")]
    pub product_code: String,
    #[serde(rename = "D4N")]
    pub product_name: String,
}

/// One metric value per municipality after coercion to numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMetricRow {
    pub municipality_id: i64,
    pub year: i32,
    pub value: i64,
}

/// One municipality-year record carrying both metrics, the unit of
/// reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedProductionRow {
    pub municipality_id: i64,
    pub year: i32,
    pub harvested_area: i64,
    pub quantity_produced: i64,
}

/// Persisted production row, primary key `(municipality_id, year)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionRecord {
    pub municipality_id: i64,
    pub year: i32,
    pub area: i64,
    pub quantity: i64,
}

impl From<JoinedProductionRow> for ProductionRecord {
    fn from(row: JoinedProductionRow) -> Self {
        Self {
            municipality_id: row.municipality_id,
            year: row.year,
            area: row.harvested_area,
            quantity: row.quantity_produced,
        }
    }
}

/// Minimal write set that converges storage to a year's joined dataset.
///
/// Computed purely from the joined rows and the rows already persisted for the
/// year; applied by the store as a single transaction. Never carries deletes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub inserts: Vec<JoinedProductionRow>,
    pub updates: Vec<JoinedProductionRow>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

/// Counts reported after a plan has been applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub updated: usize,
}

/// Row of the precomputed state productivity view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateProductivity {
    pub state: String,
    pub productivity: f64,
}

/// Municipality reference data, seeded from the IBGE dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Municipality {
    pub state_id: i32,
    pub state: String,
    pub id: i64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_variable_codes_match_sidra_table_5457() {
        assert_eq!(Metric::HarvestedArea.variable_code(), 216);
        assert_eq!(Metric::QuantityProduced.variable_code(), 214);
    }

    #[test]
    fn raw_row_deserializes_from_sidra_field_names() {
        let json = r#"{
            "NC": "6", "NN": "Município", "MC": "1006", "MN": "Toneladas",
            "V": "1350", "D1C": "1100015", "D1N": "Alta Floresta D'Oeste - RO",
            "D2C": "214", "D2N": "Quantidade produzida",
            "D3C": "2018", "D3N": "2018",
            "D4C": "40124", "D4N": "Soja (em grão)"
        }"#;
        let row: RawMetricRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.value, "1350");
        assert_eq!(row.municipality_code, "1100015");
        assert_eq!(row.year_code, "2018");
    }
}
