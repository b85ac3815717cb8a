use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::models::placeholders::{LIGNES, TOTAL_HT};
use crate::services::line_items::parse_decimal;

/// Scalar value of a record field. Spreadsheet and form input always
/// produce text; numbers, booleans and nulls only appear in history files
/// written by older tools, which stored raw cell values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Null => true,
            FieldValue::Number(_) | FieldValue::Bool(_) => false,
        }
    }

    /// Numeric reading: numbers as is, text with `,` or `.` decimals.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => parse_decimal(s),
            FieldValue::Bool(_) | FieldValue::Null => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Null => Ok(()),
        }
    }
}

/// Any JSON scalar read as text (`2025` -> `"2025"`, `null` -> `""`).
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    FieldValue::deserialize(deserializer).map(|v| v.to_string())
}

/// Any JSON scalar read as a number, 0 when it is not one.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    FieldValue::deserialize(deserializer).map(|v| v.as_number().unwrap_or(0.0))
}

fn lenient_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    lenient_number(deserializer).map(|n| if n.is_finite() && n > 0.0 { n as u32 } else { 0 })
}

fn lenient_total<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    FieldValue::deserialize(deserializer).map(|v| v.as_number())
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

/// One billed prestation. `montant` is always `quantite * prix_unitaire`.
///
/// Reading is lenient: history files may hold numbers where text is
/// expected and the other way round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItem {
    #[serde(rename = "numero", deserialize_with = "lenient_index")]
    pub number: u32,
    #[serde(deserialize_with = "lenient_text")]
    pub designation: String,
    #[serde(rename = "type_prestation", deserialize_with = "lenient_text")]
    pub kind: String,
    #[serde(rename = "unite", deserialize_with = "lenient_text")]
    pub unit: String,
    #[serde(rename = "quantite", deserialize_with = "lenient_number")]
    pub quantity: f64,
    #[serde(rename = "prix_unitaire", deserialize_with = "lenient_number")]
    pub unit_price: f64,
    #[serde(rename = "montant", deserialize_with = "lenient_number")]
    pub amount: f64,
}

/// Everything needed to fill one invoice template.
///
/// Serializes as the flat mapping stored in history files:
/// scalar placeholders at the top level, plus `lignes` and `total_ht`
/// when at least one line item was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    #[serde(rename = "lignes", default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<LineItem>,
    #[serde(
        default,
        deserialize_with = "lenient_total",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_ht: Option<f64>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl InvoiceRecord {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text of a scalar field, empty when absent.
    pub fn text(&self, name: &str) -> String {
        self.fields.get(name).map(|v| v.to_string()).unwrap_or_default()
    }

    /// True when `name` is present verbatim, including `lignes`/`total_ht`.
    pub fn contains(&self, name: &str) -> bool {
        match name {
            LIGNES => !self.lines.is_empty(),
            TOTAL_HT => self.total_ht.is_some(),
            _ => self.fields.contains_key(name),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Attach line items and recompute the total. No-op for an empty list.
    pub fn set_lines(&mut self, lines: Vec<LineItem>) {
        if lines.is_empty() {
            return;
        }
        self.total_ht = Some(lines.iter().map(|l| l.amount).sum());
        self.lines = lines;
    }
}

/// One generated document, as persisted in the history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// `YYYY-MM-DD HH:MM:SS`, local time.
    pub datetime: String,
    pub file: String,
    #[serde(default)]
    pub meta: InvoiceRecord,
}

/// A record of a batch that could not be rendered, or whose document was
/// written but not recorded in the history.
#[derive(Debug, Clone, Serialize)]
pub struct FailedRecord {
    /// 1-based data row (the header row is not counted).
    pub row: usize,
    pub identifier: String,
    pub error: String,
}

/// Outcome of a batch generation: files written so far are kept even when
/// later rows fail.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub generated: Vec<PathBuf>,
    pub failures: Vec<FailedRecord>,
    /// Generated documents missing from the history.
    pub history_failures: Vec<FailedRecord>,
}
