use calamine::{open_workbook_auto, Data, DataType, Range, Reader};
use rust_xlsxwriter::{Format, FormatAlign, Workbook, Worksheet, XlsxError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{FactureError, Result};
use crate::models::placeholders::{
    spreadsheet_template_columns, ExampleCell, CODE_PROJET, CODE_SOUS_PROJET,
    HISTORY_EXPORT_COLUMNS, NUMERO_OTFI, SOMME_FACTURE, SPREADSHEET_EXAMPLE_ROW,
};
use crate::services::normalize::normalize_key;
use crate::services::record_builder::build_record;
use crate::types::{FieldValue, HistoryEntry, InvoiceRecord};

/// Cell as text: empty cells become "", dates `JJ/MM/AAAA`.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        _ => match cell.as_datetime() {
            Some(dt) if dt.time() == chrono::NaiveTime::MIN => dt.format("%d/%m/%Y").to_string(),
            Some(dt) => dt.format("%d/%m/%Y %H:%M:%S").to_string(),
            None => cell.to_string(),
        },
    }
}

/// First sheet of an invoice workbook, header row already normalized.
///
/// Records are built on demand by [`SheetSource::records`]; calling it again
/// restarts from the first data row.
pub struct SheetSource {
    path: PathBuf,
    range: Range<Data>,
    headers: Vec<String>,
}

impl SheetSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FactureError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let spreadsheet_err = |detail: String| FactureError::Spreadsheet {
            path: path.to_path_buf(),
            detail,
        };
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| spreadsheet_err(format!("Could not open Excel file: {}", e)))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| spreadsheet_err("Workbook has no sheet".to_string()))?
            .map_err(|e| spreadsheet_err(format!("Sheet not readable: {}", e)))?;
        let (_, width) = range.get_size();
        let headers = (0..width)
            .map(|col| {
                range
                    .get((0, col))
                    .map(|c| normalize_key(&cell_to_string(c)))
                    .unwrap_or_default()
            })
            .collect();
        Ok(SheetSource {
            path: path.to_path_buf(),
            range,
            headers,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Normalized column keys, in sheet order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of data rows (header excluded).
    pub fn len(&self) -> usize {
        self.range.get_size().0.saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw row `row` (0-based, header excluded) keyed by normalized header.
    pub fn raw_row(&self, row: usize) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (col, key) in self.headers.iter().enumerate() {
            if key.is_empty() {
                continue;
            }
            let value = self
                .range
                .get((row + 1, col))
                .map(cell_to_string)
                .unwrap_or_default();
            // Duplicate headers: first non-empty cell wins.
            let slot = out.entry(key.clone()).or_insert_with(String::new);
            if slot.is_empty() {
                *slot = value;
            }
        }
        out
    }

    pub fn records(&self) -> SheetRecords<'_> {
        SheetRecords {
            source: self,
            next_row: 0,
        }
    }
}

/// Lazy iterator of one [`InvoiceRecord`] per data row.
pub struct SheetRecords<'a> {
    source: &'a SheetSource,
    next_row: usize,
}

impl Iterator for SheetRecords<'_> {
    type Item = InvoiceRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_row >= self.source.len() {
            return None;
        }
        let raw = self.source.raw_row(self.next_row);
        self.next_row += 1;
        Some(build_record(&raw))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.source.len().saturating_sub(self.next_row);
        (left, Some(left))
    }
}

/// Remove characters that can corrupt the sheet XML. Drops control chars
/// except tab, newline and CR.
fn sanitize_cell(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let u = c as u32;
            c == '\t' || c == '\n' || c == '\r' || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect()
}

/// Estimate column width from text length (char count × 1.2, clamped 10–50).
fn estimate_text_width(text: &str) -> f64 {
    let w = text.chars().count() as f64 * 1.2;
    w.clamp(10.0, 50.0)
}

fn header_format() -> Format {
    Format::new()
        .set_bold()
        .set_background_color(rust_xlsxwriter::Color::RGB(0x2563EB))
        .set_font_color(rust_xlsxwriter::Color::RGB(0xFFFFFF))
}

fn amount_format() -> Format {
    Format::new()
        .set_num_format("#,##0.00")
        .set_align(FormatAlign::Right)
}

fn write_headers(worksheet: &mut Worksheet, headers: &[&str]) -> std::result::Result<(), XlsxError> {
    let format = header_format();
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, sanitize_cell(header), &format)?;
        worksheet.set_column_width(col as u16, estimate_text_width(header))?;
    }
    worksheet.set_freeze_panes(1, 0)?;
    Ok(())
}

/// Make sure the path ends in `.xlsx`.
fn xlsx_path(path: &Path) -> PathBuf {
    let mut pb = path.to_path_buf();
    if pb.extension().and_then(|e| e.to_str()) != Some("xlsx") {
        pb.set_extension("xlsx");
    }
    pb
}

fn save_workbook(workbook: &mut Workbook, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| FactureError::OutputWriteFailed {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    workbook.save(path)?;
    Ok(())
}

/// Write the blank invoice workbook users fill for batch generation:
/// every recognized column plus one example row. Returns the saved path.
pub fn export_spreadsheet_template(path: &Path) -> Result<PathBuf> {
    let path = xlsx_path(path);
    let columns = spreadsheet_template_columns();
    let headers: Vec<&str> = columns.iter().map(String::as_str).collect();

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Factures")?;
    write_headers(worksheet, &headers)?;

    for (key, cell) in SPREADSHEET_EXAMPLE_ROW {
        let Some(col) = columns.iter().position(|c| c == key) else {
            continue;
        };
        match cell {
            ExampleCell::Text(s) => worksheet.write_string(1, col as u16, *s)?,
            ExampleCell::Number(n) => worksheet.write_number(1, col as u16, *n)?,
        };
    }

    save_workbook(&mut workbook, &path)?;
    Ok(path)
}

/// Text amounts that parse (`,` or `.` decimal) become numbers.
fn as_amount(value: &FieldValue) -> FieldValue {
    value
        .as_number()
        .map(FieldValue::Number)
        .unwrap_or_else(|| value.clone())
}

/// Amount shown for a history entry: `total_ht`, else `somme_facture`.
fn history_amount(meta: &InvoiceRecord) -> Option<FieldValue> {
    meta.total_ht
        .map(FieldValue::Number)
        .or_else(|| meta.field(SOMME_FACTURE).map(as_amount))
}

fn write_field(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: Option<&FieldValue>,
    number_format: &Format,
) -> std::result::Result<(), XlsxError> {
    match value {
        Some(FieldValue::Number(n)) => {
            worksheet.write_number_with_format(row, col, *n, number_format)?;
        }
        Some(FieldValue::Text(s)) => {
            worksheet.write_string(row, col, sanitize_cell(s))?;
        }
        Some(FieldValue::Bool(b)) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        Some(FieldValue::Null) | None => {}
    }
    Ok(())
}

/// Flat export of the history, one row per generated document.
/// Returns the saved path.
pub fn export_history(entries: &[HistoryEntry], path: &Path) -> Result<PathBuf> {
    let path = xlsx_path(path);
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Historique")?;
    write_headers(worksheet, HISTORY_EXPORT_COLUMNS)?;

    let number_format = amount_format();
    let mut file_width = estimate_text_width("fichier");
    for (idx, entry) in entries.iter().enumerate() {
        let row = (idx + 1) as u32;
        let meta = &entry.meta;
        worksheet.write_string(row, 0, sanitize_cell(&entry.datetime))?;
        worksheet.write_string(row, 1, sanitize_cell(&entry.file))?;
        file_width = file_width.max(estimate_text_width(&entry.file));
        write_field(worksheet, row, 2, meta.field(NUMERO_OTFI), &number_format)?;
        write_field(worksheet, row, 3, meta.field(CODE_SOUS_PROJET), &number_format)?;
        write_field(worksheet, row, 4, meta.field(CODE_PROJET), &number_format)?;
        write_field(worksheet, row, 5, meta.field(SOMME_FACTURE).map(as_amount).as_ref(), &number_format)?;
        write_field(worksheet, row, 6, history_amount(meta).as_ref(), &number_format)?;
    }
    worksheet.set_column_width(1, file_width)?;

    save_workbook(&mut workbook, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LineItem;

    fn write_sheet(path: &Path, headers: &[&str], rows: &[Vec<&str>]) {
        let mut workbook = Workbook::new();
        let ws = workbook.add_worksheet();
        for (c, h) in headers.iter().enumerate() {
            ws.write_string(0, c as u16, *h).unwrap();
        }
        for (r, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                if v.is_empty() {
                    continue;
                }
                match v.parse::<f64>() {
                    Ok(n) => ws.write_number(r as u32 + 1, c as u16, n).unwrap(),
                    Err(_) => ws.write_string(r as u32 + 1, c as u16, *v).unwrap(),
                };
            }
        }
        workbook.save(path).unwrap();
    }

    #[test]
    fn missing_file_is_reported_before_reading() {
        let err = SheetSource::open(Path::new("/nonexistent/factures.xlsx"))
            .err()
            .unwrap();
        assert!(matches!(err, FactureError::FileNotFound { .. }));
    }

    #[test]
    fn builds_one_record_per_row_with_normalized_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lot.xlsx");
        write_sheet(
            &path,
            &["Code Sous-Projet", "Ligne1 Désignation", "ligne1_quantite", "Ligne1 Prix Unitaire", "Remarque"],
            &[
                vec!["SP-1", "Service", "2", "100", "x"],
                vec!["SP-2", "", "", "", ""],
            ],
        );
        let source = SheetSource::open(&path).unwrap();
        assert_eq!(source.headers()[0], "code_sous_projet");
        assert_eq!(source.headers()[1], "ligne1_designation");
        assert_eq!(source.len(), 2);

        let records: Vec<InvoiceRecord> = source.records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text(CODE_SOUS_PROJET), "SP-1");
        assert_eq!(records[0].lines.len(), 1);
        assert_eq!(records[0].lines[0].amount, 200.0);
        assert_eq!(records[0].total_ht, Some(200.0));
        assert!(records[0].field("remarque").is_none());
        assert_eq!(records[1].text(CODE_SOUS_PROJET), "SP-2");
        assert!(records[1].lines.is_empty());
        assert_eq!(records[1].total_ht, None);

        // Restartable.
        assert_eq!(source.records().count(), 2);
    }

    #[test]
    fn template_workbook_reads_back_as_an_example_invoice() {
        let dir = tempfile::tempdir().unwrap();
        let saved = export_spreadsheet_template(&dir.path().join("template_factures")).unwrap();
        assert_eq!(saved.extension().and_then(|e| e.to_str()), Some("xlsx"));

        let source = SheetSource::open(&saved).unwrap();
        assert_eq!(source.headers().len(), 36);
        let record = source.records().next().unwrap();
        assert_eq!(record.text(NUMERO_OTFI), "OTFI-2025-001");
        assert_eq!(record.text("période_concernee"), "Janvier 2025");
        assert_eq!(record.lines.len(), 2);
        assert_eq!(record.total_ht, Some(2.0 * 50000.0 + 5.0 * 15000.0));
    }

    #[test]
    fn history_export_round_trips_identifiers_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let mut with_lines = InvoiceRecord::default();
        with_lines.set(NUMERO_OTFI, "OTFI-1");
        with_lines.set_lines(vec![LineItem {
            number: 1,
            designation: "A".into(),
            kind: String::new(),
            unit: String::new(),
            quantity: 2.0,
            unit_price: 100.5,
            amount: 201.0,
        }]);
        let mut amount_only = InvoiceRecord::default();
        amount_only.set(NUMERO_OTFI, "OTFI-2");
        amount_only.set(SOMME_FACTURE, "1500");
        let entries = vec![
            HistoryEntry {
                datetime: "2025-01-02 10:00:00".into(),
                file: "/out/Facture_OTFI-1.docx".into(),
                meta: with_lines,
            },
            HistoryEntry {
                datetime: "2025-01-03 11:30:00".into(),
                file: "/out/Facture_OTFI-2.docx".into(),
                meta: amount_only,
            },
        ];
        let path = export_history(&entries, &dir.path().join("historique.xlsx")).unwrap();

        let mut workbook = open_workbook_auto(&path).unwrap();
        let range = workbook.worksheet_range_at(0).unwrap().unwrap();
        let header: Vec<String> = range.rows().next().unwrap().iter().map(cell_to_string).collect();
        assert_eq!(header, HISTORY_EXPORT_COLUMNS);
        let rows: Vec<Vec<String>> = range
            .rows()
            .skip(1)
            .map(|r| r.iter().map(cell_to_string).collect())
            .collect();
        assert_eq!(rows[0][2], "OTFI-1");
        assert_eq!(rows[0][6], "201");
        assert_eq!(rows[1][2], "OTFI-2");
        assert_eq!(rows[1][6], "1500");
        assert!(matches!(range.get((2, 6)), Some(Data::Float(_))));
    }

    #[test]
    fn history_export_amounts_follow_the_decimal_rule() {
        let dir = tempfile::tempdir().unwrap();
        let entry = |amount: FieldValue| {
            let mut meta = InvoiceRecord::default();
            meta.set(SOMME_FACTURE, amount);
            HistoryEntry {
                datetime: "2025-02-01 08:00:00".into(),
                file: "/out/Facture.docx".into(),
                meta,
            }
        };
        let entries = vec![
            entry(FieldValue::from(" 1500,5 ")),
            entry(FieldValue::from("à définir")),
            entry(FieldValue::Null),
        ];
        let path = export_history(&entries, &dir.path().join("historique")).unwrap();

        let mut workbook = open_workbook_auto(&path).unwrap();
        let range = workbook.worksheet_range_at(0).unwrap().unwrap();
        assert_eq!(range.get((1, 5)), Some(&Data::Float(1500.5)));
        assert_eq!(range.get((1, 6)), Some(&Data::Float(1500.5)));
        assert_eq!(range.get((2, 5)), Some(&Data::String("à définir".into())));
        assert!(matches!(range.get((3, 5)), None | Some(Data::Empty)));
    }

    #[test]
    fn sanitize_drops_control_characters() {
        assert_eq!(sanitize_cell("a\u{1}b\tc"), "ab\tc");
    }
}
