//! Filling the invoice template from a built record.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::docx::template::{Context, DocxTemplate, TemplateItem, TemplateValue};
use crate::error::{FactureError, Result};
use crate::history::HistoryStore;
use crate::models::placeholders::{DEFAULT_IDENTIFIER, IDENTIFIER_FIELDS, LIGNES, TOTAL_HT};
use crate::services::normalize::normalize_key;
use crate::types::{BatchReport, FailedRecord, FieldValue, InvoiceRecord, LineItem};

/// First non-empty identifying field, or `Facture`.
pub fn record_identifier(record: &InvoiceRecord) -> String {
    IDENTIFIER_FIELDS
        .iter()
        .map(|k| record.text(k).trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_IDENTIFIER.to_string())
}

/// `Facture_<identifier>.docx`, path separators and other characters
/// rejected by Windows replaced with `_`.
pub fn output_file_name(record: &InvoiceRecord) -> String {
    let id: String = record_identifier(record)
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("Facture_{}.docx", id)
}

fn line_value(line: &LineItem) -> TemplateItem {
    let mut item = TemplateItem::new();
    item.insert("numero".into(), TemplateValue::Integer(i64::from(line.number)));
    item.insert("designation".into(), TemplateValue::Text(line.designation.clone()));
    item.insert("type_prestation".into(), TemplateValue::Text(line.kind.clone()));
    item.insert("unite".into(), TemplateValue::Text(line.unit.clone()));
    item.insert("quantite".into(), TemplateValue::Number(line.quantity));
    item.insert("prix_unitaire".into(), TemplateValue::Number(line.unit_price));
    item.insert("montant".into(), TemplateValue::Number(line.amount));
    item
}

fn field_value(value: &FieldValue) -> TemplateValue {
    match value {
        FieldValue::Text(s) => TemplateValue::Text(s.clone()),
        FieldValue::Number(n) => TemplateValue::Number(*n),
        FieldValue::Bool(b) => TemplateValue::Bool(*b),
        FieldValue::Null => TemplateValue::Text(String::new()),
    }
}

/// Template opened once and reused for every invoice of a session.
pub struct DocumentRenderer {
    template: DocxTemplate,
    placeholders: BTreeSet<String>,
}

impl DocumentRenderer {
    pub fn new(template_path: &Path) -> Result<Self> {
        let template = DocxTemplate::open(template_path)?;
        let placeholders = template.declared_placeholders();
        debug!(
            "template {} declares {} placeholders",
            template_path.display(),
            placeholders.len()
        );
        Ok(DocumentRenderer {
            template,
            placeholders,
        })
    }

    pub fn template_path(&self) -> &Path {
        self.template.path()
    }

    pub fn placeholders(&self) -> &BTreeSet<String> {
        &self.placeholders
    }

    /// Value of every declared placeholder: verbatim field, then the
    /// line-item list / total defaults, then the normalized name, then blank.
    pub fn context_for(&self, record: &InvoiceRecord) -> Context {
        let mut context = Context::new();
        for name in &self.placeholders {
            let value = if name == LIGNES {
                TemplateValue::List(record.lines.iter().map(line_value).collect())
            } else if name == TOTAL_HT {
                record
                    .total_ht
                    .map(TemplateValue::Number)
                    .unwrap_or(TemplateValue::Integer(0))
            } else if let Some(v) = record.field(name) {
                field_value(v)
            } else if let Some(v) = record.field(&normalize_key(name)) {
                field_value(v)
            } else {
                debug!("no value for placeholder '{}', left blank", name);
                TemplateValue::Text(String::new())
            };
            context.insert(name.clone(), value);
        }
        context
    }

    /// Write `Facture_<identifier>.docx` into `output_dir`, creating the
    /// directory and replacing any previous file of that name.
    pub fn render_invoice(&self, record: &InvoiceRecord, output_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(output_dir).map_err(|source| FactureError::OutputWriteFailed {
            path: output_dir.to_path_buf(),
            source,
        })?;
        let out = output_dir.join(output_file_name(record));
        self.template.render_to(&self.context_for(record), &out)?;
        info!("generated {}", out.display());
        Ok(out)
    }
}

/// Render every record in order. A failing record is reported and skipped;
/// files already written stay. Each success is appended to `history`; a
/// history write failure does not undo the document and is reported apart.
pub fn generate_batch<I>(
    records: I,
    renderer: &DocumentRenderer,
    output_dir: &Path,
    history: &mut HistoryStore,
) -> BatchReport
where
    I: IntoIterator<Item = InvoiceRecord>,
{
    let mut report = BatchReport::default();
    for (i, record) in records.into_iter().enumerate() {
        let row = i + 1;
        match renderer.render_invoice(&record, output_dir) {
            Ok(path) => {
                if let Err(e) = history.append(&path, &record) {
                    let identifier = record_identifier(&record);
                    warn!("row {} ({}) generated but not recorded: {}", row, identifier, e);
                    report.history_failures.push(FailedRecord {
                        row,
                        identifier,
                        error: e.to_string(),
                    });
                }
                report.generated.push(path);
            }
            Err(e) => {
                let identifier = record_identifier(&record);
                warn!("row {} ({}) failed: {}", row, identifier, e);
                report.failures.push(FailedRecord {
                    row,
                    identifier,
                    error: e.to_string(),
                });
            }
        }
    }
    info!(
        "batch done: {} generated, {} failed, {} not recorded in history",
        report.generated.len(),
        report.failures.len(),
        report.history_failures.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::starter::{paragraph_xml, write_docx, write_starter_template};
    use crate::docx::template::document_text;
    use crate::models::placeholders::{CODE_PROJET, CODE_SOUS_PROJET, NOM, NUMERO_OTFI};
    use crate::services::record_builder::build_record;
    use std::collections::BTreeMap;

    fn record(pairs: &[(&str, &str)]) -> InvoiceRecord {
        let row: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        build_record(&row)
    }

    #[test]
    fn identifier_priority_and_fallback() {
        let r = record(&[(NUMERO_OTFI, ""), (CODE_SOUS_PROJET, "SP-2"), (CODE_PROJET, "PRJ-9")]);
        assert_eq!(output_file_name(&r), "Facture_SP-2.docx");

        let r = record(&[(NOM, "Kone"), (CODE_PROJET, "  ")]);
        assert_eq!(output_file_name(&r), "Facture_Kone.docx");

        assert_eq!(output_file_name(&InvoiceRecord::default()), "Facture_Facture.docx");
        assert_eq!(
            output_file_name(&record(&[(NUMERO_OTFI, "OT/2025:7")])),
            "Facture_OT_2025_7.docx"
        );
    }

    #[test]
    fn renders_row_example_into_nested_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("modele.docx");
        write_starter_template(&template).unwrap();
        let renderer = DocumentRenderer::new(&template).unwrap();

        let r = record(&[
            ("code_sous_projet", "SP-1"),
            ("ligne1_designation", "Service"),
            ("ligne1_quantite", "2"),
            ("ligne1_prix_unitaire", "100"),
        ]);
        let out_dir = dir.path().join("a").join("b");
        let out = renderer.render_invoice(&r, &out_dir).unwrap();
        assert_eq!(out, out_dir.join("Facture_SP-1.docx"));

        let text = document_text(&out).unwrap();
        assert!(text.contains("Code sous-projet : SP-1"));
        assert!(text.contains("Service"));
        assert!(text.contains("Total HT : 200"));
        assert!(text.contains("N° OTFI : \n"), "missing fields render blank");
        assert!(!text.contains("{{"));
        assert!(!text.contains("{%"));
    }

    #[test]
    fn defaults_for_lines_and_total_and_normalized_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("custom.docx");
        let body = [
            paragraph_xml("[{{ total_ht }}]", false),
            paragraph_xml("<{{ Code_Projet }}>", false),
            paragraph_xml("{%p for l in lignes %}", false),
            paragraph_xml("{{ l.designation }}", false),
            paragraph_xml("{%p endfor %}", false),
        ]
        .concat();
        write_docx(&template, &body).unwrap();
        let renderer = DocumentRenderer::new(&template).unwrap();
        assert!(renderer.placeholders().contains("Code_Projet"));

        let r = record(&[(CODE_PROJET, "PRJ-1")]);
        let context = renderer.context_for(&r);
        assert_eq!(context[LIGNES], TemplateValue::List(Vec::new()));
        assert_eq!(context[TOTAL_HT], TemplateValue::Integer(0));
        assert_eq!(context["Code_Projet"], TemplateValue::Text("PRJ-1".into()));

        let out = renderer.render_invoice(&r, dir.path()).unwrap();
        assert_eq!(document_text(&out).unwrap(), "[0]\n<PRJ-1>\n");
    }

    #[test]
    fn word_template_with_filters_and_conditions() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("jinja.docx");
        let body = [
            paragraph_xml("Total : {{ total_ht | round(2) }}", false),
            paragraph_xml("{% if code_projet %}Projet {{ code_projet }}{% endif %}", false),
            paragraph_xml("{% if numero_otfi %}OTFI {{ numero_otfi }}{% else %}Sans OTFI{% endif %}", false),
        ]
        .concat();
        write_docx(&template, &body).unwrap();
        let renderer = DocumentRenderer::new(&template).unwrap();

        let r = record(&[
            (CODE_PROJET, "PRJ-4"),
            ("ligne1_designation", "A"),
            ("ligne1_quantite", "1"),
            ("ligne1_prix_unitaire", "0,1"),
            ("ligne2_designation", "B"),
            ("ligne2_quantite", "1"),
            ("ligne2_prix_unitaire", "0.2"),
        ]);
        let out = renderer.render_invoice(&r, dir.path()).unwrap();
        assert_eq!(
            document_text(&out).unwrap(),
            "Total : 0.3\nProjet PRJ-4\nSans OTFI\n"
        );
    }

    #[test]
    fn same_identifier_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("modele.docx");
        write_starter_template(&template).unwrap();
        let renderer = DocumentRenderer::new(&template).unwrap();

        let first = renderer
            .render_invoice(&record(&[(CODE_PROJET, "PRJ-1"), ("pole_emettrice", "Nord")]), dir.path())
            .unwrap();
        let second = renderer
            .render_invoice(&record(&[(CODE_PROJET, "PRJ-1"), ("pole_emettrice", "Sud")]), dir.path())
            .unwrap();
        assert_eq!(first, second);
        let text = document_text(&second).unwrap();
        assert!(text.contains("Sud"));
        assert!(!text.contains("Nord"));
    }

    #[test]
    fn batch_keeps_earlier_files_when_a_row_fails() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("modele.docx");
        write_starter_template(&template).unwrap();
        let renderer = DocumentRenderer::new(&template).unwrap();
        let out_dir = dir.path().join("out");
        // A directory squatting the second output name makes its write fail.
        fs::create_dir_all(out_dir.join("Facture_BLOCKED.docx")).unwrap();

        let mut history = HistoryStore::load(&dir.path().join("history.json"));
        let records = vec![
            record(&[(CODE_PROJET, "PRJ-1")]),
            record(&[(CODE_PROJET, "BLOCKED")]),
            record(&[(CODE_PROJET, "PRJ-3")]),
        ];
        let report = generate_batch(records, &renderer, &out_dir, &mut history);

        assert_eq!(report.generated.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].row, 2);
        assert_eq!(report.failures[0].identifier, "BLOCKED");
        assert!(out_dir.join("Facture_PRJ-1.docx").is_file());
        assert!(out_dir.join("Facture_PRJ-3.docx").is_file());
        assert_eq!(history.len(), 2);
        assert!(report.history_failures.is_empty());
    }

    #[test]
    fn unwritable_history_does_not_fail_generated_documents() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("modele.docx");
        write_starter_template(&template).unwrap();
        let renderer = DocumentRenderer::new(&template).unwrap();
        let out_dir = dir.path().join("out");
        let history_path = dir.path().join("history.json");
        fs::create_dir_all(&history_path).unwrap();
        let mut history = HistoryStore::load(&history_path);

        let report = generate_batch(vec![record(&[(CODE_PROJET, "PRJ-1")])], &renderer, &out_dir, &mut history);

        assert_eq!(report.generated, [out_dir.join("Facture_PRJ-1.docx")]);
        assert!(report.failures.is_empty());
        assert_eq!(report.history_failures.len(), 1);
        assert_eq!(report.history_failures[0].identifier, "PRJ-1");
        assert!(out_dir.join("Facture_PRJ-1.docx").is_file());
        assert!(history.is_empty());
    }
}
