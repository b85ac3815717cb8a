//! Turns raw key/value input (a spreadsheet row or the manual form) into an
//! [`InvoiceRecord`].

use std::collections::BTreeMap;

use crate::error::{FactureError, Result};
use crate::models::placeholders::{
    line_column, CODE_PROJET, CODE_SOUS_PROJET, DATE_DU_JOUR, DATE_EMISSION,
    DEPT_DIR_DESTINATAIRE, DEPT_DIR_EMETTRICE, LINE_DESIGNATION, LINE_QUANTITY, LINE_TYPE,
    LINE_UNIT, LINE_UNIT_PRICE, MAX_LINES, NOM, NUMERO_OTFI,
    PLACEHOLDER_ALIASES, POLE_DESTINATAIRE, POLE_EMETTRICE, PRENOM, SOMME_FACTURE,
};
use crate::services::line_items::build_line_items;
use crate::types::InvoiceRecord;

/// Build a record from a row whose keys are already normalized.
///
/// Keys missing from the alias table are dropped, except `nom`/`prenom`
/// which are kept for file naming. When several columns map to the same
/// placeholder, the one listed last in the alias table wins, even if empty.
pub fn build_record(row: &BTreeMap<String, String>) -> InvoiceRecord {
    let mut record = InvoiceRecord::default();
    for (alias, canonical) in PLACEHOLDER_ALIASES {
        if let Some(value) = row.get(*alias) {
            record.set(*canonical, value.as_str());
        }
    }
    for passthrough in [NOM, PRENOM] {
        if let Some(value) = row.get(passthrough) {
            record.set(passthrough, value.as_str());
        }
    }
    record.set_lines(build_line_items(|k| row.get(k).map(String::as_str)));
    record
}

/// One line group typed into the manual form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineInput {
    pub designation: String,
    pub type_prestation: String,
    pub unite: String,
    pub quantite: String,
    pub prix_unitaire: String,
}

impl LineInput {
    /// Parse `designation;type;unite;quantite;prix_unitaire`. Missing
    /// trailing parts are empty.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';').map(|s| s.trim().to_string());
        LineInput {
            designation: parts.next().unwrap_or_default(),
            type_prestation: parts.next().unwrap_or_default(),
            unite: parts.next().unwrap_or_default(),
            quantite: parts.next().unwrap_or_default(),
            prix_unitaire: parts.next().unwrap_or_default(),
        }
    }
}

/// Inputs of the manual entry form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManualForm {
    pub code_projet: String,
    pub code_sous_projet: String,
    pub numero_otfi: String,
    pub pole_emettrice: String,
    pub pole_destinataire: String,
    pub dept_dir_emettrice: String,
    pub dept_dir_destinataire: String,
    pub date_emission: String,
    pub date_du_jour: String,
    pub periode_concernee: String,
    pub somme_facture: String,
    pub lines: Vec<LineInput>,
}

impl ManualForm {
    /// Build the record, rejecting a form with no project code, sub-project
    /// code or OTFI number.
    pub fn build(&self) -> Result<InvoiceRecord> {
        if self.code_projet.trim().is_empty()
            && self.code_sous_projet.trim().is_empty()
            && self.numero_otfi.trim().is_empty()
        {
            return Err(FactureError::MissingIdentifier);
        }
        if self.lines.len() > MAX_LINES {
            return Err(FactureError::TooManyLines {
                count: self.lines.len(),
            });
        }
        Ok(build_record(&self.raw_fields()))
    }

    /// Form inputs as a normalized row, line groups expanded to
    /// `ligne<N>_<subfield>` keys.
    fn raw_fields(&self) -> BTreeMap<String, String> {
        let scalars = [
            (CODE_PROJET, &self.code_projet),
            (CODE_SOUS_PROJET, &self.code_sous_projet),
            (NUMERO_OTFI, &self.numero_otfi),
            (POLE_EMETTRICE, &self.pole_emettrice),
            (POLE_DESTINATAIRE, &self.pole_destinataire),
            (DEPT_DIR_EMETTRICE, &self.dept_dir_emettrice),
            (DEPT_DIR_DESTINATAIRE, &self.dept_dir_destinataire),
            (DATE_EMISSION, &self.date_emission),
            (DATE_DU_JOUR, &self.date_du_jour),
            ("periode_concernee", &self.periode_concernee),
            (SOMME_FACTURE, &self.somme_facture),
        ];
        let mut row: BTreeMap<String, String> = scalars
            .iter()
            .map(|(k, v)| (k.to_string(), v.trim().to_string()))
            .collect();
        for (i, line) in self.lines.iter().enumerate() {
            let idx = i + 1;
            for (sub, value) in [
                (LINE_DESIGNATION, &line.designation),
                (LINE_TYPE, &line.type_prestation),
                (LINE_UNIT, &line.unite),
                (LINE_QUANTITY, &line.quantite),
                (LINE_UNIT_PRICE, &line.prix_unitaire),
            ] {
                row.insert(line_column(idx, sub), value.trim().to_string());
            }
        }
        row
    }
}
