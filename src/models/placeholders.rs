//! Placeholder names understood by the invoice template.

pub const CODE_PROJET: &str = "code_projet";
pub const CODE_SOUS_PROJET: &str = "code_sous_projet";
pub const DATE_DU_JOUR: &str = "date_du_jour";
pub const DATE_EMISSION: &str = "date_emission";
pub const DEPT_DIR_DESTINATAIRE: &str = "dept_dir_destinataire";
pub const DEPT_DIR_EMETTRICE: &str = "dept_dir_emettrice";
pub const NUMERO_OTFI: &str = "numero_otfi";
pub const POLE_DESTINATAIRE: &str = "pole_destinataire";
pub const POLE_EMETTRICE: &str = "pole_emettrice";
pub const PERIODE_CONCERNEE: &str = "période_concernee";
pub const SOMME_FACTURE: &str = "somme_facture";
pub const LIGNES: &str = "lignes";
pub const TOTAL_HT: &str = "total_ht";

/// Person name columns, carried through unmapped for file naming.
pub const NOM: &str = "nom";
pub const PRENOM: &str = "prenom";

/// Scalar placeholders in template order.
pub const SCALAR_PLACEHOLDERS: &[&str] = &[
    CODE_PROJET,
    CODE_SOUS_PROJET,
    DATE_DU_JOUR,
    DATE_EMISSION,
    DEPT_DIR_DESTINATAIRE,
    DEPT_DIR_EMETTRICE,
    NUMERO_OTFI,
    POLE_DESTINATAIRE,
    POLE_EMETTRICE,
    PERIODE_CONCERNEE,
    SOMME_FACTURE,
];

/// Normalized column key -> canonical placeholder. Many-to-one.
/// Order matters: a later entry overrides an earlier one for the same placeholder.
pub const PLACEHOLDER_ALIASES: &[(&str, &str)] = &[
    ("code_projet", CODE_PROJET),
    ("codeprojet", CODE_PROJET),
    ("code_sous_projet", CODE_SOUS_PROJET),
    ("codesousprojet", CODE_SOUS_PROJET),
    ("date_du_jour", DATE_DU_JOUR),
    ("datedujour", DATE_DU_JOUR),
    ("date_emission", DATE_EMISSION),
    ("dateemission", DATE_EMISSION),
    ("dept_dir_destinataire", DEPT_DIR_DESTINATAIRE),
    ("deptdirdestinataire", DEPT_DIR_DESTINATAIRE),
    ("dept_dir_emettrice", DEPT_DIR_EMETTRICE),
    ("deptdiremettrice", DEPT_DIR_EMETTRICE),
    ("numero_otfi", NUMERO_OTFI),
    ("poledestinataire", POLE_DESTINATAIRE),
    ("pole_destinataire", POLE_DESTINATAIRE),
    ("poleemettrice", POLE_EMETTRICE),
    ("pole_emettrice", POLE_EMETTRICE),
    ("periode_concernee", PERIODE_CONCERNEE),
    ("periode", PERIODE_CONCERNEE),
    ("somme_facture", SOMME_FACTURE),
    ("montant", SOMME_FACTURE),
];

/// Identifying fields used for the output file name, in priority order.
pub const IDENTIFIER_FIELDS: &[&str] = &[NUMERO_OTFI, CODE_SOUS_PROJET, CODE_PROJET, NOM];

/// File stem used when no identifying field is filled.
pub const DEFAULT_IDENTIFIER: &str = "Facture";

pub const MAX_LINES: usize = 5;

/// Sub-field suffixes of a `ligne<N>_` column group.
pub const LINE_DESIGNATION: &str = "designation";
pub const LINE_TYPE: &str = "type_prestation";
pub const LINE_UNIT: &str = "unite";
pub const LINE_QUANTITY: &str = "quantite";
pub const LINE_UNIT_PRICE: &str = "prix_unitaire";

pub const LINE_SUBFIELDS: &[&str] = &[
    LINE_DESIGNATION,
    LINE_TYPE,
    LINE_UNIT,
    LINE_QUANTITY,
    LINE_UNIT_PRICE,
];

/// Column key of one line sub-field, e.g. `ligne2_quantite`.
pub fn line_column(index: usize, subfield: &str) -> String {
    format!("ligne{}_{}", index, subfield)
}

/// Header row of the blank Excel template handed to users.
pub fn spreadsheet_template_columns() -> Vec<String> {
    let mut columns: Vec<String> = [
        CODE_PROJET,
        CODE_SOUS_PROJET,
        NUMERO_OTFI,
        POLE_EMETTRICE,
        POLE_DESTINATAIRE,
        DEPT_DIR_EMETTRICE,
        DEPT_DIR_DESTINATAIRE,
        DATE_EMISSION,
        DATE_DU_JOUR,
        "periode_concernee",
        SOMME_FACTURE,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for idx in 1..=MAX_LINES {
        for sub in LINE_SUBFIELDS {
            columns.push(line_column(idx, sub));
        }
    }
    columns
}

/// Cell of the example row in the Excel template.
#[derive(Debug, Clone, PartialEq)]
pub enum ExampleCell {
    Text(&'static str),
    Number(f64),
}

/// Filled example row of the Excel template, keyed by column.
pub const SPREADSHEET_EXAMPLE_ROW: &[(&str, ExampleCell)] = &[
    ("code_projet", ExampleCell::Text("PRJ-001")),
    ("code_sous_projet", ExampleCell::Text("SP-001")),
    ("numero_otfi", ExampleCell::Text("OTFI-2025-001")),
    ("pole_emettrice", ExampleCell::Text("Pole A")),
    ("pole_destinataire", ExampleCell::Text("Pole B")),
    ("dept_dir_emettrice", ExampleCell::Text("Direction X")),
    ("dept_dir_destinataire", ExampleCell::Text("Direction Y")),
    ("date_emission", ExampleCell::Text("01/01/2025")),
    ("date_du_jour", ExampleCell::Text("01/01/2025")),
    ("periode_concernee", ExampleCell::Text("Janvier 2025")),
    ("somme_facture", ExampleCell::Number(120000.0)),
    ("ligne1_designation", ExampleCell::Text("Prestation A")),
    ("ligne1_type_prestation", ExampleCell::Text("Service")),
    ("ligne1_unite", ExampleCell::Text("Lot")),
    ("ligne1_quantite", ExampleCell::Number(2.0)),
    ("ligne1_prix_unitaire", ExampleCell::Number(50000.0)),
    ("ligne2_designation", ExampleCell::Text("Prestation B")),
    ("ligne2_type_prestation", ExampleCell::Text("Support")),
    ("ligne2_unite", ExampleCell::Text("H")),
    ("ligne2_quantite", ExampleCell::Number(5.0)),
    ("ligne2_prix_unitaire", ExampleCell::Number(15000.0)),
];

/// Columns of the history export, in order.
pub const HISTORY_EXPORT_COLUMNS: &[&str] = &[
    "date_heure",
    "fichier",
    NUMERO_OTFI,
    CODE_SOUS_PROJET,
    CODE_PROJET,
    SOMME_FACTURE,
    TOTAL_HT,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_columns_expand_five_line_groups() {
        let cols = spreadsheet_template_columns();
        assert_eq!(cols.len(), 11 + 5 * 5);
        assert_eq!(cols[11], "ligne1_designation");
        assert_eq!(cols.last().map(String::as_str), Some("ligne5_prix_unitaire"));
        assert!(!cols.iter().any(|c| c == LIGNES || c == TOTAL_HT));
    }

    #[test]
    fn example_row_only_uses_template_columns() {
        let cols = spreadsheet_template_columns();
        for (key, _) in SPREADSHEET_EXAMPLE_ROW {
            assert!(cols.iter().any(|c| c == key), "unknown column {key}");
        }
    }
}
