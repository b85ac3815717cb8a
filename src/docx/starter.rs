//! Minimal invoice template, used by `init-template` and by tests.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{FactureError, Result};
use crate::models::placeholders::{
    CODE_PROJET, CODE_SOUS_PROJET, DATE_DU_JOUR, DATE_EMISSION, DEPT_DIR_DESTINATAIRE,
    DEPT_DIR_EMETTRICE, NUMERO_OTFI, PERIODE_CONCERNEE, POLE_DESTINATAIRE, POLE_EMETTRICE,
    SOMME_FACTURE, TOTAL_HT,
};

const CONTENT_TYPES: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
    r#"</Types>"#
);

const PACKAGE_RELS: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>"#,
    r#"</Relationships>"#
);

const TABLE_BORDERS: &str = concat!(
    r#"<w:tblBorders>"#,
    r#"<w:top w:val="single" w:sz="4" w:space="0" w:color="000000"/>"#,
    r#"<w:left w:val="single" w:sz="4" w:space="0" w:color="000000"/>"#,
    r#"<w:bottom w:val="single" w:sz="4" w:space="0" w:color="000000"/>"#,
    r#"<w:right w:val="single" w:sz="4" w:space="0" w:color="000000"/>"#,
    r#"<w:insideH w:val="single" w:sz="4" w:space="0" w:color="000000"/>"#,
    r#"<w:insideV w:val="single" w:sz="4" w:space="0" w:color="000000"/>"#,
    r#"</w:tblBorders>"#
);

/// One-run paragraph, text escaped.
pub fn paragraph_xml(text: &str, bold: bool) -> String {
    let props = if bold { "<w:rPr><w:b/></w:rPr>" } else { "" };
    format!(
        r#"<w:p><w:r>{}<w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
        props,
        quick_xml::escape::escape(text)
    )
}

fn row(cells: &[&str], bold: bool) -> String {
    let cells: String = cells
        .iter()
        .map(|c| format!("<w:tc>{}</w:tc>", paragraph_xml(c, bold)))
        .collect();
    format!("<w:tr>{}</w:tr>", cells)
}

/// Wrap body XML into a complete `word/document.xml`.
pub fn document_xml(body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#,
            "<w:body>{}<w:sectPr/></w:body></w:document>"
        ),
        body
    )
}

/// Write a bare `.docx` package whose document body is `body`.
pub fn write_docx(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let write_err = |e: zip::result::ZipError| FactureError::Template {
        path: path.to_path_buf(),
        detail: e.to_string(),
    };
    let file = File::create(path).map_err(|source| FactureError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let mut zip_writer = ZipWriter::new(file);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", PACKAGE_RELS.to_string()),
        ("word/document.xml", document_xml(body)),
    ] {
        zip_writer.start_file(name, opts).map_err(write_err)?;
        zip_writer.write_all(content.as_bytes())?;
    }
    zip_writer.finish().map_err(write_err)?;
    Ok(())
}

/// Body of the starter invoice: every scalar placeholder plus a line table.
fn starter_body() -> String {
    let tag = |name: &str| format!("{{{{ {} }}}}", name);
    let mut body = String::new();
    body.push_str(&paragraph_xml("FACTURE INTERNE", true));
    for (label, name) in [
        ("N° OTFI", NUMERO_OTFI),
        ("Code projet", CODE_PROJET),
        ("Code sous-projet", CODE_SOUS_PROJET),
        ("Pôle émettrice", POLE_EMETTRICE),
        ("Pôle destinataire", POLE_DESTINATAIRE),
        ("Dept/Dir émettrice", DEPT_DIR_EMETTRICE),
        ("Dept/Dir destinataire", DEPT_DIR_DESTINATAIRE),
        ("Date d'émission", DATE_EMISSION),
        ("Date du jour", DATE_DU_JOUR),
        ("Période concernée", PERIODE_CONCERNEE),
    ] {
        body.push_str(&paragraph_xml(&format!("{} : {}", label, tag(name)), false));
    }

    body.push_str("<w:tbl><w:tblPr><w:tblW w:w=\"0\" w:type=\"auto\"/>");
    body.push_str(TABLE_BORDERS);
    body.push_str("</w:tblPr>");
    body.push_str(&row(
        &["N°", "Désignation", "Type", "Unité", "Quantité", "Prix unitaire", "Montant"],
        true,
    ));
    body.push_str(&row(&["{%tr for l in lignes %}"], false));
    body.push_str(&row(
        &[
            "{{ l.numero }}",
            "{{ l.designation }}",
            "{{ l.type_prestation }}",
            "{{ l.unite }}",
            "{{ l.quantite }}",
            "{{ l.prix_unitaire }}",
            "{{ l.montant }}",
        ],
        false,
    ));
    body.push_str(&row(&["{%tr endfor %}"], false));
    body.push_str("</w:tbl>");

    body.push_str(&paragraph_xml(&format!("Total HT : {} FCFA", tag(TOTAL_HT)), true));
    body.push_str(&paragraph_xml(
        &format!("Somme facturée : {} FCFA", tag(SOMME_FACTURE)),
        false,
    ));
    body
}

/// Write the starter invoice template to `path`.
pub fn write_starter_template(path: &Path) -> Result<()> {
    write_docx(path, &starter_body())
}
