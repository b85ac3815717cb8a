//! Print how an Excel file is understood: normalized headers with the
//! placeholder each one feeds, then one built record per row, as JSON.
//!
//! Usage: dump_excel <file.xlsx>

use anyhow::{Context, Result};
use facture_interne_lib::excel::SheetSource;
use facture_interne_lib::render::output_file_name;
use facture_interne_lib::services::normalize::map_placeholder;
use serde_json::json;
use std::path::PathBuf;

fn main() -> Result<()> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: dump_excel <file.xlsx>")?;
    let source = SheetSource::open(&path).with_context(|| format!("reading {}", path.display()))?;

    for header in source.headers() {
        match map_placeholder(header) {
            Some(placeholder) => println!("{} -> {}", header, placeholder),
            None => println!("{}", header),
        }
    }
    for (i, record) in source.records().enumerate() {
        let row = json!({
            "row": i + 1,
            "file": output_file_name(&record),
            "record": record,
        });
        println!("{}", serde_json::to_string_pretty(&row)?);
    }
    Ok(())
}
