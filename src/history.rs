//! Local generation history: a JSON array rewritten in full on every change.

use chrono::{Local, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{FactureError, Result};
use crate::models::placeholders::{CODE_PROJET, CODE_SOUS_PROJET, NUMERO_OTFI, SOMME_FACTURE};
use crate::services::line_items::parse_decimal;
use crate::types::{HistoryEntry, InvoiceRecord};

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date format typed by users in filters (`JJ/MM/AAAA`).
pub const FILTER_DATE_FORMAT: &str = "%d/%m/%Y";

pub struct HistoryStore {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
    /// Set when an unreadable file could not be moved aside; saving is
    /// refused so it is never overwritten.
    blocked: Option<String>,
}

/// `history.json` -> `history.json.bak`.
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

impl HistoryStore {
    /// Read the store. A missing file is an empty history. Invalid JSON is
    /// moved to `<name>.bak` with a warning and the history starts empty, so
    /// generation keeps working without losing the old entries. A file that
    /// cannot be read or moved is left alone and saving is refused.
    pub fn load(path: &Path) -> Self {
        let mut blocked = None;
        let entries = match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Vec<HistoryEntry>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    let backup = backup_path(path);
                    match fs::rename(path, &backup) {
                        Ok(()) => warn!(
                            "history file {} is not valid ({}), moved to {} and starting empty",
                            path.display(),
                            e,
                            backup.display()
                        ),
                        Err(rename_err) => {
                            warn!(
                                "history file {} is not valid ({}) and cannot be moved aside: {}",
                                path.display(),
                                e,
                                rename_err
                            );
                            blocked = Some(format!("unreadable file kept as is: {}", e));
                        }
                    }
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("cannot read history file {}: {}", path.display(), e);
                blocked = Some(e.to_string());
                Vec::new()
            }
        };
        debug!("loaded {} history entries from {}", entries.len(), path.display());
        HistoryStore {
            path: path.to_path_buf(),
            entries,
            blocked,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a generated document and persist immediately. On a failed
    /// write the entry is dropped again, memory and disk stay in step.
    pub fn append(&mut self, file: &Path, record: &InvoiceRecord) -> Result<()> {
        self.entries.push(HistoryEntry {
            datetime: Local::now().format(DATETIME_FORMAT).to_string(),
            file: file.to_string_lossy().into_owned(),
            meta: record.clone(),
        });
        if let Err(e) = self.save() {
            self.entries.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Delete the entry at `index` (0-based, over the unfiltered list) and persist.
    pub fn remove(&mut self, index: usize) -> Result<HistoryEntry> {
        if index >= self.entries.len() {
            return Err(FactureError::HistoryIndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        let removed = self.entries.remove(index);
        if let Err(e) = self.save() {
            self.entries.insert(index, removed);
            return Err(e);
        }
        Ok(removed)
    }

    pub fn save(&self) -> Result<()> {
        let history_err = |detail: String| FactureError::History {
            path: self.path.clone(),
            detail,
        };
        if let Some(reason) = &self.blocked {
            return Err(history_err(reason.clone()));
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| history_err(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries).map_err(|e| history_err(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| history_err(e.to_string()))
    }
}

/// Amount shown for an entry: `total_ht`, else `somme_facture`, else 0.
pub fn entry_amount(meta: &InvoiceRecord) -> f64 {
    if let Some(total) = meta.total_ht {
        return total;
    }
    meta.field(SOMME_FACTURE)
        .and_then(|v| v.as_number())
        .unwrap_or(0.0)
}

fn entry_date(entry: &HistoryEntry) -> Option<NaiveDate> {
    NaiveDateTime::parse_from_str(&entry.datetime, DATETIME_FORMAT)
        .ok()
        .map(|dt| dt.date())
}

fn file_name(entry: &HistoryEntry) -> String {
    Path::new(&entry.file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `JJ/MM/AAAA`, `None` when blank or invalid.
pub fn parse_filter_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), FILTER_DATE_FORMAT).ok()
}

/// Amount typed in a filter, `,` accepted as decimal separator.
pub fn parse_filter_amount(raw: &str) -> Option<f64> {
    parse_decimal(raw)
}

/// Criteria for listing history entries. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub date: Option<NaiveDate>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
    /// Case-insensitive substring of file name, OTFI number or codes.
    pub title: Option<String>,
}

impl HistoryFilter {
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        // Entries with an unreadable timestamp are never excluded by date.
        if let Some(day) = entry_date(entry) {
            if self.date_from.is_some_and(|from| day < from)
                || self.date_to.is_some_and(|to| day > to)
                || self.date.is_some_and(|d| day != d)
            {
                return false;
            }
        }

        let amount = entry_amount(&entry.meta);
        if self.amount.is_some_and(|a| (amount - a).abs() > 0.001)
            || self.amount_min.is_some_and(|min| amount < min)
            || self.amount_max.is_some_and(|max| amount > max)
        {
            return false;
        }

        if let Some(title) = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let meta = &entry.meta;
            let zone = format!(
                "{} {} {} {}",
                file_name(entry),
                meta.text(NUMERO_OTFI),
                meta.text(CODE_SOUS_PROJET),
                meta.text(CODE_PROJET)
            )
            .to_lowercase();
            if !zone.contains(&title.to_lowercase()) {
                return false;
            }
        }
        true
    }

    /// Matching entries with their index in the full history.
    pub fn apply<'a>(&'a self, entries: &'a [HistoryEntry]) -> impl Iterator<Item = (usize, &'a HistoryEntry)> + 'a {
        entries.iter().enumerate().filter(move |(_, e)| self.matches(e))
    }
}

/// One-line summary: `datetime | ref | amount FCFA | file name`.
pub fn display_line(entry: &HistoryEntry) -> String {
    let meta = &entry.meta;
    let reference = [NUMERO_OTFI, CODE_SOUS_PROJET, CODE_PROJET]
        .iter()
        .map(|k| meta.text(k))
        .find(|v| !v.is_empty())
        .unwrap_or_default();
    let amount = entry_amount(meta);
    let amount_txt = if amount != 0.0 {
        format!("{:.2} FCFA", amount)
    } else {
        "-".to_string()
    };
    format!("{} | {} | {} | {}", entry.datetime, reference, amount_txt, file_name(entry))
}
