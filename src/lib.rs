pub mod commands;
pub mod config;
pub mod docx;
pub mod error;
pub mod excel;
pub mod history;
pub mod models;
pub mod render;
pub mod services;
pub mod types;

pub use config::AppConfig;
pub use error::{FactureError, Result};
pub use history::{HistoryFilter, HistoryStore};
pub use render::{generate_batch, DocumentRenderer};
pub use types::{BatchReport, HistoryEntry, InvoiceRecord, LineItem};

/// Entry point of the `facture-interne` binary.
pub fn run() -> anyhow::Result<()> {
    commands::run()
}
