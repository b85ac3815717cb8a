//! Error type shared by the library.
//!
//! Unparseable numbers are not errors: quantities, prices and amounts fall
//! back to `0.0` (see [`crate::services::line_items::parse_amount`]).

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FactureError>;

#[derive(Debug, Error)]
pub enum FactureError {
    /// Input spreadsheet or template does not exist.
    #[error("Fichier introuvable : '{path}'")]
    FileNotFound { path: PathBuf },

    /// Manual entry without project code, sub-project code or OTFI number.
    #[error("Renseignez au moins le code projet, le code sous-projet ou le numero OTFI.")]
    MissingIdentifier,

    /// No output directory was chosen.
    #[error("Merci de choisir un dossier de sortie avant de continuer (--output-dir ou FACTURE_OUTPUT_DIR).")]
    OutputDirNotSelected,

    #[error("{count} lignes de prestation fournies, 5 au maximum.")]
    TooManyLines { count: usize },

    #[error("Impossible de lire le fichier Excel '{path}': {detail}")]
    Spreadsheet { path: PathBuf, detail: String },

    #[error("Template Word invalide '{path}': {detail}")]
    Template { path: PathBuf, detail: String },

    /// Could not create the output directory or write the document.
    #[error("Impossible d'ecrire '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Historique '{path}': {detail}")]
    History { path: PathBuf, detail: String },

    #[error("Entree d'historique {index} inexistante ({len} entrees).")]
    HistoryIndexOutOfRange { index: usize, len: usize },

    #[error("Erreur Excel: {0}")]
    Xlsx(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rust_xlsxwriter::XlsxError> for FactureError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        FactureError::Xlsx(e.to_string())
    }
}
