//! Command-line surface: argument parsing and one handler per subcommand.

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{load_dotenv, AppConfig, ConfigOverrides};
use crate::docx::{document_text, write_starter_template};
use crate::excel::{export_history, export_spreadsheet_template, SheetSource};
use crate::history::{display_line, parse_filter_amount, parse_filter_date, HistoryFilter, HistoryStore};
use crate::models::placeholders::{LIGNES, SCALAR_PLACEHOLDERS, TOTAL_HT};
use crate::render::{generate_batch, DocumentRenderer};
use crate::services::record_builder::{LineInput, ManualForm};

#[derive(Parser, Debug)]
#[command(
    name = "facture-interne",
    version,
    about = "Factures internes projet: remplit le modèle Word depuis un formulaire ou un fichier Excel"
)]
pub struct Cli {
    /// Word template (.docx).
    #[arg(long, global = true)]
    pub template: Option<PathBuf>,

    /// Directory receiving generated invoices.
    #[arg(short, long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// History file (JSON).
    #[arg(long, global = true)]
    pub history: Option<PathBuf>,

    /// Enable DEBUG-level logs.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate one invoice from form fields.
    Generate(GenerateArgs),
    /// Generate one invoice per row of an Excel file.
    Batch {
        /// Input .xlsx, first sheet, header on the first row.
        excel: PathBuf,
    },
    /// List, filter, remove or export generated invoices.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Write a blank Excel file with the expected columns and an example row.
    ExportTemplate { path: PathBuf },
    /// Write a starter Word template declaring every placeholder.
    InitTemplate {
        path: PathBuf,
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
    /// List the placeholders declared by the template.
    Placeholders,
    /// Print the text of a generated invoice.
    Show { document: PathBuf },
}

#[derive(Args, Debug, Default)]
pub struct GenerateArgs {
    #[arg(long, default_value = "")]
    pub code_projet: String,
    #[arg(long, default_value = "")]
    pub code_sous_projet: String,
    #[arg(long, default_value = "")]
    pub numero_otfi: String,
    #[arg(long, default_value = "")]
    pub pole_emettrice: String,
    #[arg(long, default_value = "")]
    pub pole_destinataire: String,
    #[arg(long, default_value = "")]
    pub dept_dir_emettrice: String,
    #[arg(long, default_value = "")]
    pub dept_dir_destinataire: String,
    #[arg(long, default_value = "")]
    pub date_emission: String,
    /// Defaults to today (JJ/MM/AAAA).
    #[arg(long)]
    pub date_du_jour: Option<String>,
    #[arg(long, default_value = "")]
    pub periode_concernee: String,
    #[arg(long, default_value = "")]
    pub somme_facture: String,
    /// Line item "designation;type;unite;quantite;prix_unitaire" (up to 5).
    #[arg(long = "ligne")]
    pub lignes: Vec<String>,
}

impl GenerateArgs {
    pub fn into_form(self) -> ManualForm {
        ManualForm {
            code_projet: self.code_projet,
            code_sous_projet: self.code_sous_projet,
            numero_otfi: self.numero_otfi,
            pole_emettrice: self.pole_emettrice,
            pole_destinataire: self.pole_destinataire,
            dept_dir_emettrice: self.dept_dir_emettrice,
            dept_dir_destinataire: self.dept_dir_destinataire,
            date_emission: self.date_emission,
            date_du_jour: self
                .date_du_jour
                .unwrap_or_else(|| Local::now().format("%d/%m/%Y").to_string()),
            periode_concernee: self.periode_concernee,
            somme_facture: self.somme_facture,
            lines: self.lignes.iter().map(|l| LineInput::parse(l)).collect(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// Show entries, optionally filtered.
    List(HistoryFilterArgs),
    /// Delete entry <n> as numbered by `history list`.
    Remove {
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        number: u64,
    },
    /// Export the history to .xlsx.
    Export { path: PathBuf },
}

#[derive(Args, Debug, Default)]
pub struct HistoryFilterArgs {
    /// Exact date, JJ/MM/AAAA.
    #[arg(long)]
    pub date: Option<String>,
    /// Start date, JJ/MM/AAAA.
    #[arg(long)]
    pub from: Option<String>,
    /// End date, JJ/MM/AAAA.
    #[arg(long)]
    pub to: Option<String>,
    /// Exact amount (FCFA).
    #[arg(long)]
    pub amount: Option<String>,
    #[arg(long)]
    pub min: Option<String>,
    #[arg(long)]
    pub max: Option<String>,
    /// Text searched in file name, OTFI number and project codes.
    #[arg(long)]
    pub title: Option<String>,
}

fn parse_or_warn<T>(flag: &str, raw: Option<&str>, parse: fn(&str) -> Option<T>) -> Option<T> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty())?;
    let parsed = parse(raw);
    if parsed.is_none() {
        warn!("--{} '{}' ignored (invalid value)", flag, raw);
    }
    parsed
}

impl HistoryFilterArgs {
    pub fn to_filter(&self) -> HistoryFilter {
        HistoryFilter {
            date: parse_or_warn("date", self.date.as_deref(), parse_filter_date),
            date_from: parse_or_warn("from", self.from.as_deref(), parse_filter_date),
            date_to: parse_or_warn("to", self.to.as_deref(), parse_filter_date),
            amount: parse_or_warn("amount", self.amount.as_deref(), parse_filter_amount),
            amount_min: parse_or_warn("min", self.min.as_deref(), parse_filter_amount),
            amount_max: parse_or_warn("max", self.max.as_deref(), parse_filter_amount),
            title: self.title.clone(),
        }
    }
}

pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Parse arguments, set up logging and configuration, dispatch.
pub fn run() -> Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = AppConfig::resolve(ConfigOverrides {
        template: cli.template,
        output_dir: cli.output_dir,
        history: cli.history,
    });
    execute(cli.command, &config)
}

pub fn execute(command: Command, config: &AppConfig) -> Result<()> {
    match command {
        Command::Generate(args) => generate(args, config),
        Command::Batch { excel } => batch(&excel, config),
        Command::History { action } => history(action, config),
        Command::ExportTemplate { path } => {
            let written = export_spreadsheet_template(&path)?;
            println!("Modèle Excel enregistré : {}", written.display());
            Ok(())
        }
        Command::InitTemplate { path, force } => {
            if path.exists() && !force {
                bail!("{} existe déjà (utilisez --force pour le remplacer)", path.display());
            }
            write_starter_template(&path)?;
            println!("Modèle Word enregistré : {}", path.display());
            Ok(())
        }
        Command::Placeholders => placeholders(config),
        Command::Show { document } => {
            print!("{}", document_text(&document)?);
            Ok(())
        }
    }
}

fn open_renderer(config: &AppConfig) -> Result<DocumentRenderer> {
    DocumentRenderer::new(&config.template_path)
        .with_context(|| format!("modèle Word {}", config.template_path.display()))
}

fn generate(args: GenerateArgs, config: &AppConfig) -> Result<()> {
    let record = args.into_form().build()?;
    let output_dir = config.require_output_dir()?;
    let renderer = open_renderer(config)?;
    let mut history = HistoryStore::load(&config.history_path);
    let path = renderer.render_invoice(&record, output_dir)?;
    println!("Facture générée : {}", path.display());
    if let Err(e) = history.append(&path, &record) {
        eprintln!("Historique non mis à jour : {}", e);
    }
    Ok(())
}

fn batch(excel: &Path, config: &AppConfig) -> Result<()> {
    let output_dir = config.require_output_dir()?;
    let renderer = open_renderer(config)?;
    let source = SheetSource::open(excel)?;
    info!("{} rows in {}", source.len(), source.path().display());
    let mut history = HistoryStore::load(&config.history_path);

    let report = generate_batch(source.records(), &renderer, output_dir, &mut history);
    for path in &report.generated {
        println!("{}", path.display());
    }
    println!(
        "{} facture(s) générée(s) dans {}",
        report.generated.len(),
        output_dir.display()
    );
    for failure in &report.history_failures {
        eprintln!(
            "ligne {} ({}) : générée mais absente de l'historique : {}",
            failure.row, failure.identifier, failure.error
        );
    }
    if !report.failures.is_empty() {
        for failure in &report.failures {
            eprintln!("ligne {} ({}) : {}", failure.row, failure.identifier, failure.error);
        }
        bail!("{} ligne(s) en échec", report.failures.len());
    }
    Ok(())
}

fn history(action: HistoryAction, config: &AppConfig) -> Result<()> {
    let mut store = HistoryStore::load(&config.history_path);
    match action {
        HistoryAction::List(args) => {
            let filter = args.to_filter();
            let mut shown = 0;
            for (index, entry) in filter.apply(store.entries()) {
                println!("{:>4}. {}", index + 1, display_line(entry));
                shown += 1;
            }
            if shown == 0 {
                println!("Aucune facture dans l'historique.");
            }
        }
        HistoryAction::Remove { number } => {
            let index = usize::try_from(number - 1).context("numéro d'entrée trop grand")?;
            let removed = store.remove(index)?;
            println!("Supprimé : {}", display_line(&removed));
        }
        HistoryAction::Export { path } => {
            if store.is_empty() {
                println!("Aucune facture dans l'historique.");
                return Ok(());
            }
            let written = export_history(store.entries(), &path)?;
            println!("Historique exporté : {}", written.display());
        }
    }
    Ok(())
}

fn placeholders(config: &AppConfig) -> Result<()> {
    let renderer = open_renderer(config)?;
    for name in renderer.placeholders() {
        let known = SCALAR_PLACEHOLDERS.contains(&name.as_str()) || name == LIGNES || name == TOTAL_HT;
        if known {
            println!("{}", name);
        } else {
            println!("{} (rempli par nom normalisé ou vide)", name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::template::DocxTemplate;

    fn config(dir: &Path) -> AppConfig {
        AppConfig {
            template_path: dir.join("modele.docx"),
            output_dir: Some(dir.join("out")),
            history_path: dir.join("history.json"),
        }
    }

    #[test]
    fn parses_generate_with_lines() {
        let cli = Cli::try_parse_from([
            "facture-interne",
            "-o",
            "/tmp/out",
            "generate",
            "--numero-otfi",
            "OTFI-1",
            "--ligne",
            "Audit;Service;Lot;2;100",
            "--ligne",
            "Support;;H;1;50",
        ])
        .unwrap();
        assert_eq!(cli.output_dir, Some(PathBuf::from("/tmp/out")));
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        let form = args.into_form();
        assert_eq!(form.numero_otfi, "OTFI-1");
        assert_eq!(form.lines.len(), 2);
        assert_eq!(form.lines[1].unite, "H");
        assert_eq!(form.date_du_jour.len(), 10);
    }

    #[test]
    fn history_remove_rejects_zero() {
        assert!(Cli::try_parse_from(["facture-interne", "history", "remove", "0"]).is_err());
    }

    #[test]
    fn generate_writes_document_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        execute(
            Command::InitTemplate {
                path: config.template_path.clone(),
                force: false,
            },
            &config,
        )
        .unwrap();
        assert!(DocxTemplate::open(&config.template_path).is_ok());

        let args = GenerateArgs {
            code_projet: "PRJ-9".into(),
            date_du_jour: Some("01/04/2025".into()),
            lignes: vec!["Audit;Service;Lot;2;100".into()],
            ..GenerateArgs::default()
        };
        execute(Command::Generate(args), &config).unwrap();

        let out = dir.path().join("out").join("Facture_PRJ-9.docx");
        let text = document_text(&out).unwrap();
        assert!(text.contains("Date du jour : 01/04/2025"));
        assert_eq!(HistoryStore::load(&config.history_path).len(), 1);
    }

    #[test]
    fn generate_without_output_dir_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            output_dir: None,
            ..config(dir.path())
        };
        let args = GenerateArgs {
            code_projet: "PRJ-9".into(),
            ..GenerateArgs::default()
        };
        let err = execute(Command::Generate(args), &config).unwrap_err();
        assert!(err.to_string().contains("dossier de sortie"));
        assert!(!config.history_path.exists());
    }

    #[test]
    fn init_template_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::write(&config.template_path, b"keep").unwrap();
        let result = execute(
            Command::InitTemplate {
                path: config.template_path.clone(),
                force: false,
            },
            &config,
        );
        assert!(result.is_err());
        assert_eq!(std::fs::read(&config.template_path).unwrap(), b"keep");
    }
}
