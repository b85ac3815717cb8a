//! Application settings: CLI flag, then environment (`.env` included), then default.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{FactureError, Result};

pub const ENV_TEMPLATE: &str = "FACTURE_TEMPLATE";
pub const ENV_OUTPUT_DIR: &str = "FACTURE_OUTPUT_DIR";
pub const ENV_HISTORY: &str = "FACTURE_HISTORY";

pub const DEFAULT_TEMPLATE: &str = "Template/Modèle facture interne projet - V1.docx";
const APP_DIR: &str = "facture-interne";
const HISTORY_FILE: &str = "history.json";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub template_path: PathBuf,
    /// No default: the user must pick one before generating.
    pub output_dir: Option<PathBuf>,
    pub history_path: PathBuf,
}

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub template: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub history: Option<PathBuf>,
}

/// `<data_dir>/facture-interne/history.json`, or `./data/history.json`
/// when the platform has no data directory.
pub fn default_history_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("data"))
        .join(HISTORY_FILE)
}

/// Load `.env` from the working directory if present. Variables already set
/// in the environment win.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("loaded {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => debug!(".env ignored: {}", e),
    }
}

impl AppConfig {
    /// Resolve from overrides and the process environment.
    pub fn resolve(overrides: ConfigOverrides) -> Self {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve_with<F>(overrides: ConfigOverrides, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = |key: &str| env(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        AppConfig {
            template_path: overrides
                .template
                .or_else(|| from_env(ENV_TEMPLATE))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE)),
            output_dir: overrides.output_dir.or_else(|| from_env(ENV_OUTPUT_DIR)),
            history_path: overrides
                .history
                .or_else(|| from_env(ENV_HISTORY))
                .unwrap_or_else(default_history_path),
        }
    }

    /// The chosen output directory, or `OutputDirNotSelected`.
    pub fn require_output_dir(&self) -> Result<&Path> {
        self.output_dir
            .as_deref()
            .ok_or(FactureError::OutputDirNotSelected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_without_flags_or_env() {
        let config = AppConfig::resolve_with(ConfigOverrides::default(), |_| None);
        assert_eq!(config.template_path, PathBuf::from(DEFAULT_TEMPLATE));
        assert_eq!(config.output_dir, None);
        assert!(config.history_path.ends_with("facture-interne/history.json")
            || config.history_path.ends_with("data/history.json"));
        assert!(matches!(
            config.require_output_dir(),
            Err(FactureError::OutputDirNotSelected)
        ));
    }

    #[test]
    fn flags_beat_environment() {
        let vars = env(&[
            (ENV_TEMPLATE, "/env/modele.docx"),
            (ENV_OUTPUT_DIR, "/env/out"),
            (ENV_HISTORY, "  "),
        ]);
        let overrides = ConfigOverrides {
            output_dir: Some(PathBuf::from("/cli/out")),
            ..ConfigOverrides::default()
        };
        let config = AppConfig::resolve_with(overrides, |k| vars.get(k).cloned());
        assert_eq!(config.template_path, PathBuf::from("/env/modele.docx"));
        assert_eq!(config.require_output_dir().unwrap(), Path::new("/cli/out"));
        assert_eq!(config.history_path, default_history_path());
    }
}
