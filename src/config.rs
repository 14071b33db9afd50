// Settings loaded from ~/.config/sheetgrid/config.toml, overridden by CLI flags

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite file holding sheets; defaults to the platform data dir
    pub database: Option<PathBuf>,

    /// Identity every store request is scoped to
    pub organization_id: String,
    pub user_id: String,

    /// Rows shown for a fresh sheet before any growth
    pub initial_rows: usize,

    /// Rendered width of each grid column, in terminal cells
    pub column_width: u16,

    pub log_file: Option<PathBuf>,
    /// `EnvFilter` directive used when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: None,
            organization_id: "local".into(),
            user_id: std::env::var("USER").unwrap_or_else(|_| "local".into()),
            initial_rows: 10,
            column_width: 18,
            log_file: None,
            log_filter: "sheetgrid=info".into(),
        }
    }
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sheetgrid").join("config.toml"))
    }

    /// An explicit path must exist; the default path is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("parsing {}", path.display()))
            }
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(Some(&path)),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        anyhow::ensure!(settings.initial_rows > 0, "initial_rows must be at least 1");
        anyhow::ensure!(settings.column_width >= 4, "column_width must be at least 4");
        Ok(settings)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|d| d.join("sheetgrid").join("sheets.db"))
                .unwrap_or_else(|| PathBuf::from("sheets.db"))
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sheetgrid.log"))
    }
}
