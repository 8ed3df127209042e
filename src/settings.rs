use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::ingestion::Language;

/// Branding and display preferences persisted next to the analytics store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppData {
    pub language: Language,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum LogoSource {
    Remote(String),
    Fallback,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppDataPayload {
    pub language: Option<Language>,
    /// An empty string clears the logo.
    pub logo_url: Option<String>,
}

impl AppData {
    pub fn load(path: &Path) -> AppResult<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(data) => Ok(data),
                Err(err) => {
                    warn!(
                        target: "settings",
                        error = ?err,
                        "failed to parse app data file; regenerating defaults"
                    );
                    let defaults = Self::default();
                    defaults.persist(path)?;
                    Ok(defaults)
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let defaults = Self::default();
                defaults.persist(path)?;
                Ok(defaults)
            }
            Err(err) => Err(AppError::Io(err)),
        }
    }

    pub fn persist(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    pub fn apply_patch(&mut self, payload: &UpdateAppDataPayload) {
        if let Some(language) = payload.language {
            self.language = language;
        }
        if let Some(logo_url) = payload.logo_url.as_deref() {
            let trimmed = logo_url.trim();
            self.logo_url = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
    }

    pub fn logo(&self) -> LogoSource {
        match self.logo_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => LogoSource::Remote(url.to_string()),
            _ => LogoSource::Fallback,
        }
    }
}

pub fn app_data_path(config: &AppConfig) -> PathBuf {
    config.data_dir.join(&config.app_data_file_name)
}
