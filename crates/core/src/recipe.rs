//! Named capture/replay presets stored as `<recipes_dir>/<name>.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{CaptureConfig, ReplayConfig};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub name: String,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

impl Recipe {
    pub fn new(name: impl Into<String>, capture: CaptureConfig, replay: ReplayConfig) -> Self {
        Self {
            name: name.into(),
            capture,
            replay,
        }
    }

    /// Write the recipe, replacing any previous one with the same name.
    /// Encryption keys are never persisted.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = recipe_path(dir, &self.name)?;
        let mut stored = self.clone();
        stored.capture.encryption_key = None;
        stored.replay.encryption_key = None;

        std::fs::create_dir_all(dir)?;
        std::fs::write(&path, serde_json::to_string_pretty(&stored)?)?;
        Ok(path)
    }

    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let path = recipe_path(dir, name)?;
        if !path.exists() {
            return Err(Error::NotFound(format!("recipe '{}'", name)));
        }
        let content = std::fs::read_to_string(&path)?;
        let recipe: Recipe = serde_json::from_str(&content)?;
        Ok(recipe)
    }

    /// Sorted recipe names. A missing directory means no recipes.
    pub fn list(dir: &Path) -> Result<Vec<String>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Names are plain file stems: ASCII letters, digits, `-`, `_` and `.`.
fn recipe_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(Error::Validation(format!("invalid recipe name '{}'", name)));
    }
    Ok(dir.join(format!("{}.json", name)))
}
