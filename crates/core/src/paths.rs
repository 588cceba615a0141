use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".sessionjar"))
            .unwrap_or_else(|| PathBuf::from(".sessionjar"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.base.join("captures")
    }

    /// Default capture store used when no `--output` / `--capture-file` is given.
    pub fn default_capture_file(&self) -> PathBuf {
        self.captures_dir().join("captures.jsonl")
    }

    /// Capture file named in the config file. Relative paths live under `captures/`.
    pub fn resolve_capture_file(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.captures_dir().join(file)
        }
    }

    pub fn replays_dir(&self) -> PathBuf {
        self.base.join("replays")
    }

    pub fn recipes_dir(&self) -> PathBuf {
        self.base.join("recipes")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.captures_dir())?;
        std::fs::create_dir_all(self.replays_dir())?;
        std::fs::create_dir_all(self.recipes_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
