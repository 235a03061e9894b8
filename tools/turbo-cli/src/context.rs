//! CLI execution context.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use turbo_storefront::{StorefrontConfig, CONFIG_FILE_NAMES};

use crate::output::Output;

/// Execution context for CLI commands.
pub struct Context {
    /// Output handler.
    pub output: Output,
    /// Working directory.
    pub cwd: PathBuf,
    /// Config file given with `--config`.
    explicit: Option<PathBuf>,
}

impl Context {
    pub fn load(config_path: Option<&str>, output: Output) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let explicit = config_path.map(|path| resolve(&cwd, path));
        Ok(Self {
            output,
            cwd,
            explicit,
        })
    }

    /// The config file in effect: `--config`, or the nearest one found
    /// walking up from the working directory.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.explicit
            .clone()
            .or_else(|| StorefrontConfig::discover(&self.cwd))
    }

    /// Load and validate the config, falling back to defaults when no file
    /// exists.
    pub fn config(&self) -> Result<StorefrontConfig> {
        match self.config_path() {
            Some(path) => {
                self.output
                    .debug(&format!("Using config: {}", path.display()));
                StorefrontConfig::load(&path)
                    .with_context(|| format!("Invalid config file: {}", path.display()))
            }
            None => {
                self.output.debug("No config file found, using defaults");
                Ok(StorefrontConfig::default())
            }
        }
    }

    /// Where `config init` writes.
    pub fn init_path(&self) -> PathBuf {
        self.explicit
            .clone()
            .unwrap_or_else(|| self.cwd.join(CONFIG_FILE_NAMES[0]))
    }

    /// Resolve a path relative to the working directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        resolve(&self.cwd, path)
    }
}

fn resolve(cwd: &Path, path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}
