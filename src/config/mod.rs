//! Project configuration management for `kiln.toml`.
//!
//! # Sections
//!
//! | Section             | Purpose                                        |
//! |---------------------|------------------------------------------------|
//! | `[build]`           | Source/output paths, ignore patterns           |
//! | `[build.scripts]`   | Bundler command, script directories            |
//! | `[build.styles]`    | Sass directory, browser targets                |
//! | `[build.templates]` | Template renderer command                      |
//! | `[build.images]`    | Compression settings                           |
//! | `[pipeline]`        | Transform order per build mode                 |
//! | `[serve]`           | Development server (port, interface, watch)    |
//!
//! The file is optional: a project without `kiln.toml` builds with defaults.
//!
//! # Example
//!
//! ```toml
//! [build]
//! source = "src"
//! output = "dev"
//! dist = "dist"
//!
//! [build.scripts]
//! production_args = ["--minify"]
//!
//! [serve]
//! port = 8000
//! ```

mod build;
pub mod defaults;
mod error;
mod pipeline;
mod serve;

pub use build::{BuildConfig, ImagesConfig};
pub use error::ConfigError;
pub use pipeline::PipelineConfig;
pub use serve::ServeConfig;

use crate::{
    cli::{Cli, Commands},
    log,
    pipeline::Transform,
    utils::fs::normalize_path,
};
use anyhow::{Result, bail};
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// Build Mode
// ============================================================================

/// Selects the output directory and the behavior variant of every transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildMode {
    /// Unminified output with source maps, served locally.
    #[default]
    Development,
    /// Minified, compressed output in a freshly cleaned directory.
    Production,
}

impl BuildMode {
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure representing kiln.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Build mode, chosen once from the invoked command
    #[serde(skip)]
    pub mode: BuildMode,

    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Transform order per mode
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Development server settings
    #[serde(default)]
    pub serve: ServeConfig,
}

impl ProjectConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: ProjectConfig = toml::from_str(content).map_err(ConfigError::Toml)?;
        Ok(config)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&content)
    }

    /// Load the config selected by the CLI, apply CLI overrides and pick the build mode.
    pub fn load(cli: &Cli) -> Result<Self> {
        let root = cli.root.clone().unwrap_or_else(|| PathBuf::from("./"));
        let config_path = root.join(&cli.config);

        let mut config = if config_path.exists() {
            Self::from_path(&config_path)?
        } else {
            log!("config"; "{} not found, using defaults", cli.config.display());
            Self::default()
        };
        config.config_path = normalize_path(&config_path);

        let root = config.build.root.clone().map_or(root.clone(), |r| root.join(r));
        config.resolve_paths(&root);
        config.update_with_cli(cli);
        Ok(config)
    }

    /// Get the root directory path
    pub fn get_root(&self) -> &Path {
        self.build.root.as_deref().unwrap_or(Path::new("./"))
    }

    /// Set the root directory path
    pub fn set_root(&mut self, path: &Path) {
        self.build.root = Some(path.to_path_buf())
    }

    /// Switch the build mode. Production redirects [`Self::output_dir`] to `build.dist`.
    pub fn select_mode(&mut self, mode: BuildMode) {
        self.mode = mode;
    }

    /// Output tree for the current mode
    pub fn output_dir(&self) -> &Path {
        match self.mode {
            BuildMode::Development => &self.build.output,
            BuildMode::Production => &self.build.dist,
        }
    }

    /// Transform order for the current mode
    pub fn transform_order(&self) -> &[Transform] {
        match self.mode {
            BuildMode::Development => &self.pipeline.development,
            BuildMode::Production => &self.pipeline.production,
        }
    }

    /// Apply CLI overrides and select the mode of the invoked command
    fn update_with_cli(&mut self, cli: &Cli) {
        match cli.command() {
            Commands::Dev {
                interface,
                port,
                open,
                watch,
            } => {
                Self::update_option(&mut self.serve.interface, interface.as_ref());
                Self::update_option(&mut self.serve.port, port.as_ref());
                Self::update_option(&mut self.serve.open, open.as_ref());
                Self::update_option(&mut self.serve.watch, watch.as_ref());
                self.select_mode(BuildMode::Development);
            }
            Commands::Build { .. } => self.select_mode(BuildMode::Production),
        }
    }

    /// Update config option if CLI value is provided
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Resolve source and output trees against `root` as absolute paths
    pub fn resolve_paths(&mut self, root: &Path) {
        let root = normalize_path(root);
        self.set_root(&root);

        self.build.source = normalize_path(&root.join(&self.build.source));
        self.build.output = normalize_path(&root.join(&self.build.output));
        self.build.dist = normalize_path(&root.join(&self.build.dist));
    }

    /// Validate configuration before any step runs
    pub fn validate(&self) -> Result<()> {
        let build = &self.build;

        if !build.source.is_dir() {
            bail!(ConfigError::Validation(format!(
                "[build.source] `{}` is not a directory",
                build.source.display()
            )));
        }

        for (name, out) in [("output", &build.output), ("dist", &build.dist)] {
            if build.source.starts_with(out)
                || out.starts_with(&build.source)
                || out.as_path() == self.get_root()
            {
                bail!(ConfigError::Validation(format!(
                    "[build.{name}] must not overlap the source tree or be the project root"
                )));
            }
        }

        for (name, order) in [
            ("development", &self.pipeline.development),
            ("production", &self.pipeline.production),
        ] {
            PipelineConfig::check_order(name, order).map_err(ConfigError::Validation)?;
        }

        let [min, target] = build.images.png_quality;
        if min > target || target > 100 {
            bail!(ConfigError::Validation(
                "[build.images.png_quality] must be [min, target] with min <= target <= 100".into()
            ));
        }
        if !(1..=10).contains(&build.images.png_speed) {
            bail!(ConfigError::Validation(
                "[build.images.png_speed] must be between 1 and 10".into()
            ));
        }
        if !(1..=100).contains(&build.images.jpeg_quality) {
            bail!(ConfigError::Validation(
                "[build.images.jpeg_quality] must be between 1 and 100".into()
            ));
        }

        Self::check_command("[build.scripts.command]", &build.scripts.command, "scripts will fail")?;
        Self::check_command("[build.templates.command]", &build.templates.command, "templates will fail")?;
        Self::check_command("[build.images.gif_command]", &build.images.gif_command, "gifs stay unoptimized")?;

        Ok(())
    }

    /// Reject empty commands, warn when the executable is not on `PATH`.
    ///
    /// Missing tools only affect the files that need them.
    fn check_command(field: &str, command: &[String], missing: &str) -> Result<()> {
        let Some(cmd) = command.first() else {
            bail!(ConfigError::Validation(format!(
                "{field} must have at least one element"
            )));
        };

        if which::which(cmd).is_err() {
            log!("config"; "`{cmd}` from {field} not found, {missing}");
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
