//! Pipeline steps.
//!
//! | Module      | Step                                          |
//! |-------------|-----------------------------------------------|
//! | `clean`     | delete the output tree (production only)      |
//! | `scripts`   | bundle entry points, copy library scripts     |
//! | `styles`    | sass → css, prefixing, lowering, source maps  |
//! | `templates` | render ejs, minify html                       |
//! | `images`    | compress images (production only)             |
//! | `copy`      | copy everything else verbatim                 |
//!
//! Every step receives the same [`BuildContext`] and processes its files
//! independently through [`BuildContext::process_all`].

pub mod clean;
pub mod copy;
pub mod images;
pub mod scripts;
pub mod styles;
pub mod templates;

use crate::{
    cache::FileCache,
    config::{BuildMode, ConfigError, ProjectConfig},
    manifest::{AssetKind, Manifest},
    pipeline::{Step, StepReport},
    utils::fs::{Outcome, collect_all_files},
};
use anyhow::Result;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Everything a step needs: the configuration (including the build mode),
/// the compiled manifest and the session cache.
#[derive(Debug)]
pub struct BuildContext {
    pub config: ProjectConfig,
    pub manifest: Manifest,
    pub lib_cache: FileCache,
}

impl BuildContext {
    pub fn new(config: ProjectConfig) -> Result<Self, ConfigError> {
        let manifest = Manifest::new(&config.build)?;
        Ok(Self {
            config,
            manifest,
            lib_cache: FileCache::new(),
        })
    }

    pub fn mode(&self) -> BuildMode {
        self.config.mode
    }

    pub fn source(&self) -> &Path {
        &self.config.build.source
    }

    pub fn output(&self) -> &Path {
        self.config.output_dir()
    }

    /// Path relative to the source root.
    pub fn rel<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(self.source()).unwrap_or(path)
    }

    /// Path relative to the project root, for log lines.
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(self.config.get_root())
            .unwrap_or(path)
            .display()
            .to_string()
    }

    /// All source files the manifest assigns to `kind`, sorted.
    pub fn collect(&self, kind: AssetKind) -> Vec<PathBuf> {
        collect_all_files(self.source())
            .into_iter()
            .filter(|path| self.manifest.classify(self.rel(path)) == Some(kind))
            .collect()
    }

    /// Run `process` over `files` in parallel and tally the outcomes.
    ///
    /// A failing file never stops the others.
    pub fn process_all<F>(&self, step: Step, files: &[PathBuf], process: F) -> StepReport
    where
        F: Fn(&Path) -> Result<Outcome> + Sync,
    {
        let results: Vec<(&PathBuf, Result<Outcome>)> =
            files.par_iter().map(|path| (path, process(path))).collect();

        let mut report = StepReport::new(step);
        for (path, result) in results {
            report.record(path, result);
        }
        report
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{collections::BTreeMap, fs, time::SystemTime};
    use tempfile::TempDir;

    /// Scratch project with an empty `src/`; `cat` stands in for the
    /// bundler and the renderer.
    pub fn context(
        mode: BuildMode,
        configure: impl FnOnce(&mut ProjectConfig),
    ) -> (TempDir, BuildContext) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();

        let mut config = ProjectConfig::default();
        config.build.scripts.command = vec!["cat".into()];
        config.build.templates.command = vec!["cat".into()];
        configure(&mut config);
        config.resolve_paths(dir.path());
        config.select_mode(mode);

        (dir, BuildContext::new(config).unwrap())
    }

    /// Write a file below `src/`, creating parent directories.
    pub fn write_source(ctx: &BuildContext, rel: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = ctx.source().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    /// Relative path → (bytes, mtime) for every file in the output tree.
    pub fn snapshot(ctx: &BuildContext) -> BTreeMap<PathBuf, (Vec<u8>, SystemTime)> {
        collect_all_files(ctx.output())
            .into_iter()
            .map(|path| {
                let rel = path.strip_prefix(ctx.output()).unwrap().to_path_buf();
                let mtime = fs::metadata(&path).unwrap().modified().unwrap();
                (rel, (fs::read(&path).unwrap(), mtime))
            })
            .collect()
    }

    #[test]
    fn test_collect_by_kind() {
        let (_dir, ctx) = context(BuildMode::Development, |_| {});
        write_source(&ctx, "index.ejs", "");
        write_source(&ctx, "_parts/nav.ejs", "");
        write_source(&ctx, "robots.txt", "");

        let templates = ctx.collect(AssetKind::Templates);
        assert_eq!(templates, vec![ctx.source().join("index.ejs")]);
        assert_eq!(ctx.collect(AssetKind::Static).len(), 1);
        assert!(ctx.collect(AssetKind::Images).is_empty());
    }

    #[test]
    fn test_process_all_isolates_failures() {
        let (_dir, ctx) = context(BuildMode::Development, |_| {});
        let files = vec![PathBuf::from("ok"), PathBuf::from("bad"), PathBuf::from("same")];

        let report = ctx.process_all(Step::Copy, &files, |path| match path.to_str() {
            Some("bad") => anyhow::bail!("broken"),
            Some("same") => Ok(Outcome::Unchanged),
            _ => Ok(Outcome::Written),
        });

        assert_eq!(report.written, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, PathBuf::from("bad"));
    }

    #[test]
    fn test_output_follows_mode() {
        let (_dir, dev) = context(BuildMode::Development, |_| {});
        assert!(dev.output().ends_with("dev"));
        let (_dir, prod) = context(BuildMode::Production, |_| {});
        assert!(prod.output().ends_with("dist"));
        assert_eq!(dev.rel(&dev.source().join("a/b.txt")), Path::new("a/b.txt"));
    }
}
