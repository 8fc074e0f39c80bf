//! Declarative asset classes.
//!
//! Every source file belongs to at most one [`AssetKind`]. Each class is
//! an include glob set, an exclude glob set and a base directory below
//! which `_`-prefixed files and directories are private. The transforms,
//! the static copier and the watcher all consult the same [`Manifest`], so
//! selection rules are written down exactly once.
//!
//! | Kind        | Include (relative to `build.source`)  | Base          |
//! |-------------|---------------------------------------|---------------|
//! | `Scripts`   | `_ts/**/*.ts`                         | `_ts`         |
//! | `Libs`      | `js/libs/*.js`                        | `js/libs`     |
//! | `Styles`    | `_scss/**/*.{scss,sass}`              | `_scss`       |
//! | `Templates` | `**/*.ejs`                            | source root   |
//! | `Images`    | `**/*.{png,jpg,jpeg,gif,svg,pdf}`     | source root   |
//! | `Static`    | everything else not excluded          | source root   |

use crate::{
    config::{BuildConfig, ConfigError},
    pipeline::Transform,
};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

/// Image extensions handled by the optimizer.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "pdf"];

/// Source-only extensions never copied verbatim.
const SOURCE_EXTENSIONS: &[&str] = &["ejs", "ts", "js", "scss", "sass"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Script entry points, bundled one by one.
    Scripts,
    /// Prebuilt library scripts, copied unchanged.
    Libs,
    /// Style entry points.
    Styles,
    /// Templated markup.
    Templates,
    /// Raster and vector images.
    Images,
    /// Everything else, copied verbatim.
    Static,
}

/// One named class of source files.
#[derive(Debug)]
struct AssetClass {
    kind: AssetKind,
    include: GlobSet,
    exclude: GlobSet,
}

impl AssetClass {
    fn matches(&self, rel: &Path) -> bool {
        self.include.is_match(rel) && !self.exclude.is_match(rel)
    }
}

/// Globs marking a transform's interest in a changed file.
///
/// Wider than the include sets: editing a partial (`_scss/_vars.scss`)
/// must rebuild every style entry even though the partial is no entry.
#[derive(Debug)]
struct WatchSet {
    transform: Transform,
    globs: GlobSet,
}

/// Asset classes for one source tree.
#[derive(Debug)]
pub struct Manifest {
    classes: Vec<AssetClass>,
    /// `build.ignore` patterns.
    ignored: GlobSet,
    /// Private paths relative to the source root.
    private: GlobSet,
    /// The image-only directory; non-images inside are dropped.
    images_dir: PathBuf,
    watch: Vec<WatchSet>,
}

impl Manifest {
    /// Compile the manifest from `[build]` settings.
    ///
    /// # Errors
    /// Returns [`ConfigError::Glob`] if a configured path or ignore pattern
    /// is not a valid glob.
    pub fn new(build: &BuildConfig) -> Result<Self, ConfigError> {
        let scripts = slash(&build.scripts.dir);
        let libs = slash(&build.scripts.libs);
        let styles = slash(&build.styles.dir);

        let script_entries = format!("{scripts}/**/*.ts");
        let script_libs = format!("{scripts}/libs/*.ts");
        let lib_files = format!("{libs}/*.js");
        let style_entries = format!("{styles}/**/*.{{scss,sass}}");
        let images = format!("**/*.{{{}}}", IMAGE_EXTENSIONS.join(","));

        let classes = vec![
            class(
                AssetKind::Scripts,
                &[script_entries.as_str()],
                &[script_libs.as_str(), "**/*.d.ts"],
                &scripts,
            )?,
            class(AssetKind::Libs, &[lib_files.as_str()], &[], &libs)?,
            class(AssetKind::Styles, &[style_entries.as_str()], &[], &styles)?,
            class(AssetKind::Templates, &["**/*.ejs"], &[], "")?,
            class(AssetKind::Images, &[images.as_str()], &[], "")?,
        ];

        let ignored: Vec<&str> = build.ignore.iter().map(String::as_str).collect();
        let private = private_patterns("");

        let watch = vec![
            watch_set(Transform::Scripts, &["**/*.ts", lib_files.as_str()])?,
            watch_set(Transform::Styles, &["**/*.{scss,sass}"])?,
            watch_set(Transform::Templates, &["**/*.ejs"])?,
            watch_set(Transform::Images, &[images.as_str()])?,
        ];

        Ok(Self {
            classes,
            ignored: glob_set(&ignored)?,
            private: glob_set(&private.each_ref().map(String::as_str))?,
            images_dir: build.images.dir.clone(),
            watch,
        })
    }

    /// Classify a path relative to the source root.
    ///
    /// Returns `None` for ignored and private files and for anything that
    /// has no output (non-images in the images directory, stray sources).
    pub fn classify(&self, rel: &Path) -> Option<AssetKind> {
        if self.ignored.is_match(rel) {
            return None;
        }

        // Class bases may themselves be private (`_ts`), so classes carry
        // their own private exclusions and are matched first.
        if let Some(class) = self.classes.iter().find(|c| c.matches(rel)) {
            return Some(class.kind);
        }

        if self.private.is_match(rel) || rel.starts_with(&self.images_dir) {
            return None;
        }

        let source_only = rel
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e) || IMAGE_EXTENSIONS.contains(&e));

        (!source_only).then_some(AssetKind::Static)
    }

    /// Transforms interested in a changed path (relative to the source root).
    pub fn triggered(&self, rel: &Path) -> Vec<Transform> {
        self.watch
            .iter()
            .filter(|w| w.globs.is_match(rel))
            .map(|w| w.transform)
            .collect()
    }
}

// ============================================================================
// Glob helpers
// ============================================================================

/// `**/_*` and `**/_*/**` below `base`: private files and everything inside private dirs.
fn private_patterns(base: &str) -> [String; 2] {
    if base.is_empty() {
        ["**/_*".into(), "**/_*/**".into()]
    } else {
        [format!("{base}/**/_*"), format!("{base}/**/_*/**")]
    }
}

fn class(
    kind: AssetKind,
    include: &[&str],
    exclude: &[&str],
    base: &str,
) -> Result<AssetClass, ConfigError> {
    let private = private_patterns(base);
    let exclude: Vec<&str> = exclude
        .iter()
        .copied()
        .chain(private.iter().map(String::as_str))
        .collect();

    Ok(AssetClass {
        kind,
        include: glob_set(include)?,
        exclude: glob_set(&exclude)?,
    })
}

fn watch_set(transform: Transform, globs: &[&str]) -> Result<WatchSet, ConfigError> {
    Ok(WatchSet {
        transform,
        globs: glob_set(globs)?,
    })
}

fn glob_set(patterns: &[&str]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|err| ConfigError::Glob((*pattern).to_owned(), err))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|err| ConfigError::Glob(patterns.join(", "), err))
}

/// Config directories as glob prefixes: forward slashes, no trailing slash.
fn slash(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .trim_end_matches('/')
        .to_owned()
}

// ============================================================================
// Tests
// ============================================================================
