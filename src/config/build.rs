//! `[build]` section configuration.
//!
//! Contains source/output paths and the settings of every transform.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Main BuildConfig
// ============================================================================

/// `[build]` section in kiln.toml - build pipeline configuration.
///
/// # Example
/// ```toml
/// [build]
/// source = "src"     # Authored assets
/// output = "dev"     # Development output
/// dist = "dist"      # Production output
///
/// [build.scripts]
/// command = ["esbuild", "--bundle"]
///
/// [build.images]
/// png_quality = [80, 90]
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Project root directory (usually set via CLI `--root`).
    #[serde(default = "defaults::build::root")]
    #[educe(Default = defaults::build::root())]
    pub root: Option<PathBuf>,

    /// Source tree.
    #[serde(default = "defaults::build::source")]
    #[educe(Default = defaults::build::source())]
    pub source: PathBuf,

    /// Output tree for development builds.
    #[serde(default = "defaults::build::output")]
    #[educe(Default = defaults::build::output())]
    pub output: PathBuf,

    /// Output tree for production builds. Deleted before every production build.
    #[serde(default = "defaults::build::dist")]
    #[educe(Default = defaults::build::dist())]
    pub dist: PathBuf,

    /// Glob patterns (relative to `source`) never processed by any transform.
    #[serde(default = "defaults::build::ignore")]
    #[educe(Default = defaults::build::ignore())]
    pub ignore: Vec<String>,

    /// TypeScript bundling.
    #[serde(default)]
    pub scripts: ScriptsConfig,

    /// Sass compilation.
    #[serde(default)]
    pub styles: StylesConfig,

    /// EJS rendering.
    #[serde(default)]
    pub templates: TemplatesConfig,

    /// Image optimization.
    #[serde(default)]
    pub images: ImagesConfig,
}

// ============================================================================
// Sub-configurations
// ============================================================================

/// `[build.scripts]` section.
///
/// Every entry point is bundled by running `command` with the entry path
/// appended; the bundle is read from stdout.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct ScriptsConfig {
    /// Script sources, relative to `source`.
    #[serde(default = "defaults::build::scripts::dir")]
    #[educe(Default = defaults::build::scripts::dir())]
    pub dir: PathBuf,

    /// Bundle directory, relative to the output tree.
    #[serde(default = "defaults::build::scripts::output")]
    #[educe(Default = defaults::build::scripts::output())]
    pub output: PathBuf,

    /// Prebuilt library scripts copied as-is, relative to `source`.
    #[serde(default = "defaults::build::scripts::libs")]
    #[educe(Default = defaults::build::scripts::libs())]
    pub libs: PathBuf,

    /// Bundler command and arguments.
    #[serde(default = "defaults::build::scripts::command")]
    #[educe(Default = defaults::build::scripts::command())]
    pub command: Vec<String>,

    /// Extra bundler arguments for production builds, e.g. `["--minify"]`.
    #[serde(default)]
    pub production_args: Vec<String>,
}

/// `[build.styles]` section.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct StylesConfig {
    /// Sass sources, relative to `source`.
    #[serde(default = "defaults::build::styles::dir")]
    #[educe(Default = defaults::build::styles::dir())]
    pub dir: PathBuf,

    /// Stylesheet directory, relative to the output tree.
    #[serde(default = "defaults::build::styles::output")]
    #[educe(Default = defaults::build::styles::output())]
    pub output: PathBuf,

    /// Browserslist queries used for prefixing and syntax lowering.
    #[serde(default = "defaults::build::styles::browsers")]
    #[educe(Default = defaults::build::styles::browsers())]
    pub browsers: Vec<String>,
}

/// `[build.templates]` section.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct TemplatesConfig {
    /// Renderer command; the template path is appended, HTML is read from stdout.
    #[serde(default = "defaults::build::templates::command")]
    #[educe(Default = defaults::build::templates::command())]
    pub command: Vec<String>,
}

/// `[build.images]` section.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct ImagesConfig {
    /// Image-only directory, relative to `source`. Non-image files inside are dropped.
    #[serde(default = "defaults::build::images::dir")]
    #[educe(Default = defaults::build::images::dir())]
    pub dir: PathBuf,

    /// PNG quantization quality range `[min, target]`, 0-100.
    #[serde(default = "defaults::build::images::png_quality")]
    #[educe(Default = defaults::build::images::png_quality())]
    pub png_quality: [u8; 2],

    /// PNG quantization speed, 1 (slowest, best) to 10.
    #[serde(default = "defaults::build::images::png_speed")]
    #[educe(Default = defaults::build::images::png_speed())]
    pub png_speed: i32,

    /// JPEG re-encoding quality, 1-100.
    #[serde(default = "defaults::build::images::jpeg_quality")]
    #[educe(Default = defaults::build::images::jpeg_quality())]
    pub jpeg_quality: u8,

    /// GIF optimizer command; the image path is appended, output read from stdout.
    #[serde(default = "defaults::build::images::gif_command")]
    #[educe(Default = defaults::build::images::gif_command())]
    pub gif_command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::super::ProjectConfig;
    use std::path::PathBuf;

    #[test]
    fn test_build_config_defaults() {
        let config: ProjectConfig = toml::from_str("").unwrap();

        assert_eq!(config.build.source, PathBuf::from("src"));
        assert_eq!(config.build.output, PathBuf::from("dev"));
        assert_eq!(config.build.dist, PathBuf::from("dist"));
        assert_eq!(config.build.scripts.dir, PathBuf::from("_ts"));
        assert_eq!(config.build.scripts.libs, PathBuf::from("js/libs"));
        assert_eq!(config.build.styles.dir, PathBuf::from("_scss"));
        assert_eq!(config.build.styles.output, PathBuf::from("css"));
        assert_eq!(config.build.images.png_quality, [85, 90]);
        assert_eq!(config.build.images.png_speed, 1);
        assert_eq!(config.build.images.jpeg_quality, 90);
        assert_eq!(config.build.templates.command, vec!["ejs".to_string()]);
        assert!(config.build.scripts.production_args.is_empty());
    }

    #[test]
    fn test_build_scripts_config() {
        let config = r#"
            [build.scripts]
            dir = "ts"
            command = ["esbuild", "--bundle"]
            production_args = ["--minify"]
        "#;
        let config: ProjectConfig = toml::from_str(config).unwrap();

        assert_eq!(config.build.scripts.dir, PathBuf::from("ts"));
        assert_eq!(config.build.scripts.command, vec!["esbuild", "--bundle"]);
        assert_eq!(config.build.scripts.production_args, vec!["--minify"]);
        // untouched fields keep their defaults
        assert_eq!(config.build.scripts.output, PathBuf::from("js"));
    }

    #[test]
    fn test_build_styles_browsers() {
        let config = r#"
            [build.styles]
            browsers = ["defaults"]
        "#;
        let config: ProjectConfig = toml::from_str(config).unwrap();
        assert_eq!(config.build.styles.browsers, vec!["defaults"]);
    }

    #[test]
    fn test_unknown_field_rejection() {
        let config = r#"
            [build.images]
            webp = true
        "#;
        let result: Result<ProjectConfig, _> = toml::from_str(config);
        assert!(result.is_err());
    }
}
