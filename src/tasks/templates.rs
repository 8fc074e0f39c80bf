//! Template Renderer.
//!
//! `.ejs` files are rendered by the configured renderer with an empty data
//! context, renamed to `.html` and minified. Whitespace is collapsed in
//! every mode; comments survive in development only.

use super::BuildContext;
use crate::{
    config::BuildMode,
    exec,
    manifest::AssetKind,
    pipeline::{Step, StepReport, Transform},
    utils::fs::{Outcome, write_if_changed},
};
use anyhow::{Context, Result};
use std::path::Path;

pub fn run(ctx: &BuildContext) -> StepReport {
    let templates = ctx.collect(AssetKind::Templates);
    ctx.process_all(Step::Transform(Transform::Templates), &templates, |path| {
        render(ctx, path)
    })
}

fn render(ctx: &BuildContext, path: &Path) -> Result<Outcome> {
    let dest = ctx.output().join(ctx.rel(path)).with_extension("html");

    // includes resolve relative to the template itself
    let dir = path.parent().context("template has no parent directory")?;
    let output = exec!(dir; &ctx.config.build.templates.command; path)?;

    write_if_changed(&dest, &minify(&output.stdout, ctx.mode()))
}

/// Minify rendered HTML for `mode`.
pub fn minify(html: &[u8], mode: BuildMode) -> Vec<u8> {
    let production = mode.is_production();

    let mut cfg = minify_html::Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.keep_comments = !production;
    cfg.minify_css = production;
    cfg.minify_js = production;
    minify_html::minify(html, &cfg)
}
