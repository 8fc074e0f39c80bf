//! Script Transpiler.
//!
//! Each entry point below `scripts.dir` is handed to the bundler on its own
//! and lands at `<output>/<scripts.output>/<rel>.js`. Library scripts are
//! prebuilt and copied as they are.

use super::BuildContext;
use crate::{
    exec,
    manifest::AssetKind,
    pipeline::{Step, StepReport, Transform},
    utils::{
        exec::BUNDLER_FILTER,
        fs::{Outcome, write_if_changed},
    },
};
use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

const STEP: Step = Step::Transform(Transform::Scripts);

pub fn run(ctx: &BuildContext) -> StepReport {
    let entries = ctx.collect(AssetKind::Scripts);
    let mut report = ctx.process_all(STEP, &entries, |entry| bundle(ctx, entry));

    let libs = ctx.collect(AssetKind::Libs);
    report.merge(ctx.process_all(STEP, &libs, |lib| copy_lib(ctx, lib)));

    report
}

/// `_ts/pages/top.ts` → `<output>/js/pages/top.js`
fn bundle_path(ctx: &BuildContext, entry: &Path) -> Result<PathBuf> {
    let scripts = &ctx.config.build.scripts;
    let rel = entry
        .strip_prefix(ctx.source().join(&scripts.dir))
        .with_context(|| format!("{} is outside the scripts directory", entry.display()))?;

    Ok(ctx
        .output()
        .join(&scripts.output)
        .join(rel)
        .with_extension("js"))
}

fn bundle(ctx: &BuildContext, entry: &Path) -> Result<Outcome> {
    let scripts = &ctx.config.build.scripts;
    let dest = bundle_path(ctx, entry)?;

    let mut command = scripts.command.clone();
    if ctx.mode().is_production() {
        command.extend(scripts.production_args.iter().cloned());
    }

    // Run from the project root so the bundler finds node_modules and tsconfig.json
    let output = exec!(filter=&BUNDLER_FILTER; ctx.config.get_root(); &command; entry)?;
    write_if_changed(&dest, &output.stdout)
}

fn copy_lib(ctx: &BuildContext, lib: &Path) -> Result<Outcome> {
    let dest = ctx.output().join(ctx.rel(lib));
    let contents = fs::read(lib).with_context(|| format!("Failed to read {}", lib.display()))?;

    if dest.exists() && ctx.lib_cache.is_fresh(lib, &contents) {
        return Ok(Outcome::Unchanged);
    }

    let outcome = write_if_changed(&dest, &contents)?;
    ctx.lib_cache.record(lib, &contents);
    Ok(outcome)
}
