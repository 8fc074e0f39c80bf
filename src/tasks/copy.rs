//! Static Copier: every file no transform claims is copied verbatim.

use super::BuildContext;
use crate::{
    manifest::AssetKind,
    pipeline::{Step, StepReport},
    utils::fs::copy_if_changed,
};

pub fn run(ctx: &BuildContext) -> StepReport {
    let files = ctx.collect(AssetKind::Static);
    ctx.process_all(Step::Copy, &files, |path| {
        copy_if_changed(path, &ctx.output().join(ctx.rel(path)))
    })
}
