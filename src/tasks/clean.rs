//! Cleaner: production builds start from an empty output tree.

use super::BuildContext;
use crate::{
    log,
    pipeline::{PipelineError, Step, StepReport},
};
use std::{fs, io::ErrorKind};

/// Delete the output tree in production; keep it in development so
/// unchanged files are not rewritten.
///
/// A missing tree is fine. Any other failure aborts the pipeline.
pub fn run(ctx: &BuildContext) -> Result<StepReport, PipelineError> {
    let report = StepReport::new(Step::Clean);
    if !ctx.mode().is_production() {
        return Ok(report);
    }

    let output = ctx.output();
    match fs::remove_dir_all(output) {
        Ok(()) => log!("clean"; "removed {}", ctx.display_path(output)),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(PipelineError::Clean(output.to_path_buf(), err)),
    }
    ctx.lib_cache.clear();

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::BuildMode, tasks::tests::context};

    #[test]
    fn test_production_removes_output() {
        let (_dir, ctx) = context(BuildMode::Production, |_| {});
        fs::create_dir_all(ctx.output().join("css")).unwrap();
        fs::write(ctx.output().join("css/stale.css"), "a{}").unwrap();

        run(&ctx).unwrap();
        assert!(!ctx.output().exists());
    }

    #[test]
    fn test_production_missing_output_is_ok() {
        let (_dir, ctx) = context(BuildMode::Production, |_| {});
        assert!(run(&ctx).is_ok());
    }

    #[test]
    fn test_development_keeps_output() {
        let (_dir, ctx) = context(BuildMode::Development, |_| {});
        fs::create_dir_all(ctx.output()).unwrap();
        fs::write(ctx.output().join("index.html"), "<p>").unwrap();

        run(&ctx).unwrap();
        assert!(ctx.output().join("index.html").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_is_fatal() {
        let (_dir, ctx) = context(BuildMode::Production, |_| {});
        // a file where the output directory should be cannot be removed as a tree
        fs::write(ctx.output(), "not a directory").unwrap();

        let err = run(&ctx).unwrap_err();
        assert!(matches!(err, PipelineError::Clean(ref path, _) if path == ctx.output()));
    }

    #[test]
    fn test_clears_library_cache() {
        let (_dir, ctx) = context(BuildMode::Production, |_| {});
        ctx.lib_cache.record(std::path::Path::new("js/libs/a.js"), b"a");
        run(&ctx).unwrap();
        assert!(ctx.lib_cache.is_empty());
    }
}
