//! Build plan and sequential driver.
//!
//! A build is an explicit list of [`Step`]s:
//!
//! ```text
//! Clean ─▶ Transform × 4 (configured order) ─▶ Copy
//! ```
//!
//! Steps run one after another. Inside a step every file is processed
//! independently (in parallel), and a failing file only produces a
//! [`Failure`] in the step's [`StepReport`]. The only fatal step error is a
//! failed clean, since every later step would write into a stale tree.

use crate::{
    log,
    tasks::{self, BuildContext},
    utils::fs::Outcome,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt, io,
    path::{Path, PathBuf},
    time::Instant,
};
use thiserror::Error;

// ============================================================================
// Steps
// ============================================================================

/// One of the four source transforms. Their order is configurable per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Scripts,
    Styles,
    Templates,
    Images,
}

impl Transform {
    pub const ALL: [Self; 4] = [Self::Scripts, Self::Styles, Self::Templates, Self::Images];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Scripts => "scripts",
            Self::Styles => "styles",
            Self::Templates => "templates",
            Self::Images => "images",
        }
    }
}

/// A unit of work in a [`Plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Clean,
    Transform(Transform),
    /// Catch-all static copy; always last.
    Copy,
}

impl Step {
    /// Log prefix and display name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Transform(transform) => transform.name(),
            Self::Copy => "copy",
        }
    }
}

impl From<Transform> for Step {
    fn from(transform: Transform) -> Self {
        Self::Transform(transform)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered list of steps to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    /// Full build for the context's mode: clean, transforms in configured order, copy.
    pub fn full(ctx: &BuildContext) -> Self {
        let mut steps = vec![Step::Clean];
        steps.extend(ctx.config.transform_order().iter().copied().map(Step::from));
        steps.push(Step::Copy);
        Self { steps }
    }

    /// Rebuild only `transforms` (deduplicated, in the configured order), then copy.
    pub fn partial(ctx: &BuildContext, transforms: &[Transform]) -> Self {
        let mut steps: Vec<Step> = ctx
            .config
            .transform_order()
            .iter()
            .filter(|t| transforms.contains(t))
            .copied()
            .map(Step::from)
            .collect();
        steps.push(Step::Copy);
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

// ============================================================================
// Reports
// ============================================================================

/// A file that could not be processed.
#[derive(Debug)]
pub struct Failure {
    pub path: PathBuf,
    pub error: anyhow::Error,
}

/// Per-step tally.
#[derive(Debug)]
pub struct StepReport {
    pub step: Step,
    pub written: usize,
    pub unchanged: usize,
    pub failures: Vec<Failure>,
}

impl StepReport {
    pub const fn new(step: Step) -> Self {
        Self {
            step,
            written: 0,
            unchanged: 0,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, path: &Path, result: anyhow::Result<Outcome>) {
        match result {
            Ok(Outcome::Written) => self.written += 1,
            Ok(Outcome::Unchanged) => self.unchanged += 1,
            Err(error) => self.failures.push(Failure {
                path: path.to_path_buf(),
                error,
            }),
        }
    }

    /// Fold another report of the same step into this one.
    pub fn merge(&mut self, other: Self) {
        self.written += other.written;
        self.unchanged += other.unchanged;
        self.failures.extend(other.failures);
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0 && self.unchanged == 0 && self.failures.is_empty()
    }
}

/// Reports of every step that ran.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub steps: Vec<StepReport>,
}

impl BuildReport {
    pub fn written(&self) -> usize {
        self.steps.iter().map(|s| s.written).sum()
    }

    pub fn failures(&self) -> usize {
        self.steps.iter().map(|s| s.failures.len()).sum()
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to clean output directory `{0}`")]
    Clean(PathBuf, #[source] io::Error),

    #[error("{count} file(s) failed to build")]
    Failed { count: usize },
}

// ============================================================================
// Driver
// ============================================================================

/// Execute every step of `plan` in order.
///
/// Per-file failures are logged and collected; only a failed clean stops
/// the run early.
pub fn run(ctx: &BuildContext, plan: &Plan) -> Result<BuildReport, PipelineError> {
    let mut report = BuildReport::default();
    for &step in plan.steps() {
        let step_report = run_step(ctx, step)?;
        log_step(ctx, &step_report);
        report.steps.push(step_report);
    }
    Ok(report)
}

/// Run the full plan for the context's mode.
///
/// A production build that finished with failed files is an error, raised
/// only after every step has run. Development builds merely log failures.
pub fn build(ctx: &BuildContext) -> Result<BuildReport, PipelineError> {
    let start = Instant::now();
    let mode = ctx.config.mode;
    log!("build"; "{} build into {}", mode.name(), ctx.output().display());

    let report = run(ctx, &Plan::full(ctx))?;
    let count = report.failures();

    log!("build"; "{} files written, {count} failed in {:.2?}", report.written(), start.elapsed());

    if count > 0 && mode.is_production() {
        return Err(PipelineError::Failed { count });
    }
    Ok(report)
}

pub fn run_step(ctx: &BuildContext, step: Step) -> Result<StepReport, PipelineError> {
    let report = match step {
        Step::Clean => tasks::clean::run(ctx)?,
        Step::Transform(Transform::Scripts) => tasks::scripts::run(ctx),
        Step::Transform(Transform::Styles) => tasks::styles::run(ctx),
        Step::Transform(Transform::Templates) => tasks::templates::run(ctx),
        Step::Transform(Transform::Images) => tasks::images::run(ctx),
        Step::Copy => tasks::copy::run(ctx),
    };
    Ok(report)
}

fn log_step(ctx: &BuildContext, report: &StepReport) {
    let name = report.step.name();
    for failure in &report.failures {
        log!(name; "{}: {:#}", ctx.display_path(&failure.path), failure.error);
    }
    if !report.is_empty() {
        log!(name; "{} written, {} unchanged, {} failed", report.written, report.unchanged, report.failures.len());
    }
}

// ============================================================================
// Tests
// ============================================================================
