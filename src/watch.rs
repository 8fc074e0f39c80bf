//! File system watcher for incremental rebuilds.
//!
//! Monitors the source tree and re-runs only the transforms whose watch
//! sets match the changed paths, followed by the static copier. After each
//! batch the live-reload channel (if any) tells connected pages to refresh.
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌──────────────────┐    ┌──────────┐
//! │  notify  │───▶│ Debouncer │───▶│ manifest watch   │───▶│ partial  │──▶ reload
//! │  events  │    │  (300ms)  │    │ sets → transforms│    │ plan     │
//! └──────────┘    └───────────┘    └──────────────────┘    └──────────┘
//! ```

use crate::{
    log,
    pipeline::{self, Plan, Transform},
    reload::LiveReload,
    tasks::BuildContext,
    utils::fs::normalize_path,
};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use rustc_hash::FxHashSet;
use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

// =============================================================================
// Constants
// =============================================================================

const DEBOUNCE_MS: u64 = 300;
const REBUILD_COOLDOWN_MS: u64 = 800;

// =============================================================================
// Path Utilities
// =============================================================================

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

/// Transforms to re-run for a batch of changed paths, in first-seen order.
///
/// Paths outside the source tree are ignored.
fn affected_transforms(ctx: &BuildContext, paths: &[PathBuf]) -> Vec<Transform> {
    let mut transforms = Vec::new();
    for path in paths {
        let path = normalize_path(path);
        let Ok(rel) = path.strip_prefix(ctx.source()) else {
            continue;
        };
        for transform in ctx.manifest.triggered(rel) {
            if !transforms.contains(&transform) {
                transforms.push(transform);
            }
        }
    }
    transforms
}

// =============================================================================
// Debounce State
// =============================================================================

/// Batches rapid file events with debouncing and rebuild cooldown.
struct Debouncer {
    pending: FxHashSet<PathBuf>,
    last_event: Option<Instant>,
    last_rebuild: Option<Instant>,
}

impl Debouncer {
    fn new() -> Self {
        Self {
            pending: FxHashSet::default(),
            last_event: None,
            last_rebuild: None,
        }
    }

    fn in_cooldown(&self) -> bool {
        self.last_rebuild
            .is_some_and(|t| t.elapsed() < Duration::from_millis(REBUILD_COOLDOWN_MS))
    }

    fn add(&mut self, event: Event) {
        for path in event.paths {
            if !is_temp_file(&path) {
                self.pending.insert(path);
            }
        }
        self.last_event = Some(Instant::now());
    }

    /// Pending changes have settled and the last rebuild is past its cooldown.
    ///
    /// Changes arriving during the cooldown stay queued for the next batch.
    fn ready(&self) -> bool {
        !self.pending.is_empty()
            && !self.in_cooldown()
            && self
                .last_event
                .is_some_and(|t| t.elapsed() >= Duration::from_millis(DEBOUNCE_MS))
    }

    fn take(&mut self) -> Vec<PathBuf> {
        self.last_event = None;
        let mut paths: Vec<_> = self.pending.drain().collect();
        paths.sort();
        paths
    }

    fn mark_rebuild(&mut self) {
        self.last_rebuild = Some(Instant::now());
    }

    fn timeout(&self) -> Duration {
        if self.pending.is_empty() {
            Duration::from_secs(60)
        } else {
            Duration::from_millis(DEBOUNCE_MS)
        }
    }
}

// =============================================================================
// Event Handler
// =============================================================================

/// Rebuild what a batch of changes touches. Returns true if anything ran.
fn handle_changes(ctx: &BuildContext, paths: &[PathBuf], reload: Option<&LiveReload>) -> bool {
    if paths.is_empty() {
        return false;
    }

    let transforms = affected_transforms(ctx, paths);
    let trigger = paths
        .iter()
        .map(|p| ctx.display_path(p))
        .collect::<Vec<_>>()
        .join(", ");
    if transforms.is_empty() {
        log!("watch"; "{trigger} changed, copying");
    } else {
        let names: Vec<_> = transforms.iter().map(|t| t.name()).collect();
        log!("watch"; "{trigger} changed, running {}", names.join(", "));
    }

    let start = Instant::now();
    match pipeline::run(ctx, &Plan::partial(ctx, &transforms)) {
        Ok(report) => {
            log!("watch"; "{} files written, {} failed in {:.2?}",
                 report.written(), report.failures(), start.elapsed());
        }
        Err(err) => log!("watch"; "rebuild failed: {err}"),
    }
    eprintln!(); // Blank line to separate rebuild sessions

    if let Some(reload) = reload {
        reload.broadcast();
    }
    true
}

const fn is_relevant(event: &Event) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
}

// =============================================================================
// Public API
// =============================================================================

/// Watch the source tree until the event channel closes.
///
/// Errors inside a rebuild are logged; only a failure to start the watcher
/// is returned.
pub fn watch(ctx: &BuildContext, reload: Option<&LiveReload>) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;
    watcher
        .watch(ctx.source(), RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", ctx.source().display()))?;

    log!("watch"; "watching {}", ctx.display_path(ctx.source()));
    eprintln!(); // Blank line to separate init logs from change events

    let mut debouncer = Debouncer::new();

    loop {
        match rx.recv_timeout(debouncer.timeout()) {
            Ok(Ok(event)) if is_relevant(&event) => {
                debouncer.add(event);
            }
            Ok(Err(e)) => log!("watch"; "error: {e}"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) if debouncer.ready() => {
                if handle_changes(ctx, &debouncer.take(), reload) {
                    debouncer.mark_rebuild();
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            // Other cases: irrelevant events, timeout without ready, etc.
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BuildMode,
        tasks::tests::{context, write_source},
    };
    use notify::event::{CreateKind, ModifyKind};
    use std::{fs, thread::sleep};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn test_is_temp_file() {
        assert!(is_temp_file(Path::new("src/.index.ejs.swp")));
        assert!(is_temp_file(Path::new("src/style.scss~")));
        assert!(is_temp_file(Path::new("src/a.tmp")));
        assert!(!is_temp_file(Path::new("src/index.ejs")));
        assert!(!is_temp_file(Path::new("src/_scss/_vars.scss")));
    }

    #[test]
    fn test_debouncer_batches_and_filters() {
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.ready());
        assert_eq!(debouncer.timeout(), Duration::from_secs(60));

        debouncer.add(event(EventKind::Create(CreateKind::File), &["/p/b.ts", "/p/.b.ts.swp"]));
        debouncer.add(event(EventKind::Modify(ModifyKind::Any), &["/p/a.scss", "/p/b.ts"]));
        assert_eq!(debouncer.timeout(), Duration::from_millis(DEBOUNCE_MS));
        assert!(!debouncer.ready());

        sleep(Duration::from_millis(DEBOUNCE_MS + 50));
        assert!(debouncer.ready());
        assert_eq!(debouncer.take(), vec![PathBuf::from("/p/a.scss"), PathBuf::from("/p/b.ts")]);
        assert!(!debouncer.ready());

        debouncer.mark_rebuild();
        assert!(debouncer.in_cooldown());
    }

    #[test]
    fn test_change_during_cooldown_is_kept() {
        let mut debouncer = Debouncer::new();
        debouncer.mark_rebuild();
        debouncer.add(event(EventKind::Modify(ModifyKind::Any), &["/p/b.txt"]));

        sleep(Duration::from_millis(DEBOUNCE_MS + 50));
        assert!(debouncer.in_cooldown());
        assert!(!debouncer.ready());

        sleep(Duration::from_millis(REBUILD_COOLDOWN_MS));
        assert!(debouncer.ready());
        assert_eq!(debouncer.take(), vec![PathBuf::from("/p/b.txt")]);
    }

    fn wait_for(path: &Path) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if path.is_file() {
                return true;
            }
            sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn test_watch_rebuilds_change_right_after_rebuild() {
        let (dir, ctx) = context(BuildMode::Development, |_| {});
        let ctx: &'static BuildContext = Box::leak(Box::new(ctx));
        std::thread::spawn(move || watch(ctx, None));
        sleep(Duration::from_millis(200));

        write_source(ctx, "a.txt", "a");
        assert!(wait_for(&ctx.output().join("a.txt")));

        write_source(ctx, "b.txt", "b");
        assert!(wait_for(&ctx.output().join("b.txt")));
        drop(dir);
    }

    #[test]
    fn test_is_relevant() {
        assert!(is_relevant(&Event::new(EventKind::Create(CreateKind::File))));
        assert!(is_relevant(&Event::new(EventKind::Modify(ModifyKind::Any))));
        assert!(!is_relevant(&Event::new(EventKind::Any)));
    }

    #[test]
    fn test_affected_transforms_follow_watch_sets() {
        let (_dir, ctx) = context(BuildMode::Development, |_| {});
        let src = ctx.source();
        let paths = [
            src.join("_scss/parts/_a.scss"),
            src.join("_ts/app.ts"),
            src.join("_scss/style.scss"),
            src.join("about/index.ejs"),
            src.join("robots.txt"),
            PathBuf::from("/elsewhere/x.ts"),
        ];

        assert_eq!(
            affected_transforms(&ctx, &paths),
            vec![Transform::Styles, Transform::Scripts, Transform::Templates]
        );
        assert!(affected_transforms(&ctx, &[src.join("robots.txt")]).is_empty());
        assert_eq!(
            affected_transforms(&ctx, &[src.join("images/a.png")]),
            vec![Transform::Images]
        );
    }

    #[test]
    fn test_handle_changes_rebuilds_only_affected() {
        let (_dir, ctx) = context(BuildMode::Development, |_| {});
        let style = write_source(&ctx, "_scss/style.scss", ".a { color: red; }");
        let robots = write_source(&ctx, "robots.txt", "User-agent: *");
        write_source(&ctx, "index.ejs", "<p>hi</p>");

        assert!(handle_changes(&ctx, &[style, robots], None));
        assert!(ctx.output().join("css/style.css").is_file());
        assert!(ctx.output().join("robots.txt").is_file());
        // templates were not triggered
        assert!(!ctx.output().join("index.html").exists());
        assert!(!handle_changes(&ctx, &[], None));

        let css = fs::read_to_string(ctx.output().join("css/style.css")).unwrap();
        assert!(css.contains("color: red"));
    }
}
