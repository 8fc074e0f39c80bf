//! External tool execution.
//!
//! The bundler, the template renderer and the GIF optimizer are separate
//! programs. They all follow the same contract: the input path is appended
//! to a configured command line, the result is read from stdout, and
//! diagnostics arrive on stderr.

use crate::log;
use anyhow::{Context, Result, bail};
use regex::Regex;
use std::{
    ffi::OsString,
    path::Path,
    process::{Command, Output, Stdio},
    sync::OnceLock,
};

// ============================================================================
// Macros
// ============================================================================

/// Run an external command and capture its output.
///
/// # Examples
/// ```ignore
/// // Without working directory
/// exec!(["gifsicle", "--optimize=1"]; path)?;
///
/// // With working directory
/// exec!(root; &config.build.scripts.command; entry)?;
///
/// // With a stderr filter
/// exec!(filter=&BUNDLER_FILTER; root; &command; entry)?;
/// ```
#[macro_export]
macro_rules! exec {
    (filter=$filter:expr; $($rest:tt)*) => {
        $crate::exec!(@root $filter; $($rest)*)
    };
    (@root $filter:expr; $root:expr; $cmd:expr; $($arg:expr),* $(,)?) => {
        $crate::utils::exec::exec(
            Some($root),
            &$crate::utils::exec::internal::to_cmd_vec($cmd),
            &$crate::utils::exec::internal::filter_args(&[$($crate::utils::exec::internal::to_os($arg)),*]),
            $filter,
        )
    };
    (@root $filter:expr; $cmd:expr; $($arg:expr),* $(,)?) => {
        $crate::utils::exec::exec(
            None,
            &$crate::utils::exec::internal::to_cmd_vec($cmd),
            &$crate::utils::exec::internal::filter_args(&[$($crate::utils::exec::internal::to_os($arg)),*]),
            $filter,
        )
    };
    ($($rest:tt)*) => {
        $crate::exec!(@root &$crate::utils::exec::EMPTY_FILTER; $($rest)*)
    };
}

#[doc(hidden)]
pub mod internal {
    use std::ffi::OsString;

    #[inline]
    pub fn to_os<S: Into<OsString>>(s: S) -> OsString {
        s.into()
    }

    /// Anything usable as `program arg...`.
    pub trait ToCmd {
        fn to_cmd(self) -> Vec<OsString>;
    }

    impl<const N: usize> ToCmd for [&str; N] {
        fn to_cmd(self) -> Vec<OsString> {
            self.into_iter().map(OsString::from).collect()
        }
    }

    impl ToCmd for &[String] {
        fn to_cmd(self) -> Vec<OsString> {
            self.iter().map(OsString::from).collect()
        }
    }

    impl ToCmd for &Vec<String> {
        fn to_cmd(self) -> Vec<OsString> {
            self.as_slice().to_cmd()
        }
    }

    #[inline]
    pub fn to_cmd_vec<C: ToCmd>(cmd: C) -> Vec<OsString> {
        cmd.to_cmd()
    }

    /// Drop empty args so conditional flags can be written as `if x { "--flag" } else { "" }`.
    #[inline]
    pub fn filter_args(args: &[OsString]) -> Vec<OsString> {
        args.iter().filter(|a| !a.is_empty()).cloned().collect()
    }
}

// ============================================================================
// Command Execution
// ============================================================================

/// Execute a command and capture its output.
///
/// Stdin is closed so tools that fall back to reading stdin (e.g. `ejs`
/// without a file argument) cannot hang the step.
///
/// # Errors
/// Returns an error if the command cannot be spawned or exits non-zero.
pub fn exec(
    root: Option<&Path>,
    cmd: &[OsString],
    args: &[OsString],
    filter: &'static FilterRule,
) -> Result<Output> {
    let (name, mut command) = prepare(root, cmd, args)?;

    let output = command
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to execute `{name}`"))?;

    if !output.status.success() {
        bail!(format_error(&name, &output, filter));
    }

    // Warnings only; stdout is the product
    let stderr = String::from_utf8_lossy(&output.stderr);
    filter.log(&name, stderr.trim());

    Ok(output)
}

fn prepare(root: Option<&Path>, cmd: &[OsString], args: &[OsString]) -> Result<(String, Command)> {
    let Some((program, fixed_args)) = cmd.split_first() else {
        bail!("Empty command");
    };
    let name = program.to_string_lossy().into_owned();

    let mut command = Command::new(program);
    command.args(fixed_args).args(args);

    if let Some(dir) = root {
        command.current_dir(dir);
    }

    Ok((name, command))
}

// ============================================================================
// Output Filtering
// ============================================================================

fn strip_ansi(s: &str) -> std::borrow::Cow<'_, str> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    match RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").ok()) {
        Some(re) => re.replace_all(s, ""),
        None => s.into(),
    }
}

/// Lines of tool output that are noise rather than diagnostics.
pub struct FilterRule {
    /// Lines starting with any of these (after ANSI stripping) are dropped.
    pub skip_prefixes: &'static [&'static str],
}

impl FilterRule {
    pub const fn new(skip_prefixes: &'static [&'static str]) -> Self {
        Self { skip_prefixes }
    }

    fn should_skip(&self, line: &str) -> bool {
        line.is_empty() || self.skip_prefixes.iter().any(|p| line.starts_with(p))
    }

    fn retained<'a>(&self, output: &'a str) -> Vec<&'a str> {
        output
            .lines()
            .filter(|line| !self.should_skip(strip_ansi(line).trim()))
            .collect()
    }

    fn log(&self, name: &str, output: &str) {
        let lines = self.retained(output);
        if !lines.is_empty() {
            log!(name; "{}", lines.join("\n"));
        }
    }
}

/// No skipping.
pub const EMPTY_FILTER: FilterRule = FilterRule::new(&[]);

/// esbuild prints a summary table and npm update notices on stderr.
pub const BUNDLER_FILTER: FilterRule = FilterRule::new(&["⚡ Done in", "npm notice"]);

/// gifsicle warns about every recoverable quirk of its input.
pub const GIF_FILTER: FilterRule = FilterRule::new(&["gifsicle: warning:"]);

fn format_error(name: &str, output: &Output, filter: &'static FilterRule) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = filter.retained(&stderr).join("\n");

    let mut msg = format!("`{name}` failed with {}", output.status);
    if !stderr.is_empty() {
        msg.push('\n');
        msg.push_str(&stderr);
    }
    msg
}

// ============================================================================
// Tests
// ============================================================================
