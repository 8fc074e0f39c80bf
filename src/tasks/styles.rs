//! Style Compiler.
//!
//! Per entry below `styles.dir`:
//!
//! 1. expand glob imports (`@import "parts/**/*";`) into one import per file
//! 2. compile Sass with `grass` (expanded in development, compressed in production)
//! 3. add vendor prefixes and
//! 4. lower modern syntax for the configured browsers with `lightningcss`
//! 5. development only: append an inline source map
//!
//! Output lands at `<output>/<styles.output>/<rel>.css`.

use super::BuildContext;
use crate::{
    manifest::AssetKind,
    pipeline::{Step, StepReport, Transform},
    utils::fs::{Outcome, write_if_changed},
};
use anyhow::{Context, Result, anyhow};
use base64::{Engine, engine::general_purpose::STANDARD};
use globset::GlobBuilder;
use lightningcss::{
    properties::{Property, PropertyId},
    rules::{CssRule, CssRuleList},
    stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet},
    targets::{Browsers, Targets},
};
use parcel_sourcemap::SourceMap;
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

const STEP: Step = Step::Transform(Transform::Styles);

pub fn run(ctx: &BuildContext) -> StepReport {
    let entries = ctx.collect(AssetKind::Styles);

    let targets = match browser_targets(&ctx.config.build.styles.browsers) {
        Ok(targets) => targets,
        Err(err) => {
            // every entry would fail the same way
            let mut report = StepReport::new(STEP);
            let dir = ctx.source().join(&ctx.config.build.styles.dir);
            report.record(&dir, Err(err));
            return report;
        }
    };

    ctx.process_all(STEP, &entries, |entry| compile(ctx, entry, targets))
}

/// `_scss/pages/top.scss` → `<output>/css/pages/top.css`
fn css_path(ctx: &BuildContext, entry: &Path) -> Result<PathBuf> {
    let styles = &ctx.config.build.styles;
    let rel = entry
        .strip_prefix(ctx.source().join(&styles.dir))
        .with_context(|| format!("{} is outside the styles directory", entry.display()))?;

    Ok(ctx.output().join(&styles.output).join(rel).with_extension("css"))
}

fn compile(ctx: &BuildContext, entry: &Path, targets: Targets) -> Result<Outcome> {
    let production = ctx.mode().is_production();
    let dest = css_path(ctx, entry)?;
    let dir = entry.parent().context("style entry has no parent directory")?;
    let indented = entry.extension().is_some_and(|e| e == "sass");

    let source =
        fs::read_to_string(entry).with_context(|| format!("Failed to read {}", entry.display()))?;
    let expanded = expand_glob_imports(&source, dir, indented)?;

    let style = if production {
        grass::OutputStyle::Compressed
    } else {
        grass::OutputStyle::Expanded
    };
    let syntax = if indented {
        grass::InputSyntax::Sass
    } else {
        grass::InputSyntax::Scss
    };
    let options = grass::Options::default()
        .style(style)
        .input_syntax(syntax)
        .load_path(dir)
        .load_path(ctx.source().join(&ctx.config.build.styles.dir));
    let css = grass::from_string(expanded, &options).map_err(|err| anyhow!("{err}"))?;

    let filename = ctx.rel(entry).to_string_lossy().replace('\\', "/");
    let css = postprocess(&css, &filename, targets, production)?;

    write_if_changed(&dest, css.as_bytes())
}

// ============================================================================
// Glob imports
// ============================================================================

/// `@import "dir/*";` on a line of its own. ASCII classes only: `regex` is
/// built without Unicode Perl classes.
fn glob_import_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^([ \t]*)@import[ \t]+["']([^"'\n]*[*?][^"'\n]*)["'][ \t]*;?[ \t\r]*$"#).ok()
    })
    .as_ref()
}

/// Replace every glob `@import` with one import per matching file.
///
/// Patterns resolve relative to `dir`; matches are sorted. A glob without
/// matches imports nothing.
pub fn expand_glob_imports(source: &str, dir: &Path, indented: bool) -> Result<String> {
    let re = glob_import_regex().context("glob import pattern failed to compile")?;
    if !re.is_match(source) {
        return Ok(source.to_owned());
    }

    let candidates = crate::utils::fs::collect_all_files(dir);
    let mut out = String::with_capacity(source.len());
    let mut last = 0;

    for caps in re.captures_iter(source) {
        let (Some(whole), Some(indent), Some(pattern)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        out.push_str(&source[last..whole.start()]);
        last = whole.end();

        let matcher = GlobBuilder::new(pattern.as_str())
            .literal_separator(true)
            .build()
            .with_context(|| format!("Invalid glob import `{}`", pattern.as_str()))?
            .compile_matcher();

        let mut imports: Vec<String> = candidates
            .iter()
            .filter_map(|path| path.strip_prefix(dir).ok())
            .filter(|rel| is_sass_source(rel) && matcher.is_match(rel))
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .collect();
        imports.sort();

        let terminator = if indented { "" } else { ";" };
        let lines: Vec<String> = imports
            .iter()
            .map(|import| format!("{}@import \"{import}\"{terminator}", indent.as_str()))
            .collect();
        out.push_str(&lines.join("\n"));
    }

    out.push_str(&source[last..]);
    Ok(out)
}

/// Sass sources only: a `.css` import would stay a plain CSS `@import`.
fn is_sass_source(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "scss" || e == "sass")
}

// ============================================================================
// Prefixing, lowering, source maps
// ============================================================================

/// Resolve browserslist queries once per run.
pub fn browser_targets(queries: &[String]) -> Result<Targets> {
    let browsers = Browsers::from_browserslist(queries)
        .map_err(|err| anyhow!("Invalid browser query in [build.styles.browsers]: {err}"))?;

    Ok(Targets {
        browsers,
        ..Targets::default()
    })
}

/// Prefix and lower `css` for `targets`; minify in production, otherwise
/// append an inline source map.
///
/// Targets including Internet Explorer also get `-ms-grid` fallbacks.
pub fn postprocess(css: &str, filename: &str, targets: Targets, production: bool) -> Result<String> {
    // values of the generated fallbacks; must outlive the sheet that borrows them
    let mut grid_fallbacks: Vec<Fallbacks> = Vec::new();

    let mut sheet = StyleSheet::parse(
        css,
        ParserOptions {
            filename: filename.to_owned(),
            ..ParserOptions::default()
        },
    )
    .map_err(|err| anyhow!("{err}"))?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|err| anyhow!("{err}"))?;

    if targets.browsers.is_some_and(|b| b.ie.is_some()) {
        collect_grid_fallbacks(&sheet.rules, &mut grid_fallbacks);
        insert_grid_fallbacks(&mut sheet.rules, &mut grid_fallbacks.iter());
    }

    if production {
        let result = sheet
            .to_css(PrinterOptions {
                minify: true,
                targets,
                ..PrinterOptions::default()
            })
            .map_err(|err| anyhow!("{err}"))?;
        return Ok(result.code);
    }

    let mut source_map = SourceMap::new("/");
    source_map.add_source(filename);
    source_map
        .set_source_content(0, css)
        .map_err(|err| anyhow!("{err}"))?;

    let result = sheet
        .to_css(PrinterOptions {
            minify: false,
            targets,
            source_map: Some(&mut source_map),
            ..PrinterOptions::default()
        })
        .map_err(|err| anyhow!("{err}"))?;

    let map = source_map.to_json(None).map_err(|err| anyhow!("{err}"))?;
    Ok(format!(
        "{}\n/*# sourceMappingURL=data:application/json;charset=utf-8;base64,{} */\n",
        result.code,
        STANDARD.encode(map)
    ))
}

// ============================================================================
// Internet Explorer grid fallbacks
// ============================================================================
//
// IE 10/11 implement the old grid draft: explicit placement only, no
// auto-placement, no named areas, no gaps. Each standard declaration that
// has a draft equivalent gets it inserted right before itself.

/// Fallbacks for one style rule: `(index of the standard declaration, name, value)`.
type Fallbacks = Vec<(usize, &'static str, String)>;

/// The `-ms-` declarations standing in for `name: value`.
fn ms_grid_fallback(name: &str, value: &str) -> Vec<(&'static str, String)> {
    match (name, value) {
        ("display", "grid") => vec![("display", "-ms-grid".into())],
        ("display", "inline-grid") => vec![("display", "-ms-inline-grid".into())],
        ("grid-template-columns", tracks) => ms_track_list(tracks)
            .map(|v| vec![("-ms-grid-columns", v)])
            .unwrap_or_default(),
        ("grid-template-rows", tracks) => ms_track_list(tracks)
            .map(|v| vec![("-ms-grid-rows", v)])
            .unwrap_or_default(),
        ("grid-row" | "grid-row-start", line) => {
            ms_placement(line, "-ms-grid-row", "-ms-grid-row-span")
        }
        ("grid-column" | "grid-column-start", line) => {
            ms_placement(line, "-ms-grid-column", "-ms-grid-column-span")
        }
        _ => Vec::new(),
    }
}

/// `repeat(3, 1fr) 200px` → `(1fr)[3] 200px`. `None` for track lists the
/// draft cannot express (line names, auto-fill, auto-fit, `none`).
fn ms_track_list(tracks: &str) -> Option<String> {
    let tracks = tracks.trim();
    if tracks.is_empty()
        || tracks == "none"
        || tracks.contains('[')
        || tracks.contains("auto-fill")
        || tracks.contains("auto-fit")
    {
        return None;
    }

    let mut out = String::with_capacity(tracks.len());
    let mut rest = tracks;
    while let Some(start) = rest.find("repeat(") {
        out.push_str(&rest[..start]);
        let inner_start = start + "repeat(".len();

        let mut depth = 1;
        let mut end = None;
        for (i, c) in rest[inner_start..].char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(inner_start + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let end = end?;

        let (count, body) = rest[inner_start..end].split_once(',')?;
        let count: u32 = count.trim().parse().ok()?;
        out.push_str(&format!("({})[{count}]", body.trim()));
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

/// `2`, `2 / 4` or `2 / span 2` → line plus span. Non-numeric lines are skipped.
fn ms_placement(value: &str, line: &'static str, span: &'static str) -> Vec<(&'static str, String)> {
    let mut parts = value.split('/').map(str::trim);
    let Some(Ok(start)) = parts.next().map(str::parse::<i32>) else {
        return Vec::new();
    };
    if start < 1 {
        return Vec::new();
    }

    let mut out = vec![(line, start.to_string())];
    let length = match parts.next() {
        Some(end) => match end.strip_prefix("span") {
            Some(n) => n.trim().parse::<i32>().ok(),
            None => end.parse::<i32>().ok().map(|end| end - start),
        },
        None => None,
    };
    if let Some(length) = length.filter(|&n| n > 1) {
        out.push((span, length.to_string()));
    }
    out
}

/// Compute fallbacks for every style rule, in document order.
fn collect_grid_fallbacks(rules: &CssRuleList<'_>, out: &mut Vec<Fallbacks>) {
    for rule in &rules.0 {
        match rule {
            CssRule::Style(style) => {
                let mut fallbacks = Fallbacks::new();
                for (index, property) in style.declarations.declarations.iter().enumerate() {
                    let id = property.property_id();
                    let Ok(value) = property.value_to_css_string(PrinterOptions::default()) else {
                        continue;
                    };
                    for (name, value) in ms_grid_fallback(id.name(), &value) {
                        fallbacks.push((index, name, value));
                    }
                }
                out.push(fallbacks);
                collect_grid_fallbacks(&style.rules, out);
            }
            CssRule::Media(media) => collect_grid_fallbacks(&media.rules, out),
            CssRule::Supports(supports) => collect_grid_fallbacks(&supports.rules, out),
            _ => {}
        }
    }
}

/// Insert what [`collect_grid_fallbacks`] computed, walking the rules in the same order.
fn insert_grid_fallbacks<'i>(
    rules: &mut CssRuleList<'i>,
    fallbacks: &mut std::slice::Iter<'i, Fallbacks>,
) {
    for rule in &mut rules.0 {
        match rule {
            CssRule::Style(style) => {
                if let Some(rule_fallbacks) = fallbacks.next() {
                    let declarations = &mut style.declarations.declarations;
                    // back to front so earlier indices stay valid
                    for (index, name, value) in rule_fallbacks.iter().rev() {
                        let id: PropertyId<'i> = PropertyId::from(*name);
                        if let Ok(property) =
                            Property::parse_string(id, value.as_str(), ParserOptions::default())
                        {
                            declarations.insert(*index, property);
                        }
                    }
                }
                insert_grid_fallbacks(&mut style.rules, fallbacks);
            }
            CssRule::Media(media) => insert_grid_fallbacks(&mut media.rules, fallbacks),
            CssRule::Supports(supports) => insert_grid_fallbacks(&mut supports.rules, fallbacks),
            _ => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
