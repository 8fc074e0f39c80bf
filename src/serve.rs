//! Development server with live reload.
//!
//! A `tiny_http` server over the development output tree:
//!
//! - static files with a guessed content type
//! - `index.html` resolution for directories
//! - live-reload script injected into every HTML page
//! - WebSocket upgrade for the live-reload channel
//! - graceful shutdown on Ctrl+C
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │   Main Thread   │     │  Watcher Thread  │
//! │  (HTTP Server)  │     │  (File Monitor)  │
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          ▼                       ▼
//!    Serve output tree       Rebuild changed class
//!    Accept reload sockets   Broadcast `reload`
//! ```

use crate::{log, reload::LiveReload, tasks::BuildContext, watch::watch};
use anyhow::{Context, Result, anyhow};
use std::{
    borrow::Cow,
    fs,
    io::Cursor,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};
use tiny_http::{Header, Request, Response, Server, StatusCode};

/// Try binding to port, retry with incremented port if in use
const MAX_PORT_RETRIES: u16 = 10;

/// Serve the output tree until Ctrl+C, watching the source tree if enabled.
pub fn serve(ctx: &'static BuildContext) -> Result<()> {
    let serve = &ctx.config.serve;
    let interface: IpAddr = serve
        .interface
        .parse()
        .with_context(|| format!("Invalid [serve.interface] `{}`", serve.interface))?;

    let (server, addr) = try_bind_port(interface, serve.port, MAX_PORT_RETRIES)?;
    let server = Arc::new(server);

    let server_for_signal = Arc::clone(&server);
    ctrlc::set_handler(move || {
        log!("serve"; "shutting down...");
        server_for_signal.unblock();
    })
    .context("Failed to set Ctrl+C handler")?;

    let url = format!("http://{addr}{}", serve.start_path);
    log!("serve"; "{url}");

    let reload: &'static LiveReload = Box::leak(Box::new(LiveReload::new()));

    if serve.watch {
        std::thread::spawn(move || {
            if let Err(err) = watch(ctx, Some(reload)) {
                log!("watch"; "{err}");
            }
        });
    }

    if serve.open
        && let Err(err) = open::that(&url)
    {
        log!("serve"; "failed to open browser: {err}");
    }

    for request in server.incoming_requests() {
        if LiveReload::is_upgrade(&request) {
            if let Err(err) = reload.accept(request) {
                log!("reload"; "{err}");
            }
            continue;
        }
        if let Err(err) = handle_request(request, ctx.output()) {
            log!("serve"; "request error: {err}");
        }
    }

    Ok(())
}

/// Try to bind to a port, retrying with incremented port numbers if in use.
fn try_bind_port(interface: IpAddr, base_port: u16, max_retries: u16) -> Result<(Server, SocketAddr)> {
    let mut last_error = None;

    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);

        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, port);
                }
                return Ok((server, addr));
            }
            Err(err) => last_error = Some(err),
        }
    }

    Err(anyhow!(
        "Failed to bind after {} attempts (ports {}-{}): {}",
        max_retries,
        base_port,
        base_port.saturating_add(max_retries.saturating_sub(1)),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

// ============================================================================
// Request Handling
// ============================================================================

/// Map a request URL onto a file below `root`.
///
/// 1. exact file
/// 2. directory with `index.html`
/// 3. nothing → `None` (404)
///
/// Paths escaping `root` through `..` never resolve.
fn resolve(root: &Path, url: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(url).map(Cow::into_owned).unwrap_or_default();
    // cache-busting query strings (`style.css?v=3`) are not part of the path
    let path = decoded.split(['?', '#']).next().unwrap_or_default();
    let request_path = path.trim_matches('/');

    if request_path.split('/').any(|segment| segment == "..") {
        return None;
    }

    let local = root.join(request_path);
    if local.is_file() {
        return Some(local);
    }

    let index = local.join("index.html");
    index.is_file().then_some(index)
}

fn handle_request(request: Request, root: &Path) -> Result<()> {
    match resolve(root, request.url()) {
        Some(path) => serve_file(request, &path),
        None => serve_not_found(request),
    }
}

fn serve_file(request: Request, path: &Path) -> Result<()> {
    let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let content_type = guess_content_type(path);

    // HTML gets the live-reload client
    let content = if content_type.starts_with("text/html") {
        crate::reload::inject_client(&String::from_utf8_lossy(&content)).into_bytes()
    } else {
        content
    };

    let response = Response::from_data(content).with_header(content_type_header(content_type)?);
    request.respond(response)?;
    Ok(())
}

fn serve_not_found(request: Request) -> Result<()> {
    let response = Response::new(
        StatusCode(404),
        vec![content_type_header("text/plain")?],
        Cursor::new("404 Not Found"),
        Some(13),
        None,
    );
    request.respond(response)?;
    Ok(())
}

fn content_type_header(content_type: &str) -> Result<Header> {
    Header::from_bytes("Content-Type", content_type)
        .map_err(|()| anyhow!("invalid content type `{content_type}`"))
}

/// Guess MIME content type from file extension.
///
/// Returns `application/octet-stream` for unknown extensions.
fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        // Web content
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "application/javascript; charset=utf-8",
        Some("json" | "map") => "application/json; charset=utf-8",
        Some("xml") => "application/xml; charset=utf-8",
        Some("webmanifest") => "application/manifest+json",

        // Images
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",

        // Fonts
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",

        // Media and documents
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain; charset=utf-8",

        _ => "application/octet-stream",
    }
}
