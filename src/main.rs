mod calc;
mod config;
mod db;
mod export;
mod grades;
mod ipc;
mod roster;
mod session;

use std::io::{self, BufRead, Write};

fn main() {
    let cfg = config::DaemonConfig::from_env();
    config::init_logging(&cfg);

    let mut state = ipc::AppState::default();
    if let Some(path) = cfg.workspace.as_ref() {
        match state.open_workspace(path) {
            Ok(()) => tracing::info!(workspace = %path.to_string_lossy(), "workspace selected from environment"),
            Err(e) => tracing::error!(workspace = %path.to_string_lossy(), error = %e, "could not open workspace"),
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "boletimd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                // Can't reply without id.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, exiting");
}
