mod auth;
mod cache;
mod calc;
mod config;
mod db;
mod ipc;
mod logging;

use clap::Parser;
use serde_json::json;
use std::io::{self, BufRead, Write};

fn main() {
    let config = config::Config::parse();
    logging::init_tracing(&config.log_level);

    let workspace = config.workspace.clone();
    let mut state = ipc::AppState::new(config);
    if let Some(path) = workspace {
        match ipc::open_workspace(&mut state, path.clone()) {
            Ok(()) => tracing::info!(workspace = %path.display(), "workspace opened"),
            Err(e) => tracing::error!(workspace = %path.display(), "failed to open workspace: {e:?}"),
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "schoold ready");

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
                // No id to echo back.
                tracing::warn!("unparseable request: {e}");
                let reply = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", reply);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
