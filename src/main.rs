mod aggregate;
mod assignments;
mod attachments;
mod config;
mod db;
mod error;
mod grading;
mod ipc;
mod logging;
mod model;
mod subjects;
mod submissions;

use anyhow::Context;
use clap::Parser;
use std::io::{self, BufRead, Write};

fn main() -> anyhow::Result<()> {
    let cfg = config::Config::parse();
    logging::init_tracing(env!("CARGO_CRATE_NAME"), &cfg.log_level);

    let mut state = ipc::AppState::new(cfg.max_attachment_bytes);
    if let Some(path) = &cfg.workspace {
        let conn = db::open_db(path)
            .with_context(|| format!("failed to open workspace {}", path.to_string_lossy()))?;
        state.workspace = Some(path.clone());
        state.db = Some(conn);
    }
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        workspace = ?cfg.workspace,
        "classroomd ready"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let resp = ipc::err("", "bad_json", e.to_string(), None);
                writeln!(stdout, "{resp}")?;
                stdout.flush()?;
                continue;
            }
        };

        tracing::debug!(request_id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        )?;
        stdout.flush()?;
    }
    Ok(())
}
