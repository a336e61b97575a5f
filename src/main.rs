mod academic_year;
mod assistant;
mod backup;
mod csv;
mod db;
mod entities;
mod events;
mod fees;
mod ipc;
mod logging;
mod timetable;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use serde_json::json;

const WORKSPACE_ENV: &str = "SCHOOLD_WORKSPACE";

fn write_line(stdout: &mut io::Stdout, value: &serde_json::Value) {
    let line = serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string());
    let _ = writeln!(stdout, "{}", line);
    let _ = stdout.flush();
}

fn main() {
    logging::init_tracing();
    let mut state = ipc::AppState::new();

    if let Some(path) = std::env::var_os(WORKSPACE_ENV)
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
    {
        if let Err(e) = ipc::select_workspace(&mut state, &path) {
            tracing::error!(workspace = %path.display(), error = ?e, "failed to open workspace");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "schoold ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request");
                write_line(
                    &mut stdout,
                    &json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() },
                    }),
                );
                continue;
            }
        };

        let span = tracing::info_span!("request", id = %req.id, method = %req.method);
        let _guard = span.enter();
        let resp = ipc::handle_request(&mut state, req);
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            let code = resp
                .pointer("/error/code")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            tracing::warn!(code, "request failed");
        } else {
            tracing::debug!("request ok");
        }
        write_line(&mut stdout, &resp);
    }
}
