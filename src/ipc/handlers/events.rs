use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const DEFAULT_POLL_LIMIT: u64 = 100;
const MAX_POLL_LIMIT: u64 = 1000;

// Polling does not need a workspace: the log lives in the daemon.
fn handle_events_poll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let after_seq = match req.params.get("afterSeq") {
        None | Some(serde_json::Value::Null) => 0,
        Some(v) => match v.as_u64() {
            Some(n) => n,
            None => return err(&req.id, "bad_params", "afterSeq must be a non-negative integer", None),
        },
    };
    let limit = match req.params.get("limit") {
        None | Some(serde_json::Value::Null) => DEFAULT_POLL_LIMIT,
        Some(v) => match v.as_u64() {
            Some(n) if (1..=MAX_POLL_LIMIT).contains(&n) => n,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("limit must be in 1..={}", MAX_POLL_LIMIT),
                    None,
                )
            }
        },
    };
    let events = state.events.since(after_seq, limit as usize);
    ok(
        &req.id,
        json!({
            "events": events,
            "latestSeq": state.events.latest_seq(),
            "gap": state.events.has_gap(after_seq),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "events.poll" => Some(handle_events_poll(state, req)),
        _ => None,
    }
}
