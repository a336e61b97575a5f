use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

// Generic `<kind>.<verb>` records go last so dedicated handlers win.
const CHAIN: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::setup::try_handle,
    handlers::events::try_handle,
    handlers::assistant::try_handle,
    handlers::academic_years::try_handle,
    handlers::fees::try_handle,
    handlers::pdc::try_handle,
    handlers::timetable::try_handle,
    handlers::attendance::try_handle,
    handlers::dashboard::try_handle,
    handlers::exchange::try_handle,
    handlers::records::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for try_handle in CHAIN {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
