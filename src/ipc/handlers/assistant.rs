use crate::assistant::{AssistantBackend, KeywordAssistant, RemoteAssistant};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::{section_or_default, SetupSection};
use crate::ipc::types::{AppState, Request};

const MAX_QUESTION_LEN: usize = 2000;
const API_KEY_ENV: &str = "SCHOOLD_ASSISTANT_API_KEY";

fn backend_for(state: &AppState) -> Box<dyn AssistantBackend> {
    // Without a workspace there are no settings; keyword answers still work.
    let Some(conn) = state.db.as_ref() else {
        return Box::new(KeywordAssistant);
    };
    let section = section_or_default(conn, SetupSection::Assistant);
    match section.get("mode").and_then(|v| v.as_str()) {
        Some("remote") => Box::new(RemoteAssistant::from_settings(
            &section,
            std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()),
        )),
        _ => Box::new(KeywordAssistant),
    }
}

fn handle_assistant_ask(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(question) = req
        .params
        .get("question")
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    else {
        return err(&req.id, "bad_params", "missing question", None);
    };
    if question.chars().count() > MAX_QUESTION_LEN {
        return err(
            &req.id,
            "bad_params",
            format!("question must be at most {} characters", MAX_QUESTION_LEN),
            None,
        );
    }
    match backend_for(state).ask(question) {
        Ok(answer) => match serde_json::to_value(&answer) {
            Ok(v) => ok(&req.id, v),
            Err(e) => err(&req.id, "assistant_failed", e.to_string(), None),
        },
        Err(e) => err(&req.id, "assistant_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assistant.ask" => Some(handle_assistant_ask(state, req)),
        _ => None,
    }
}
