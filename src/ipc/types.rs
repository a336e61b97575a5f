use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Deserialize;

use crate::events::EventLog;
use crate::ipc::error::HandlerErr;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub events: EventLog,
}

/// Borrowed view of an opened workspace handed to handlers.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub workspace: &'a Path,
    pub events: &'a mut EventLog,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            events: EventLog::default(),
        }
    }

    pub fn ctx(&mut self) -> Result<Ctx<'_>, HandlerErr> {
        match (self.db.as_ref(), self.workspace.as_deref()) {
            (Some(conn), Some(workspace)) => Ok(Ctx {
                conn,
                workspace,
                events: &mut self.events,
            }),
            _ => Err(HandlerErr::no_workspace()),
        }
    }
}
