use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::planner::OverrideSet;

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
    /// Manual room choices for upcoming planning runs. Process-local and
    /// deliberately not persisted; selecting a workspace resets them.
    pub overrides: OverrideSet,
}
