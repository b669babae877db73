use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::model::parse_iso_date;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    /// Settings and schema plumbing errors.
    pub fn query(e: anyhow::Error) -> Self {
        Self {
            code: "db_query_failed",
            message: format!("{e:#}"),
            details: None,
        }
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Store(e).into()
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(|| HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".to_string(),
        details: None,
    })
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing or non-integer {}", key)))
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key))),
    }
}

/// `params.today` when pinned, else the local calendar date.
pub fn get_today(params: &Value) -> Result<NaiveDate, HandlerErr> {
    match params.get("today") {
        None | Some(Value::Null) => Ok(chrono::Local::now().date_naive()),
        Some(v) => v
            .as_str()
            .and_then(parse_iso_date)
            .ok_or_else(|| HandlerErr::bad_params("today must be YYYY-MM-DD")),
    }
}

/// `params.outDir`, or `<workspace>/exports`.
pub fn get_out_dir(params: &Value, workspace: Option<&Path>) -> Result<PathBuf, HandlerErr> {
    if let Some(dir) = params.get("outDir").and_then(|v| v.as_str()) {
        if dir.trim().is_empty() {
            return Err(HandlerErr::bad_params("outDir must not be empty"));
        }
        return Ok(PathBuf::from(dir));
    }
    workspace
        .map(|w| w.join("exports"))
        .ok_or_else(|| HandlerErr::bad_params("missing outDir"))
}

pub fn to_result<T: Serialize>(value: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}
