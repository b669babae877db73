use chrono::NaiveDate;
use serde_json::{json, Value};
use thiserror::Error;

use crate::access::AccessError;

/// Errors surfaced by the import, export, and gated read paths.
///
/// Row-level skips are not errors; they are carried in the import reports.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("sheet has {rows} rows and {columns} columns; limit is {max_rows}x{max_columns}")]
    SheetTooLarge {
        rows: usize,
        columns: usize,
        max_rows: usize,
        max_columns: usize,
    },

    /// A student points at a group or course that no longer exists.
    #[error("{entity} {id} referenced by student {student_id} does not exist")]
    Integrity {
        entity: &'static str,
        id: i64,
        student_id: i64,
    },

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("failed to read sheet: {0}")]
    SheetRead(String),

    #[error("failed to write sheet: {0}")]
    SheetWrite(String),

    #[error("transaction failed: {0}")]
    Transaction(rusqlite::Error),

    #[error("commit failed: {0}")]
    Commit(rusqlite::Error),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_params",
            Self::SheetTooLarge { .. } => "sheet_too_large",
            Self::Integrity { .. } => "integrity_error",
            Self::Access(AccessError::BalanceExpired { .. }) => "balance_expired",
            Self::Access(AccessError::NotAStudent { .. }) => "not_a_student",
            Self::NotFound { .. } => "not_found",
            Self::SheetRead(_) => "sheet_read_failed",
            Self::SheetWrite(_) => "sheet_write_failed",
            Self::Transaction(_) => "db_tx_failed",
            Self::Commit(_) => "db_commit_failed",
            Self::Store(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::SheetTooLarge {
                rows,
                columns,
                max_rows,
                max_columns,
            } => Some(json!({
                "rows": rows,
                "columns": columns,
                "maxRows": max_rows,
                "maxColumns": max_columns
            })),
            Self::Integrity {
                entity,
                id,
                student_id,
            } => Some(json!({ "entity": entity, "id": id, "studentId": student_id })),
            Self::Access(AccessError::BalanceExpired { balance_until }) => Some(json!({
                "balanceUntil": balance_until.map(format_date)
            })),
            Self::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            _ => None,
        }
    }
}

fn format_date(d: NaiveDate) -> String {
    crate::model::format_iso_date(d)
}
