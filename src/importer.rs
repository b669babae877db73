//! Wide attendance sheets (one row per student, one column per date) into
//! per-day attendance records.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::{parse_iso_date, NewAttendance, SkippedRow};
use crate::sheet::Grid;
use crate::store;

pub const COL_PHONE: usize = 2;
pub const FIRST_DATE_COL: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedColumn {
    pub column: usize,
    pub header: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceImportReport {
    pub rows_scanned: usize,
    pub records_inserted: usize,
    pub cells_skipped_existing: usize,
    pub cells_skipped_duplicate: usize,
    pub skipped_rows: Vec<SkippedRow>,
    pub skipped_columns: Vec<SkippedColumn>,
}

/// Date columns parsed from the header row, plus the ones that did not parse.
pub fn date_columns(grid: &Grid) -> (Vec<(usize, NaiveDate)>, Vec<SkippedColumn>) {
    let mut dates = Vec::new();
    let mut skipped = Vec::new();
    for col in FIRST_DATE_COL..grid.width() {
        let header = grid.text(0, col);
        if header.is_empty() {
            continue;
        }
        match parse_iso_date(&header) {
            Some(d) => dates.push((col, d)),
            None => skipped.push(SkippedColumn {
                column: col,
                header,
                reason: "invalid_date_header",
            }),
        }
    }
    (dates, skipped)
}

/// phone -> student id over the owner's students; the lowest id wins a shared phone.
fn phone_index(conn: &Connection, owner_id: i64) -> Result<HashMap<String, i64>, EngineError> {
    let mut students = store::list_students_by_owner(conn, owner_id, None, None)?;
    students.sort_by_key(|s| s.id);
    let mut index = HashMap::with_capacity(students.len());
    for s in students {
        index.entry(s.phone_number).or_insert(s.id);
    }
    Ok(index)
}

pub fn import_attendance(
    conn: &Connection,
    owner_id: i64,
    grid: &Grid,
) -> Result<AttendanceImportReport, EngineError> {
    if !store::user_exists(conn, owner_id)? {
        return Err(EngineError::NotFound {
            entity: "user",
            id: owner_id,
        });
    }

    let mut report = AttendanceImportReport::default();
    let (dates, skipped_columns) = date_columns(grid);
    for c in &skipped_columns {
        warn!(
            column = c.column,
            header = %c.header,
            "attendance column skipped: not a YYYY-MM-DD date"
        );
    }
    report.skipped_columns = skipped_columns;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(EngineError::Transaction)?;
    let students = phone_index(&tx, owner_id)?;

    let mut staged: Vec<NewAttendance> = Vec::new();
    let mut seen: HashSet<(i64, NaiveDate)> = HashSet::new();
    for row in 1..grid.height() {
        if grid.row_is_blank(row) {
            continue;
        }
        report.rows_scanned += 1;

        let phone = grid.text(row, COL_PHONE);
        let Some(&student_id) = students.get(&phone) else {
            warn!(row, phone = %phone, "attendance row skipped: no matching student");
            report.skipped_rows.push(SkippedRow {
                row,
                phone,
                reason: "student_not_found",
            });
            continue;
        };

        for &(col, date) in &dates {
            let status = grid.text(row, col);
            if status.is_empty() {
                continue;
            }
            if !seen.insert((student_id, date)) {
                report.cells_skipped_duplicate += 1;
                continue;
            }
            if store::attendance_exists(&tx, student_id, date)? {
                report.cells_skipped_existing += 1;
                continue;
            }
            staged.push(NewAttendance {
                student_id,
                date,
                status,
            });
        }
    }

    report.records_inserted = store::insert_attendance_bulk(&tx, &staged)?;
    tx.commit().map_err(EngineError::Commit)?;

    info!(
        owner_id,
        rows = report.rows_scanned,
        inserted = report.records_inserted,
        existing = report.cells_skipped_existing,
        duplicate = report.cells_skipped_duplicate,
        "attendance import complete"
    );
    Ok(report)
}
