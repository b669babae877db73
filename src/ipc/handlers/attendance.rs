use std::path::Path;

use crate::error::EngineError;
use crate::exporter::{self, AttendanceExport};
use crate::importer;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_i64, get_out_dir, get_required_i64, get_required_str, require_db, to_result,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{format_iso_date, parse_iso_date};
use crate::setup;
use crate::sheet::{read_grid, require_xlsx_path, write_output};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};

fn attendance_save(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_i64(params, "studentId")?;
    let date_raw = get_required_str(params, "date")?;
    let Some(date) = parse_iso_date(&date_raw) else {
        return Err(HandlerErr::bad_params("date must be YYYY-MM-DD"));
    };
    let status = get_required_str(params, "status")?.trim().to_string();
    if status.is_empty() {
        return Err(HandlerErr::bad_params("status must not be empty"));
    }
    if !store::student_exists(conn, student_id)? {
        return Err(EngineError::NotFound {
            entity: "student",
            id: student_id,
        }
        .into());
    }
    let rec = store::upsert_attendance(conn, student_id, date, &status)?;
    to_result(&rec)
}

fn attendance_import(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let owner_id = get_required_i64(params, "ownerId")?;
    let in_path = get_required_str(params, "inPath")?;
    require_xlsx_path(&in_path)?;

    let limits = setup::load_sheet_limits(conn).map_err(HandlerErr::query)?;
    let grid = read_grid(Path::new(&in_path), limits)?;
    let report = importer::import_attendance(conn, owner_id, &grid)?;
    to_result(&report)
}

fn attendance_export(
    conn: &Connection,
    workspace: Option<&Path>,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let owner_id = get_required_i64(params, "ownerId")?;
    // Range checks happen in exporter::month_bounds.
    let year = i32::try_from(get_required_i64(params, "year")?)
        .map_err(|_| HandlerErr::bad_params("year is out of range"))?;
    let month = u32::try_from(get_required_i64(params, "month")?)
        .map_err(|_| HandlerErr::bad_params("month is out of range"))?;
    let req = AttendanceExport {
        owner_id,
        year,
        month,
        course_id: get_optional_i64(params, "courseId")?,
        group_id: get_optional_i64(params, "groupId")?,
    };
    let out_dir = get_out_dir(params, workspace)?;

    let limits = setup::load_sheet_limits(conn).map_err(HandlerErr::query)?;
    let sheet = exporter::export_attendance(conn, req, limits)?;
    let path = write_output(&out_dir, &sheet.file_name, &sheet.bytes)?;
    Ok(json!({
        "fileName": sheet.file_name,
        "path": path.to_string_lossy(),
        "bytes": sheet.bytes.len(),
        "rows": sheet.rows,
        "dates": sheet.dates.iter().copied().map(format_iso_date).collect::<Vec<_>>()
    }))
}

fn respond(req: &Request, res: Result<Value, HandlerErr>) -> Value {
    match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_attendance_save(state: &mut AppState, req: &Request) -> Value {
    let res = require_db(state).and_then(|conn| attendance_save(conn, &req.params));
    respond(req, res)
}

fn handle_attendance_import(state: &mut AppState, req: &Request) -> Value {
    let res = require_db(state).and_then(|conn| attendance_import(conn, &req.params));
    respond(req, res)
}

fn handle_attendance_export(state: &mut AppState, req: &Request) -> Value {
    let workspace = state.workspace.as_deref();
    let res = require_db(state).and_then(|conn| attendance_export(conn, workspace, &req.params));
    respond(req, res)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "attendance.save" => Some(handle_attendance_save(state, req)),
        "attendance.importXlsx" => Some(handle_attendance_import(state, req)),
        "attendance.exportXlsx" => Some(handle_attendance_export(state, req)),
        _ => None,
    }
}
