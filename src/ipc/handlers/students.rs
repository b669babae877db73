use std::path::Path;

use crate::access;
use crate::exporter;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_out_dir, get_required_i64, get_required_str, get_today, require_db, to_result, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::matcher::ContainmentMatcher;
use crate::resolve::{self, IntakeOptions};
use crate::setup;
use crate::sheet::{read_grid, require_xlsx_path, write_output};
use rusqlite::Connection;
use serde_json::{json, Value};

fn students_import(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let owner_id = get_required_i64(params, "ownerId")?;
    let in_path = get_required_str(params, "inPath")?;
    require_xlsx_path(&in_path)?;
    let today = get_today(params)?;

    let limits = setup::load_sheet_limits(conn).map_err(HandlerErr::query)?;
    let settings = setup::load_student_settings(conn).map_err(HandlerErr::query)?;
    let grid = read_grid(Path::new(&in_path), limits)?;
    let report = resolve::import_students(
        conn,
        owner_id,
        &grid,
        &ContainmentMatcher,
        IntakeOptions {
            today,
            trial_days: settings.trial_days,
        },
    )?;
    to_result(&report)
}

fn students_export(
    conn: &Connection,
    workspace: Option<&Path>,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let owner_id = get_required_i64(params, "ownerId")?;
    let out_dir = get_out_dir(params, workspace)?;

    let limits = setup::load_sheet_limits(conn).map_err(HandlerErr::query)?;
    let settings = setup::load_student_settings(conn).map_err(HandlerErr::query)?;
    let sheet = exporter::export_roster(conn, owner_id, &settings.unknown_course_label, limits)?;
    let path = write_output(&out_dir, &sheet.file_name, &sheet.bytes)?;
    Ok(json!({
        "fileName": sheet.file_name,
        "path": path.to_string_lossy(),
        "bytes": sheet.bytes.len(),
        "rows": sheet.rows
    }))
}

fn courses_and_groups(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_i64(params, "userId")?;
    let today = get_today(params)?;
    let courses = access::student_courses_and_groups(conn, user_id, today)?;
    Ok(json!({ "courses": to_result(&courses)? }))
}

fn by_group_and_user(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_i64(params, "userId")?;
    let group_id = get_required_i64(params, "groupId")?;
    let today = get_today(params)?;
    let found = access::student_in_group(conn, user_id, group_id, today)?;
    to_result(&found)
}

fn balance(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_i64(params, "userId")?;
    let today = get_today(params)?;
    to_result(&access::balance_status(conn, user_id, today)?)
}

fn respond(req: &Request, res: Result<Value, HandlerErr>) -> Value {
    match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let run: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "students.exportXlsx" => {
            let workspace = state.workspace.as_deref();
            let res = require_db(state)
                .and_then(|conn| students_export(conn, workspace, &req.params));
            return Some(respond(req, res));
        }
        "students.importXlsx" => students_import,
        "student.coursesAndGroups" => courses_and_groups,
        "student.byGroupAndUser" => by_group_and_user,
        "student.balance" => balance,
        _ => return None,
    };
    let res = require_db(state).and_then(|conn| run(conn, &req.params));
    Some(respond(req, res))
}
