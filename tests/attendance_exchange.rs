use calamine::{open_workbook, Reader, Xlsx};
use rusqlite::Connection;
use rust_xlsxwriter::Workbook;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_davomatd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn davomatd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(json!({}))
}

/// Owner 1 teaches course 5 with group 10; student 1 has phone 901234567.
fn seed_scenario(workspace: &Path) -> Connection {
    let conn = Connection::open(workspace.join("davomat.sqlite3")).expect("open db");
    conn.execute_batch(
        "INSERT INTO users(id, first_name, last_name, phone_number, role, balance_until)
           VALUES(1, 'Olim', 'Karimov', '100', 'teacher', NULL);
         INSERT INTO users(id, first_name, last_name, phone_number, role, balance_until)
           VALUES(2, 'Ali', 'Valiyev', '901234567', 'student', '2024-12-31');
         INSERT INTO courses(id, title, description, owner_user_id) VALUES(5, 'Web Dev', '', 1);
         INSERT INTO study_groups(id, title, course_id) VALUES(10, 'G1', 5);
         INSERT INTO students(id, user_id, phone_number, group_id, created_date)
           VALUES(1, 2, '901234567', 10, '2024-01-01');",
    )
    .expect("seed");
    conn
}

fn write_xlsx(path: &Path, rows: &[Vec<&str>]) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            if !v.is_empty() {
                sheet.write_string(r as u32, c as u16, *v).expect("write cell");
            }
        }
    }
    workbook.save(path).expect("save fixture");
}

fn scenario_sheet(path: &Path) {
    write_xlsx(
        path,
        &[
            vec![
                "No",
                "Full name",
                "Phone",
                "Course",
                "Group",
                "2024-01-01",
                "2024-01-02",
                "2024-01-03",
            ],
            vec!["1", "Ali Valiyev", "901234567", "Web Dev", "G1", "present", "", "absent"],
        ],
    );
}

fn read_sheet(path: &Path, name: &str) -> Vec<Vec<String>> {
    let mut workbook: Xlsx<_> = open_workbook(path).expect("open export");
    let range = workbook.worksheet_range(name).expect("sheet");
    range
        .rows()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect()
}

fn record_triples(conn: &Connection) -> Vec<(i64, String, String)> {
    let mut stmt = conn
        .prepare("SELECT student_id, date, status FROM attendance ORDER BY student_id, date")
        .expect("prepare");
    stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows")
}

#[test]
fn import_skips_blanks_and_reimport_is_idempotent() {
    let workspace = temp_dir("davomat-attendance-import");
    let sheet = workspace.join("january.xlsx");
    scenario_sheet(&sheet);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let conn = seed_scenario(&workspace);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.importXlsx",
        json!({ "ownerId": 1, "inPath": sheet.to_string_lossy() }),
    );
    assert_eq!(first["rowsScanned"], 1);
    assert_eq!(first["recordsInserted"], 2);
    assert_eq!(
        record_triples(&conn),
        vec![
            (1, "2024-01-01".to_string(), "present".to_string()),
            (1, "2024-01-03".to_string(), "absent".to_string()),
        ]
    );

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.importXlsx",
        json!({ "ownerId": 1, "inPath": sheet.to_string_lossy() }),
    );
    assert_eq!(second["recordsInserted"], 0);
    assert_eq!(second["cellsSkippedExisting"], 2);
    assert_eq!(record_triples(&conn).len(), 2);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn export_uses_only_dates_with_records() {
    let workspace = temp_dir("davomat-attendance-export");
    let sheet = workspace.join("january.xlsx");
    scenario_sheet(&sheet);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _conn = seed_scenario(&workspace);
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.importXlsx",
        json!({ "ownerId": 1, "inPath": sheet.to_string_lossy() }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.exportXlsx",
        json!({ "ownerId": 1, "year": 2024, "month": 1 }),
    );
    assert_eq!(exported["fileName"], "attendance_1_2024_1.xlsx");
    assert_eq!(exported["dates"], json!(["2024-01-01", "2024-01-03"]));
    let path = PathBuf::from(exported["path"].as_str().expect("path"));
    assert_eq!(path, workspace.join("exports").join("attendance_1_2024_1.xlsx"));

    let rows = read_sheet(&path, "Attendance");
    assert_eq!(
        rows[0],
        vec!["No", "Full name", "Phone", "Course", "Group", "2024-01-01", "2024-01-03"]
    );
    assert_eq!(
        rows[1],
        vec!["1", "Ali Valiyev", "901234567", "Web Dev", "G1", "present", "absent"]
    );

    let february = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.exportXlsx",
        json!({
            "ownerId": 1,
            "year": 2024,
            "month": 2,
            "outDir": workspace.join("feb").to_string_lossy()
        }),
    );
    assert_eq!(february["dates"], json!([]));
    assert_eq!(february["rows"], 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn exported_month_reimports_to_the_same_records() {
    let workspace = temp_dir("davomat-attendance-roundtrip");
    let sheet = workspace.join("january.xlsx");
    scenario_sheet(&sheet);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let conn = seed_scenario(&workspace);
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.importXlsx",
        json!({ "ownerId": 1, "inPath": sheet.to_string_lossy() }),
    );
    let before = record_triples(&conn);

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.exportXlsx",
        json!({ "ownerId": 1, "year": 2024, "month": 1 }),
    );
    conn.execute("DELETE FROM attendance", []).expect("clear");

    let reimported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.importXlsx",
        json!({ "ownerId": 1, "inPath": exported["path"] }),
    );
    assert_eq!(reimported["recordsInserted"], 2);
    assert_eq!(reimported["skippedColumns"], json!([]));
    assert_eq!(record_triples(&conn), before);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn import_reports_bad_headers_and_unknown_phones() {
    let workspace = temp_dir("davomat-attendance-report");
    let sheet = workspace.join("messy.xlsx");
    write_xlsx(
        &sheet,
        &[
            vec!["No", "Full name", "Phone", "Course", "Group", "2024-01-05", "5 Jan", "2024-1-6"],
            vec!["1", "Ali Valiyev", "901234567", "Web Dev", "G1", "present", "absent", "late"],
            vec![],
            vec!["2", "Nobody", "555", "Web Dev", "G1", "present"],
        ],
    );

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _conn = seed_scenario(&workspace);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.importXlsx",
        json!({ "ownerId": 1, "inPath": sheet.to_string_lossy() }),
    );
    assert_eq!(report["rowsScanned"], 2);
    assert_eq!(report["recordsInserted"], 1);
    assert_eq!(
        report["skippedColumns"],
        json!([
            { "column": 6, "header": "5 Jan", "reason": "invalid_date_header" },
            { "column": 7, "header": "2024-1-6", "reason": "invalid_date_header" }
        ])
    );
    assert_eq!(
        report["skippedRows"],
        json!([{ "row": 3, "phone": "555", "reason": "student_not_found" }])
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn direct_save_updates_in_place() {
    let workspace = temp_dir("davomat-attendance-save");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let conn = seed_scenario(&workspace);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.save",
        json!({ "studentId": 1, "date": "2024-01-02", "status": "absent" }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.save",
        json!({ "studentId": 1, "date": "2024-01-02", "status": "present" }),
    );
    assert_eq!(first["id"], second["id"]);
    assert_eq!(second["status"], "present");
    assert_eq!(second["date"], "2024-01-02");
    assert_eq!(record_triples(&conn).len(), 1);

    let missing = request(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.save",
        json!({ "studentId": 99, "date": "2024-01-02", "status": "present" }),
    );
    assert_eq!(missing["error"]["code"], "not_found");
    let bad_date = request(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.save",
        json!({ "studentId": 1, "date": "02.01.2024", "status": "present" }),
    );
    assert_eq!(bad_date["error"]["code"], "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn export_params_are_validated() {
    let workspace = temp_dir("davomat-attendance-params");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let early = request(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.exportXlsx",
        json!({ "ownerId": 1, "year": 2024, "month": 1 }),
    );
    assert_eq!(early["error"]["code"], "no_workspace");

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let out_of_range: [(i64, i64); 6] = [
        (1999, 1),
        (2024, 0),
        (2024, 13),
        (2101, 6),
        (2024, -1),
        (5_000_000_000, 1),
    ];
    for (i, (year, month)) in out_of_range.iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "attendance.exportXlsx",
            json!({ "ownerId": 1, "year": year, "month": month }),
        );
        assert_eq!(resp["error"]["code"], "bad_params", "{}-{}", year, month);
    }
    let csv = request(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.importXlsx",
        json!({ "ownerId": 1, "inPath": workspace.join("a.csv").to_string_lossy() }),
    );
    assert_eq!(csv["error"]["code"], "bad_params");
    let missing = request(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.importXlsx",
        json!({ "ownerId": 1, "inPath": workspace.join("missing.xlsx").to_string_lossy() }),
    );
    assert_eq!(missing["error"]["code"], "sheet_read_failed");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
