//! Attendance records back into a wide month sheet, and the student roster.

use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, NaiveDate};
use rusqlite::Connection;
use tracing::info;

use crate::error::EngineError;
use crate::model::{format_iso_date, AttendanceRecord, Course, Group, Student, User};
use crate::sheet::{write_sheet, OutCell, SheetLimits};
use crate::store;

pub const ATTENDANCE_SHEET: &str = "Attendance";
pub const ROSTER_SHEET: &str = "Students";

#[derive(Debug, Clone, Copy)]
pub struct AttendanceExport {
    pub owner_id: i64,
    pub year: i32,
    pub month: u32,
    pub course_id: Option<i64>,
    pub group_id: Option<i64>,
}

impl AttendanceExport {
    pub fn file_name(&self) -> String {
        format!("attendance_{}_{}_{}.xlsx", self.owner_id, self.year, self.month)
    }
}

pub fn roster_file_name(owner_id: i64) -> String {
    format!("students_user_{}.xlsx", owner_id)
}

#[derive(Debug, Clone)]
pub struct ExportedSheet {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub rows: usize,
    pub dates: Vec<NaiveDate>,
}

/// `[first of month, first of next month)`.
pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), EngineError> {
    if !(2000..=2100).contains(&year) {
        return Err(EngineError::Validation("year must be in 2000..=2100".into()));
    }
    if !(1..=12).contains(&month) {
        return Err(EngineError::Validation("month must be in 1..=12".into()));
    }
    let invalid = || EngineError::Validation(format!("invalid month {}-{}", year, month));
    let from = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let until = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;
    Ok((from, until))
}

/// Users, groups and courses referenced by a set of students.
#[derive(Debug, Default)]
pub struct Lookup {
    pub users: HashMap<i64, User>,
    pub groups: HashMap<i64, Group>,
    pub courses: HashMap<i64, Course>,
}

impl Lookup {
    pub fn load(conn: &Connection, students: &[Student]) -> Result<Self, EngineError> {
        let mut out = Self::default();
        for s in students {
            if !out.users.contains_key(&s.user_id) {
                if let Some(u) = store::find_user_by_id(conn, s.user_id)? {
                    out.users.insert(u.id, u);
                }
            }
            if out.groups.contains_key(&s.group_id) {
                continue;
            }
            let Some(g) = store::find_group_by_id(conn, s.group_id)? else {
                continue;
            };
            if !out.courses.contains_key(&g.course_id) {
                if let Some(c) = store::find_course_by_id(conn, g.course_id)? {
                    out.courses.insert(c.id, c);
                }
            }
            out.groups.insert(g.id, g);
        }
        Ok(out)
    }

    fn full_name(&self, s: &Student) -> String {
        self.users
            .get(&s.user_id)
            .map(User::full_name)
            .unwrap_or_default()
    }

    fn group(&self, s: &Student) -> Result<&Group, EngineError> {
        self.groups.get(&s.group_id).ok_or(EngineError::Integrity {
            entity: "group",
            id: s.group_id,
            student_id: s.id,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pivot {
    pub header: Vec<String>,
    pub rows: Vec<Vec<OutCell>>,
    pub dates: Vec<NaiveDate>,
}

/// Long records to one row per student and one column per date that has at
/// least one record. A missing group or course fails the whole pivot.
pub fn pivot(
    students: &[Student],
    lookup: &Lookup,
    records: &[AttendanceRecord],
) -> Result<Pivot, EngineError> {
    let dates: Vec<NaiveDate> = records
        .iter()
        .map(|r| r.date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut status: HashMap<(i64, NaiveDate), &str> = HashMap::new();
    for r in records {
        status.entry((r.student_id, r.date)).or_insert(r.status.as_str());
    }

    let mut header: Vec<String> = ["No", "Full name", "Phone", "Course", "Group"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(dates.iter().copied().map(format_iso_date));

    let mut rows = Vec::with_capacity(students.len());
    for (i, s) in students.iter().enumerate() {
        let group = lookup.group(s)?;
        let course = lookup.courses.get(&group.course_id).ok_or(EngineError::Integrity {
            entity: "course",
            id: group.course_id,
            student_id: s.id,
        })?;
        let mut row = vec![
            OutCell::Number((i + 1) as f64),
            OutCell::Text(lookup.full_name(s)),
            OutCell::Text(s.phone_number.clone()),
            OutCell::Text(course.title.clone()),
            OutCell::Text(group.title.clone()),
        ];
        for d in &dates {
            let v = status.get(&(s.id, *d)).copied().unwrap_or_default();
            row.push(OutCell::Text(v.to_string()));
        }
        rows.push(row);
    }

    Ok(Pivot {
        header,
        rows,
        dates,
    })
}

/// Counts the header row, the same way [`crate::sheet::read_grid`] does, so
/// any sheet written under `limits` can be read back under them.
fn check_output_size(
    data_rows: usize,
    columns: usize,
    limits: SheetLimits,
) -> Result<(), EngineError> {
    let rows = data_rows + 1;
    if rows > limits.max_rows || columns > limits.max_columns {
        return Err(EngineError::SheetTooLarge {
            rows,
            columns,
            max_rows: limits.max_rows,
            max_columns: limits.max_columns,
        });
    }
    Ok(())
}

pub fn export_attendance(
    conn: &Connection,
    req: AttendanceExport,
    limits: SheetLimits,
) -> Result<ExportedSheet, EngineError> {
    let (from, until) = month_bounds(req.year, req.month)?;
    let students = store::list_students_by_owner(conn, req.owner_id, req.course_id, req.group_id)?;
    let records = store::list_attendance_scoped(
        conn,
        req.owner_id,
        req.course_id,
        req.group_id,
        from,
        until,
    )?;
    let lookup = Lookup::load(conn, &students)?;
    let p = pivot(&students, &lookup, &records)?;
    check_output_size(p.rows.len(), p.header.len(), limits)?;

    let bytes = write_sheet(ATTENDANCE_SHEET, &p.header, &p.rows)?;
    info!(
        owner_id = req.owner_id,
        month = %format!("{}-{:02}", from.year(), from.month()),
        students = p.rows.len(),
        dates = p.dates.len(),
        "attendance export built"
    );
    Ok(ExportedSheet {
        file_name: req.file_name(),
        bytes,
        rows: p.rows.len(),
        dates: p.dates,
    })
}

/// Roster in the same column layout the student intake reads.
pub fn roster_rows(
    students: &[Student],
    lookup: &Lookup,
    unknown_course: &str,
) -> Result<Vec<Vec<OutCell>>, EngineError> {
    let mut rows = Vec::with_capacity(students.len());
    for (i, s) in students.iter().enumerate() {
        let group = lookup.group(s)?;
        let course = lookup
            .courses
            .get(&group.course_id)
            .map(|c| c.title.clone())
            .unwrap_or_else(|| unknown_course.to_string());
        rows.push(vec![
            OutCell::Number((i + 1) as f64),
            OutCell::Text(lookup.full_name(s)),
            OutCell::Text(s.phone_number.clone()),
            OutCell::Text(group.title.clone()),
            OutCell::Text(course),
        ]);
    }
    Ok(rows)
}

pub fn export_roster(
    conn: &Connection,
    owner_id: i64,
    unknown_course: &str,
    limits: SheetLimits,
) -> Result<ExportedSheet, EngineError> {
    let students = store::list_students_by_owner(conn, owner_id, None, None)?;
    let lookup = Lookup::load(conn, &students)?;
    let rows = roster_rows(&students, &lookup, unknown_course)?;
    let header: Vec<String> = ["No", "Full name", "Phone", "Group", "Course"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    check_output_size(rows.len(), header.len(), limits)?;

    let bytes = write_sheet(ROSTER_SHEET, &header, &rows)?;
    info!(owner_id, students = rows.len(), "roster export built");
    Ok(ExportedSheet {
        file_name: roster_file_name(owner_id),
        bytes,
        rows: rows.len(),
        dates: Vec::new(),
    })
}
