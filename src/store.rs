//! Record store over the workspace database.
//!
//! Every query the engine issues against users, courses, groups, students and
//! attendance lives here. Scoped lookups walk Group -> Course -> owner in SQL
//! rather than filtering full-table scans in memory.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{AttendanceRecord, Course, Group, NewAttendance, Student, User};

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        phone_number: r.get(3)?,
        role: r.get(4)?,
        balance_until: r.get(5)?,
    })
}

fn course_from_row(r: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        owner_user_id: r.get(3)?,
    })
}

fn group_from_row(r: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: r.get(0)?,
        title: r.get(1)?,
        course_id: r.get(2)?,
    })
}

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        user_id: r.get(1)?,
        phone_number: r.get(2)?,
        group_id: r.get(3)?,
        created_date: r.get(4)?,
    })
}

fn attendance_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        date: r.get(2)?,
        status: r.get(3)?,
    })
}

const USER_COLUMNS: &str = "id, first_name, last_name, phone_number, role, balance_until";
const STUDENT_COLUMNS: &str = "s.id, s.user_id, s.phone_number, s.group_id, s.created_date";

// ---- users ----

pub fn find_user_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
        [id],
        user_from_row,
    )
    .optional()
}

/// Lowest id wins when a phone number is shared.
pub fn find_user_by_phone(conn: &Connection, phone: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE phone_number = ? ORDER BY id LIMIT 1"),
        [phone],
        user_from_row,
    )
    .optional()
}

pub fn user_exists(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    exists(conn, "SELECT 1 FROM users WHERE id = ?", id)
}

pub fn create_user(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
    phone_number: &str,
    role: &str,
    balance_until: Option<NaiveDate>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO users(first_name, last_name, phone_number, role, balance_until)
         VALUES(?, ?, ?, ?, ?)",
        params![first_name, last_name, phone_number, role, balance_until],
    )?;
    Ok(conn.last_insert_rowid())
}

// ---- courses ----

pub fn find_course_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<Course>> {
    conn.query_row(
        "SELECT id, title, description, owner_user_id FROM courses WHERE id = ?",
        [id],
        course_from_row,
    )
    .optional()
}

pub fn list_courses_by_owner(conn: &Connection, owner_id: i64) -> rusqlite::Result<Vec<Course>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, description, owner_user_id
         FROM courses
         WHERE owner_user_id = ?
         ORDER BY id",
    )?;
    stmt.query_map([owner_id], course_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

/// Courses a student user is enrolled in through any of their student rows.
pub fn list_courses_for_student_user(
    conn: &Connection,
    user_id: i64,
) -> rusqlite::Result<Vec<Course>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT c.id, c.title, c.description, c.owner_user_id
         FROM students s
         JOIN study_groups g ON g.id = s.group_id
         JOIN courses c ON c.id = g.course_id
         WHERE s.user_id = ?
         ORDER BY c.id",
    )?;
    stmt.query_map([user_id], course_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

pub fn create_course(
    conn: &Connection,
    title: &str,
    description: &str,
    owner_user_id: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO courses(title, description, owner_user_id) VALUES(?, ?, ?)",
        params![title, description, owner_user_id],
    )?;
    Ok(conn.last_insert_rowid())
}

// ---- groups ----

pub fn find_group_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<Group>> {
    conn.query_row(
        "SELECT id, title, course_id FROM study_groups WHERE id = ?",
        [id],
        group_from_row,
    )
    .optional()
}

pub fn group_exists(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    exists(conn, "SELECT 1 FROM study_groups WHERE id = ?", id)
}

pub fn list_groups_by_course(conn: &Connection, course_id: i64) -> rusqlite::Result<Vec<Group>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, course_id FROM study_groups WHERE course_id = ? ORDER BY id",
    )?;
    stmt.query_map([course_id], group_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

pub fn list_groups_by_owner(conn: &Connection, owner_id: i64) -> rusqlite::Result<Vec<Group>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.title, g.course_id
         FROM study_groups g
         JOIN courses c ON c.id = g.course_id
         WHERE c.owner_user_id = ?
         ORDER BY g.id",
    )?;
    stmt.query_map([owner_id], group_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

pub fn create_group(conn: &Connection, title: &str, course_id: i64) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO study_groups(title, course_id) VALUES(?, ?)",
        params![title, course_id],
    )?;
    Ok(conn.last_insert_rowid())
}

// ---- students ----

pub fn student_exists(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    exists(conn, "SELECT 1 FROM students WHERE id = ?", id)
}

/// Students whose group belongs to a course owned by `owner_id`, in
/// course, group, student order.
pub fn list_students_by_owner(
    conn: &Connection,
    owner_id: i64,
    course_id: Option<i64>,
    group_id: Option<i64>,
) -> rusqlite::Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS}
         FROM students s
         JOIN study_groups g ON g.id = s.group_id
         JOIN courses c ON c.id = g.course_id
         WHERE c.owner_user_id = ?1
           AND (?2 IS NULL OR c.id = ?2)
           AND (?3 IS NULL OR g.id = ?3)
         ORDER BY c.id, g.id, s.id"
    ))?;
    stmt.query_map(params![owner_id, course_id, group_id], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

pub fn find_student_by_user_and_group(
    conn: &Connection,
    user_id: i64,
    group_id: i64,
) -> rusqlite::Result<Option<Student>> {
    conn.query_row(
        &format!(
            "SELECT {STUDENT_COLUMNS} FROM students s
             WHERE s.user_id = ? AND s.group_id = ?
             ORDER BY s.id LIMIT 1"
        ),
        [user_id, group_id],
        student_from_row,
    )
    .optional()
}

pub fn create_student(
    conn: &Connection,
    user_id: i64,
    phone_number: &str,
    group_id: i64,
    created_date: NaiveDate,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO students(user_id, phone_number, group_id, created_date) VALUES(?, ?, ?, ?)",
        params![user_id, phone_number, group_id, created_date],
    )?;
    Ok(conn.last_insert_rowid())
}

// ---- attendance ----

pub fn find_attendance(
    conn: &Connection,
    student_id: i64,
    date: NaiveDate,
) -> rusqlite::Result<Option<AttendanceRecord>> {
    conn.query_row(
        "SELECT id, student_id, date, status FROM attendance WHERE student_id = ? AND date = ?",
        params![student_id, date],
        attendance_from_row,
    )
    .optional()
}

pub fn attendance_exists(
    conn: &Connection,
    student_id: i64,
    date: NaiveDate,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM attendance WHERE student_id = ? AND date = ?",
        params![student_id, date],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

/// Insert-only. Callers are expected to have filtered out existing keys.
pub fn insert_attendance_bulk(
    conn: &Connection,
    records: &[NewAttendance],
) -> rusqlite::Result<usize> {
    let mut stmt =
        conn.prepare("INSERT INTO attendance(student_id, date, status) VALUES(?, ?, ?)")?;
    let mut inserted = 0usize;
    for rec in records {
        inserted += stmt.execute(params![rec.student_id, rec.date, rec.status])?;
    }
    Ok(inserted)
}

/// Direct-edit write: updates the status when (student, date) already exists.
pub fn upsert_attendance(
    conn: &Connection,
    student_id: i64,
    date: NaiveDate,
    status: &str,
) -> rusqlite::Result<AttendanceRecord> {
    conn.execute(
        "INSERT INTO attendance(student_id, date, status)
         VALUES(?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status",
        params![student_id, date, status],
    )?;
    find_attendance(conn, student_id, date)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Records in `[from, until)` for students in the owner's scope.
pub fn list_attendance_scoped(
    conn: &Connection,
    owner_id: i64,
    course_id: Option<i64>,
    group_id: Option<i64>,
    from: NaiveDate,
    until: NaiveDate,
) -> rusqlite::Result<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.student_id, a.date, a.status
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         JOIN study_groups g ON g.id = s.group_id
         JOIN courses c ON c.id = g.course_id
         WHERE c.owner_user_id = ?1
           AND (?2 IS NULL OR c.id = ?2)
           AND (?3 IS NULL OR g.id = ?3)
           AND a.date >= ?4 AND a.date < ?5
         ORDER BY a.id",
    )?;
    stmt.query_map(
        params![owner_id, course_id, group_id, from, until],
        attendance_from_row,
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

#[cfg(test)]
pub fn count_attendance(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0))
}

fn exists(conn: &Connection, sql: &str, id: i64) -> rusqlite::Result<bool> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
}
