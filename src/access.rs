//! Balance-window gate and the read paths that sit behind it.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;

use crate::error::EngineError;
use crate::model::{CourseWithGroups, Student, User, ROLE_STUDENT};
use crate::store;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("balance window has expired")]
    BalanceExpired { balance_until: Option<NaiveDate> },

    #[error("user {user_id} is not a student")]
    NotAStudent { user_id: i64 },
}

/// Inclusive on the expiration day. No window means no access.
pub fn has_access(balance_until: Option<NaiveDate>, today: NaiveDate) -> bool {
    match balance_until {
        Some(exp) => today <= exp,
        None => false,
    }
}

pub fn require_access(user: &User, today: NaiveDate) -> Result<(), AccessError> {
    if has_access(user.balance_until, today) {
        Ok(())
    } else {
        Err(AccessError::BalanceExpired {
            balance_until: user.balance_until,
        })
    }
}

fn load_user(conn: &Connection, user_id: i64) -> Result<User, EngineError> {
    store::find_user_by_id(conn, user_id)?.ok_or(EngineError::NotFound {
        entity: "user",
        id: user_id,
    })
}

/// Courses the student is enrolled in, each with all of its groups.
pub fn student_courses_and_groups(
    conn: &Connection,
    user_id: i64,
    today: NaiveDate,
) -> Result<Vec<CourseWithGroups>, EngineError> {
    let user = load_user(conn, user_id)?;
    if user.role != ROLE_STUDENT {
        return Err(AccessError::NotAStudent { user_id }.into());
    }
    require_access(&user, today)?;

    let mut out = Vec::new();
    for course in store::list_courses_for_student_user(conn, user_id)? {
        let groups = store::list_groups_by_course(conn, course.id)?;
        out.push(CourseWithGroups { course, groups });
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInGroup {
    pub student: Student,
    pub full_name: String,
}

pub fn student_in_group(
    conn: &Connection,
    user_id: i64,
    group_id: i64,
    today: NaiveDate,
) -> Result<StudentInGroup, EngineError> {
    let user = load_user(conn, user_id)?;
    if !store::group_exists(conn, group_id)? {
        return Err(EngineError::NotFound {
            entity: "group",
            id: group_id,
        });
    }
    require_access(&user, today)?;

    let student = store::find_student_by_user_and_group(conn, user_id, group_id)?.ok_or(
        EngineError::NotFound {
            entity: "student",
            id: user_id,
        },
    )?;
    Ok(StudentInGroup {
        student,
        full_name: user.full_name(),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceStatus {
    pub user_id: i64,
    pub balance_until: Option<NaiveDate>,
    pub has_access: bool,
}

pub fn balance_status(
    conn: &Connection,
    user_id: i64,
    today: NaiveDate,
) -> Result<BalanceStatus, EngineError> {
    let user = load_user(conn, user_id)?;
    Ok(BalanceStatus {
        user_id,
        balance_until: user.balance_until,
        has_access: has_access(user.balance_until, today),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("date")
    }

    #[test]
    fn gate_is_inclusive_on_expiration_day() {
        let exp = Some(d(2024, 1, 10));
        assert!(has_access(exp, d(2024, 1, 9)));
        assert!(has_access(exp, d(2024, 1, 10)));
        assert!(!has_access(exp, d(2024, 1, 11)));
    }

    #[test]
    fn missing_window_never_grants_access() {
        assert!(!has_access(None, d(1970, 1, 1)));
    }

    fn seed(conn: &Connection, role: &str, until: Option<NaiveDate>) -> (i64, i64, i64) {
        let owner =
            store::create_user(conn, "Ann", "Teacher", "100", "teacher", None).expect("owner");
        let user =
            store::create_user(conn, "Ali", "Valiyev", "901234567", role, until).expect("user");
        let course = store::create_course(conn, "Web Dev", "", owner).expect("course");
        let group = store::create_group(conn, "G1", course).expect("group");
        store::create_group(conn, "G2", course).expect("group");
        store::create_student(conn, user, "901234567", group, d(2024, 1, 1)).expect("student");
        (user, course, group)
    }

    #[test]
    fn enrolled_student_sees_course_with_all_groups() {
        let conn = open_memory();
        let (user, course, _) = seed(&conn, ROLE_STUDENT, Some(d(2024, 1, 10)));
        let out = student_courses_and_groups(&conn, user, d(2024, 1, 10)).expect("read");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].course.id, course);
        assert_eq!(out[0].groups.len(), 2);
    }

    #[test]
    fn expired_window_is_denial_not_empty_result() {
        let conn = open_memory();
        let (user, _, group) = seed(&conn, ROLE_STUDENT, Some(d(2024, 1, 10)));
        let e = student_courses_and_groups(&conn, user, d(2024, 1, 11)).expect_err("denied");
        assert_eq!(e.code(), "balance_expired");
        let e = student_in_group(&conn, user, group, d(2024, 1, 11)).expect_err("denied");
        assert_eq!(e.code(), "balance_expired");
    }

    #[test]
    fn non_students_and_unknown_ids_are_rejected() {
        let conn = open_memory();
        let (user, _, group) = seed(&conn, "teacher", Some(d(2030, 1, 1)));
        let e = student_courses_and_groups(&conn, user, d(2024, 1, 1)).expect_err("role");
        assert_eq!(e.code(), "not_a_student");
        let e = student_in_group(&conn, user, group + 100, d(2024, 1, 1)).expect_err("group");
        assert_eq!(e.code(), "not_found");
        let e = balance_status(&conn, 9999, d(2024, 1, 1)).expect_err("user");
        assert_eq!(e.code(), "not_found");
    }

    #[test]
    fn student_in_group_returns_full_name() {
        let conn = open_memory();
        let (user, _, group) = seed(&conn, ROLE_STUDENT, Some(d(2024, 2, 1)));
        let found = student_in_group(&conn, user, group, d(2024, 1, 15)).expect("found");
        assert_eq!(found.full_name, "Ali Valiyev");
        assert_eq!(found.student.group_id, group);
    }
}
