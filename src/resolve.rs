//! Bulk student intake: free-text roster rows to canonical users, courses,
//! groups and students.
//!
//! Planning ([`plan_intake`]) is pure over a [`Snapshot`] of what the store
//! already holds. Entities planned for one row are visible to every later row
//! of the same batch, so "Web Dev" followed by "web-dev" yields one course.
//! [`apply_plan`] then creates everything the plan calls for.

use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::matcher::{find_first, NameMatcher};
use crate::model::{Course, Group, SkippedRow, ROLE_STUDENT};
use crate::sheet::Grid;
use crate::store;

const COL_FULL_NAME: usize = 1;
const COL_PHONE: usize = 2;
const COL_GROUP: usize = 3;
const COL_COURSE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeRow {
    pub row: usize,
    pub full_name: String,
    pub phone: String,
    pub group_name: String,
    pub course_name: String,
}

/// Data rows of a roster sheet. Blank rows are dropped here.
pub fn intake_rows(grid: &Grid) -> Vec<IntakeRow> {
    (1..grid.height())
        .filter(|&r| !grid.row_is_blank(r))
        .map(|r| IntakeRow {
            row: r,
            full_name: grid.text(r, COL_FULL_NAME),
            phone: grid.text(r, COL_PHONE),
            group_name: grid.text(r, COL_GROUP),
            course_name: grid.text(r, COL_COURSE),
        })
        .collect()
}

/// Store state the planner resolves against.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub users_by_phone: HashMap<String, i64>,
    pub courses: Vec<Course>,
    pub groups: Vec<Group>,
}

pub fn load_snapshot(
    conn: &Connection,
    owner_id: i64,
    rows: &[IntakeRow],
) -> Result<Snapshot, EngineError> {
    let mut users_by_phone = HashMap::new();
    for row in rows {
        if row.phone.is_empty() || users_by_phone.contains_key(&row.phone) {
            continue;
        }
        if let Some(user) = store::find_user_by_phone(conn, &row.phone)? {
            users_by_phone.insert(row.phone.clone(), user.id);
        }
    }
    Ok(Snapshot {
        users_by_phone,
        courses: store::list_courses_by_owner(conn, owner_id)?,
        groups: store::list_groups_by_owner(conn, owner_id)?,
    })
}

/// An entity that either exists in the store or is the n-th planned one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Existing(i64),
    New(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUser {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub balance_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedGroup {
    pub title: String,
    pub course: EntityRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStudent {
    pub row: usize,
    pub user: EntityRef,
    pub group: EntityRef,
    pub phone: String,
}

#[derive(Debug, Clone, Default)]
pub struct IntakePlan {
    pub users: Vec<PlannedUser>,
    pub courses: Vec<String>,
    pub groups: Vec<PlannedGroup>,
    pub students: Vec<PlannedStudent>,
    pub users_reused: usize,
    pub courses_matched: usize,
    pub groups_matched: usize,
    pub skipped_rows: Vec<SkippedRow>,
}

/// First whitespace splits first from last name; no split leaves last empty.
pub fn split_full_name(full_name: &str) -> (String, String) {
    let t = full_name.trim();
    match t.split_once(char::is_whitespace) {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (t.to_string(), String::new()),
    }
}

pub fn plan_intake(
    rows: &[IntakeRow],
    snapshot: &Snapshot,
    matcher: &dyn NameMatcher,
    today: NaiveDate,
    trial_days: u32,
) -> IntakePlan {
    let mut plan = IntakePlan::default();
    let mut planned_users: HashMap<String, usize> = HashMap::new();
    let balance_until = today.checked_add_days(Days::new(u64::from(trial_days)));

    for row in rows {
        let reason = if row.phone.is_empty() {
            Some("missing_phone")
        } else if row.course_name.is_empty() {
            Some("missing_course")
        } else if row.group_name.is_empty() {
            Some("missing_group")
        } else {
            None
        };
        if let Some(reason) = reason {
            plan.skipped_rows.push(SkippedRow {
                row: row.row,
                phone: row.phone.clone(),
                reason,
            });
            continue;
        }

        let user = if let Some(&id) = snapshot.users_by_phone.get(&row.phone) {
            plan.users_reused += 1;
            EntityRef::Existing(id)
        } else if let Some(&idx) = planned_users.get(&row.phone) {
            plan.users_reused += 1;
            EntityRef::New(idx)
        } else {
            let (first_name, last_name) = split_full_name(&row.full_name);
            plan.users.push(PlannedUser {
                first_name,
                last_name,
                phone: row.phone.clone(),
                balance_until,
            });
            let idx = plan.users.len() - 1;
            planned_users.insert(row.phone.clone(), idx);
            EntityRef::New(idx)
        };

        let course = match find_first(matcher, &row.course_name, &snapshot.courses, |c| {
            c.title.as_str()
        }) {
            Some(c) => {
                plan.courses_matched += 1;
                EntityRef::Existing(c.id)
            }
            None => match plan
                .courses
                .iter()
                .position(|title| matcher.matches(&row.course_name, title))
            {
                Some(idx) => {
                    plan.courses_matched += 1;
                    EntityRef::New(idx)
                }
                None => {
                    plan.courses.push(row.course_name.clone());
                    EntityRef::New(plan.courses.len() - 1)
                }
            },
        };

        let existing_group = match course {
            EntityRef::Existing(course_id) => snapshot
                .groups
                .iter()
                .filter(|g| g.course_id == course_id)
                .find(|g| matcher.matches(&row.group_name, &g.title)),
            EntityRef::New(_) => None,
        };
        let group = match existing_group {
            Some(g) => {
                plan.groups_matched += 1;
                EntityRef::Existing(g.id)
            }
            None => match plan
                .groups
                .iter()
                .position(|g| g.course == course && matcher.matches(&row.group_name, &g.title))
            {
                Some(idx) => {
                    plan.groups_matched += 1;
                    EntityRef::New(idx)
                }
                None => {
                    plan.groups.push(PlannedGroup {
                        title: row.group_name.clone(),
                        course,
                    });
                    EntityRef::New(plan.groups.len() - 1)
                }
            },
        };

        plan.students.push(PlannedStudent {
            row: row.row,
            user,
            group,
            phone: row.phone.clone(),
        });
    }

    plan
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeReport {
    pub rows_scanned: usize,
    pub users_created: usize,
    pub users_reused: usize,
    pub courses_created: usize,
    pub courses_matched: usize,
    pub groups_created: usize,
    pub groups_matched: usize,
    pub students_created: usize,
    pub skipped_rows: Vec<SkippedRow>,
}

fn resolve(r: EntityRef, created: &[i64]) -> i64 {
    match r {
        EntityRef::Existing(id) => id,
        EntityRef::New(idx) => created[idx],
    }
}

/// Creates planned entities in dependency order and returns the created counts.
pub fn apply_plan(
    conn: &Connection,
    owner_id: i64,
    plan: &IntakePlan,
    today: NaiveDate,
) -> Result<IntakeReport, EngineError> {
    let mut user_ids = Vec::with_capacity(plan.users.len());
    for u in &plan.users {
        user_ids.push(store::create_user(
            conn,
            &u.first_name,
            &u.last_name,
            &u.phone,
            ROLE_STUDENT,
            u.balance_until,
        )?);
    }

    let mut course_ids = Vec::with_capacity(plan.courses.len());
    for title in &plan.courses {
        course_ids.push(store::create_course(conn, title, "", owner_id)?);
    }

    let mut group_ids = Vec::with_capacity(plan.groups.len());
    for g in &plan.groups {
        let course_id = resolve(g.course, &course_ids);
        group_ids.push(store::create_group(conn, &g.title, course_id)?);
    }

    for s in &plan.students {
        let user_id = resolve(s.user, &user_ids);
        let group_id = resolve(s.group, &group_ids);
        store::create_student(conn, user_id, &s.phone, group_id, today)?;
    }

    Ok(IntakeReport {
        rows_scanned: 0,
        users_created: user_ids.len(),
        users_reused: plan.users_reused,
        courses_created: course_ids.len(),
        courses_matched: plan.courses_matched,
        groups_created: group_ids.len(),
        groups_matched: plan.groups_matched,
        students_created: plan.students.len(),
        skipped_rows: plan.skipped_rows.clone(),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct IntakeOptions {
    pub today: NaiveDate,
    pub trial_days: u32,
}

/// Reads, plans and persists one roster inside a single immediate transaction.
pub fn import_students(
    conn: &Connection,
    owner_id: i64,
    grid: &Grid,
    matcher: &dyn NameMatcher,
    opts: IntakeOptions,
) -> Result<IntakeReport, EngineError> {
    if !store::user_exists(conn, owner_id)? {
        return Err(EngineError::NotFound {
            entity: "user",
            id: owner_id,
        });
    }
    let rows = intake_rows(grid);

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(EngineError::Transaction)?;
    let snapshot = load_snapshot(&tx, owner_id, &rows)?;
    let plan = plan_intake(&rows, &snapshot, matcher, opts.today, opts.trial_days);
    for s in &plan.skipped_rows {
        warn!(row = s.row, phone = %s.phone, reason = s.reason, "roster row skipped");
    }
    let mut report = apply_plan(&tx, owner_id, &plan, opts.today)?;
    tx.commit().map_err(EngineError::Commit)?;

    report.rows_scanned = rows.len();
    info!(
        owner_id,
        rows = report.rows_scanned,
        users_created = report.users_created,
        courses_created = report.courses_created,
        groups_created = report.groups_created,
        students_created = report.students_created,
        "student intake complete"
    );
    Ok(report)
}
