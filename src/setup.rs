use crate::db;
use crate::sheet::SheetLimits;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Import,
    Students,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Import, SetupSection::Students];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Self::Import),
            "students" => Some(Self::Students),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Students => "students",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Import => "setup.import",
            Self::Students => "setup.students",
        }
    }
}

pub fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Import => json!({
            "maxRows": 5000,
            "maxColumns": 400
        }),
        SetupSection::Students => json!({
            "trialDays": 7,
            "unknownCourseLabel": "Unknown"
        }),
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Import => match k.as_str() {
                "maxRows" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100_000)?));
                }
                "maxColumns" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 6, 5000)?));
                }
                _ => return Err(format!("unknown import field: {}", k)),
            },
            SetupSection::Students => match k.as_str() {
                "trialDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 365)?));
                }
                "unknownCourseLabel" => {
                    let s = parse_string_max(v, k, 64)?;
                    if s.is_empty() {
                        return Err(format!("{} must not be empty", k));
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown students field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &rusqlite::Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

fn field_usize(section: &Value, key: &str, fallback: usize) -> usize {
    section
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(fallback)
}

pub fn load_sheet_limits(conn: &rusqlite::Connection) -> anyhow::Result<SheetLimits> {
    let s = load_section(conn, SetupSection::Import)?;
    Ok(SheetLimits {
        max_rows: field_usize(&s, "maxRows", 5000),
        max_columns: field_usize(&s, "maxColumns", 400),
    })
}

#[derive(Debug, Clone)]
pub struct StudentSettings {
    pub trial_days: u32,
    pub unknown_course_label: String,
}

pub fn load_student_settings(conn: &rusqlite::Connection) -> anyhow::Result<StudentSettings> {
    let s = load_section(conn, SetupSection::Students)?;
    Ok(StudentSettings {
        trial_days: field_usize(&s, "trialDays", 7) as u32,
        unknown_course_label: s
            .get("unknownCourseLabel")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
    })
}
