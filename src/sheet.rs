//! Spreadsheet cells and documents.
//!
//! Reading goes through calamine and yields an absolute-position [`Grid`] of
//! [`CellValue`]s; writing goes through rust_xlsxwriter into an in-memory
//! buffer. [`normalize`] is the single place where a cell becomes text, so
//! importers and exporters agree on the canonical form.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::{Days, NaiveDate};
use rust_xlsxwriter::{Format, Workbook};

use crate::error::EngineError;
use crate::model::{format_iso_date, parse_iso_date};

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number { value: f64, date_formatted: bool },
    Bool(bool),
    /// A formula cell carrying its evaluated result.
    Formula(Box<CellValue>),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn number(value: f64) -> Self {
        Self::Number {
            value,
            date_formatted: false,
        }
    }
}

pub fn normalize(cell: &CellValue) -> String {
    match cell {
        CellValue::Empty => String::new(),
        CellValue::Text(s) => s.trim().to_string(),
        CellValue::Number {
            value,
            date_formatted: true,
        } => serial_to_date(*value)
            .map(format_iso_date)
            .unwrap_or_else(|| format_number(*value)),
        CellValue::Number { value, .. } => format_number(*value),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Formula(result) => normalize(result),
    }
}

fn format_number(n: f64) -> String {
    if !n.is_finite() {
        return String::new();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Excel 1900 date system for bare serials. Serials below 61 sit before the
/// phantom 1900-02-29.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let mut days = serial.floor() as u64;
    if days < 61 {
        days += 1;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(days))
}

fn decode(data: &Data) -> CellValue {
    match data {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(s) => CellValue::text(s.as_str()),
        Data::Float(n) => CellValue::number(*n),
        Data::Int(n) => CellValue::number(*n as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) if dt.is_duration() => CellValue::number(dt.as_f64()),
        // as_datetime honours the workbook's 1904 flag; the bare serial does not.
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(at) => CellValue::Text(format_iso_date(at.date())),
            None => CellValue::Number {
                value: dt.as_f64(),
                date_formatted: true,
            },
        },
        Data::DateTimeIso(s) => match s.get(..10).and_then(parse_iso_date) {
            Some(d) => CellValue::Text(format_iso_date(d)),
            None => CellValue::Text(s.clone()),
        },
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SheetLimits {
    pub max_rows: usize,
    pub max_columns: usize,
}

/// First worksheet of a document, indexed from A1.
#[derive(Debug, Clone, Default)]
pub struct Grid {
    rows: Vec<Vec<CellValue>>,
}

static EMPTY: CellValue = CellValue::Empty;

impl Grid {
    #[cfg(test)]
    pub fn from_rows(rows: Vec<Vec<CellValue>>) -> Self {
        Self { rows }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn text(&self, row: usize, col: usize) -> String {
        normalize(self.cell(row, col))
    }

    pub fn row_is_blank(&self, row: usize) -> bool {
        self.rows
            .get(row)
            .map(|r| r.iter().all(|c| normalize(c).is_empty()))
            .unwrap_or(true)
    }
}

pub fn require_xlsx_path(path: &str) -> Result<(), EngineError> {
    let ok = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("xlsx"))
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(EngineError::Validation(
            "only .xlsx documents are accepted".to_string(),
        ))
    }
}

pub fn read_grid(path: &Path, limits: SheetLimits) -> Result<Grid, EngineError> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .map_err(|e| EngineError::SheetRead(format!("{}: {}", path.to_string_lossy(), e)))?;
    let Some(sheet_name) = workbook.sheet_names().first().cloned() else {
        return Err(EngineError::SheetRead("document contains no sheets".to_string()));
    };
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| EngineError::SheetRead(format!("sheet '{}': {}", sheet_name, e)))?;

    let (height, width) = match range.end() {
        Some((r, c)) => (r as usize + 1, c as usize + 1),
        None => (0, 0),
    };
    if height > limits.max_rows || width > limits.max_columns {
        return Err(EngineError::SheetTooLarge {
            rows: height,
            columns: width,
            max_rows: limits.max_rows,
            max_columns: limits.max_columns,
        });
    }

    // Cached results live in the value range; the formula range only tells us
    // which positions hold formulas.
    let mut formula_cells: HashSet<(usize, usize)> = HashSet::new();
    if let Ok(formulas) = workbook.worksheet_formula(&sheet_name) {
        let (fr0, fc0) = formulas.start().unwrap_or((0, 0));
        for (r, c, f) in formulas.used_cells() {
            if !f.trim().is_empty() {
                formula_cells.insert((fr0 as usize + r, fc0 as usize + c));
            }
        }
    }

    let mut rows = vec![Vec::new(); height];
    let (r0, c0) = range.start().unwrap_or((0, 0));
    for (r, c, data) in range.used_cells() {
        let (row, col) = (r0 as usize + r, c0 as usize + c);
        let mut value = decode(data);
        if formula_cells.contains(&(row, col)) {
            value = CellValue::Formula(Box::new(value));
        }
        let cells = &mut rows[row];
        if cells.len() <= col {
            cells.resize(col + 1, CellValue::Empty);
        }
        cells[col] = value;
    }

    Ok(Grid { rows })
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutCell {
    Text(String),
    Number(f64),
}

/// Writes one worksheet with a bold header row and returns the `.xlsx` bytes.
pub fn write_sheet(
    sheet_name: &str,
    header: &[String],
    rows: &[Vec<OutCell>],
) -> Result<Vec<u8>, EngineError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet_name).map_err(write_err)?;
        for (col, title) in header.iter().enumerate() {
            worksheet
                .write_string_with_format(0, col_index(col)?, title, &bold)
                .map_err(write_err)?;
        }
        for (i, row) in rows.iter().enumerate() {
            let r = u32::try_from(i + 1)
                .map_err(|_| EngineError::SheetWrite("too many rows".to_string()))?;
            for (col, cell) in row.iter().enumerate() {
                let c = col_index(col)?;
                match cell {
                    OutCell::Text(s) => {
                        worksheet.write_string(r, c, s).map_err(write_err)?;
                    }
                    OutCell::Number(n) => {
                        worksheet.write_number(r, c, *n).map_err(write_err)?;
                    }
                }
            }
        }
        worksheet.autofit();
    }
    workbook.save_to_buffer().map_err(write_err)
}

pub fn write_output(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, EngineError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        EngineError::SheetWrite(format!("failed to create {}: {}", dir.to_string_lossy(), e))
    })?;
    let out = dir.join(file_name);
    std::fs::write(&out, bytes).map_err(|e| {
        EngineError::SheetWrite(format!("failed to write {}: {}", out.to_string_lossy(), e))
    })?;
    Ok(out)
}

fn col_index(col: usize) -> Result<u16, EngineError> {
    u16::try_from(col).map_err(|_| EngineError::SheetWrite("too many columns".to_string()))
}

fn write_err(e: rust_xlsxwriter::XlsxError) -> EngineError {
    EngineError::SheetWrite(e.to_string())
}
