//! Shift roster ingestion: uploaded `.xlsx`/`.xls` bytes in, validated rows out.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

pub const REQUIRED_COLUMNS: [&str; 4] =
    ["employee_name", "shift_date", "start_time", "end_time"];
const PLACE_COLUMN: &str = "place";
const ALLOWED_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];

/// One validated roster row. All fields stay strings so the preview can
/// round-trip through the client unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftRow {
    pub employee_name: String,
    pub shift_date: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<String>,
}

impl ShiftRow {
    /// First required field that is empty, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.employee_name.trim().is_empty() {
            return Some("employee_name");
        }
        if self.shift_date.trim().is_empty() {
            return Some("shift_date");
        }
        if self.start_time.trim().is_empty() {
            return Some("start_time");
        }
        if self.end_time.trim().is_empty() {
            return Some("end_time");
        }
        None
    }

    pub fn place(&self) -> Option<&str> {
        self.place
            .as_deref()
            .map(str::trim)
            .filter(|place| !place.is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("failed to read workbook: {0}")]
    Workbook(String),
    #[error("The workbook contains no sheets")]
    NoSheet,
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("No valid data found in the uploaded file")]
    NoValidRows,
}

pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, extension)) => {
            let extension = extension.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.iter().any(|allowed| *allowed == extension)
        }
        None => false,
    }
}

/// Parse the first sheet of an uploaded workbook into validated shift rows.
/// Pure with respect to the rest of the system: no store or gateway access.
pub fn parse_workbook(bytes: &[u8]) -> Result<Vec<ShiftRow>, RosterError> {
    let cursor = Cursor::new(bytes);
    let mut workbook =
        open_workbook_auto_from_rs(cursor).map_err(|err| RosterError::Workbook(err.to_string()))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => range,
        Some(Err(err)) => return Err(RosterError::Workbook(err.to_string())),
        None => return Err(RosterError::NoSheet),
    };

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .map(|cell| cell_to_string(cell).unwrap_or_default())
            .collect(),
        None => Vec::new(),
    };
    let records: Vec<Vec<Option<String>>> = rows
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();
    build_rows(&headers, records)
}

struct ColumnMap {
    employee_name: usize,
    shift_date: usize,
    start_time: usize,
    end_time: usize,
    place: Option<usize>,
}

fn resolve_columns(headers: &[String]) -> Result<ColumnMap, RosterError> {
    let position = |name: &str| headers.iter().position(|header| header.trim() == name);
    match (
        position("employee_name"),
        position("shift_date"),
        position("start_time"),
        position("end_time"),
    ) {
        (Some(employee_name), Some(shift_date), Some(start_time), Some(end_time)) => Ok(ColumnMap {
            employee_name,
            shift_date,
            start_time,
            end_time,
            place: position(PLACE_COLUMN),
        }),
        (name, date, start, end) => {
            // Reported in the canonical column order.
            let mut missing = Vec::new();
            if name.is_none() {
                missing.push("employee_name".to_string());
            }
            if date.is_none() {
                missing.push("shift_date".to_string());
            }
            if start.is_none() {
                missing.push("start_time".to_string());
            }
            if end.is_none() {
                missing.push("end_time".to_string());
            }
            Err(RosterError::MissingColumns(missing))
        }
    }
}

fn build_rows(
    headers: &[String],
    records: Vec<Vec<Option<String>>>,
) -> Result<Vec<ShiftRow>, RosterError> {
    let columns = resolve_columns(headers)?;
    let mut rows = Vec::new();
    for record in records {
        let field = |index: usize| record.get(index).and_then(|value| value.clone());
        let (Some(employee_name), Some(shift_date), Some(start_time), Some(end_time)) = (
            field(columns.employee_name),
            field(columns.shift_date),
            field(columns.start_time),
            field(columns.end_time),
        ) else {
            // Rows with an empty required cell are dropped, not errors.
            continue;
        };
        let place = columns.place.and_then(field);
        rows.push(ShiftRow {
            employee_name,
            shift_date: normalize_shift_date(&shift_date),
            start_time,
            end_time,
            place,
        });
    }
    if rows.is_empty() {
        return Err(RosterError::NoValidRows);
    }
    Ok(rows)
}

/// Date cells read back as `YYYY-MM-DD HH:MM:SS`; the notification only wants
/// the date portion.
fn normalize_shift_date(raw: &str) -> String {
    match raw.split_once(' ') {
        Some((date, _)) => date.to_string(),
        None => raw.to_string(),
    }
}

fn cell_to_string(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(value) => value.trim().to_string(),
        Data::Float(value) => {
            if value.fract() == 0.0 {
                format!("{}", *value as i64)
            } else {
                value.to_string()
            }
        }
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(value) => {
            if value.is_duration() {
                match value.as_duration() {
                    Some(duration) => format_clock(duration),
                    None => return None,
                }
            } else {
                match value.as_datetime() {
                    Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
                    None => return None,
                }
            }
        }
        Data::DateTimeIso(value) => value.replace('T', " "),
        Data::DurationIso(value) => value.clone(),
        Data::Error(_) => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn format_clock(duration: chrono::Duration) -> String {
    let minutes = duration.num_minutes();
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}
