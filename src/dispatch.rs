//! Outbound shift notifications: validated rows in, one LINE push per
//! employee out, with a success/failure tally for the caller.

use std::collections::HashMap;

use tracing::{error, info};

use crate::adapters::line::LineClient;
use crate::bot_store::{BotStore, BotStoreError};
use crate::roster::ShiftRow;

/// `start_time` value marking a day off instead of a working shift.
pub const DAY_OFF_MARKER: &str = "休み";

/// Error notes retained in a report; failures past this stay in the count
/// but are dropped from the list.
const MAX_REPORTED_ERRORS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Success,
    Warning,
    Error,
}

impl DispatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchStatus::Success => "success",
            DispatchStatus::Warning => "warning",
            DispatchStatus::Error => "error",
        }
    }
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl DispatchReport {
    pub fn status(&self) -> DispatchStatus {
        if self.failed == 0 {
            DispatchStatus::Success
        } else if self.successful == 0 {
            DispatchStatus::Error
        } else {
            DispatchStatus::Warning
        }
    }

    pub fn total(&self) -> usize {
        self.successful + self.failed
    }

    fn record_failure(&mut self, note: String) {
        self.failed += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(note);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("row {row} is missing required field {field}")]
    MissingField { row: usize, field: &'static str },
    #[error(transparent)]
    Store(#[from] BotStoreError),
}

/// Send one notification per employee for a batch of shift rows.
///
/// Exactly one directory read happens regardless of how many employees the
/// batch names. A name without a directory entry counts as a failed send and
/// skips the group; a failed push counts as failed with the gateway's detail.
/// Failed sends are not retried.
pub async fn dispatch_shifts(
    store: &BotStore,
    line: &LineClient,
    rows: &[ShiftRow],
) -> Result<DispatchReport, DispatchError> {
    for (index, row) in rows.iter().enumerate() {
        if let Some(field) = row.missing_field() {
            return Err(DispatchError::MissingField {
                row: index + 1,
                field,
            });
        }
    }

    // Group by employee, keeping first-appearance order so reports (and the
    // retained error notes) are deterministic.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&ShiftRow>> = HashMap::new();
    for row in rows {
        if !groups.contains_key(&row.employee_name) {
            order.push(row.employee_name.clone());
            groups.insert(row.employee_name.clone(), Vec::new());
        }
        if let Some(group) = groups.get_mut(&row.employee_name) {
            group.push(row);
        }
    }

    let user_ids = store.lookup_user_ids(&order)?;

    let mut report = DispatchReport::default();
    for name in &order {
        let Some(group) = groups.get(name) else {
            continue;
        };
        let Some(user_id) = user_ids.get(name) else {
            info!("no directory entry for {}, skipping {} row(s)", name, group.len());
            report.record_failure(format!("{}: no registered LINE user id", name));
            continue;
        };
        let message = build_shift_message(name, group);
        match line.push_text(user_id, &message).await {
            Ok(()) => {
                info!("shift notification sent to {}", name);
                report.successful += 1;
            }
            Err(err) => {
                error!("failed to send shift notification to {}: {}", name, err);
                report.record_failure(format!("{}: {}", name, err));
            }
        }
    }
    Ok(report)
}

/// One line per shift row, plus greeting and courtesy line.
pub fn build_shift_message(employee_name: &str, rows: &[&ShiftRow]) -> String {
    let mut lines = String::new();
    for row in rows {
        lines.push('・');
        lines.push_str(&row.shift_date);
        lines.push(' ');
        if row.start_time.trim() == DAY_OFF_MARKER {
            lines.push_str(DAY_OFF_MARKER);
        } else {
            lines.push_str(&row.start_time);
            lines.push('〜');
            lines.push_str(&row.end_time);
        }
        if let Some(place) = row.place() {
            lines.push('(');
            lines.push_str(place);
            lines.push(')');
        }
        lines.push('\n');
    }
    format!(
        "{}さん\nシフトのお知らせです。\n\n{}\nよろしくお願いします。",
        employee_name, lines
    )
}
