use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::adapters::line::{verify_line_signature, LineWebhookPayload};
use crate::dispatch::{dispatch_shifts, DispatchError, DispatchStatus};
use crate::roster::{allowed_file, parse_workbook, ShiftRow};

use super::state::AppState;

pub(super) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn error_response(message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"status": "error", "message": message.into()})),
    )
}

/// `POST /upload`: multipart field `file` → validated roster preview. Pure
/// validation; nothing is stored server-side, the client round-trips the
/// preview to `/send_messages`.
pub(super) async fn upload(mut multipart: Multipart) -> impl IntoResponse {
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }

                let filename = field.file_name().unwrap_or_default().to_string();
                if filename.is_empty() {
                    return error_response("No file selected");
                }
                if !allowed_file(&filename) {
                    return error_response(
                        "Invalid file type. Please upload .xlsx or .xls files only.",
                    );
                }

                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes,
                    Err(err) => return error_response(format!("Error processing file: {}", err)),
                };

                return match parse_workbook(&bytes) {
                    Ok(rows) => {
                        info!("validated {} roster rows from {}", rows.len(), filename);
                        (
                            StatusCode::OK,
                            Json(json!({
                                "status": "success",
                                "message": format!(
                                    "Successfully uploaded and validated {} records",
                                    rows.len()
                                ),
                                "data": rows,
                            })),
                        )
                    }
                    Err(err) => error_response(err.to_string()),
                };
            }
            Ok(None) => break,
            Err(err) => {
                warn!("failed to read multipart body: {}", err);
                break;
            }
        }
    }
    error_response("No file uploaded")
}

#[derive(Debug, Deserialize)]
pub(super) struct SendMessagesRequest {
    #[serde(default)]
    rows: Vec<ShiftRow>,
}

/// `POST /send_messages`: the client re-submits the preview rows; one LINE
/// push per employee, tally in the response body.
pub(super) async fn send_messages(
    State(state): State<AppState>,
    Json(request): Json<SendMessagesRequest>,
) -> impl IntoResponse {
    if request.rows.is_empty() {
        return error_response("No data available. Please upload a file first.");
    }

    let report = match dispatch_shifts(&state.store, &state.line, &request.rows).await {
        Ok(report) => report,
        Err(err @ DispatchError::MissingField { .. }) => return error_response(err.to_string()),
        Err(err) => {
            error!("dispatch failed: {}", err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": "Internal server error occurred"})),
            );
        }
    };

    let message = match report.status() {
        DispatchStatus::Success => format!(
            "Successfully sent {} messages to all employees!",
            report.successful
        ),
        DispatchStatus::Error => format!(
            "Failed to send all {} messages. Please check your LINE API configuration.",
            report.failed
        ),
        DispatchStatus::Warning => format!(
            "Sent {} of {} messages. {} failed.",
            report.successful,
            report.total(),
            report.failed
        ),
    };
    let mut body = json!({"status": report.status().as_str(), "message": message});
    if !report.errors.is_empty() {
        body["errors"] = json!(report.errors);
    }
    (StatusCode::OK, Json(body))
}

/// `POST /webhook`: LINE event batch. A bad signature is rejected 401 before
/// any processing; everything after verification ACKs 200 so the platform
/// never retries on our internal failures.
pub(super) async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(reason) =
        verify_line_signature(state.config.line_channel_secret.as_deref(), &headers, &body)
    {
        warn!("webhook signature rejected: {}", reason);
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": reason})));
    }

    let payload: LineWebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!("unparseable webhook body: {}", err);
            return (StatusCode::OK, Json(json!({"status": "ignored"})));
        }
    };

    for event in &payload.events {
        let Some((user_id, text)) = event.text_message() else {
            continue;
        };
        let reply = state.router.handle_text_message(user_id, text).await;
        if let Err(err) = state.line.push_text(user_id, &reply).await {
            error!("failed to push reply to {}: {}", user_id, err);
        }
    }

    (StatusCode::OK, Json(json!({"status": "success"})))
}
