use std::env;
use std::path::PathBuf;

use crate::adapters::line::DEFAULT_LINE_API_BASE_URL;
use crate::ai_reply::AiConfig;

/// Upload body cap. Shift spreadsheets are tiny; 10 MiB is generous.
pub const DEFAULT_UPLOAD_BODY_MAX_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Channel access token for outbound pushes; unset makes every push fail
    /// with a "not configured" error (tallied, not fatal).
    pub line_channel_access_token: Option<String>,
    /// Webhook signature secret; unset skips verification (local development).
    pub line_channel_secret: Option<String>,
    /// Overridable so tests can point the client at a local mock.
    pub line_api_base_url: String,
    /// Recipient of schedule-change and confirmation notices; unset skips
    /// them.
    pub manager_line_user_id: Option<String>,
    pub upload_body_max_bytes: usize,
    pub ai: AiConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let host = env::var("SHIFT_NOTIFIER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("SHIFT_NOTIFIER_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(5000);
        let db_path = env::var("SHIFT_NOTIFIER_DB_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("shift_notifier.db"));

        let line_channel_access_token = env::var("LINE_CHANNEL_ACCESS_TOKEN")
            .ok()
            .filter(|s| !s.is_empty());
        let line_channel_secret = env::var("LINE_CHANNEL_SECRET").ok().filter(|s| !s.is_empty());
        let line_api_base_url = env::var("LINE_API_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_LINE_API_BASE_URL.to_string());
        let manager_line_user_id = env::var("MANAGER_LINE_USER_ID")
            .ok()
            .filter(|s| !s.is_empty());

        let upload_body_max_bytes = env::var("UPLOAD_BODY_MAX_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_UPLOAD_BODY_MAX_BYTES);

        Self {
            host,
            port,
            db_path,
            line_channel_access_token,
            line_channel_secret,
            line_api_base_url,
            manager_line_user_id,
            upload_body_max_bytes,
            ai: AiConfig::default(),
        }
    }
}
