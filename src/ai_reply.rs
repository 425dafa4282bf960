//! Generative replies for messages no keyword rule matched.
//!
//! The collaborator is optional: without credentials (or on any error) the
//! caller gets `Unavailable` and falls back to the fixed reply set, never an
//! error.
//!
//! Configuration:
//! - `OPENAI_API_KEY`: API key; unset disables generation
//! - `OPENAI_API_URL`: API base URL (default: `https://api.openai.com/v1`)
//! - `AI_REPLY_MODEL`: Model to use (default: `gpt-4o-mini`)
//! - `AI_REPLY_ENABLED`: Set to "false" to force the fallback replies

use std::env;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bot_store::ConversationMessage;

/// Default OpenAI API URL
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default model
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Timeout for generation requests
const AI_TIMEOUT: Duration = Duration::from_secs(15);

/// Conversation turns handed to the model as context, oldest first.
pub const HISTORY_TURNS: usize = 8;

/// Replies longer than this are cut down to `TRUNCATED_REPLY_CHARS` + "...".
const MAX_REPLY_CHARS: usize = 200;
const TRUNCATED_REPLY_CHARS: usize = 197;

/// System instruction for the responder
const SYSTEM_PROMPT: &str = "あなたは飲食店のシフト管理を手伝うLINEボットです。\
従業員からのメッセージに日本語で短く丁寧に答えてください。\
個別のシフトの内容はこのチャットでは確認できないため、\
シフトについて聞かれた場合は店長への確認を案内してください。";

const GREETING_KEYWORDS: &[&str] = &["こんにちは", "こんばんは", "おはよう"];
const THANKS_KEYWORDS: &[&str] = &["ありがとう", "お疲れ"];

const FALLBACK_GREETING: &str = "こんにちは!ご用件があればメッセージをお送りください。\
シフトの変更は「変更」、確認は「確認しました」と送信してください。";
const FALLBACK_THANKS: &str = "こちらこそ、いつもありがとうございます!";
const FALLBACK_DEFAULT: &str = "メッセージありがとうございます。\
シフト変更のご希望は「変更」、今週のシフト確認は「確認しました」と送信してください。";

/// Result of asking the collaborator for a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiOutcome {
    /// Generated reply, already truncated to the length cap
    Reply(String),
    /// Disabled, unconfigured, or failed; use the fallback set
    Unavailable,
}

/// Configuration for the reply generator
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub enabled: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: env::var("OPENAI_API_KEY")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            api_url: env::var("OPENAI_API_URL").unwrap_or_else(|_| DEFAULT_OPENAI_URL.to_string()),
            model: env::var("AI_REPLY_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            enabled: env::var("AI_REPLY_ENABLED")
                .map(|value| value.to_lowercase() != "false")
                .unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiReplier {
    config: AiConfig,
    client: Client,
}

impl AiReplier {
    pub fn new() -> Self {
        Self::with_config(AiConfig::default())
    }

    pub fn with_config(config: AiConfig) -> Self {
        let client = Client::builder()
            .timeout(AI_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        info!(
            "AiReplier initialized: model={}, enabled={}, key_present={}",
            config.model,
            config.enabled,
            config.api_key.is_some()
        );

        Self { config, client }
    }

    /// Generate a reply from the recent history plus the current message.
    /// Never errors: anything that goes wrong becomes `Unavailable`.
    pub async fn generate(&self, history: &[ConversationMessage], message: &str) -> AiOutcome {
        if !self.config.enabled {
            debug!("AI replies disabled, using fallback set");
            return AiOutcome::Unavailable;
        }
        let Some(api_key) = self.config.api_key.clone() else {
            debug!("OPENAI_API_KEY not set, using fallback set");
            return AiOutcome::Unavailable;
        };

        match self.call_openai(&api_key, history, message).await {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    warn!("AI reply was empty, using fallback set");
                    AiOutcome::Unavailable
                } else {
                    AiOutcome::Reply(truncate_reply(trimmed))
                }
            }
            Err(err) => {
                warn!("AI reply failed, using fallback set: {}", err);
                AiOutcome::Unavailable
            }
        }
    }

    async fn call_openai(
        &self,
        api_key: &str,
        history: &[ConversationMessage],
        message: &str,
    ) -> Result<String, String> {
        let url = format!("{}/chat/completions", self.config.api_url);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(OpenAIChatMessage {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        });
        for turn in history {
            messages.push(OpenAIChatMessage {
                role: turn.role.as_str().to_string(),
                content: turn.text.clone(),
            });
        }
        messages.push(OpenAIChatMessage {
            role: "user".to_string(),
            content: message.to_string(),
        });

        let request = OpenAIChatRequest {
            model: self.config.model.clone(),
            messages,
            max_completion_tokens: 256,
        };

        debug!("Calling {} with model {}", url, self.config.model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("OpenAI returned {}: {}", status, body));
        }

        let openai_response: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse response: {}", e))?;

        Ok(openai_response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .unwrap_or_default())
    }
}

impl Default for AiReplier {
    fn default() -> Self {
        Self::new()
    }
}

/// Cap a reply at `MAX_REPLY_CHARS` characters (not bytes; replies are mostly
/// Japanese), keeping the first `TRUNCATED_REPLY_CHARS` plus an ellipsis.
pub fn truncate_reply(text: &str) -> String {
    if text.chars().count() <= MAX_REPLY_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(TRUNCATED_REPLY_CHARS).collect();
    truncated.push_str("...");
    truncated
}

/// Pick one of the three canned replies by keyword containment.
pub fn fallback_reply(message: &str) -> &'static str {
    if GREETING_KEYWORDS.iter().any(|keyword| message.contains(keyword)) {
        FALLBACK_GREETING
    } else if THANKS_KEYWORDS.iter().any(|keyword| message.contains(keyword)) {
        FALLBACK_THANKS
    } else {
        FALLBACK_DEFAULT
    }
}

// ============================================================================
// OpenAI API types
// ============================================================================

/// Request body for the chat completions endpoint
#[derive(Debug, Clone, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIChatMessage>,
    max_completion_tokens: u32,
}

/// Chat message for the completions API
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIChatMessage {
    role: String,
    content: String,
}

/// Response from the chat completions endpoint
#[derive(Debug, Clone, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChatChoice>,
}

/// Choice in the completions response
#[derive(Debug, Clone, Deserialize)]
struct OpenAIChatChoice {
    message: OpenAIChatMessage,
}
