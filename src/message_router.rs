//! Inbound message routing: the registration flow plus keyword intents.
//!
//! Rules for registered senders are evaluated in order, first match wins:
//! schedule change, then confirmation, then inquiry, then the generative
//! fallback. The precedence is deliberate: a message containing both a change
//! keyword and a confirmation keyword is treated as a change request.

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::adapters::line::LineClient;
use crate::ai_reply::{fallback_reply, AiOutcome, AiReplier, HISTORY_TURNS};
use crate::bot_store::{
    BotStore, BotStoreError, ConfirmationOutcome, MessageRole, RegisterOutcome,
};

const REGISTRATION_KEYWORD: &str = "登録";
const CHANGE_KEYWORDS: &[&str] = &["変更", "休み", "代わって", "交代"];
const CONFIRM_KEYWORDS: &[&str] = &["確認しました", "確認OK", "承知", "了解"];
const INQUIRY_KEYWORDS: &[&str] = &["シフト", "予定", "何時"];

/// Longest accepted name, counted after stripping whitespace.
const MAX_NAME_CHARS: usize = 20;

const REGISTRATION_INSTRUCTIONS: &str = "従業員登録を行います。\
\nフルネームを送信してください。\n例:田中太郎";
const REGISTRATION_PROMPT: &str = "はじめまして!シフト通知を受け取るには\
「登録」と送信してください。";
const ALREADY_REGISTERED_REPLY: &str = "既に登録済みです。シフトの通知をお待ちください。";
const CHANGE_ACK_REPLY: &str = "シフト変更のご希望を受け付けました。\
店長に連絡しましたので、返答をお待ちください。";
const CONFIRM_RECORDED_REPLY: &str = "今週のシフト確認を記録しました。ありがとうございます!";
const ALREADY_CONFIRMED_REPLY: &str = "今週のシフトは確認済みです。ありがとうございます。";
const INQUIRY_REPLY: &str = "シフトの内容はこちらからはお答えできません。\
最新のシフト表を確認するか、店長にお問い合わせください。";
const GENERIC_ERROR_REPLY: &str = "申し訳ありません。処理中にエラーが発生しました。\
しばらくしてからもう一度お試しください。";

/// Registration state, derived once per message from a single directory
/// lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderState {
    Unregistered,
    Registered(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameRejection {
    TooShort,
    InvalidCharacters,
    TooLong,
}

impl NameRejection {
    fn reply_text(self) -> &'static str {
        match self {
            NameRejection::TooShort => "お名前が短すぎます。2文字以上で入力してください。",
            NameRejection::InvalidCharacters => {
                "お名前に使えない文字が含まれています。\
ひらがな・カタカナ・漢字・アルファベットで入力してください。"
            }
            NameRejection::TooLong => "お名前が長すぎます。20文字以内で入力してください。",
        }
    }
}

/// Routes one inbound text message to a reply, mutating the directory and
/// ledger as the intent requires.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    store: Arc<BotStore>,
    line: Arc<LineClient>,
    replier: Arc<AiReplier>,
    manager_user_id: Option<String>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<BotStore>,
        line: Arc<LineClient>,
        replier: Arc<AiReplier>,
        manager_user_id: Option<String>,
    ) -> Self {
        Self {
            store,
            line,
            replier,
            manager_user_id: manager_user_id.filter(|id| !id.trim().is_empty()),
        }
    }

    /// Produce the reply for one inbound message. Never fails: internal
    /// errors are logged and turned into a generic apology, and the exchange
    /// is still persisted on a best-effort basis.
    pub async fn handle_text_message(&self, user_id: &str, text: &str) -> String {
        match self.route(user_id, text).await {
            Ok(reply) => reply,
            Err(err) => {
                error!("message routing failed for {}: {}", user_id, err);
                let reply = GENERIC_ERROR_REPLY.to_string();
                if let Err(log_err) = self.log_exchange(user_id, text, &reply) {
                    error!("could not persist exchange for {}: {}", user_id, log_err);
                }
                reply
            }
        }
    }

    async fn route(&self, user_id: &str, text: &str) -> Result<String, BotStoreError> {
        let state = match self.store.find_employee_name(user_id)? {
            Some(name) => SenderState::Registered(name),
            None => SenderState::Unregistered,
        };
        let reply = match &state {
            SenderState::Unregistered => self.handle_unregistered(user_id, text)?,
            SenderState::Registered(name) => self.handle_registered(user_id, name, text).await?,
        };
        // Every branch records both sides of the exchange.
        self.log_exchange(user_id, text, &reply)?;
        Ok(reply)
    }

    fn handle_unregistered(&self, user_id: &str, text: &str) -> Result<String, BotStoreError> {
        if text.trim() == REGISTRATION_KEYWORD {
            info!("sending registration instructions to {}", user_id);
            return Ok(REGISTRATION_INSTRUCTIONS.to_string());
        }

        if text.chars().count() >= 2 {
            return match validate_name(text) {
                Ok(name) => match self.store.register_employee(user_id, &name)? {
                    RegisterOutcome::Registered => {
                        info!("registered {} as {}", user_id, name);
                        Ok(format!(
                            "{}さんを登録しました。\nシフトの通知をこのアカウントにお送りします。",
                            name
                        ))
                    }
                    RegisterOutcome::NameTaken => {
                        info!("name {} already taken, rejecting registration", name);
                        Ok(format!(
                            "「{}」は既に登録されています。\n別の名前で登録してください。\
(例:{}2、{}B)",
                            name, name, name
                        ))
                    }
                    RegisterOutcome::AlreadyRegistered => Ok(ALREADY_REGISTERED_REPLY.to_string()),
                },
                Err(rejection) => Ok(rejection.reply_text().to_string()),
            };
        }

        Ok(REGISTRATION_PROMPT.to_string())
    }

    async fn handle_registered(
        &self,
        user_id: &str,
        employee_name: &str,
        text: &str,
    ) -> Result<String, BotStoreError> {
        if contains_any(text, CHANGE_KEYWORDS) {
            info!("shift change request from {}", employee_name);
            self.notify_manager(&format!(
                "【シフト変更依頼】\n{}さんからの依頼:\n{}",
                employee_name, text
            ))
            .await;
            return Ok(CHANGE_ACK_REPLY.to_string());
        }

        if contains_any(text, CONFIRM_KEYWORDS) {
            let week_start = current_week_start();
            return match self
                .store
                .record_confirmation(user_id, employee_name, week_start)?
            {
                ConfirmationOutcome::Recorded => {
                    info!(
                        "shift confirmation recorded for {} (week of {})",
                        employee_name, week_start
                    );
                    self.notify_manager(&format!(
                        "【シフト確認】\n{}さんが今週のシフトを確認しました。",
                        employee_name
                    ))
                    .await;
                    Ok(CONFIRM_RECORDED_REPLY.to_string())
                }
                ConfirmationOutcome::AlreadyConfirmed => Ok(ALREADY_CONFIRMED_REPLY.to_string()),
            };
        }

        if contains_any(text, INQUIRY_KEYWORDS) {
            return Ok(INQUIRY_REPLY.to_string());
        }

        let history = self.store.recent_messages(user_id, HISTORY_TURNS)?;
        let reply = match self.replier.generate(&history, text).await {
            AiOutcome::Reply(generated) => generated,
            AiOutcome::Unavailable => fallback_reply(text).to_string(),
        };
        Ok(reply)
    }

    async fn notify_manager(&self, text: &str) {
        let Some(manager_id) = self.manager_user_id.as_deref() else {
            debug!("manager user id not configured, skipping notification");
            return;
        };
        if let Err(err) = self.line.push_text(manager_id, text).await {
            warn!("failed to notify manager: {}", err);
        }
    }

    fn log_exchange(
        &self,
        user_id: &str,
        inbound: &str,
        outbound: &str,
    ) -> Result<(), BotStoreError> {
        self.store
            .append_message(user_id, MessageRole::User, inbound)?;
        self.store
            .append_message(user_id, MessageRole::Assistant, outbound)
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword))
}

/// Validate a candidate name and return the stored (whitespace-stripped)
/// form.
fn validate_name(raw: &str) -> Result<String, NameRejection> {
    let trimmed = raw.trim();
    if trimmed.chars().count() < 2 {
        return Err(NameRejection::TooShort);
    }
    if !trimmed.chars().all(is_name_char) {
        return Err(NameRejection::InvalidCharacters);
    }
    let stripped: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped.chars().count() > MAX_NAME_CHARS {
        return Err(NameRejection::TooLong);
    }
    Ok(stripped)
}

fn is_name_char(c: char) -> bool {
    if c.is_whitespace() || c.is_ascii_alphabetic() {
        return true;
    }
    matches!(c,
        '\u{3041}'..='\u{3096}'         // hiragana
        | '\u{30A1}'..='\u{30FA}'       // katakana
        | '\u{30FC}'                    // long vowel mark
        | '\u{3005}'                    // iteration mark (佐々木)
        | '\u{4E00}'..='\u{9FFF}'       // CJK ideographs
    )
}

/// Week boundaries follow the shop's local clock (JST, UTC+9).
fn current_week_start() -> NaiveDate {
    week_start_of((Utc::now() + Duration::hours(9)).date_naive())
}

fn week_start_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}
