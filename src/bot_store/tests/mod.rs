use super::{BotStore, ConfirmationOutcome, MessageRole, RegisterOutcome, HISTORY_KEPT_ROWS};
use chrono::NaiveDate;
use tempfile::TempDir;

fn store_in(temp: &TempDir) -> BotStore {
    BotStore::new(temp.path().join("bot.db")).unwrap()
}

#[test]
fn register_then_find_employee_name() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);

    assert_eq!(store.find_employee_name("U100").unwrap(), None);
    assert_eq!(
        store.register_employee("U100", "田中太郎").unwrap(),
        RegisterOutcome::Registered
    );
    assert_eq!(
        store.find_employee_name("U100").unwrap(),
        Some("田中太郎".to_string())
    );
}

#[test]
fn duplicate_name_keeps_first_entry() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);

    assert_eq!(
        store.register_employee("U100", "太郎").unwrap(),
        RegisterOutcome::Registered
    );
    assert_eq!(
        store.register_employee("U200", "太郎").unwrap(),
        RegisterOutcome::NameTaken
    );

    // The original mapping is untouched and the second id stays unregistered.
    let resolved = store.lookup_user_ids(&["太郎".to_string()]).unwrap();
    assert_eq!(resolved.get("太郎"), Some(&"U100".to_string()));
    assert_eq!(store.find_employee_name("U200").unwrap(), None);
}

#[test]
fn second_registration_for_same_id_is_rejected() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);

    assert_eq!(
        store.register_employee("U100", "太郎").unwrap(),
        RegisterOutcome::Registered
    );
    assert_eq!(
        store.register_employee("U100", "別の名前").unwrap(),
        RegisterOutcome::AlreadyRegistered
    );
    assert_eq!(
        store.find_employee_name("U100").unwrap(),
        Some("太郎".to_string())
    );
}

#[test]
fn bulk_lookup_skips_unknown_names() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);

    store.register_employee("U1", "佐藤花子").unwrap();
    store.register_employee("U2", "鈴木一郎").unwrap();

    let names = vec![
        "佐藤花子".to_string(),
        "未登録さん".to_string(),
        "鈴木一郎".to_string(),
    ];
    let resolved = store.lookup_user_ids(&names).unwrap();
    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved.get("佐藤花子"), Some(&"U1".to_string()));
    assert_eq!(resolved.get("鈴木一郎"), Some(&"U2".to_string()));
    assert!(!resolved.contains_key("未登録さん"));

    assert!(store.lookup_user_ids(&[]).unwrap().is_empty());
}

#[test]
fn conversation_log_never_exceeds_cap_and_drops_oldest() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);

    for i in 0..15 {
        store
            .append_message("U1", MessageRole::User, &format!("question {}", i))
            .unwrap();
        store
            .append_message("U1", MessageRole::Assistant, &format!("answer {}", i))
            .unwrap();
    }

    let messages = store.recent_messages("U1", 100).unwrap();
    assert_eq!(messages.len(), HISTORY_KEPT_ROWS);
    // 30 rows were written; the first kept row is the 11th.
    assert_eq!(messages[0].text, "question 5");
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages.last().unwrap().text, "answer 14");
    assert_eq!(messages.last().unwrap().role, MessageRole::Assistant);
}

#[test]
fn conversation_logs_are_per_user() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);

    store.append_message("U1", MessageRole::User, "from U1").unwrap();
    store.append_message("U2", MessageRole::User, "from U2").unwrap();

    let messages = store.recent_messages("U1", 10).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "from U1");
}

#[test]
fn recent_messages_returns_oldest_first_window() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);

    for i in 0..6 {
        store
            .append_message("U1", MessageRole::User, &format!("m{}", i))
            .unwrap();
    }

    let window = store.recent_messages("U1", 4).unwrap();
    let texts: Vec<&str> = window.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["m2", "m3", "m4", "m5"]);
}

#[test]
fn weekly_confirmation_is_recorded_once() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);
    let week = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

    assert_eq!(
        store.record_confirmation("U1", "太郎", week).unwrap(),
        ConfirmationOutcome::Recorded
    );
    assert_eq!(
        store.record_confirmation("U1", "太郎", week).unwrap(),
        ConfirmationOutcome::AlreadyConfirmed
    );
}

#[test]
fn confirmations_are_separate_per_week_and_user() {
    let temp = TempDir::new().unwrap();
    let store = store_in(&temp);
    let week1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let week2 = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();

    assert_eq!(
        store.record_confirmation("U1", "太郎", week1).unwrap(),
        ConfirmationOutcome::Recorded
    );
    assert_eq!(
        store.record_confirmation("U1", "太郎", week2).unwrap(),
        ConfirmationOutcome::Recorded
    );
    assert_eq!(
        store.record_confirmation("U2", "花子", week1).unwrap(),
        ConfirmationOutcome::Recorded
    );
}
