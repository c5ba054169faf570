//! Таблица «текст кнопки или команды → намерение». Сравнение идёт сначала
//! по точному тексту, затем без ведущих эмодзи и без учёта регистра.

use super::keyboards::*;
use crate::conversation::Intent;

const LABELS: &[(&str, Intent)] = &[
    (BTN_ADD_MEMBER, Intent::AddMember),
    (BTN_EDIT_MEMBER, Intent::EditMember),
    (BTN_DELETE_MEMBER, Intent::DeleteMember),
    (BTN_ONLINE_MEMBERS, Intent::OnlineMembers),
    (BTN_NETWORK_USAGE, Intent::NetworkUsage),
    (BTN_DETAILED_USAGE, Intent::DetailedUsage),
    (BTN_RESET_NETWORK_USAGE, Intent::ResetNetworkUsage),
    (BTN_ADD_TRUSTED, Intent::AddTrusted),
    (BTN_REVOKE_TRUSTED, Intent::RevokeTrusted),
    (BTN_HELP, Intent::Help),
    (BTN_CREATE_ACCOUNT, Intent::CreateAccount),
    (BTN_REMOVE_ACCOUNT, Intent::RemoveAccount),
    (BTN_VIEW_CONFIG, Intent::ViewConfig),
    (BTN_EXTEND_DURATION, Intent::ExtendDuration),
    (BTN_RESET_TRAFFIC, Intent::ResetTraffic),
    (BTN_DELETE, Intent::Delete),
    (BTN_RETURN, Intent::ReturnToIdle),
    (BTN_CANCEL, Intent::ReturnToIdle),
    (BTN_CONFIRM, Intent::Confirm),
    (BTN_INFINITE, Intent::Infinite),
];

/// Английские команды старых клавиатур.
const ALIASES: &[(&str, Intent)] = &[
    ("Add Member", Intent::AddMember),
    ("Edit Member", Intent::EditMember),
    ("Delete Member", Intent::DeleteMember),
    ("Online Members", Intent::OnlineMembers),
    ("Network Usage", Intent::NetworkUsage),
    ("Detailed Usage", Intent::DetailedUsage),
    ("Reset Network Usage", Intent::ResetNetworkUsage),
    ("Add Trusted", Intent::AddTrusted),
    ("Revoke Trusted", Intent::RevokeTrusted),
    ("Create Account", Intent::CreateAccount),
    ("Remove Account", Intent::RemoveAccount),
    ("View Config", Intent::ViewConfig),
    ("Extend Duration", Intent::ExtendDuration),
    ("Reset Traffic", Intent::ResetTraffic),
    ("Delete", Intent::Delete),
    ("Return to Main Menu", Intent::ReturnToIdle),
    ("Cancel", Intent::ReturnToIdle),
    ("Confirm", Intent::Confirm),
    ("Infinite", Intent::Infinite),
    ("∞", Intent::Infinite),
    ("Help", Intent::Help),
];

fn normalize(text: &str) -> String {
    text.trim()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .trim()
        .to_lowercase()
}

pub fn parse_intent(text: &str) -> Option<Intent> {
    let text = text.trim();
    let table = LABELS.iter().chain(ALIASES.iter());

    if let Some((_, intent)) = table.clone().find(|(label, _)| *label == text) {
        return Some(*intent);
    }

    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }
    table
        .filter(|(label, _)| normalize(label) == normalized)
        .map(|(_, intent)| *intent)
        .next()
}
