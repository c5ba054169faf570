//! Клавиатуры бота: постоянные reply-меню и inline-кнопки.

use crate::store::{TrustedUser, VpnAccount};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

pub const BTN_ADD_MEMBER: &str = "➕ Добавить клиента";
pub const BTN_EDIT_MEMBER: &str = "✏️ Изменить клиента";
pub const BTN_DELETE_MEMBER: &str = "🗑 Удалить клиента";
pub const BTN_ONLINE_MEMBERS: &str = "🟢 Онлайн";
pub const BTN_NETWORK_USAGE: &str = "📊 Трафик";
pub const BTN_DETAILED_USAGE: &str = "📋 Подробный отчёт";
pub const BTN_RESET_NETWORK_USAGE: &str = "♻️ Обнулить трафик";
pub const BTN_ADD_TRUSTED: &str = "🤝 Добавить доверенного";
pub const BTN_REVOKE_TRUSTED: &str = "🚫 Отозвать доверие";
pub const BTN_HELP: &str = "❓ Справка";

pub const BTN_CREATE_ACCOUNT: &str = "🆕 Создать аккаунт";
pub const BTN_REMOVE_ACCOUNT: &str = "🗂 Мои аккаунты";

pub const BTN_VIEW_CONFIG: &str = "👁 Конфигурация";
pub const BTN_EXTEND_DURATION: &str = "⏳ Продлить";
pub const BTN_RESET_TRAFFIC: &str = "🔄 Сбросить счётчики";
pub const BTN_DELETE: &str = "🗑 Удалить";

pub const BTN_RETURN: &str = "↩️ В главное меню";
pub const BTN_CANCEL: &str = "❌ Отмена";
pub const BTN_CONFIRM: &str = "✅ Подтвердить";
pub const BTN_INFINITE: &str = "∞ Бессрочно";

const DURATION_PRESETS: [&str; 4] = ["30", "90", "180", "365"];

pub const CB_TRUSTED_REVOKE: &str = "trusted_revoke:";
pub const CB_ACCOUNT_REMOVE: &str = "account_remove:";

fn reply(rows: Vec<Vec<&str>>) -> KeyboardMarkup {
    KeyboardMarkup::new(
        rows.into_iter()
            .map(|row| row.into_iter().map(KeyboardButton::new).collect::<Vec<_>>())
            .collect::<Vec<_>>(),
    )
    .resize_keyboard()
    .persistent()
}

pub fn admin_menu() -> KeyboardMarkup {
    reply(vec![
        vec![BTN_ADD_MEMBER, BTN_EDIT_MEMBER],
        vec![BTN_DELETE_MEMBER, BTN_ONLINE_MEMBERS],
        vec![BTN_NETWORK_USAGE, BTN_DETAILED_USAGE],
        vec![BTN_RESET_NETWORK_USAGE],
        vec![BTN_ADD_TRUSTED, BTN_REVOKE_TRUSTED],
        vec![BTN_HELP],
    ])
}

pub fn trusted_menu() -> KeyboardMarkup {
    reply(vec![
        vec![BTN_CREATE_ACCOUNT, BTN_REMOVE_ACCOUNT],
        vec![BTN_HELP],
    ])
}

pub fn cancel_menu() -> KeyboardMarkup {
    reply(vec![vec![BTN_CANCEL]])
}

pub fn duration_menu() -> KeyboardMarkup {
    reply(vec![
        DURATION_PRESETS.to_vec(),
        vec![BTN_INFINITE],
        vec![BTN_CANCEL],
    ])
}

pub fn extend_menu() -> KeyboardMarkup {
    reply(vec![DURATION_PRESETS.to_vec(), vec![BTN_CANCEL]])
}

pub fn confirm_menu() -> KeyboardMarkup {
    reply(vec![vec![BTN_CONFIRM, BTN_CANCEL]])
}

pub fn member_actions_menu() -> KeyboardMarkup {
    reply(vec![
        vec![BTN_VIEW_CONFIG, BTN_EXTEND_DURATION],
        vec![BTN_RESET_TRAFFIC, BTN_DELETE],
        vec![BTN_RETURN],
    ])
}

/// Список участников по два в ряд и возврат в меню.
pub fn members_menu(names: &[String]) -> KeyboardMarkup {
    let mut rows: Vec<Vec<&str>> = names
        .chunks(2)
        .map(|chunk| chunk.iter().map(String::as_str).collect())
        .collect();
    rows.push(vec![BTN_RETURN]);
    reply(rows)
}

pub fn trusted_revoke_buttons(users: &[TrustedUser]) -> InlineKeyboardMarkup {
    users.iter().fold(InlineKeyboardMarkup::default(), |markup, user| {
        let status = if user.telegram_id.is_some() { "✅" } else { "⏳" };
        markup.append_row(vec![InlineKeyboardButton::callback(
            format!("🚫 @{} {}", user.username, status),
            format!("{}{}", CB_TRUSTED_REVOKE, user.username),
        )])
    })
}

pub fn account_remove_buttons(accounts: &[VpnAccount]) -> InlineKeyboardMarkup {
    accounts.iter().fold(InlineKeyboardMarkup::default(), |markup, account| {
        markup.append_row(vec![InlineKeyboardButton::callback(
            format!("🗑 {}", account.username),
            format!("{}{}", CB_ACCOUNT_REMOVE, account.id),
        )])
    })
}
