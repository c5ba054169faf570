use super::shared::{
    callback_message_target, callback_payload, callback_prefix_filter, parse_callback_id,
    require_admin_callback, HandlerResult,
};
use super::state::BotState;
use crate::bot::keyboards::{self, CB_ACCOUNT_REMOVE, CB_TRUSTED_REVOKE};
use crate::conversation::{ConversationState, Stage};
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, ParseMode};
use teloxide::utils::html::escape;

pub fn handler() -> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    Update::filter_callback_query()
        .branch(
            dptree::filter_map(callback_prefix_filter(CB_TRUSTED_REVOKE))
                .endpoint(callback_trusted_revoke),
        )
        .branch(
            dptree::filter_map(callback_prefix_filter(CB_ACCOUNT_REMOVE))
                .endpoint(callback_account_remove),
        )
}

async fn callback_trusted_revoke(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let Some(admin_id) = require_admin_callback(&bot, &q, &state).await? else {
        return Ok(());
    };

    let data = q.data.as_deref().unwrap_or("");
    let username = callback_payload(data, CB_TRUSTED_REVOKE)?.to_string();
    let removed = state.store.remove_trusted(&username).await?;
    tracing::info!(admin_id, username = %username, removed, "Revoke trusted callback");

    if !removed {
        bot.answer_callback_query(q.id.clone())
            .text("Пользователь уже удалён")
            .await?;
        return Ok(());
    }
    bot.answer_callback_query(q.id.clone()).text("Доверие отозвано").await?;

    if let Some((chat_id, message_id)) = callback_message_target(&q) {
        bot.edit_message_text(
            chat_id,
            message_id,
            format!("🚫 @{} больше не доверенный пользователь", escape(&username)),
        )
        .parse_mode(ParseMode::Html)
        .reply_markup(InlineKeyboardMarkup::default())
        .await?;
    }
    Ok(())
}

async fn callback_account_remove(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let user_id = q.from.id.0 as i64;
    let data = q.data.as_deref().unwrap_or("");
    let account_id = parse_callback_id(data, CB_ACCOUNT_REMOVE)?;

    let Some(account) = state.store.account(account_id, user_id).await else {
        bot.answer_callback_query(q.id.clone())
            .text("Аккаунт не найден")
            .show_alert(true)
            .await?;
        return Ok(());
    };
    tracing::info!(user_id, account_id, "Account removal requested");

    state
        .conversations
        .set(
            user_id,
            ConversationState::with_payload(
                Stage::AwaitingDeleteConfirmation,
                account.id.to_string(),
            ),
        )
        .await;
    bot.answer_callback_query(q.id.clone()).await?;

    let chat_id = callback_message_target(&q)
        .map(|(chat_id, _)| chat_id)
        .unwrap_or(ChatId(user_id));
    bot.send_message(
        chat_id,
        format!(
            "Удалить аккаунт <code>{}</code>? Подключение по нему перестанет работать.",
            escape(&account.username)
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(keyboards::confirm_menu())
    .await?;
    Ok(())
}
