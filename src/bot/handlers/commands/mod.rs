use super::format::{admin_help_text, trusted_help_text};
use super::shared::HandlerResult;
use super::state::{resolve_tier, sender_user_id, AccessTier, BotState};
use crate::bot::keyboards;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::KeyboardMarkup;
use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum BotCommand {
    #[command(description = "Главное меню")]
    Start,
    #[command(description = "Справка")]
    Help,
    #[command(description = "Прервать текущий диалог")]
    Cancel,
}

pub fn handler() -> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    teloxide::filter_command::<BotCommand, _>()
        .branch(dptree::case![BotCommand::Start].endpoint(cmd_start))
        .branch(dptree::case![BotCommand::Help].endpoint(cmd_help))
        .branch(dptree::case![BotCommand::Cancel].endpoint(cmd_cancel))
}

fn tier_menu(tier: AccessTier) -> KeyboardMarkup {
    match tier {
        AccessTier::Admin => keyboards::admin_menu(),
        AccessTier::Trusted => keyboards::trusted_menu(),
    }
}

/// Уровень доступа отправителя; незнакомцу сразу отвечает отказом.
async fn tier_or_deny(bot: &Bot, msg: &Message, state: &BotState) -> Result<Option<AccessTier>, Box<dyn std::error::Error + Send + Sync>> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(None);
    };
    match resolve_tier(state, user).await? {
        Some(tier) => Ok(Some(tier)),
        None => {
            tracing::info!(
                user_id = user.id.0,
                username = ?user.username,
                "Command from unknown user rejected"
            );
            bot.send_message(msg.chat.id, "⛔ У вас нет доступа к этому боту.")
                .await?;
            Ok(None)
        }
    }
}

async fn cmd_start(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    let Some(tier) = tier_or_deny(&bot, &msg, &state).await? else {
        return Ok(());
    };
    tracing::info!(user_id, tier = ?tier, "Received /start command");

    state.conversations.clear(user_id).await;
    let greeting = match tier {
        AccessTier::Admin => "Панель управления клиентами. Используйте кнопки ниже.",
        AccessTier::Trusted => "Здесь можно создать свои VPN-аккаунты. Используйте кнопки ниже.",
    };
    bot.send_message(msg.chat.id, greeting)
        .reply_markup(tier_menu(tier))
        .await?;
    Ok(())
}

async fn cmd_help(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(tier) = tier_or_deny(&bot, &msg, &state).await? else {
        return Ok(());
    };
    let text = match tier {
        AccessTier::Admin => admin_help_text(),
        AccessTier::Trusted => trusted_help_text(),
    };
    bot.send_message(msg.chat.id, text)
        .reply_markup(tier_menu(tier))
        .await?;
    Ok(())
}

async fn cmd_cancel(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    let Some(tier) = tier_or_deny(&bot, &msg, &state).await? else {
        return Ok(());
    };
    state.conversations.clear(user_id).await;
    tracing::debug!(user_id, "Conversation cancelled");
    bot.send_message(msg.chat.id, "Действие отменено")
        .reply_markup(tier_menu(tier))
        .await?;
    Ok(())
}
