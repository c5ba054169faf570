//! Сценарии доверенных пользователей: свои бессрочные аккаунты в пределах
//! лимита.

use super::format::{render_accounts, render_provision_error, trusted_help_text};
use super::shared::{notify_admins, send_create_result, send_html, HandlerResult};
use super::state::BotState;
use crate::bot::keyboards;
use crate::conversation::{Effect, Intent};
use crate::provision::{CreateRequest, Expiry, ProvisionError};
use crate::store::VpnAccount;
use teloxide::prelude::*;
use teloxide::types::User;
use teloxide::utils::html::escape;

/// Первое свободное имя вида `{username}-add{n}`.
pub fn next_account_name(username: &str, owned: &[VpnAccount]) -> String {
    (1..)
        .map(|n| format!("{}-add{}", username, n))
        .find(|candidate| !owned.iter().any(|account| &account.username == candidate))
        .unwrap_or_else(|| format!("{}-add", username))
}

pub async fn run_effect(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    user: &User,
    effect: Effect,
) -> HandlerResult {
    let user_id = user.id.0 as i64;
    match effect {
        Effect::Dispatch(Intent::CreateAccount) => create_account(bot, chat_id, state, user).await,
        Effect::Dispatch(Intent::RemoveAccount) => {
            let accounts = state.store.accounts_of(user_id).await;
            let text = render_accounts(&accounts, state.store.max_accounts());
            if accounts.is_empty() {
                send_html(bot, chat_id, text, keyboards::trusted_menu()).await
            } else {
                send_html(bot, chat_id, text, keyboards::account_remove_buttons(&accounts)).await
            }
        }
        Effect::Dispatch(Intent::Help) => {
            bot.send_message(chat_id, trusted_help_text())
                .reply_markup(keyboards::trusted_menu())
                .await?;
            Ok(())
        }
        Effect::Delete { target } => delete_account(bot, chat_id, state, user, &target).await,
        Effect::ConfirmationRequired => {
            bot.send_message(chat_id, "Нажмите «Подтвердить» или «Отмена»")
                .reply_markup(keyboards::confirm_menu())
                .await?;
            Ok(())
        }
        _ => {
            bot.send_message(chat_id, "Главное меню")
                .reply_markup(keyboards::trusted_menu())
                .await?;
            Ok(())
        }
    }
}

async fn create_account(bot: &Bot, chat_id: ChatId, state: &BotState, user: &User) -> HandlerResult {
    let user_id = user.id.0 as i64;
    let Some(tg_username) = user.username.as_deref() else {
        bot.send_message(
            chat_id,
            "Для создания аккаунта нужен username в настройках Telegram.",
        )
        .reply_markup(keyboards::trusted_menu())
        .await?;
        return Ok(());
    };

    let limit = state.store.max_accounts();
    if state.store.account_count(user_id).await >= limit {
        bot.send_message(
            chat_id,
            format!("Достигнут лимит аккаунтов ({}). Удалите один из старых.", limit),
        )
        .reply_markup(keyboards::trusted_menu())
        .await?;
        return Ok(());
    }

    let owned = state.store.accounts_of(user_id).await;
    let name = next_account_name(tg_username, &owned);
    bot.send_message(chat_id, "⏳ Создаю аккаунт...").await?;
    let request = CreateRequest {
        base_username: name.clone(),
        expiry: Expiry::Never,
        owner_tg_id: Some(user_id),
    };
    let result = state.provisioner.create(&request).await;

    if result.is_ok() {
        let account = state
            .store
            .add_vpn_account(&name, user_id, state.provisioner.now_millis())
            .await;
        if let Err(error) = account {
            tracing::error!(user_id, name = %name, error = %error, "Failed to record VPN account");
        }
        tracing::info!(user_id, name = %name, "Trusted user created VPN account");
        notify_admins(
            bot,
            state,
            &format!("🆕 @{} создал аккаунт {}", tg_username, name),
        )
        .await;
    }
    send_create_result(bot, chat_id, state, &result, keyboards::trusted_menu()).await
}

async fn delete_account(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    user: &User,
    target: &str,
) -> HandlerResult {
    let user_id = user.id.0 as i64;
    let account = match target.parse::<i64>() {
        Ok(id) => state.store.account(id, user_id).await,
        Err(_) => None,
    };
    let Some(account) = account else {
        bot.send_message(chat_id, "Аккаунт не найден")
            .reply_markup(keyboards::trusted_menu())
            .await?;
        return Ok(());
    };

    let text = match state.provisioner.delete(&account.username).await {
        Ok(_) | Err(ProvisionError::NotFound(_)) => {
            state.store.remove_vpn_account(account.id, user_id).await?;
            tracing::info!(user_id, name = %account.username, "Trusted user removed VPN account");
            notify_admins(
                bot,
                state,
                &format!(
                    "🗑 @{} удалил аккаунт {}",
                    user.username.as_deref().unwrap_or("—"),
                    account.username
                ),
            )
            .await;
            format!("✅ Аккаунт <code>{}</code> удалён", escape(&account.username))
        }
        Err(error) => render_provision_error("Не удалось удалить аккаунт", &error),
    };
    send_html(bot, chat_id, text, keyboards::trusted_menu()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: i64, username: &str) -> VpnAccount {
        VpnAccount {
            id,
            username: username.to_string(),
            added_by: 1,
            created_at: 0,
        }
    }

    #[test]
    fn account_names_reuse_freed_numbers() {
        assert_eq!(next_account_name("dan", &[]), "dan-add1");
        assert_eq!(
            next_account_name("dan", &[account(1, "dan-add1"), account(2, "dan-add2")]),
            "dan-add3"
        );
        assert_eq!(next_account_name("dan", &[account(2, "dan-add2")]), "dan-add1");
    }
}
