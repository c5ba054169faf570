use super::format::{
    admin_help_text, render_extend_report, render_fan_out_report,
    render_member_card, render_network_usage, render_online, render_provision_error,
    render_detailed_usage, render_trusted_users,
};
use super::shared::{
    member_names, send_create_result, send_html, send_subscription_qr, subscription_url,
    HandlerResult,
};
use super::state::{resolve_tier, AccessTier, BotState};
use super::trusted;
use crate::aggregate::{
    aggregate_by_subscription, find_member, group_online, members_by_base_name,
    subscription_ids_for,
};
use crate::bot::intents::parse_intent;
use crate::bot::keyboards;
use crate::conversation::{step, ConversationState, Effect, Intent, SelectionPurpose, Step};
use crate::provision::CreateRequest;
use teloxide::prelude::*;
use teloxide::utils::html::escape;

pub async fn handle_text(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;

    let Some(tier) = resolve_tier(&state, user).await? else {
        tracing::info!(user_id, username = ?user.username, "Message from unknown user ignored");
        bot.send_message(msg.chat.id, "⛔ У вас нет доступа к этому боту.")
            .await?;
        return Ok(());
    };

    let intent = parse_intent(text).filter(|intent| tier.allows(*intent));
    let current = state.conversations.get(user_id).await;
    let Step { next, effect } = step(&current, text, intent);
    tracing::debug!(
        user_id,
        from = ?current.stage,
        to = ?next.stage,
        effect = ?effect,
        "Conversation step"
    );
    state.conversations.set(user_id, next).await;

    match tier {
        AccessTier::Admin => run_admin_effect(&bot, msg.chat.id, &state, user_id, effect).await,
        AccessTier::Trusted => trusted::run_effect(&bot, msg.chat.id, &state, user, effect).await,
    }
}

async fn run_admin_effect(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    user_id: i64,
    effect: Effect,
) -> HandlerResult {
    match effect {
        Effect::ShowMenu => {
            bot.send_message(chat_id, "Главное меню")
                .reply_markup(keyboards::admin_menu())
                .await?;
        }
        Effect::Dispatch(intent) => dispatch_report(bot, chat_id, state, intent).await?,
        Effect::AskUsername => {
            bot.send_message(
                chat_id,
                "Введите имя клиента: 3–32 символа, латинские буквы, цифры и _",
            )
            .reply_markup(keyboards::cancel_menu())
            .await?;
        }
        Effect::AskDuration { username } => {
            send_html(
                bot,
                chat_id,
                format!(
                    "Срок для <b>{}</b> в днях (1–3650) или ∞ для бессрочного",
                    escape(&username)
                ),
                keyboards::duration_menu(),
            )
            .await?;
        }
        Effect::Create { username, expiry } => {
            bot.send_message(chat_id, "⏳ Создаю клиента во всех inbound'ах...")
                .await?;
            let request = CreateRequest {
                base_username: username,
                expiry,
                owner_tg_id: Some(user_id),
            };
            let result = state.provisioner.create(&request).await;
            send_create_result(bot, chat_id, state, &result, keyboards::admin_menu()).await?;
        }
        Effect::ShowMembers(purpose) => show_members(bot, chat_id, state, user_id, purpose).await?,
        Effect::ShowActions { member } => {
            let inbounds = match state.provisioner.inbounds().await {
                Ok(inbounds) => inbounds,
                Err(error) => {
                    state.conversations.clear(user_id).await;
                    return send_html(
                        bot,
                        chat_id,
                        render_provision_error("Не удалось получить список клиентов", &error),
                        keyboards::admin_menu(),
                    )
                    .await;
                }
            };
            match find_member(&inbounds, &member) {
                Some(info) => {
                    send_html(
                        bot,
                        chat_id,
                        render_member_card(&info, state.provisioner.now_millis()),
                        keyboards::member_actions_menu(),
                    )
                    .await?;
                }
                None => {
                    state.conversations.clear(user_id).await;
                    send_html(
                        bot,
                        chat_id,
                        format!("Клиент <b>{}</b> не найден", escape(&member)),
                        keyboards::admin_menu(),
                    )
                    .await?;
                }
            }
        }
        Effect::ViewConfig { member } => view_config(bot, chat_id, state, &member).await?,
        Effect::AskExtendDays { member } => {
            send_html(
                bot,
                chat_id,
                format!("На сколько дней продлить <b>{}</b>?", escape(&member)),
                keyboards::extend_menu(),
            )
            .await?;
        }
        Effect::Extend { member, days } => {
            let text = match state.provisioner.extend(&member, days).await {
                Ok(report) => render_extend_report(&report, state.provisioner.now_millis()),
                Err(error) => render_provision_error("Не удалось продлить клиента", &error),
            };
            send_html(bot, chat_id, text, keyboards::admin_menu()).await?;
        }
        Effect::ConfirmReset { member } => {
            send_html(
                bot,
                chat_id,
                format!("Сбросить счётчики трафика <b>{}</b>?", escape(&member)),
                keyboards::confirm_menu(),
            )
            .await?;
        }
        Effect::ResetTraffic { member } => {
            let text = match state.provisioner.reset_traffic(&member).await {
                Ok(report) => render_fan_out_report("Трафик сброшен", &report),
                Err(error) => render_provision_error("Не удалось сбросить трафик", &error),
            };
            send_html(bot, chat_id, text, keyboards::admin_menu()).await?;
        }
        Effect::ConfirmDelete { target } => {
            send_html(
                bot,
                chat_id,
                format!(
                    "Удалить <b>{}</b> во всех inbound'ах? Это нельзя отменить.",
                    escape(&target)
                ),
                keyboards::confirm_menu(),
            )
            .await?;
        }
        Effect::Delete { target } => {
            let text = match state.provisioner.delete(&target).await {
                Ok(report) => render_fan_out_report("Удалены записи", &report),
                Err(error) => render_provision_error("Не удалось удалить клиента", &error),
            };
            send_html(bot, chat_id, text, keyboards::admin_menu()).await?;
        }
        Effect::AskTrustedUsername => {
            bot.send_message(chat_id, "Отправьте имя пользователя Telegram в формате @username")
                .reply_markup(keyboards::cancel_menu())
                .await?;
        }
        Effect::AddTrusted { username } => {
            let added = state
                .store
                .add_trusted(&username, state.provisioner.now_millis())
                .await?;
            tracing::info!(admin_id = user_id, username = %username, added, "Trusted user added");
            let text = if added {
                format!(
                    "✅ @{} добавлен в доверенные. Доступ появится, когда он напишет боту.",
                    username
                )
            } else {
                format!("@{} уже в списке доверенных", username)
            };
            bot.send_message(chat_id, text)
                .reply_markup(keyboards::admin_menu())
                .await?;
        }
        Effect::Invalid(error) => {
            bot.send_message(chat_id, format!("⚠️ {}", error)).await?;
        }
        Effect::ConfirmationRequired => {
            bot.send_message(chat_id, "Нажмите «Подтвердить» или «Отмена»")
                .reply_markup(keyboards::confirm_menu())
                .await?;
        }
        Effect::UnknownAction => {
            bot.send_message(chat_id, "Выберите действие кнопкой ниже")
                .reply_markup(keyboards::member_actions_menu())
                .await?;
        }
        Effect::MissingPayload => {
            bot.send_message(chat_id, "Диалог устарел, начните заново")
                .reply_markup(keyboards::admin_menu())
                .await?;
        }
    }
    Ok(())
}

async fn dispatch_report(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    intent: Intent,
) -> HandlerResult {
    let text = match intent {
        Intent::OnlineMembers => match state.provisioner.online_clients().await {
            Ok(online) => render_online(&group_online(&online)),
            Err(error) => render_provision_error("Не удалось получить онлайн", &error),
        },
        Intent::NetworkUsage => match state.provisioner.inbounds().await {
            Ok(inbounds) => render_network_usage(&members_by_base_name(&inbounds)),
            Err(error) => render_provision_error("Не удалось получить трафик", &error),
        },
        Intent::DetailedUsage => match state.provisioner.inbounds().await {
            Ok(inbounds) => render_detailed_usage(
                &aggregate_by_subscription(&inbounds),
                state.provisioner.now_millis(),
            ),
            Err(error) => render_provision_error("Не удалось получить отчёт", &error),
        },
        Intent::RevokeTrusted => {
            let users = state.store.trusted_users().await;
            let text = escape(&render_trusted_users(&users));
            if users.is_empty() {
                text
            } else {
                return send_html(
                    bot,
                    chat_id,
                    text,
                    keyboards::trusted_revoke_buttons(&users),
                )
                .await;
            }
        }
        Intent::Help => admin_help_text().to_string(),
        _ => "Главное меню".to_string(),
    };
    send_html(bot, chat_id, text, keyboards::admin_menu()).await
}

async fn show_members(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    user_id: i64,
    purpose: SelectionPurpose,
) -> HandlerResult {
    let names = match member_names(state).await {
        Ok(names) => names,
        Err(error) => {
            state.conversations.clear(user_id).await;
            return send_html(
                bot,
                chat_id,
                render_provision_error("Не удалось получить список клиентов", &error),
                keyboards::admin_menu(),
            )
            .await;
        }
    };
    if names.is_empty() {
        state.conversations.set(user_id, ConversationState::idle()).await;
        bot.send_message(chat_id, "Клиентов пока нет")
            .reply_markup(keyboards::admin_menu())
            .await?;
        return Ok(());
    }

    let prompt = match purpose {
        SelectionPurpose::Edit => "Выберите клиента для изменения",
        SelectionPurpose::Delete => "Выберите клиента для удаления",
        SelectionPurpose::Reset => "Выберите клиента для сброса трафика",
    };
    bot.send_message(chat_id, prompt)
        .reply_markup(keyboards::members_menu(&names))
        .await?;
    Ok(())
}

async fn view_config(bot: &Bot, chat_id: ChatId, state: &BotState, member: &str) -> HandlerResult {
    let inbounds = match state.provisioner.inbounds().await {
        Ok(inbounds) => inbounds,
        Err(error) => {
            return send_html(
                bot,
                chat_id,
                render_provision_error("Не удалось получить конфигурацию", &error),
                keyboards::member_actions_menu(),
            )
            .await;
        }
    };
    let now = state.provisioner.now_millis();
    let Some(info) = find_member(&inbounds, member) else {
        return send_html(
            bot,
            chat_id,
            format!("Клиент <b>{}</b> не найден", escape(member)),
            keyboards::member_actions_menu(),
        )
        .await;
    };

    let url = subscription_ids_for(&inbounds, member)
        .first()
        .and_then(|sub_id| subscription_url(state.config.panel.sub_url_prefix.as_deref(), sub_id));
    let mut text = render_member_card(&info, now);
    match url.as_deref() {
        Some(url) => text.push_str(&format!("\n\n🔗 Подписка:\n<code>{}</code>", escape(url))),
        None => text.push_str("\n\nСсылка подписки недоступна: нет subId или не задан префикс"),
    }
    send_html(bot, chat_id, text, keyboards::member_actions_menu()).await?;

    if let Some(url) = url
        && let Err(error) = send_subscription_qr(bot, chat_id, &url, member).await
    {
        tracing::warn!(member, error = %error, "Failed to send subscription QR");
    }
    Ok(())
}
