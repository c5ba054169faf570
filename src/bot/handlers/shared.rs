use super::format::{render_create_report, render_provision_error};
use super::state::BotState;
use crate::aggregate::members_by_base_name;
use crate::provision::{CreateReport, ProvisionError};
use anyhow::anyhow;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode, ReplyMarkup};

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub fn parse_callback_id(data: &str, prefix: &str) -> Result<i64, anyhow::Error> {
    data.strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Некорректный callback payload"))?
        .parse::<i64>()
        .map_err(|_| anyhow!("Некорректный id в callback"))
}

pub fn callback_payload<'a>(data: &'a str, prefix: &str) -> Result<&'a str, anyhow::Error> {
    data.strip_prefix(prefix)
        .filter(|payload| !payload.is_empty())
        .ok_or_else(|| anyhow!("Некорректный callback payload"))
}

pub fn callback_message_target(q: &CallbackQuery) -> Option<(ChatId, teloxide::types::MessageId)> {
    q.message.as_ref().map(|msg| (msg.chat().id, msg.id()))
}

pub fn callback_prefix_filter(prefix: &'static str) -> impl Fn(CallbackQuery) -> Option<CallbackQuery> {
    move |q: CallbackQuery| {
        if q.data.as_deref().is_some_and(|payload| payload.starts_with(prefix)) {
            Some(q)
        } else {
            None
        }
    }
}

pub async fn require_admin_callback(
    bot: &Bot,
    q: &CallbackQuery,
    state: &BotState,
) -> Result<Option<i64>, anyhow::Error> {
    let admin_id = q.from.id.0 as i64;
    if !state.config.is_admin(admin_id) {
        bot.answer_callback_query(q.id.clone())
            .text("Недостаточно прав")
            .show_alert(true)
            .await?;
        return Ok(None);
    }
    Ok(Some(admin_id))
}

/// Ссылка подписки вида `{prefix}/{subId}?name={subId}`.
pub fn subscription_url(prefix: Option<&str>, sub_id: &str) -> Option<String> {
    let prefix = prefix.map(str::trim).filter(|prefix| !prefix.is_empty())?;
    let sub_id = urlencoding::encode(sub_id);
    Some(format!("{}/{}?name={}", prefix.trim_end_matches('/'), sub_id, sub_id))
}

pub fn build_qr_png_bytes(payload: &str) -> Result<Vec<u8>, anyhow::Error> {
    let qr = QrCode::new(payload.as_bytes())?;
    let image = qr
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .min_dimensions(512, 512)
        .build();
    let mut bytes = Vec::new();
    {
        let mut cursor = Cursor::new(&mut bytes);
        DynamicImage::ImageLuma8(image).write_to(&mut cursor, ImageFormat::Png)?;
    }
    Ok(bytes)
}

pub async fn send_subscription_qr(
    bot: &Bot,
    chat_id: ChatId,
    url: &str,
    name: &str,
) -> Result<(), anyhow::Error> {
    let qr_png = build_qr_png_bytes(url)?;
    bot.send_photo(
        chat_id,
        InputFile::memory(qr_png).file_name(format!("subscription-{}.png", name)),
    )
    .caption(format!("QR-код подписки {}", name))
    .await?;
    Ok(())
}

pub async fn send_html(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    markup: impl Into<ReplyMarkup>,
) -> HandlerResult {
    bot.send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(markup)
        .await?;
    Ok(())
}

/// Отправляет отчёт о создании и QR подписки, если известен префикс ссылок.
pub async fn send_create_result(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    result: &Result<CreateReport, ProvisionError>,
    markup: impl Into<ReplyMarkup>,
) -> HandlerResult {
    let report = match result {
        Ok(report) => report,
        Err(error) => {
            return send_html(
                bot,
                chat_id,
                render_provision_error("Не удалось создать клиента", error),
                markup,
            )
            .await;
        }
    };

    let url = subscription_url(state.config.panel.sub_url_prefix.as_deref(), &report.sub_id);
    let text = render_create_report(report, url.as_deref(), state.provisioner.now_millis());
    send_html(bot, chat_id, text, markup).await?;
    if let Some(url) = url
        && let Err(error) = send_subscription_qr(bot, chat_id, &url, &report.base_username).await
    {
        tracing::warn!(error = %error, "Failed to send subscription QR");
    }
    Ok(())
}

/// Имена участников для клавиатуры выбора, в порядке создания.
pub async fn member_names(state: &BotState) -> Result<Vec<String>, ProvisionError> {
    let inbounds = state.provisioner.inbounds().await?;
    Ok(members_by_base_name(&inbounds)
        .into_iter()
        .map(|member| member.base_name)
        .collect())
}

pub async fn notify_admins(bot: &Bot, state: &BotState, text: &str) {
    for admin_id in &state.config.admin_ids {
        if let Err(error) = bot.send_message(ChatId(*admin_id), text).await {
            tracing::warn!(
                admin_id = *admin_id,
                error = %error,
                "Не удалось отправить уведомление админу"
            );
        }
    }
}
