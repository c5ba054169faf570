use crate::aggregate::{MemberInfo, SubscriptionSummary, group_similar_emails};
use crate::provision::{
    BYTES_PER_GB, CreateReport, ExtendReport, FanOutReport, MILLIS_PER_DAY, ProvisionError,
};
use crate::store::{TrustedUser, VpnAccount};
use chrono::{DateTime, Local, Utc};
use teloxide::utils::html::escape;

const IDENTIFIER_COLUMN: usize = 17;

pub fn format_gb(bytes: i64) -> String {
    format!("{:.2}", bytes as f64 / BYTES_PER_GB as f64)
}

pub fn format_date(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.with_timezone(&Local).format("%d.%m.%Y %H:%M").to_string())
        .unwrap_or_else(|| "—".to_string())
}

pub fn format_expiry(expiry_time: i64, now_millis: i64) -> String {
    if expiry_time == 0 {
        return "∞ бессрочно".to_string();
    }
    if expiry_time < 0 {
        let days = (-expiry_time) / MILLIS_PER_DAY;
        return format!("⏳ {} дн. с первого подключения", days);
    }
    if expiry_time <= now_millis {
        return format!("⛔ истёк {}", format_date(expiry_time));
    }
    let days_left = (expiry_time - now_millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY;
    format!("до {} ({} дн.)", format_date(expiry_time), days_left)
}

/// Обрезает идентификатор под ширину колонки таблицы.
pub fn truncate_identifier(identifier: &str) -> String {
    if identifier.chars().count() <= IDENTIFIER_COLUMN {
        return identifier.to_string();
    }
    let head: String = identifier.chars().take(IDENTIFIER_COLUMN - 3).collect();
    format!("{head}...")
}

fn push_warnings(text: &mut String, warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    text.push_str("\n\n⚠️ <b>Предупреждения:</b>");
    for warning in warnings {
        text.push_str(&format!("\n• {}", escape(warning)));
    }
}

pub fn render_create_report(report: &CreateReport, sub_url: Option<&str>, now_millis: i64) -> String {
    let mut text = format!(
        "✅ Клиент <b>{}</b> создан\n\nСрок: {}\nАккаунты ({}):",
        escape(&report.base_username),
        format_expiry(report.expiry_time, now_millis),
        report.created.len()
    );
    for email in &report.created {
        text.push_str(&format!("\n• <code>{}</code>", escape(email)));
    }
    match sub_url {
        Some(url) => text.push_str(&format!("\n\n🔗 Подписка:\n<code>{}</code>", escape(url))),
        None => text.push_str(&format!(
            "\n\nSubscription ID: <code>{}</code>",
            escape(&report.sub_id)
        )),
    }
    push_warnings(&mut text, &report.warnings);
    text
}

pub fn render_extend_report(report: &ExtendReport, now_millis: i64) -> String {
    format!(
        "✅ <code>{}</code> продлён\n\nБыло: {}\nСтало: {}\n\nИзменена только запись в inbound #{}.",
        escape(&report.email),
        format_expiry(report.previous_expiry, now_millis),
        format_expiry(report.new_expiry, now_millis),
        report.inbound_id
    )
}

pub fn render_fan_out_report(title: &str, report: &FanOutReport) -> String {
    let mut text = format!("✅ {} ({}):", title, report.succeeded.len());
    for email in &report.succeeded {
        text.push_str(&format!("\n• <code>{}</code>", escape(email)));
    }
    push_warnings(&mut text, &report.warnings);
    text
}

pub fn render_provision_error(action: &str, error: &ProvisionError) -> String {
    let mut text = format!("❌ {}: {}", action, escape(&error.to_string()));
    if let ProvisionError::AllFailed(reasons) = error {
        for reason in reasons {
            text.push_str(&format!("\n• {}", escape(reason)));
        }
    }
    text
}

pub fn render_online(groups: &[(String, usize)]) -> String {
    if groups.is_empty() {
        return "🟢 Сейчас никого нет в сети".to_string();
    }
    let mut text = format!("🟢 <b>Онлайн: {}</b>\n", groups.len());
    for (name, connections) in groups {
        text.push_str(&format!("\n• {} ({})", escape(name), connections));
    }
    text
}

pub fn render_network_usage(members: &[MemberInfo]) -> String {
    if members.is_empty() {
        return "📊 Клиентов пока нет".to_string();
    }
    let mut table = format!("{:<17} {:>9} {:>9}\n", "Клиент", "↓ GB", "↑ GB");
    let (mut up, mut down) = (0i64, 0i64);
    for member in members {
        up += member.up;
        down += member.down;
        table.push_str(&format!(
            "{:<17} {:>9} {:>9}\n",
            truncate_identifier(&member.base_name),
            format_gb(member.down),
            format_gb(member.up)
        ));
    }
    table.push_str(&format!(
        "{:<17} {:>9} {:>9}",
        "Итого",
        format_gb(down),
        format_gb(up)
    ));
    format!("📊 <b>Трафик по клиентам</b>\n<pre>{}</pre>", escape(&table))
}

pub fn render_detailed_usage(summaries: &[SubscriptionSummary], now_millis: i64) -> String {
    if summaries.is_empty() {
        return "📋 Нет клиентов с подпиской".to_string();
    }
    let mut text = String::from("📋 <b>Подробный отчёт по подпискам</b>\n");
    let (mut up, mut down, mut active) = (0i64, 0i64, 0usize);
    for summary in summaries {
        up += summary.up;
        down += summary.down;
        if summary.enable {
            active += 1;
        }
        let status = if summary.enable { "🟢" } else { "🔴" };
        let names = group_similar_emails(&summary.emails).join(", ");
        text.push_str(&format!(
            "\n{} <b>{}</b>\n⬆️ {} GB ⬇️ {} GB Σ {} GB\n📅 {}\n🌐 {}\n",
            status,
            escape(&names),
            format_gb(summary.up),
            format_gb(summary.down),
            format_gb(summary.total()),
            format_expiry(summary.expiry_time, now_millis),
            escape(&summary.inbounds.join(", "))
        ));
    }
    text.push_str(&format!(
        "\nИтого: {} подписок, активных {}\n⬆️ {} GB ⬇️ {} GB",
        summaries.len(),
        active,
        format_gb(up),
        format_gb(down)
    ));
    text
}

pub fn render_member_card(member: &MemberInfo, now_millis: i64) -> String {
    let status = if !member.enable {
        "🔴 отключён"
    } else if member.is_expired(now_millis) {
        "⛔ истёк"
    } else {
        "🟢 активен"
    };
    let mut text = format!(
        "👤 <b>{}</b>\nСтатус: {}\nСрок: {}\nТрафик: ⬆️ {} GB ⬇️ {} GB (всего {} GB)\nЗаписи:",
        escape(&member.base_name),
        status,
        format_expiry(member.expiry_time, now_millis),
        format_gb(member.up),
        format_gb(member.down),
        format_gb(member.total())
    );
    for email in &member.emails {
        text.push_str(&format!("\n• <code>{}</code>", escape(email)));
    }
    text
}

pub fn render_trusted_users(users: &[TrustedUser]) -> String {
    if users.is_empty() {
        return "Доверенных пользователей нет".to_string();
    }
    let mut text = String::from("🤝 Доверенные пользователи (✅ писал боту, ⏳ ещё нет):");
    for user in users {
        text.push_str(&format!(
            "\n• @{} {} — добавлен {}",
            escape(&user.username),
            if user.telegram_id.is_some() { "✅" } else { "⏳" },
            format_date(user.added_at)
        ));
    }
    text
}

pub fn render_accounts(accounts: &[VpnAccount], limit: usize) -> String {
    if accounts.is_empty() {
        return format!("У вас пока нет аккаунтов (лимит {}).", limit);
    }
    let mut text = format!("🗂 Ваши аккаунты ({}/{}):", accounts.len(), limit);
    for account in accounts {
        text.push_str(&format!(
            "\n• <code>{}</code> — {}",
            escape(&account.username),
            format_date(account.created_at)
        ));
    }
    text.push_str("\n\nНажмите на аккаунт ниже, чтобы удалить его.");
    text
}

pub fn admin_help_text() -> &'static str {
    "Меню администратора:\n\
     ➕ Добавить клиента — имя, затем срок в днях или ∞\n\
     ✏️ Изменить клиента — конфигурация, продление, сброс трафика, удаление\n\
     🗑 Удалить клиента — удалить во всех inbound'ах\n\
     🟢 Онлайн / 📊 Трафик / 📋 Подробный отчёт — отчёты\n\
     ♻️ Обнулить трафик — сбросить счётчики клиента\n\
     🤝 / 🚫 — управление доверенными пользователями\n\n\
     /cancel или ❌ Отмена прерывают любой диалог."
}

pub fn trusted_help_text() -> &'static str {
    "🆕 Создать аккаунт — бессрочный VPN-аккаунт на ваше имя\n\
     🗂 Мои аккаунты — список и удаление\n\n\
     /cancel прерывает любой диалог."
}
