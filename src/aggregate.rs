//! Сборка логических участников из разрозненных записей по inbound'ам.
//!
//! Две независимые стратегии: по общему `subId`, который ставится при
//! создании, и по базовому имени (`alice-2` → `alice`) для записей, созданных
//! до появления `subId` или вне бота. Отдельно есть группировка для вывода,
//! которая только сокращает отчёт.

use crate::panel::{ClientStat, Inbound};
use std::collections::HashMap;

pub const MEMBER_SUFFIX_SEPARATOR: char = '-';
pub const MAX_LENGTH_DIFFERENCE_FOR_GROUPING: usize = 3;
pub const MIN_PREFIX_LENGTH_FOR_GROUPING: usize = 3;

/// Идентификатор участника в n-м inbound (нумерация с 1).
pub fn member_identifier(base: &str, position: usize) -> String {
    format!("{base}{MEMBER_SUFFIX_SEPARATOR}{position}")
}

/// Отрезает хвост `-<цифры>`, если он чисто числовой.
pub fn base_name(identifier: &str) -> &str {
    match identifier.rsplit_once(MEMBER_SUFFIX_SEPARATOR) {
        Some((base, suffix))
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) =>
        {
            base
        }
        _ => identifier,
    }
}

pub fn matches_member(identifier: &str, target: &str) -> bool {
    identifier == target || base_name(identifier) == target
}

/// email → subId по настройкам всех inbound'ов.
pub fn subscription_map(inbounds: &[Inbound]) -> HashMap<String, String> {
    inbounds
        .iter()
        .flat_map(Inbound::settings_clients)
        .filter(|client| !client.sub_id.is_empty())
        .map(|client| (client.email, client.sub_id))
        .collect()
}

/// Все subId, под которыми в настройках записан участник.
pub fn subscription_ids_for(inbounds: &[Inbound], member: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for client in inbounds.iter().flat_map(Inbound::settings_clients) {
        if matches_member(&client.email, member)
            && !client.sub_id.is_empty()
            && !ids.contains(&client.sub_id)
        {
            ids.push(client.sub_id);
        }
    }
    ids
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSummary {
    pub sub_id: String,
    pub up: i64,
    pub down: i64,
    pub enable: bool,
    pub expiry_time: i64,
    pub inbounds: Vec<String>,
    pub emails: Vec<String>,
}

impl SubscriptionSummary {
    pub fn total(&self) -> i64 {
        self.up + self.down
    }
}

/// Суммирует счётчики по subId. Записи без известного subId в отчёт не
/// попадают.
pub fn aggregate_by_subscription(inbounds: &[Inbound]) -> Vec<SubscriptionSummary> {
    let sub_ids = subscription_map(inbounds);
    let mut order: Vec<String> = Vec::new();
    let mut summaries: HashMap<String, SubscriptionSummary> = HashMap::new();

    for inbound in inbounds {
        for stat in &inbound.client_stats {
            let Some(sub_id) = sub_ids.get(&stat.email) else {
                continue;
            };
            let summary = summaries.entry(sub_id.clone()).or_insert_with(|| {
                order.push(sub_id.clone());
                SubscriptionSummary {
                    sub_id: sub_id.clone(),
                    up: 0,
                    down: 0,
                    enable: false,
                    expiry_time: stat.expiry_time,
                    inbounds: Vec::new(),
                    emails: Vec::new(),
                }
            });
            summary.up += stat.up;
            summary.down += stat.down;
            summary.enable |= stat.enable;
            summary.expiry_time = summary.expiry_time.max(stat.expiry_time);
            let label = inbound.label();
            if !summary.inbounds.contains(&label) {
                summary.inbounds.push(label);
            }
            if !summary.emails.contains(&stat.email) {
                summary.emails.push(stat.email.clone());
            }
        }
    }

    order
        .into_iter()
        .filter_map(|sub_id| summaries.remove(&sub_id))
        .collect()
}

/// Участник, собранный по базовому имени.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub base_name: String,
    pub emails: Vec<String>,
    /// Наименьший id записи статистики, то есть порядок создания.
    pub first_record_id: i64,
    pub enable: bool,
    pub expiry_time: i64,
    pub up: i64,
    pub down: i64,
}

impl MemberInfo {
    pub fn total(&self) -> i64 {
        self.up + self.down
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expiry_time > 0 && self.expiry_time < now_millis
    }
}

/// Группирует записи статистики по базовому имени. Срок берётся максимальный
/// из статистики и настроек, потому что статистика у старых панелей отстаёт.
pub fn members_by_base_name(inbounds: &[Inbound]) -> Vec<MemberInfo> {
    let mut members: Vec<MemberInfo> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for stat in inbounds.iter().flat_map(|inbound| inbound.client_stats.iter()) {
        let base = base_name(&stat.email).to_string();
        let position = *index.entry(base.clone()).or_insert_with(|| {
            members.push(empty_member(base, stat));
            members.len() - 1
        });
        let member = &mut members[position];
        member.up += stat.up;
        member.down += stat.down;
        member.enable |= stat.enable;
        member.first_record_id = member.first_record_id.min(stat.id);
        member.expiry_time = member.expiry_time.max(stat.expiry_time);
        if !member.emails.contains(&stat.email) {
            member.emails.push(stat.email.clone());
        }
    }

    for client in inbounds.iter().flat_map(Inbound::settings_clients) {
        if let Some(&position) = index.get(base_name(&client.email)) {
            let member = &mut members[position];
            member.expiry_time = member.expiry_time.max(client.expiry_time);
        }
    }

    members.sort_by(|a, b| {
        a.first_record_id
            .cmp(&b.first_record_id)
            .then_with(|| a.base_name.cmp(&b.base_name))
    });
    members
}

fn empty_member(base: String, stat: &ClientStat) -> MemberInfo {
    MemberInfo {
        base_name: base,
        emails: Vec::new(),
        first_record_id: stat.id,
        enable: false,
        expiry_time: stat.expiry_time,
        up: 0,
        down: 0,
    }
}

pub fn find_member(inbounds: &[Inbound], name: &str) -> Option<MemberInfo> {
    members_by_base_name(inbounds)
        .into_iter()
        .find(|member| member.base_name == name || member.emails.iter().any(|email| email == name))
}

/// Онлайн-идентификаторы по базовому имени: (имя, число подключений).
pub fn group_online(online: &[String]) -> Vec<(String, usize)> {
    let mut grouped: Vec<(String, usize)> = Vec::new();
    for identifier in online {
        let base = base_name(identifier);
        match grouped.iter_mut().find(|(name, _)| name == base) {
            Some((_, count)) => *count += 1,
            None => grouped.push((base.to_string(), 1)),
        }
    }
    grouped.sort_by(|a, b| a.0.cmp(&b.0));
    grouped
}

/// Сворачивает список email'ов одного участника в одну подпись, если они
/// похожи. Только для вывода.
pub fn group_similar_emails(emails: &[String]) -> Vec<String> {
    if emails.len() < 2 {
        return emails.to_vec();
    }
    match shared_domain(emails) {
        Some(domain) if lengths_are_close(emails) => vec![group_label(emails, domain)],
        _ => emails.to_vec(),
    }
}

fn split_email(email: &str) -> (&str, Option<&str>) {
    match email.split_once('@') {
        Some((local, domain)) => (local, Some(domain)),
        None => (email, None),
    }
}

/// Домен, общий для всех адресов с `@`. Строки без `@` домену не мешают.
/// `None` означает, что домены расходятся.
fn shared_domain(emails: &[String]) -> Option<Option<&str>> {
    let mut shared: Option<&str> = None;
    for domain in emails.iter().filter_map(|email| split_email(email).1) {
        match shared {
            Some(known) if known != domain => return None,
            _ => shared = Some(domain),
        }
    }
    Some(shared)
}

fn lengths_are_close(emails: &[String]) -> bool {
    let lengths = emails.iter().map(|email| split_email(email).0.chars().count());
    let (min, max) = lengths.fold((usize::MAX, 0), |(min, max), len| (min.min(len), max.max(len)));
    max - min < MAX_LENGTH_DIFFERENCE_FOR_GROUPING
}

fn group_label(emails: &[String], domain: Option<&str>) -> String {
    let cleaned: Vec<&str> = emails
        .iter()
        .map(|email| base_name(split_email(email).0))
        .collect();
    let prefix = common_prefix(&cleaned);
    let local = if prefix.chars().count() < MIN_PREFIX_LENGTH_FOR_GROUPING {
        cleaned[0]
    } else {
        prefix
    };
    match domain.filter(|domain| !domain.is_empty()) {
        Some(domain) => format!("{local}@{domain}"),
        None => local.to_string(),
    }
}

fn common_prefix<'a>(names: &[&'a str]) -> &'a str {
    let Some((first, rest)) = names.split_first() else {
        return "";
    };
    let mut end = first.len();
    for name in rest {
        end = first
            .char_indices()
            .zip(name.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map(|((index, c), _)| index + c.len_utf8())
            .unwrap_or(0)
            .min(end);
    }
    &first[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn stat(id: i64, email: &str, up: i64, down: i64, enable: bool, expiry: i64) -> ClientStat {
        ClientStat {
            id,
            email: email.to_string(),
            up,
            down,
            enable,
            expiry_time: expiry,
            ..ClientStat::default()
        }
    }

    fn inbound(id: i64, remark: &str, clients: serde_json::Value, stats: Vec<ClientStat>) -> Inbound {
        Inbound {
            id,
            remark: remark.to_string(),
            enable: true,
            settings: json!({ "clients": clients }).to_string(),
            client_stats: stats,
            ..Inbound::default()
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn base_name_strips_only_numeric_suffix() {
        assert_eq!(base_name("alice-2"), "alice");
        assert_eq!(base_name("alice-10"), "alice");
        assert_eq!(base_name("alice-v2"), "alice-v2");
        assert_eq!(base_name("alice"), "alice");
        assert_eq!(base_name("bob-add1-3"), "bob-add1");
        assert_eq!(base_name("a-1-v2"), "a-1-v2");
        assert_eq!(base_name("alice-"), "alice-");
        assert_eq!(base_name("-5"), "");
    }

    #[test]
    fn member_matching_accepts_exact_and_base_name() {
        assert!(matches_member("alice-1", "alice"));
        assert!(matches_member("alice-1", "alice-1"));
        assert!(!matches_member("alice-v2", "alice"));
        assert!(!matches_member("alicia-1", "alice"));
    }

    #[test]
    fn subscription_grouping_sums_and_drops_unmapped_records() {
        let inbounds = vec![
            inbound(
                1,
                "vless",
                json!([{"email": "alice-1", "subId": "s1"}, {"email": "legacy", "subId": ""}]),
                vec![
                    stat(1, "alice-1", 10, 20, false, 1_000),
                    stat(2, "legacy", 500, 500, true, 0),
                ],
            ),
            inbound(
                2,
                "trojan",
                json!([{"email": "alice-2", "subId": "s1"}]),
                vec![stat(3, "alice-2", 1, 2, true, 5_000)],
            ),
        ];

        let summaries = aggregate_by_subscription(&inbounds);
        assert_eq!(
            summaries,
            vec![SubscriptionSummary {
                sub_id: "s1".to_string(),
                up: 11,
                down: 22,
                enable: true,
                expiry_time: 5_000,
                inbounds: strings(&["vless", "trojan"]),
                emails: strings(&["alice-1", "alice-2"]),
            }]
        );
    }

    #[test]
    fn malformed_settings_leave_records_unmapped() {
        let mut broken = inbound(1, "x", json!([]), vec![stat(1, "alice-1", 1, 1, true, 0)]);
        broken.settings = "not json".to_string();
        assert!(aggregate_by_subscription(&[broken.clone()]).is_empty());
        assert_eq!(members_by_base_name(&[broken]).len(), 1);
    }

    #[test]
    fn base_name_grouping_partitions_records() {
        let inbounds = vec![
            inbound(
                1,
                "a",
                json!([{"email": "bob-1", "expiryTime": 9_000}]),
                vec![
                    stat(5, "bob-1", 1, 1, false, 100),
                    stat(2, "carol", 3, 3, true, 0),
                ],
            ),
            inbound(2, "b", json!([]), vec![stat(7, "bob-2", 2, 2, true, 200)]),
        ];

        let members = members_by_base_name(&inbounds);
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].base_name, "carol");
        assert_eq!(members[1].base_name, "bob");
        assert_eq!(members[1].emails, strings(&["bob-1", "bob-2"]));
        assert_eq!(members[1].total(), 6);
        assert!(members[1].enable);
        assert_eq!(members[1].expiry_time, 9_000);

        let total_records: usize = members.iter().map(|member| member.emails.len()).sum();
        assert_eq!(total_records, 3);
        assert_eq!(find_member(&inbounds, "bob-2").unwrap().base_name, "bob");
    }

    #[test]
    fn expiry_helpers() {
        let member = MemberInfo {
            base_name: "x".into(),
            emails: vec![],
            first_record_id: 1,
            enable: true,
            expiry_time: 1_000,
            up: 0,
            down: 0,
        };
        assert!(member.is_expired(2_000));
        assert!(!member.is_expired(500));
        assert!(!MemberInfo { expiry_time: 0, ..member }.is_expired(2_000));
    }

    #[test]
    fn subscription_ids_follow_member_matching() {
        let inbounds = vec![inbound(
            1,
            "a",
            json!([
                {"email": "alice-1", "subId": "s1"},
                {"email": "alice-2", "subId": "s1"},
                {"email": "alice-v2", "subId": "s9"}
            ]),
            vec![],
        )];
        assert_eq!(subscription_ids_for(&inbounds, "alice"), strings(&["s1"]));
    }

    #[test]
    fn online_identifiers_are_counted_per_member() {
        let online = strings(&["bob-2", "alice-1", "bob-1"]);
        assert_eq!(
            group_online(&online),
            vec![("alice".to_string(), 1), ("bob".to_string(), 2)]
        );
    }

    #[test]
    fn display_grouping_merges_numbered_suffixes() {
        assert_eq!(
            group_similar_emails(&strings(&["alice-1", "alice-2", "alice-10"])),
            strings(&["alice"])
        );
        assert_eq!(
            group_similar_emails(&strings(&["alice-1@vpn", "alice-2@vpn"])),
            strings(&["alice@vpn"])
        );
    }

    #[test]
    fn display_grouping_lets_bare_names_join_emails() {
        assert_eq!(
            group_similar_emails(&strings(&["alice-1", "alice-2@vpn"])),
            strings(&["alice@vpn"])
        );
    }

    #[test]
    fn display_grouping_keeps_distant_lengths_apart() {
        let emails = strings(&["alice-1", "alice-123456"]);
        assert_eq!(group_similar_emails(&emails), emails);
    }

    #[test]
    fn display_grouping_keeps_different_domains_apart() {
        let emails = strings(&["alice-1@a", "alice-2@b"]);
        assert_eq!(group_similar_emails(&emails), emails);
    }

    #[test]
    fn short_common_prefix_falls_back_to_first_name() {
        assert_eq!(
            group_similar_emails(&strings(&["abx-1", "aby-2"])),
            strings(&["abx"])
        );
        assert_eq!(group_similar_emails(&strings(&["solo-1"])), strings(&["solo-1"]));
    }
}
