//! Провижининг участников по всем включённым inbound'ам.
//!
//! Операции выполняются inbound за inbound'ом без транзакции. Итог всегда
//! один из трёх: нечего делать (нет включённых inbound'ов), всё упало, или
//! хотя бы одна запись прошла (тогда ошибки остальных идут в предупреждения).

use crate::aggregate::{matches_member, member_identifier};
use crate::clock::Clock;
use crate::panel::{Inbound, InboundClient, PanelApi, PanelError};
use rand::distr::{Alphanumeric, SampleString};
use std::sync::Arc;
use thiserror::Error;

pub const MILLIS_PER_DAY: i64 = 86_400_000;
pub const BYTES_PER_GB: i64 = 1024 * 1024 * 1024;
const SUB_ID_LENGTH: usize = 16;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Panel(#[from] PanelError),
    #[error("В панели нет ни одного inbound")]
    NoInbounds,
    #[error("В панели нет включённых inbound'ов")]
    NoEnabledInbounds,
    #[error("Операция не удалась ни в одном inbound")]
    AllFailed(Vec<String>),
    #[error("Участник {0} не найден")]
    NotFound(String),
    #[error("Не удалось записать продлённый {email}, прежняя запись восстановлена: {error}")]
    ExtendRolledBack { email: String, error: PanelError },
    #[error(
        "Запись {email} удалена из inbound #{inbound_id} и не восстановлена: {error}; \
         ошибка восстановления: {restore_error}"
    )]
    ExtendLost {
        email: String,
        inbound_id: i64,
        error: PanelError,
        restore_error: PanelError,
    },
}

/// Срок действия нового участника.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    Days(u32),
}

impl Expiry {
    /// `expiryTime` панели: 0 для бессрочного, иначе абсолютные миллисекунды.
    pub fn expiry_time(self, now_millis: i64) -> i64 {
        match self {
            Expiry::Never => 0,
            Expiry::Days(days) => now_millis + i64::from(days) * MILLIS_PER_DAY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub base_username: String,
    pub expiry: Expiry,
    pub owner_tg_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReport {
    pub base_username: String,
    pub sub_id: String,
    pub expiry_time: i64,
    pub created: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendReport {
    pub email: String,
    pub inbound_id: i64,
    pub previous_expiry: i64,
    pub new_expiry: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub succeeded: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct Provisioner {
    panel: Arc<dyn PanelApi>,
    clock: Arc<dyn Clock>,
}

pub fn generate_sub_id() -> String {
    Alphanumeric
        .sample_string(&mut rand::rng(), SUB_ID_LENGTH)
        .to_lowercase()
}

impl Provisioner {
    pub fn new(panel: Arc<dyn PanelApi>, clock: Arc<dyn Clock>) -> Self {
        Self { panel, clock }
    }

    async fn enabled_inbounds(&self) -> Result<Vec<Inbound>, ProvisionError> {
        let inbounds = self.panel.list_inbounds().await?;
        if inbounds.is_empty() {
            return Err(ProvisionError::NoInbounds);
        }
        let enabled: Vec<Inbound> = inbounds.into_iter().filter(|inbound| inbound.enable).collect();
        if enabled.is_empty() {
            return Err(ProvisionError::NoEnabledInbounds);
        }
        Ok(enabled)
    }

    /// Создаёт `base-1..base-N` с общим subId во всех включённых inbound'ах.
    pub async fn create(&self, request: &CreateRequest) -> Result<CreateReport, ProvisionError> {
        let inbounds = self.enabled_inbounds().await?;
        let sub_id = generate_sub_id();
        let expiry_time = request.expiry.expiry_time(self.clock.now_millis());

        let mut report = CreateReport {
            base_username: request.base_username.clone(),
            sub_id: sub_id.clone(),
            expiry_time,
            created: Vec::new(),
            warnings: Vec::new(),
        };

        for (position, inbound) in inbounds.iter().enumerate() {
            let email = member_identifier(&request.base_username, position + 1);
            let client =
                InboundClient::new_member(email.clone(), sub_id.clone(), expiry_time, request.owner_tg_id);
            match self.panel.add_client(inbound.id, &client).await {
                Ok(()) => report.created.push(email),
                Err(error) => {
                    tracing::warn!(
                        inbound_id = inbound.id,
                        email = %email,
                        error = %error,
                        "Failed to add client to inbound"
                    );
                    report
                        .warnings
                        .push(format!("{} ({}): {}", inbound.label(), email, error));
                }
            }
        }

        if report.created.is_empty() {
            return Err(ProvisionError::AllFailed(report.warnings));
        }
        tracing::info!(
            base_username = %request.base_username,
            created = report.created.len(),
            failed = report.warnings.len(),
            "Member created"
        );
        Ok(report)
    }

    /// Продлевает первую найденную запись участника. Остальные записи в
    /// других inbound'ах не трогаются. Бессрочная запись остаётся бессрочной.
    pub async fn extend(&self, member: &str, days: u32) -> Result<ExtendReport, ProvisionError> {
        let inbounds = self.panel.list_inbounds().await?;
        let (inbound_id, client) = inbounds
            .iter()
            .find_map(|inbound| {
                inbound
                    .settings_clients()
                    .into_iter()
                    .find(|client| matches_member(&client.email, member))
                    .map(|client| (inbound.id, client))
            })
            .ok_or_else(|| ProvisionError::NotFound(member.to_string()))?;

        let previous_expiry = client.expiry_time;
        let new_expiry = if previous_expiry == 0 {
            0
        } else {
            previous_expiry + i64::from(days) * MILLIS_PER_DAY
        };

        self.panel
            .delete_client(inbound_id, client.client_uuid())
            .await?;
        let updated = InboundClient {
            expiry_time: new_expiry,
            ..client.clone()
        };
        if let Err(error) = self.panel.add_client(inbound_id, &updated).await {
            tracing::warn!(
                inbound_id,
                email = %client.email,
                error = %error,
                "Failed to add extended client, restoring previous record"
            );
            let restored = self.panel.add_client(inbound_id, &client).await;
            return Err(match restored {
                Ok(()) => ProvisionError::ExtendRolledBack {
                    email: client.email,
                    error,
                },
                Err(restore_error) => {
                    tracing::error!(
                        inbound_id,
                        email = %client.email,
                        error = %restore_error,
                        "Client record lost after failed extend"
                    );
                    ProvisionError::ExtendLost {
                        email: client.email,
                        inbound_id,
                        error,
                        restore_error,
                    }
                }
            });
        }

        tracing::info!(
            inbound_id,
            email = %updated.email,
            previous_expiry,
            new_expiry,
            "Member extended"
        );
        Ok(ExtendReport {
            email: updated.email,
            inbound_id,
            previous_expiry,
            new_expiry,
        })
    }

    /// Сбрасывает трафик каждой записи участника во включённых inbound'ах.
    pub async fn reset_traffic(&self, member: &str) -> Result<FanOutReport, ProvisionError> {
        let inbounds = self.enabled_inbounds().await?;
        let mut attempted = 0usize;
        let mut report = FanOutReport::default();

        for inbound in &inbounds {
            for stat in inbound
                .client_stats
                .iter()
                .filter(|stat| matches_member(&stat.email, member))
            {
                attempted += 1;
                match self.panel.reset_client_traffic(inbound.id, &stat.email).await {
                    Ok(()) => report.succeeded.push(stat.email.clone()),
                    Err(error) => {
                        tracing::warn!(
                            inbound_id = inbound.id,
                            email = %stat.email,
                            error = %error,
                            "Failed to reset client traffic"
                        );
                        report
                            .warnings
                            .push(format!("{} ({}): {}", inbound.label(), stat.email, error));
                    }
                }
            }
        }

        if attempted == 0 {
            return Err(ProvisionError::NotFound(member.to_string()));
        }
        if report.succeeded.is_empty() {
            return Err(ProvisionError::AllFailed(report.warnings));
        }
        Ok(report)
    }

    /// Удаляет все записи участника во всех inbound'ах.
    pub async fn delete(&self, member: &str) -> Result<FanOutReport, ProvisionError> {
        let removal = match self.panel.remove_clients(&[member.to_string()]).await {
            Ok(removal) => removal,
            Err(PanelError::NotFound(_)) => return Err(ProvisionError::NotFound(member.to_string())),
            Err(error) => return Err(error.into()),
        };
        if removal.removed.is_empty() {
            return Err(ProvisionError::AllFailed(removal.warnings));
        }
        tracing::info!(
            member,
            removed = removal.removed.len(),
            failed = removal.warnings.len(),
            "Member deleted"
        );
        Ok(FanOutReport {
            succeeded: removal.removed,
            warnings: removal.warnings,
        })
    }

    pub async fn inbounds(&self) -> Result<Vec<Inbound>, ProvisionError> {
        Ok(self.panel.list_inbounds().await?)
    }

    pub async fn online_clients(&self) -> Result<Vec<String>, ProvisionError> {
        Ok(self.panel.online_clients().await?)
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use crate::panel::{ClientStat, Inbound, InboundClient, InboundSettings, PanelApi, PanelError};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Панель в памяти: хранит inbounds и умеет отказывать выбранным.
    #[derive(Default)]
    pub struct FakePanel {
        pub inbounds: Mutex<Vec<Inbound>>,
        pub failing_inbounds: HashSet<i64>,
        pub calls: Mutex<Vec<String>>,
        rejected_adds: Mutex<usize>,
        next_stat_id: Mutex<i64>,
    }

    impl FakePanel {
        pub fn with_inbounds(inbounds: Vec<Inbound>) -> Self {
            Self {
                inbounds: Mutex::new(inbounds),
                ..Self::default()
            }
        }

        pub fn failing(mut self, ids: &[i64]) -> Self {
            self.failing_inbounds = ids.iter().copied().collect();
            self
        }

        pub fn enabled_inbound(id: i64) -> Inbound {
            Inbound {
                id,
                remark: format!("in{id}"),
                enable: true,
                settings: r#"{"clients":[]}"#.to_string(),
                ..Inbound::default()
            }
        }

        /// Следующие `count` вызовов `add_client` завершатся ошибкой.
        pub fn reject_next_adds(&self, count: usize) {
            *self.rejected_adds.lock().unwrap() = count;
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn set_usage(&self, email: &str, up: i64, down: i64) {
            for inbound in self.inbounds.lock().unwrap().iter_mut() {
                for stat in inbound.client_stats.iter_mut().filter(|s| s.email == email) {
                    stat.up = up;
                    stat.down = down;
                }
            }
        }

        fn check(&self, inbound_id: i64) -> Result<(), PanelError> {
            if self.failing_inbounds.contains(&inbound_id) {
                return Err(PanelError::RemoteOperation(format!("inbound {inbound_id} rejected")));
            }
            Ok(())
        }

        fn update_clients(inbound: &mut Inbound, change: impl FnOnce(&mut Vec<InboundClient>)) {
            let mut settings = inbound.parse_settings().unwrap_or_default();
            change(&mut settings.clients);
            inbound.settings = serde_json::to_string(&InboundSettings {
                clients: settings.clients,
            })
            .unwrap();
        }
    }

    #[async_trait]
    impl PanelApi for FakePanel {
        async fn list_inbounds(&self) -> Result<Vec<Inbound>, PanelError> {
            Ok(self.inbounds.lock().unwrap().clone())
        }

        async fn add_client(&self, inbound_id: i64, client: &InboundClient) -> Result<(), PanelError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("add {inbound_id} {}", client.email));
            self.check(inbound_id)?;
            {
                let mut rejected = self.rejected_adds.lock().unwrap();
                if *rejected > 0 {
                    *rejected -= 1;
                    return Err(PanelError::RemoteOperation("boom".into()));
                }
            }
            let mut stat_id = self.next_stat_id.lock().unwrap();
            let mut inbounds = self.inbounds.lock().unwrap();
            let inbound = inbounds
                .iter_mut()
                .find(|inbound| inbound.id == inbound_id)
                .ok_or_else(|| PanelError::RemoteOperation("no such inbound".into()))?;
            Self::update_clients(inbound, |clients| clients.push(client.clone()));
            if !inbound.client_stats.iter().any(|s| s.email == client.email) {
                *stat_id += 1;
                inbound.client_stats.push(ClientStat {
                    id: *stat_id,
                    inbound_id,
                    enable: client.enable,
                    email: client.email.clone(),
                    expiry_time: client.expiry_time,
                    ..ClientStat::default()
                });
            }
            Ok(())
        }

        async fn delete_client(&self, inbound_id: i64, client_uuid: &str) -> Result<(), PanelError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("delete {inbound_id} {client_uuid}"));
            self.check(inbound_id)?;
            let mut inbounds = self.inbounds.lock().unwrap();
            if let Some(inbound) = inbounds.iter_mut().find(|inbound| inbound.id == inbound_id) {
                Self::update_clients(inbound, |clients| {
                    clients.retain(|client| client.client_uuid() != client_uuid)
                });
            }
            Ok(())
        }

        async fn reset_client_traffic(&self, inbound_id: i64, email: &str) -> Result<(), PanelError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("reset {inbound_id} {email}"));
            self.check(inbound_id)
        }

        async fn online_clients(&self) -> Result<Vec<String>, PanelError> {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakePanel;
    use super::*;
    use crate::aggregate::aggregate_by_subscription;
    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;

    const NOW: i64 = 1_700_000_000_000;

    fn provisioner(panel: &Arc<FakePanel>) -> Provisioner {
        Provisioner::new(panel.clone(), Arc::new(ManualClock::at_millis(NOW)))
    }

    fn three_inbounds() -> Vec<Inbound> {
        (1..=3).map(FakePanel::enabled_inbound).collect()
    }

    fn request(name: &str, expiry: Expiry) -> CreateRequest {
        CreateRequest {
            base_username: name.to_string(),
            expiry,
            owner_tg_id: Some(77),
        }
    }

    #[tokio::test]
    async fn create_fans_out_with_shared_subscription() {
        let panel = Arc::new(FakePanel::with_inbounds(three_inbounds()));
        let report = provisioner(&panel)
            .create(&request("alice", Expiry::Days(30)))
            .await
            .unwrap();

        assert_eq!(report.created, vec!["alice-1", "alice-2", "alice-3"]);
        assert!(report.warnings.is_empty());
        assert_eq!(report.expiry_time, NOW + 30 * MILLIS_PER_DAY);
        assert_eq!(report.sub_id.len(), 16);

        panel.set_usage("alice-1", 100, 1_000);
        panel.set_usage("alice-2", 200, 2_000);
        panel.set_usage("alice-3", 300, 3_000);
        let inbounds = panel.list_inbounds().await.unwrap();
        for inbound in &inbounds {
            let clients = inbound.settings_clients();
            assert_eq!(clients[0].sub_id, report.sub_id);
            assert_eq!(clients[0].tg_id, "77");
        }

        let summaries = aggregate_by_subscription(&inbounds);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].up, 600);
        assert_eq!(summaries[0].down, 6_000);
    }

    #[tokio::test]
    async fn create_with_infinite_duration_has_zero_expiry() {
        let panel = Arc::new(FakePanel::with_inbounds(three_inbounds()));
        let report = provisioner(&panel)
            .create(&request("bob", Expiry::Never))
            .await
            .unwrap();
        assert_eq!(report.expiry_time, 0);
    }

    #[tokio::test]
    async fn partial_create_reports_success_with_warning() {
        let panel = Arc::new(FakePanel::with_inbounds(three_inbounds()).failing(&[2]));
        let report = provisioner(&panel)
            .create(&request("alice", Expiry::Never))
            .await
            .unwrap();

        assert_eq!(report.created, vec!["alice-1", "alice-3"]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("alice-2"));
    }

    #[tokio::test]
    async fn create_failing_everywhere_lists_every_reason() {
        let panel = Arc::new(FakePanel::with_inbounds(three_inbounds()).failing(&[1, 2, 3]));
        match provisioner(&panel).create(&request("alice", Expiry::Never)).await {
            Err(ProvisionError::AllFailed(warnings)) => assert_eq!(warnings.len(), 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_without_enabled_inbounds_attempts_nothing() {
        let mut disabled = FakePanel::enabled_inbound(1);
        disabled.enable = false;
        let panel = Arc::new(FakePanel::with_inbounds(vec![disabled]));
        let result = provisioner(&panel).create(&request("alice", Expiry::Never)).await;

        assert!(matches!(result, Err(ProvisionError::NoEnabledInbounds)));
        assert!(panel.calls().is_empty());

        let empty = Arc::new(FakePanel::default());
        let result = provisioner(&empty).create(&request("alice", Expiry::Never)).await;
        assert!(matches!(result, Err(ProvisionError::NoInbounds)));
    }

    #[tokio::test]
    async fn create_skips_disabled_inbounds_in_numbering() {
        let mut inbounds = three_inbounds();
        inbounds[0].enable = false;
        let panel = Arc::new(FakePanel::with_inbounds(inbounds));
        let report = provisioner(&panel)
            .create(&request("dave", Expiry::Never))
            .await
            .unwrap();

        assert_eq!(report.created, vec!["dave-1", "dave-2"]);
        assert_eq!(panel.calls(), vec!["add 2 dave-1", "add 3 dave-2"]);
    }

    #[tokio::test]
    async fn extend_touches_only_first_matching_record() {
        let panel = Arc::new(FakePanel::with_inbounds(three_inbounds()));
        let engine = provisioner(&panel);
        let created = engine.create(&request("alice", Expiry::Days(10))).await.unwrap();

        let report = engine.extend("alice", 5).await.unwrap();
        assert_eq!(report.inbound_id, 1);
        assert_eq!(report.email, "alice-1");
        assert_eq!(report.previous_expiry, created.expiry_time);
        assert_eq!(report.new_expiry, created.expiry_time + 5 * MILLIS_PER_DAY);

        let inbounds = panel.list_inbounds().await.unwrap();
        assert_eq!(inbounds[0].settings_clients()[0].expiry_time, report.new_expiry);
        assert_eq!(inbounds[0].settings_clients()[0].sub_id, created.sub_id);
        assert_eq!(inbounds[1].settings_clients()[0].expiry_time, created.expiry_time);
        assert_eq!(inbounds[2].settings_clients()[0].expiry_time, created.expiry_time);
    }

    #[tokio::test]
    async fn extend_keeps_unlimited_member_unlimited() {
        let panel = Arc::new(FakePanel::with_inbounds(three_inbounds()));
        let engine = provisioner(&panel);
        engine.create(&request("erin", Expiry::Never)).await.unwrap();

        let report = engine.extend("erin", 30).await.unwrap();
        assert_eq!(report.new_expiry, 0);
    }

    #[tokio::test]
    async fn extend_unknown_member_is_not_found() {
        let panel = Arc::new(FakePanel::with_inbounds(three_inbounds()));
        let result = provisioner(&panel).extend("ghost", 5).await;
        assert!(matches!(result, Err(ProvisionError::NotFound(_))));
    }

    #[tokio::test]
    async fn failed_extend_restores_previous_record() {
        let panel = Arc::new(FakePanel::with_inbounds(three_inbounds()));
        let engine = provisioner(&panel);
        let created = engine.create(&request("alice", Expiry::Days(10))).await.unwrap();
        let before = panel.list_inbounds().await.unwrap()[0].settings_clients();

        panel.reject_next_adds(1);
        let result = engine.extend("alice", 5).await;

        match result {
            Err(ProvisionError::ExtendRolledBack { email, error }) => {
                assert_eq!(email, "alice-1");
                assert_eq!(error.to_string(), "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let after = panel.list_inbounds().await.unwrap()[0].settings_clients();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[0].expiry_time, created.expiry_time);
    }

    #[tokio::test]
    async fn failed_extend_and_restore_reports_lost_record() {
        let panel = Arc::new(FakePanel::with_inbounds(three_inbounds()));
        let engine = provisioner(&panel);
        engine.create(&request("alice", Expiry::Days(10))).await.unwrap();

        panel.reject_next_adds(2);
        let error = engine.extend("alice", 5).await.unwrap_err();

        assert!(matches!(
            error,
            ProvisionError::ExtendLost { inbound_id: 1, .. }
        ));
        assert!(error.to_string().contains("не восстановлена"));
        let inbounds = panel.list_inbounds().await.unwrap();
        assert!(inbounds[0].settings_clients().is_empty());
        assert_eq!(inbounds[1].settings_clients().len(), 1);
    }

    #[tokio::test]
    async fn reset_counts_successes_and_collects_errors() {
        let panel = Arc::new(FakePanel::with_inbounds(three_inbounds()));
        let engine = provisioner(&panel);
        engine.create(&request("alice", Expiry::Never)).await.unwrap();

        let failing = Arc::new(
            FakePanel::with_inbounds(panel.list_inbounds().await.unwrap()).failing(&[3]),
        );
        let report = provisioner(&failing).reset_traffic("alice").await.unwrap();
        assert_eq!(report.succeeded, vec!["alice-1", "alice-2"]);
        assert_eq!(report.warnings.len(), 1);

        let result = provisioner(&failing).reset_traffic("ghost").await;
        assert!(matches!(result, Err(ProvisionError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_distinguishes_not_found_from_failures() {
        let panel = Arc::new(FakePanel::with_inbounds(three_inbounds()));
        let engine = provisioner(&panel);
        engine.create(&request("alice", Expiry::Never)).await.unwrap();

        let result = engine.delete("ghost").await;
        assert!(matches!(result, Err(ProvisionError::NotFound(_))));

        let failing = Arc::new(
            FakePanel::with_inbounds(panel.list_inbounds().await.unwrap()).failing(&[1, 2, 3]),
        );
        match provisioner(&failing).delete("alice").await {
            Err(ProvisionError::AllFailed(warnings)) => assert_eq!(warnings.len(), 3),
            other => panic!("unexpected result: {other:?}"),
        }

        let report = engine.delete("alice").await.unwrap();
        assert_eq!(report.succeeded.len(), 3);
        let remaining: usize = panel
            .list_inbounds()
            .await
            .unwrap()
            .iter()
            .map(|inbound| inbound.settings_clients().len())
            .sum();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn expiry_conversion() {
        assert_eq!(Expiry::Never.expiry_time(NOW), 0);
        assert_eq!(Expiry::Days(1).expiry_time(NOW), NOW + 86_400_000);
    }
}
