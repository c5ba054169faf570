//! Проводные структуры REST API панели.

use serde::{Deserialize, Deserializer, Serialize};

/// Обёртка `{success, msg, obj}` вокруг каждого ответа.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub obj: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    pub id: i64,
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub client_stats: Vec<ClientStat>,
    #[serde(default)]
    pub listen: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub protocol: String,
    /// JSON-строка с `{clients: [...]}` внутри JSON-ответа.
    #[serde(default)]
    pub settings: String,
}

/// Счётчики трафика одного клиента в одном inbound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStat {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub inbound_id: i64,
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub reset: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundSettings {
    #[serde(default, deserialize_with = "null_as_default")]
    pub clients: Vec<InboundClient>,
}

/// Запись клиента из `settings` inbound'а.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundClient {
    #[serde(default, deserialize_with = "flexible_string")]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default = "enabled_by_default")]
    pub enable: bool,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default, deserialize_with = "flexible_string")]
    pub sub_id: String,
    #[serde(default, deserialize_with = "flexible_string")]
    pub tg_id: String,
    #[serde(rename = "totalGB", default)]
    pub total_gb: i64,
    #[serde(default)]
    pub limit_ip: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl Inbound {
    /// Второй этап разбора: `settings` как JSON. Битые или пустые настройки
    /// означают, что inbound не даёт данных о клиентах.
    pub fn parse_settings(&self) -> Option<InboundSettings> {
        if self.settings.trim().is_empty() {
            return None;
        }
        match serde_json::from_str::<InboundSettings>(&self.settings) {
            Ok(settings) => Some(settings),
            Err(error) => {
                tracing::warn!(
                    inbound_id = self.id,
                    remark = %self.remark,
                    error = %error,
                    "Failed to parse inbound settings"
                );
                None
            }
        }
    }

    pub fn settings_clients(&self) -> Vec<InboundClient> {
        self.parse_settings()
            .map(|settings| settings.clients)
            .unwrap_or_default()
    }

    /// Подпись inbound'а для отчётов.
    pub fn label(&self) -> String {
        if self.remark.trim().is_empty() {
            format!("#{}", self.id)
        } else {
            self.remark.clone()
        }
    }
}

impl InboundClient {
    /// UUID для удаления: `id`, затем `subId`, затем email.
    pub fn client_uuid(&self) -> &str {
        [self.id.as_str(), self.sub_id.as_str()]
            .into_iter()
            .find(|value| !value.is_empty())
            .unwrap_or(self.email.as_str())
    }

    pub fn new_member(email: String, sub_id: String, expiry_time: i64, owner: Option<i64>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            enable: true,
            expiry_time,
            sub_id,
            tg_id: owner.map(|id| id.to_string()).unwrap_or_default(),
            total_gb: 0,
            limit_ip: 0,
            flow: None,
        }
    }
}

/// Тело `addClient`: настройки снова упакованы в JSON-строку.
#[derive(Debug, Serialize)]
pub struct AddClientRequest {
    pub id: i64,
    pub settings: String,
}

impl AddClientRequest {
    pub fn new(inbound_id: i64, client: &InboundClient) -> Result<Self, serde_json::Error> {
        let settings = InboundSettings {
            clients: vec![client.clone()],
        };
        Ok(Self {
            id: inbound_id,
            settings: serde_json::to_string(&settings)?,
        })
    }
}

/// Итог массового удаления по списку идентификаторов.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub removed: Vec<String>,
    pub warnings: Vec<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Разные версии панели отдают `tgId`/`subId` строкой или числом.
fn flexible_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(value) => value,
        other => other.to_string(),
    })
}
