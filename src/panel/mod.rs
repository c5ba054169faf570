//! Доступ к панели x-ui: сессионный клиент, список inbounds и операции над
//! клиентами.

mod client;
mod error;
mod models;

pub use client::PanelClient;
pub use error::PanelError;
pub use models::{ClientStat, Inbound, InboundClient, RemovalReport};
#[cfg(test)]
pub use models::InboundSettings;

use crate::aggregate::matches_member;
use async_trait::async_trait;
use models::AddClientRequest;
use reqwest::Method;

/// Операции над панелью, которыми пользуются движки провижининга и отчётов.
#[async_trait]
pub trait PanelApi: Send + Sync {
    async fn list_inbounds(&self) -> Result<Vec<Inbound>, PanelError>;

    async fn add_client(&self, inbound_id: i64, client: &InboundClient) -> Result<(), PanelError>;

    async fn delete_client(&self, inbound_id: i64, client_uuid: &str) -> Result<(), PanelError>;

    async fn reset_client_traffic(&self, inbound_id: i64, email: &str) -> Result<(), PanelError>;

    async fn online_clients(&self) -> Result<Vec<String>, PanelError>;

    /// Удаляет всех клиентов, чей идентификатор совпадает с одним из
    /// переданных (точно или по базовому имени). Если совпадений нет ни в
    /// одном inbound, ничего не удаляется и возвращается `NotFound`.
    async fn remove_clients(&self, identifiers: &[String]) -> Result<RemovalReport, PanelError> {
        let inbounds = self.list_inbounds().await?;
        let targets: Vec<(i64, InboundClient)> = inbounds
            .iter()
            .flat_map(|inbound| {
                inbound
                    .settings_clients()
                    .into_iter()
                    .filter(move |client| {
                        identifiers
                            .iter()
                            .any(|identifier| matches_member(&client.email, identifier))
                    })
                    .map(move |client| (inbound.id, client))
            })
            .collect();

        if targets.is_empty() {
            return Err(PanelError::NotFound(identifiers.join(", ")));
        }

        let mut report = RemovalReport::default();
        for (inbound_id, client) in targets {
            match self.delete_client(inbound_id, client.client_uuid()).await {
                Ok(()) => report.removed.push(client.email),
                Err(error) => {
                    tracing::warn!(
                        inbound_id,
                        email = %client.email,
                        error = %error,
                        "Failed to delete client"
                    );
                    report
                        .warnings
                        .push(format!("inbound {}: {}: {}", inbound_id, client.email, error));
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl PanelApi for PanelClient {
    async fn list_inbounds(&self) -> Result<Vec<Inbound>, PanelError> {
        let obj = self.call(Method::GET, &self.inbounds_path(""), None).await?;
        if obj.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(obj).map_err(|error| PanelError::Decode(error.to_string()))
    }

    async fn add_client(&self, inbound_id: i64, client: &InboundClient) -> Result<(), PanelError> {
        let request = AddClientRequest::new(inbound_id, client)
            .and_then(|request| serde_json::to_value(&request))
            .map_err(|error| PanelError::Decode(error.to_string()))?;
        self.call(Method::POST, &self.inbounds_path("addClient"), Some(&request))
            .await?;
        tracing::info!(inbound_id, email = %client.email, "Client added");
        Ok(())
    }

    async fn delete_client(&self, inbound_id: i64, client_uuid: &str) -> Result<(), PanelError> {
        let path = self.inbounds_path(&format!(
            "{}/delClient/{}",
            inbound_id,
            urlencoding::encode(client_uuid)
        ));
        self.call(Method::POST, &path, None).await?;
        tracing::info!(inbound_id, client_uuid, "Client deleted");
        Ok(())
    }

    async fn reset_client_traffic(&self, inbound_id: i64, email: &str) -> Result<(), PanelError> {
        let path = self.inbounds_path(&format!(
            "{}/resetClientTraffic/{}",
            inbound_id,
            urlencoding::encode(email)
        ));
        self.call(Method::POST, &path, None).await?;
        tracing::info!(inbound_id, email, "Client traffic reset");
        Ok(())
    }

    async fn online_clients(&self) -> Result<Vec<String>, PanelError> {
        let obj = self
            .call(Method::POST, &self.inbounds_path("onlines"), None)
            .await?;
        if obj.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(obj).map_err(|error| PanelError::Decode(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PanelConfig;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> PanelClient {
        PanelClient::new(&PanelConfig {
            base_url: server.base_url(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            accept_invalid_certs: false,
            retry_wait_secs: 0,
            ..PanelConfig::default()
        })
        .unwrap()
    }

    fn settings(clients: serde_json::Value) -> String {
        json!({ "clients": clients }).to_string()
    }

    #[tokio::test]
    async fn remove_clients_deletes_every_matching_record_by_uuid() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/login");
            then.status(200)
                .header("Set-Cookie", "session=abc")
                .json_body(json!({"success": true}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/xui/API/inbounds");
            then.status(200).json_body(json!({
                "success": true,
                "obj": [
                    {"id": 1, "enable": true, "settings": settings(json!([
                        {"id": "uuid-a1", "email": "alice-1"},
                        {"id": "uuid-b1", "email": "bob-1"}
                    ]))},
                    {"id": 2, "enable": false, "settings": settings(json!([
                        {"id": "uuid-a2", "email": "alice-2"}
                    ]))}
                ]
            }));
        });
        let first = server.mock(|when, then| {
            when.method(POST).path("/xui/API/inbounds/1/delClient/uuid-a1");
            then.status(200).json_body(json!({"success": true}));
        });
        let second = server.mock(|when, then| {
            when.method(POST).path("/xui/API/inbounds/2/delClient/uuid-a2");
            then.status(200)
                .json_body(json!({"success": false, "msg": "inbound locked"}));
        });

        let report = client_for(&server)
            .remove_clients(&["alice".to_string()])
            .await
            .unwrap();

        first.assert_hits(1);
        second.assert_hits(1);
        assert_eq!(report.removed, vec!["alice-1".to_string()]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("inbound locked"));
    }

    #[tokio::test]
    async fn remove_clients_without_match_sends_no_deletes() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/login");
            then.status(200)
                .header("Set-Cookie", "session=abc")
                .json_body(json!({"success": true}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/xui/API/inbounds");
            then.status(200).json_body(json!({
                "success": true,
                "obj": [{"id": 1, "settings": settings(json!([{"email": "bob-1"}]))}]
            }));
        });
        let delete = server.mock(|when, then| {
            when.method(POST).path_contains("/delClient/");
            then.status(200).json_body(json!({"success": true}));
        });

        let error = client_for(&server)
            .remove_clients(&["alice".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(error, PanelError::NotFound(_)));
        delete.assert_hits(0);
    }

    #[tokio::test]
    async fn add_client_posts_double_encoded_settings() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/login");
            then.status(200)
                .header("Set-Cookie", "session=abc")
                .json_body(json!({"success": true}));
        });
        let add = server.mock(|when, then| {
            when.method(POST)
                .path("/xui/API/inbounds/addClient")
                .body_contains("\"id\":4")
                .body_contains("\\\"email\\\":\\\"alice-1\\\"");
            then.status(200).json_body(json!({"success": true}));
        });

        let client = InboundClient::new_member("alice-1".into(), "sub".into(), 0, None);
        client_for(&server).add_client(4, &client).await.unwrap();
        add.assert_hits(1);
    }

    #[tokio::test]
    async fn online_clients_accepts_null_obj() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/login");
            then.status(200)
                .header("Set-Cookie", "session=abc")
                .json_body(json!({"success": true}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/xui/API/inbounds/onlines");
            then.status(200).json_body(json!({"success": true, "obj": null}));
        });

        let online = client_for(&server).online_clients().await.unwrap();
        assert!(online.is_empty());
    }
}
