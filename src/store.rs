//! JSON-хранилище доверенных пользователей и созданных ими VPN-аккаунтов.
//!
//! Каждое изменение применяется к копии, копия пишется во временный файл и
//! переименовывается поверх основного; только после этого она становится
//! текущим состоянием в памяти.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Ошибка ввода-вывода хранилища {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Некорректный JSON хранилища: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Достигнут лимит аккаунтов: {0}")]
    QuotaExceeded(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedUser {
    /// Неизвестен, пока пользователь не написал боту.
    #[serde(default)]
    pub telegram_id: Option<i64>,
    pub username: String,
    pub added_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnAccount {
    pub id: i64,
    pub username: String,
    pub added_by: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    trusted_users: Vec<TrustedUser>,
    #[serde(default)]
    vpn_accounts: Vec<VpnAccount>,
    #[serde(default = "first_id")]
    next_id: i64,
}

fn first_id() -> i64 {
    1
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            trusted_users: Vec::new(),
            vpn_accounts: Vec::new(),
            next_id: first_id(),
        }
    }
}

fn normalize_username(username: &str) -> String {
    username.trim().trim_start_matches('@').to_lowercase()
}

pub struct TrustStore {
    path: PathBuf,
    data: RwLock<StoreData>,
    max_accounts: usize,
}

impl TrustStore {
    pub async fn open(path: &Path, max_accounts: usize) -> Result<Self, StoreError> {
        let io_error = |source: std::io::Error| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let data = match tokio::fs::read(path).await {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => StoreData::default(),
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(error) => return Err(io_error(error)),
        };
        tracing::info!(
            path = %path.display(),
            trusted_users = data.trusted_users.len(),
            vpn_accounts = data.vpn_accounts.len(),
            "Trust store loaded"
        );

        Ok(Self {
            path: path.to_path_buf(),
            data: RwLock::new(data),
            max_accounts,
        })
    }

    pub fn max_accounts(&self) -> usize {
        self.max_accounts
    }

    async fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        let io_error = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let raw = serde_json::to_vec_pretty(data)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, raw).await.map_err(io_error)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_error)?;
        Ok(())
    }

    /// Применяет изменение к копии, сохраняет её и только потом заменяет
    /// состояние в памяти.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut StoreData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.data.write().await;
        let mut draft = guard.clone();
        let result = change(&mut draft)?;
        self.persist(&draft).await?;
        *guard = draft;
        Ok(result)
    }

    pub async fn is_trusted(&self, telegram_id: i64) -> bool {
        self.data
            .read()
            .await
            .trusted_users
            .iter()
            .any(|user| user.telegram_id == Some(telegram_id))
    }

    /// Проверяет доверие по id, а при первом обращении по @username и
    /// запоминает id.
    pub async fn resolve_trusted(
        &self,
        telegram_id: i64,
        username: Option<&str>,
    ) -> Result<bool, StoreError> {
        if self.is_trusted(telegram_id).await {
            return Ok(true);
        }
        let Some(username) = username.map(normalize_username) else {
            return Ok(false);
        };
        let known = self
            .data
            .read()
            .await
            .trusted_users
            .iter()
            .any(|user| normalize_username(&user.username) == username);
        if !known {
            return Ok(false);
        }

        self.mutate(|data| {
            if let Some(user) = data
                .trusted_users
                .iter_mut()
                .find(|user| normalize_username(&user.username) == username)
            {
                user.telegram_id = Some(telegram_id);
            }
            Ok(())
        })
        .await?;
        tracing::info!(telegram_id, username = %username, "Trusted user bound to chat id");
        Ok(true)
    }

    /// `false`, если такой пользователь уже есть.
    pub async fn add_trusted(&self, username: &str, added_at: i64) -> Result<bool, StoreError> {
        let username = normalize_username(username);
        self.mutate(|data| {
            if data
                .trusted_users
                .iter()
                .any(|user| normalize_username(&user.username) == username)
            {
                return Ok(false);
            }
            data.trusted_users.push(TrustedUser {
                telegram_id: None,
                username: username.clone(),
                added_at,
            });
            Ok(true)
        })
        .await
    }

    pub async fn remove_trusted(&self, username: &str) -> Result<bool, StoreError> {
        let username = normalize_username(username);
        self.mutate(|data| {
            let before = data.trusted_users.len();
            data.trusted_users
                .retain(|user| normalize_username(&user.username) != username);
            Ok(data.trusted_users.len() != before)
        })
        .await
    }

    pub async fn trusted_users(&self) -> Vec<TrustedUser> {
        self.data.read().await.trusted_users.clone()
    }

    pub async fn accounts_of(&self, owner: i64) -> Vec<VpnAccount> {
        self.data
            .read()
            .await
            .vpn_accounts
            .iter()
            .filter(|account| account.added_by == owner)
            .cloned()
            .collect()
    }

    pub async fn account_count(&self, owner: i64) -> usize {
        self.accounts_of(owner).await.len()
    }

    pub async fn add_vpn_account(
        &self,
        username: &str,
        owner: i64,
        created_at: i64,
    ) -> Result<VpnAccount, StoreError> {
        let max_accounts = self.max_accounts;
        self.mutate(|data| {
            let owned = data
                .vpn_accounts
                .iter()
                .filter(|account| account.added_by == owner)
                .count();
            if owned >= max_accounts {
                return Err(StoreError::QuotaExceeded(max_accounts));
            }
            let account = VpnAccount {
                id: data.next_id,
                username: username.to_string(),
                added_by: owner,
                created_at,
            };
            data.next_id += 1;
            data.vpn_accounts.push(account.clone());
            Ok(account)
        })
        .await
    }

    /// Удаляет аккаунт, только если он принадлежит `owner`.
    pub async fn remove_vpn_account(
        &self,
        id: i64,
        owner: i64,
    ) -> Result<Option<VpnAccount>, StoreError> {
        self.mutate(|data| {
            let position = data
                .vpn_accounts
                .iter()
                .position(|account| account.id == id && account.added_by == owner);
            Ok(position.map(|index| data.vpn_accounts.remove(index)))
        })
        .await
    }

    pub async fn account(&self, id: i64, owner: i64) -> Option<VpnAccount> {
        self.accounts_of(owner)
            .await
            .into_iter()
            .find(|account| account.id == id)
    }
}
