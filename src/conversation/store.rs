use super::ConversationState;
use crate::clock::Clock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct Entry {
    state: ConversationState,
    updated_at: DateTime<Utc>,
}

/// Состояния диалогов по chat user id. Запись живёт `ttl` с момента последней
/// записи; чтение срок не продлевает.
pub struct ConversationStore {
    entries: Mutex<HashMap<i64, Entry>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl ConversationStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    fn is_expired(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        now - entry.updated_at >= self.ttl
    }

    pub async fn get(&self, user_id: i64) -> ConversationState {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.get(&user_id) {
            Some(entry) if !self.is_expired(entry, now) => entry.state.clone(),
            Some(_) => {
                entries.remove(&user_id);
                ConversationState::idle()
            }
            None => ConversationState::idle(),
        }
    }

    /// Idle не хранится: запись просто удаляется.
    pub async fn set(&self, user_id: i64, state: ConversationState) {
        let mut entries = self.entries.lock().await;
        if state.is_idle() {
            entries.remove(&user_id);
            return;
        }
        entries.insert(
            user_id,
            Entry {
                state,
                updated_at: self.clock.now(),
            },
        );
    }

    pub async fn clear(&self, user_id: i64) {
        self.entries.lock().await.remove(&user_id);
    }

    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before - entries.len()
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep().await;
                if removed > 0 {
                    tracing::debug!(removed, "Expired conversation states swept");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::conversation::{SelectionPurpose, Stage};

    const MINUTE: Duration = Duration::from_secs(60);

    fn store_with_clock() -> (ConversationStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        (ConversationStore::new(30 * MINUTE, clock.clone()), clock)
    }

    #[tokio::test]
    async fn unknown_user_starts_idle() {
        let (store, _) = store_with_clock();
        assert_eq!(store.get(1).await, ConversationState::idle());
    }

    #[tokio::test]
    async fn state_expires_after_idle_period() {
        let (store, clock) = store_with_clock();
        let state = ConversationState::with_payload(Stage::AwaitingDuration, "alice");
        store.set(1, state.clone()).await;

        clock.advance(29 * MINUTE);
        assert_eq!(store.get(1).await, state);

        clock.advance(MINUTE);
        assert_eq!(store.get(1).await, ConversationState::idle());
    }

    #[tokio::test]
    async fn reads_do_not_extend_lifetime_but_writes_do() {
        let (store, clock) = store_with_clock();
        let state = ConversationState::at(Stage::AwaitingUsername);
        store.set(1, state.clone()).await;

        clock.advance(20 * MINUTE);
        store.get(1).await;
        store.set(1, state.clone()).await;
        clock.advance(20 * MINUTE);
        assert_eq!(store.get(1).await, state);

        clock.advance(10 * MINUTE);
        assert!(store.get(1).await.is_idle());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let (store, clock) = store_with_clock();
        store
            .set(1, ConversationState::at(Stage::AwaitingSelection(SelectionPurpose::Edit)))
            .await;
        clock.advance(25 * MINUTE);
        store.set(2, ConversationState::at(Stage::AwaitingUsername)).await;
        clock.advance(10 * MINUTE);

        assert_eq!(store.sweep().await, 1);
        assert!(store.get(1).await.is_idle());
        assert_eq!(store.get(2).await.stage, Stage::AwaitingUsername);
    }

    #[tokio::test]
    async fn idle_and_clear_remove_entries() {
        let (store, _) = store_with_clock();
        store.set(1, ConversationState::at(Stage::AwaitingUsername)).await;
        store.set(1, ConversationState::idle()).await;
        store.set(2, ConversationState::at(Stage::AwaitingUsername)).await;
        store.clear(2).await;
        assert_eq!(store.sweep().await, 0);
        assert!(store.get(2).await.is_idle());
    }

    #[tokio::test]
    async fn second_dialogue_overwrites_the_first() {
        let (store, _) = store_with_clock();
        store
            .set(1, ConversationState::with_payload(Stage::AwaitingDuration, "alice"))
            .await;
        store
            .set(1, ConversationState::with_payload(Stage::AwaitingAction, "bob"))
            .await;
        assert_eq!(
            store.get(1).await,
            ConversationState::with_payload(Stage::AwaitingAction, "bob")
        );
    }
}
