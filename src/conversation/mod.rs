//! Короткоживущее состояние диалогов: этап, одна строка полезной нагрузки и
//! TTL-хранилище по chat user id.

mod machine;
mod store;

pub use machine::{Effect, Step, step};
pub use store::ConversationStore;

/// Зачем участника выбирают из списка.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionPurpose {
    Edit,
    Delete,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stage {
    #[default]
    Idle,
    AwaitingUsername,
    AwaitingDuration,
    AwaitingSelection(SelectionPurpose),
    AwaitingAction,
    AwaitingExtendDuration,
    AwaitingResetConfirmation,
    AwaitingDeleteConfirmation,
    AwaitingTrustedUsername,
}

#[cfg(test)]
impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::Idle,
        Stage::AwaitingUsername,
        Stage::AwaitingDuration,
        Stage::AwaitingSelection(SelectionPurpose::Edit),
        Stage::AwaitingSelection(SelectionPurpose::Delete),
        Stage::AwaitingSelection(SelectionPurpose::Reset),
        Stage::AwaitingAction,
        Stage::AwaitingExtendDuration,
        Stage::AwaitingResetConfirmation,
        Stage::AwaitingDeleteConfirmation,
        Stage::AwaitingTrustedUsername,
    ];
}

/// Что пользователь имел в виду, нажав кнопку или набрав команду.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    ReturnToIdle,
    Confirm,
    Infinite,
    AddMember,
    EditMember,
    DeleteMember,
    OnlineMembers,
    NetworkUsage,
    DetailedUsage,
    ResetNetworkUsage,
    ViewConfig,
    ExtendDuration,
    ResetTraffic,
    Delete,
    AddTrusted,
    RevokeTrusted,
    CreateAccount,
    RemoveAccount,
    Help,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    pub stage: Stage,
    pub payload: Option<String>,
}

impl ConversationState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn at(stage: Stage) -> Self {
        Self {
            stage,
            payload: None,
        }
    }

    pub fn with_payload(stage: Stage, payload: impl Into<String>) -> Self {
        Self {
            stage,
            payload: Some(payload.into()),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }
}
