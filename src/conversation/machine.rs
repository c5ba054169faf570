//! Переходы диалога. Функция `step` чистая: по текущему состоянию и вводу
//! возвращает следующее состояние и действие, которое должен выполнить бот.

use super::{ConversationState, Intent, SelectionPurpose, Stage};
use crate::provision::Expiry;
use thiserror::Error;

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 32;
pub const MAX_DURATION_DAYS: u32 = 3650;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Имя должно быть длиной от 3 до 32 символов")]
    UsernameLength,
    #[error("Имя может содержать только латинские буквы, цифры и _")]
    UsernameCharacters,
    #[error("Укажите число дней от 1 до 3650")]
    Duration,
    #[error("Укажите имя пользователя Telegram в формате @username")]
    TrustedUsername,
}

pub fn validate_username(raw: &str) -> Result<String, InputError> {
    let username = raw.trim();
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(InputError::UsernameLength);
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(InputError::UsernameCharacters);
    }
    Ok(username.to_string())
}

pub fn parse_days(raw: &str) -> Result<u32, InputError> {
    match raw.trim().parse::<u32>() {
        Ok(days) if (1..=MAX_DURATION_DAYS).contains(&days) => Ok(days),
        _ => Err(InputError::Duration),
    }
}

fn parse_trusted_username(raw: &str) -> Result<String, InputError> {
    let username = raw
        .trim()
        .strip_prefix('@')
        .ok_or(InputError::TrustedUsername)?;
    if username.is_empty() || !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(InputError::TrustedUsername);
    }
    Ok(username.to_string())
}

/// Действие, которое бот выполняет после перехода.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ShowMenu,
    Dispatch(Intent),
    AskUsername,
    AskDuration { username: String },
    Create { username: String, expiry: Expiry },
    ShowMembers(SelectionPurpose),
    ShowActions { member: String },
    ViewConfig { member: String },
    AskExtendDays { member: String },
    Extend { member: String, days: u32 },
    ConfirmReset { member: String },
    ResetTraffic { member: String },
    ConfirmDelete { target: String },
    Delete { target: String },
    AskTrustedUsername,
    AddTrusted { username: String },
    Invalid(InputError),
    ConfirmationRequired,
    UnknownAction,
    MissingPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub next: ConversationState,
    pub effect: Effect,
}

impl Step {
    fn to(next: ConversationState, effect: Effect) -> Self {
        Self { next, effect }
    }

    fn idle(effect: Effect) -> Self {
        Self::to(ConversationState::idle(), effect)
    }

    fn stay(state: &ConversationState, effect: Effect) -> Self {
        Self::to(state.clone(), effect)
    }
}

pub fn step(state: &ConversationState, text: &str, intent: Option<Intent>) -> Step {
    if intent == Some(Intent::ReturnToIdle) {
        return Step::idle(Effect::ShowMenu);
    }

    match state.stage {
        Stage::Idle => from_idle(intent),
        Stage::AwaitingUsername => match validate_username(text) {
            Ok(username) => Step::to(
                ConversationState::with_payload(Stage::AwaitingDuration, username.clone()),
                Effect::AskDuration { username },
            ),
            Err(error) => Step::stay(state, Effect::Invalid(error)),
        },
        Stage::AwaitingDuration => {
            let Some(username) = state.payload.clone() else {
                return Step::idle(Effect::MissingPayload);
            };
            if intent == Some(Intent::Infinite) {
                return Step::idle(Effect::Create {
                    username,
                    expiry: Expiry::Never,
                });
            }
            match parse_days(text) {
                Ok(days) => Step::idle(Effect::Create {
                    username,
                    expiry: Expiry::Days(days),
                }),
                Err(error) => Step::stay(state, Effect::Invalid(error)),
            }
        }
        Stage::AwaitingSelection(purpose) => {
            let member = text.trim();
            if member.is_empty() || intent.is_some() {
                return Step::stay(state, Effect::ShowMembers(purpose));
            }
            let member = member.to_string();
            match purpose {
                SelectionPurpose::Edit => Step::to(
                    ConversationState::with_payload(Stage::AwaitingAction, member.clone()),
                    Effect::ShowActions { member },
                ),
                SelectionPurpose::Delete => Step::to(
                    ConversationState::with_payload(
                        Stage::AwaitingDeleteConfirmation,
                        member.clone(),
                    ),
                    Effect::ConfirmDelete { target: member },
                ),
                SelectionPurpose::Reset => Step::to(
                    ConversationState::with_payload(Stage::AwaitingResetConfirmation, member.clone()),
                    Effect::ConfirmReset { member },
                ),
            }
        }
        Stage::AwaitingAction => {
            let Some(member) = state.payload.clone() else {
                return Step::idle(Effect::MissingPayload);
            };
            match intent {
                Some(Intent::ViewConfig) => Step::stay(state, Effect::ViewConfig { member }),
                Some(Intent::ExtendDuration) => Step::to(
                    ConversationState::with_payload(Stage::AwaitingExtendDuration, member.clone()),
                    Effect::AskExtendDays { member },
                ),
                Some(Intent::ResetTraffic) => Step::to(
                    ConversationState::with_payload(Stage::AwaitingResetConfirmation, member.clone()),
                    Effect::ConfirmReset { member },
                ),
                Some(Intent::Delete) => Step::to(
                    ConversationState::with_payload(
                        Stage::AwaitingDeleteConfirmation,
                        member.clone(),
                    ),
                    Effect::ConfirmDelete { target: member },
                ),
                _ => Step::stay(state, Effect::UnknownAction),
            }
        }
        Stage::AwaitingExtendDuration => {
            let Some(member) = state.payload.clone() else {
                return Step::idle(Effect::MissingPayload);
            };
            match parse_days(text) {
                Ok(days) => Step::idle(Effect::Extend { member, days }),
                Err(error) => Step::stay(state, Effect::Invalid(error)),
            }
        }
        Stage::AwaitingResetConfirmation => {
            let Some(member) = state.payload.clone() else {
                return Step::idle(Effect::MissingPayload);
            };
            if intent == Some(Intent::Confirm) {
                Step::idle(Effect::ResetTraffic { member })
            } else {
                Step::stay(state, Effect::ConfirmationRequired)
            }
        }
        Stage::AwaitingDeleteConfirmation => {
            let Some(target) = state.payload.clone() else {
                return Step::idle(Effect::MissingPayload);
            };
            if intent == Some(Intent::Confirm) {
                Step::idle(Effect::Delete { target })
            } else {
                Step::stay(state, Effect::ConfirmationRequired)
            }
        }
        Stage::AwaitingTrustedUsername => match parse_trusted_username(text) {
            Ok(username) => Step::idle(Effect::AddTrusted { username }),
            Err(error) => Step::stay(state, Effect::Invalid(error)),
        },
    }
}

fn from_idle(intent: Option<Intent>) -> Step {
    match intent {
        Some(Intent::AddMember) => Step::to(
            ConversationState::at(Stage::AwaitingUsername),
            Effect::AskUsername,
        ),
        Some(Intent::EditMember) => select(SelectionPurpose::Edit),
        Some(Intent::DeleteMember) => select(SelectionPurpose::Delete),
        Some(Intent::ResetNetworkUsage) => select(SelectionPurpose::Reset),
        Some(Intent::AddTrusted) => Step::to(
            ConversationState::at(Stage::AwaitingTrustedUsername),
            Effect::AskTrustedUsername,
        ),
        Some(intent) => Step::idle(Effect::Dispatch(intent)),
        None => Step::idle(Effect::ShowMenu),
    }
}

fn select(purpose: SelectionPurpose) -> Step {
    Step::to(
        ConversationState::at(Stage::AwaitingSelection(purpose)),
        Effect::ShowMembers(purpose),
    )
}
