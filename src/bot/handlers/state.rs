use crate::config::Config;
use crate::conversation::{ConversationStore, Intent};
use crate::provision::Provisioner;
use crate::store::{StoreError, TrustStore};
use std::sync::Arc;
use teloxide::types::{Message, User};

#[derive(Clone)]
pub struct BotState {
    pub config: Arc<Config>,
    pub provisioner: Arc<Provisioner>,
    pub conversations: Arc<ConversationStore>,
    pub store: Arc<TrustStore>,
}

/// Уровень доступа отправителя.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTier {
    Admin,
    Trusted,
}

impl AccessTier {
    pub fn allows(self, intent: Intent) -> bool {
        match self {
            AccessTier::Admin => !matches!(intent, Intent::CreateAccount | Intent::RemoveAccount),
            AccessTier::Trusted => matches!(
                intent,
                Intent::CreateAccount
                    | Intent::RemoveAccount
                    | Intent::Help
                    | Intent::Confirm
                    | Intent::ReturnToIdle
            ),
        }
    }
}

pub fn sender_user_id(msg: &Message) -> Option<i64> {
    msg.from.as_ref().map(|user| user.id.0 as i64)
}

/// Админы из конфига важнее доверенных из хранилища.
pub async fn resolve_tier(state: &BotState, user: &User) -> Result<Option<AccessTier>, StoreError> {
    let user_id = user.id.0 as i64;
    if state.config.is_admin(user_id) {
        return Ok(Some(AccessTier::Admin));
    }
    let trusted = state
        .store
        .resolve_trusted(user_id, user.username.as_deref())
        .await?;
    Ok(trusted.then_some(AccessTier::Trusted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_tier_is_limited_to_own_accounts() {
        assert!(AccessTier::Trusted.allows(Intent::CreateAccount));
        assert!(AccessTier::Trusted.allows(Intent::ReturnToIdle));
        assert!(!AccessTier::Trusted.allows(Intent::AddMember));
        assert!(!AccessTier::Trusted.allows(Intent::NetworkUsage));
        assert!(!AccessTier::Trusted.allows(Intent::AddTrusted));
    }

    #[test]
    fn admin_tier_uses_member_management() {
        assert!(AccessTier::Admin.allows(Intent::AddMember));
        assert!(AccessTier::Admin.allows(Intent::RevokeTrusted));
        assert!(!AccessTier::Admin.allows(Intent::CreateAccount));
    }
}
