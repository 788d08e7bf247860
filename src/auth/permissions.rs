use std::fmt;

use crate::error::AppError;

use super::CurrentUser;

/// Mutations that only the owner of a resource may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerAction {
    AcceptAnswer,
}

impl fmt::Display for OwnerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerAction::AcceptAnswer => write!(f, "accept answers on this question"),
        }
    }
}

impl CurrentUser {
    pub fn owns(&self, owner_profile_id: i64) -> bool {
        self.profile.id == owner_profile_id
    }

    pub fn require_owner(&self, owner_profile_id: i64, action: OwnerAction) -> Result<(), AppError> {
        if self.owns(owner_profile_id) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.user.username,
                profile_id = self.profile.id,
                owner_profile_id,
                action = ?action,
                "Permission denied"
            );
            Err(AppError::Authorization(format!(
                "Only the owner may {}",
                action
            )))
        }
    }
}
