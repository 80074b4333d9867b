use tracing::warn;
use uuid::Uuid;

use crate::{db::Store, error::AppError, users::repo_types::{Role, User}};

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Resources that carry an owner reference in their `user` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Meme,
    Comment,
}

#[derive(Debug, Clone, Copy)]
pub enum Policy {
    /// Caller's role must be listed.
    Roles(&'static [Role]),
    /// Caller's role is listed, or the caller owns the target resource.
    OwnerOrRoles {
        roles: &'static [Role],
        resource: Resource,
    },
}

impl Policy {
    pub async fn authorize(
        &self,
        store: &Store,
        user: &User,
        target: Option<Uuid>,
    ) -> Result<(), AppError> {
        let roles = match self {
            Self::Roles(roles) | Self::OwnerOrRoles { roles, .. } => *roles,
        };
        if roles.contains(&user.role) {
            return Ok(());
        }
        let Self::OwnerOrRoles { resource, .. } = self else {
            warn!(user_id = %user.id, role = ?user.role, "role not permitted");
            return Err(AppError::forbidden());
        };
        let Some(id) = target else {
            return Err(AppError::forbidden());
        };
        let owner = match resource {
            Resource::Meme => store.memes.find_by_id(id).await?.map(|m| m.user),
            Resource::Comment => store.comments.find_by_id(id).await?.map(|c| c.user),
        }
        .ok_or_else(AppError::document_not_found)?;
        if owner != user.id {
            warn!(user_id = %user.id, target = %id, ?resource, "not the owner");
            return Err(AppError::forbidden());
        }
        Ok(())
    }
}
