//! Request authentication: the acting user is named by the `x-user-email`
//! header (the panel sits behind an authenticating proxy) and resolved
//! against the user table. Inactive accounts are refused.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use dockyard_common::{Actor, DockyardError};

use crate::error::ApiError;
use crate::AppState;

pub const USER_HEADER: &str = "x-user-email";

/// Extractor for the authenticated actor.
pub struct CurrentUser(pub Actor);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let email = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError(DockyardError::AccessDenied))?;

        let user = state
            .store
            .user_by_email(email)
            .await
            .map_err(DockyardError::from)?
            .ok_or(ApiError(DockyardError::AccessDenied))?;

        if !user.is_active {
            return Err(ApiError(DockyardError::AccessDenied));
        }

        Ok(CurrentUser(Actor {
            user_id: user.id,
            is_admin: user.is_admin,
        }))
    }
}
