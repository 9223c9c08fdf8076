//! Request identity.
//!
//! Authentication happens upstream; requests arrive carrying the caller's
//! user id in the `x-user-id` header. The extractor only confirms the id
//! belongs to a known user and loads its role.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use farmlink_shared::constants::USER_ID_HEADER;
use farmlink_shared::{Identity, UserId};

use crate::api::AppState;
use crate::error::ServerError;
use crate::store::with_store;

/// The authenticated caller of a REST handler.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

impl CurrentUser {
    pub fn id(&self) -> &UserId {
        &self.0.id
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ServerError::Unauthorized("missing user id"))?;

        let id = UserId::new(raw);
        let user = with_store(&state.store, move |s| s.find_user(&id))
            .await?
            .ok_or(ServerError::Unauthorized("unknown user"))?;

        Ok(CurrentUser(Identity::from(user)))
    }
}
