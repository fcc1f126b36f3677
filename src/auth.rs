use std::time::Duration;

use axum::{RequestPartsExt, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    ServiceError, ServiceResult,
    app::AppState,
    config::CONFIG,
    jwt,
    player::PlayerUsername,
};

#[derive(Deserialize, Validate)]
pub struct RegisterPayload {
    #[validate(length(min = 3, max = 16))]
    pub username: PlayerUsername,
    #[validate(length(min = 8))]
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginPayload {
    pub username: PlayerUsername,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    pub refresh_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthBody {
    pub access_token: String,
    pub refresh_token: String,
}

/// Short-lived access tokens paired with opaque rotating refresh tokens.
/// Refresh tokens live in an expiring cache; presenting one consumes it.
pub struct AuthSessions {
    refresh_tokens: moka::sync::Cache<String, PlayerUsername>,
}

impl AuthSessions {
    pub fn new() -> Self {
        let ttl = Duration::from_secs(CONFIG.refresh_token_ttl_days * 24 * 60 * 60);
        Self {
            refresh_tokens: moka::sync::Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn issue(&self, username: &PlayerUsername) -> AuthBody {
        let refresh_token = Uuid::new_v4().to_string();
        self.refresh_tokens
            .insert(refresh_token.clone(), username.clone());
        AuthBody {
            access_token: jwt::generate_access_token(username),
            refresh_token,
        }
    }

    pub fn rotate(&self, refresh_token: &str) -> ServiceResult<AuthBody> {
        let Some(username) = self.refresh_tokens.remove(refresh_token) else {
            return ServiceError::unauthorized("Invalid or expired refresh token");
        };
        Ok(self.issue(&username))
    }
}

impl Default for AuthSessions {
    fn default() -> Self {
        Self::new()
    }
}

/// The authenticated caller, resolved from the bearer token. Handlers take
/// this to gate access; request bodies still name the acting players.
pub struct AuthUser {
    pub username: PlayerUsername,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        _app: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Ok(TypedHeader(Authorization(bearer))) =
            parts.extract::<TypedHeader<Authorization<Bearer>>>().await
        else {
            return ServiceError::unauthorized("Missing bearer token");
        };
        let Some(username) = jwt::validate_access_token(bearer.token()) else {
            return ServiceError::unauthorized("Invalid or expired token");
        };
        Ok(AuthUser { username })
    }
}
