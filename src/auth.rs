//! Identity boundary.
//!
//! Authentication happens upstream. Handlers only read the identity it
//! left behind: a [`VerifiedUser`] request extension, a bearer token signed
//! by the auth service, or the `user_id` key of the session. When the
//! identity carries a username and email, the profile is mirrored into the
//! store so polls and comments can show their authors.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use uuid::Uuid;

use crate::db::User;
use crate::error::PollError;
use crate::startup::AppState;

pub const SESSION_USER_KEY: &str = "user_id";

/// Identity installed on the request by an upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub id: Uuid,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl VerifiedUser {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            username: None,
            email: None,
        }
    }

    pub fn with_profile(id: Uuid, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            username: Some(username.into()),
            email: Some(email.into()),
        }
    }

    fn profile(&self) -> Option<User> {
        match (&self.username, &self.email) {
            (Some(username), Some(email)) => Some(User {
                id: self.id,
                username: username.clone(),
                email: email.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: Uuid,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Checks HS256 bearer tokens. Installed as a request extension only when a
/// secret is configured.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedUser, PollError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| VerifiedUser {
                id: data.claims.id,
                username: data.claims.username,
                email: data.claims.email,
            })
            .map_err(|e| {
                debug!("rejected bearer token: {}", e);
                PollError::Unauthorized
            })
    }
}

/// The authenticated caller. Rejects with 401 when no identity is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = PollError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let identity = identify(parts, state).await?;

        let store = parts.extensions.get::<AppState>().map(|s| s.store.clone());
        if let (Some(profile), Some(store)) = (identity.profile(), store) {
            // a stale or failed mirror only affects display names
            match store.get_user(profile.id).await {
                Ok(Some(known)) if known == profile => {}
                _ => {
                    if let Err(e) = store.upsert_user(profile).await {
                        warn!(user_id = %identity.id, "failed to record user profile: {}", e);
                    }
                }
            }
        }

        Ok(AuthUser(identity.id))
    }
}

async fn identify<S>(parts: &mut Parts, state: &S) -> Result<VerifiedUser, PollError>
where
    S: Send + Sync,
{
    if let Some(user) = parts.extensions.get::<VerifiedUser>() {
        return Ok(user.clone());
    }

    let bearer = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if let (Some(token), Some(verifier)) = (bearer, parts.extensions.get::<TokenVerifier>()) {
        return verifier.verify(token.trim());
    }

    let session = Session::from_request_parts(parts, state)
        .await
        .map_err(|_| PollError::Unauthorized)?;
    get_user_id_from_session(&session).await.map(VerifiedUser::new)
}

async fn get_user_id_from_session(session: &Session) -> Result<Uuid, PollError> {
    session
        .get::<Uuid>(SESSION_USER_KEY)
        .await
        .map_err(|_| PollError::Unauthorized)?
        .ok_or(PollError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryPollStore, SharedStore};
    use axum::http::Request;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use std::sync::Arc;
    use std::time::Duration;

    const SECRET: &str = "test-secret";

    fn token(user_id: Uuid, secret: &str) -> String {
        signed(
            Claims {
                id: user_id,
                exp: chrono::Utc::now().timestamp() as usize + 3600,
                username: None,
                email: None,
            },
            secret,
        )
    }

    fn signed(claims: Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn reads_the_verified_extension() {
        let user_id = Uuid::new_v4();
        let (mut parts, _) = Request::builder()
            .extension(VerifiedUser::new(user_id))
            .body(())
            .unwrap()
            .into_parts();

        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user, AuthUser(user_id));
    }

    #[tokio::test]
    async fn accepts_signed_bearer_tokens() {
        let user_id = Uuid::new_v4();
        let (mut parts, _) = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {}", token(user_id, SECRET)))
            .extension(TokenVerifier::new(SECRET))
            .body(())
            .unwrap()
            .into_parts();

        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user, AuthUser(user_id));
    }

    #[tokio::test]
    async fn rejects_tokens_signed_with_another_secret() {
        let (mut parts, _) = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {}", token(Uuid::new_v4(), "other")))
            .extension(TokenVerifier::new(SECRET))
            .body(())
            .unwrap()
            .into_parts();

        let result = AuthUser::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(PollError::Unauthorized)));
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();

        let result = AuthUser::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(PollError::Unauthorized)));
    }

    #[tokio::test]
    async fn token_profiles_are_mirrored_into_the_store() {
        let store: SharedStore = Arc::new(MemoryPollStore::new());
        let state = AppState::new(store.clone(), 16, 16, Duration::from_secs(30));
        let user_id = Uuid::new_v4();
        let claims = Claims {
            id: user_id,
            exp: chrono::Utc::now().timestamp() as usize + 3600,
            username: Some("ada".to_string()),
            email: Some("ada@example.com".to_string()),
        };
        let (mut parts, _) = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {}", signed(claims, SECRET)))
            .extension(TokenVerifier::new(SECRET))
            .extension(state)
            .body(())
            .unwrap()
            .into_parts();

        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user, AuthUser(user_id));

        let profile = store.get_user(user_id).await.unwrap().unwrap();
        assert_eq!(profile.username, "ada");
        assert_eq!(profile.email, "ada@example.com");
    }

    #[tokio::test]
    async fn bare_identities_leave_profiles_alone() {
        let store: SharedStore = Arc::new(MemoryPollStore::new());
        let state = AppState::new(store.clone(), 16, 16, Duration::from_secs(30));
        let user_id = Uuid::new_v4();
        let (mut parts, _) = Request::builder()
            .extension(VerifiedUser::new(user_id))
            .extension(state)
            .body(())
            .unwrap()
            .into_parts();

        AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(store.get_user(user_id).await.unwrap().is_none());
    }
}
