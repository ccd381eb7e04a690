//! Authentication middleware.
//!
//! Resolves the `Authorization: Bearer` credential into a [`Session`] and
//! attaches it to the request as an extension. Two credential shapes are
//! accepted: HMAC-signed JWTs issued by the panel, and raw personal access
//! tokens looked up by their SHA-256 hash. A missing or unusable credential
//! yields an absent session; route-level gates decide whether that is fatal.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{PersonalAccessToken, User};
use crate::error::Result;
use crate::plugins::codec::{SessionSnapshot, TokenSnapshot, UserSnapshot};
use crate::repo::{AccessTokenRepository, UserRepository};

// ═══════════════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════════════

/// An authenticated caller: the user plus the personal access token the
/// request arrived with, when token auth was used.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: Option<PersonalAccessToken>,
}

impl Session {
    /// The guest-facing view with timestamps normalized to Unix seconds.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user: UserSnapshot {
                id: self.user.id,
                login: self.user.login.clone(),
                email: self.user.email.clone(),
                admin: self.user.admin,
            },
            token: self.token.as_ref().map(|token| TokenSnapshot {
                id: token.id,
                abilities: token.abilities.clone(),
                created_at: token.created_at.timestamp(),
                updated_at: token.updated_at.timestamp(),
                expires_at: token.expires_at.map(|at| at.timestamp()),
            }),
        }
    }
}

/// Request extension carrying the resolved session, if any.
#[derive(Debug, Clone, Default)]
pub struct SessionState(pub Option<Arc<Session>>);

// ═══════════════════════════════════════════════════════════════════════════════
// JWT claims
// ═══════════════════════════════════════════════════════════════════════════════

/// Panel-issued bearer token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: user id.
    pub sub: String,
    /// Token id for revocation tracking.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: i64, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Auth service
// ═══════════════════════════════════════════════════════════════════════════════

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn AccessTokenRepository>,
    encoding_key: Option<EncodingKey>,
    decoding_key: Option<DecodingKey>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn AccessTokenRepository>,
        jwt_secret: Option<&str>,
    ) -> Self {
        Self {
            users,
            tokens,
            encoding_key: jwt_secret.map(|s| EncodingKey::from_secret(s.as_bytes())),
            decoding_key: jwt_secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
        }
    }

    /// Issue a signed bearer JWT for a user.
    pub fn issue_jwt(&self, user_id: i64, lifetime: Duration) -> Result<String> {
        let key = self.encoding_key.as_ref().ok_or_else(|| {
            crate::error::GshubError::configuration("JWT secret is not configured")
        })?;
        let claims = Claims::new(user_id, lifetime);
        encode(&Header::default(), &claims, key)
            .map_err(|e| crate::error::GshubError::internal(e.to_string()))
    }

    /// Hex-encoded SHA-256 used to store and look up access tokens.
    pub fn hash_token(raw: &str) -> String {
        hex::encode(Sha256::digest(raw.as_bytes()))
    }

    /// Resolve a bearer credential into a session.
    ///
    /// Unusable credentials (bad signature, expired token, unknown user)
    /// resolve to `None`; only repository failures surface as errors.
    pub async fn authenticate_bearer(&self, bearer: &str) -> Result<Option<Session>> {
        // Compact JWS form: header.payload.signature
        if bearer.bytes().filter(|b| *b == b'.').count() == 2 {
            if let Some(key) = &self.decoding_key {
                match decode::<Claims>(bearer, key, &Validation::default()) {
                    Ok(data) => {
                        let Ok(user_id) = data.claims.sub.parse::<i64>() else {
                            return Ok(None);
                        };
                        return Ok(self
                            .users
                            .get(user_id)
                            .await?
                            .map(|user| Session { user, token: None }));
                    }
                    Err(e) => {
                        debug!(error = %e, "Bearer JWT rejected");
                        return Ok(None);
                    }
                }
            }
            return Ok(None);
        }

        let Some(token) = self.tokens.find_by_hash(&Self::hash_token(bearer)).await? else {
            return Ok(None);
        };
        if token.is_expired() {
            debug!(token = token.id, "Expired access token");
            return Ok(None);
        }

        let Some(user) = self.users.get(token.user_id).await? else {
            return Ok(None);
        };
        Ok(Some(Session {
            user,
            token: Some(token),
        }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Middleware
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolve the request's bearer credential and attach [`SessionState`].
pub async fn session_middleware(
    State(state): State<crate::api::AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let session = match bearer {
        Some(token) => state
            .auth
            .authenticate_bearer(token)
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "Session resolution failed");
                None
            }),
        None => None,
    };

    request
        .extensions_mut()
        .insert(SessionState(session.map(Arc::new)));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::{MemoryAccessTokenRepository, MemoryUserRepository};

    fn service(secret: Option<&str>) -> (AuthService, Arc<MemoryAccessTokenRepository>) {
        let users = Arc::new(MemoryUserRepository::default());
        users.insert(User {
            id: 1,
            login: "admin".into(),
            email: "admin@example.com".into(),
            name: None,
            admin: true,
        });
        let tokens = Arc::new(MemoryAccessTokenRepository::default());
        (AuthService::new(users, tokens.clone(), secret), tokens)
    }

    #[tokio::test]
    async fn test_jwt_roundtrip() {
        let (auth, _) = service(Some("secret"));
        let jwt = auth.issue_jwt(1, Duration::hours(1)).unwrap();

        let session = auth.authenticate_bearer(&jwt).await.unwrap().unwrap();
        assert_eq!(session.user.id, 1);
        assert!(session.token.is_none());
    }

    #[tokio::test]
    async fn test_bad_jwt_is_absent_session() {
        let (auth, _) = service(Some("secret"));
        let (other, _) = service(Some("other-secret"));
        let jwt = other.issue_jwt(1, Duration::hours(1)).unwrap();

        assert!(auth.authenticate_bearer(&jwt).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_access_token_auth() {
        let (auth, tokens) = service(None);
        tokens.insert(PersonalAccessToken {
            id: 10,
            user_id: 1,
            token_hash: AuthService::hash_token("raw-token"),
            abilities: vec!["servers:read".into()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: None,
        });

        let session = auth
            .authenticate_bearer("raw-token")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.user.id, 1);
        assert_eq!(session.token.as_ref().unwrap().id, 10);
    }

    #[tokio::test]
    async fn test_expired_access_token_rejected() {
        let (auth, tokens) = service(None);
        tokens.insert(PersonalAccessToken {
            id: 10,
            user_id: 1,
            token_hash: AuthService::hash_token("stale"),
            abilities: Vec::new(),
            created_at: Utc::now() - Duration::days(2),
            updated_at: Utc::now() - Duration::days(2),
            expires_at: Some(Utc::now() - Duration::days(1)),
        });

        assert!(auth.authenticate_bearer("stale").await.unwrap().is_none());
    }

    #[test]
    fn test_session_snapshot_unix_seconds() {
        let created = Utc::now();
        let session = Session {
            user: User {
                id: 1,
                login: "admin".into(),
                email: "admin@example.com".into(),
                name: None,
                admin: true,
            },
            token: Some(PersonalAccessToken {
                id: 10,
                user_id: 1,
                token_hash: String::new(),
                abilities: vec!["servers:read".into()],
                created_at: created,
                updated_at: created,
                expires_at: None,
            }),
        };

        let snapshot = session.snapshot();
        assert!(snapshot.user.admin);
        let token = snapshot.token.unwrap();
        assert_eq!(token.created_at, created.timestamp());
        assert_eq!(token.expires_at, None);
    }
}
