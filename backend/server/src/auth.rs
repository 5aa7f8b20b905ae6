//! # Auth
//!
//! Passwords are Argon2id PHC strings. Sessions are Redis keys with a TTL;
//! JWTs reference their session through `sid`, so deleting the session kills
//! every token issued for it. Logged-out access tokens are blacklisted by
//! `jti` until they would have expired anyway.
use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use models::{Role, User, payloads::TokenPair};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, state::State};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub sid: Uuid,
    pub jti: Uuid,
    pub typ: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    /// Seconds until expiry, at least one so blacklist entries always get a TTL.
    pub fn remaining_secs(&self) -> u64 {
        (self.exp - Utc::now().timestamp()).max(1) as u64
    }
}

fn internal(message: impl ToString) -> AppError {
    AppError::InternalError(message.to_string().into())
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(internal)?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(internal)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(internal)
    }

    pub fn issue(
        &self,
        user: &User,
        session_id: Uuid,
        kind: TokenKind,
        ttl_secs: u64,
    ) -> Result<String, AppError> {
        let now = Utc::now().timestamp();

        self.encode(&Claims {
            sub: user.id,
            role: user.role,
            sid: session_id,
            jti: Uuid::new_v4(),
            typ: kind,
            iat: now,
            exp: now + ttl_secs as i64,
        })
    }

    /// Any signature, expiry or type mismatch is a plain 401.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, AppError> {
        let claims = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|_| AppError::Unauthorized)?
            .claims;

        if claims.typ != kind {
            return Err(AppError::Unauthorized);
        }

        Ok(claims)
    }
}

/// Opens a session and issues its first token pair.
pub async fn start_session(state: &State, user: &User) -> Result<TokenPair, AppError> {
    let session_id = Uuid::new_v4();
    state
        .db
        .create_session(session_id, user.id, state.config.refresh_ttl_secs)
        .await?;

    issue_pair(state, user, session_id)
}

pub fn issue_pair(state: &State, user: &User, session_id: Uuid) -> Result<TokenPair, AppError> {
    let config = &state.config;

    Ok(TokenPair {
        access_token: state.jwt.issue(
            user,
            session_id,
            TokenKind::Access,
            config.access_ttl_secs,
        )?,
        refresh_token: state.jwt.issue(
            user,
            session_id,
            TokenKind::Refresh,
            config.refresh_ttl_secs,
        )?,
        expires_in: config.access_ttl_secs,
    })
}

/// Claims of a token that is still honoured: valid signature, not
/// blacklisted, session alive and owned by the subject.
pub async fn check_token(state: &State, token: &str, kind: TokenKind) -> Result<Claims, AppError> {
    let claims = state.jwt.verify(token, kind)?;

    if state.db.is_blacklisted(claims.jti).await? {
        return Err(AppError::Unauthorized);
    }

    match state.db.session_user(claims.sid).await? {
        Some(user_id) if user_id == claims.sub => Ok(claims),
        _ => Err(AppError::Unauthorized),
    }
}

fn bearer(parts: &Parts) -> Result<&str, AppError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AppError::Unauthorized)
}

/// The caller of an authenticated route.
pub struct AuthUser {
    pub user: User,
    pub claims: Claims,
}

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn is_moderator(&self) -> bool {
        self.user.role.is_moderator()
    }

    pub fn require_moderator(&self) -> Result<(), AppError> {
        if self.is_moderator() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.user.role.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    /// Authors manage their own records, moderators manage everything.
    pub fn require_owner(&self, owner_id: Uuid) -> Result<(), AppError> {
        if self.user.id == owner_id || self.is_moderator() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }
}

impl FromRequestParts<Arc<State>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<State>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)?;
        let claims = check_token(state, token, TokenKind::Access).await?;

        let user = state
            .db
            .get_user(claims.sub)
            .await?
            .ok_or(AppError::Unauthorized)?;
        if user.banned {
            return Err(AppError::Forbidden);
        }

        Ok(Self { user, claims })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "ops@unit.mil".to_string(),
            username: "ops".to_string(),
            full_name: "Ops".to_string(),
            password_hash: String::new(),
            role: Role::Moderator,
            organization: None,
            bio: None,
            reputation: 0,
            banned: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hover4ever").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hover4ever", &hash));
        assert!(!verify_password("hover5ever", &hash));
        assert!(!verify_password("hover4ever", "not a phc string"));
    }

    #[test]
    fn salts_differ() {
        assert_ne!(
            hash_password("hover4ever").unwrap(),
            hash_password("hover4ever").unwrap()
        );
    }

    #[test]
    fn token_round_trip() {
        let keys = JwtKeys::new("test-secret");
        let user = user();
        let session = Uuid::new_v4();

        let token = keys.issue(&user, session, TokenKind::Access, 60).unwrap();
        let claims = keys.verify(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.sid, session);
        assert_eq!(claims.role, Role::Moderator);
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let keys = JwtKeys::new("test-secret");
        let token = keys
            .issue(&user(), Uuid::new_v4(), TokenKind::Refresh, 60)
            .unwrap();
        assert!(matches!(
            keys.verify(&token, TokenKind::Access),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let token = JwtKeys::new("one")
            .issue(&user(), Uuid::new_v4(), TokenKind::Access, 60)
            .unwrap();
        assert!(JwtKeys::new("two").verify(&token, TokenKind::Access).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = JwtKeys::new("test-secret");
        let now = Utc::now().timestamp();
        let token = keys
            .encode(&Claims {
                sub: Uuid::new_v4(),
                role: Role::User,
                sid: Uuid::new_v4(),
                jti: Uuid::new_v4(),
                typ: TokenKind::Access,
                iat: now - 120,
                exp: now - 60,
            })
            .unwrap();
        assert!(keys.verify(&token, TokenKind::Access).is_err());
    }

    #[test]
    fn bearer_parsing() {
        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, "Bearer abc.def.ghi")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer(&parts).unwrap(), "abc.def.ghi");

        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, "Basic Zm9vOmJhcg==")
            .body(())
            .unwrap()
            .into_parts();
        assert!(bearer(&parts).is_err());
    }
}
