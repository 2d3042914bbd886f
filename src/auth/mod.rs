use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use argon2::password_hash::{SaltString, rand_core::OsRng};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::AuthConfig,
    domain::Role,
    error::{AppError, Result},
    repository::UserRepository,
};

pub mod refresh_token;

use refresh_token::RefreshTokenStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub gym_id: Option<String>,
    pub national_code: String,
    pub iat: usize,
    pub exp: usize,
}

/// The authenticated caller, as decoded from the access token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub gym_id: Option<Uuid>,
    pub role: Role,
    pub national_code: String,
}

impl CurrentUser {
    /// The gym the caller acts in. Everyone except super admins has one.
    pub fn require_gym(&self) -> Result<Uuid> {
        self.gym_id.ok_or(AppError::Forbidden)
    }

    pub fn can_manage(&self, gym_id: Uuid) -> bool {
        match self.role {
            Role::SuperAdmin => true,
            Role::GymAdmin => self.gym_id == Some(gym_id),
            _ => false,
        }
    }
}

impl TryFrom<Claims> for CurrentUser {
    type Error = AppError;

    fn try_from(claims: Claims) -> Result<Self> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;
        let gym_id = claims
            .gym_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|_| AppError::Unauthorized)?;
        let role = Role::parse(&claims.role).ok_or(AppError::Unauthorized)?;

        Ok(CurrentUser {
            user_id,
            gym_id,
            role,
            national_code: claims.national_code,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    refresh_tokens: RefreshTokenStore,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_minutes: i64,
    refresh_token_days: i64,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        refresh_tokens: RefreshTokenStore,
        config: &AuthConfig,
    ) -> Self {
        Self {
            users,
            refresh_tokens,
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            access_token_minutes: config.access_token_minutes,
            refresh_token_days: config.refresh_token_days,
        }
    }

    pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed_hash).is_ok())
    }

    pub fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

        Ok(password_hash.to_string())
    }

    pub fn issue_access_token(&self, user_id: Uuid, role: Role, gym_id: Option<Uuid>, national_code: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.as_str().to_string(),
            gym_id: gym_id.map(|g| g.to_string()),
            national_code: national_code.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + Duration::minutes(self.access_token_minutes)).timestamp() as usize,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
    }

    pub fn validate_access_token(&self, token: &str) -> Result<CurrentUser> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!("JWT validation failed: {}", e);
            AppError::Unauthorized
        })?;

        CurrentUser::try_from(data.claims)
    }

    pub async fn login(&self, national_code: &str, password: &str) -> Result<TokenPair> {
        let Some((user, password_hash)) = self.users.find_credentials(national_code).await? else {
            tracing::info!("Login failed for unknown national code");
            return Err(AppError::Unauthorized);
        };

        if !user.is_active || !Self::verify_password(password, &password_hash)? {
            tracing::info!("Login failed for user {}", user.id);
            return Err(AppError::Unauthorized);
        }

        tracing::info!("User {} logged in", user.id);
        self.issue_pair(user.id, user.role, user.gym_id, &user.national_code).await
    }

    /// Rotates a refresh token: the presented one is revoked and a new pair issued.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let user_id = self
            .refresh_tokens
            .consume(refresh_token)
            .await?
            .ok_or(AppError::Unauthorized)?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AppError::Unauthorized)?;

        self.issue_pair(user.id, user.role, user.gym_id, &user.national_code).await
    }

    pub async fn revoke(&self, refresh_token: &str) -> Result<()> {
        if !self.refresh_tokens.revoke(refresh_token).await? {
            return Err(AppError::NotFound("Refresh token not found".to_string()));
        }
        Ok(())
    }

    pub async fn cleanup_expired_tokens(&self) -> Result<u64> {
        self.refresh_tokens.cleanup_expired().await
    }

    async fn issue_pair(&self, user_id: Uuid, role: Role, gym_id: Option<Uuid>, national_code: &str) -> Result<TokenPair> {
        let access_token = self.issue_access_token(user_id, role, gym_id, national_code)?;
        let refresh_token = generate_token();
        let expires_at = Utc::now() + Duration::days(self.refresh_token_days);
        self.refresh_tokens.create(user_id, &refresh_token, expires_at).await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.access_token_minutes * 60,
        })
    }
}

fn generate_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests;
