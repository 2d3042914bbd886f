use super::*;
use crate::repository::SqliteUserRepository;
use sqlx::sqlite::SqlitePoolOptions;

const SECRET: &str = "supersecretjwtsecretforunittesting123";

fn auth_config(secret: &str) -> AuthConfig {
    AuthConfig {
        jwt_secret: secret.to_string(),
        access_token_minutes: 15,
        refresh_token_days: 7,
    }
}

fn service(secret: &str) -> AuthService {
    let pool = SqlitePoolOptions::new()
        .connect_lazy("sqlite::memory:")
        .unwrap();
    AuthService::new(
        Arc::new(SqliteUserRepository::new(pool.clone())),
        RefreshTokenStore::new(pool),
        &auth_config(secret),
    )
}

fn claims(exp: usize) -> Claims {
    Claims {
        sub: "123e4567-e89b-12d3-a456-426614174000".to_string(),
        role: "GymAdmin".to_string(),
        gym_id: Some("223e4567-e89b-12d3-a456-426614174000".to_string()),
        national_code: "0012345678".to_string(),
        iat: 0,
        exp,
    }
}

#[tokio::test]
async fn test_issued_token_round_trips_claims() {
    let auth = service(SECRET);
    let user_id = Uuid::new_v4();
    let gym_id = Uuid::new_v4();

    let token = auth
        .issue_access_token(user_id, Role::Athlete, Some(gym_id), "0012345678")
        .unwrap();
    let current = auth.validate_access_token(&token).expect("Valid token should pass");

    assert_eq!(current.user_id, user_id);
    assert_eq!(current.gym_id, Some(gym_id));
    assert_eq!(current.role, Role::Athlete);
    assert_eq!(current.national_code, "0012345678");
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let auth = service(SECRET);
    let token = encode(
        &Header::default(),
        &claims(1),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    assert!(matches!(auth.validate_access_token(&token), Err(AppError::Unauthorized)));
}

#[tokio::test]
async fn test_invalid_signature_is_rejected() {
    let auth = service(SECRET);
    let token = encode(
        &Header::default(),
        &claims(9999999999),
        &EncodingKey::from_secret("wrongsecret".as_bytes()),
    )
    .unwrap();

    assert!(matches!(auth.validate_access_token(&token), Err(AppError::Unauthorized)));
}

#[tokio::test]
async fn test_unknown_role_is_rejected() {
    let auth = service(SECRET);
    let mut bad = claims(9999999999);
    bad.role = "Janitor".to_string();
    let token = encode(
        &Header::default(),
        &bad,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    assert!(auth.validate_access_token(&token).is_err());
}

#[test]
fn test_password_hash_verifies() {
    let hash = AuthService::hash_password("correct horse").unwrap();
    assert!(AuthService::verify_password("correct horse", &hash).unwrap());
    assert!(!AuthService::verify_password("battery staple", &hash).unwrap());
}

#[test]
fn test_can_manage_is_scoped_to_own_gym() {
    let gym = Uuid::new_v4();
    let admin = CurrentUser {
        user_id: Uuid::new_v4(),
        gym_id: Some(gym),
        role: Role::GymAdmin,
        national_code: "1".to_string(),
    };
    let athlete = CurrentUser { role: Role::Athlete, ..admin.clone() };
    let root = CurrentUser { role: Role::SuperAdmin, gym_id: None, ..admin.clone() };

    assert!(admin.can_manage(gym));
    assert!(!admin.can_manage(Uuid::new_v4()));
    assert!(!athlete.can_manage(gym));
    assert!(root.can_manage(Uuid::new_v4()));
    assert!(root.require_gym().is_err());
}
