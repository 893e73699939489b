use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use murmur_types::api::{ApiResponse, AuthPayload, Claims, LoginRequest, SignupRequest};

use crate::error::ApiError;
use crate::{AppState, run_db};

const SESSION_DAYS: i64 = 30;

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let username = req.username.trim().to_string();

    if !is_valid_email(&email) {
        return Err(ApiError::validation("A valid email is required"));
    }
    if username.len() < 3
        || username.len() > 32
        || !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ApiError::validation(
            "Username must be 3-32 letters, digits or underscores",
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::validation("Password must be at least 8 characters"));
    }

    let (lookup_email, lookup_username) = (email.clone(), username.clone());
    let (email_taken, username_taken) = run_db(&state, move |db| {
        Ok((
            db.get_user_by_email(&lookup_email)?.is_some(),
            db.get_user_by_username(&lookup_username)?.is_some(),
        ))
    })
    .await?;
    if email_taken {
        return Err(ApiError::Conflict("Email already registered"));
    }
    if username_taken {
        return Err(ApiError::Conflict("Username already taken"));
    }

    let password_hash = hash_password(&req.password)?;

    let user_id = Uuid::new_v4();
    let (id, row_email, row_username) = (user_id.to_string(), email.clone(), username.clone());
    // The lookup above races with concurrent signups; the UNIQUE columns decide.
    let created = run_db(&state, move |db| {
        match db.create_user(&id, &row_email, &row_username, &password_hash) {
            Ok(()) => Ok(true),
            Err(e) if murmur_db::is_constraint_violation(&e) => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await?;
    if !created {
        return Err(ApiError::Conflict("Email or username already taken"));
    }

    info!("New user {} ({})", username, user_id);

    let token = create_token(&state.jwt_secret, user_id, &username)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(AuthPayload {
            token,
            user_id,
            username,
            email,
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = run_db(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored password hash unreadable: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::InvalidCredentials)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(ApiResponse::ok(AuthPayload {
        token,
        user_id,
        username: user.username,
        email: user.email,
    })))
}

/// Argon2id hash in PHC string form.
fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(SESSION_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::decode_token;

    #[test]
    fn token_roundtrips_through_middleware_decoder() {
        let user_id = Uuid::new_v4();
        let token = create_token("secret", user_id, "alice").unwrap();

        let claims = decode_token("secret", &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = create_token("secret", Uuid::new_v4(), "alice").unwrap();
        assert!(matches!(
            decode_token("other", &token),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn hashed_password_verifies() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));

        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default().verify_password(b"correct horse", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
        assert_ne!(hash, hash_password("correct horse").unwrap());
    }

    #[test]
    fn email_shape_checks() {
        assert!(is_valid_email("a@example.com"));
        assert!(!is_valid_email("example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@localhost"));
    }
}
