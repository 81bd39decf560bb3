use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use diesel::prelude::*;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::error::ApiError;
use crate::models::User;
use crate::schema::users;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub exp: usize,
}

/// Authenticated caller, attached to the request by the middleware.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub is_verified: bool,
}

pub fn create_token(user_id: Uuid, jwt_secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = Utc::now().timestamp() as usize + 24 * 60 * 60; // 24 hours
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
}

pub fn validate_token(token: &str, jwt_secret: &str) -> Result<Uuid, ApiError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized("invalid or expired token".to_string()))?;
    Uuid::parse_str(&token_data.claims.sub)
        .map_err(|_| ApiError::Unauthorized("invalid token subject".to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get("Authorization")
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".to_string()))?;
    header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("invalid Authorization header format".to_string()))
}

/// Loads the caller's user row on every request so bans take effect
/// immediately, not at token expiry.
pub fn resolve_user(state: &AppState, token: &str) -> Result<AuthUser, ApiError> {
    let user_id = validate_token(token, &state.config.jwt_secret)?;
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    let user: User = users::table
        .filter(users::id.eq(user_id))
        .first(conn)
        .map_err(|_| ApiError::Unauthorized("unknown user".to_string()))?;
    if user.is_banned {
        return Err(ApiError::Forbidden("account is banned".to_string()));
    }
    Ok(AuthUser {
        id: user.id,
        is_verified: user.is_verified,
    })
}

pub async fn authenticate(
    headers: HeaderMap,
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)?;
    let user = resolve_user(&state, token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub display_name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<User>, ApiError> {
    if req.email.trim().is_empty() || req.display_name.trim().is_empty() {
        return Err(ApiError::Validation(
            "email and display_name are required".to_string(),
        ));
    }
    let conn = &mut db::establish_connection(&state.config.database_url)?;

    // Accounts start unverified; verification is handled by the identity
    // flow outside this service and gates conversations and offers.
    let user = User {
        id: Uuid::new_v4(),
        email: req.email.trim().to_lowercase(),
        display_name: req.display_name.trim().to_string(),
        is_verified: false,
        is_banned: false,
        created_at: Utc::now().naive_utc(),
    };
    diesel::insert_into(users::table)
        .values(&user)
        .execute(conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => ApiError::Validation("email is already registered".to_string()),
            other => ApiError::from(other),
        })?;
    info!("registered user {}", user.id);
    Ok(Json(user))
}

/// Credential verification belongs to the identity collaborator; this
/// endpoint only exchanges a known account for a bearer token.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conn = &mut db::establish_connection(&state.config.database_url)?;
    let user: User = users::table
        .filter(users::email.eq(req.email.trim().to_lowercase()))
        .first(conn)
        .map_err(|_| ApiError::Unauthorized("unknown account".to_string()))?;
    if user.is_banned {
        return Err(ApiError::Forbidden("account is banned".to_string()));
    }
    let token = create_token(user.id, &state.config.jwt_secret)
        .map_err(|e| ApiError::Internal(format!("failed to issue token: {e}")))?;
    Ok(Json(json!({ "token": token, "user_id": user.id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let user_id = Uuid::new_v4();
        let token = create_token(user_id, "secret").unwrap();
        assert_eq!(validate_token(&token, "secret").unwrap(), user_id);
    }

    #[test]
    fn token_rejects_wrong_secret() {
        let token = create_token(Uuid::new_v4(), "secret").unwrap();
        assert!(validate_token(&token, "other").is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());
        headers.insert("Authorization", "Token abc".parse().unwrap());
        assert!(bearer_token(&headers).is_err());
        headers.insert("Authorization", "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc");
    }
}
