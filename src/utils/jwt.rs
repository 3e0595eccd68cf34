use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::errors::AppError;
use crate::models::role::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,          // Username
    pub role: Role,           // Capability snapshot at login
    pub dept_id: Option<i32>, // Active department at login
    pub exp: usize,           // Expiration timestamp
}

pub fn generate_token(
    username: &str,
    role: &Role,
    dept_id: Option<i32>,
    secret: &str,
    ttl_minutes: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = (chrono::Utc::now() + chrono::Duration::minutes(ttl_minutes)).timestamp() as usize;

    let claims = Claims {
        sub: username.to_string(),
        role: role.clone(),
        dept_id,
        exp: expiration,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
}

pub fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::new(jsonwebtoken::Algorithm::HS256),
    )
    .map(|data| data.claims)
}

/// Pulls the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|auth| auth.to_str().ok())
        .and_then(|auth| auth.split_whitespace().nth(1))
}

/// Extractor for a request carrying a valid access token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthUser, AppError> {
    let settings = req
        .app_data::<web::Data<Settings>>()
        .ok_or_else(|| AppError::InternalServerError("Settings not configured".to_string()))?;

    let token = bearer_token(req).ok_or_else(|| AppError::Unauthorized("Missing token".to_string()))?;

    validate_token(token, &settings.jwt_secret)
        .map(AuthUser)
        .map_err(|_| AppError::Unauthorized("Could not validate credentials".to_string()))
}
