use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};
use axum_extra::extract::cookie::CookieJar;

use crate::routes::auth::claims::Claims;
use crate::utils::jwt::{verify_session_token, JwtKeyProvider};

pub const AUTH_COOKIE: &str = "auth_token";

#[derive(Debug, PartialEq)]
pub struct AuthSession(pub Claims);

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

impl<S> FromRequestParts<S> for AuthSession
where
    S: JwtKeyProvider + Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = match bearer_token(parts) {
            Some(token) => token,
            None => {
                let jar = CookieJar::from_headers(&parts.headers);
                jar.get(AUTH_COOKIE)
                    .map(|cookie| cookie.value().to_string())
                    .ok_or(StatusCode::UNAUTHORIZED)?
            }
        };

        let claims =
            verify_session_token(&token, state).map_err(|_| StatusCode::UNAUTHORIZED)?;

        Ok(AuthSession(claims))
    }
}
