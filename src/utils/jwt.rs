use std::collections::BTreeSet;

use crate::routes::auth::claims::Claims;
use jsonwebtoken::{decode, errors::Error, Algorithm, DecodingKey, Validation};
#[cfg(test)]
use jsonwebtoken::{encode, EncodingKey, Header};

/// Secrets shorter than this are refused at startup.
pub const MIN_SECRET_BYTES: usize = 32;
const MIN_DISTINCT_BYTES: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum JwtSecretError {
    #[error("JWT_SECRET must be set")]
    Missing,
    #[error("JWT_SECRET is {0} bytes; at least {MIN_SECRET_BYTES} are required")]
    TooShort(usize),
    #[error("JWT_SECRET uses only {0} distinct bytes; at least {MIN_DISTINCT_BYTES} are required")]
    TooUniform(usize),
}

/// HS256 keys derived from the shared session secret. Sessions are issued by
/// the auth service; this one only verifies them.
#[derive(Clone)]
pub struct JwtKeys {
    #[cfg(test)]
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JwtKeys(..)")
    }
}

impl JwtKeys {
    pub fn from_env() -> Result<Self, JwtSecretError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| JwtSecretError::Missing)?;
        Self::from_secret(secret.trim())
    }

    pub fn from_secret(secret: impl AsRef<[u8]>) -> Result<Self, JwtSecretError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(JwtSecretError::Missing);
        }
        if secret.len() < MIN_SECRET_BYTES {
            return Err(JwtSecretError::TooShort(secret.len()));
        }
        let distinct = secret.iter().collect::<BTreeSet<_>>().len();
        if distinct < MIN_DISTINCT_BYTES {
            return Err(JwtSecretError::TooUniform(distinct));
        }

        Ok(Self {
            #[cfg(test)]
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }
}

/// Source of the keys and expected `iss`/`aud` for session tokens.
pub trait JwtKeyProvider {
    fn jwt_keys(&self) -> &JwtKeys;
    fn jwt_issuer(&self) -> &str;
    fn jwt_audience(&self) -> &str;
}

fn session_validation(issuer: &str, audience: &str) -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "iss", "aud"]);
    validation.leeway = 0;
    validation
}

/// Signs `claims` with the provider's keys, stamping its issuer and audience.
#[cfg(test)]
pub fn issue_session_token<P>(mut claims: Claims, provider: &P) -> Result<String, Error>
where
    P: JwtKeyProvider + ?Sized,
{
    claims.iss = provider.jwt_issuer().to_owned();
    claims.aud = provider.jwt_audience().to_owned();
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &provider.jwt_keys().encoding,
    )
}

/// Verifies signature, expiry, issuer and audience and returns the claims.
pub fn verify_session_token<P>(token: &str, provider: &P) -> Result<Claims, Error>
where
    P: JwtKeyProvider + ?Sized,
{
    let validation = session_validation(provider.jwt_issuer(), provider.jwt_audience());
    decode::<Claims>(token, &provider.jwt_keys().decoding, &validation).map(|data| data.claims)
}
