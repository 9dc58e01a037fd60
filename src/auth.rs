use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::appresult::ApiError;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_TTL: time::Duration = time::Duration::hours(24);

/// Mints and verifies the bearer credential: `<user_id>.<expiry>.<sig>`,
/// where `sig` is base64url HMAC-SHA256 over the first two fields. The
/// rest of the service only ever sees the verified user id.
#[derive(Clone)]
pub struct TokenKeys {
    key: std::sync::Arc<[u8]>,
}

impl TokenKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().into(),
        }
    }

    pub fn mint(&self, user_id: &str) -> String {
        self.mint_at(user_id, OffsetDateTime::now_utc() + TOKEN_TTL)
    }

    fn mint_at(&self, user_id: &str, expires: OffsetDateTime) -> String {
        let payload = format!("{user_id}.{}", expires.unix_timestamp());
        let sig = URL_SAFE_NO_PAD.encode(self.sign(&payload));
        format!("{payload}.{sig}")
    }

    pub fn verify(&self, token: &str) -> Result<String, ApiError> {
        let invalid = || ApiError::unauthorized("Invalid token");

        let (payload, sig) = token.rsplit_once('.').ok_or_else(invalid)?;
        let (user_id, expires) = payload.split_once('.').ok_or_else(invalid)?;

        let sig = URL_SAFE_NO_PAD.decode(sig).map_err(|_| invalid())?;
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| invalid())?;

        let expires: i64 = expires.parse().map_err(|_| invalid())?;
        if expires < OffsetDateTime::now_utc().unix_timestamp() {
            return Err(ApiError::unauthorized("Token expired"));
        }

        Ok(user_id.to_owned())
    }

    fn sign(&self, payload: &str) -> Vec<u8> {
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length")
    }
}

/// Extractor for the verified caller identity. Handlers take `AuthUser` and
/// get the user id out of the `Authorization: Bearer` header, or the
/// request is rejected with 401 before the handler runs.
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    TokenKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = TokenKeys::from_ref(state);

        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Auth header is missing"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid auth header"))?;

        Ok(Self(keys.verify(token)?))
    }
}
