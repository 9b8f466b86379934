//! HS256 JWT verification for the client handshake.
//!
//! The `aud` claim carries the numeric user id (as a string or a number) and
//! `exp` is mandatory.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use hiroba_shared::time::{Clock, SystemClock};

use crate::domain::{AuthError, Authenticator, UserId};

type HmacSha256 = Hmac<Sha256>;

pub struct JwtAuthenticator {
    secret: Vec<u8>,
    clock: Arc<dyn Clock>,
}

impl JwtAuthenticator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self::with_clock(secret, Arc::new(SystemClock))
    }

    pub fn with_clock(secret: impl Into<Vec<u8>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.into(),
            clock,
        }
    }

    fn verify(&self, token: &str) -> Result<Value, AuthError> {
        let mut parts = token.splitn(3, '.');
        let (Some(header_b64), Some(payload_b64), Some(sig_b64)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::Malformed)?;
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(&self.secret).map_err(|_| AuthError::InvalidSignature)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::InvalidSignature)?;

        let header: Value = decode_segment(header_b64)?;
        if header.get("alg").and_then(Value::as_str) != Some("HS256") {
            return Err(AuthError::Malformed);
        }

        let claims: Value = decode_segment(payload_b64)?;
        let exp = claims
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or(AuthError::Expired)?;
        if self.clock.now_unix() >= exp {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}

fn decode_segment(segment: &str) -> Result<Value, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::Malformed)
}

fn audience_user_id(claims: &Value) -> Option<UserId> {
    claims.get("aud").and_then(parse_audience)
}

fn parse_audience(aud: &Value) -> Option<UserId> {
    let id = match aud {
        Value::String(s) => s.parse::<u64>().ok()?,
        Value::Number(n) => n.as_u64()?,
        Value::Array(items) => return items.iter().find_map(parse_audience),
        _ => return None,
    };
    (id != 0).then_some(UserId(id))
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let claims = self.verify(token)?;
        audience_user_id(&claims).ok_or(AuthError::MissingUserId)
    }
}

/// Sign `claims` with HS256. Used by tooling and tests to mint client tokens.
pub fn sign_token(claims: &Value, secret: &[u8]) -> Result<String, AuthError> {
    let header = serde_json::json!({"alg": "HS256", "typ": "JWT"});
    let encode = |v: &Value| {
        serde_json::to_vec(v)
            .map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
            .map_err(|_| AuthError::Malformed)
    };
    let signing_input = format!("{}.{}", encode(&header)?, encode(claims)?);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).map_err(|_| AuthError::InvalidSignature)?;
    mac.update(signing_input.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{}.{}", signing_input, sig_b64))
}
