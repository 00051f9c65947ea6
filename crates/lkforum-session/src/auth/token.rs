//! Client-side access token inspection.
//!
//! Tokens are JWTs issued by the lkforum API. Only the payload is read, to
//! decide whether a token is worth sending; the signature is never checked.
//! Anything that cannot be decoded counts as expired.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Registered claims carried by lkforum access and refresh tokens.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Claims {
    #[serde(default, deserialize_with = "lenient_string")]
    pub sub: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub role: Option<String>,
    /// `"refresh"` on refresh tokens, absent on access tokens
    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub token_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<Value>,
    #[serde(default, deserialize_with = "numeric_date")]
    pub iat: Option<i64>,
    #[serde(default, deserialize_with = "numeric_date")]
    pub exp: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub jti: Option<String>,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// Seconds left before `exp`, zero once expired or when there is no `exp`
    pub fn seconds_until_expiry(&self, now: i64) -> i64 {
        self.exp.map(|exp| exp.saturating_sub(now).max(0)).unwrap_or(0)
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        match self.exp {
            Some(exp) => exp <= now,
            None => true,
        }
    }
}

/// Accept integer or fractional NumericDate values; anything else reads as absent.
fn numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.floor() as i64))))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let trimmed = segment.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .ok()
}

/// Decode the payload segment of a `header.payload.signature` token.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return None;
    };

    let bytes = decode_segment(payload)?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Whether `token` is unusable at `now` (seconds since the Unix epoch).
pub fn is_token_expired_at(token: &str, now: i64) -> bool {
    decode_claims(token)
        .map(|claims| claims.is_expired_at(now))
        .unwrap_or(true)
}

pub fn is_token_expired(token: &str) -> bool {
    is_token_expired_at(token, Utc::now().timestamp())
}

/// Build an unsigned token with the given payload. Test helper.
#[cfg(test)]
pub(crate) fn encode_token(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}

/// Access token for `sub` expiring `ttl_secs` from now (negative for the past).
#[cfg(test)]
pub(crate) fn token_expiring_in(sub: &str, ttl_secs: i64) -> String {
    let now = Utc::now().timestamp();
    encode_token(&serde_json::json!({
        "sub": sub,
        "role": "user",
        "iat": now,
        "exp": now + ttl_secs,
        "jti": format!("{}-{}", sub, ttl_secs),
    }))
}
