//! Server-side refresh record.
//!
//! The record holds the refresh token's extra claims plus the id of the
//! access token minted with it. It is stored as a MessagePack map so the
//! family scripts can read `access_jti` with `cmsgpack.unpack`.

use serde_json::{Map, Value};

/// Record field naming the paired access token.
pub const ACCESS_JTI: &str = "access_jti";

pub(crate) fn encode(
    extra: &Map<String, Value>,
    access_jti: &str,
) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    let mut record = extra.clone();
    record.insert(ACCESS_JTI.to_string(), Value::String(access_jti.to_string()));
    rmp_serde::to_vec_named(&record)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Map<String, Value>, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}
