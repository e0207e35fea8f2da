//! Hash — one-way digests for autohashed fields.

use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::parser::coerce::string_form;

/// Lowercase hex SHA-1 digest of `input`.
pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Replace a field value with the digest of its string form.
pub fn hash_value(value: &Value) -> Value {
    Value::String(sha1_hex(&string_form(value)))
}
