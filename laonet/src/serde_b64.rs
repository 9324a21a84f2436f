//! Base64url helpers shared by every wire type.
//!
//! All binary values on the wire (keys, signatures, ciphertexts, message data) are
//! carried as padded url-safe base64 strings.

use serde::{de, Deserialize, Deserializer, Serializer};

/// Encode bytes as a padded base64url string
pub fn b64_encode<T: AsRef<[u8]>>(bytes: T) -> String {
    base64::encode_config(&bytes, base64::URL_SAFE)
}

/// Decode a padded base64url string
pub fn b64_decode<T: AsRef<[u8]>>(encoded: T) -> Result<Vec<u8>, base64::DecodeError> {
    base64::decode_config(&encoded, base64::URL_SAFE)
}

/// `#[serde(with = "b64_bytes")]` for raw byte buffers
pub mod b64_bytes {
    use super::*;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&b64_encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        b64_decode(&s).map_err(de::Error::custom)
    }
}
