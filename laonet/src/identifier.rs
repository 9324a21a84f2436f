use crate::*;
use digest::Digest;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::str::FromStr;

/// Content-derived identifier
///
/// Every object on the network (LAOs, elections, questions, votes, transactions and
/// the messages themselves) is named by the base64url encoded SHA-256 digest of the
/// fields that define it. Each field is prefixed with its decimal byte length so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

/// Identifier of a signed envelope
pub type MessageId = Identifier;

impl Identifier {
    /// Hash an ordered list of fields into an identifier
    pub fn digest<S: AsRef<str>>(parts: &[S]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            let part = part.as_ref();
            hasher.update(part.len().to_string().as_bytes());
            hasher.update(part.as_bytes());
        }
        Identifier(b64_encode(hasher.finalize()))
    }

    /// The identifier of a message: `Hash(base64url(data), base64url(signature))`
    pub fn for_message(data: &[u8], signature: &Signature) -> MessageId {
        Identifier::digest(&[b64_encode(data), signature.to_string()])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decoded digest bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        // Construction guarantees valid base64url
        b64_decode(&self.0).unwrap_or_default()
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = b64_decode(s)?;
        if bytes.is_empty() {
            return Err(Error::Base64(base64::DecodeError::InvalidLength));
        }
        Ok(Identifier(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        std::str::FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

impl Serialize for Identifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_digest_vectors() {
        assert_eq!(
            Identifier::digest(&["abc"]).as_str(),
            "ewOTvv3Cj_KnxeCPqKOKTIRdpcYAR26wGue4Zfo0Txg="
        );
        assert_eq!(
            Identifier::digest(&["a", "bc"]).as_str(),
            "Tdt7iCjbs-457gkk2gxHm7cI_9Jp99jg3gt80TClLmE="
        );
        assert_eq!(
            Identifier::digest(&["ab", "c"]).as_str(),
            "QEfrcuxUv7GFpDIfN4QKcSbCUfQ6i4Az_CBVF2QjfFY="
        );

        let empty: [&str; 0] = [];
        assert_eq!(
            Identifier::digest(&empty).as_str(),
            "47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_identifier_parse() {
        let id = Identifier::digest(&["lao", "name"]);
        assert_eq!(id.to_bytes().len(), 32);

        let parsed: Identifier = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);

        let json = serde_json::to_string(&id).unwrap();
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!("".parse::<Identifier>().is_err());
        assert!("not/base64url".parse::<Identifier>().is_err());
    }
}
