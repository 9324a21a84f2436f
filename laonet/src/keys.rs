use crate::*;
use ed25519_dalek::ExpandedSecretKey;
use ed25519_dalek::SecretKey;
use ed25519_dalek::Verifier;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// An Ed25519 public key, as used by organizers, witnesses and voters
///
/// Unlike the raw dalek key this one is hashable and ordered, so it can key maps.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PublicKey(ed25519_dalek::PublicKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(PublicKey(ed25519_dalek::PublicKey::from_bytes(bytes)?))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Verify an Ed25519 signature made by this key
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), Error> {
        Ok(self.0.verify(message, &signature.0)?)
    }

    /// The key hash used to lock digital cash outputs
    pub fn key_hash(&self) -> Identifier {
        Identifier::digest(&[self.to_string()])
    }

    pub fn as_dalek(&self) -> &ed25519_dalek::PublicKey {
        &self.0
    }
}

impl From<ed25519_dalek::PublicKey> for PublicKey {
    fn from(key: ed25519_dalek::PublicKey) -> Self {
        PublicKey(key)
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_bytes().hash(state)
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = b64_decode(s)?;
        PublicKey::from_bytes(&bytes).map_err(|_| Error::InvalidPublicKey)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", b64_encode(self.0.as_bytes()))
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        std::str::FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

/// An Ed25519 signature
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Signature(ed25519_dalek::Signature::try_from(bytes)?))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = b64_decode(s)?;
        Signature::from_bytes(&bytes)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", b64_encode(&self.0.to_bytes()[..]))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Signature({})", self)
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        std::str::FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

/// Key management capability
///
/// Anything able to produce signatures for one identity: an in-memory keypair,
/// a hardware keystore, a remote signer.
pub trait Keyring: Send + Sync {
    fn public_key(&self) -> PublicKey;
    fn sign(&self, message: &[u8]) -> Signature;
}

/// An in-memory Ed25519 keypair
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    pub fn from_secret(secret: SecretKey) -> Self {
        let public = ed25519_dalek::PublicKey::from(&secret);
        KeyPair {
            secret,
            public: PublicKey(public),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(KeyPair::from_secret(SecretKey::from_bytes(bytes)?))
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

impl Keyring for KeyPair {
    fn public_key(&self) -> PublicKey {
        self.public
    }

    fn sign(&self, message: &[u8]) -> Signature {
        let expanded: ExpandedSecretKey = (&self.secret).into();
        Signature(expanded.sign(message, &self.public.0))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "KeyPair({})", self.public)
    }
}
