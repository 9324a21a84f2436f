//! ECIES over the Edwards form of Curve25519.
//!
//! Secret ballots are encrypted under the election key with this scheme: an
//! ephemeral Diffie-Hellman exchange on the curve, HKDF-SHA256 to derive an
//! AES-256-GCM key, and the ephemeral public key prepended to the ciphertext.
//!
//! The secret scalar is used directly (no clamping or hashing as ed25519 signing
//! does), so election keys must never be reused as signing keys.

use crate::{Error, VoteDecryptor, VoteEncryptor};
use aes_gcm::aead::{generic_array::GenericArray, Aead, NewAead};
use aes_gcm::Aes256Gcm;
use curve25519_dalek::constants;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::SecretKey;
use hkdf::Hkdf;
use rand::{thread_rng, Rng};
use sha2::Sha256;
use std::str::FromStr;

const POINT_LENGTH: usize = 32;
const AES_IV_LENGTH: usize = 12;
const AES_TAG_LENGTH: usize = 16;

type AesKey = [u8; 32];

/// The public half of an election key
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ElectionPublicKey(CompressedEdwardsY);

impl ElectionPublicKey {
    pub fn to_bytes(&self) -> [u8; POINT_LENGTH] {
        self.0.to_bytes()
    }

    /// Parse and check that the bytes are a valid curve point
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != POINT_LENGTH {
            return Err(Error::InvalidPublicKey);
        }
        let compressed = CompressedEdwardsY::from_slice(bytes);
        compressed.decompress().ok_or(Error::InvalidPublicKey)?;
        Ok(ElectionPublicKey(compressed))
    }

    fn as_point(&self) -> Result<EdwardsPoint, Error> {
        self.0.decompress().ok_or(Error::InvalidPublicKey)
    }
}

impl std::fmt::Display for ElectionPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", crate::b64_encode(self.0.as_bytes()))
    }
}

impl std::fmt::Debug for ElectionPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ElectionPublicKey({})", self)
    }
}

impl FromStr for ElectionPublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElectionPublicKey::from_bytes(&crate::b64_decode(s)?)
    }
}

/// The secret half of an election key, held by whoever tallies a secret ballot
pub struct ElectionSecretKey {
    secret: SecretKey,
    public: ElectionPublicKey,
}

impl ElectionSecretKey {
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng {};
        let ed25519_dalek::Keypair { public: _, secret } =
            ed25519_dalek::Keypair::generate(&mut csprng);
        Self::from_secret(secret)
    }

    pub fn from_secret(secret: SecretKey) -> Self {
        let public = public_from_secret(&secret);
        ElectionSecretKey { secret, public }
    }

    pub fn public_key(&self) -> ElectionPublicKey {
        self.public
    }
}

fn public_from_secret(secret: &SecretKey) -> ElectionPublicKey {
    let point = &Scalar::from_bits(secret.to_bytes()) * &constants::ED25519_BASEPOINT_TABLE;
    ElectionPublicKey(point.compress())
}

/// Encrypt a message so that only the holder of the election secret can read it
pub fn encrypt(receiver: &ElectionPublicKey, msg: &[u8]) -> Result<Vec<u8>, Error> {
    let ephemeral = ElectionSecretKey::generate();

    let aes_key = encapsulate(&ephemeral.secret, receiver)?;
    let encrypted = aes_encrypt(&aes_key, msg)?;

    let mut cipher_text = Vec::with_capacity(POINT_LENGTH + encrypted.len());
    cipher_text.extend(ephemeral.public.to_bytes().iter());
    cipher_text.extend(encrypted);

    Ok(cipher_text)
}

/// Decrypt a ciphertext produced by [`encrypt`]
pub fn decrypt(receiver: &SecretKey, msg: &[u8]) -> Result<Vec<u8>, Error> {
    if msg.len() < POINT_LENGTH + AES_IV_LENGTH + AES_TAG_LENGTH {
        return Err(Error::DecryptionError);
    }

    let ephemeral_pk = ElectionPublicKey::from_bytes(&msg[..POINT_LENGTH])
        .map_err(|_| Error::DecryptionError)?;
    let aes_key = decapsulate(receiver, &ephemeral_pk)?;

    aes_decrypt(&aes_key, &msg[POINT_LENGTH..])
}

impl VoteEncryptor for ElectionPublicKey {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        encrypt(self, plaintext)
    }
}

impl VoteDecryptor for ElectionSecretKey {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        decrypt(&self.secret, ciphertext)
    }
}

fn hkdf_sha256(master: &[u8]) -> Result<AesKey, Error> {
    let h = Hkdf::<Sha256>::new(None, master);
    let mut out = [0u8; 32];
    h.expand(&[], &mut out).map_err(|_| Error::DecryptionError)?;
    Ok(out)
}

fn generate_shared(secret: &SecretKey, public: &ElectionPublicKey) -> Result<[u8; 32], Error> {
    let public = public.as_point()?;
    let secret = Scalar::from_bits(secret.to_bytes());
    Ok((public * secret).compress().to_bytes())
}

fn derive_key(ephemeral_pk: &ElectionPublicKey, shared: &[u8; 32]) -> Result<AesKey, Error> {
    let mut master = Vec::with_capacity(POINT_LENGTH * 2);
    master.extend(ephemeral_pk.to_bytes().iter());
    master.extend(shared.iter());
    hkdf_sha256(&master)
}

fn encapsulate(ephemeral_sk: &SecretKey, peer_pk: &ElectionPublicKey) -> Result<AesKey, Error> {
    let shared = generate_shared(ephemeral_sk, peer_pk)?;
    derive_key(&public_from_secret(ephemeral_sk), &shared)
}

fn decapsulate(sk: &SecretKey, ephemeral_pk: &ElectionPublicKey) -> Result<AesKey, Error> {
    let shared = generate_shared(sk, ephemeral_pk)?;
    derive_key(ephemeral_pk, &shared)
}

fn aes_encrypt(key: &AesKey, msg: &[u8]) -> Result<Vec<u8>, Error> {
    let aead = Aes256Gcm::new(GenericArray::from_slice(key));

    let mut nonce = [0u8; AES_IV_LENGTH];
    thread_rng().fill(&mut nonce);

    let ciphertext = aead
        .encrypt(GenericArray::from_slice(&nonce), msg)
        .map_err(|_| Error::DecryptionError)?;

    let mut output = Vec::with_capacity(AES_IV_LENGTH + ciphertext.len());
    output.extend(nonce.iter());
    output.extend(ciphertext);

    Ok(output)
}

fn aes_decrypt(key: &AesKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    let aead = Aes256Gcm::new(GenericArray::from_slice(key));

    let nonce = GenericArray::from_slice(&ciphertext[..AES_IV_LENGTH]);
    aead.decrypt(nonce, &ciphertext[AES_IV_LENGTH..])
        .map_err(|_| Error::DecryptionError)
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn test_shared() {
        let ephemeral = ElectionSecretKey::generate();
        let peer = ElectionSecretKey::generate();

        assert_eq!(
            generate_shared(&ephemeral.secret, &peer.public).unwrap(),
            generate_shared(&peer.secret, &ephemeral.public).unwrap()
        );

        assert_ne!(
            generate_shared(&ephemeral.secret, &ephemeral.public).unwrap(),
            generate_shared(&peer.secret, &peer.public).unwrap()
        )
    }

    #[test]
    fn test_encapsulation() {
        let ephemeral = ElectionSecretKey::generate();
        let peer = ElectionSecretKey::generate();

        assert_eq!(
            encapsulate(&ephemeral.secret, &peer.public).unwrap(),
            decapsulate(&peer.secret, &ephemeral.public).unwrap()
        )
    }

    #[test]
    fn test_ballot_encryption() {
        let election_key = ElectionSecretKey::generate();
        let plaintext = 1u16.to_be_bytes();

        let encrypted = election_key.public_key().encrypt(&plaintext).unwrap();
        assert_eq!(encrypted.len(), POINT_LENGTH + AES_IV_LENGTH + 2 + AES_TAG_LENGTH);

        let decrypted = election_key.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext.to_vec());

        let wrong_key = ElectionSecretKey::generate();
        assert!(wrong_key.decrypt(&encrypted).is_err());
        assert!(election_key.decrypt(&encrypted[..20]).is_err());
    }

    #[test]
    fn test_public_key_encoding() {
        let key = ElectionSecretKey::generate().public_key();
        let parsed: ElectionPublicKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
        assert!(ElectionPublicKey::from_bytes(&[1, 2, 3]).is_err());
    }
}
