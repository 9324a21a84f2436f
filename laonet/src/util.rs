use crate::*;
use ed25519_dalek::Keypair;

pub fn generate_keypair() -> KeyPair {
    let mut csprng = rand::rngs::OsRng {};
    let Keypair { public: _, secret } = Keypair::generate(&mut csprng);
    KeyPair::from_secret(secret)
}
