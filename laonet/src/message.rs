use crate::*;
use std::convert::TryFrom;

/// A witness co-signature attached to an envelope
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WitnessSignature {
    pub witness: PublicKey,
    pub signature: Signature,
}

/// A signed, content-addressed message
///
/// The data is kept exactly as it was signed: the encoded bytes are what the
/// signature and message id cover, the decoded action is derived from them.
/// Once signed an envelope never changes, except that witness co-signatures
/// may be appended.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub struct Envelope {
    sender: PublicKey,
    data_encoded: Vec<u8>,
    data: MessageData,
    signature: Signature,
    message_id: MessageId,
    witness_signatures: Vec<WitnessSignature>,
}

impl Envelope {
    /// Encode and sign a domain action
    pub fn sign<K: Keyring + ?Sized>(keys: &K, data: MessageData) -> Result<Self, Error> {
        let data_encoded = serde_json::to_vec(&data)?;
        let signature = keys.sign(&data_encoded);
        let message_id = Identifier::for_message(&data_encoded, &signature);

        Ok(Envelope {
            sender: keys.public_key(),
            data_encoded,
            data,
            signature,
            message_id,
            witness_signatures: Vec::new(),
        })
    }

    /// Verify the sender signature, the message id and, for a witness action,
    /// the embedded witness signature over the target message
    pub fn verify(&self) -> Result<(), Error> {
        self.sender.verify(&self.data_encoded, &self.signature)?;

        let expected = Identifier::for_message(&self.data_encoded, &self.signature);
        if expected != self.message_id {
            return Err(Error::MessageIdMismatch {
                expected,
                found: self.message_id.clone(),
            });
        }

        if let MessageData::Witness(witness) = &self.data {
            self.sender
                .verify(&witness.message_id.to_bytes(), &witness.signature)
                .map_err(|_| Error::BadWitnessSignature(witness.message_id.clone()))?;
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.verify().is_ok()
    }

    /// Attach a witness co-signature over this message's id
    pub fn add_witness_signature(
        &self,
        witness: PublicKey,
        signature: Signature,
    ) -> Result<Envelope, Error> {
        if self.witness_signatures.iter().any(|ws| ws.witness == witness) {
            return Err(Error::DuplicateWitness(witness));
        }

        witness
            .verify(&self.message_id.to_bytes(), &signature)
            .map_err(|_| Error::BadWitnessSignature(self.message_id.clone()))?;

        let mut signed = self.clone();
        signed.witness_signatures.push(WitnessSignature { witness, signature });
        Ok(signed)
    }

    pub fn sender(&self) -> &PublicKey {
        &self.sender
    }

    pub fn data(&self) -> &MessageData {
        &self.data
    }

    /// The exact bytes that were signed
    pub fn data_encoded(&self) -> &[u8] {
        &self.data_encoded
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn witness_signatures(&self) -> &[WitnessSignature] {
        &self.witness_signatures
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    sender: PublicKey,
    #[serde(with = "b64_bytes")]
    data: Vec<u8>,
    signature: Signature,
    message_id: MessageId,
    #[serde(default)]
    witness_signatures: Vec<WitnessSignature>,
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = Error;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let data = serde_json::from_slice(&wire.data)?;
        Ok(Envelope {
            sender: wire.sender,
            data_encoded: wire.data,
            data,
            signature: wire.signature,
            message_id: wire.message_id,
            witness_signatures: wire.witness_signatures,
        })
    }
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        WireEnvelope {
            sender: envelope.sender,
            data: envelope.data_encoded,
            signature: envelope.signature,
            message_id: envelope.message_id,
            witness_signatures: envelope.witness_signatures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_lao(keys: &KeyPair) -> Envelope {
        let data = CreateLao::new(keys.public_key(), "LAO", 1_600_000_000, vec![]);
        Envelope::sign(keys, data.into()).unwrap()
    }

    #[test]
    fn test_sign_verify() {
        let keys = generate_keypair();
        let envelope = create_lao(&keys);

        assert!(envelope.verify().is_ok());
        assert_eq!(envelope.sender(), &keys.public_key());
        assert_eq!(
            envelope.message_id(),
            &Identifier::for_message(envelope.data_encoded(), envelope.signature())
        );
    }

    #[test]
    fn test_tampering_detected() {
        let keys = generate_keypair();
        let envelope = create_lao(&keys);

        let mut tampered = envelope.clone();
        tampered.data_encoded[10] ^= 0x01;
        assert!(tampered.verify().is_err());

        let mut bytes = envelope.signature.to_bytes();
        bytes[0] ^= 0x01;
        let mut tampered = envelope.clone();
        tampered.signature = Signature::from_bytes(&bytes).unwrap();
        assert!(tampered.verify().is_err());

        let mut tampered = envelope.clone();
        tampered.message_id = Identifier::digest(&["something else"]);
        assert!(matches!(
            tampered.verify(),
            Err(Error::MessageIdMismatch { .. })
        ));

        let impostor = generate_keypair();
        let mut tampered = envelope;
        tampered.sender = impostor.public_key();
        assert!(!tampered.is_valid());
    }

    #[test]
    fn test_message_id_stable() {
        let keys = generate_keypair();
        let envelope = create_lao(&keys);

        let first = Identifier::for_message(envelope.data_encoded(), envelope.signature());
        let second = Identifier::for_message(envelope.data_encoded(), envelope.signature());
        assert_eq!(first, second);
        assert_eq!(&first, envelope.message_id());
    }

    #[test]
    fn test_wire_roundtrip_keeps_bytes() {
        let keys = generate_keypair();
        let envelope = create_lao(&keys);

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["data"], b64_encode(envelope.data_encoded()));
        assert_eq!(json["message_id"], envelope.message_id().as_str());
        assert_eq!(json["witness_signatures"], serde_json::json!([]));

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
        assert!(back.verify().is_ok());
    }

    #[test]
    fn test_witness_action_checked() {
        let organizer = generate_keypair();
        let witness = generate_keypair();
        let target = create_lao(&organizer);

        let ack = WitnessSignatureData::new(&witness, target.message_id());
        let envelope = Envelope::sign(&witness, ack.into()).unwrap();
        assert!(envelope.verify().is_ok());

        // Signed by someone else than the envelope sender
        let forged = WitnessSignatureData::new(&organizer, target.message_id());
        let envelope = Envelope::sign(&witness, forged.into()).unwrap();
        assert!(matches!(
            envelope.verify(),
            Err(Error::BadWitnessSignature(_))
        ));
    }

    #[test]
    fn test_add_witness_signature() {
        let organizer = generate_keypair();
        let witness = generate_keypair();
        let envelope = create_lao(&organizer);

        let signature = witness.sign(&envelope.message_id().to_bytes());
        let witnessed = envelope
            .add_witness_signature(witness.public_key(), signature)
            .unwrap();
        assert_eq!(witnessed.witness_signatures().len(), 1);
        assert_eq!(witnessed.message_id(), envelope.message_id());
        assert!(witnessed.verify().is_ok());

        assert!(matches!(
            witnessed.add_witness_signature(witness.public_key(), signature),
            Err(Error::DuplicateWitness(_))
        ));

        let other = generate_keypair();
        assert!(witnessed
            .add_witness_signature(other.public_key(), signature)
            .is_err());
    }
}
