use crate::*;

/// Encrypts ballot choices for a secret ballot election
pub trait VoteEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Decrypts ballot choices when tallying a secret ballot election
pub trait VoteDecryptor {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
}

/// A vote on an open ballot: the index of the chosen option
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlainVote {
    pub id: Identifier,
    pub question: Identifier,
    pub vote: u32,
}

/// A vote on a secret ballot: the encrypted index of the chosen option
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EncryptedVote {
    pub id: Identifier,
    pub question: Identifier,
    #[serde(with = "b64_bytes")]
    pub vote: Vec<u8>,
}

/// One answer of a ballot
///
/// The JSON type of `vote` tells the two apart: an integer for open ballots, a
/// base64url string for secret ballots.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Vote {
    Plain(PlainVote),
    Encrypted(EncryptedVote),
}

impl Vote {
    /// `Hash("Vote", election, question, choice)`
    pub fn build_id(election_id: &Identifier, question_id: &Identifier, choice: &str) -> Identifier {
        Identifier::digest(&["Vote", election_id.as_str(), question_id.as_str(), choice])
    }

    pub fn plain(election_id: &Identifier, question_id: &Identifier, index: u32) -> Self {
        Vote::Plain(PlainVote {
            id: Vote::build_id(election_id, question_id, &index.to_string()),
            question: question_id.clone(),
            vote: index,
        })
    }

    /// Encrypt the option index as two big-endian bytes
    pub fn encrypted<E: VoteEncryptor + ?Sized>(
        election_id: &Identifier,
        question_id: &Identifier,
        index: u16,
        encryptor: &E,
    ) -> Result<Self, Error> {
        let ciphertext = encryptor.encrypt(&index.to_be_bytes())?;
        Ok(Vote::Encrypted(EncryptedVote {
            id: Vote::build_id(election_id, question_id, &b64_encode(&ciphertext)),
            question: question_id.clone(),
            vote: ciphertext,
        }))
    }

    pub fn id(&self) -> &Identifier {
        match self {
            Vote::Plain(v) => &v.id,
            Vote::Encrypted(v) => &v.id,
        }
    }

    pub fn question(&self) -> &Identifier {
        match self {
            Vote::Plain(v) => &v.question,
            Vote::Encrypted(v) => &v.question,
        }
    }

    /// The id this vote must carry, recomputed from its content
    pub fn expected_id(&self, election_id: &Identifier) -> Identifier {
        match self {
            Vote::Plain(v) => Vote::build_id(election_id, &v.question, &v.vote.to_string()),
            Vote::Encrypted(v) => Vote::build_id(election_id, &v.question, &b64_encode(&v.vote)),
        }
    }

    pub fn matches_version(&self, version: ElectionVersion) -> bool {
        matches!(
            (self, version),
            (Vote::Plain(_), ElectionVersion::OpenBallot)
                | (Vote::Encrypted(_), ElectionVersion::SecretBallot)
        )
    }
}

/// Decode a decrypted secret ballot choice
pub fn decode_choice(plaintext: &[u8]) -> Option<u32> {
    if plaintext.len() != 2 {
        return None;
    }
    Some(u16::from_be_bytes([plaintext[0], plaintext[1]]) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecies_ed25519::ElectionSecretKey;

    #[test]
    fn test_vote_wire_shapes() {
        let election = Identifier::digest(&["election"]);
        let question = Identifier::digest(&["question"]);

        let plain = Vote::plain(&election, &question, 1);
        let json = serde_json::to_value(&plain).unwrap();
        assert_eq!(json["vote"], 1);
        assert_eq!(serde_json::from_value::<Vote>(json).unwrap(), plain);

        let key = ElectionSecretKey::generate();
        let encrypted = Vote::encrypted(&election, &question, 1, &key.public_key()).unwrap();
        let json = serde_json::to_value(&encrypted).unwrap();
        assert!(json["vote"].is_string());
        let back: Vote = serde_json::from_value(json).unwrap();
        assert!(matches!(back, Vote::Encrypted(_)));
        assert_eq!(back.expected_id(&election), *back.id());
    }

    #[test]
    fn test_vote_ids() {
        let election = Identifier::digest(&["election"]);
        let question = Identifier::digest(&["question"]);

        let vote = Vote::plain(&election, &question, 0);
        assert_eq!(vote.expected_id(&election), *vote.id());
        assert_ne!(*Vote::plain(&election, &question, 1).id(), *vote.id());

        let other_election = Identifier::digest(&["other"]);
        assert_ne!(vote.expected_id(&other_election), *vote.id());

        assert!(vote.matches_version(ElectionVersion::OpenBallot));
        assert!(!vote.matches_version(ElectionVersion::SecretBallot));
    }

    #[test]
    fn test_decode_choice() {
        assert_eq!(decode_choice(&[0, 3]), Some(3));
        assert_eq!(decode_choice(&[1, 0]), Some(256));
        assert_eq!(decode_choice(&[3]), None);
    }
}
