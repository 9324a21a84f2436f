use crate::*;
use indexmap::IndexMap;
use tracing::warn;

/// Number of votes one ballot option received
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct QuestionResult {
    pub ballot_option: String,
    pub count: u64,
}

/// Results per question id, in question order
pub type ElectionResults = IndexMap<Identifier, Vec<QuestionResult>>;

impl Election {
    /// Count the effective votes of a closed election
    ///
    /// Every option is listed, in ballot order, including those nobody chose.
    /// Secret ballots are decrypted with `decryptor`; a vote that fails to decrypt
    /// or decodes to an unknown option is left out of the count.
    pub fn tally(
        &mut self,
        decryptor: Option<&dyn VoteDecryptor>,
    ) -> Result<ElectionResults, ValidationError> {
        if self.state() != ElectionState::Closed && self.state() != ElectionState::ResultsReady {
            return Err(ValidationError::InvalidStateTransition {
                from: self.state(),
                to: ElectionState::ResultsReady,
            });
        }
        if self.version == ElectionVersion::SecretBallot && decryptor.is_none() {
            return Err(ValidationError::MissingDecryptionKey);
        }

        let mut results = ElectionResults::new();
        for (question_id, votes) in self.ballots_by_question() {
            let question = match self.question(question_id) {
                Some(question) => question,
                None => continue,
            };

            let mut counts = vec![0u64; question.ballot_options.len()];
            for vote in votes {
                let choice = match vote {
                    Vote::Plain(plain) => Some(plain.vote),
                    Vote::Encrypted(encrypted) => decryptor
                        .and_then(|d| d.decrypt(&encrypted.vote).ok())
                        .and_then(|plaintext| decode_choice(&plaintext)),
                };

                match choice.and_then(|c| counts.get_mut(c as usize)) {
                    Some(count) => *count += 1,
                    None => {
                        warn!(election = %self.id, vote = %vote.id(), "tally: vote excluded")
                    }
                }
            }

            let tallied = question
                .ballot_options
                .iter()
                .zip(counts)
                .map(|(option, count)| QuestionResult {
                    ballot_option: option.clone(),
                    count,
                })
                .collect();
            results.insert(question_id.clone(), tallied);
        }

        if self.state() == ElectionState::Closed {
            self.apply_results(results.clone())?;
        } else {
            self.set_results(results.clone());
        }
        Ok(results)
    }

    /// The election/result message for the current results
    pub fn to_result_data(&self) -> Option<ElectionResultData> {
        self.results().map(|results| ElectionResultData {
            questions: results
                .iter()
                .map(|(id, result)| QuestionResultData {
                    id: id.clone(),
                    result: result.clone(),
                })
                .collect(),
        })
    }
}

/// Collect the per-question results of an election/result message
pub fn results_from_data(data: &ElectionResultData) -> ElectionResults {
    data.questions
        .iter()
        .map(|q| (q.id.clone(), q.result.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecies_ed25519::ElectionSecretKey;

    fn counts(results: &ElectionResults) -> Vec<(String, u64)> {
        results
            .values()
            .next()
            .unwrap()
            .iter()
            .map(|r| (r.ballot_option.clone(), r.count))
            .collect()
    }

    #[test]
    fn test_tally_open_ballot() {
        let lao_id = Identifier::digest(&["lao"]);
        let mut election = Election::setup(
            &lao_id,
            "Board",
            ElectionVersion::OpenBallot,
            vec![QuestionSpec::plurality("Chair?", &["A", "B", "C"])],
            100,
            100,
            1000,
        )
        .unwrap();
        election.open(100).unwrap();

        let question = election.questions[0].id.clone();
        for (i, choice) in [0u32, 0, 1].iter().enumerate() {
            let voter = generate_keypair().public_key();
            let votes = vec![Vote::plain(&election.id, &question, *choice)];
            let message_id = Identifier::digest(&[i.to_string()]);
            election.cast_vote(voter, &message_id, 200, votes).unwrap();
        }

        assert!(election.tally(None).is_err());

        election.close(500, None).unwrap();
        let results = election.tally(None).unwrap();
        assert_eq!(
            counts(&results),
            vec![("A".into(), 2), ("B".into(), 1), ("C".into(), 0)]
        );
        assert_eq!(election.state(), ElectionState::ResultsReady);
        assert_eq!(election.results(), Some(&results));

        let data = election.to_result_data().unwrap();
        assert_eq!(results_from_data(&data), results);
    }

    #[test]
    fn test_tally_secret_ballot() {
        let lao_id = Identifier::digest(&["lao"]);
        let key = ElectionSecretKey::generate();
        let mut election = Election::setup(
            &lao_id,
            "Secret",
            ElectionVersion::SecretBallot,
            vec![QuestionSpec::plurality("Chair?", &["A", "B"])],
            100,
            100,
            1000,
        )
        .unwrap();
        election.set_key(key.public_key()).unwrap();
        election.open(100).unwrap();
        let question = election.questions[0].id.clone();

        let voter = generate_keypair().public_key();
        let vote = Vote::encrypted(&election.id, &question, 1, &key.public_key()).unwrap();
        election
            .cast_vote(voter, &Identifier::digest(&["m1"]), 200, vec![vote])
            .unwrap();

        // Encrypted under some other key: accepted, but excluded at tally
        let other = ElectionSecretKey::generate();
        let voter = generate_keypair().public_key();
        let vote = Vote::encrypted(&election.id, &question, 0, &other.public_key()).unwrap();
        election
            .cast_vote(voter, &Identifier::digest(&["m2"]), 200, vec![vote])
            .unwrap();

        election.close(500, None).unwrap();
        assert!(matches!(
            election.tally(None),
            Err(ValidationError::MissingDecryptionKey)
        ));

        let results = election.tally(Some(&key)).unwrap();
        assert_eq!(counts(&results), vec![("A".into(), 0), ("B".into(), 1)]);
    }
}
