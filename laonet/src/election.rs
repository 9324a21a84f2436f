use crate::ecies_ed25519::ElectionPublicKey;
use crate::*;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElectionVersion {
    OpenBallot,
    SecretBallot,
}

impl std::fmt::Display for ElectionVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ElectionVersion::OpenBallot => "OPEN_BALLOT",
            ElectionVersion::SecretBallot => "SECRET_BALLOT",
        };
        write!(f, "{}", name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingMethod {
    Plurality,
    Approval,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ElectionState {
    Created,
    Opened,
    Closed,
    ResultsReady,
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ElectionState::Created => "Created",
            ElectionState::Opened => "Opened",
            ElectionState::Closed => "Closed",
            ElectionState::ResultsReady => "ResultsReady",
        };
        write!(f, "{}", name)
    }
}

/// A question to put in a new election
#[derive(Debug, Clone)]
pub struct QuestionSpec {
    pub question: String,
    pub voting_method: VotingMethod,
    pub ballot_options: Vec<String>,
    pub write_in: bool,
}

impl QuestionSpec {
    pub fn plurality(question: &str, options: &[&str]) -> Self {
        QuestionSpec {
            question: question.to_string(),
            voting_method: VotingMethod::Plurality,
            ballot_options: options.iter().map(|o| o.to_string()).collect(),
            write_in: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Question {
    pub id: Identifier,
    pub question: String,
    pub voting_method: VotingMethod,
    pub ballot_options: Vec<String>,
    pub write_in: bool,
}

/// What happened to a cast_vote message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastOutcome {
    /// The ballot is now the sender's effective ballot
    Accepted,
    /// Older than, or identical to, a ballot already seen from the sender
    Stale,
}

/// The organizer closed the election over a different set of votes than the one seen here
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotesMismatch {
    pub local: Identifier,
    pub announced: Identifier,
}

#[derive(Debug, Clone, PartialEq)]
struct Ballot {
    message_id: MessageId,
    created_at: i64,
    votes: Vec<Vote>,
}

/// An election held inside a LAO
///
/// Moves strictly through `Created -> Opened -> Closed -> ResultsReady`. Each
/// voter has at most one effective ballot: the latest accepted cast_vote.
#[derive(Debug, Clone, PartialEq)]
pub struct Election {
    pub id: Identifier,
    pub lao_id: Identifier,
    pub name: String,
    pub version: ElectionVersion,
    pub creation: i64,
    pub start: i64,
    pub end: i64,
    pub questions: Vec<Question>,
    pub election_key: Option<ElectionPublicKey>,
    state: ElectionState,
    ballots: HashMap<PublicKey, Ballot>,
    superseded: HashSet<MessageId>,
    results: Option<ElectionResults>,
    votes_mismatch: Option<VotesMismatch>,
}

impl Election {
    /// `Hash("Election", lao, creation, name)`
    pub fn build_id(lao_id: &Identifier, creation: i64, name: &str) -> Identifier {
        Identifier::digest(&[
            "Election",
            lao_id.as_str(),
            creation.to_string().as_str(),
            name,
        ])
    }

    /// `Hash("Question", election, text)`
    pub fn build_question_id(election_id: &Identifier, question: &str) -> Identifier {
        Identifier::digest(&["Question", election_id.as_str(), question])
    }

    /// Create a new election
    pub fn setup(
        lao_id: &Identifier,
        name: &str,
        version: ElectionVersion,
        questions: Vec<QuestionSpec>,
        creation: i64,
        start: i64,
        end: i64,
    ) -> Result<Self, ValidationError> {
        let id = Election::build_id(lao_id, creation, name);
        let questions = questions
            .into_iter()
            .map(|q| Question {
                id: Election::build_question_id(&id, &q.question),
                question: q.question,
                voting_method: q.voting_method,
                ballot_options: q.ballot_options,
                write_in: q.write_in,
            })
            .collect();

        let election = Election {
            id,
            lao_id: lao_id.clone(),
            name: name.to_string(),
            version,
            creation,
            start,
            end,
            questions,
            election_key: None,
            state: ElectionState::Created,
            ballots: HashMap::new(),
            superseded: HashSet::new(),
            results: None,
            votes_mismatch: None,
        };
        election.check()?;
        Ok(election)
    }

    /// Rebuild an election from its published setup, checking every derived id
    pub fn from_setup(data: &ElectionSetup) -> Result<Self, ValidationError> {
        let expected = Election::build_id(&data.lao, data.created_at, &data.name);
        if expected != data.id {
            return Err(ValidationError::InvalidIdentifier {
                expected,
                found: data.id.clone(),
            });
        }

        let questions: Vec<Question> = data
            .questions
            .iter()
            .map(|q| {
                let expected = Election::build_question_id(&data.id, &q.question);
                if expected != q.id {
                    return Err(ValidationError::InvalidIdentifier {
                        expected,
                        found: q.id.clone(),
                    });
                }
                Ok(Question {
                    id: q.id.clone(),
                    question: q.question.clone(),
                    voting_method: q.voting_method,
                    ballot_options: q.ballot_options.clone(),
                    write_in: q.write_in,
                })
            })
            .collect::<Result<_, _>>()?;

        let election = Election {
            id: data.id.clone(),
            lao_id: data.lao.clone(),
            name: data.name.clone(),
            version: data.version,
            creation: data.created_at,
            start: data.start_time,
            end: data.end_time,
            questions,
            election_key: None,
            state: ElectionState::Created,
            ballots: HashMap::new(),
            superseded: HashSet::new(),
            results: None,
            votes_mismatch: None,
        };
        election.check()?;
        Ok(election)
    }

    fn check(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| Err(ValidationError::InvalidElection(reason.to_string()));

        if self.name.is_empty() {
            return invalid("name is empty");
        }
        if self.questions.is_empty() {
            return invalid("no questions");
        }
        if self.start < self.creation {
            return invalid("starts before it is created");
        }
        if self.end < self.start {
            return invalid("ends before it starts");
        }

        let mut seen = HashSet::new();
        for question in &self.questions {
            if !seen.insert(&question.id) {
                return invalid("duplicate question");
            }
            if question.ballot_options.is_empty() {
                return invalid("question without ballot options");
            }
            let options: BTreeSet<&String> = question.ballot_options.iter().collect();
            if options.len() != question.ballot_options.len() {
                return invalid("duplicate ballot option");
            }
        }
        Ok(())
    }

    /// The election/setup message announcing this election
    pub fn to_setup_data(&self) -> ElectionSetup {
        ElectionSetup {
            id: self.id.clone(),
            lao: self.lao_id.clone(),
            name: self.name.clone(),
            version: self.version,
            created_at: self.creation,
            start_time: self.start,
            end_time: self.end,
            questions: self
                .questions
                .iter()
                .map(|q| QuestionData {
                    id: q.id.clone(),
                    question: q.question.clone(),
                    voting_method: q.voting_method,
                    ballot_options: q.ballot_options.clone(),
                    write_in: q.write_in,
                })
                .collect(),
        }
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn channel(&self) -> Channel {
        Channel::election(&self.lao_id, &self.id)
    }

    pub fn question(&self, id: &Identifier) -> Option<&Question> {
        self.questions.iter().find(|q| &q.id == id)
    }

    fn transition(&mut self, to: ElectionState) -> Result<(), ValidationError> {
        let allowed = matches!(
            (self.state, to),
            (ElectionState::Created, ElectionState::Opened)
                | (ElectionState::Opened, ElectionState::Closed)
                | (ElectionState::Closed, ElectionState::ResultsReady)
        );
        if !allowed {
            return Err(ValidationError::InvalidStateTransition {
                from: self.state,
                to,
            });
        }
        info!(election = %self.id, from = %self.state, to = %to, "election: state change");
        self.state = to;
        Ok(())
    }

    /// Open the election for voting
    pub fn open(&mut self, opened_at: i64) -> Result<(), ValidationError> {
        if self.state == ElectionState::Created && opened_at < self.creation {
            return Err(ValidationError::InvalidTimestamp {
                found: opened_at,
                minimum: self.creation,
            });
        }
        self.transition(ElectionState::Opened)
    }

    /// Record the key secret ballots are encrypted under; only before voting starts
    pub fn set_key(&mut self, key: ElectionPublicKey) -> Result<(), ValidationError> {
        if self.version != ElectionVersion::SecretBallot {
            return Err(ValidationError::InvalidElection(
                "only secret ballots carry a key".into(),
            ));
        }
        if self.state != ElectionState::Created {
            return Err(ValidationError::InvalidElection(format!(
                "key cannot change once the election is {}",
                self.state
            )));
        }
        self.election_key = Some(key);
        Ok(())
    }

    /// Record a ballot from `sender`
    ///
    /// The latest ballot by arrival wins. A ballot that is older than the
    /// sender's current one, or was already seen, is reported as stale and ignored.
    pub fn cast_vote(
        &mut self,
        sender: PublicKey,
        message_id: &MessageId,
        created_at: i64,
        votes: Vec<Vote>,
    ) -> Result<CastOutcome, ValidationError> {
        if self.state != ElectionState::Opened {
            return Err(ValidationError::ElectionNotOpen(self.state));
        }
        if created_at < self.creation {
            return Err(ValidationError::InvalidTimestamp {
                found: created_at,
                minimum: self.creation,
            });
        }

        if self.superseded.contains(message_id) {
            return Ok(CastOutcome::Stale);
        }
        if let Some(current) = self.ballots.get(&sender) {
            if &current.message_id == message_id || created_at < current.created_at {
                return Ok(CastOutcome::Stale);
            }
        }

        self.check_ballot(&votes)?;

        let ballot = Ballot {
            message_id: message_id.clone(),
            created_at,
            votes,
        };
        if let Some(previous) = self.ballots.insert(sender, ballot) {
            debug!(election = %self.id, voter = %sender, "election: ballot superseded");
            self.superseded.insert(previous.message_id);
        }
        Ok(CastOutcome::Accepted)
    }

    fn check_ballot(&self, votes: &[Vote]) -> Result<(), ValidationError> {
        let mut answered = HashSet::new();
        for vote in votes {
            // An answer to a question the election does not ask is an extra answer
            let question = self
                .question(vote.question())
                .ok_or(ValidationError::IncompleteBallot)?;

            if !answered.insert(&question.id) {
                return Err(ValidationError::IncompleteBallot);
            }
            if !vote.matches_version(self.version) {
                return Err(ValidationError::VoteTypeMismatch(self.version));
            }
            if let Vote::Plain(plain) = vote {
                if plain.vote as usize >= question.ballot_options.len() {
                    return Err(ValidationError::InvalidBallotOption {
                        question: question.id.clone(),
                        index: plain.vote,
                    });
                }
            }

            let expected = vote.expected_id(&self.id);
            if &expected != vote.id() {
                return Err(ValidationError::InvalidVoteId {
                    expected,
                    found: vote.id().clone(),
                });
            }
        }

        if answered.len() != self.questions.len() {
            return Err(ValidationError::IncompleteBallot);
        }
        Ok(())
    }

    /// Every effective vote, in no particular order
    pub fn effective_votes(&self) -> impl Iterator<Item = &Vote> {
        self.ballots.values().flat_map(|b| b.votes.iter())
    }

    pub fn voter_count(&self) -> usize {
        self.ballots.len()
    }

    /// Hash of the sorted ids of every effective vote
    pub fn registered_votes_hash(&self) -> Identifier {
        let mut ids: Vec<&str> = self.effective_votes().map(|v| v.id().as_str()).collect();
        ids.sort_unstable();
        Identifier::digest(&ids)
    }

    /// Close the election
    ///
    /// The organizer's registered-votes hash, when given, is compared with the
    /// votes seen locally. A mismatch does not prevent closing; it is logged and
    /// kept in [`Election::votes_mismatch`].
    pub fn close(
        &mut self,
        closed_at: i64,
        registered_votes: Option<&Identifier>,
    ) -> Result<(), ValidationError> {
        if self.state != ElectionState::Opened {
            return Err(ValidationError::InvalidStateTransition {
                from: self.state,
                to: ElectionState::Closed,
            });
        }
        if closed_at < self.creation {
            return Err(ValidationError::InvalidTimestamp {
                found: closed_at,
                minimum: self.creation,
            });
        }
        let local = self.registered_votes_hash();
        let mismatch = registered_votes
            .filter(|announced| **announced != local)
            .map(|announced| VotesMismatch {
                local,
                announced: announced.clone(),
            });

        self.transition(ElectionState::Closed)?;
        self.end = closed_at;
        if let Some(mismatch) = &mismatch {
            warn!(
                election = %self.id,
                local = %mismatch.local,
                announced = %mismatch.announced,
                "election: closed over different votes than seen locally"
            );
        }
        self.votes_mismatch = mismatch;
        Ok(())
    }

    /// Set when the election was closed over votes that differ from the local ones
    pub fn votes_mismatch(&self) -> Option<&VotesMismatch> {
        self.votes_mismatch.as_ref()
    }

    /// Accept results published by the organizer
    pub fn apply_results(&mut self, results: ElectionResults) -> Result<(), ValidationError> {
        for id in results.keys() {
            if self.question(id).is_none() {
                return Err(ValidationError::UnknownQuestion(id.clone()));
            }
        }
        self.transition(ElectionState::ResultsReady)?;
        self.results = Some(results);
        Ok(())
    }

    pub fn results(&self) -> Option<&ElectionResults> {
        self.results.as_ref()
    }

    pub(crate) fn set_results(&mut self, results: ElectionResults) {
        self.results = Some(results);
    }

    pub(crate) fn ballots_by_question(&self) -> IndexMap<&Identifier, Vec<&Vote>> {
        let mut grouped: IndexMap<&Identifier, Vec<&Vote>> =
            self.questions.iter().map(|q| (&q.id, Vec::new())).collect();
        for vote in self.effective_votes() {
            if let Some(votes) = grouped.get_mut(vote.question()) {
                votes.push(vote);
            }
        }
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecies_ed25519::ElectionSecretKey;

    fn open_ballot() -> Election {
        let lao_id = Identifier::digest(&["lao"]);
        Election::setup(
            &lao_id,
            "Board",
            ElectionVersion::OpenBallot,
            vec![QuestionSpec::plurality("Chair?", &["A", "B"])],
            100,
            100,
            1000,
        )
        .unwrap()
    }

    fn ballot(election: &Election, index: u32) -> Vec<Vote> {
        vec![Vote::plain(&election.id, &election.questions[0].id, index)]
    }

    #[test]
    fn test_setup_ids() {
        let election = open_ballot();
        let lao_id = Identifier::digest(&["lao"]);
        assert_eq!(election.id, Election::build_id(&lao_id, 100, "Board"));
        assert_eq!(
            election.questions[0].id,
            Election::build_question_id(&election.id, "Chair?")
        );

        let rebuilt = Election::from_setup(&election.to_setup_data()).unwrap();
        assert_eq!(rebuilt, election);

        let mut tampered = election.to_setup_data();
        tampered.name = "Other".into();
        assert!(Election::from_setup(&tampered).is_err());

        let bad = Election::setup(
            &lao_id,
            "Empty",
            ElectionVersion::OpenBallot,
            vec![],
            100,
            100,
            1000,
        );
        assert!(matches!(bad, Err(ValidationError::InvalidElection(_))));
    }

    #[test]
    fn test_close_before_open() {
        let mut election = open_ballot();
        assert!(matches!(
            election.close(200, None),
            Err(ValidationError::InvalidStateTransition {
                from: ElectionState::Created,
                to: ElectionState::Closed
            })
        ));
        assert_eq!(election.state(), ElectionState::Created);

        election.open(150).unwrap();
        assert!(election.open(160).is_err());
    }

    #[test]
    fn test_vote_requires_open() {
        let mut election = open_ballot();
        let voter = generate_keypair().public_key();
        let votes = ballot(&election, 0);
        assert!(matches!(
            election.cast_vote(voter, &Identifier::digest(&["m1"]), 200, votes),
            Err(ValidationError::ElectionNotOpen(ElectionState::Created))
        ));
    }

    #[test]
    fn test_latest_vote_supersedes() {
        let mut election = open_ballot();
        election.open(150).unwrap();
        let voter = generate_keypair().public_key();

        let first = Identifier::digest(&["m1"]);
        let second = Identifier::digest(&["m2"]);
        assert_eq!(
            election
                .cast_vote(voter, &first, 200, ballot(&election, 0))
                .unwrap(),
            CastOutcome::Accepted
        );
        assert_eq!(
            election
                .cast_vote(voter, &second, 300, ballot(&election, 1))
                .unwrap(),
            CastOutcome::Accepted
        );

        let effective: Vec<&Vote> = election.effective_votes().collect();
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0], &ballot(&election, 1)[0]);

        // Replays of either message do not change anything
        assert_eq!(
            election
                .cast_vote(voter, &first, 200, ballot(&election, 0))
                .unwrap(),
            CastOutcome::Stale
        );
        assert_eq!(
            election
                .cast_vote(voter, &second, 300, ballot(&election, 1))
                .unwrap(),
            CastOutcome::Stale
        );
        // An older ballot arriving late is stale too
        let late = Identifier::digest(&["m0"]);
        assert_eq!(
            election
                .cast_vote(voter, &late, 250, ballot(&election, 0))
                .unwrap(),
            CastOutcome::Stale
        );
        assert_eq!(election.voter_count(), 1);
    }

    #[test]
    fn test_invalid_ballots() {
        let mut election = open_ballot();
        election.open(150).unwrap();
        let voter = generate_keypair().public_key();
        let m = Identifier::digest(&["m"]);

        assert!(matches!(
            election.cast_vote(voter, &m, 200, vec![]),
            Err(ValidationError::IncompleteBallot)
        ));

        let mut doubled = ballot(&election, 0);
        doubled.extend(ballot(&election, 1));
        assert!(matches!(
            election.cast_vote(voter, &m, 200, doubled),
            Err(ValidationError::IncompleteBallot)
        ));

        assert!(matches!(
            election.cast_vote(voter, &m, 200, ballot(&election, 2)),
            Err(ValidationError::InvalidBallotOption { index: 2, .. })
        ));

        let mut wrong_id = ballot(&election, 0);
        if let Vote::Plain(v) = &mut wrong_id[0] {
            v.id = Identifier::digest(&["forged"]);
        }
        assert!(matches!(
            election.cast_vote(voter, &m, 200, wrong_id),
            Err(ValidationError::InvalidVoteId { .. })
        ));

        let encrypted = vec![Vote::Encrypted(EncryptedVote {
            id: Identifier::digest(&["x"]),
            question: election.questions[0].id.clone(),
            vote: vec![1, 2, 3],
        })];
        assert!(matches!(
            election.cast_vote(voter, &m, 200, encrypted),
            Err(ValidationError::VoteTypeMismatch(ElectionVersion::OpenBallot))
        ));

        assert_eq!(election.voter_count(), 0);
    }

    #[test]
    fn test_registered_votes() {
        let mut election = open_ballot();
        election.open(150).unwrap();

        let a = generate_keypair().public_key();
        let b = generate_keypair().public_key();
        election
            .cast_vote(a, &Identifier::digest(&["m1"]), 200, ballot(&election, 0))
            .unwrap();
        election
            .cast_vote(b, &Identifier::digest(&["m2"]), 200, ballot(&election, 1))
            .unwrap();

        let mut agreed = election.clone();
        let hash = agreed.registered_votes_hash();
        agreed.close(500, Some(&hash)).unwrap();
        assert_eq!(agreed.state(), ElectionState::Closed);
        assert_eq!(agreed.end, 500);
        assert_eq!(agreed.votes_mismatch(), None);

        // A replica that missed votes still closes, and keeps the disagreement
        let wrong = Identifier::digest(&["wrong"]);
        election.close(500, Some(&wrong)).unwrap();
        assert_eq!(election.state(), ElectionState::Closed);
        assert_eq!(
            election.votes_mismatch(),
            Some(&VotesMismatch {
                local: hash,
                announced: wrong,
            })
        );
        assert!(election.tally(None).is_ok());
    }

    #[test]
    fn test_answer_to_unknown_question() {
        let mut election = open_ballot();
        election.open(150).unwrap();
        let voter = generate_keypair().public_key();

        let stray = Identifier::digest(&["not-a-question"]);
        let mut votes = ballot(&election, 0);
        votes.push(Vote::plain(&election.id, &stray, 0));
        assert!(matches!(
            election.cast_vote(voter, &Identifier::digest(&["m"]), 200, votes),
            Err(ValidationError::IncompleteBallot)
        ));

        let only_stray = vec![Vote::plain(&election.id, &stray, 0)];
        assert!(matches!(
            election.cast_vote(voter, &Identifier::digest(&["m"]), 200, only_stray),
            Err(ValidationError::IncompleteBallot)
        ));
        assert_eq!(election.voter_count(), 0);
    }

    #[test]
    fn test_key_fixed_once_opened() {
        let lao_id = Identifier::digest(&["lao"]);
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

        let first = ElectionSecretKey::generate().public_key();
        election.set_key(first).unwrap();
        // Still allowed to correct it before voting starts
        let second = ElectionSecretKey::generate().public_key();
        election.set_key(second).unwrap();

        election.open(150).unwrap();
        assert!(matches!(
            election.set_key(first),
            Err(ValidationError::InvalidElection(_))
        ));
        assert_eq!(election.election_key, Some(second));

        assert!(open_ballot().set_key(first).is_err());
    }
}
