use crate::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// An object waiting for witness approval before it takes effect
#[derive(Debug, Clone, PartialEq)]
pub enum PendingObject {
    Election(Election),
    RollCall(RollCall),
    Meeting(Meeting),
}

impl PendingObject {
    /// The id of the logical object, shared by successive proposals for it
    pub fn object_id(&self) -> &Identifier {
        match self {
            PendingObject::Election(election) => &election.id,
            PendingObject::RollCall(roll_call) => &roll_call.id,
            PendingObject::Meeting(meeting) => &meeting.id,
        }
    }

    fn title(&self) -> String {
        match self {
            PendingObject::Election(election) => format!("Election setup: {}", election.name),
            PendingObject::RollCall(roll_call) => format!("Roll call: {}", roll_call.name),
            PendingObject::Meeting(meeting) => format!("Meeting: {}", meeting.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntity {
    pub message_id: MessageId,
    pub lao_id: Identifier,
    pub object: PendingObject,
}

/// Witness signatures collected for one message
#[derive(Debug, Clone, PartialEq)]
pub struct WitnessMessage {
    pub message_id: MessageId,
    pub title: String,
    pub description: String,
    pub required: BTreeSet<PublicKey>,
    pub collected: BTreeMap<PublicKey, Signature>,
}

impl WitnessMessage {
    pub fn is_resolved(&self) -> bool {
        self.required.iter().all(|w| self.collected.contains_key(w))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Proposed,
    Committed,
    Superseded,
}

/// Result of proposing an object
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    /// Waiting for witness signatures
    Pending,
    /// No witness is required; the object takes effect right away
    Committed(PendingEntity),
}

/// Result of a valid witness acknowledgement
#[derive(Debug, Clone, PartialEq)]
pub enum Acknowledgement {
    /// Signature recorded, quorum not reached yet
    Recorded { collected: usize, required: usize },
    /// This signature completed the quorum
    Committed(PendingEntity),
    AlreadyCommitted,
    Superseded,
}

/// Cooperative multi-signature approval for one LAO
///
/// Objects are proposed with the set of witnesses whose signatures they need.
/// Once every required witness has signed, the pending object is handed back to
/// the caller exactly once. A newer proposal for the same object supersedes an
/// older one that is still pending.
#[derive(Debug, Clone)]
pub struct WitnessingEngine {
    lao_id: Identifier,
    witnesses: BTreeSet<PublicKey>,
    messages: HashMap<MessageId, WitnessMessage>,
    pending: HashMap<MessageId, PendingEntity>,
    states: HashMap<MessageId, PendingState>,
    latest_proposal: HashMap<Identifier, MessageId>,
}

impl WitnessingEngine {
    pub fn new(lao_id: Identifier, witnesses: BTreeSet<PublicKey>) -> Self {
        WitnessingEngine {
            lao_id,
            witnesses,
            messages: HashMap::new(),
            pending: HashMap::new(),
            states: HashMap::new(),
            latest_proposal: HashMap::new(),
        }
    }

    pub fn witnesses(&self) -> &BTreeSet<PublicKey> {
        &self.witnesses
    }

    /// Replace the witness set; applies to proposals made from now on
    pub fn set_witnesses(&mut self, witnesses: BTreeSet<PublicKey>) {
        self.witnesses = witnesses;
    }

    /// Register an object that needs the signatures of `required`
    pub fn propose(
        &mut self,
        message_id: MessageId,
        object: PendingObject,
        required: BTreeSet<PublicKey>,
    ) -> Proposal {
        let entity = PendingEntity {
            message_id: message_id.clone(),
            lao_id: self.lao_id.clone(),
            object,
        };

        self.messages.insert(
            message_id.clone(),
            WitnessMessage {
                message_id: message_id.clone(),
                title: entity.object.title(),
                description: String::new(),
                required: required.clone(),
                collected: BTreeMap::new(),
            },
        );

        let object_id = entity.object.object_id().clone();
        if let Some(previous) = self.latest_proposal.insert(object_id, message_id.clone()) {
            if self.states.get(&previous) == Some(&PendingState::Proposed) {
                debug!(superseded = %previous, by = %message_id, "witnessing: proposal superseded");
                self.pending.remove(&previous);
                self.states.insert(previous, PendingState::Superseded);
            }
        }

        if required.is_empty() {
            self.states.insert(message_id, PendingState::Committed);
            return Proposal::Committed(entity);
        }

        self.states.insert(message_id.clone(), PendingState::Proposed);
        self.pending.insert(message_id, entity);
        Proposal::Pending
    }

    /// Record a witness signature for a proposed message
    pub fn acknowledge(
        &mut self,
        message_id: &MessageId,
        witness: &PublicKey,
        signature: &Signature,
    ) -> Result<Acknowledgement, ValidationError> {
        let result = self.try_acknowledge(message_id, witness, signature);
        if let Err(e) = &result {
            warn!(message_id = %message_id, witness = %witness, "witnessing: rejected: {}", e);
        }
        result
    }

    fn try_acknowledge(
        &mut self,
        message_id: &MessageId,
        witness: &PublicKey,
        signature: &Signature,
    ) -> Result<Acknowledgement, ValidationError> {
        let message = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| ValidationError::UnknownPending(message_id.clone()))?;

        // Fixed when the object was proposed
        if !message.required.contains(witness) {
            return Err(ValidationError::UnknownWitness(*witness));
        }

        witness
            .verify(&message_id.to_bytes(), signature)
            .map_err(|_| ValidationError::BadWitnessSignature(message_id.clone()))?;

        match self.states.get(message_id) {
            Some(PendingState::Committed) => return Ok(Acknowledgement::AlreadyCommitted),
            Some(PendingState::Superseded) => return Ok(Acknowledgement::Superseded),
            Some(PendingState::Proposed) => {}
            None => return Err(ValidationError::UnknownPending(message_id.clone())),
        }

        message.collected.insert(*witness, *signature);

        if !message.is_resolved() {
            return Ok(Acknowledgement::Recorded {
                collected: message.collected.len(),
                required: message.required.len(),
            });
        }

        let entity = self
            .pending
            .remove(message_id)
            .ok_or_else(|| ValidationError::UnknownPending(message_id.clone()))?;
        self.states.insert(message_id.clone(), PendingState::Committed);
        debug!(message_id = %message_id, "witnessing: quorum reached");

        Ok(Acknowledgement::Committed(entity))
    }

    pub fn state_of(&self, message_id: &MessageId) -> Option<PendingState> {
        self.states.get(message_id).copied()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingEntity> {
        self.pending.values()
    }

    pub fn witness_message(&self, message_id: &MessageId) -> Option<&WitnessMessage> {
        self.messages.get(message_id)
    }

    pub fn witness_messages(&self) -> impl Iterator<Item = &WitnessMessage> {
        self.messages.values()
    }
}

/// Check that every witness in `witnesses` co-signed `modification_id`
///
/// Used for the state messages that certify an already witnessed change.
pub fn verify_modification(
    witnesses: &BTreeSet<PublicKey>,
    modification_id: &MessageId,
    signatures: &[WitnessSignature],
) -> Result<(), ValidationError> {
    let mut signed = BTreeSet::new();
    for pair in signatures {
        if !witnesses.contains(&pair.witness) {
            return Err(ValidationError::UnknownWitness(pair.witness));
        }
        pair.witness
            .verify(&modification_id.to_bytes(), &pair.signature)
            .map_err(|_| ValidationError::BadWitnessSignature(modification_id.clone()))?;
        signed.insert(pair.witness);
    }

    match witnesses.iter().find(|w| !signed.contains(*w)) {
        Some(missing) => Err(ValidationError::MissingWitnessSignature(*missing)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roll_call(lao_id: &Identifier, name: &str) -> PendingObject {
        let data = RollCall::new_data(lao_id, name, 100, 200, 300, "Hall");
        PendingObject::RollCall(RollCall::create(lao_id, &data).unwrap())
    }

    fn setup() -> (WitnessingEngine, Vec<KeyPair>) {
        let witnesses: Vec<KeyPair> = (0..3).map(|_| generate_keypair()).collect();
        let engine = WitnessingEngine::new(
            Identifier::digest(&["lao"]),
            witnesses.iter().map(|w| w.public_key()).collect(),
        );
        (engine, witnesses)
    }

    fn ack(
        engine: &mut WitnessingEngine,
        witness: &KeyPair,
        message_id: &MessageId,
    ) -> Result<Acknowledgement, ValidationError> {
        let signature = witness.sign(&message_id.to_bytes());
        engine.acknowledge(message_id, &witness.public_key(), &signature)
    }

    #[test]
    fn test_quorum() {
        let (mut engine, w) = setup();
        let lao_id = Identifier::digest(&["lao"]);
        let message_id = Identifier::digest(&["m1"]);
        let required = engine.witnesses().clone();

        let proposal = engine.propose(message_id.clone(), roll_call(&lao_id, "rc"), required);
        assert_eq!(proposal, Proposal::Pending);

        assert_eq!(
            ack(&mut engine, &w[0], &message_id).unwrap(),
            Acknowledgement::Recorded {
                collected: 1,
                required: 3
            }
        );
        assert!(matches!(
            ack(&mut engine, &w[1], &message_id).unwrap(),
            Acknowledgement::Recorded { collected: 2, .. }
        ));
        assert_eq!(engine.state_of(&message_id), Some(PendingState::Proposed));

        match ack(&mut engine, &w[2], &message_id).unwrap() {
            Acknowledgement::Committed(entity) => assert_eq!(entity.message_id, message_id),
            other => panic!("expected commit, got {:?}", other),
        }
        assert_eq!(engine.state_of(&message_id), Some(PendingState::Committed));
        assert_eq!(engine.pending().count(), 0);

        // A duplicate acknowledgement after commit is a no-op
        assert_eq!(
            ack(&mut engine, &w[0], &message_id).unwrap(),
            Acknowledgement::AlreadyCommitted
        );
    }

    #[test]
    fn test_no_witnesses_commits_immediately() {
        let mut engine = WitnessingEngine::new(Identifier::digest(&["lao"]), BTreeSet::new());
        let lao_id = Identifier::digest(&["lao"]);
        let message_id = Identifier::digest(&["m1"]);

        match engine.propose(message_id.clone(), roll_call(&lao_id, "rc"), BTreeSet::new()) {
            Proposal::Committed(entity) => assert_eq!(entity.message_id, message_id),
            Proposal::Pending => panic!("expected immediate commit"),
        }
        assert_eq!(engine.state_of(&message_id), Some(PendingState::Committed));
    }

    #[test]
    fn test_rejections() {
        let (mut engine, w) = setup();
        let lao_id = Identifier::digest(&["lao"]);
        let message_id = Identifier::digest(&["m1"]);
        let required = engine.witnesses().clone();
        engine.propose(message_id.clone(), roll_call(&lao_id, "rc"), required);

        let stranger = generate_keypair();
        assert!(matches!(
            ack(&mut engine, &stranger, &message_id),
            Err(ValidationError::UnknownWitness(_))
        ));

        let unknown = Identifier::digest(&["nothing"]);
        assert!(matches!(
            ack(&mut engine, &w[0], &unknown),
            Err(ValidationError::UnknownPending(_))
        ));

        let wrong_signature = w[0].sign(b"something else");
        assert!(matches!(
            engine.acknowledge(&message_id, &w[0].public_key(), &wrong_signature),
            Err(ValidationError::BadWitnessSignature(_))
        ));

        // Rejections leave nothing behind
        assert!(engine.witness_message(&message_id).unwrap().collected.is_empty());
    }

    #[test]
    fn test_supersede() {
        let (mut engine, w) = setup();
        let lao_id = Identifier::digest(&["lao"]);
        let required = engine.witnesses().clone();

        let first = Identifier::digest(&["m1"]);
        let second = Identifier::digest(&["m2"]);
        engine.propose(first.clone(), roll_call(&lao_id, "rc"), required.clone());
        engine.propose(second.clone(), roll_call(&lao_id, "rc"), required);

        assert_eq!(engine.state_of(&first), Some(PendingState::Superseded));
        assert_eq!(engine.state_of(&second), Some(PendingState::Proposed));
        assert_eq!(engine.pending().count(), 1);

        assert_eq!(
            ack(&mut engine, &w[0], &first).unwrap(),
            Acknowledgement::Superseded
        );
    }

    #[test]
    fn test_quorum_fixed_at_proposal() {
        let (mut engine, w) = setup();
        let lao_id = Identifier::digest(&["lao"]);
        let message_id = Identifier::digest(&["m1"]);
        let required = engine.witnesses().clone();
        engine.propose(message_id.clone(), roll_call(&lao_id, "rc"), required);

        // Added to the LAO after the proposal was made
        let newcomer = generate_keypair();
        let mut witnesses = engine.witnesses().clone();
        witnesses.insert(newcomer.public_key());
        engine.set_witnesses(witnesses);

        assert!(matches!(
            ack(&mut engine, &newcomer, &message_id),
            Err(ValidationError::UnknownWitness(_))
        ));
        assert!(engine.witness_message(&message_id).unwrap().collected.is_empty());

        for witness in &w[..2] {
            ack(&mut engine, witness, &message_id).unwrap();
        }
        assert!(matches!(
            ack(&mut engine, &w[2], &message_id).unwrap(),
            Acknowledgement::Committed(_)
        ));
    }

    #[test]
    fn test_verify_modification() {
        let (engine, w) = setup();
        let modification_id = Identifier::digest(&["update"]);
        let sign = |witness: &KeyPair| WitnessSignature {
            witness: witness.public_key(),
            signature: witness.sign(&modification_id.to_bytes()),
        };
        let all: Vec<WitnessSignature> = w.iter().map(sign).collect();

        verify_modification(engine.witnesses(), &modification_id, &all).unwrap();

        assert!(matches!(
            verify_modification(engine.witnesses(), &modification_id, &all[..2]),
            Err(ValidationError::MissingWitnessSignature(_))
        ));

        let stranger = generate_keypair();
        let mut extra = all.clone();
        extra.push(sign(&stranger));
        assert!(matches!(
            verify_modification(engine.witnesses(), &modification_id, &extra),
            Err(ValidationError::UnknownWitness(_))
        ));

        let mut forged = all;
        forged[0].signature = w[0].sign(b"something else");
        assert!(matches!(
            verify_modification(engine.witnesses(), &modification_id, &forged),
            Err(ValidationError::BadWitnessSignature(_))
        ));
    }
}
