use crate::ecies_ed25519::ElectionPublicKey;
use crate::*;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What applying a message led to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Handled {
    /// Channels that now carry relevant messages and should be joined
    pub join: Vec<Channel>,
    /// The message had already been applied
    pub duplicate: bool,
}

impl Handled {
    fn join(channels: Vec<Channel>) -> Self {
        Handled {
            join: channels,
            duplicate: false,
        }
    }
}

/// Applies verified envelopes to the local state
///
/// Routes each message on its `(object, action)` pair and the shape of the
/// channel it arrived on, checks the sender's authority and updates the LAO it
/// belongs to under that LAO's lock.
pub struct MessageHandler {
    store: Arc<MemStore>,
}

impl MessageHandler {
    pub fn new(store: Arc<MemStore>) -> Self {
        MessageHandler { store }
    }

    pub fn store(&self) -> &Arc<MemStore> {
        &self.store
    }

    /// Verify and apply one message received on `channel`
    pub fn handle_message(
        &self,
        channel: &Channel,
        envelope: &Envelope,
    ) -> Result<Handled, HandlerError> {
        let message_id = envelope.message_id();
        if !self.store.claim(message_id) {
            debug!(message_id = %message_id, "handler: already applied");
            return Ok(Handled {
                join: Vec::new(),
                duplicate: true,
            });
        }

        let result = envelope
            .verify()
            .map_err(HandlerError::from)
            .and_then(|_| self.dispatch(channel, envelope));

        if let Err(e) = &result {
            self.store.release(message_id);
            warn!(
                channel = %channel,
                message_id = %message_id,
                object = envelope.data().object().as_str(),
                action = envelope.data().action().as_str(),
                "handler: message rejected: {}", e
            );
        }
        result
    }

    fn dispatch(&self, channel: &Channel, envelope: &Envelope) -> Result<Handled, HandlerError> {
        let sender = envelope.sender();
        let message_id = envelope.message_id();

        match envelope.data() {
            MessageData::CreateLao(data) => self.create_lao(channel, sender, message_id, data),
            MessageData::UpdateLaoProperties(data) => {
                self.update_lao(channel, sender, message_id, data)
            }
            MessageData::StateLao(data) => self.lao_state(channel, sender, data),
            MessageData::Witness(data) => self.witness(channel, sender, data),
            MessageData::CreateMeeting(data) => {
                self.create_meeting(channel, sender, message_id, data)
            }
            MessageData::StateMeeting(data) => self.meeting_state(channel, sender, data),
            MessageData::CreateRollCall(data) => {
                self.create_roll_call(channel, sender, message_id, data)
            }
            MessageData::OpenRollCall(data) => {
                self.update_roll_call(channel, sender, "roll_call/open", &data.opens, |rc| {
                    rc.open(data)
                })
            }
            MessageData::ReopenRollCall(data) => {
                self.update_roll_call(channel, sender, "roll_call/reopen", &data.opens, |rc| {
                    rc.reopen(data)
                })
            }
            MessageData::CloseRollCall(data) => {
                self.update_roll_call(channel, sender, "roll_call/close", &data.closes, |rc| {
                    rc.close(data)
                })
            }
            MessageData::ElectionSetup(data) => {
                self.setup_election(channel, sender, message_id, data)
            }
            MessageData::ElectionKey(data) => self.election_key(channel, sender, data),
            MessageData::OpenElection(data) => self.open_election(channel, sender, data),
            MessageData::CastVote(data) => self.cast_vote(channel, sender, message_id, data),
            MessageData::EndElection(data) => self.end_election(channel, sender, data),
            MessageData::ElectionResult(data) => self.election_result(channel, sender, data),
            MessageData::PostTransaction(data) => self.post_transaction(channel, data),
        }
    }

    fn wrong_channel(channel: &Channel, action: &str) -> HandlerError {
        HandlerError::WrongChannel {
            action: action.to_string(),
            channel: channel.clone(),
        }
    }

    /// The LAO a non-root channel belongs to
    fn lao_for(&self, channel: &Channel) -> Result<(Identifier, Arc<Mutex<LaoState>>), HandlerError> {
        let lao_id = channel
            .lao_id()
            .ok_or_else(|| Self::wrong_channel(channel, "lao message"))?;
        let state = self
            .store
            .lao_state(&lao_id)
            .ok_or_else(|| HandlerError::UnknownLao(lao_id.clone()))?;
        Ok((lao_id, state))
    }

    fn require_organizer(state: &LaoState, sender: &PublicKey) -> Result<(), HandlerError> {
        if !state.lao.is_organizer(sender) {
            return Err(HandlerError::Unauthorized(*sender));
        }
        Ok(())
    }

    fn same_id(expected: &Identifier, found: &Identifier) -> Result<(), HandlerError> {
        if expected != found {
            return Err(ValidationError::InvalidIdentifier {
                expected: expected.clone(),
                found: found.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn create_lao(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        message_id: &MessageId,
        data: &CreateLao,
    ) -> Result<Handled, HandlerError> {
        if !channel.is_root() {
            return Err(Self::wrong_channel(channel, "lao/create"));
        }
        if &data.organizer != sender {
            return Err(HandlerError::Unauthorized(*sender));
        }

        let lao = Lao::create(data, message_id)?;
        let lao_id = lao.id.clone();
        if self.store.insert_lao(lao) {
            info!(lao = %lao_id, name = %data.name, "handler: lao created");
            self.store.notify(StoreEvent::LaoCreated(lao_id.clone()));
        }

        Ok(Handled::join(vec![
            Channel::lao(&lao_id),
            Channel::coin(&lao_id),
        ]))
    }

    fn update_lao(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        message_id: &MessageId,
        data: &UpdateLaoProperties,
    ) -> Result<Handled, HandlerError> {
        if !channel.is_lao_channel() {
            return Err(Self::wrong_channel(channel, "lao/update_properties"));
        }
        let (lao_id, state) = self.lao_for(channel)?;
        let mut state = state.lock();
        Self::require_organizer(&state, sender)?;

        state.lao.update(data, message_id)?;
        let witnesses = state.lao.witnesses.clone();
        state.witnessing.set_witnesses(witnesses);

        self.store.notify(StoreEvent::LaoUpdated(lao_id));
        Ok(Handled::default())
    }

    fn lao_state(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        data: &StateLao,
    ) -> Result<Handled, HandlerError> {
        if !channel.is_lao_channel() {
            return Err(Self::wrong_channel(channel, "lao/state"));
        }
        let (lao_id, state) = self.lao_for(channel)?;
        let mut state = state.lock();
        Self::require_organizer(&state, sender)?;

        verify_modification(
            &state.lao.witnesses,
            &data.modification_id,
            &data.modification_signatures,
        )?;
        if state.lao.apply_state(data)? {
            info!(
                lao = %lao_id,
                modification = %data.modification_id,
                "handler: lao state adopted"
            );
            let witnesses = state.lao.witnesses.clone();
            state.witnessing.set_witnesses(witnesses);
            self.store.notify(StoreEvent::LaoUpdated(lao_id));
        }
        Ok(Handled::default())
    }

    fn witness(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        data: &WitnessSignatureData,
    ) -> Result<Handled, HandlerError> {
        if !channel.is_lao_channel() {
            return Err(Self::wrong_channel(channel, "message/witness"));
        }
        let (lao_id, state) = self.lao_for(channel)?;
        let mut state = state.lock();

        let acknowledgement =
            state
                .witnessing
                .acknowledge(&data.message_id, sender, &data.signature)?;

        self.store.notify(StoreEvent::WitnessSignature {
            lao_id: lao_id.clone(),
            message_id: data.message_id.clone(),
            witness: *sender,
        });

        if let Acknowledgement::Committed(entity) = acknowledgement {
            self.commit_pending(&lao_id, &mut state, entity);
        }
        Ok(Handled::default())
    }

    /// Make an approved object take effect
    fn commit_pending(&self, lao_id: &Identifier, state: &mut LaoState, entity: PendingEntity) {
        match entity.object {
            PendingObject::Election(election) => {
                let election_id = election.id.clone();
                if !state.elections.contains_key(&election_id) {
                    info!(lao = %lao_id, election = %election_id, "handler: election created");
                    state.elections.insert(election_id.clone(), election);
                    self.store.notify(StoreEvent::ElectionChanged {
                        lao_id: lao_id.clone(),
                        election_id,
                        state: ElectionState::Created,
                    });
                }
            }
            PendingObject::Meeting(meeting) => {
                let meeting_id = meeting.id.clone();
                if !state.meetings.contains_key(&meeting_id) {
                    info!(lao = %lao_id, meeting = %meeting_id, "handler: meeting created");
                    state.meetings.insert(meeting_id.clone(), meeting);
                    self.store.notify(StoreEvent::MeetingChanged {
                        lao_id: lao_id.clone(),
                        meeting_id,
                    });
                }
            }
            PendingObject::RollCall(roll_call) => {
                let roll_call_id = roll_call.id.clone();
                if !state.roll_calls.contains_key(&roll_call_id) {
                    info!(lao = %lao_id, roll_call = %roll_call_id, "handler: roll call created");
                    state.roll_calls.insert(roll_call_id.clone(), roll_call);
                    self.store.notify(StoreEvent::RollCallChanged {
                        lao_id: lao_id.clone(),
                        roll_call_id,
                        state: RollCallState::Created,
                    });
                }
            }
        }
    }

    fn propose(
        &self,
        lao_id: &Identifier,
        state: &mut LaoState,
        message_id: &MessageId,
        object: PendingObject,
    ) {
        let required = state.witnessing.witnesses().clone();
        match state.witnessing.propose(message_id.clone(), object, required) {
            Proposal::Committed(entity) => self.commit_pending(lao_id, state, entity),
            Proposal::Pending => {
                debug!(lao = %lao_id, message_id = %message_id, "handler: waiting for witnesses")
            }
        }
    }

    fn create_roll_call(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        message_id: &MessageId,
        data: &CreateRollCall,
    ) -> Result<Handled, HandlerError> {
        if !channel.is_lao_channel() {
            return Err(Self::wrong_channel(channel, "roll_call/create"));
        }
        let (lao_id, state) = self.lao_for(channel)?;
        let mut state = state.lock();
        Self::require_organizer(&state, sender)?;

        let roll_call = RollCall::create(&lao_id, data)?;
        self.propose(&lao_id, &mut state, message_id, PendingObject::RollCall(roll_call));
        Ok(Handled::default())
    }

    /// Move a roll call through open, reopen or close
    fn update_roll_call(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        action: &str,
        roll_call_id: &Identifier,
        f: impl FnOnce(&mut RollCall) -> Result<(), ValidationError>,
    ) -> Result<Handled, HandlerError> {
        if !channel.is_lao_channel() {
            return Err(Self::wrong_channel(channel, action));
        }
        let (lao_id, state) = self.lao_for(channel)?;
        let mut state = state.lock();
        Self::require_organizer(&state, sender)?;

        let roll_call = state
            .roll_calls
            .get_mut(roll_call_id)
            .ok_or_else(|| HandlerError::UnknownRollCall(roll_call_id.clone()))?;
        f(roll_call)?;
        debug!(
            lao = %lao_id,
            roll_call = %roll_call_id,
            state = ?roll_call.state,
            "handler: {}", action
        );

        self.store.notify(StoreEvent::RollCallChanged {
            lao_id,
            roll_call_id: roll_call_id.clone(),
            state: roll_call.state,
        });
        Ok(Handled::default())
    }

    fn create_meeting(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        message_id: &MessageId,
        data: &CreateMeeting,
    ) -> Result<Handled, HandlerError> {
        if !channel.is_lao_channel() {
            return Err(Self::wrong_channel(channel, "meeting/create"));
        }
        let (lao_id, state) = self.lao_for(channel)?;
        let mut state = state.lock();
        Self::require_organizer(&state, sender)?;

        let meeting = Meeting::create(&lao_id, data, message_id)?;
        self.propose(&lao_id, &mut state, message_id, PendingObject::Meeting(meeting));
        Ok(Handled::default())
    }

    fn meeting_state(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        data: &StateMeeting,
    ) -> Result<Handled, HandlerError> {
        if !channel.is_lao_channel() {
            return Err(Self::wrong_channel(channel, "meeting/state"));
        }
        let (lao_id, state) = self.lao_for(channel)?;
        let mut state = state.lock();
        Self::require_organizer(&state, sender)?;

        verify_modification(
            &state.lao.witnesses,
            &data.modification_id,
            &data.modification_signatures,
        )?;
        let meeting = state
            .meetings
            .get_mut(&data.id)
            .ok_or_else(|| HandlerError::UnknownMeeting(data.id.clone()))?;
        meeting.apply_state(data)?;

        self.store.notify(StoreEvent::MeetingChanged {
            lao_id,
            meeting_id: data.id.clone(),
        });
        Ok(Handled::default())
    }

    fn setup_election(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        message_id: &MessageId,
        data: &ElectionSetup,
    ) -> Result<Handled, HandlerError> {
        if !channel.is_lao_channel() {
            return Err(Self::wrong_channel(channel, "election/setup"));
        }
        let (lao_id, state) = self.lao_for(channel)?;
        let mut state = state.lock();
        Self::require_organizer(&state, sender)?;
        Self::same_id(&lao_id, &data.lao)?;

        let election = Election::from_setup(data)?;
        let election_channel = election.channel();
        self.propose(&lao_id, &mut state, message_id, PendingObject::Election(election));

        Ok(Handled::join(vec![election_channel]))
    }

    /// Run `f` on the election an election channel belongs to
    fn with_election<R>(
        &self,
        channel: &Channel,
        action: &str,
        election: &Identifier,
        f: impl FnOnce(&Identifier, &mut LaoState) -> Result<R, HandlerError>,
    ) -> Result<R, HandlerError> {
        let election_id = channel
            .election_id()
            .ok_or_else(|| Self::wrong_channel(channel, action))?;
        Self::same_id(&election_id, election)?;

        let (lao_id, state) = self.lao_for(channel)?;
        let mut state = state.lock();
        if !state.elections.contains_key(&election_id) {
            return Err(HandlerError::UnknownElection(election_id));
        }
        f(&lao_id, &mut state)
    }

    fn notify_election(&self, lao_id: &Identifier, election: &Election) {
        self.store.notify(StoreEvent::ElectionChanged {
            lao_id: lao_id.clone(),
            election_id: election.id.clone(),
            state: election.state(),
        });
    }

    fn election_key(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        data: &ElectionKeyData,
    ) -> Result<Handled, HandlerError> {
        let key: ElectionPublicKey = data.election_key.parse()?;
        self.with_election(channel, "election/key", &data.election, |_, state| {
            Self::require_organizer(state, sender)?;
            if let Some(election) = state.elections.get_mut(&data.election) {
                election.set_key(key)?;
            }
            Ok(Handled::default())
        })
    }

    fn open_election(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        data: &OpenElection,
    ) -> Result<Handled, HandlerError> {
        self.with_election(channel, "election/open", &data.election, |lao_id, state| {
            Self::require_organizer(state, sender)?;
            Self::same_id(lao_id, &data.lao)?;
            if let Some(election) = state.elections.get_mut(&data.election) {
                election.open(data.opened_at)?;
                self.notify_election(lao_id, election);
            }
            Ok(Handled::default())
        })
    }

    fn cast_vote(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        message_id: &MessageId,
        data: &CastVote,
    ) -> Result<Handled, HandlerError> {
        self.with_election(channel, "election/cast_vote", &data.election, |lao_id, state| {
            Self::same_id(lao_id, &data.lao)?;
            if let Some(election) = state.elections.get_mut(&data.election) {
                let outcome =
                    election.cast_vote(*sender, message_id, data.created_at, data.votes.clone())?;
                if outcome == CastOutcome::Accepted {
                    self.store.notify(StoreEvent::VoteRecorded {
                        lao_id: lao_id.clone(),
                        election_id: data.election.clone(),
                        voter: *sender,
                    });
                }
            }
            Ok(Handled::default())
        })
    }

    fn end_election(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        data: &EndElection,
    ) -> Result<Handled, HandlerError> {
        self.with_election(channel, "election/end", &data.election, |lao_id, state| {
            Self::require_organizer(state, sender)?;
            Self::same_id(lao_id, &data.lao)?;
            if let Some(election) = state.elections.get_mut(&data.election) {
                election.close(data.created_at, Some(&data.registered_votes))?;
                self.notify_election(lao_id, election);
            }
            Ok(Handled::default())
        })
    }

    fn election_result(
        &self,
        channel: &Channel,
        sender: &PublicKey,
        data: &ElectionResultData,
    ) -> Result<Handled, HandlerError> {
        let election_id = channel
            .election_id()
            .ok_or_else(|| Self::wrong_channel(channel, "election/result"))?;
        self.with_election(channel, "election/result", &election_id, |lao_id, state| {
            Self::require_organizer(state, sender)?;
            if let Some(election) = state.elections.get_mut(&election_id) {
                election.apply_results(results_from_data(data))?;
                self.notify_election(lao_id, election);
            }
            Ok(Handled::default())
        })
    }

    fn post_transaction(
        &self,
        channel: &Channel,
        data: &PostTransaction,
    ) -> Result<Handled, HandlerError> {
        if !channel.is_coin_channel() {
            return Err(Self::wrong_channel(channel, "coin/post_transaction"));
        }
        let (lao_id, state) = self.lao_for(channel)?;
        let mut state = state.lock();

        let outcome = state
            .ledger
            .commit_posted(&data.transaction_id, data.transaction.clone())?;
        if outcome == CommitOutcome::Committed {
            self.store.notify(StoreEvent::TransactionCommitted {
                lao_id,
                transaction_id: data.transaction_id.clone(),
            });
        }
        Ok(Handled::default())
    }
}
