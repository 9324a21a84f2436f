use crate::*;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Everything known about one LAO
///
/// Owned by the store and only ever mutated under its lock, so readers see
/// either all or none of a message's effects.
#[derive(Debug, Clone)]
pub struct LaoState {
    pub lao: Lao,
    pub witnessing: WitnessingEngine,
    pub elections: HashMap<Identifier, Election>,
    pub roll_calls: HashMap<Identifier, RollCall>,
    pub meetings: HashMap<Identifier, Meeting>,
    pub ledger: Ledger,
}

impl LaoState {
    pub fn new(lao: Lao) -> Self {
        LaoState {
            witnessing: WitnessingEngine::new(lao.id.clone(), lao.witnesses.clone()),
            ledger: Ledger::new(lao.organizer),
            elections: HashMap::new(),
            roll_calls: HashMap::new(),
            meetings: HashMap::new(),
            lao,
        }
    }
}

/// Change notifications for observers of the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    LaoCreated(Identifier),
    LaoUpdated(Identifier),
    ElectionChanged {
        lao_id: Identifier,
        election_id: Identifier,
        state: ElectionState,
    },
    VoteRecorded {
        lao_id: Identifier,
        election_id: Identifier,
        voter: PublicKey,
    },
    RollCallChanged {
        lao_id: Identifier,
        roll_call_id: Identifier,
        state: RollCallState,
    },
    MeetingChanged {
        lao_id: Identifier,
        meeting_id: Identifier,
    },
    WitnessSignature {
        lao_id: Identifier,
        message_id: MessageId,
        witness: PublicKey,
    },
    TransactionCommitted {
        lao_id: Identifier,
        transaction_id: Identifier,
    },
}

/// A point-in-time copy of every LAO's state
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub laos: Vec<LaoState>,
}

/// Read access to LAO state
pub trait Store {
    /// Run `f` against the state of a LAO
    fn with_lao<R>(&self, lao_id: &Identifier, f: impl FnOnce(&LaoState) -> R) -> Option<R>;

    /// Get a LAO
    fn get_lao(&self, lao_id: &Identifier) -> Option<Lao> {
        self.with_lao(lao_id, |state| state.lao.clone())
    }

    /// Get an election of a LAO
    fn get_election(&self, lao_id: &Identifier, election_id: &Identifier) -> Option<Election> {
        self.with_lao(lao_id, |state| state.elections.get(election_id).cloned())
            .flatten()
    }

    /// Get a roll call of a LAO
    fn get_roll_call(&self, lao_id: &Identifier, roll_call_id: &Identifier) -> Option<RollCall> {
        self.with_lao(lao_id, |state| state.roll_calls.get(roll_call_id).cloned())
            .flatten()
    }

    fn get_meeting(&self, lao_id: &Identifier, meeting_id: &Identifier) -> Option<Meeting> {
        self.with_lao(lao_id, |state| state.meetings.get(meeting_id).cloned())
            .flatten()
    }

    /// Get a committed transaction
    fn get_transaction(&self, lao_id: &Identifier, tx_id: &Identifier) -> Option<Transaction> {
        self.with_lao(lao_id, |state| state.ledger.transaction(tx_id).cloned())
            .flatten()
    }

    /// Digital cash balance of a key, 0 for unknown LAOs
    fn balance_of(&self, lao_id: &Identifier, key: &PublicKey) -> u64 {
        self.with_lao(lao_id, |state| state.ledger.balance_of(key))
            .unwrap_or(0)
    }

    /// Unspent outputs owned by a key
    fn unspent_of(&self, lao_id: &Identifier, key: &PublicKey) -> Vec<Utxo> {
        self.with_lao(lao_id, |state| state.ledger.unspent_of(key))
            .unwrap_or_default()
    }
}

/// In-memory store, one lock per LAO
pub struct MemStore {
    laos: RwLock<BTreeMap<Identifier, Arc<Mutex<LaoState>>>>,
    processed: Mutex<HashSet<MessageId>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        MemStore {
            laos: RwLock::new(BTreeMap::new()),
            processed: Mutex::new(HashSet::new()),
            events,
        }
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream of change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn notify(&self, event: StoreEvent) {
        // No receiver is not an error
        let _ = self.events.send(event);
    }

    /// Insert a new LAO; returns false if it was already known
    pub(crate) fn insert_lao(&self, lao: Lao) -> bool {
        let mut laos = self.laos.write();
        if laos.contains_key(&lao.id) {
            return false;
        }
        laos.insert(lao.id.clone(), Arc::new(Mutex::new(LaoState::new(lao))));
        true
    }

    pub(crate) fn lao_state(&self, lao_id: &Identifier) -> Option<Arc<Mutex<LaoState>>> {
        self.laos.read().get(lao_id).cloned()
    }

    /// Mark a message as being applied; false if it already was
    pub(crate) fn claim(&self, message_id: &MessageId) -> bool {
        self.processed.lock().insert(message_id.clone())
    }

    /// Forget a claimed message whose application failed, so it can be retried
    pub(crate) fn release(&self, message_id: &MessageId) {
        self.processed.lock().remove(message_id);
    }

    pub fn lao_ids(&self) -> Vec<Identifier> {
        self.laos.read().keys().cloned().collect()
    }

    /// Copy of every LAO's state
    pub fn snapshot(&self) -> Snapshot {
        let laos = self
            .laos
            .read()
            .values()
            .map(|state| state.lock().clone())
            .collect();
        Snapshot { laos }
    }
}

impl Store for MemStore {
    fn with_lao<R>(&self, lao_id: &Identifier, f: impl FnOnce(&LaoState) -> R) -> Option<R> {
        let state = self.lao_state(lao_id)?;
        let guard = state.lock();
        Some(f(&guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_store() {
        let store = MemStore::new();
        let organizer = generate_keypair();
        let data = CreateLao::new(organizer.public_key(), "LAO", 10, vec![]);
        let lao = Lao::create(&data, &Identifier::digest(&["m"])).unwrap();

        assert!(store.get_lao(&lao.id).is_none());
        assert!(store.insert_lao(lao.clone()));
        assert!(!store.insert_lao(lao.clone()));

        assert_eq!(store.get_lao(&lao.id), Some(lao.clone()));
        assert_eq!(store.balance_of(&lao.id, &organizer.public_key()), 0);
        assert_eq!(store.lao_ids(), vec![lao.id.clone()]);
        assert_eq!(store.snapshot().laos.len(), 1);

        let unknown = Identifier::digest(&["unknown"]);
        assert!(store.get_election(&lao.id, &unknown).is_none());
        assert!(store.get_election(&unknown, &unknown).is_none());
    }

    #[test]
    fn test_events() {
        let store = MemStore::new();
        let mut events = store.subscribe();
        let id = Identifier::digest(&["lao"]);
        store.notify(StoreEvent::LaoCreated(id.clone()));
        assert_eq!(events.try_recv().unwrap(), StoreEvent::LaoCreated(id));
    }
}
