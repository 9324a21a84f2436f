use crate::*;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The transaction was committed before; nothing changed
    AlreadyCommitted,
}

/// The digital cash ledger of one LAO
///
/// Holds every committed transaction and the set of unspent outputs they leave.
/// Balances are always derived from the unspent set.
#[derive(Debug, Clone)]
pub struct Ledger {
    organizer: PublicKey,
    transactions: IndexMap<Identifier, Transaction>,
    unspent: HashMap<OutPoint, Utxo>,
    spent: HashSet<OutPoint>,
}

impl Ledger {
    pub fn new(organizer: PublicKey) -> Self {
        Ledger {
            organizer,
            transactions: IndexMap::new(),
            unspent: HashMap::new(),
            spent: HashSet::new(),
        }
    }

    /// Check a transaction against the current ledger without applying it
    pub fn validate(&self, tx: &Transaction) -> Result<(), TransactionError> {
        if tx.inputs.is_empty() {
            return Err(TransactionError::Malformed("no inputs".into()));
        }
        if tx.outputs.is_empty() {
            return Err(TransactionError::Malformed("no outputs".into()));
        }
        if tx.outputs.iter().any(|o| o.script.script_type != SCRIPT_TYPE) {
            return Err(TransactionError::Malformed("unsupported output script".into()));
        }

        let mut seen = HashSet::new();
        for input in &tx.inputs {
            let out_point = input.out_point();
            if !seen.insert(out_point.clone()) {
                return Err(TransactionError::DuplicateInput(out_point));
            }
        }

        let outputs = tx.output_total()?;
        let payload = tx.payload();

        if tx.is_coinbase() {
            for (index, input) in tx.inputs.iter().enumerate() {
                if input.script.pubkey != self.organizer {
                    return Err(TransactionError::NotOrganizer);
                }
                input
                    .script
                    .pubkey
                    .verify(&payload, &input.script.sig)
                    .map_err(|_| TransactionError::BadSignature(index))?;
            }
            // Issued cash must stay countable: no balance or supply may exceed u64
            self.supply()
                .checked_add(outputs)
                .ok_or(TransactionError::AmountOverflow)?;
            return Ok(());
        }

        let mut inputs = 0u64;
        for (index, input) in tx.inputs.iter().enumerate() {
            let out_point = input.out_point();
            if input.tx_out_hash.as_str() == COINBASE_HASH {
                return Err(TransactionError::Malformed(
                    "coinbase inputs mixed with regular inputs".into(),
                ));
            }

            let utxo = match self.unspent.get(&out_point) {
                Some(utxo) => utxo,
                None if self.spent.contains(&out_point) => {
                    return Err(TransactionError::AlreadySpent(out_point))
                }
                None => return Err(TransactionError::UnknownInput(out_point)),
            };

            if input.script.pubkey.key_hash() != utxo.owner {
                return Err(TransactionError::BadSignature(index));
            }
            input
                .script
                .pubkey
                .verify(&payload, &input.script.sig)
                .map_err(|_| TransactionError::BadSignature(index))?;

            inputs = inputs
                .checked_add(utxo.value)
                .ok_or(TransactionError::AmountOverflow)?;
        }

        if inputs != outputs {
            return Err(TransactionError::UnbalancedAmounts { inputs, outputs });
        }
        Ok(())
    }

    /// Validate and apply a transaction
    ///
    /// Committing the same transaction twice leaves the ledger unchanged.
    pub fn commit(&mut self, tx: Transaction) -> Result<CommitOutcome, TransactionError> {
        let tx_id = tx.id();
        if self.transactions.contains_key(&tx_id) {
            return Ok(CommitOutcome::AlreadyCommitted);
        }

        if let Err(e) = self.validate(&tx) {
            warn!(tx_id = %tx_id, "ledger: transaction rejected: {}", e);
            return Err(e);
        }

        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let out_point = input.out_point();
                self.unspent.remove(&out_point);
                self.spent.insert(out_point);
            }
        }
        for utxo in tx.utxos() {
            self.unspent.insert(utxo.out_point.clone(), utxo);
        }

        debug!(tx_id = %tx_id, "ledger: transaction committed");
        self.transactions.insert(tx_id, tx);
        Ok(CommitOutcome::Committed)
    }

    /// Commit a posted transaction, checking the id it was announced with
    pub fn commit_posted(
        &mut self,
        claimed_id: &Identifier,
        tx: Transaction,
    ) -> Result<CommitOutcome, TransactionError> {
        let expected = tx.id();
        if &expected != claimed_id {
            return Err(TransactionError::IdMismatch {
                expected,
                found: claimed_id.clone(),
            });
        }
        self.commit(tx)
    }

    pub fn transaction(&self, id: &Identifier) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    /// Committed transactions, in commit order
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    pub fn unspent_of(&self, key: &PublicKey) -> Vec<Utxo> {
        let owner = key.key_hash();
        let mut owned: Vec<Utxo> = self
            .unspent
            .values()
            .filter(|u| u.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.out_point.cmp(&b.out_point));
        owned
    }

    pub fn balance_of(&self, key: &PublicKey) -> u64 {
        self.unspent_of(key).iter().map(|u| u.value).sum()
    }

    /// Total value of every unspent output
    ///
    /// Never overflows: coinbases that would push it past `u64::MAX` are rejected
    /// and regular transactions preserve it.
    pub fn supply(&self) -> u64 {
        self.unspent.values().map(|u| u.value).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        organizer: KeyPair,
        alice: KeyPair,
        bob: KeyPair,
        ledger: Ledger,
    }

    /// A ledger where the organizer issued 100 to alice
    fn fixture() -> Fixture {
        let organizer = generate_keypair();
        let alice = generate_keypair();
        let bob = generate_keypair();
        let mut ledger = Ledger::new(organizer.public_key());

        let issue = build_coinbase(&organizer, &[(alice.public_key(), 100)]).unwrap();
        assert_eq!(ledger.commit(issue).unwrap(), CommitOutcome::Committed);

        Fixture {
            organizer,
            alice,
            bob,
            ledger,
        }
    }

    #[test]
    fn test_transfer() {
        let mut f = fixture();
        assert_eq!(f.ledger.balance_of(&f.alice.public_key()), 100);

        let owned = f.ledger.unspent_of(&f.alice.public_key());
        let tx = build_transfer(&f.alice, &owned, &f.bob.public_key(), 30).unwrap();
        assert_eq!(f.ledger.commit(tx.clone()).unwrap(), CommitOutcome::Committed);

        assert_eq!(f.ledger.balance_of(&f.alice.public_key()), 70);
        assert_eq!(f.ledger.balance_of(&f.bob.public_key()), 30);
        assert_eq!(f.ledger.supply(), 100);

        // Committing again is a no-op
        assert_eq!(
            f.ledger.commit(tx).unwrap(),
            CommitOutcome::AlreadyCommitted
        );
        assert_eq!(f.ledger.balance_of(&f.alice.public_key()), 70);
        assert_eq!(f.ledger.balance_of(&f.bob.public_key()), 30);
        assert_eq!(f.ledger.transactions().count(), 2);
    }

    #[test]
    fn test_double_spend() {
        let mut f = fixture();
        let owned = f.ledger.unspent_of(&f.alice.public_key());

        let to_bob = build_transfer(&f.alice, &owned, &f.bob.public_key(), 100).unwrap();
        f.ledger.commit(to_bob).unwrap();

        let again = build_transfer(&f.alice, &owned, &f.organizer.public_key(), 100).unwrap();
        assert_eq!(
            f.ledger.validate(&again),
            Err(TransactionError::AlreadySpent(owned[0].out_point.clone()))
        );
    }

    #[test]
    fn test_duplicate_input() {
        let f = fixture();
        let owned = f.ledger.unspent_of(&f.alice.public_key());

        let mut tx = build_transfer(&f.alice, &owned, &f.bob.public_key(), 100).unwrap();
        tx.inputs.push(tx.inputs[0].clone());
        assert_eq!(
            f.ledger.validate(&tx),
            Err(TransactionError::DuplicateInput(owned[0].out_point.clone()))
        );
    }

    #[test]
    fn test_unbalanced() {
        let f = fixture();
        let owned = f.ledger.unspent_of(&f.alice.public_key());

        let mut tx = build_transfer(&f.alice, &owned, &f.bob.public_key(), 100).unwrap();
        tx.outputs[0].value = 90;
        // Re-sign so only the amounts are wrong
        let sig = f.alice.sign(&tx.payload());
        tx.inputs[0].script.sig = sig;

        assert_eq!(
            f.ledger.validate(&tx),
            Err(TransactionError::UnbalancedAmounts {
                inputs: 100,
                outputs: 90
            })
        );
    }

    #[test]
    fn test_unknown_input_and_bad_signature() {
        let f = fixture();

        let phantom = vec![Utxo {
            out_point: OutPoint {
                tx_id: Identifier::digest(&["phantom"]),
                index: 0,
            },
            owner: f.alice.public_key().key_hash(),
            value: 10,
        }];
        let tx = build_transfer(&f.alice, &phantom, &f.bob.public_key(), 10).unwrap();
        assert!(matches!(
            f.ledger.validate(&tx),
            Err(TransactionError::UnknownInput(_))
        ));

        let owned = f.ledger.unspent_of(&f.alice.public_key());
        let mut tx = build_transfer(&f.alice, &owned, &f.bob.public_key(), 100).unwrap();
        tx.inputs[0].script.sig = f.bob.sign(&tx.payload());
        assert_eq!(f.ledger.validate(&tx), Err(TransactionError::BadSignature(0)));

        // Bob cannot spend alice's output even with a valid signature of his own
        tx.inputs[0].script.pubkey = f.bob.public_key();
        assert_eq!(f.ledger.validate(&tx), Err(TransactionError::BadSignature(0)));
    }

    #[test]
    fn test_coinbase_requires_organizer() {
        let mut f = fixture();
        let forged = build_coinbase(&f.alice, &[(f.alice.public_key(), 1000)]).unwrap();
        assert_eq!(f.ledger.commit(forged), Err(TransactionError::NotOrganizer));
        assert_eq!(f.ledger.balance_of(&f.alice.public_key()), 100);
    }

    #[test]
    fn test_supply_cannot_overflow() {
        let mut f = fixture();
        let big = build_coinbase(&f.organizer, &[(f.bob.public_key(), u64::MAX - 100)]).unwrap();
        assert_eq!(f.ledger.commit(big).unwrap(), CommitOutcome::Committed);
        assert_eq!(f.ledger.supply(), u64::MAX);

        let one_more = build_coinbase(&f.organizer, &[(f.bob.public_key(), 1)]).unwrap();
        assert_eq!(f.ledger.commit(one_more), Err(TransactionError::AmountOverflow));

        assert_eq!(f.ledger.balance_of(&f.bob.public_key()), u64::MAX - 100);
        assert_eq!(f.ledger.balance_of(&f.alice.public_key()), 100);
    }

    #[test]
    fn test_posted_id_checked() {
        let mut f = fixture();
        let tx = build_coinbase(&f.organizer, &[(f.bob.public_key(), 5)]).unwrap();
        let wrong = Identifier::digest(&["wrong"]);
        assert!(matches!(
            f.ledger.commit_posted(&wrong, tx.clone()),
            Err(TransactionError::IdMismatch { .. })
        ));
        assert_eq!(
            f.ledger.commit_posted(&tx.id(), tx).unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(f.ledger.balance_of(&f.bob.public_key()), 5);
    }
}
