use crate::*;

/// `tx_out_hash` of coinbase inputs: 32 zero bytes
pub const COINBASE_HASH: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

/// The only script type: pay to public key hash
pub const SCRIPT_TYPE: &str = "P2PKH";

pub const TRANSACTION_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScriptInput {
    #[serde(rename = "type")]
    pub script_type: String,
    pub pubkey: PublicKey,
    pub sig: Signature,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Input {
    pub tx_out_hash: Identifier,
    pub tx_out_index: u32,
    pub script: ScriptInput,
}

impl Input {
    pub fn out_point(&self) -> OutPoint {
        OutPoint {
            tx_id: self.tx_out_hash.clone(),
            index: self.tx_out_index,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScriptOutput {
    #[serde(rename = "type")]
    pub script_type: String,
    pub pubkey_hash: Identifier,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Output {
    pub value: u64,
    pub script: ScriptOutput,
}

impl Output {
    pub fn to(recipient: &PublicKey, value: u64) -> Self {
        Output {
            value,
            script: ScriptOutput {
                script_type: SCRIPT_TYPE.to_string(),
                pubkey_hash: recipient.key_hash(),
            },
        }
    }
}

/// Reference to one output of a committed transaction
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub tx_id: Identifier,
    pub index: u32,
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.index)
    }
}

/// An unspent transaction output
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub out_point: OutPoint,
    pub owner: Identifier,
    pub value: u64,
}

/// A digital cash transaction
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub lock_time: i64,
}

impl Transaction {
    /// The transaction id, derived from every field
    pub fn id(&self) -> Identifier {
        let mut parts: Vec<String> = Vec::new();
        for input in &self.inputs {
            parts.push(input.script.pubkey.to_string());
            parts.push(input.script.sig.to_string());
            parts.push(input.script.script_type.clone());
            parts.push(input.tx_out_hash.to_string());
            parts.push(input.tx_out_index.to_string());
        }
        parts.push(self.lock_time.to_string());
        for output in &self.outputs {
            parts.push(output.script.pubkey_hash.to_string());
            parts.push(output.script.script_type.clone());
            parts.push(output.value.to_string());
        }
        parts.push(self.version.to_string());
        Identifier::digest(&parts)
    }

    /// The bytes every input signature covers: the spent outputs followed by
    /// the new outputs
    pub fn signing_payload(inputs: &[OutPoint], outputs: &[Output]) -> Vec<u8> {
        let mut payload = String::new();
        for input in inputs {
            payload.push_str(input.tx_id.as_str());
            payload.push_str(&input.index.to_string());
        }
        for output in outputs {
            payload.push_str(&output.value.to_string());
            payload.push_str(&output.script.script_type);
            payload.push_str(output.script.pubkey_hash.as_str());
        }
        payload.into_bytes()
    }

    pub fn payload(&self) -> Vec<u8> {
        let inputs: Vec<OutPoint> = self.inputs.iter().map(|i| i.out_point()).collect();
        Transaction::signing_payload(&inputs, &self.outputs)
    }

    /// Whether this transaction issues new cash instead of spending outputs
    pub fn is_coinbase(&self) -> bool {
        !self.inputs.is_empty()
            && self
                .inputs
                .iter()
                .all(|i| i.tx_out_hash.as_str() == COINBASE_HASH)
    }

    pub fn output_total(&self) -> Result<u64, TransactionError> {
        self.outputs.iter().try_fold(0u64, |total, o| {
            total
                .checked_add(o.value)
                .ok_or(TransactionError::AmountOverflow)
        })
    }

    /// The outputs this transaction creates, once committed
    pub fn utxos(&self) -> Vec<Utxo> {
        let tx_id = self.id();
        self.outputs
            .iter()
            .enumerate()
            .map(|(index, output)| Utxo {
                out_point: OutPoint {
                    tx_id: tx_id.clone(),
                    index: index as u32,
                },
                owner: output.script.pubkey_hash.clone(),
                value: output.value,
            })
            .collect()
    }

    fn signed<K: Keyring + ?Sized>(keys: &K, inputs: Vec<OutPoint>, outputs: Vec<Output>) -> Self {
        let sig = keys.sign(&Transaction::signing_payload(&inputs, &outputs));
        let inputs = inputs
            .into_iter()
            .map(|out_point| Input {
                tx_out_hash: out_point.tx_id,
                tx_out_index: out_point.index,
                script: ScriptInput {
                    script_type: SCRIPT_TYPE.to_string(),
                    pubkey: keys.public_key(),
                    sig,
                },
            })
            .collect();

        Transaction {
            version: TRANSACTION_VERSION,
            inputs,
            outputs,
            lock_time: 0,
        }
    }
}

fn total(mut values: impl Iterator<Item = u64>) -> Result<u64, TransactionError> {
    values.try_fold(0u64, |total, v| {
        total.checked_add(v).ok_or(TransactionError::AmountOverflow)
    })
}

fn check_owned<K: Keyring + ?Sized>(keys: &K, owned: &[Utxo]) -> Result<(), TransactionError> {
    let owner = keys.public_key().key_hash();
    if let Some(utxo) = owned.iter().find(|u| u.owner != owner) {
        return Err(TransactionError::Malformed(format!(
            "output {} is not owned by the signer",
            utxo.out_point
        )));
    }
    Ok(())
}

/// Pick outputs, in the given order, until `amount` is covered
fn select(owned: &[Utxo], amount: u64) -> Result<(Vec<OutPoint>, u64), TransactionError> {
    let mut selected = Vec::new();
    let mut covered = 0u64;
    for utxo in owned {
        if covered >= amount && !selected.is_empty() {
            break;
        }
        covered = covered
            .checked_add(utxo.value)
            .ok_or(TransactionError::AmountOverflow)?;
        selected.push(utxo.out_point.clone());
    }
    Ok((selected, covered))
}

/// Build a transaction spending owned outputs to exactly cover `outputs`
///
/// No change output is added: when the selected outputs do not sum exactly to
/// the requested amounts this fails with `UnbalancedAmounts`.
pub fn build_transaction<K: Keyring + ?Sized>(
    keys: &K,
    owned: &[Utxo],
    outputs: Vec<Output>,
) -> Result<Transaction, TransactionError> {
    check_owned(keys, owned)?;
    let wanted = total(outputs.iter().map(|o| o.value))?;
    let (inputs, covered) = select(owned, wanted)?;

    if covered != wanted {
        return Err(TransactionError::UnbalancedAmounts {
            inputs: covered,
            outputs: wanted,
        });
    }
    if inputs.is_empty() || outputs.is_empty() {
        return Err(TransactionError::Malformed("empty transaction".into()));
    }

    Ok(Transaction::signed(keys, inputs, outputs))
}

/// Send `amount` to `recipient`, returning the rest to the sender
pub fn build_transfer<K: Keyring + ?Sized>(
    keys: &K,
    owned: &[Utxo],
    recipient: &PublicKey,
    amount: u64,
) -> Result<Transaction, TransactionError> {
    check_owned(keys, owned)?;
    let (inputs, covered) = select(owned, amount)?;
    if covered < amount || amount == 0 {
        return Err(TransactionError::UnbalancedAmounts {
            inputs: covered,
            outputs: amount,
        });
    }

    let mut outputs = vec![Output::to(recipient, amount)];
    if covered > amount {
        outputs.push(Output::to(&keys.public_key(), covered - amount));
    }

    Ok(Transaction::signed(keys, inputs, outputs))
}

/// Issue new cash; only valid when signed by the LAO organizer
pub fn build_coinbase<K: Keyring + ?Sized>(
    organizer: &K,
    recipients: &[(PublicKey, u64)],
) -> Result<Transaction, TransactionError> {
    if recipients.is_empty() {
        return Err(TransactionError::Malformed("coinbase without recipients".into()));
    }
    total(recipients.iter().map(|(_, value)| *value))?;

    let coinbase = OutPoint {
        // The constant is valid base64url
        tx_id: COINBASE_HASH
            .parse()
            .map_err(|_| TransactionError::Malformed("coinbase hash".into()))?,
        index: 0,
    };
    let outputs = recipients
        .iter()
        .map(|(recipient, value)| Output::to(recipient, *value))
        .collect();

    Ok(Transaction::signed(organizer, vec![coinbase], outputs))
}
