use crate::*;
use std::collections::BTreeSet;

/// A Local Autonomous Organization
///
/// Created once by its organizer and never deleted. The organizer may later
/// rename it or change its witness set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Lao {
    pub id: Identifier,
    pub name: String,
    pub organizer: PublicKey,
    pub witnesses: BTreeSet<PublicKey>,
    pub creation: i64,
    pub last_modified: i64,
    pub modification_id: MessageId,
}

impl Lao {
    /// `Hash(organizer, creation, name)`
    pub fn build_id(organizer: &PublicKey, creation: i64, name: &str) -> Identifier {
        Identifier::digest(&[organizer.to_string(), creation.to_string(), name.to_string()])
    }

    /// Build the LAO from its creation message
    pub fn create(data: &CreateLao, message_id: &MessageId) -> Result<Self, ValidationError> {
        if data.name.is_empty() {
            return Err(ValidationError::InvalidLao("name is empty".into()));
        }

        let expected = Lao::build_id(&data.organizer, data.creation, &data.name);
        if expected != data.id {
            return Err(ValidationError::InvalidIdentifier {
                expected,
                found: data.id.clone(),
            });
        }

        Ok(Lao {
            id: data.id.clone(),
            name: data.name.clone(),
            organizer: data.organizer,
            witnesses: data.witnesses.iter().copied().collect(),
            creation: data.creation,
            last_modified: data.creation,
            modification_id: message_id.clone(),
        })
    }

    /// Apply lao/update_properties
    pub fn update(
        &mut self,
        data: &UpdateLaoProperties,
        message_id: &MessageId,
    ) -> Result<(), ValidationError> {
        if data.id != self.id {
            return Err(ValidationError::InvalidIdentifier {
                expected: self.id.clone(),
                found: data.id.clone(),
            });
        }
        if data.name.is_empty() {
            return Err(ValidationError::InvalidLao("name is empty".into()));
        }
        if data.last_modified < self.last_modified {
            return Err(ValidationError::InvalidTimestamp {
                found: data.last_modified,
                minimum: self.last_modified,
            });
        }

        self.name = data.name.clone();
        self.witnesses = data.witnesses.iter().copied().collect();
        self.last_modified = data.last_modified;
        self.modification_id = message_id.clone();
        Ok(())
    }

    /// Apply lao/state; returns whether the LAO changed
    ///
    /// A state for the modification already applied must agree with it. A
    /// newer one, for an update this node missed, is adopted. The witness
    /// co-signatures are checked by the caller.
    pub fn apply_state(&mut self, data: &StateLao) -> Result<bool, ValidationError> {
        if data.id != self.id {
            return Err(ValidationError::InvalidIdentifier {
                expected: self.id.clone(),
                found: data.id.clone(),
            });
        }
        if data.organizer != self.organizer || data.creation != self.creation {
            return Err(ValidationError::InvalidLao(
                "state disagrees with the lao's creation".into(),
            ));
        }

        let witnesses: BTreeSet<PublicKey> = data.witnesses.iter().copied().collect();
        if data.modification_id == self.modification_id {
            if data.name != self.name
                || data.last_modified != self.last_modified
                || witnesses != self.witnesses
            {
                return Err(ValidationError::InvalidLao(
                    "state disagrees with the update it certifies".into(),
                ));
            }
            return Ok(false);
        }

        if data.last_modified <= self.last_modified {
            return Err(ValidationError::InvalidTimestamp {
                found: data.last_modified,
                minimum: self.last_modified + 1,
            });
        }
        if data.name.is_empty() {
            return Err(ValidationError::InvalidLao("name is empty".into()));
        }

        self.name = data.name.clone();
        self.witnesses = witnesses;
        self.last_modified = data.last_modified;
        self.modification_id = data.modification_id.clone();
        Ok(true)
    }

    pub fn is_organizer(&self, key: &PublicKey) -> bool {
        &self.organizer == key
    }

    pub fn channel(&self) -> Channel {
        Channel::lao(&self.id)
    }
}
