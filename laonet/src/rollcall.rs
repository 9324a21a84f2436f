use crate::*;
use std::collections::BTreeSet;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RollCallState {
    Created,
    Opened,
    Closed,
}

/// A roll call: the organizer collects the keys of attendees present at an event
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RollCall {
    pub id: Identifier,
    pub lao_id: Identifier,
    pub name: String,
    pub creation: i64,
    pub proposed_start: i64,
    pub proposed_end: i64,
    pub location: String,
    pub description: Option<String>,
    pub state: RollCallState,
    pub opened_at: Option<i64>,
    pub closed_at: Option<i64>,
    pub attendees: BTreeSet<PublicKey>,
}

impl RollCall {
    /// `Hash("R", lao, creation, name)`
    pub fn build_id(lao_id: &Identifier, creation: i64, name: &str) -> Identifier {
        Identifier::digest(&["R", lao_id.as_str(), creation.to_string().as_str(), name])
    }

    /// Build roll_call/create data for a new roll call
    pub fn new_data(
        lao_id: &Identifier,
        name: &str,
        creation: i64,
        proposed_start: i64,
        proposed_end: i64,
        location: &str,
    ) -> CreateRollCall {
        CreateRollCall {
            id: RollCall::build_id(lao_id, creation, name),
            name: name.to_string(),
            creation,
            proposed_start,
            proposed_end,
            location: location.to_string(),
            description: None,
        }
    }

    pub fn create(lao_id: &Identifier, data: &CreateRollCall) -> Result<Self, ValidationError> {
        let expected = RollCall::build_id(lao_id, data.creation, &data.name);
        if expected != data.id {
            return Err(ValidationError::InvalidIdentifier {
                expected,
                found: data.id.clone(),
            });
        }
        if data.proposed_end < data.proposed_start {
            return Err(ValidationError::InvalidRollCall(
                "proposed end precedes proposed start".into(),
            ));
        }

        Ok(RollCall {
            id: data.id.clone(),
            lao_id: lao_id.clone(),
            name: data.name.clone(),
            creation: data.creation,
            proposed_start: data.proposed_start,
            proposed_end: data.proposed_end,
            location: data.location.clone(),
            description: data.description.clone(),
            state: RollCallState::Created,
            opened_at: None,
            closed_at: None,
            attendees: BTreeSet::new(),
        })
    }

    /// `Hash("R", lao, target, at)`, the id of an open, reopen or close
    pub fn update_id(lao_id: &Identifier, target: &Identifier, at: i64) -> Identifier {
        Identifier::digest(&["R", lao_id.as_str(), target.as_str(), at.to_string().as_str()])
    }

    fn check_update(&self, update_id: &Identifier, at: i64) -> Result<(), ValidationError> {
        let expected = RollCall::update_id(&self.lao_id, &self.id, at);
        if &expected != update_id {
            return Err(ValidationError::InvalidIdentifier {
                expected,
                found: update_id.clone(),
            });
        }
        Ok(())
    }

    fn start(
        &mut self,
        update_id: &Identifier,
        opened_at: i64,
        minimum: i64,
    ) -> Result<(), ValidationError> {
        self.check_update(update_id, opened_at)?;
        if opened_at < minimum {
            return Err(ValidationError::InvalidTimestamp {
                found: opened_at,
                minimum,
            });
        }

        self.opened_at = Some(opened_at);
        self.state = RollCallState::Opened;
        Ok(())
    }

    /// Apply roll_call/open
    pub fn open(&mut self, data: &OpenRollCall) -> Result<(), ValidationError> {
        if self.state != RollCallState::Created {
            return Err(ValidationError::InvalidRollCall(format!(
                "cannot open a roll call that is {:?}",
                self.state
            )));
        }
        self.start(&data.update_id, data.opened_at, self.creation)
    }

    /// Apply roll_call/reopen; only a closed roll call can be reopened
    pub fn reopen(&mut self, data: &ReopenRollCall) -> Result<(), ValidationError> {
        let closed_at = match (self.state, self.closed_at) {
            (RollCallState::Closed, Some(closed_at)) => closed_at,
            _ => {
                return Err(ValidationError::InvalidRollCall(format!(
                    "cannot reopen a roll call that is {:?}",
                    self.state
                )))
            }
        };
        self.start(&data.update_id, data.opened_at, closed_at)
    }

    /// Apply roll_call/close, recording who attended
    pub fn close(&mut self, data: &CloseRollCall) -> Result<(), ValidationError> {
        let opened_at = match (self.state, self.opened_at) {
            (RollCallState::Opened, Some(opened_at)) => opened_at,
            _ => {
                return Err(ValidationError::InvalidRollCall(format!(
                    "cannot close a roll call that is {:?}",
                    self.state
                )))
            }
        };
        self.check_update(&data.update_id, data.closed_at)?;
        if data.closed_at < opened_at {
            return Err(ValidationError::InvalidTimestamp {
                found: data.closed_at,
                minimum: opened_at,
            });
        }

        self.attendees = data.attendees.iter().copied().collect();
        self.closed_at = Some(data.closed_at);
        self.state = RollCallState::Closed;
        Ok(())
    }
}
