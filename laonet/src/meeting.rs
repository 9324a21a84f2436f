use crate::*;
use serde_json::Value;

/// A scheduled gathering of a LAO
///
/// Created through meeting/create once the witnesses approve it. Later
/// changes arrive as meeting/state messages carrying the witnesses'
/// co-signatures over the modification they certify.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Meeting {
    pub id: Identifier,
    pub lao_id: Identifier,
    pub name: String,
    pub creation: i64,
    pub last_modified: i64,
    pub location: Option<String>,
    pub start: i64,
    pub end: Option<i64>,
    pub extra: Option<Value>,
    pub modification_id: MessageId,
}

impl Meeting {
    /// `Hash("M", lao, creation, name)`
    pub fn build_id(lao_id: &Identifier, creation: i64, name: &str) -> Identifier {
        Identifier::digest(&["M", lao_id.as_str(), creation.to_string().as_str(), name])
    }

    /// Build meeting/create data for a new meeting
    pub fn new_data(
        lao_id: &Identifier,
        name: &str,
        creation: i64,
        start: i64,
        end: Option<i64>,
        location: Option<&str>,
    ) -> CreateMeeting {
        CreateMeeting {
            id: Meeting::build_id(lao_id, creation, name),
            name: name.to_string(),
            creation,
            location: location.map(str::to_string),
            start,
            end,
            extra: None,
        }
    }

    fn check(
        lao_id: &Identifier,
        id: &Identifier,
        name: &str,
        creation: i64,
        start: i64,
        end: Option<i64>,
    ) -> Result<(), ValidationError> {
        let expected = Meeting::build_id(lao_id, creation, name);
        if &expected != id {
            return Err(ValidationError::InvalidIdentifier {
                expected,
                found: id.clone(),
            });
        }
        if start < creation {
            return Err(ValidationError::InvalidTimestamp {
                found: start,
                minimum: creation,
            });
        }
        if let Some(end) = end {
            if end < start {
                return Err(ValidationError::InvalidMeeting("end precedes start".into()));
            }
        }
        Ok(())
    }

    pub fn create(
        lao_id: &Identifier,
        data: &CreateMeeting,
        message_id: &MessageId,
    ) -> Result<Self, ValidationError> {
        Meeting::check(lao_id, &data.id, &data.name, data.creation, data.start, data.end)?;

        Ok(Meeting {
            id: data.id.clone(),
            lao_id: lao_id.clone(),
            name: data.name.clone(),
            creation: data.creation,
            last_modified: data.creation,
            location: data.location.clone(),
            start: data.start,
            end: data.end,
            extra: data.extra.clone(),
            modification_id: message_id.clone(),
        })
    }

    /// Take on the properties of a meeting/state
    ///
    /// The witness co-signatures are checked by the caller, who knows the
    /// LAO's witness set.
    pub fn apply_state(&mut self, data: &StateMeeting) -> Result<(), ValidationError> {
        Meeting::check(&self.lao_id, &data.id, &data.name, data.creation, data.start, data.end)?;
        if data.id != self.id {
            return Err(ValidationError::InvalidIdentifier {
                expected: self.id.clone(),
                found: data.id.clone(),
            });
        }
        if data.last_modified < self.last_modified {
            return Err(ValidationError::InvalidTimestamp {
                found: data.last_modified,
                minimum: self.last_modified,
            });
        }

        self.last_modified = data.last_modified;
        self.location = data.location.clone();
        self.start = data.start;
        self.end = data.end;
        self.extra = data.extra.clone();
        self.modification_id = data.modification_id.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_meeting() {
        let lao_id = Identifier::digest(&["lao"]);
        let data = Meeting::new_data(&lao_id, "Assembly", 100, 200, Some(300), Some("Hall"));
        let message_id = Identifier::digest(&["m1"]);

        let meeting = Meeting::create(&lao_id, &data, &message_id).unwrap();
        assert_eq!(meeting.last_modified, 100);
        assert_eq!(meeting.location.as_deref(), Some("Hall"));

        let other_lao = Identifier::digest(&["other"]);
        assert!(matches!(
            Meeting::create(&other_lao, &data, &message_id),
            Err(ValidationError::InvalidIdentifier { .. })
        ));

        let backwards = Meeting::new_data(&lao_id, "Late", 100, 300, Some(200), None);
        assert!(matches!(
            Meeting::create(&lao_id, &backwards, &message_id),
            Err(ValidationError::InvalidMeeting(_))
        ));
    }

    #[test]
    fn test_apply_state() {
        let lao_id = Identifier::digest(&["lao"]);
        let data = Meeting::new_data(&lao_id, "Assembly", 100, 200, None, None);
        let mut meeting = Meeting::create(&lao_id, &data, &Identifier::digest(&["m1"])).unwrap();

        let state = StateMeeting {
            id: meeting.id.clone(),
            name: meeting.name.clone(),
            creation: 100,
            last_modified: 150,
            location: Some("Garden".into()),
            start: 250,
            end: Some(400),
            extra: None,
            modification_id: Identifier::digest(&["m2"]),
            modification_signatures: vec![],
        };
        meeting.apply_state(&state).unwrap();
        assert_eq!(meeting.location.as_deref(), Some("Garden"));
        assert_eq!(meeting.end, Some(400));
        assert_eq!(meeting.modification_id, Identifier::digest(&["m2"]));

        let stale = StateMeeting {
            last_modified: 120,
            ..state
        };
        assert!(matches!(
            meeting.apply_state(&stale),
            Err(ValidationError::InvalidTimestamp { .. })
        ));
        assert_eq!(meeting.last_modified, 150);
    }
}
