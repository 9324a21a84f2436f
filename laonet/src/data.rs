use crate::*;
use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// The kind of object a message acts on
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Lao,
    Message,
    Meeting,
    RollCall,
    Election,
    Coin,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Lao => "lao",
            ObjectType::Message => "message",
            ObjectType::Meeting => "meeting",
            ObjectType::RollCall => "roll_call",
            ObjectType::Election => "election",
            ObjectType::Coin => "coin",
        }
    }
}

/// What is done to the object
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    UpdateProperties,
    State,
    Witness,
    Close,
    Setup,
    Key,
    Open,
    Reopen,
    CastVote,
    End,
    Result,
    PostTransaction,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::UpdateProperties => "update_properties",
            ActionType::State => "state",
            ActionType::Witness => "witness",
            ActionType::Close => "close",
            ActionType::Setup => "setup",
            ActionType::Key => "key",
            ActionType::Open => "open",
            ActionType::Reopen => "reopen",
            ActionType::CastVote => "cast_vote",
            ActionType::End => "end",
            ActionType::Result => "result",
            ActionType::PostTransaction => "post_transaction",
        }
    }
}

macro_rules! message_data {
    ($( $variant:ident($data:ty) => ($object:ident, $action:ident) ),* $(,)?) => {
        /// The domain action carried inside an envelope
        ///
        /// On the wire this is a flat JSON object whose `object` and `action` fields
        /// select the variant.
        #[derive(Debug, Clone, PartialEq)]
        pub enum MessageData {
            $( $variant($data), )*
        }

        impl MessageData {
            pub fn object(&self) -> ObjectType {
                match self {
                    $( MessageData::$variant(_) => ObjectType::$object, )*
                }
            }

            pub fn action(&self) -> ActionType {
                match self {
                    $( MessageData::$variant(_) => ActionType::$action, )*
                }
            }

            fn fields(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $( MessageData::$variant(data) => serde_json::to_value(data), )*
                }
            }

            fn from_fields(
                object: ObjectType,
                action: ActionType,
                fields: Value,
            ) -> Result<Self, serde_json::Error> {
                match (object, action) {
                    $( (ObjectType::$object, ActionType::$action) => {
                        Ok(MessageData::$variant(serde_json::from_value(fields)?))
                    } )*
                    _ => Err(de::Error::custom(format!(
                        "unsupported action {}/{}",
                        object.as_str(),
                        action.as_str()
                    ))),
                }
            }
        }

        $(
            impl From<$data> for MessageData {
                fn from(data: $data) -> Self {
                    MessageData::$variant(data)
                }
            }
        )*
    };
}

message_data! {
    CreateLao(CreateLao) => (Lao, Create),
    UpdateLaoProperties(UpdateLaoProperties) => (Lao, UpdateProperties),
    StateLao(StateLao) => (Lao, State),
    Witness(WitnessSignatureData) => (Message, Witness),
    CreateMeeting(CreateMeeting) => (Meeting, Create),
    StateMeeting(StateMeeting) => (Meeting, State),
    CreateRollCall(CreateRollCall) => (RollCall, Create),
    OpenRollCall(OpenRollCall) => (RollCall, Open),
    ReopenRollCall(ReopenRollCall) => (RollCall, Reopen),
    CloseRollCall(CloseRollCall) => (RollCall, Close),
    ElectionSetup(ElectionSetup) => (Election, Setup),
    ElectionKey(ElectionKeyData) => (Election, Key),
    OpenElection(OpenElection) => (Election, Open),
    CastVote(CastVote) => (Election, CastVote),
    EndElection(EndElection) => (Election, End),
    ElectionResult(ElectionResultData) => (Election, Result),
    PostTransaction(PostTransaction) => (Coin, PostTransaction),
}

impl Serialize for MessageData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serde_json::Map::new();
        map.insert("object".into(), Value::from(self.object().as_str()));
        map.insert("action".into(), Value::from(self.action().as_str()));

        match self.fields().map_err(ser::Error::custom)? {
            Value::Object(fields) => map.extend(fields),
            _ => return Err(ser::Error::custom("message data must be an object")),
        }

        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MessageData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut fields = match Value::deserialize(deserializer)? {
            Value::Object(fields) => fields,
            _ => return Err(de::Error::custom("message data must be an object")),
        };

        let object = fields
            .remove("object")
            .ok_or_else(|| de::Error::missing_field("object"))?;
        let action = fields
            .remove("action")
            .ok_or_else(|| de::Error::missing_field("action"))?;

        let object: ObjectType = serde_json::from_value(object).map_err(de::Error::custom)?;
        let action: ActionType = serde_json::from_value(action).map_err(de::Error::custom)?;

        MessageData::from_fields(object, action, Value::Object(fields)).map_err(de::Error::custom)
    }
}

/// lao/create
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreateLao {
    pub id: Identifier,
    pub name: String,
    pub creation: i64,
    pub organizer: PublicKey,
    pub witnesses: Vec<PublicKey>,
}

impl CreateLao {
    pub fn new(organizer: PublicKey, name: &str, creation: i64, witnesses: Vec<PublicKey>) -> Self {
        CreateLao {
            id: Lao::build_id(&organizer, creation, name),
            name: name.to_string(),
            creation,
            organizer,
            witnesses,
        }
    }
}

/// lao/update_properties
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdateLaoProperties {
    pub id: Identifier,
    pub name: String,
    pub last_modified: i64,
    pub witnesses: Vec<PublicKey>,
}

/// lao/state: the witnessed outcome of an earlier update
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StateLao {
    pub id: Identifier,
    pub name: String,
    pub creation: i64,
    pub last_modified: i64,
    pub organizer: PublicKey,
    pub witnesses: Vec<PublicKey>,
    pub modification_id: MessageId,
    pub modification_signatures: Vec<WitnessSignature>,
}

/// message/witness: a witness co-signs an earlier message
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WitnessSignatureData {
    pub message_id: MessageId,
    pub signature: Signature,
}

impl WitnessSignatureData {
    pub fn new<K: Keyring + ?Sized>(witness: &K, message_id: &MessageId) -> Self {
        WitnessSignatureData {
            message_id: message_id.clone(),
            signature: witness.sign(&message_id.to_bytes()),
        }
    }
}

/// roll_call/create
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreateRollCall {
    pub id: Identifier,
    pub name: String,
    pub creation: i64,
    pub proposed_start: i64,
    pub proposed_end: i64,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// roll_call/open
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OpenRollCall {
    pub update_id: Identifier,
    pub opens: Identifier,
    pub opened_at: i64,
}

/// roll_call/reopen, same fields as roll_call/open
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReopenRollCall {
    pub update_id: Identifier,
    pub opens: Identifier,
    pub opened_at: i64,
}

/// roll_call/close
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CloseRollCall {
    pub update_id: Identifier,
    pub closes: Identifier,
    pub closed_at: i64,
    pub attendees: Vec<PublicKey>,
}

/// meeting/create
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreateMeeting {
    pub id: Identifier,
    pub name: String,
    pub creation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// meeting/state: witnessed properties of a meeting
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StateMeeting {
    pub id: Identifier,
    pub name: String,
    pub creation: i64,
    pub last_modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    pub modification_id: MessageId,
    pub modification_signatures: Vec<WitnessSignature>,
}

/// A question as published in election/setup
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuestionData {
    pub id: Identifier,
    pub question: String,
    pub voting_method: VotingMethod,
    pub ballot_options: Vec<String>,
    pub write_in: bool,
}

/// election/setup
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ElectionSetup {
    pub id: Identifier,
    pub lao: Identifier,
    pub name: String,
    pub version: ElectionVersion,
    pub created_at: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub questions: Vec<QuestionData>,
}

/// election/key: the public key secret ballots are encrypted under
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ElectionKeyData {
    pub election: Identifier,
    pub election_key: String,
}

/// election/open
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OpenElection {
    pub lao: Identifier,
    pub election: Identifier,
    pub opened_at: i64,
}

/// election/cast_vote
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CastVote {
    pub lao: Identifier,
    pub election: Identifier,
    pub created_at: i64,
    pub votes: Vec<Vote>,
}

/// election/end
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EndElection {
    pub lao: Identifier,
    pub election: Identifier,
    pub created_at: i64,
    pub registered_votes: Identifier,
}

/// Per-question results in election/result
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuestionResultData {
    pub id: Identifier,
    pub result: Vec<QuestionResult>,
}

/// election/result
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ElectionResultData {
    pub questions: Vec<QuestionResultData>,
}

/// coin/post_transaction
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PostTransaction {
    pub transaction_id: Identifier,
    pub transaction: Transaction,
}

impl PostTransaction {
    pub fn new(transaction: Transaction) -> Self {
        PostTransaction {
            transaction_id: transaction.id(),
            transaction,
        }
    }
}
