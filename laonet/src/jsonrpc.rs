use crate::*;
use num_enum::TryFromPrimitive;
use std::convert::TryFrom;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC methods spoken on the channel protocol
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Subscribe,
    Unsubscribe,
    Publish,
    Catchup,
    Broadcast,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Method::Subscribe => "subscribe",
            Method::Unsubscribe => "unsubscribe",
            Method::Publish => "publish",
            Method::Catchup => "catchup",
            Method::Broadcast => "broadcast",
        };
        write!(f, "{}", name)
    }
}

/// Error codes a server may answer with
#[derive(TryFromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    InvalidAction = -1,
    InvalidResource = -2,
    ResourceAlreadyExists = -3,
    InvalidMessageField = -4,
    AccessDenied = -5,
    InternalServerError = -6,
}

impl ErrorCode {
    pub fn from_code(code: i32) -> Option<Self> {
        ErrorCode::try_from(code).ok()
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::InvalidAction => "invalid action",
            ErrorCode::InvalidResource => "invalid resource",
            ErrorCode::ResourceAlreadyExists => "resource already exists",
            ErrorCode::InvalidMessageField => "invalid message",
            ErrorCode::AccessDenied => "access denied",
            ErrorCode::InternalServerError => "internal server error",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Params {
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Envelope>,
}

/// A request sent by the client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Query {
    pub jsonrpc: String,
    pub method: Method,
    pub params: Params,
    pub id: i32,
}

impl Query {
    pub fn new(id: i32, method: Method, channel: Channel, message: Option<Envelope>) -> Self {
        Query {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method,
            params: Params { channel, message },
            id,
        }
    }
}

/// The result of a successful query: a status for most methods, the
/// channel history for a catchup
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum AnswerResult {
    General(i64),
    Messages(Vec<Envelope>),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorObject {
    pub code: i32,
    pub description: String,
}

/// A server reply to one query
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Answer {
    pub jsonrpc: String,
    pub id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnswerResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Answer {
    pub fn success(id: i32, result: AnswerResult) -> Self {
        Answer {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: i32, code: ErrorCode, description: &str) -> Self {
        Answer {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ErrorObject {
                code: code.code(),
                description: description.to_string(),
            }),
        }
    }

    pub fn into_outcome(self) -> Result<AnswerResult, TransportError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(TransportError::Rpc {
                code: error.code,
                description: error.description,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(TransportError::Protocol(format!(
                "answer {} has neither result nor error",
                self.id
            ))),
        }
    }
}

/// A message pushed by the server to subscribers of a channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub jsonrpc: String,
    pub method: Method,
    pub params: Params,
}

impl Broadcast {
    pub fn new(channel: Channel, message: Envelope) -> Self {
        Broadcast {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: Method::Broadcast,
            params: Params {
                channel,
                message: Some(message),
            },
        }
    }
}

/// A decoded frame received from the server
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Answer(Answer),
    Broadcast { channel: Channel, message: Envelope },
}

fn protocol_error(e: serde_json::Error) -> TransportError {
    TransportError::Protocol(e.to_string())
}

/// Decode a raw frame into an answer or a broadcast
pub fn parse_incoming(raw: &str) -> Result<Incoming, TransportError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(protocol_error)?;

    if value.get("jsonrpc").and_then(|v| v.as_str()) != Some(JSONRPC_VERSION) {
        return Err(TransportError::Protocol("not a JSON-RPC 2.0 frame".into()));
    }

    if value.get("method").is_some() {
        let broadcast: Broadcast = serde_json::from_value(value).map_err(protocol_error)?;
        if broadcast.method != Method::Broadcast {
            return Err(TransportError::Protocol(format!(
                "unexpected {} from server",
                broadcast.method
            )));
        }
        let message = broadcast
            .params
            .message
            .ok_or_else(|| TransportError::Protocol("broadcast without message".into()))?;
        return Ok(Incoming::Broadcast {
            channel: broadcast.params.channel,
            message,
        });
    }

    let answer: Answer = serde_json::from_value(value).map_err(protocol_error)?;
    Ok(Incoming::Answer(answer))
}
