use crate::*;

use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("laonet: signature error: {0}")]
    SignatureError(#[from] ed25519_dalek::SignatureError),

    #[error("laonet: invalid public key")]
    InvalidPublicKey,

    #[error("laonet: invalid base64url encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("laonet: encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("laonet: message id mismatch: expected {expected}, found {found}")]
    MessageIdMismatch {
        expected: Identifier,
        found: Identifier,
    },

    #[error("laonet: witness {0} already signed this message")]
    DuplicateWitness(PublicKey),

    #[error("laonet: witness signature does not verify over message {0}")]
    BadWitnessSignature(Identifier),

    #[error("laonet: failed to decrypt vote")]
    DecryptionError,

    #[error("laonet: invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("laonet: invalid channel: {0}")]
    InvalidChannel(String),

    #[error("laonet: {0}")]
    Transport(#[from] TransportError),

    #[error("laonet: rejected locally: {0}")]
    Rejected(Box<HandlerError>),
}

impl From<HandlerError> for Error {
    fn from(e: HandlerError) -> Self {
        Error::Rejected(Box::new(e))
    }
}

/// Domain validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("laonet validation: invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: ElectionState,
        to: ElectionState,
    },

    #[error("laonet validation: election is not open (state {0})")]
    ElectionNotOpen(ElectionState),

    #[error("laonet validation: ballot must answer every question exactly once")]
    IncompleteBallot,

    #[error("laonet validation: unknown question {0}")]
    UnknownQuestion(Identifier),

    #[error("laonet validation: ballot option {index} out of range for question {question}")]
    InvalidBallotOption { question: Identifier, index: u32 },

    #[error("laonet validation: vote id mismatch: expected {expected}, found {found}")]
    InvalidVoteId {
        expected: Identifier,
        found: Identifier,
    },

    #[error("laonet validation: vote type does not match election version {0}")]
    VoteTypeMismatch(ElectionVersion),

    #[error("laonet validation: secret ballot tally needs a decryption key")]
    MissingDecryptionKey,

    #[error("laonet validation: {0} is not a witness")]
    UnknownWitness(PublicKey),

    #[error("laonet validation: no pending object for message {0}")]
    UnknownPending(Identifier),

    #[error("laonet validation: witness signature does not verify over message {0}")]
    BadWitnessSignature(Identifier),

    #[error("laonet validation: identifier mismatch: expected {expected}, found {found}")]
    InvalidIdentifier {
        expected: Identifier,
        found: Identifier,
    },

    #[error("laonet validation: invalid election: {0}")]
    InvalidElection(String),

    #[error("laonet validation: invalid lao: {0}")]
    InvalidLao(String),

    #[error("laonet validation: invalid meeting: {0}")]
    InvalidMeeting(String),

    #[error("laonet validation: witness {0} did not co-sign the modification")]
    MissingWitnessSignature(PublicKey),

    #[error("laonet validation: invalid roll call: {0}")]
    InvalidRollCall(String),

    #[error("laonet validation: timestamp {found} is earlier than {minimum}")]
    InvalidTimestamp { found: i64, minimum: i64 },
}

/// Reasons a digital cash transaction is rejected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("laonet transaction: unknown input {0}")]
    UnknownInput(OutPoint),

    #[error("laonet transaction: input {0} is already spent")]
    AlreadySpent(OutPoint),

    #[error("laonet transaction: bad signature on input {0}")]
    BadSignature(usize),

    #[error("laonet transaction: unbalanced amounts: inputs {inputs}, outputs {outputs}")]
    UnbalancedAmounts { inputs: u64, outputs: u64 },

    #[error("laonet transaction: input {0} is referenced twice")]
    DuplicateInput(OutPoint),

    #[error("laonet transaction: coinbase must be signed by the organizer")]
    NotOrganizer,

    #[error("laonet transaction: amount overflow")]
    AmountOverflow,

    #[error("laonet transaction: transaction id mismatch: expected {expected}, found {found}")]
    IdMismatch {
        expected: Identifier,
        found: Identifier,
    },

    #[error("laonet transaction: malformed transaction: {0}")]
    Malformed(String),
}

/// Channel transport errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("laonet transport: request {0} timed out")]
    Timeout(i32),

    #[error("laonet transport: connection lost")]
    ConnectionLost,

    #[error("laonet transport: connection failed: {0}")]
    ConnectionFailed(String),

    #[error("laonet transport: request cancelled")]
    Cancelled,

    #[error("laonet transport: server error {code}: {description}")]
    Rpc { code: i32, description: String },

    #[error("laonet transport: answer for unknown request {0}")]
    UnknownRequest(i32),

    #[error("laonet transport: protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// The structured server error code, if this is an error answer
    pub fn rpc_code(&self) -> Option<ErrorCode> {
        match self {
            TransportError::Rpc { code, .. } => ErrorCode::from_code(*code),
            _ => None,
        }
    }
}

/// Errors raised while applying a broadcast message to local state
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("laonet handler: {0}")]
    Protocol(#[from] Error),

    #[error("laonet handler: {0}")]
    Validation(#[from] ValidationError),

    #[error("laonet handler: {0}")]
    Transaction(#[from] TransactionError),

    #[error("laonet handler: unknown lao {0}")]
    UnknownLao(Identifier),

    #[error("laonet handler: unknown election {0}")]
    UnknownElection(Identifier),

    #[error("laonet handler: unknown roll call {0}")]
    UnknownRollCall(Identifier),

    #[error("laonet handler: unknown meeting {0}")]
    UnknownMeeting(Identifier),

    #[error("laonet handler: {action} is not allowed on channel {channel}")]
    WrongChannel { action: String, channel: Channel },

    #[error("laonet handler: {0} is not allowed to perform this action")]
    Unauthorized(PublicKey),
}

impl HandlerError {
    /// Whether the failure may disappear once earlier messages arrive
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            HandlerError::UnknownLao(_)
                | HandlerError::UnknownElection(_)
                | HandlerError::UnknownRollCall(_)
                | HandlerError::UnknownMeeting(_)
                | HandlerError::Validation(ValidationError::UnknownPending(_))
        )
    }
}
