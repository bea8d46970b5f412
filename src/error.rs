// src/error.rs
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{field} does not fit in 128 bits")]
    FieldOverflow { field: &'static str },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Relay unreachable: {0}")]
    Transport(String),

    #[error("Relay rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Malformed relay response: {0}")]
    Malformed(String),

    #[error("Timed out waiting for operation receipt")]
    Timeout,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Chain RPC error: {0}")]
    Rpc(String),

    #[error("Contract call failed: {0}")]
    Contract(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("Signer refused: {0}")]
    Refused(String),

    #[error("Signer failed: {0}")]
    Failed(String),
}

/// Failures surfaced by the sponsorship negotiator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SponsorshipError {
    #[error("Endorsement service unavailable: {0}")]
    EndorsementUnavailable(String),

    #[error("Insufficient sponsor balance: {0}")]
    InsufficientSponsorBalance(String),

    #[error("Sponsor policy limit exceeded: {0}")]
    PolicyLimitExceeded(String),

    #[error("Signature failure: {0}")]
    SignatureFailure(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Failures of the endorsement service, one per JSON-RPC error code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndorsementError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Insufficient funds for sponsoring operation: {0}")]
    InsufficientSponsorBalance(String),

    #[error("Policy limit exceeded: {0}")]
    PolicyLimitExceeded(String),

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CodecError> for EndorsementError {
    fn from(e: CodecError) -> Self {
        EndorsementError::InvalidParams(e.to_string())
    }
}
