use ethers::types::Address;
use thiserror::Error;

/// Errors returned by [`crate::CcipReadRunner`].
#[derive(Error, Debug)]
pub enum CcipReadError<E> {
    /// The underlying call failed for a reason unrelated to off-chain
    /// lookups. The original error is returned untouched.
    #[error(transparent)]
    Call(E),
    /// The contract broke the off-chain lookup protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    /// The attempt budget ran out before the contract produced an answer.
    #[error("ccip read: max attempts ({0})")]
    MaxAttempts(u32),
    /// The caller cancelled the lookup.
    #[error("ccip read: cancelled")]
    Cancelled,
}

impl<E> CcipReadError<E> {
    /// The inner call error, if this is an unrelated call failure.
    pub fn as_call_error(&self) -> Option<&E> {
        match self {
            CcipReadError::Call(err) => Some(err),
            _ => None,
        }
    }
}

/// Fatal deviations from ERC-3668 by the called contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A lookup or try-next signal named a sender other than the contract
    /// that was called.
    #[error("ccip read: sender {sender:?} does not match origin {origin:?}")]
    SenderMismatch {
        /// Address the call was made to
        origin: Address,
        /// Sender reported by the signal
        sender: Address,
    },
    /// `OffchainTryNext` was raised before any `OffchainLookup`.
    #[error("ccip read: OffchainTryNext from {origin:?} without a prior OffchainLookup")]
    UnexpectedTryNext {
        /// Address the call was made to
        origin: Address,
    },
    /// The callback was told no gateway answered and asked to continue
    /// instead of returning or starting a new lookup.
    #[error("ccip read: {origin:?} asked to try the next url after all urls were exhausted")]
    TryNextAfterUnanswered {
        /// Address the call was made to
        origin: Address,
    },
}

/// Reasons a single gateway did not produce a usable answer. These never
/// leave the resolution loop; the next URL is tried instead.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Connection, timeout or body read failure
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Body was not JSON with a string `data` field
    #[error("gateway response is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// `data` was not `0x` prefixed
    #[error("gateway data is missing the 0x prefix: {0}")]
    MissingHexPrefix(String),
    /// `data` was not valid hex
    #[error("gateway data is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    /// The gateway returned the reserved unanswered value
    #[error("gateway returned the reserved OffchainLookupUnanswered value")]
    Unanswered,
}
