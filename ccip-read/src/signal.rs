//! The revert signals of ERC-3668 and their decoding from call failures.

use ethers::{
    abi::Token,
    contract::EthError,
    types::{Address, Bytes, Selector},
};
use once_cell::sync::Lazy;
use tracing::trace;

use crate::CallPrimitive;

/// Response handed to a callback when no gateway produced an answer:
/// `bytes4(keccak256("OffchainLookupUnanswered()"))`.
pub static UNANSWERED: Lazy<Selector> =
    Lazy::new(|| ethers::utils::id("OffchainLookupUnanswered()"));

/// `error OffchainLookup(address sender, string[] urls, bytes callData, bytes4 callbackFunction, bytes extraData)`
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, EthError)]
#[etherror(
    name = "OffchainLookup",
    abi = "OffchainLookup(address,string[],bytes,bytes4,bytes)"
)]
pub struct OffchainLookup {
    /// Contract raising the lookup
    pub sender: Address,
    /// Gateway URL templates, tried in order
    pub urls: Vec<String>,
    /// Request sent to the gateway
    pub call_data: Bytes,
    /// Selector of the function that receives the gateway response
    pub callback_function: [u8; 4],
    /// Opaque data passed back to the callback as is
    pub extra_data: Bytes,
}

impl OffchainLookup {
    /// Calldata for the callback: `callbackFunction ‖ abi.encode(response, extraData)`.
    pub fn callback_data(&self, response: &[u8]) -> Bytes {
        let args = ethers::abi::encode(&[
            Token::Bytes(response.to_vec()),
            Token::Bytes(self.extra_data.to_vec()),
        ]);
        let mut data = Vec::with_capacity(4 + args.len());
        data.extend_from_slice(&self.callback_function);
        data.extend(args);
        data.into()
    }
}

/// `error OffchainTryNext(address sender)`
///
/// Raised by a callback to reject the response it was given and ask for the
/// next URL of the current lookup.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, EthError)]
#[etherror(name = "OffchainTryNext", abi = "OffchainTryNext(address)")]
pub struct OffchainTryNext {
    /// Contract raising the signal
    pub sender: Address,
}

/// What a call into the contract resolved to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The call returned normally.
    Answer(Bytes),
    /// The call asked for an off-chain lookup.
    Lookup(OffchainLookup),
    /// The call asked to retry with the next URL.
    TryNext(OffchainTryNext),
}

/// Match a revert payload against the two known signals.
///
/// Returns `None` for short payloads, unknown selectors and payloads that
/// carry a known selector but fail to decode.
pub fn classify_revert(data: &[u8]) -> Option<Outcome> {
    let selector = data.get(..4)?;
    if selector == OffchainLookup::selector() {
        OffchainLookup::decode_with_selector(data).map(Outcome::Lookup)
    } else if selector == OffchainTryNext::selector() {
        OffchainTryNext::decode_with_selector(data).map(Outcome::TryNext)
    } else {
        None
    }
}

/// Turn the result of a call into an [`Outcome`].
///
/// Failures that are not a recognised signal are handed back unchanged.
pub fn decode_call_result<C>(
    caller: &C,
    result: Result<Bytes, C::Error>,
) -> Result<Outcome, C::Error>
where
    C: CallPrimitive + ?Sized,
{
    let err = match result {
        Ok(data) => return Ok(Outcome::Answer(data)),
        Err(err) => err,
    };
    match caller.revert_data(&err).as_deref().and_then(classify_revert) {
        Some(outcome) => Ok(outcome),
        None => {
            trace!(error = %err, "Call failure is not an off-chain lookup signal");
            Err(err)
        }
    }
}
