//! The ERC-3668 resolution loop.

use std::future::Future;

use derive_new::new;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, BlockId, Bytes, TransactionRequest,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::{
    signal::{decode_call_result, OffchainLookup, Outcome, UNANSWERED},
    CallPrimitive, CcipReadError, HttpFetcher, OffchainFetcher, ProtocolViolation,
};

/// Default number of loop iterations allowed per call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// A call that may be resolved through off-chain lookups.
#[derive(Clone, Debug, new)]
pub struct CcipReadRequest {
    /// The call to make
    pub tx: TypedTransaction,
    /// Block to make the call (and every callback) against
    pub block: Option<BlockId>,
    /// When false the call is passed straight to the primitive
    pub enable_ccip_read: bool,
}

impl From<TypedTransaction> for CcipReadRequest {
    fn from(tx: TypedTransaction) -> Self {
        Self::new(tx, None, true)
    }
}

/// The lookup currently being worked through and how far into its URL list
/// we are.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupState {
    origin: Address,
    lookup: OffchainLookup,
    cursor: usize,
}

impl LookupState {
    /// Start working on `lookup`, which must come from `origin`.
    pub fn new(origin: Address, lookup: OffchainLookup) -> Result<Self, ProtocolViolation> {
        check_sender(origin, lookup.sender)?;
        Ok(Self {
            origin,
            lookup,
            cursor: 0,
        })
    }

    /// The current lookup.
    pub fn lookup(&self) -> &OffchainLookup {
        &self.lookup
    }

    /// Take the next untried URL of the current lookup.
    pub fn next_url(&mut self) -> Option<String> {
        let url = self.lookup.urls.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(url)
    }

    /// Apply the outcome of a callback. `unanswered` is set when the
    /// callback was sent [`UNANSWERED`].
    ///
    /// Returns the answer if the contract produced one. A new lookup
    /// replaces the current one and restarts its URL list; a try-next keeps
    /// both.
    pub fn advance(
        &mut self,
        outcome: Outcome,
        unanswered: bool,
    ) -> Result<Option<Bytes>, ProtocolViolation> {
        match outcome {
            Outcome::Answer(data) => Ok(Some(data)),
            Outcome::Lookup(lookup) => {
                check_sender(self.origin, lookup.sender)?;
                self.lookup = lookup;
                self.cursor = 0;
                Ok(None)
            }
            Outcome::TryNext(_) if unanswered => Err(ProtocolViolation::TryNextAfterUnanswered {
                origin: self.origin,
            }),
            Outcome::TryNext(next) => {
                check_sender(self.origin, next.sender)?;
                Ok(None)
            }
        }
    }
}

fn check_sender(origin: Address, sender: Address) -> Result<(), ProtocolViolation> {
    if sender == origin {
        Ok(())
    } else {
        Err(ProtocolViolation::SenderMismatch { origin, sender })
    }
}

/// Resolves calls that revert with `OffchainLookup` by querying the
/// gateways and feeding their answers back to the contract.
#[derive(Debug, Clone)]
pub struct CcipReadRunner<C, F = HttpFetcher> {
    caller: C,
    fetcher: F,
    max_attempts: u32,
}

impl<C> CcipReadRunner<C, HttpFetcher> {
    /// Runner using a default HTTP client and [`DEFAULT_MAX_ATTEMPTS`].
    pub fn with_http(caller: C) -> Self {
        Self::new(caller, HttpFetcher::default(), DEFAULT_MAX_ATTEMPTS)
    }
}

impl<C, F> CcipReadRunner<C, F> {
    /// Instantiate a runner.
    pub fn new(caller: C, fetcher: F, max_attempts: u32) -> Self {
        Self {
            caller,
            fetcher,
            max_attempts,
        }
    }

    /// Set the number of loop iterations allowed per call.
    pub fn set_max_attempts(&mut self, max_attempts: u32) {
        self.max_attempts = max_attempts;
    }

    /// The number of loop iterations allowed per call.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The underlying call primitive.
    pub fn caller(&self) -> &C {
        &self.caller
    }

    /// The gateway fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }
}

/// Await `fut` unless `cancel` fires first, in which case `None`.
async fn guard<T>(cancel: Option<&CancellationToken>, fut: impl Future<Output = T>) -> Option<T> {
    match cancel {
        None => Some(fut.await),
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            out = fut => Some(out),
        },
    }
}

impl<C, F> CcipReadRunner<C, F>
where
    C: CallPrimitive,
    F: OffchainFetcher,
{
    /// Make the call, following off-chain lookups if the request opted in.
    pub async fn call(&self, request: CcipReadRequest) -> Result<Bytes, CcipReadError<C::Error>> {
        self.resolve(request, None).await
    }

    /// Like [`CcipReadRunner::call`], but gives up with
    /// [`CcipReadError::Cancelled`] as soon as `cancel` fires.
    pub async fn call_with_cancellation(
        &self,
        request: CcipReadRequest,
        cancel: &CancellationToken,
    ) -> Result<Bytes, CcipReadError<C::Error>> {
        self.resolve(request, Some(cancel)).await
    }

    async fn call_and_decode(
        &self,
        tx: &TypedTransaction,
        block: Option<BlockId>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Outcome, CcipReadError<C::Error>> {
        let result = guard(cancel, self.caller.call(tx, block))
            .await
            .ok_or(CcipReadError::Cancelled)?;
        decode_call_result(&self.caller, result).map_err(CcipReadError::Call)
    }

    #[instrument(skip_all, fields(origin = tracing::field::Empty))]
    async fn resolve(
        &self,
        request: CcipReadRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<Bytes, CcipReadError<C::Error>> {
        let CcipReadRequest {
            mut tx,
            block,
            enable_ccip_read,
        } = request;

        let target = match tx.to() {
            Some(target) if enable_ccip_read => target.clone(),
            _ => {
                trace!("CCIP read not requested, forwarding call");
                return guard(cancel, self.caller.call(&tx, block))
                    .await
                    .ok_or(CcipReadError::Cancelled)?
                    .map_err(CcipReadError::Call);
            }
        };

        let origin = guard(cancel, self.caller.resolve_address(&target))
            .await
            .ok_or(CcipReadError::Cancelled)?
            .map_err(CcipReadError::Call)?;
        tracing::Span::current().record("origin", tracing::field::debug(origin));
        tx.set_to(origin);

        let lookup = match self.call_and_decode(&tx, block, cancel).await? {
            Outcome::Answer(data) => return Ok(data),
            Outcome::Lookup(lookup) => lookup,
            Outcome::TryNext(_) => {
                warn!("OffchainTryNext raised before any OffchainLookup");
                return Err(ProtocolViolation::UnexpectedTryNext { origin }.into());
            }
        };
        let mut state = LookupState::new(origin, lookup).map_err(|violation| {
            warn!(%violation, "Rejecting off-chain lookup");
            violation
        })?;

        for remaining in (1..=self.max_attempts).rev() {
            let (response, unanswered) = match state.next_url() {
                Some(url) => {
                    let call_data = &state.lookup().call_data;
                    let fetched = guard(cancel, self.fetcher.fetch(&url, origin, call_data))
                        .await
                        .ok_or(CcipReadError::Cancelled)?;
                    match fetched {
                        Ok(data) if &data[..] == UNANSWERED.as_slice() => {
                            debug!(
                                %url,
                                remaining,
                                "Gateway sent the unanswered marker, trying next url"
                            );
                            continue;
                        }
                        Ok(data) => (data, false),
                        Err(err) => {
                            debug!(
                                %url,
                                error = %err,
                                remaining,
                                "Gateway failed, trying next url"
                            );
                            continue;
                        }
                    }
                }
                None => {
                    debug!(remaining, "No gateway answered");
                    (Bytes::from(UNANSWERED.to_vec()), true)
                }
            };

            let callback = TypedTransaction::Legacy(
                TransactionRequest::new()
                    .to(origin)
                    .data(state.lookup().callback_data(&response)),
            );
            trace!(remaining, unanswered, "Calling lookup callback");
            let outcome = self.call_and_decode(&callback, block, cancel).await?;

            match state.advance(outcome, unanswered) {
                Ok(Some(data)) => return Ok(data),
                Ok(None) => {}
                Err(violation) => {
                    warn!(%violation, "Rejecting callback outcome");
                    return Err(violation.into());
                }
            }
        }

        warn!(max_attempts = self.max_attempts, "CCIP read ran out of attempts");
        Err(CcipReadError::MaxAttempts(self.max_attempts))
    }
}
