use ethers::providers::MiddlewareError;

use crate::CcipReadError;

impl<E> MiddlewareError for CcipReadError<E>
where
    E: MiddlewareError + 'static,
{
    type Inner = E;

    fn from_err(src: Self::Inner) -> Self {
        CcipReadError::Call(src)
    }

    fn as_inner(&self) -> Option<&Self::Inner> {
        self.as_call_error()
    }
}
