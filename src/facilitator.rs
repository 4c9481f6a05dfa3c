//! Verification and settlement interface.
//!
//! Implementors validate payment payloads against requirements
//! ([`Facilitator::verify`]) and execute on-ledger transfers
//! ([`Facilitator::settle`]). The challenge middleware and the facilitator
//! HTTP endpoints are both written against this trait, so tests substitute
//! scripted implementations for the live ledger.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::types::{
    SettleRequest, SettleResponse, SupportedPaymentKind, VerifyRequest, VerifyResponse,
};

pub trait Facilitator {
    /// Error type for failures that are not a verdict about the payment
    /// itself (ledger unreachable, misconfiguration, internal faults).
    type Error: Debug + Display;

    /// Check a payment payload against the requirements and the ledger.
    ///
    /// A payload that is well-formed but unacceptable yields
    /// `Ok(VerifyResponse::Invalid { .. })` with a reason; `Err` is reserved
    /// for failures unrelated to the payment's validity.
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;

    /// Re-validate and submit a verified payment as a ledger transfer.
    ///
    /// A settlement that could not be submitted yields
    /// `Ok(SettleResponse { success: false, .. })`; callers decide whether
    /// that is fatal for their request.
    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send;

    /// Payment kinds this facilitator can verify and settle.
    fn supported(
        &self,
    ) -> impl Future<Output = Result<Vec<SupportedPaymentKind>, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<Vec<SupportedPaymentKind>, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
