//! Local verifier and settler backed by a [`SolanaProvider`].
//!
//! Verification runs the checks in a fixed order, short-circuiting on the
//! first failure: scheme, network, receiver, amount, time window, then the
//! Ed25519 signature over the canonical transfer message. One ledger
//! round-trip (latest blockhash) happens per verification; its failure is a
//! [`PaymentError::Ledger`], never an invalid-payment verdict. Settlement
//! re-validates, then submits the authorized transfer with the server
//! keypair as fee payer.

use std::time::Duration;
use tracing::instrument;

use crate::facilitator::Facilitator;
use crate::network::Network;
use crate::solana::{SolanaProvider, SolanaProviderError};
use crate::timestamp::UnixTimestamp;
use crate::types::{
    ExactSolanaPayload, ExactSolanaPayloadAuthorization, FacilitatorErrorReason, PaymentPayload,
    PaymentRequirements, RequirementsExtra, Scheme, SettleRequest, SettleResponse, SolanaAddress,
    SupportedPaymentKind, TokenAmount, VerifyRequest, VerifyResponse, X402Version,
};

/// Expiry margin, in seconds, absorbing latency between the check and any
/// later on-ledger use of the authorization.
const EXPIRY_GRACE_SECS: u64 = 6;

/// Everything that can go wrong while verifying or settling a payment.
#[derive(thiserror::Error, Debug)]
pub enum PaymentError {
    #[error("incompatible payload scheme (payload: {payload}, requirements: {requirements})")]
    SchemeMismatch {
        payload: Scheme,
        requirements: Scheme,
    },
    #[error("incompatible payload network (payload: {payload}, requirements: {requirements})")]
    NetworkMismatch {
        payload: Network,
        requirements: Network,
    },
    #[error("incompatible receiver (payload: {payload}, requirements: {requirements})")]
    ReceiverMismatch {
        payload: SolanaAddress,
        requirements: SolanaAddress,
    },
    #[error("insufficient value (offered: {offered}, required: {required})")]
    InsufficientValue {
        offered: TokenAmount,
        required: TokenAmount,
    },
    #[error("authorization not active yet (valid_after: {valid_after}, now: {now})")]
    NotYetValid {
        valid_after: UnixTimestamp,
        now: UnixTimestamp,
    },
    #[error("authorization expired (valid_before: {valid_before}, now: {now})")]
    Expired {
        valid_before: UnixTimestamp,
        now: UnixTimestamp,
    },
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(Network),
    #[error("fee payer may not be the paying party")]
    FeePayerIsPayer,
    #[error(transparent)]
    Ledger(#[from] SolanaProviderError),
    #[error("ledger call exceeded the {0}s deadline")]
    Deadline(u64),
    #[error("cannot read system clock")]
    Clock,
}

impl PaymentError {
    /// Wire reason code when this error is a verdict about the payment.
    /// `None` for ledger, deadline, and clock failures, which must not be
    /// reported to the client as "invalid payment".
    pub fn reason(&self) -> Option<FacilitatorErrorReason> {
        match self {
            PaymentError::SchemeMismatch { .. } => Some(FacilitatorErrorReason::InvalidScheme),
            PaymentError::NetworkMismatch { .. } | PaymentError::UnsupportedNetwork(_) => {
                Some(FacilitatorErrorReason::InvalidNetwork)
            }
            PaymentError::ReceiverMismatch { .. } | PaymentError::FeePayerIsPayer => {
                Some(FacilitatorErrorReason::InvalidReceiver)
            }
            PaymentError::InsufficientValue { .. } => {
                Some(FacilitatorErrorReason::InsufficientAmount)
            }
            PaymentError::NotYetValid { .. } => Some(FacilitatorErrorReason::NotYetValid),
            PaymentError::Expired { .. } => Some(FacilitatorErrorReason::Expired),
            PaymentError::InvalidSignature(_) => Some(FacilitatorErrorReason::InvalidSignature),
            PaymentError::Ledger(_) | PaymentError::Deadline(_) | PaymentError::Clock => None,
        }
    }
}

/// [`Facilitator`] that verifies and settles against the ledger directly.
#[derive(Clone, Debug)]
pub struct FacilitatorLocal {
    provider: SolanaProvider,
}

impl FacilitatorLocal {
    pub fn new(provider: SolanaProvider) -> Self {
        FacilitatorLocal { provider }
    }

    pub fn provider(&self) -> &SolanaProvider {
        &self.provider
    }

    /// Runs every precondition of a payable authorization, in order.
    /// Returns the payer address on success.
    #[instrument(skip_all, err)]
    async fn assert_valid_payment(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SolanaAddress, PaymentError> {
        if payload.network != self.provider.network() {
            return Err(PaymentError::UnsupportedNetwork(payload.network));
        }
        assert_requirements(payload, requirements)?;
        let now = UnixTimestamp::now().map_err(|_| PaymentError::Clock)?;
        assert_time(&payload.payload.authorization, now)?;
        let blockhash = self.provider.latest_blockhash().await?;
        tracing::debug!(%blockhash, "fetched chain context");
        assert_signature(&payload.payload, payload.network, &requirements.asset)?;
        Ok(payload.payload.authorization.from)
    }
}

impl Facilitator for FacilitatorLocal {
    type Error = PaymentError;

    #[instrument(skip_all, err, fields(network = %request.payment_payload.network))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let payload = &request.payment_payload;
        let requirements = &request.payment_requirements;
        let payer = payload.payload.authorization.from;
        let deadline = Duration::from_secs(requirements.max_timeout_seconds);
        let checked = tokio::time::timeout(
            deadline,
            self.assert_valid_payment(payload, requirements),
        )
        .await
        .map_err(|_| PaymentError::Deadline(requirements.max_timeout_seconds))?;
        match checked {
            Ok(payer) => Ok(VerifyResponse::valid(payer)),
            Err(error) => match error.reason() {
                Some(reason) => {
                    tracing::info!(error = %error, "payment rejected");
                    Ok(VerifyResponse::invalid(payer, reason))
                }
                None => Err(error),
            },
        }
    }

    #[instrument(skip_all, err, fields(network = %request.payment_payload.network))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        let payload = &request.payment_payload;
        let requirements = &request.payment_requirements;
        let payer = payload.payload.authorization.from;
        let network = self.provider.network();
        let deadline = Duration::from_secs(requirements.max_timeout_seconds);

        let outcome = tokio::time::timeout(deadline, async {
            let payer = self.assert_valid_payment(payload, requirements).await?;
            if payer == self.provider.address() {
                return Err(PaymentError::FeePayerIsPayer);
            }
            let transaction = self
                .provider
                .submit_authorized_transfer(
                    &payload.payload.authorization,
                    &requirements.asset,
                    &payload.payload.signature,
                )
                .await?;
            Ok(transaction)
        })
        .await
        .map_err(|_| PaymentError::Deadline(requirements.max_timeout_seconds))?;

        match outcome {
            Ok(transaction) => Ok(SettleResponse {
                success: true,
                error_reason: None,
                payer,
                transaction: Some(transaction),
                network,
            }),
            Err(error) => {
                tracing::warn!(error = %error, "settlement failed");
                Ok(SettleResponse {
                    success: false,
                    error_reason: Some(
                        error
                            .reason()
                            .unwrap_or(FacilitatorErrorReason::UnexpectedSettleError),
                    ),
                    payer,
                    transaction: None,
                    network,
                })
            }
        }
    }

    async fn supported(&self) -> Result<Vec<SupportedPaymentKind>, Self::Error> {
        Ok(vec![SupportedPaymentKind {
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            network: self.provider.network(),
            extra: Some(RequirementsExtra {
                fee_payer: Some(self.provider.address()),
            }),
        }])
    }
}

/// Scheme, network, receiver, and amount compatibility between a payload
/// and the requirements it claims to satisfy.
#[instrument(skip_all, err)]
fn assert_requirements(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
) -> Result<(), PaymentError> {
    if payload.scheme != requirements.scheme {
        return Err(PaymentError::SchemeMismatch {
            payload: payload.scheme,
            requirements: requirements.scheme,
        });
    }
    if payload.network != requirements.network {
        return Err(PaymentError::NetworkMismatch {
            payload: payload.network,
            requirements: requirements.network,
        });
    }
    let authorization = &payload.payload.authorization;
    if authorization.to != requirements.pay_to {
        return Err(PaymentError::ReceiverMismatch {
            payload: authorization.to,
            requirements: requirements.pay_to,
        });
    }
    if authorization.value < requirements.max_amount_required {
        return Err(PaymentError::InsufficientValue {
            offered: authorization.value,
            required: requirements.max_amount_required,
        });
    }
    Ok(())
}

/// `now` must lie within `[validAfter, validBefore]`, with
/// [`EXPIRY_GRACE_SECS`] of margin before the deadline.
#[instrument(skip_all, err)]
fn assert_time(
    authorization: &ExactSolanaPayloadAuthorization,
    now: UnixTimestamp,
) -> Result<(), PaymentError> {
    if authorization.valid_before < now + EXPIRY_GRACE_SECS {
        return Err(PaymentError::Expired {
            valid_before: authorization.valid_before,
            now,
        });
    }
    if authorization.valid_after > now {
        return Err(PaymentError::NotYetValid {
            valid_after: authorization.valid_after,
            now,
        });
    }
    Ok(())
}

/// Ed25519 signature by `from` over the canonical transfer message.
#[instrument(skip_all, err)]
fn assert_signature(
    payload: &ExactSolanaPayload,
    network: Network,
    asset: &SolanaAddress,
) -> Result<(), PaymentError> {
    let message = payload.authorization.transfer_message(network, asset);
    let signature = payload.signature.as_signature();
    let signer: solana_pubkey::Pubkey = payload.authorization.from.into();
    if signature.verify(signer.as_ref(), &message) {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature(
            "signature does not match the authorization signer".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ed25519Signature, PaymentNonce};
    use solana_keypair::Keypair;
    use solana_pubkey::Pubkey;
    use solana_signer::Signer as _;

    const MINT: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

    fn requirements(pay_to: SolanaAddress) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: Network::SolanaDevnet,
            max_amount_required: TokenAmount(1000),
            resource: "http://localhost:3022/solana/get-balance".parse().unwrap(),
            description: "Balance lookup".to_string(),
            mime_type: "application/json".to_string(),
            pay_to,
            max_timeout_seconds: 60,
            asset: MINT.parse().unwrap(),
            extra: None,
        }
    }

    fn signed_payload(
        keypair: &Keypair,
        requirements: &PaymentRequirements,
        value: u64,
        valid_after: UnixTimestamp,
        valid_before: UnixTimestamp,
    ) -> PaymentPayload {
        let authorization = ExactSolanaPayloadAuthorization {
            from: keypair.pubkey().into(),
            to: requirements.pay_to,
            value: TokenAmount(value),
            valid_after,
            valid_before,
            nonce: PaymentNonce::random(),
        };
        let message = authorization.transfer_message(requirements.network, &requirements.asset);
        let signature = keypair.sign_message(&message);
        PaymentPayload {
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            network: requirements.network,
            payload: ExactSolanaPayload {
                signature: Ed25519Signature::from(signature),
                authorization,
            },
        }
    }

    fn now() -> UnixTimestamp {
        UnixTimestamp::now().unwrap()
    }

    #[test]
    fn test_valid_payment_passes_every_check() {
        let keypair = Keypair::new();
        let pay_to = SolanaAddress(Pubkey::new_unique());
        let requirements = requirements(pay_to);
        let payload = signed_payload(&keypair, &requirements, 1000, now() - 10, now() + 300);

        assert!(assert_requirements(&payload, &requirements).is_ok());
        assert!(assert_time(&payload.payload.authorization, now()).is_ok());
        assert!(
            assert_signature(&payload.payload, requirements.network, &requirements.asset).is_ok()
        );
    }

    #[test]
    fn test_insufficient_value_is_rejected() {
        let keypair = Keypair::new();
        let requirements = requirements(SolanaAddress(Pubkey::new_unique()));
        let payload = signed_payload(&keypair, &requirements, 999, now() - 10, now() + 300);

        let error = assert_requirements(&payload, &requirements).unwrap_err();
        assert!(matches!(error, PaymentError::InsufficientValue { .. }));
        assert_eq!(
            error.reason(),
            Some(FacilitatorErrorReason::InsufficientAmount)
        );
    }

    #[test]
    fn test_receiver_mismatch_is_rejected() {
        let keypair = Keypair::new();
        let requirements = requirements(SolanaAddress(Pubkey::new_unique()));
        let mut payload = signed_payload(&keypair, &requirements, 1000, now() - 10, now() + 300);
        payload.payload.authorization.to = SolanaAddress(Pubkey::new_unique());

        let error = assert_requirements(&payload, &requirements).unwrap_err();
        assert!(matches!(error, PaymentError::ReceiverMismatch { .. }));
    }

    #[test]
    fn test_network_mismatch_is_rejected() {
        let keypair = Keypair::new();
        let requirements = requirements(SolanaAddress(Pubkey::new_unique()));
        let mut payload = signed_payload(&keypair, &requirements, 1000, now() - 10, now() + 300);
        payload.network = Network::Solana;

        let error = assert_requirements(&payload, &requirements).unwrap_err();
        assert!(matches!(error, PaymentError::NetworkMismatch { .. }));
        assert_eq!(error.reason(), Some(FacilitatorErrorReason::InvalidNetwork));
    }

    #[test]
    fn test_expired_authorization_is_rejected() {
        let keypair = Keypair::new();
        let requirements = requirements(SolanaAddress(Pubkey::new_unique()));
        let payload = signed_payload(&keypair, &requirements, 1000, now() - 300, now() - 1);

        let error = assert_time(&payload.payload.authorization, now()).unwrap_err();
        assert!(matches!(error, PaymentError::Expired { .. }));
        assert_eq!(error.reason(), Some(FacilitatorErrorReason::Expired));
    }

    #[test]
    fn test_not_yet_valid_authorization_is_rejected() {
        let keypair = Keypair::new();
        let requirements = requirements(SolanaAddress(Pubkey::new_unique()));
        let payload = signed_payload(&keypair, &requirements, 1000, now() + 100, now() + 400);

        let error = assert_time(&payload.payload.authorization, now()).unwrap_err();
        assert!(matches!(error, PaymentError::NotYetValid { .. }));
    }

    #[test]
    fn test_expiry_grace_margin() {
        let keypair = Keypair::new();
        let requirements = requirements(SolanaAddress(Pubkey::new_unique()));
        // Expires within the grace margin: treated as already expired.
        let payload = signed_payload(&keypair, &requirements, 1000, now() - 10, now() + 2);
        assert!(assert_time(&payload.payload.authorization, now()).is_err());
    }

    #[test]
    fn test_tampered_authorization_fails_signature_check() {
        let keypair = Keypair::new();
        let requirements = requirements(SolanaAddress(Pubkey::new_unique()));
        let mut payload = signed_payload(&keypair, &requirements, 1000, now() - 10, now() + 300);
        payload.payload.authorization.value = TokenAmount(1);

        let error =
            assert_signature(&payload.payload, requirements.network, &requirements.asset)
                .unwrap_err();
        assert!(matches!(error, PaymentError::InvalidSignature(_)));
    }

    #[test]
    fn test_signature_for_other_asset_fails() {
        let keypair = Keypair::new();
        let requirements = requirements(SolanaAddress(Pubkey::new_unique()));
        let payload = signed_payload(&keypair, &requirements, 1000, now() - 10, now() + 300);

        let other_mint = SolanaAddress(Pubkey::new_unique());
        assert!(assert_signature(&payload.payload, requirements.network, &other_mint).is_err());
    }

    #[test]
    fn test_ledger_errors_carry_no_reason_code() {
        let error = PaymentError::Ledger(SolanaProviderError::Rpc("connection refused".into()));
        assert_eq!(error.reason(), None);
        assert_eq!(PaymentError::Deadline(60).reason(), None);
        assert_eq!(PaymentError::Clock.reason(), None);
    }
}
