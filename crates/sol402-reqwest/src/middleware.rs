//! Middleware answering HTTP 402 challenges with signed payments.
//!
//! [`Sol402Payments`] implements `reqwest_middleware::Middleware`: it runs
//! the request as-is, and when the response is a 402 it parses the embedded
//! challenge, builds a payment authorization against the local keypair,
//! attaches it as the `X-Payment` header, and resends exactly once. Any
//! other status passes through to the caller untouched, so free resources
//! and already-paid requests behave like plain `reqwest`.

use http::{Extensions, HeaderValue, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signer::Signer;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use sol402::timestamp::UnixTimestamp;
use sol402::types::{
    ExactSolanaPayload, ExactSolanaPayloadAuthorization, PaymentNonce, PaymentPayload,
    PaymentRequiredResponse, PaymentRequirements, Scheme, SettleResponse,
    SettleResponseHeaderError, SolanaAddress, TokenAmount, X402Version,
};

/// Header carrying the signed payment payload on the retried request.
pub const PAYMENT_HEADER: &str = "X-Payment";
/// Header carrying the settlement receipt on a paid response.
pub const PAYMENT_RESPONSE_HEADER: &str = "X-Payment-Response";

/// Authorizations are valid from slightly in the past, absorbing clock skew
/// between client and verifier.
const VALIDITY_SKEW_SECS: u64 = 60;
/// Five-minute lookahead before a fresh authorization expires.
const VALIDITY_LOOKAHEAD_SECS: u64 = 300;

/// Errors while constructing or attaching a payment.
#[derive(Debug, thiserror::Error)]
pub enum Sol402PaymentsError {
    /// None of the server's accepted payment methods can be satisfied by
    /// this client.
    #[error("no suitable payment method among {count} accepted")]
    NoSuitablePaymentMethod { count: usize },
    /// The challenge asks for more than the configured cap for that mint.
    /// Prevents accidental or malicious overspending.
    #[error("payment amount {requested} exceeds the configured maximum {allowed} for mint {mint}")]
    PaymentAmountTooLarge {
        requested: TokenAmount,
        allowed: TokenAmount,
        mint: SolanaAddress,
    },
    /// The original request could not be cloned for the paid retry,
    /// typically because the body is a stream.
    #[error("request object is not cloneable; streaming bodies cannot be retried with payment")]
    RequestNotCloneable,
    #[error("failed to read system clock")]
    Clock,
    #[error("failed to sign payment authorization: {0}")]
    Signing(String),
    #[error("failed to encode payment payload to json")]
    JsonEncode(#[source] serde_json::Error),
    #[error("failed to encode payment payload to an HTTP header")]
    HeaderValueEncode(#[source] http::header::InvalidHeaderValue),
}

impl From<Sol402PaymentsError> for rqm::Error {
    fn from(error: Sol402PaymentsError) -> Self {
        rqm::Error::Middleware(error.into())
    }
}

/// Automatic 402 handling for a `reqwest` client.
#[derive(Clone)]
pub struct Sol402Payments {
    keypair: Arc<Keypair>,
    max_amounts: HashMap<Pubkey, TokenAmount>,
}

impl Sol402Payments {
    /// Pay challenges with the given keypair.
    pub fn with_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
            max_amounts: HashMap::new(),
        }
    }

    /// Cap what a single challenge may charge in `mint`.
    pub fn max(&self, mint: SolanaAddress, amount: TokenAmount) -> Self {
        let mut this = self.clone();
        this.max_amounts.insert(mint.into(), amount);
        this
    }

    /// Address payments are made from.
    pub fn address(&self) -> SolanaAddress {
        SolanaAddress(self.keypair.pubkey())
    }

    /// Pick the requirement to satisfy from the challenge's accepted list.
    /// Only the `exact` scheme exists, so the first compatible entry wins.
    pub fn select_payment_requirements<'a>(
        &self,
        accepts: &'a [PaymentRequirements],
    ) -> Result<&'a PaymentRequirements, Sol402PaymentsError> {
        accepts
            .iter()
            .find(|requirement| requirement.scheme == Scheme::Exact)
            .ok_or(Sol402PaymentsError::NoSuitablePaymentMethod {
                count: accepts.len(),
            })
    }

    /// Enforce the per-mint spending cap against a selected requirement.
    pub fn assert_max_amount(
        &self,
        selected: &PaymentRequirements,
    ) -> Result<(), Sol402PaymentsError> {
        if let Some(allowed) = self.max_amounts.get(&Pubkey::from(selected.asset))
            && selected.max_amount_required > *allowed
        {
            return Err(Sol402PaymentsError::PaymentAmountTooLarge {
                requested: selected.max_amount_required,
                allowed: *allowed,
                mint: selected.asset,
            });
        }
        Ok(())
    }

    /// Build and sign a payload satisfying `selected`: pay exactly the
    /// required amount to its recipient, within a fresh five-minute window,
    /// under a fresh random nonce.
    #[instrument(name = "sol402.make_payment_payload", skip_all, fields(
        network = %selected.network,
        mint = %selected.asset,
        amount = %selected.max_amount_required,
    ))]
    pub fn make_payment_payload(
        &self,
        selected: &PaymentRequirements,
    ) -> Result<PaymentPayload, Sol402PaymentsError> {
        let now = UnixTimestamp::now().map_err(|_| Sol402PaymentsError::Clock)?;
        let authorization = ExactSolanaPayloadAuthorization {
            from: self.address(),
            to: selected.pay_to,
            value: selected.max_amount_required,
            valid_after: now - VALIDITY_SKEW_SECS,
            valid_before: now + VALIDITY_LOOKAHEAD_SECS,
            nonce: PaymentNonce::random(),
        };
        let message = authorization.transfer_message(selected.network, &selected.asset);
        let signature = self
            .keypair
            .try_sign_message(&message)
            .map_err(|e| Sol402PaymentsError::Signing(e.to_string()))?;
        Ok(PaymentPayload {
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            network: selected.network,
            payload: ExactSolanaPayload {
                signature: signature.into(),
                authorization,
            },
        })
    }

    /// Base64-encode a payload for the `X-Payment` header.
    pub fn encode_payment_header(
        payload: &PaymentPayload,
    ) -> Result<HeaderValue, Sol402PaymentsError> {
        let encoded = payload
            .to_header_bytes()
            .map_err(Sol402PaymentsError::JsonEncode)?;
        HeaderValue::from_bytes(encoded.as_ref()).map_err(Sol402PaymentsError::HeaderValueEncode)
    }

    /// Select a requirement, enforce the cap, sign, and encode.
    #[instrument(name = "sol402.build_payment_header", skip_all)]
    pub fn build_payment_header(
        &self,
        accepts: &[PaymentRequirements],
    ) -> Result<HeaderValue, Sol402PaymentsError> {
        let selected = self.select_payment_requirements(accepts)?;
        self.assert_max_amount(selected)?;
        let payload = self.make_payment_payload(selected)?;
        Self::encode_payment_header(&payload)
    }
}

/// Settlement receipt of a paid response, when the server attached one.
pub fn decode_settlement(
    response: &Response,
) -> Option<Result<SettleResponse, SettleResponseHeaderError>> {
    let header = response.headers().get(PAYMENT_RESPONSE_HEADER)?;
    Some(SettleResponse::from_header_bytes(header.as_bytes()))
}

#[async_trait::async_trait]
impl rqm::Middleware for Sol402Payments {
    /// Intercept 402 responses: construct a payment and retry exactly once.
    #[instrument(name = "sol402.handle", skip(self, req, extensions, next), fields(method = %req.method(), url = %req.url()))]
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let retry_req = req.try_clone();

        let res = next.clone().run(req, extensions).await?;
        if res.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(res);
        }
        tracing::debug!("received 402 challenge");

        let challenge = res.json::<PaymentRequiredResponse>().await?;
        let payment_header = self
            .build_payment_header(&challenge.accepts)
            .map_err(Into::<rqm::Error>::into)?;
        let mut retry_req = retry_req.ok_or(Sol402PaymentsError::RequestNotCloneable)?;
        let headers = retry_req.headers_mut();
        headers.insert(PAYMENT_HEADER, payment_header);
        headers.insert(
            "Access-Control-Expose-Headers",
            HeaderValue::from_static(PAYMENT_RESPONSE_HEADER),
        );
        next.run(retry_req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest_middleware::ClientBuilder;
    use sol402::network::Network;
    use sol402::types::TransactionSignature;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn requirements(pay_to: SolanaAddress, resource: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: Network::SolanaDevnet,
            max_amount_required: TokenAmount(1000),
            resource: resource.parse().unwrap(),
            description: "Balance lookup".to_string(),
            mime_type: "application/json".to_string(),
            pay_to,
            max_timeout_seconds: 60,
            asset: "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU"
                .parse()
                .unwrap(),
            extra: None,
        }
    }

    fn challenge(accepts: Vec<PaymentRequirements>) -> PaymentRequiredResponse {
        PaymentRequiredResponse {
            x402_version: X402Version::V1,
            error: "Payment required".to_string(),
            accepts,
            amount: None,
        }
    }

    #[test]
    fn test_payload_satisfies_requirement() {
        let keypair = Keypair::new();
        let from = SolanaAddress(keypair.pubkey());
        let payments = Sol402Payments::with_keypair(keypair);
        let pay_to = SolanaAddress(Pubkey::new_unique());
        let selected = requirements(pay_to, "http://localhost:3022/api/data");

        let payload = payments.make_payment_payload(&selected).unwrap();
        let authorization = &payload.payload.authorization;
        assert_eq!(authorization.from, from);
        assert_eq!(authorization.to, pay_to);
        assert_eq!(authorization.value, selected.max_amount_required);
        assert_eq!(
            authorization.valid_before.as_secs() - authorization.valid_after.as_secs(),
            VALIDITY_SKEW_SECS + VALIDITY_LOOKAHEAD_SECS
        );
        assert_eq!(authorization.nonce.as_str().len(), 16);

        // The signature covers the canonical transfer message.
        let message = authorization.transfer_message(selected.network, &selected.asset);
        assert!(
            payload
                .payload
                .signature
                .as_signature()
                .verify(Pubkey::from(from).as_ref(), &message)
        );
    }

    #[test]
    fn test_fresh_nonce_per_payload() {
        let payments = Sol402Payments::with_keypair(Keypair::new());
        let selected = requirements(
            SolanaAddress(Pubkey::new_unique()),
            "http://localhost:3022/api/data",
        );
        let first = payments.make_payment_payload(&selected).unwrap();
        let second = payments.make_payment_payload(&selected).unwrap();
        assert_ne!(
            first.payload.authorization.nonce,
            second.payload.authorization.nonce
        );
    }

    #[test]
    fn test_spending_cap_is_enforced() {
        let selected = requirements(
            SolanaAddress(Pubkey::new_unique()),
            "http://localhost:3022/api/data",
        );
        let payments =
            Sol402Payments::with_keypair(Keypair::new()).max(selected.asset, TokenAmount(500));
        let error = payments.assert_max_amount(&selected).unwrap_err();
        assert!(matches!(
            error,
            Sol402PaymentsError::PaymentAmountTooLarge { .. }
        ));

        let generous =
            Sol402Payments::with_keypair(Keypair::new()).max(selected.asset, TokenAmount(5000));
        assert!(generous.assert_max_amount(&selected).is_ok());
    }

    #[test]
    fn test_select_requires_exact_scheme() {
        let payments = Sol402Payments::with_keypair(Keypair::new());
        let error = payments.select_payment_requirements(&[]).unwrap_err();
        assert!(matches!(
            error,
            Sol402PaymentsError::NoSuitablePaymentMethod { count: 0 }
        ));
    }

    #[tokio::test]
    async fn test_non_402_responses_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/free"))
            .respond_with(ResponseTemplate::new(200).set_body_string("free content"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ClientBuilder::new(reqwest::Client::new())
            .with(Sol402Payments::with_keypair(Keypair::new()))
            .build();
        let response = client
            .get(format!("{}/free", server.uri()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(decode_settlement(&response).is_none());
        assert_eq!(response.text().await.unwrap(), "free content");
    }

    #[tokio::test]
    async fn test_402_challenge_is_paid_and_retried_once() {
        let server = MockServer::start().await;
        let keypair = Keypair::new();
        let payer = SolanaAddress(keypair.pubkey());
        let pay_to = SolanaAddress(Pubkey::new_unique());
        let resource = format!("{}/paid", server.uri());

        let receipt = SettleResponse {
            success: true,
            error_reason: None,
            payer,
            transaction: Some(TransactionSignature([4u8; 64])),
            network: Network::SolanaDevnet,
        };
        let receipt_header =
            String::from_utf8(receipt.to_header_bytes().unwrap().as_ref().to_vec()).unwrap();

        // Paid retry: payment header present.
        Mock::given(method("GET"))
            .and(path("/paid"))
            .and(header_exists(PAYMENT_HEADER))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("paid content")
                    .insert_header(PAYMENT_RESPONSE_HEADER, receipt_header.as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;
        // Probe: no payment header yet.
        Mock::given(method("GET"))
            .and(path("/paid"))
            .respond_with(
                ResponseTemplate::new(402)
                    .set_body_json(challenge(vec![requirements(pay_to, &resource)])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ClientBuilder::new(reqwest::Client::new())
            .with(Sol402Payments::with_keypair(keypair))
            .build();
        let response = client.get(&resource).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let settlement = decode_settlement(&response).unwrap().unwrap();
        assert!(settlement.success);
        assert_eq!(settlement.transaction, Some(TransactionSignature([4u8; 64])));
        assert_eq!(response.text().await.unwrap(), "paid content");
    }

    #[tokio::test]
    async fn test_challenge_above_cap_is_a_terminal_error() {
        let server = MockServer::start().await;
        let pay_to = SolanaAddress(Pubkey::new_unique());
        let resource = format!("{}/pricey", server.uri());
        let requirement = requirements(pay_to, &resource);
        let mint = requirement.asset;
        Mock::given(method("GET"))
            .and(path("/pricey"))
            .respond_with(ResponseTemplate::new(402).set_body_json(challenge(vec![requirement])))
            .expect(1)
            .mount(&server)
            .await;

        let client = ClientBuilder::new(reqwest::Client::new())
            .with(Sol402Payments::with_keypair(Keypair::new()).max(mint, TokenAmount(10)))
            .build();
        let error = client.get(&resource).send().await.unwrap_err();
        assert!(error.to_string().contains("exceeds the configured maximum"));
    }

    #[tokio::test]
    async fn test_second_402_is_returned_not_looped() {
        let server = MockServer::start().await;
        let pay_to = SolanaAddress(Pubkey::new_unique());
        let resource = format!("{}/stubborn", server.uri());
        // The server rejects even the paid retry; the client must not loop.
        Mock::given(method("GET"))
            .and(path("/stubborn"))
            .respond_with(
                ResponseTemplate::new(402)
                    .set_body_json(challenge(vec![requirements(pay_to, &resource)])),
            )
            .expect(2)
            .mount(&server)
            .await;

        let client = ClientBuilder::new(reqwest::Client::new())
            .with(Sol402Payments::with_keypair(Keypair::new()))
            .build();
        let response = client.get(&resource).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }
}
