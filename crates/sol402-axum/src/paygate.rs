//! Per-request payment gate.
//!
//! [`Paygate`] drives one request through the challenge state machine:
//!
//! - no payment header → 402 challenge with the accepted requirements,
//! - undecodable header → 400, without touching the signer or the ledger,
//! - header present → verify with the facilitator; rejection → 402 with a
//!   reason distinguishable from the bare challenge,
//! - verified → optional settlement; settlement failure is non-fatal and is
//!   recorded in the request extensions for downstream policy,
//! - finally the request is forwarded to the wrapped service.
//!
//! Settlement is only reachable through the [`VerifiedPayment`] witness the
//! verify step produces.

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode, Uri};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower::ServiceExt;
use tower::util::BoxCloneSyncService;
use url::Url;

use sol402::facilitator::Facilitator;
use sol402::network::Network;
use sol402::types::{
    MoneyAmount, MoneyAmountParseError, PaymentHeaderDecodingError, PaymentPayload,
    PaymentRequiredResponse, PaymentRequirements, RequirementsExtra, Scheme, SettleResponse,
    SolanaAddress, TokenAmount, VerifyRequest, VerifyResponse, X402Version,
};

/// Payment header carrying the payload on a retried request.
pub const PAYMENT_HEADER: &str = "X-Payment";
/// Legacy payment header name, accepted for older clients.
pub const LEGACY_PAYMENT_HEADER: &str = "X402-Payment";
/// Response header mirroring the issued requirement on a 402.
pub const PAYMENT_REQUIRED_HEADER: &str = "X-Payment-Required";
/// Response header carrying the settlement receipt on a paid response.
pub const PAYMENT_RESPONSE_HEADER: &str = "X-Payment-Response";

/// One accepted way to pay for a protected route.
#[derive(Debug, Clone)]
pub struct PriceTag {
    pub network: Network,
    /// SPL mint of the asset to transfer.
    pub asset: SolanaAddress,
    /// Required amount in the mint's minimal unit.
    pub amount: TokenAmount,
    /// Recipient. When unset, falls back to the facilitator's fee payer.
    pub pay_to: Option<SolanaAddress>,
    pub max_timeout_seconds: u64,
    /// Human-facing price shown in the 402 body, e.g. `"0.1"`.
    pub display_amount: Option<MoneyAmount>,
}

impl PriceTag {
    pub fn new(network: Network, asset: SolanaAddress, amount: TokenAmount) -> Self {
        Self {
            network,
            asset,
            amount,
            pay_to: None,
            max_timeout_seconds: 60,
            display_amount: None,
        }
    }

    /// Price a route in human units for a mint with `decimals` decimals:
    /// `"0.01"` against a 6-decimal mint charges `10000` minimal units.
    pub fn with_money(
        network: Network,
        asset: SolanaAddress,
        money: MoneyAmount,
        decimals: u32,
    ) -> Result<Self, MoneyAmountParseError> {
        let amount = money.as_token_amount(decimals)?;
        Ok(Self {
            display_amount: Some(money),
            ..Self::new(network, asset, amount)
        })
    }

    pub fn pay_to(mut self, address: SolanaAddress) -> Self {
        self.pay_to = Some(address);
        self
    }

    pub fn max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    pub fn display_amount(mut self, amount: MoneyAmount) -> Self {
        self.display_amount = Some(amount);
        self
    }
}

/// Resource metadata, resolved per request.
#[derive(Debug, Clone)]
pub struct ResourceInfoBuilder {
    pub description: String,
    pub mime_type: String,
    pub url: Option<Url>,
}

impl Default for ResourceInfoBuilder {
    fn default() -> Self {
        Self {
            description: String::new(),
            mime_type: "application/json".to_string(),
            url: None,
        }
    }
}

impl ResourceInfoBuilder {
    /// The resource URL is either the explicitly configured one, or the
    /// base URL combined with the request's path and query.
    pub fn resolve(&self, base_url: Option<&Url>, request_uri: &Uri) -> ResourceInfo {
        let url = match &self.url {
            Some(url) => url.clone(),
            None => {
                let mut url = base_url
                    .cloned()
                    .unwrap_or_else(|| Url::parse("http://localhost/").expect("static URL"));
                url.set_path(request_uri.path());
                url.set_query(request_uri.query());
                url
            }
        };
        ResourceInfo {
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            url,
        }
    }
}

/// Fully-resolved resource metadata for one request.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub description: String,
    pub mime_type: String,
    pub url: Url,
}

/// Outcome of the settlement attempt, attached to the request extensions so
/// downstream handlers can react (retry asynchronously, refuse a high-value
/// action) without the request itself failing.
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Settled(SettleResponse),
    Failed(String),
}

/// Witness that a payload passed verification for its requirement.
/// Settlement takes the witness, so it cannot run on an unverified payload.
pub struct VerifiedPayment {
    pub payer: SolanaAddress,
    request: VerifyRequest,
}

impl VerifiedPayment {
    pub async fn settle<F: Facilitator>(
        &self,
        facilitator: &F,
    ) -> Result<SettleResponse, F::Error> {
        facilitator.settle(&self.request).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaygateConfigError {
    #[error("no payment recipient: set pay_to or use a facilitator with a fee payer")]
    NoRecipient,
}

/// The state machine for a single gated request.
pub struct Paygate<F> {
    pub facilitator: F,
    pub accepts: Arc<Vec<PriceTag>>,
    pub resource: ResourceInfo,
    pub settle: bool,
}

impl<F> Paygate<F>
where
    F: Facilitator,
{
    /// Payment requirements this gate would accept for the resolved
    /// resource. Fails when a tag has no recipient and the facilitator
    /// advertises no fee payer, which is operator misconfiguration.
    async fn requirements(&self) -> Result<Vec<PaymentRequirements>, PaygateConfigError> {
        let kinds = self.facilitator.supported().await.unwrap_or_default();
        self.accepts
            .iter()
            .map(|tag| {
                let fee_payer = kinds
                    .iter()
                    .find(|kind| kind.network == tag.network)
                    .and_then(|kind| kind.extra.as_ref())
                    .and_then(|extra| extra.fee_payer);
                let pay_to = tag
                    .pay_to
                    .or(fee_payer)
                    .ok_or(PaygateConfigError::NoRecipient)?;
                Ok(PaymentRequirements {
                    scheme: Scheme::Exact,
                    network: tag.network,
                    max_amount_required: tag.amount,
                    resource: self.resource.url.clone(),
                    description: self.resource.description.clone(),
                    mime_type: self.resource.mime_type.clone(),
                    pay_to,
                    max_timeout_seconds: tag.max_timeout_seconds,
                    asset: tag.asset,
                    extra: Some(RequirementsExtra { fee_payer }),
                })
            })
            .collect()
    }

    /// Run one request through the gate.
    pub async fn handle_request(
        self,
        inner: BoxCloneSyncService<Request, Response, Infallible>,
        mut req: Request,
    ) -> Response {
        let display_amount = self
            .accepts
            .first()
            .and_then(|tag| tag.display_amount.clone());

        // Decode the header before touching the facilitator: a malformed
        // payload is answered without any signer or ledger interaction.
        let payload = match extract_payment_header(req.headers()) {
            None => None,
            Some(header_bytes) => match PaymentPayload::from_header_bytes(&header_bytes) {
                Ok(payload) => Some(payload),
                Err(error) => {
                    tracing::debug!(error = %error, "malformed payment header");
                    return invalid_payload_response(&error);
                }
            },
        };

        let requirements = match self.requirements().await {
            Ok(requirements) => requirements,
            Err(error) => {
                tracing::error!(error = %error, "payment gate misconfigured");
                return config_error_response();
            }
        };

        let Some(payload) = payload else {
            tracing::debug!(resource = %self.resource.url, "no payment header, issuing challenge");
            return payment_required_response("Payment required", &requirements, display_amount);
        };

        let Some(selected) = requirements
            .iter()
            .find(|r| r.scheme == payload.scheme && r.network == payload.network)
        else {
            return payment_required_response(
                "Invalid payment: no matching payment requirements",
                &requirements,
                display_amount,
            );
        };

        let request = VerifyRequest {
            payment_payload: payload,
            payment_requirements: selected.clone(),
        };
        let verified = match self.facilitator.verify(&request).await {
            Ok(VerifyResponse::Valid { payer }) => VerifiedPayment { payer, request },
            Ok(VerifyResponse::Invalid { reason, .. }) => {
                tracing::info!(reason = %reason, "payment rejected");
                return payment_required_response(
                    &format!("Invalid payment: {reason}"),
                    &requirements,
                    display_amount,
                );
            }
            Err(error) => {
                tracing::error!(error = %error, "payment verification failed");
                return server_error_response();
            }
        };
        tracing::debug!(payer = %verified.payer, "payment verified");

        let mut receipt = None;
        if self.settle {
            match verified.settle(&self.facilitator).await {
                Ok(settlement) if settlement.success => {
                    match settlement_to_header(&settlement) {
                        Ok(value) => receipt = Some(value),
                        Err(error) => {
                            tracing::warn!(error = %error, "failed to encode settlement receipt")
                        }
                    }
                    req.extensions_mut()
                        .insert(SettlementOutcome::Settled(settlement));
                }
                Ok(settlement) => {
                    let reason = settlement
                        .error_reason
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    tracing::warn!(reason = %reason, "settlement failed, forwarding anyway");
                    req.extensions_mut().insert(SettlementOutcome::Failed(reason));
                }
                Err(error) => {
                    tracing::warn!(error = %error, "settlement failed, forwarding anyway");
                    req.extensions_mut()
                        .insert(SettlementOutcome::Failed(error.to_string()));
                }
            }
        }
        req.extensions_mut()
            .insert(verified.request.payment_payload.clone());

        let mut response = match inner.oneshot(req).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        };
        if let Some(value) = receipt {
            response.headers_mut().insert(PAYMENT_RESPONSE_HEADER, value);
        }
        response
    }
}

/// Payment header bytes, from the current or the legacy header name.
fn extract_payment_header(headers: &HeaderMap) -> Option<Vec<u8>> {
    headers
        .get(PAYMENT_HEADER)
        .or_else(|| headers.get(LEGACY_PAYMENT_HEADER))
        .map(|value| value.as_bytes().to_vec())
}

fn payment_required_response(
    error: &str,
    accepts: &[PaymentRequirements],
    amount: Option<MoneyAmount>,
) -> Response {
    let body = PaymentRequiredResponse {
        x402_version: X402Version::V1,
        error: error.to_string(),
        accepts: accepts.to_vec(),
        amount,
    };
    let bytes = serde_json::to_vec(&body).expect("402 body serialization is infallible");
    let mut builder = Response::builder()
        .status(StatusCode::PAYMENT_REQUIRED)
        .header(CONTENT_TYPE, "application/json");
    if let Some(first) = accepts.first()
        && let Ok(json) = serde_json::to_string(first)
        && let Ok(value) = HeaderValue::from_str(&json)
    {
        builder = builder.header(PAYMENT_REQUIRED_HEADER, value);
    }
    builder
        .body(Body::from(bytes))
        .expect("failed to construct 402 response")
}

fn invalid_payload_response(error: &PaymentHeaderDecodingError) -> Response {
    let body = json!({
        "error": "Invalid payment payload format",
        "details": [{ "path": "paymentPayload", "message": error.to_string() }],
    });
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("failed to construct 400 response")
}

fn server_error_response() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "error": "Payment verification failed" }).to_string(),
        ))
        .expect("failed to construct 500 response")
}

fn config_error_response() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "error": "Server configuration error" }).to_string(),
        ))
        .expect("failed to construct 500 response")
}

fn settlement_to_header(settlement: &SettleResponse) -> Result<HeaderValue, String> {
    let encoded = settlement
        .to_header_bytes()
        .map_err(|e| e.to_string())?;
    HeaderValue::from_bytes(encoded.as_ref()).map_err(|e| e.to_string())
}
