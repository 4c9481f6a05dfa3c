//! HTTP endpoints of the facilitator.
//!
//! Exposes the verifier and settler to collaborators that hold no signing
//! keys of their own: `GET /supported` lists payment kinds, `POST /verify`
//! and `POST /settle` run the protocol operations, and the matching `GET`
//! routes describe the expected request bodies. Routes are generic over the
//! [`Facilitator`] so tests run them against scripted implementations.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::facilitator::Facilitator;
use crate::types::{ErrorResponse, ValidationError, VerifyRequest};

/// Facilitator route table, to be nested under a path prefix by the caller.
pub fn routes<F>() -> Router<Arc<F>>
where
    F: Facilitator + Send + Sync + 'static,
{
    Router::new()
        .route("/supported", get(get_supported::<F>))
        .route("/verify", get(get_verify_info).post(post_verify::<F>))
        .route("/settle", get(get_settle_info).post(post_settle::<F>))
}

/// `GET /verify`: machine-readable description of the verify endpoint.
#[instrument(skip_all)]
async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/facilitator/verify",
        "description": "POST to verify payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: machine-readable description of the settle endpoint.
#[instrument(skip_all)]
async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/facilitator/settle",
        "description": "POST to settle payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /supported`: payment kinds this facilitator accepts, including the
/// fee payer a client should expect to cover network fees.
#[instrument(skip_all)]
async fn get_supported<F>(State(facilitator): State<Arc<F>>) -> Response
where
    F: Facilitator + Send + Sync + 'static,
{
    match facilitator.supported().await {
        Ok(kinds) => (StatusCode::OK, Json(kinds)).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "failed to list supported payment kinds");
            internal_error()
        }
    }
}

/// `POST /verify`: check a payment payload against requirements.
///
/// Structural failures return 400 with a field locator; a well-formed but
/// unacceptable payment returns 200 with `isValid: false` and a reason.
#[instrument(skip_all)]
async fn post_verify<F>(
    State(facilitator): State<Arc<F>>,
    Json(body): Json<serde_json::Value>,
) -> Response
where
    F: Facilitator + Send + Sync + 'static,
{
    let request = match parse_facilitator_request(body) {
        Ok(request) => request,
        Err(validation) => return validation_error(validation),
    };
    match facilitator.verify(&request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "verification failed");
            internal_error()
        }
    }
}

/// `POST /settle`: submit a verified payment on-ledger.
#[instrument(skip_all)]
async fn post_settle<F>(
    State(facilitator): State<Arc<F>>,
    Json(body): Json<serde_json::Value>,
) -> Response
where
    F: Facilitator + Send + Sync + 'static,
{
    let request = match parse_facilitator_request(body) {
        Ok(request) => request,
        Err(validation) => return validation_error(validation),
    };
    match facilitator.settle(&request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "settlement failed");
            internal_error()
        }
    }
}

/// Pull `paymentPayload` and `paymentRequirements` out of a request body,
/// reporting the failing field on error.
fn parse_facilitator_request(mut body: serde_json::Value) -> Result<VerifyRequest, ValidationError> {
    let payload_value = body
        .get_mut("paymentPayload")
        .map(serde_json::Value::take)
        .ok_or_else(|| ValidationError::missing("paymentPayload"))?;
    let payment_payload =
        serde_json::from_value(payload_value).map_err(|e| ValidationError::at("paymentPayload", e))?;
    let requirements_value = body
        .get_mut("paymentRequirements")
        .map(serde_json::Value::take)
        .ok_or_else(|| ValidationError::missing("paymentRequirements"))?;
    let payment_requirements = serde_json::from_value(requirements_value)
        .map_err(|e| ValidationError::at("paymentRequirements", e))?;
    Ok(VerifyRequest {
        payment_payload,
        payment_requirements,
    })
}

fn validation_error(validation: ValidationError) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "Validation Error",
            "details": [validation],
        })),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Internal Server Error".to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::timestamp::UnixTimestamp;
    use crate::types::{
        Ed25519Signature, ExactSolanaPayload, ExactSolanaPayloadAuthorization,
        FacilitatorErrorReason, PaymentPayload, PaymentRequirements, RequirementsExtra, Scheme,
        SettleRequest, SettleResponse, SolanaAddress, SupportedPaymentKind, TokenAmount,
        VerifyResponse, X402Version,
    };
    use axum::body::to_bytes;
    use axum::http::Request;
    use solana_pubkey::Pubkey;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct ScriptedFacilitator {
        verify: VerifyResponse,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("scripted failure")]
    struct ScriptedError;

    impl Facilitator for ScriptedFacilitator {
        type Error = ScriptedError;

        async fn verify(&self, _request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
            Ok(self.verify.clone())
        }

        async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
            Ok(SettleResponse {
                success: true,
                error_reason: None,
                payer: request.payment_payload.payload.authorization.from,
                transaction: None,
                network: request.payment_payload.network,
            })
        }

        async fn supported(&self) -> Result<Vec<SupportedPaymentKind>, Self::Error> {
            Ok(vec![SupportedPaymentKind {
                x402_version: X402Version::V1,
                scheme: Scheme::Exact,
                network: Network::SolanaDevnet,
                extra: Some(RequirementsExtra {
                    fee_payer: Some(SolanaAddress(Pubkey::new_unique())),
                }),
            }])
        }
    }

    fn app(verify: VerifyResponse) -> Router {
        routes::<ScriptedFacilitator>().with_state(Arc::new(ScriptedFacilitator { verify }))
    }

    fn wire_request() -> serde_json::Value {
        let pay_to = SolanaAddress(Pubkey::new_unique());
        let asset = SolanaAddress(Pubkey::new_unique());
        let payload = PaymentPayload {
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            network: Network::SolanaDevnet,
            payload: ExactSolanaPayload {
                signature: Ed25519Signature([5u8; 64]),
                authorization: ExactSolanaPayloadAuthorization {
                    from: SolanaAddress(Pubkey::new_unique()),
                    to: pay_to,
                    value: TokenAmount(1000),
                    valid_after: UnixTimestamp::from_secs(0),
                    valid_before: UnixTimestamp::from_secs(300),
                    nonce: "abc123def456ghi7".parse().unwrap(),
                },
            },
        };
        let requirements = PaymentRequirements {
            scheme: Scheme::Exact,
            network: Network::SolanaDevnet,
            max_amount_required: TokenAmount(1000),
            resource: "http://localhost:3022/api/data".parse().unwrap(),
            description: String::new(),
            mime_type: "application/json".to_string(),
            pay_to,
            max_timeout_seconds: 60,
            asset,
            extra: None,
        };
        json!({
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        })
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_get_supported_lists_kinds() {
        let payer = SolanaAddress(Pubkey::new_unique());
        let response = app(VerifyResponse::valid(payer))
            .oneshot(
                Request::builder()
                    .uri("/supported")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body[0]["scheme"], "exact");
        assert_eq!(body[0]["network"], "solana-devnet");
        assert!(body[0]["extra"]["feePayer"].is_string());
    }

    #[tokio::test]
    async fn test_post_verify_valid() {
        let payer = SolanaAddress(Pubkey::new_unique());
        let response = app(VerifyResponse::valid(payer))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/verify")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(wire_request().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["isValid"], true);
        assert_eq!(body["payer"], payer.to_string());
    }

    #[tokio::test]
    async fn test_post_verify_invalid_reason_is_reported() {
        let payer = SolanaAddress(Pubkey::new_unique());
        let response = app(VerifyResponse::invalid(
            payer,
            FacilitatorErrorReason::Expired,
        ))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/verify")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(wire_request().to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["isValid"], false);
        assert_eq!(body["invalidReason"], "expired");
    }

    #[tokio::test]
    async fn test_post_verify_missing_payload_is_400_with_path() {
        let payer = SolanaAddress(Pubkey::new_unique());
        let mut body = wire_request();
        body.as_object_mut().unwrap().remove("paymentPayload");
        let response = app(VerifyResponse::valid(payer))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/verify")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Validation Error");
        assert_eq!(body["details"][0]["path"], "paymentPayload");
    }

    #[tokio::test]
    async fn test_post_settle_returns_settlement() {
        let payer = SolanaAddress(Pubkey::new_unique());
        let response = app(VerifyResponse::valid(payer))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/settle")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(wire_request().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_get_verify_info_describes_body() {
        let payer = SolanaAddress(Pubkey::new_unique());
        let response = app(VerifyResponse::valid(payer))
            .oneshot(
                Request::builder()
                    .uri("/verify")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["body"]["paymentPayload"], "PaymentPayload");
    }
}
