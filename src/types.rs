//! Wire types for the pay-per-request protocol.
//!
//! The key objects are [`PaymentRequirements`] (what a gated endpoint
//! charges), [`PaymentPayload`] (the client's signed authorization to pay),
//! and [`VerifyResponse`]/[`SettleResponse`] (the facilitator's answers).
//! Parsing is strict: a missing field, a wrong type, or an amount that is
//! not a non-negative integer string fails decoding with a field locator.
//! Amounts and timestamps travel as decimal strings end-to-end so values
//! never pass through floating point.

use once_cell::sync::Lazy;
use rand::Rng;
use rand::distr::Alphanumeric;
use regex::Regex;
use rust_decimal::Decimal;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use solana_pubkey::Pubkey;
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use url::Url;

use crate::network::Network;
use crate::timestamp::UnixTimestamp;
use crate::util::Base64Bytes;

/// Protocol version. Only version 1 exists on this wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum X402Version {
    V1,
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            X402Version::V1 => serializer.serialize_u8(1),
        }
    }
}

impl Display for X402Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            X402Version::V1 => write!(f, "1"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported x402Version: {0}")]
pub struct X402VersionError(pub u8);

impl TryFrom<u8> for X402Version {
    type Error = X402VersionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(X402Version::V1),
            other => Err(X402VersionError(other)),
        }
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        X402Version::try_from(num).map_err(serde::de::Error::custom)
    }
}

/// Payment scheme identifier. Only `"exact"` (fixed-amount transfer) exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// A Solana account address, serialized as its base58 string.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SolanaAddress(pub Pubkey);

impl Display for SolanaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid base58 address")]
pub struct AddressParseError;

impl FromStr for SolanaAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pubkey = Pubkey::from_str(s).map_err(|_| AddressParseError)?;
        Ok(Self(pubkey))
    }
}

impl From<Pubkey> for SolanaAddress {
    fn from(pubkey: Pubkey) -> Self {
        Self(pubkey)
    }
}

impl From<SolanaAddress> for Pubkey {
    fn from(address: SolanaAddress) -> Self {
        address.0
    }
}

impl Serialize for SolanaAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for SolanaAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Token amount in the mint's minimal unit.
///
/// Always a stringified integer on the wire (`"1000"`), never a JSON number,
/// so amounts survive JSON round-trips without precision loss.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub u64);

#[derive(Debug, thiserror::Error)]
pub enum TokenAmountParseError {
    #[error("amount must be a non-negative integer string")]
    NotAnInteger,
    #[error("amount exceeds the representable range")]
    Overflow,
}

impl FromStr for TokenAmount {
    type Err = TokenAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TokenAmountParseError::NotAnInteger);
        }
        let value = s
            .parse::<u64>()
            .map_err(|_| TokenAmountParseError::Overflow)?;
        Ok(TokenAmount(value))
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(value)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 64-byte Ed25519 signature, serialized as a base58 string.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Ed25519Signature(pub [u8; 64]);

impl Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Signature({})", bs58::encode(self.0).into_string())
    }
}

impl Display for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl From<solana_signature::Signature> for Ed25519Signature {
    fn from(signature: solana_signature::Signature) -> Self {
        Ed25519Signature(*signature.as_array())
    }
}

impl Ed25519Signature {
    pub fn as_signature(&self) -> solana_signature::Signature {
        solana_signature::Signature::from(self.0)
    }
}

impl Serialize for Ed25519Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&bs58::encode(self.0).into_string())
    }
}

impl<'de> Deserialize<'de> for Ed25519Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = bs58::decode(&s)
            .into_vec()
            .map_err(|_| serde::de::Error::custom("invalid base58 in signature"))?;
        let array: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be exactly 64 bytes"))?;
        Ok(Ed25519Signature(array))
    }
}

/// A 64-byte Solana transaction signature, base58 on the wire.
///
/// Returned from settlement as the reference for later status lookup.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct TransactionSignature(pub [u8; 64]);

impl Debug for TransactionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransactionSignature({})",
            bs58::encode(self.0).into_string()
        )
    }
}

impl Display for TransactionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl Serialize for TransactionSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&bs58::encode(self.0).into_string())
    }
}

impl<'de> Deserialize<'de> for TransactionSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = bs58::decode(&s)
            .into_vec()
            .map_err(|_| serde::de::Error::custom("invalid base58 in transaction signature"))?;
        let array: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("transaction signature must be 64 bytes"))?;
        Ok(TransactionSignature(array))
    }
}

static NONCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{8,64}$").expect("invalid nonce regex"));

/// Client-chosen opaque token making each authorization unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNonce(String);

#[derive(Debug, thiserror::Error)]
#[error("nonce must be 8-64 characters of [A-Za-z0-9_-]")]
pub struct PaymentNonceError;

impl PaymentNonce {
    /// A fresh 16-character alphanumeric nonce.
    pub fn random() -> Self {
        let value: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        PaymentNonce(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PaymentNonce {
    type Err = PaymentNonceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if NONCE_REGEX.is_match(s) {
            Ok(PaymentNonce(s.to_string()))
        } else {
            Err(PaymentNonceError)
        }
    }
}

impl Display for PaymentNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for PaymentNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PaymentNonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Time-bounded authorization to transfer `value` from `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactSolanaPayloadAuthorization {
    pub from: SolanaAddress,
    pub to: SolanaAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: PaymentNonce,
}

/// Canonical preimage the payer signs.
///
/// Besides the authorization fields it binds the scheme, network, and mint,
/// so an authorization signed against one requirement cannot satisfy a
/// requirement for a different asset or environment.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferMessage<'a> {
    scheme: Scheme,
    network: Network,
    asset: &'a SolanaAddress,
    from: &'a SolanaAddress,
    to: &'a SolanaAddress,
    value: TokenAmount,
    valid_after: UnixTimestamp,
    valid_before: UnixTimestamp,
    nonce: &'a PaymentNonce,
}

impl ExactSolanaPayloadAuthorization {
    /// Bytes signed by `from`: canonical JSON of the transfer derived from
    /// this authorization in the context of `network` and `asset`.
    pub fn transfer_message(&self, network: Network, asset: &SolanaAddress) -> Vec<u8> {
        let message = TransferMessage {
            scheme: Scheme::Exact,
            network,
            asset,
            from: &self.from,
            to: &self.to,
            value: self.value,
            valid_after: self.valid_after,
            valid_before: self.valid_before,
            nonce: &self.nonce,
        };
        serde_json::to_vec(&message).expect("transfer message serialization is infallible")
    }
}

/// Signature plus the authorization it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactSolanaPayload {
    pub signature: Ed25519Signature,
    pub authorization: ExactSolanaPayloadAuthorization,
}

/// A signed request to transfer a specific amount on-chain, as presented in
/// the payment header of a retried request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: ExactSolanaPayload,
}

/// Error decoding a payment header into a [`PaymentPayload`].
#[derive(Debug, thiserror::Error)]
pub enum PaymentHeaderDecodingError {
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PaymentPayload {
    /// Decode a payment header value.
    ///
    /// Accepts both encodings seen in the wild: base64-encoded JSON and the
    /// legacy raw JSON text (sniffed by a leading `{`).
    pub fn from_header_bytes(bytes: &[u8]) -> Result<Self, PaymentHeaderDecodingError> {
        let trimmed = bytes.trim_ascii_start();
        if trimmed.first() == Some(&b'{') {
            return serde_json::from_slice(trimmed).map_err(PaymentHeaderDecodingError::from);
        }
        let decoded = Base64Bytes::from(trimmed).decode()?;
        serde_json::from_slice(&decoded).map_err(PaymentHeaderDecodingError::from)
    }

    /// Encode into base64 JSON suitable for an `X-Payment` header.
    pub fn to_header_bytes(&self) -> Result<Base64Bytes<'static>, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(Base64Bytes::encode(json))
    }
}

/// Typed `extra` metadata attached to requirements and supported kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementsExtra {
    /// Address covering network fees for the settlement transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_payer: Option<SolanaAddress>,
}

/// What a payment-gated endpoint accepts, issued fresh per rejected request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    pub max_amount_required: TokenAmount,
    /// Fully-qualified URL of the protected resource.
    pub resource: Url,
    pub description: String,
    pub mime_type: String,
    pub pay_to: SolanaAddress,
    pub max_timeout_seconds: u64,
    /// SPL mint of the asset to transfer.
    pub asset: SolanaAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<RequirementsExtra>,
}

/// Body of `POST /facilitator/verify` and `POST /facilitator/settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// Settlement takes the same wire shape as verification.
pub type SettleRequest = VerifyRequest;

/// Machine-readable reason a payment was rejected or a settlement failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum FacilitatorErrorReason {
    #[error("invalid_scheme")]
    InvalidScheme,
    #[error("invalid_network")]
    InvalidNetwork,
    #[error("invalid_receiver")]
    InvalidReceiver,
    #[error("insufficient_amount")]
    InsufficientAmount,
    #[error("expired")]
    Expired,
    #[error("not_yet_valid")]
    NotYetValid,
    #[error("invalid_signature")]
    InvalidSignature,
    #[error("unexpected_settle_error")]
    UnexpectedSettleError,
}

/// Verifier's answer: valid, or invalid with a reason.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyResponse {
    Valid {
        payer: SolanaAddress,
    },
    Invalid {
        reason: FacilitatorErrorReason,
        payer: SolanaAddress,
    },
}

impl VerifyResponse {
    pub fn valid(payer: SolanaAddress) -> Self {
        VerifyResponse::Valid { payer }
    }

    pub fn invalid(payer: SolanaAddress, reason: FacilitatorErrorReason) -> Self {
        VerifyResponse::Invalid { reason, payer }
    }
}

impl Serialize for VerifyResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            VerifyResponse::Valid { payer } => {
                let mut s = serializer.serialize_struct("VerifyResponse", 2)?;
                s.serialize_field("isValid", &true)?;
                s.serialize_field("payer", payer)?;
                s.end()
            }
            VerifyResponse::Invalid { reason, payer } => {
                let mut s = serializer.serialize_struct("VerifyResponse", 3)?;
                s.serialize_field("isValid", &false)?;
                s.serialize_field("invalidReason", reason)?;
                s.serialize_field("payer", payer)?;
                s.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            is_valid: bool,
            payer: SolanaAddress,
            #[serde(default)]
            invalid_reason: Option<FacilitatorErrorReason>,
        }

        let raw = Raw::deserialize(deserializer)?;
        match (raw.is_valid, raw.invalid_reason) {
            (true, None) => Ok(VerifyResponse::Valid { payer: raw.payer }),
            (false, Some(reason)) => Ok(VerifyResponse::Invalid {
                payer: raw.payer,
                reason,
            }),
            (true, Some(_)) => Err(serde::de::Error::custom(
                "`invalidReason` must be absent when `isValid` is true",
            )),
            (false, None) => Err(serde::de::Error::custom(
                "`invalidReason` must be present when `isValid` is false",
            )),
        }
    }
}

/// Result of attempting to settle a verified payment on the ledger.
///
/// Owned by the settlement call; the challenge middleware attaches it to the
/// request context for the lifetime of that single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<FacilitatorErrorReason>,
    pub payer: SolanaAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionSignature>,
    pub network: Network,
}

/// Error decoding a settlement receipt header into a [`SettleResponse`].
#[derive(Debug, thiserror::Error)]
pub enum SettleResponseHeaderError {
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SettleResponse {
    /// Encode into base64 JSON for the `X-Payment-Response` header.
    pub fn to_header_bytes(&self) -> Result<Base64Bytes<'static>, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(Base64Bytes::encode(json))
    }

    /// Decode a settlement receipt header back into a [`SettleResponse`].
    pub fn from_header_bytes(bytes: &[u8]) -> Result<Self, SettleResponseHeaderError> {
        let decoded = Base64Bytes::from(bytes).decode()?;
        serde_json::from_slice(&decoded).map_err(SettleResponseHeaderError::from)
    }
}

/// Body of an HTTP 402 response: the challenge a client answers by paying.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredResponse {
    pub x402_version: X402Version,
    pub error: String,
    pub accepts: Vec<PaymentRequirements>,
    /// Human-facing price, e.g. `"0.1"`. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<MoneyAmount>,
}

/// One `{network, scheme, extra}` tuple from `GET /facilitator/supported`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<RequirementsExtra>,
}

/// Minimal error body for unexpected or fatal server errors.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

/// A structural decoding failure, reported with a field locator so clients
/// see which part of the request was malformed.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{path}: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn missing(path: &str) -> Self {
        Self {
            path: path.to_string(),
            message: "missing field".to_string(),
        }
    }

    pub fn at(path: &str, error: serde_json::Error) -> Self {
        Self {
            path: path.to_string(),
            message: error.to_string(),
        }
    }
}

static MONEY_CLEAN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\d\.\-]+").expect("invalid money cleaning regex"));

/// A human-readable price like `"$0.10"` or `"1,000"`.
///
/// Used only for the informational `amount` field of a 402 body and for
/// price configuration; protocol amounts stay in [`TokenAmount`].
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(pub Decimal);

#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("invalid number format")]
    InvalidFormat,
    #[error("negative value is not allowed")]
    Negative,
    #[error("too big of a precision: {money} vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
    #[error("amount does not fit the token's minimal unit range")]
    OutOfRange,
}

impl MoneyAmount {
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let cleaned = MONEY_CLEAN_REGEX.replace_all(input, "");
        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;
        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }
        Ok(MoneyAmount(parsed))
    }

    /// Digits after the decimal point in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Absolute mantissa, e.g. `1234` for `12.34`.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    /// Scale into a [`TokenAmount`] for a mint with `token_decimals` decimals:
    /// `0.01` against a 6-decimal mint becomes `10000`.
    pub fn as_token_amount(&self, token_decimals: u32) -> Result<TokenAmount, MoneyAmountParseError> {
        let money_decimals = self.scale();
        if money_decimals > token_decimals {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: money_decimals,
                token: token_decimals,
            });
        }
        let multiplier = 10u128
            .checked_pow(token_decimals - money_decimals)
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        let value = self
            .mantissa()
            .checked_mul(multiplier)
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        let value: u64 = value
            .try_into()
            .map_err(|_| MoneyAmountParseError::OutOfRange)?;
        Ok(TokenAmount(value))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Serialize for MoneyAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MoneyAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
