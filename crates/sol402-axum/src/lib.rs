//! Axum middleware for enforcing sol402 payments on protected routes.
//!
//! Wraps a route in the payment challenge state machine: unpaid requests
//! receive a `402 Payment Required` challenge, requests carrying a valid
//! signed payment authorization are verified (and optionally settled)
//! through a [`Facilitator`](sol402::facilitator::Facilitator), then
//! forwarded to the handler.
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use solana_keypair::Keypair;
//! use sol402::facilitator_local::FacilitatorLocal;
//! use sol402::network::Network;
//! use sol402::solana::SolanaProvider;
//! use sol402::types::TokenAmount;
//! use sol402_axum::{PriceTag, Sol402Middleware};
//!
//! let provider = SolanaProvider::new(
//!     Keypair::new(),
//!     Network::SolanaDevnet,
//!     "https://api.devnet.solana.com".to_string(),
//! );
//! let sol402 = Sol402Middleware::new(FacilitatorLocal::new(provider));
//!
//! let app: Router = Router::new().route(
//!     "/solana/get-balance",
//!     get(my_handler).layer(
//!         sol402
//!             .with_price_tag(PriceTag::new(
//!                 Network::SolanaDevnet,
//!                 "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU".parse().unwrap(),
//!                 TokenAmount(1000),
//!             ))
//!             .with_description("Balance lookup".to_string()),
//!     ),
//! );
//!
//! async fn my_handler() -> &'static str {
//!     "paid content"
//! }
//! ```
//!
//! Settlement failure after successful verification does not fail the
//! request: the handler still runs, with the
//! [`SettlementOutcome`](paygate::SettlementOutcome) recorded in the
//! request extensions for downstream policy.

pub mod layer;
pub mod paygate;

pub use layer::{Sol402LayerBuilder, Sol402Middleware, Sol402MiddlewareService};
pub use paygate::{
    LEGACY_PAYMENT_HEADER, PAYMENT_HEADER, PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER,
    PriceTag, ResourceInfoBuilder, SettlementOutcome, VerifiedPayment,
};
