//! Pay-per-request payments over HTTP 402, settled on Solana.
//!
//! A gated server answers an unpaid request with a structured payment
//! challenge instead of content; the client answers the challenge with a
//! signed payment authorization; the server verifies and optionally settles
//! that authorization against the ledger before serving the request.
//!
//! # Roles
//!
//! - **Facilitator**: verifies and settles payments on-ledger. The
//!   [`facilitator::Facilitator`] trait defines the interface,
//!   [`facilitator_local::FacilitatorLocal`] implements it against a
//!   [`solana::SolanaProvider`], and [`handlers`] expose it over HTTP for
//!   collaborators without signing keys.
//! - **Seller**: a payment-gated service. The `sol402-axum` crate wraps
//!   routes in the challenge middleware built on these types.
//! - **Buyer**: a client that answers challenges. The `sol402-reqwest`
//!   crate signs and retries automatically.
//!
//! # Modules
//!
//! - [`types`] — wire types: payment requirements, payloads, verification
//!   and settlement results, with strict validation.
//! - [`network`] — supported Solana environments.
//! - [`facilitator`] / [`facilitator_local`] — the verify/settle engine.
//! - [`handlers`] — facilitator HTTP endpoints.
//! - [`solana`] — signer capability and ledger RPC access.
//! - [`config`] — environment-driven server configuration.
//! - [`timestamp`] / [`util`] — shared primitives.

pub mod config;
pub mod facilitator;
pub mod facilitator_local;
pub mod handlers;
pub mod network;
pub mod solana;
pub mod telemetry;
pub mod timestamp;
pub mod types;
pub mod util;
