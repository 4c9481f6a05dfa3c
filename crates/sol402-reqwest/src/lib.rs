//! Transparent sol402 payments for `reqwest`.
//!
//! Attach [`Sol402Payments`] to a `reqwest_middleware` client and 402
//! challenges are answered automatically: the middleware parses the
//! challenge, signs a payment authorization with the local keypair, and
//! retries the request exactly once with the `X-Payment` header attached.
//! Responses other than 402 are returned unchanged.
//!
//! ```no_run
//! use reqwest_middleware::ClientBuilder;
//! use solana_keypair::Keypair;
//! use sol402::types::TokenAmount;
//! use sol402_reqwest::{Sol402Payments, decode_settlement};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let keypair = Keypair::new();
//! let mint = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU".parse()?;
//! let client = ClientBuilder::new(reqwest::Client::new())
//!     .with(Sol402Payments::with_keypair(keypair).max(mint, TokenAmount(10_000)))
//!     .build();
//!
//! let response = client
//!     .get("http://localhost:3022/solana/get-balance")
//!     .send()
//!     .await?;
//! if let Some(receipt) = decode_settlement(&response) {
//!     println!("settled: {:?}", receipt?.transaction);
//! }
//! # Ok(())
//! # }
//! ```

pub mod middleware;

pub use middleware::{
    PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER, Sol402Payments, Sol402PaymentsError,
    decode_settlement,
};
