//! Solana signer and ledger access.
//!
//! [`SolanaProvider`] bundles the process-wide signing keypair with a
//! nonblocking RPC client. It is constructed once at startup and shared by
//! reference across concurrent requests; signing produces a signature
//! without mutating shared state, so no locking is involved.

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_hash::Hash;
use solana_keypair::Keypair;
use solana_message::{Message, VersionedMessage};
use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::network::Network;
use crate::types::{
    Ed25519Signature, ExactSolanaPayloadAuthorization, SolanaAddress, TransactionSignature,
};

const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Failures at the ledger boundary. Distinct from payment validity: an RPC
/// outage is never reported as an invalid payment.
#[derive(Debug, thiserror::Error)]
pub enum SolanaProviderError {
    #[error("ledger rpc error: {0}")]
    Rpc(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("transaction assembly failed: {0}")]
    Assembly(String),
}

/// Server-held signer plus RPC access for one Solana environment.
#[derive(Clone)]
pub struct SolanaProvider {
    keypair: Arc<Keypair>,
    network: Network,
    rpc_client: Arc<RpcClient>,
}

impl Debug for SolanaProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaProvider")
            .field("pubkey", &self.keypair.pubkey())
            .field("network", &self.network)
            .field("rpc_url", &self.rpc_client.url())
            .finish()
    }
}

impl SolanaProvider {
    pub fn new(keypair: Keypair, network: Network, rpc_url: String) -> Self {
        tracing::info!(
            network = %network,
            genesis = network.genesis_reference(),
            rpc = %rpc_url,
            signer = %keypair.pubkey(),
            "initialized Solana provider"
        );
        let rpc_client = RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed());
        Self {
            keypair: Arc::new(keypair),
            network,
            rpc_client: Arc::new(rpc_client),
        }
    }

    /// Address of the server-held signer; acts as fee payer at settlement.
    pub fn address(&self) -> SolanaAddress {
        SolanaAddress(self.keypair.pubkey())
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Current chain context. One round-trip to the ledger; also the
    /// liveness probe performed during verification.
    pub async fn latest_blockhash(&self) -> Result<Hash, SolanaProviderError> {
        self.rpc_client
            .get_latest_blockhash()
            .await
            .map_err(|e| SolanaProviderError::Rpc(e.to_string()))
    }

    /// Decimals of an SPL mint, read from the ledger.
    pub async fn mint_decimals(&self, mint: &SolanaAddress) -> Result<u8, SolanaProviderError> {
        let supply = self
            .rpc_client
            .get_token_supply(&mint.0)
            .await
            .map_err(|e| SolanaProviderError::Rpc(e.to_string()))?;
        Ok(supply.decimals)
    }

    /// Associated token account of `owner` for `mint`.
    pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(
            &[owner.as_ref(), spl_token::ID.as_ref(), mint.as_ref()],
            &ATA_PROGRAM_PUBKEY,
        )
        .0
    }

    /// Submit the transfer described by a verified authorization.
    ///
    /// The server keypair pays fees and signs the message; the authority
    /// slot carries the client's authorization signature. Returns as soon as
    /// the RPC node acknowledges the submission, without awaiting finality.
    pub async fn submit_authorized_transfer(
        &self,
        authorization: &ExactSolanaPayloadAuthorization,
        asset: &SolanaAddress,
        authority_signature: &Ed25519Signature,
    ) -> Result<TransactionSignature, SolanaProviderError> {
        let decimals = self.mint_decimals(asset).await?;
        let blockhash = self.latest_blockhash().await?;
        let transaction = build_transfer_transaction(
            &self.keypair,
            authorization,
            asset,
            decimals,
            blockhash,
            authority_signature,
        )?;
        let signature = self
            .rpc_client
            .send_transaction_with_config(
                &transaction,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await
            .map_err(|e| SolanaProviderError::Rpc(e.to_string()))?;
        tracing::info!(transaction = %signature, "submitted settlement transfer");
        Ok(TransactionSignature(*signature.as_array()))
    }
}

/// Assemble the settlement transaction for an authorization.
///
/// Fee payer is the server keypair. Signature slots are filled by position
/// among the required signers: the fee payer's from a fresh signature over
/// the message, the authority's from the client's authorization signature.
fn build_transfer_transaction(
    fee_payer: &Keypair,
    authorization: &ExactSolanaPayloadAuthorization,
    asset: &SolanaAddress,
    decimals: u8,
    blockhash: Hash,
    authority_signature: &Ed25519Signature,
) -> Result<VersionedTransaction, SolanaProviderError> {
    let from: Pubkey = authorization.from.into();
    let to: Pubkey = authorization.to.into();
    let mint: Pubkey = (*asset).into();
    let source = SolanaProvider::associated_token_address(&from, &mint);
    let destination = SolanaProvider::associated_token_address(&to, &mint);
    let instruction = spl_token::instruction::transfer_checked(
        &spl_token::ID,
        &source,
        &mint,
        &destination,
        &from,
        &[],
        authorization.value.0,
        decimals,
    )
    .map_err(|e| SolanaProviderError::Assembly(e.to_string()))?;

    let fee_payer_pubkey = fee_payer.pubkey();
    let message = VersionedMessage::Legacy(Message::new_with_blockhash(
        &[instruction],
        Some(&fee_payer_pubkey),
        &blockhash,
    ));
    let message_bytes = message.serialize();
    let fee_payer_signature = fee_payer
        .try_sign_message(&message_bytes)
        .map_err(|e| SolanaProviderError::Signing(e.to_string()))?;

    let num_required = message.header().num_required_signatures as usize;
    let static_keys = message.static_account_keys();
    let mut signatures = vec![Signature::default(); num_required];
    for (position, key) in static_keys[..num_required].iter().enumerate() {
        if *key == fee_payer_pubkey {
            signatures[position] = fee_payer_signature;
        } else if *key == from {
            signatures[position] = authority_signature.as_signature();
        }
    }
    if signatures.iter().any(|s| *s == Signature::default()) {
        return Err(SolanaProviderError::Assembly(
            "unfilled required signature slot".to_string(),
        ));
    }

    Ok(VersionedTransaction {
        signatures,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::UnixTimestamp;
    use crate::types::TokenAmount;

    fn test_authorization(from: Pubkey, to: Pubkey) -> ExactSolanaPayloadAuthorization {
        ExactSolanaPayloadAuthorization {
            from: from.into(),
            to: to.into(),
            value: TokenAmount(1000),
            valid_after: UnixTimestamp::from_secs(0),
            valid_before: UnixTimestamp::from_secs(300),
            nonce: "abc123def456ghi7".parse().unwrap(),
        }
    }

    #[test]
    fn test_associated_token_address_is_deterministic() {
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let first = SolanaProvider::associated_token_address(&owner, &mint);
        let second = SolanaProvider::associated_token_address(&owner, &mint);
        assert_eq!(first, second);
        let other = SolanaProvider::associated_token_address(&Pubkey::new_unique(), &mint);
        assert_ne!(first, other);
    }

    #[test]
    fn test_build_transfer_transaction_fills_both_signature_slots() {
        let fee_payer = Keypair::new();
        let payer = Keypair::new();
        let authorization = test_authorization(payer.pubkey(), Pubkey::new_unique());
        let asset = SolanaAddress(Pubkey::new_unique());
        let client_signature = Ed25519Signature([9u8; 64]);

        let transaction = build_transfer_transaction(
            &fee_payer,
            &authorization,
            &asset,
            6,
            Hash::new_from_array([7u8; 32]),
            &client_signature,
        )
        .unwrap();

        let num_required = transaction.message.header().num_required_signatures as usize;
        assert_eq!(num_required, 2);
        assert_eq!(transaction.signatures.len(), 2);

        let static_keys = transaction.message.static_account_keys();
        assert_eq!(static_keys[0], fee_payer.pubkey());
        assert_eq!(static_keys[1], payer.pubkey());

        // Fee payer slot carries a real signature over the message bytes.
        let message_bytes = transaction.message.serialize();
        assert!(
            transaction.signatures[0].verify(fee_payer.pubkey().as_ref(), &message_bytes)
        );
        // Authority slot carries the client's authorization signature verbatim.
        assert_eq!(
            transaction.signatures[1],
            client_signature.as_signature()
        );
    }

    #[test]
    fn test_build_transfer_transaction_rejects_fee_payer_as_authority() {
        let fee_payer = Keypair::new();
        let authorization = test_authorization(fee_payer.pubkey(), Pubkey::new_unique());
        let asset = SolanaAddress(Pubkey::new_unique());

        // With the fee payer also the transfer authority, only one signer
        // slot exists and the client signature has nowhere to go; assembly
        // still succeeds structurally, so the guard lives in the settler.
        let transaction = build_transfer_transaction(
            &fee_payer,
            &authorization,
            &asset,
            6,
            Hash::new_from_array([7u8; 32]),
            &Ed25519Signature([9u8; 64]),
        )
        .unwrap();
        assert_eq!(
            transaction.message.header().num_required_signatures as usize,
            1
        );
    }
}
