//! Environment-driven configuration for the facilitator server.
//!
//! Every value can come from a CLI flag or an environment variable; `.env`
//! files are loaded by the binary before parsing. The signing key is
//! validated here so a misconfigured deployment fails at startup rather
//! than on the first paid request.

use clap::Parser;
use solana_keypair::Keypair;
use std::fmt::{Debug, Formatter};
use std::net::IpAddr;
use std::str::FromStr;
use url::Url;

use crate::network::Network;
use crate::solana::SolanaProvider;
use crate::types::SolanaAddress;

/// Server configuration, resolved from CLI flags and environment variables.
#[derive(Parser, Debug, Clone)]
#[command(name = "sol402", about = "sol402 facilitator HTTP server")]
pub struct Config {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind.
    #[arg(long, env = "PORT", default_value_t = 3022)]
    pub port: u16,

    /// Server signing key: a JSON byte array or a base58 string.
    #[arg(long, env = "WALLET_KEYPAIR", hide_env_values = true)]
    pub wallet_keypair: Option<SignerKey>,

    /// RPC endpoint of the target ledger.
    #[arg(long, env = "SOLANA_RPC", default_value = "https://api.devnet.solana.com")]
    pub rpc_url: Url,

    /// Ledger environment payments are verified and settled against.
    #[arg(long, env = "SOLANA_NETWORK", default_value = "solana-devnet")]
    pub network: Network,

    /// Default SPL mint offered in issued payment requirements.
    #[arg(
        long,
        env = "DEFAULT_ASSET",
        default_value = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU"
    )]
    pub default_asset: SolanaAddress,

    /// Default timeout advertised in issued payment requirements, seconds.
    #[arg(long, env = "MAX_TIMEOUT_SECONDS", default_value_t = 60)]
    pub max_timeout_seconds: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("WALLET_KEYPAIR is not configured")]
    MissingSigner,
    #[error(transparent)]
    InvalidSigner(#[from] SignerKeyError),
}

impl Config {
    /// Build the process-wide provider, failing if no usable signing key is
    /// configured. Operator-caused; never surfaced as a client error.
    pub fn provider(&self) -> Result<SolanaProvider, ConfigError> {
        let key = self.wallet_keypair.as_ref().ok_or(ConfigError::MissingSigner)?;
        let keypair = key.to_keypair()?;
        Ok(SolanaProvider::new(
            keypair,
            self.network,
            self.rpc_url.to_string(),
        ))
    }
}

/// Validated signing key material.
///
/// Accepts the 64-byte keypair either as the JSON byte array exported by
/// common wallets (`[12,34,...]`) or as a base58 string. The bytes are
/// checked to form a consistent Ed25519 keypair at parse time.
#[derive(Clone)]
pub struct SignerKey(Vec<u8>);

#[derive(Debug, Clone, thiserror::Error)]
pub enum SignerKeyError {
    #[error("signing key is neither a JSON byte array nor base58")]
    InvalidEncoding,
    #[error("signing key must be 64 bytes, got {0}")]
    WrongLength(usize),
    #[error("signing key bytes do not form a valid Ed25519 keypair")]
    InvalidKeypair,
}

impl SignerKey {
    pub fn to_keypair(&self) -> Result<Keypair, SignerKeyError> {
        Keypair::try_from(self.0.as_slice()).map_err(|_| SignerKeyError::InvalidKeypair)
    }
}

impl FromStr for SignerKey {
    type Err = SignerKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bytes: Vec<u8> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed).map_err(|_| SignerKeyError::InvalidEncoding)?
        } else {
            bs58::decode(trimmed)
                .into_vec()
                .map_err(|_| SignerKeyError::InvalidEncoding)?
        };
        if bytes.len() != 64 {
            return Err(SignerKeyError::WrongLength(bytes.len()));
        }
        Keypair::try_from(bytes.as_slice()).map_err(|_| SignerKeyError::InvalidKeypair)?;
        Ok(SignerKey(bytes))
    }
}

impl Debug for SignerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SignerKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_signer::Signer;

    #[test]
    fn test_signer_key_from_base58() {
        let keypair = Keypair::new();
        let encoded = keypair.to_base58_string();
        let key: SignerKey = encoded.parse().unwrap();
        assert_eq!(key.to_keypair().unwrap().pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_signer_key_from_json_byte_array() {
        let keypair = Keypair::new();
        let encoded = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        let key: SignerKey = encoded.parse().unwrap();
        assert_eq!(key.to_keypair().unwrap().pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_signer_key_rejects_wrong_length() {
        let error = "[1,2,3]".parse::<SignerKey>().unwrap_err();
        assert!(matches!(error, SignerKeyError::WrongLength(3)));
    }

    #[test]
    fn test_signer_key_rejects_garbage() {
        assert!("not base58 at all!!".parse::<SignerKey>().is_err());
    }

    #[test]
    fn test_signer_key_rejects_inconsistent_keypair() {
        let mut bytes = Keypair::new().to_bytes();
        // Corrupt the embedded public half.
        bytes[40] ^= 0xff;
        let encoded = serde_json::to_string(&bytes.to_vec()).unwrap();
        assert!(encoded.parse::<SignerKey>().is_err());
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let keypair = Keypair::new();
        let key: SignerKey = keypair.to_base58_string().parse().unwrap();
        assert_eq!(format!("{key:?}"), "SignerKey(..)");
    }
}
