//! Supported ledger networks.
//!
//! The protocol targets Solana environments only. Each variant carries the
//! wire name used in payment requirements and payloads, plus the genesis
//! reference that identifies the chain.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Target ledger environment for a payment.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Solana mainnet.
    #[serde(rename = "solana")]
    Solana,
    /// Solana devnet.
    #[serde(rename = "solana-devnet")]
    SolanaDevnet,
}

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[Network::Solana, Network::SolanaDevnet]
    }

    /// First 32 characters of the base58-encoded genesis block hash.
    pub fn genesis_reference(&self) -> &'static str {
        match self {
            Network::Solana => "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
            Network::SolanaDevnet => "EtWTRABZaYq6iMfeYKouRu166VU2xqa1",
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Solana => write!(f, "solana"),
            Network::SolanaDevnet => write!(f, "solana-devnet"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct NetworkParseError(String);

impl FromStr for Network {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solana" => Ok(Network::Solana),
            "solana-devnet" => Ok(Network::SolanaDevnet),
            other => Err(NetworkParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_wire_names() {
        assert_eq!(serde_json::to_string(&Network::Solana).unwrap(), "\"solana\"");
        assert_eq!(
            serde_json::to_string(&Network::SolanaDevnet).unwrap(),
            "\"solana-devnet\""
        );
    }

    #[test]
    fn test_network_deserialize() {
        let network: Network = serde_json::from_str("\"solana-devnet\"").unwrap();
        assert_eq!(network, Network::SolanaDevnet);
    }

    #[test]
    fn test_network_deserialize_unknown() {
        let result: Result<Network, _> = serde_json::from_str("\"base\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_network_from_str_matches_display() {
        for network in Network::variants() {
            assert_eq!(network.to_string().parse::<Network>().unwrap(), *network);
        }
    }

    #[test]
    fn test_genesis_reference_length() {
        for network in Network::variants() {
            assert_eq!(network.genesis_reference().len(), 32);
        }
    }
}
