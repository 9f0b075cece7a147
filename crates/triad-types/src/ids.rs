//! Identifiers used throughout Triad.
//!
//! Records are keyed by 32-byte SHA-256 fingerprints of their immutable
//! inputs plus a monotonic nonce, so two logically distinct requests never
//! collide and the same logical request never produces two ids. Accounts use
//! UUIDv7, validators use their raw ed25519 public key.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Result, TriadError};

/// SHA-256 over a versioned domain tag and length-prefixed parts.
///
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` distinct.
#[must_use]
pub fn tagged_hash(tag: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(tag);
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Canonical byte encoding of an amount for hashing.
///
/// `1.50` and `1.5` encode identically.
#[must_use]
pub fn amount_bytes(amount: Decimal) -> Vec<u8> {
    amount.normalize().to_string().into_bytes()
}

macro_rules! hash_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// The all-zero value, never a valid identity.
            pub const ZERO: Self = Self([0u8; 32]);

            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            #[must_use]
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            #[must_use]
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }

            #[must_use]
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self> {
                let bytes = hex::decode(s)
                    .map_err(|e| TriadError::Serialization(format!("bad hex: {e}")))?;
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    TriadError::Serialization(concat!(stringify!($name), " must be 32 bytes").into())
                })?;
                Ok(Self(arr))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), hex::encode(&self.0[..8]))
            }
        }

        // Hex strings so ids can key JSON maps.
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hash_id!(
    /// Fingerprint of an [`Operation`](crate::Operation).
    OperationId,
    "op"
);

hash_id!(
    /// Collision-resistant identifier of an [`ExitRequest`](crate::ExitRequest).
    ExitId,
    "exit"
);

hash_id!(
    /// Identifier of a governance [`Proposal`](crate::Proposal).
    ProposalId,
    "proposal"
);

hash_id!(
    /// A Merkle root: a domain's trusted state root or a batch commitment root.
    MerkleRoot,
    "root"
);

hash_id!(
    /// Reference to an external hash-locked swap.
    SwapId,
    "swap"
);

hash_id!(
    /// A validator identity: the raw ed25519 public key (32 bytes).
    ValidatorId,
    "validator"
);

impl ValidatorId {
    #[must_use]
    pub fn from_pubkey(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// An initiator, requester, recipient, or privileged role holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AccountId(pub Uuid);

impl AccountId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ChainDomain
// ---------------------------------------------------------------------------

/// One of the three independent verification domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ChainDomain {
    Ethereum,
    Solana,
    Ton,
}

impl ChainDomain {
    /// All domains in index order.
    pub const ALL: [Self; 3] = [Self::Ethereum, Self::Solana, Self::Ton];

    /// Stable slot index (0..3) used for per-domain arrays.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Ethereum => 0,
            Self::Solana => 1,
            Self::Ton => 2,
        }
    }

    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for ChainDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ethereum => write!(f, "ETHEREUM"),
            Self::Solana => write!(f, "SOLANA"),
            Self::Ton => write!(f, "TON"),
        }
    }
}
