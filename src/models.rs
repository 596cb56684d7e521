// src/models.rs
use std::fmt;

use alloy::primitives::{Address, U256};
use bigdecimal::BigDecimal;
use serde::{Serialize, Serializer};

use crate::error::ContributionError;

/// Longest slice of rejected input carried in an error, since it is echoed
/// back to the caller and into logs.
const MAX_ECHOED_INPUT: usize = 64;

fn echo(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(MAX_ECHOED_INPUT).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// A ledger account, compared on its 20 bytes so `0xABC..` and `0xabc..`
/// are the same key. Displays in canonical lowercase form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantAddress(Address);

impl ParticipantAddress {
    /// Parse caller-supplied text: `0x` followed by exactly 40 hex digits, any case.
    pub fn parse(raw: &str) -> Result<Self, ContributionError> {
        let invalid = || ContributionError::InvalidAddress(echo(raw));

        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(invalid)?;
        if digits.len() != 40 {
            return Err(invalid());
        }

        let bytes = hex::decode(digits).map_err(|_| invalid())?;
        let bytes: [u8; 20] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self(Address::from(bytes)))
    }

    pub fn address(&self) -> Address {
        self.0
    }

    /// The address left-padded to a 32-byte log topic.
    pub fn as_topic(&self) -> String {
        format!("0x{}{}", "0".repeat(24), hex::encode(self.0.as_slice()))
    }
}

impl From<Address> for ParticipantAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl fmt::Display for ParticipantAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_slice()))
    }
}

impl Serialize for ParticipantAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Inclusive block range searched for transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub from_block: u64,
    pub to_block: u64,
}

/// One matched `Transfer` event. `amount` stays in raw base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub sender: ParticipantAddress,
    pub recipient: ParticipantAddress,
    pub amount: U256,
    pub tx_hash: String,
}

/// Contribution total in display units and the allocation it earns. Both
/// are exact; nothing is rounded until a caller asks for a float.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationResult {
    pub contribution: BigDecimal,
    pub expected_allocation: BigDecimal,
}
