use async_trait::async_trait;

use crate::error::ContributionError;
use crate::models::{BlockWindow, ParticipantAddress, TransferRecord};

/// Read-only view of the remote ledger the coordinator depends on.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current chain height.
    async fn block_number(&self) -> Result<u64, ContributionError>;

    /// Transfers from `sender` to `recipient` inside `window`, matched by an
    /// exact event filter on the node.
    async fn fetch_transfers(
        &self,
        window: BlockWindow,
        sender: &ParticipantAddress,
        recipient: &ParticipantAddress,
    ) -> Result<Vec<TransferRecord>, ContributionError>;
}
