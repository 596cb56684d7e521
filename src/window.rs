use crate::error::ContributionError;
use crate::ledger::LedgerClient;
use crate::models::BlockWindow;

/// Picks the block range a contribution query searches.
#[derive(Debug, Clone, Copy)]
pub struct WindowSelector {
    lookback: u64,
}

impl WindowSelector {
    pub fn new(lookback: u64) -> Self {
        Self { lookback }
    }

    /// Window ending at the node's current height and reaching back
    /// `lookback` blocks, clamped at genesis.
    pub async fn select(&self, ledger: &dyn LedgerClient) -> Result<BlockWindow, ContributionError> {
        let height = ledger.block_number().await?;
        Ok(self.window_at(height))
    }

    pub fn window_at(&self, height: u64) -> BlockWindow {
        BlockWindow {
            from_block: height.saturating_sub(self.lookback),
            to_block: height,
        }
    }
}
