use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Represent a block height, or block number, expressed in absolute block
/// count. E.g. The transaction was included in block #655123, 655123 blocks
/// after the genesis block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHeight(u32);

impl BlockHeight {
    pub const fn new(block_height: u32) -> Self {
        Self(block_height)
    }

    /// Number of blocks until `timeout`, zero if the timeout has passed.
    pub fn blocks_until(self, timeout: BlockHeight) -> u32 {
        timeout.0.saturating_sub(self.0)
    }
}

impl From<BlockHeight> for u32 {
    fn from(height: BlockHeight) -> Self {
        height.0
    }
}

impl From<u32> for BlockHeight {
    fn from(height: u32) -> Self {
        Self(height)
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd<BlockHeight> for u32 {
    fn partial_cmp(&self, other: &BlockHeight) -> Option<Ordering> {
        self.partial_cmp(&other.0)
    }
}

impl PartialEq<BlockHeight> for u32 {
    fn eq(&self, other: &BlockHeight) -> bool {
        self.eq(&other.0)
    }
}
