pub mod command;
pub mod deps;
pub mod event;
pub mod handler;
pub mod state;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use command::{execute, Command, CommandMeta, ExecutorError, LoopOutParams};
pub use event::Event;
pub use handler::SwapHandler;
pub use state::{LoopIn, LoopOut, State, SwapOutcome};

/// Identifier the counterparty assigned to a swap; primary key of the event
/// stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapId(String);

impl SwapId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SwapId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// An asset a swap can touch. The on-chain and off-chain side of a pair are
/// both drawn from this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Asset {
    Btc,
    Ltc,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Btc => write!(f, "BTC"),
            Asset::Ltc => write!(f, "LTC"),
        }
    }
}

impl FromStr for Asset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "BTC" => Ok(Asset::Btc),
            "LTC" => Ok(Asset::Ltc),
            other => anyhow::bail!("unknown asset: {other}"),
        }
    }
}

/// Ordered asset pair of a swap. The base asset is the on-chain side, the
/// quote asset the off-chain side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairId {
    pub base: Asset,
    pub quote: Asset,
}

impl PairId {
    pub const fn new(base: Asset, quote: Asset) -> Self {
        Self { base, quote }
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Status of a swap as reported by the counterparty's status stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapStatusType {
    SwapCreated,
    InvoiceSet,
    TxMempool,
    TxConfirmed,
    TxClaimed,
    InvoicePayed,
    InvoiceFailedToPay,
    SwapExpired,
}

impl fmt::Display for SwapStatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwapStatusType::SwapCreated => "swap.created",
            SwapStatusType::InvoiceSet => "invoice.set",
            SwapStatusType::TxMempool => "transaction.mempool",
            SwapStatusType::TxConfirmed => "transaction.confirmed",
            SwapStatusType::TxClaimed => "transaction.claimed",
            SwapStatusType::InvoicePayed => "invoice.payed",
            SwapStatusType::InvoiceFailedToPay => "invoice.failed-to-pay",
            SwapStatusType::SwapExpired => "swap.expired",
        };
        write!(f, "{s}")
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_id_displays_base_over_quote() {
        let pair = PairId::new(Asset::Btc, Asset::Ltc);
        assert_eq!(pair.to_string(), "BTC/LTC");
    }

    #[test]
    fn swap_id_serializes_as_a_bare_string() {
        let id = SwapId::new("abc123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc123\"");
    }
}
