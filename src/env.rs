use crate::bitcoin::Amount;
use bitcoin::Network;
use std::time::Duration;

/// Confirmation target a sweep is sized for when the operator does not ask
/// for anything else.
pub const DEFAULT_SWEEP_CONF_TARGET: u32 = 9;

/// When no more than this many blocks remain until the HTLC timeout, a
/// slower configured target is downgraded to [`DEFAULT_SWEEP_CONF_TARGET`].
pub const DEFAULT_SWEEP_CONF_TARGET_DELTA: u32 = 18;

/// Minimum number of blocks that must remain until the timeout for the first
/// preimage-revealing claim. Any closer and the counterparty can race a
/// refund while the preimage is already public.
pub const MIN_PREIMAGE_REVEAL_DELTA: u32 = 20;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Config {
    pub bitcoin_network: Network,
    pub bitcoin_avg_block_time: Duration,
    pub bitcoin_finality_confirmations: u32,
    pub sweep_conf_target: u32,
    pub htlc_conf_target: u32,
}

pub trait GetConfig {
    fn get_config() -> Config;
}

#[derive(Clone, Copy)]
pub struct Mainnet;

#[derive(Clone, Copy)]
pub struct Testnet;

#[derive(Clone, Copy)]
pub struct Regtest;

impl GetConfig for Mainnet {
    fn get_config() -> Config {
        Config {
            bitcoin_network: Network::Bitcoin,
            bitcoin_avg_block_time: Duration::from_secs(10 * 60),
            bitcoin_finality_confirmations: 3,
            sweep_conf_target: DEFAULT_SWEEP_CONF_TARGET,
            htlc_conf_target: 6,
        }
    }
}

impl GetConfig for Testnet {
    fn get_config() -> Config {
        Config {
            bitcoin_network: Network::Testnet,
            bitcoin_avg_block_time: Duration::from_secs(10 * 60),
            bitcoin_finality_confirmations: 3,
            sweep_conf_target: DEFAULT_SWEEP_CONF_TARGET,
            htlc_conf_target: 3,
        }
    }
}

impl GetConfig for Regtest {
    fn get_config() -> Config {
        Config {
            bitcoin_network: Network::Regtest,
            bitcoin_avg_block_time: Duration::from_secs(5),
            bitcoin_finality_confirmations: 1,
            sweep_conf_target: 3,
            htlc_conf_target: 1,
        }
    }
}

/// Operator-configured ceilings a counterparty quote must stay under before
/// we agree to a swap.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SwapLimits {
    pub max_swap_fee: Amount,
    pub max_prepay: Amount,
    pub max_miner_fee: Amount,
    pub max_cltv_delta: u32,
}

impl Default for SwapLimits {
    fn default() -> Self {
        Self {
            max_swap_fee: Amount::from_sat(30_000),
            max_prepay: Amount::from_sat(30_000),
            max_miner_fee: Amount::from_sat(50_000),
            max_cltv_delta: 288,
        }
    }
}
