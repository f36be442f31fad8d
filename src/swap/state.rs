//! Per-swap state: the owned swap records and the pure fold that derives the
//! current state from the event stream.

use crate::bitcoin::{secret_key_serde, Amount, BlockHeight, PaymentPreimage, SecretKey};
use crate::swap::event::Event;
use crate::swap::{PairId, SwapId, SwapStatusType};
use bitcoin::{Address, Script, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything a loop-out swap needs to sweep the counterparty's lockup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOut {
    pub id: SwapId,
    pub pair_id: PairId,
    pub status: SwapStatusType,
    #[serde(with = "secret_key_serde")]
    pub claim_key: SecretKey,
    pub preimage: PaymentPreimage,
    pub redeem_script: Script,
    pub claim_address: Address,
    pub invoice: String,
    pub prepay_invoice: Option<String>,
    #[serde(with = "bitcoin::util::amount::serde::as_sat")]
    pub on_chain_amount: Amount,
    pub timeout_block_height: BlockHeight,
    pub sweep_conf_target: u32,
    #[serde(with = "bitcoin::util::amount::serde::as_sat")]
    pub max_miner_fee: Amount,
    pub accept_zero_conf: bool,
    pub lockup_tx_hex: Option<String>,
    pub claim_transaction_id: Option<Txid>,
}

/// Everything a loop-in swap needs to fund the HTLC and reclaim it on
/// timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopIn {
    pub id: SwapId,
    pub pair_id: PairId,
    pub status: SwapStatusType,
    #[serde(with = "secret_key_serde")]
    pub refund_private_key: SecretKey,
    pub redeem_script: Script,
    #[serde(with = "bitcoin::util::amount::serde::as_sat")]
    pub expected_amount: Amount,
    pub timeout_block_height: BlockHeight,
    pub htlc_conf_target: u32,
    pub lockup_tx_hex: Option<String>,
    pub refund_transaction_id: Option<Txid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SwapOutcome {
    Success,
    Refunded(Txid),
    Errored(String),
    Timeout(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum State {
    HasNotStarted,
    Out {
        block_height: BlockHeight,
        loop_out: Box<LoopOut>,
    },
    In {
        block_height: BlockHeight,
        loop_in: Box<LoopIn>,
    },
    Finished(SwapOutcome),
}

impl State {
    pub const fn zero() -> Self {
        State::HasNotStarted
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, State::Finished(_))
    }

    /// Fold one event into the state. Pure and total: pairings outside the
    /// transition table, and unknown events, leave the state untouched.
    pub fn apply(self, event: &Event) -> State {
        match (self, event) {
            (State::HasNotStarted, Event::NewLoopOutAdded { height, loop_out }) => State::Out {
                block_height: *height,
                loop_out: Box::new(loop_out.clone()),
            },
            (State::HasNotStarted, Event::NewLoopInAdded { height, loop_in }) => State::In {
                block_height: *height,
                loop_in: Box::new(loop_in.clone()),
            },
            (
                State::Out {
                    block_height,
                    mut loop_out,
                },
                Event::ClaimTxPublished { txid },
            ) => {
                loop_out.claim_transaction_id = Some(*txid);
                State::Out {
                    block_height,
                    loop_out,
                }
            }
            (
                State::Out {
                    block_height,
                    mut loop_out,
                },
                Event::SwapTxPublished { tx_hex },
            ) => {
                loop_out.lockup_tx_hex = Some(tx_hex.clone());
                State::Out {
                    block_height,
                    loop_out,
                }
            }
            (
                State::Out {
                    block_height,
                    mut loop_out,
                },
                Event::OffChainOfferResolved { preimage },
            ) => {
                loop_out.preimage = *preimage;
                State::Out {
                    block_height,
                    loop_out,
                }
            }
            (
                State::In {
                    block_height,
                    mut loop_in,
                },
                Event::SwapTxPublished { tx_hex },
            ) => {
                loop_in.lockup_tx_hex = Some(tx_hex.clone());
                State::In {
                    block_height,
                    loop_in,
                }
            }
            (
                State::In {
                    block_height,
                    mut loop_in,
                },
                Event::RefundTxPublished { txid },
            ) => {
                loop_in.refund_transaction_id = Some(*txid);
                State::In {
                    block_height,
                    loop_in,
                }
            }
            (State::Out { loop_out, .. }, Event::NewTipReceived { height }) => State::Out {
                block_height: *height,
                loop_out,
            },
            (State::In { loop_in, .. }, Event::NewTipReceived { height }) => State::In {
                block_height: *height,
                loop_in,
            },
            (State::Out { .. }, Event::FinishedSuccessfully { .. })
            | (State::In { .. }, Event::FinishedSuccessfully { .. }) => {
                State::Finished(SwapOutcome::Success)
            }
            (State::Out { .. }, Event::FinishedByError { error, .. })
            | (State::In { .. }, Event::FinishedByError { error, .. }) => {
                State::Finished(SwapOutcome::Errored(error.clone()))
            }
            (State::In { loop_in, block_height }, Event::FinishedByRefund { .. }) => {
                match loop_in.refund_transaction_id {
                    Some(txid) => State::Finished(SwapOutcome::Refunded(txid)),
                    // A partial stream without the refund tx must not invent
                    // a terminal outcome.
                    None => State::In {
                        block_height,
                        loop_in,
                    },
                }
            }
            (State::Out { .. }, Event::FinishedByTimeout { reason })
            | (State::In { .. }, Event::FinishedByTimeout { reason }) => {
                State::Finished(SwapOutcome::Timeout(reason.clone()))
            }
            (state, _) => state,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::HasNotStarted => write!(f, "swap has not started"),
            State::Out { loop_out, .. } => {
                write!(f, "loop out {} in progress", loop_out.id)
            }
            State::In { loop_in, .. } => write!(f, "loop in {} in progress", loop_in.id),
            State::Finished(SwapOutcome::Success) => write!(f, "swap finished successfully"),
            State::Finished(SwapOutcome::Refunded(txid)) => {
                write!(f, "swap refunded by {txid}")
            }
            State::Finished(SwapOutcome::Errored(error)) => {
                write!(f, "swap failed: {error}")
            }
            State::Finished(SwapOutcome::Timeout(reason)) => {
                write!(f, "swap timed out: {reason}")
            }
        }
    }
}
