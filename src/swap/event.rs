//! The per-swap event union and its binary codec.
//!
//! Events are framed as `[u16 big-endian tag][body]`. Bodies are JSON so new
//! fields can be added without breaking old streams; only the tag and its
//! framing are bit-exact. Tags this daemon does not know survive replay as
//! [`Event::UnknownTag`].

use crate::bitcoin::{BlockHeight, PaymentPreimage};
use crate::lightning::PaymentParams;
use crate::swap::state::{LoopIn, LoopOut};
use crate::swap::{PairId, SwapId};
use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod tag {
    pub const NEW_LOOP_OUT_ADDED: u16 = 0;
    pub const CLAIM_TX_PUBLISHED: u16 = 1;
    pub const OFF_CHAIN_OFFER_STARTED: u16 = 2;
    pub const OFF_CHAIN_OFFER_RESOLVED: u16 = 3;
    pub const NEW_LOOP_IN_ADDED: u16 = 256;
    pub const SWAP_TX_PUBLISHED: u16 = 257;
    pub const REFUND_TX_PUBLISHED: u16 = 258;
    pub const NEW_TIP_RECEIVED: u16 = 512;
    pub const FINISHED_SUCCESSFULLY: u16 = 1024;
    pub const FINISHED_BY_REFUND: u16 = 1025;
    pub const FINISHED_BY_ERROR: u16 = 1026;
    pub const FINISHED_BY_TIMEOUT: u16 = 1027;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NewLoopOutAdded {
        height: BlockHeight,
        loop_out: LoopOut,
    },
    ClaimTxPublished {
        txid: Txid,
    },
    OffChainOfferStarted {
        swap_id: SwapId,
        pair_id: PairId,
        invoice: String,
        params: PaymentParams,
    },
    OffChainOfferResolved {
        preimage: PaymentPreimage,
    },
    NewLoopInAdded {
        height: BlockHeight,
        loop_in: LoopIn,
    },
    SwapTxPublished {
        tx_hex: String,
    },
    RefundTxPublished {
        txid: Txid,
    },
    NewTipReceived {
        height: BlockHeight,
    },
    FinishedSuccessfully {
        id: SwapId,
    },
    FinishedByRefund {
        id: SwapId,
    },
    FinishedByError {
        id: SwapId,
        error: String,
    },
    FinishedByTimeout {
        reason: String,
    },
    /// An event written by a newer version of the daemon. Preserved verbatim
    /// so replay and re-serialisation lose nothing.
    UnknownTag {
        tag: u16,
        body: Vec<u8>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("event frame shorter than the two-byte tag")]
    Truncated,
    #[error("malformed body for event tag {tag}: {source}")]
    Body {
        tag: u16,
        source: serde_json::Error,
    },
}

#[derive(Serialize, Deserialize)]
struct NewLoopOutBody {
    height: BlockHeight,
    loop_out: LoopOut,
}

#[derive(Serialize, Deserialize)]
struct NewLoopInBody {
    height: BlockHeight,
    loop_in: LoopIn,
}

#[derive(Serialize, Deserialize)]
struct OfferStartedBody {
    swap_id: SwapId,
    pair_id: PairId,
    invoice: String,
    params: PaymentParams,
}

#[derive(Serialize, Deserialize)]
struct FinishedByErrorBody {
    id: SwapId,
    error: String,
}

impl Event {
    pub fn tag(&self) -> u16 {
        match self {
            Event::NewLoopOutAdded { .. } => tag::NEW_LOOP_OUT_ADDED,
            Event::ClaimTxPublished { .. } => tag::CLAIM_TX_PUBLISHED,
            Event::OffChainOfferStarted { .. } => tag::OFF_CHAIN_OFFER_STARTED,
            Event::OffChainOfferResolved { .. } => tag::OFF_CHAIN_OFFER_RESOLVED,
            Event::NewLoopInAdded { .. } => tag::NEW_LOOP_IN_ADDED,
            Event::SwapTxPublished { .. } => tag::SWAP_TX_PUBLISHED,
            Event::RefundTxPublished { .. } => tag::REFUND_TX_PUBLISHED,
            Event::NewTipReceived { .. } => tag::NEW_TIP_RECEIVED,
            Event::FinishedSuccessfully { .. } => tag::FINISHED_SUCCESSFULLY,
            Event::FinishedByRefund { .. } => tag::FINISHED_BY_REFUND,
            Event::FinishedByError { .. } => tag::FINISHED_BY_ERROR,
            Event::FinishedByTimeout { .. } => tag::FINISHED_BY_TIMEOUT,
            Event::UnknownTag { tag, .. } => *tag,
        }
    }

    /// `true` once this event ends the swap; nothing may follow it in a
    /// stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::FinishedSuccessfully { .. }
                | Event::FinishedByRefund { .. }
                | Event::FinishedByError { .. }
                | Event::FinishedByTimeout { .. }
        )
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = match self {
            Event::NewLoopOutAdded { height, loop_out } => serde_json::to_vec(&NewLoopOutBody {
                height: *height,
                loop_out: loop_out.clone(),
            }),
            Event::ClaimTxPublished { txid } => serde_json::to_vec(txid),
            Event::OffChainOfferStarted {
                swap_id,
                pair_id,
                invoice,
                params,
            } => serde_json::to_vec(&OfferStartedBody {
                swap_id: swap_id.clone(),
                pair_id: *pair_id,
                invoice: invoice.clone(),
                params: params.clone(),
            }),
            Event::OffChainOfferResolved { preimage } => serde_json::to_vec(preimage),
            Event::NewLoopInAdded { height, loop_in } => serde_json::to_vec(&NewLoopInBody {
                height: *height,
                loop_in: loop_in.clone(),
            }),
            Event::SwapTxPublished { tx_hex } => serde_json::to_vec(tx_hex),
            Event::RefundTxPublished { txid } => serde_json::to_vec(txid),
            Event::NewTipReceived { height } => serde_json::to_vec(height),
            Event::FinishedSuccessfully { id } => serde_json::to_vec(id),
            Event::FinishedByRefund { id } => serde_json::to_vec(id),
            Event::FinishedByError { id, error } => serde_json::to_vec(&FinishedByErrorBody {
                id: id.clone(),
                error: error.clone(),
            }),
            Event::FinishedByTimeout { reason } => serde_json::to_vec(reason),
            Event::UnknownTag { body, .. } => Ok(body.clone()),
        };
        let body = body.expect("event body serialization must not fail");

        let mut frame = Vec::with_capacity(2 + body.len());
        frame.extend_from_slice(&self.tag().to_be_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Event, DecodeError> {
        if bytes.len() < 2 {
            return Err(DecodeError::Truncated);
        }
        let event_tag = u16::from_be_bytes([bytes[0], bytes[1]]);
        let body = &bytes[2..];

        fn parse<'a, T: Deserialize<'a>>(tag: u16, body: &'a [u8]) -> Result<T, DecodeError> {
            serde_json::from_slice(body).map_err(|source| DecodeError::Body { tag, source })
        }

        let event = match event_tag {
            tag::NEW_LOOP_OUT_ADDED => {
                let body: NewLoopOutBody = parse(event_tag, body)?;
                Event::NewLoopOutAdded {
                    height: body.height,
                    loop_out: body.loop_out,
                }
            }
            tag::CLAIM_TX_PUBLISHED => Event::ClaimTxPublished {
                txid: parse(event_tag, body)?,
            },
            tag::OFF_CHAIN_OFFER_STARTED => {
                let body: OfferStartedBody = parse(event_tag, body)?;
                Event::OffChainOfferStarted {
                    swap_id: body.swap_id,
                    pair_id: body.pair_id,
                    invoice: body.invoice,
                    params: body.params,
                }
            }
            tag::OFF_CHAIN_OFFER_RESOLVED => Event::OffChainOfferResolved {
                preimage: parse(event_tag, body)?,
            },
            tag::NEW_LOOP_IN_ADDED => {
                let body: NewLoopInBody = parse(event_tag, body)?;
                Event::NewLoopInAdded {
                    height: body.height,
                    loop_in: body.loop_in,
                }
            }
            tag::SWAP_TX_PUBLISHED => Event::SwapTxPublished {
                tx_hex: parse(event_tag, body)?,
            },
            tag::REFUND_TX_PUBLISHED => Event::RefundTxPublished {
                txid: parse(event_tag, body)?,
            },
            tag::NEW_TIP_RECEIVED => Event::NewTipReceived {
                height: parse(event_tag, body)?,
            },
            tag::FINISHED_SUCCESSFULLY => Event::FinishedSuccessfully {
                id: parse(event_tag, body)?,
            },
            tag::FINISHED_BY_REFUND => Event::FinishedByRefund {
                id: parse(event_tag, body)?,
            },
            tag::FINISHED_BY_ERROR => {
                let body: FinishedByErrorBody = parse(event_tag, body)?;
                Event::FinishedByError {
                    id: body.id,
                    error: body.error,
                }
            }
            tag::FINISHED_BY_TIMEOUT => Event::FinishedByTimeout {
                reason: parse(event_tag, body)?,
            },
            unknown => Event::UnknownTag {
                tag: unknown,
                body: body.to_vec(),
            },
        };

        Ok(event)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::NewLoopOutAdded { loop_out, .. } => {
                write!(f, "new loop out {} added", loop_out.id)
            }
            Event::ClaimTxPublished { txid } => write!(f, "claim tx {txid} published"),
            Event::OffChainOfferStarted { swap_id, .. } => {
                write!(f, "off-chain offer for {swap_id} started")
            }
            Event::OffChainOfferResolved { .. } => write!(f, "off-chain offer resolved"),
            Event::NewLoopInAdded { loop_in, .. } => {
                write!(f, "new loop in {} added", loop_in.id)
            }
            Event::SwapTxPublished { .. } => write!(f, "swap tx published"),
            Event::RefundTxPublished { txid } => write!(f, "refund tx {txid} published"),
            Event::NewTipReceived { height } => write!(f, "new tip {height} received"),
            Event::FinishedSuccessfully { id } => write!(f, "swap {id} finished successfully"),
            Event::FinishedByRefund { id } => write!(f, "swap {id} finished by refund"),
            Event::FinishedByError { id, error } => {
                write!(f, "swap {id} finished by error: {error}")
            }
            Event::FinishedByTimeout { reason } => {
                write!(f, "swap finished by timeout: {reason}")
            }
            Event::UnknownTag { tag, .. } => write!(f, "unknown event (tag {tag})"),
        }
    }
}
