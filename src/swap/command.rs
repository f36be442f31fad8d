//! The command executor: validates a command against the current state,
//! coordinates the external collaborators, and decides which events to
//! append. All state mutation happens later, in the pure fold.

use crate::bitcoin::fee::{claim_fee_decision, sweep_conf_target, ClaimFeeDecision};
use crate::bitcoin::htlc::{SwapScript, TxBuildError};
use crate::bitcoin::{
    create_claim_tx, create_refund_tx, create_swap_psbt, public_key_for, tx_from_hex, tx_to_hex,
    vsize, Amount, BlockHeight, PaymentPreimage, ReverseSwapScript, Transaction, Txid, Utxo,
};
use crate::env::{
    DEFAULT_SWEEP_CONF_TARGET, DEFAULT_SWEEP_CONF_TARGET_DELTA, MIN_PREIMAGE_REVEAL_DELTA,
};
use crate::lightning::{payment_hash_from_bolt11, PaymentParams};
use crate::swap::deps::Deps;
use crate::swap::event::Event;
use crate::swap::state::{LoopIn, LoopOut, State};
use crate::swap::{Asset, SwapStatusType};
use anyhow::{anyhow, Context};
use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutParams {
    /// Chain tip at swap creation.
    pub height: BlockHeight,
    /// Routing fee limit for the swap invoice itself.
    pub max_payment_fee: Amount,
    /// Routing fee limit for the optional miner-fee prepayment.
    pub max_prepay_fee: Amount,
    /// Short channel ids the payments must leave through; empty means any.
    pub outgoing_channels: Vec<u64>,
}

/// One entry of the counterparty's per-swap status stream.
#[derive(Debug, Clone)]
pub struct SwapStatusUpdate {
    pub status: SwapStatusType,
    /// The HTLC-funding transaction, present on lockup statuses in loop-out.
    pub transaction: Option<Transaction>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Command {
    NewLoopOut {
        params: LoopOutParams,
        loop_out: LoopOut,
    },
    NewLoopIn {
        height: BlockHeight,
        loop_in: LoopIn,
    },
    SwapUpdate(SwapStatusUpdate),
    OffChainOfferResolve {
        preimage: PaymentPreimage,
    },
    SetValidationError {
        error: String,
    },
    NewBlock {
        height: BlockHeight,
        asset: Asset,
    },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::NewLoopOut { .. } => write!(f, "NewLoopOut"),
            Command::NewLoopIn { .. } => write!(f, "NewLoopIn"),
            Command::SwapUpdate(update) => write!(f, "SwapUpdate({})", update.status),
            Command::OffChainOfferResolve { .. } => write!(f, "OffChainOfferResolve"),
            Command::SetValidationError { .. } => write!(f, "SetValidationError"),
            Command::NewBlock { height, asset } => write!(f, "NewBlock({height}, {asset})"),
        }
    }
}

/// Where and when a command originated; recorded alongside the events it
/// produces.
#[derive(Debug, Clone)]
pub struct CommandMeta {
    pub effective_date: OffsetDateTime,
    pub source: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("transaction construction failed: {0}")]
    Transaction(#[from] TxBuildError),
    #[error("invalid command input: {0}")]
    Input(String),
    #[error("utxo provider could not fund the swap transaction: {0}")]
    UtxoProvider(String),
    #[error("wallet failed to produce an address: {0}")]
    FailedToGetAddress(String),
    #[error("revealing the preimage is no longer safe")]
    CanNotSafelyRevealPreimage,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Decide which events a command produces against the current state.
///
/// Commands against a finished swap are absorbed without events. Pairings
/// outside the transition table in a live state are programmer errors and
/// surface as [`ExecutorError::Unexpected`]. No events are returned unless
/// every external side effect for this command succeeded.
pub async fn execute(
    state: &State,
    command: Command,
    deps: &Deps,
    meta: &CommandMeta,
) -> Result<Vec<Event>, ExecutorError> {
    tracing::debug!(source = %meta.source, %command, %state, "executing swap command");

    match (state, command) {
        (State::Finished(_), _) => Ok(vec![]),

        (State::HasNotStarted, Command::NewLoopOut { params, loop_out }) => {
            new_loop_out(deps, params, loop_out).await
        }

        (State::HasNotStarted, Command::NewLoopIn { height, loop_in }) => {
            validate_loop_in(&loop_in).map_err(|e| ExecutorError::Input(format!("{e:#}")))?;
            Ok(vec![Event::NewLoopInAdded { height, loop_in }])
        }

        (State::Out { loop_out, .. }, Command::OffChainOfferResolve { preimage }) => {
            let invoice_hash = payment_hash_from_bolt11(&loop_out.invoice)
                .map_err(|e| ExecutorError::Input(format!("{e:#}")))?;
            if preimage.hash() != invoice_hash {
                return Err(ExecutorError::Input(
                    "resolved preimage does not match the invoice payment hash".to_string(),
                ));
            }
            Ok(vec![
                Event::OffChainOfferResolved { preimage },
                Event::FinishedSuccessfully {
                    id: loop_out.id.clone(),
                },
            ])
        }

        (
            State::Out {
                block_height,
                loop_out,
            },
            Command::SwapUpdate(update),
        ) => loop_out_update(deps, *block_height, loop_out, update).await,

        (
            State::Out {
                block_height,
                loop_out,
            },
            Command::NewBlock { height, asset },
        ) => {
            if asset != loop_out.pair_id.base {
                return Ok(vec![]);
            }
            loop_out_block(deps, *block_height, loop_out, height).await
        }

        (
            State::In {
                block_height,
                loop_in,
            },
            Command::SwapUpdate(update),
        ) => loop_in_update(deps, *block_height, loop_in, update).await,

        (
            State::In {
                block_height,
                loop_in,
            },
            Command::NewBlock { height, asset },
        ) => {
            if asset != loop_in.pair_id.quote {
                return Ok(vec![]);
            }
            loop_in_block(deps, *block_height, loop_in, height).await
        }

        (State::Out { loop_out, .. }, Command::SetValidationError { error }) => {
            tracing::warn!(swap_id = %loop_out.id, %error, "terminating swap on validation error");
            Ok(vec![Event::FinishedByError {
                id: loop_out.id.clone(),
                error,
            }])
        }

        (State::In { loop_in, .. }, Command::SetValidationError { error }) => {
            tracing::warn!(swap_id = %loop_in.id, %error, "terminating swap on validation error");
            Ok(vec![Event::FinishedByError {
                id: loop_in.id.clone(),
                error,
            }])
        }

        (state, command) => Err(ExecutorError::Unexpected(anyhow!(
            "command {command} cannot be handled in state: {state}"
        ))),
    }
}

async fn new_loop_out(
    deps: &Deps,
    params: LoopOutParams,
    loop_out: LoopOut,
) -> Result<Vec<Event>, ExecutorError> {
    validate_loop_out(&loop_out).map_err(|e| ExecutorError::Input(format!("{e:#}")))?;

    // The prepay covers the counterparty's miner fee; dispatch it without
    // waiting for settlement.
    if let Some(prepay_invoice) = &loop_out.prepay_invoice {
        deps.lightning
            .pay_invoice(
                prepay_invoice,
                PaymentParams {
                    max_fee: params.max_prepay_fee,
                    outgoing_channels: params.outgoing_channels.clone(),
                },
            )
            .await
            .context("failed to dispatch prepayment")?;
        tracing::debug!(swap_id = %loop_out.id, "prepayment dispatched");
    }

    let offer = Event::OffChainOfferStarted {
        swap_id: loop_out.id.clone(),
        pair_id: loop_out.pair_id,
        invoice: loop_out.invoice.clone(),
        params: PaymentParams {
            max_fee: params.max_payment_fee,
            outgoing_channels: params.outgoing_channels,
        },
    };

    Ok(vec![
        Event::NewLoopOutAdded {
            height: params.height,
            loop_out,
        },
        offer,
    ])
}

fn validate_loop_out(loop_out: &LoopOut) -> anyhow::Result<()> {
    anyhow::ensure!(
        loop_out.on_chain_amount > Amount::ZERO,
        "on-chain amount must be non-zero"
    );

    let invoice_hash =
        payment_hash_from_bolt11(&loop_out.invoice).context("swap invoice is invalid")?;
    anyhow::ensure!(
        invoice_hash == loop_out.preimage.hash(),
        "invoice payment hash does not commit to our preimage"
    );

    if let Some(prepay_invoice) = &loop_out.prepay_invoice {
        payment_hash_from_bolt11(prepay_invoice).context("prepay invoice is invalid")?;
    }

    ReverseSwapScript::validate(
        &loop_out.redeem_script,
        &loop_out.preimage.hash(),
        &public_key_for(&loop_out.claim_key),
        loop_out.timeout_block_height,
    )
    .context("counterparty redeem script was rejected")?;

    Ok(())
}

fn validate_loop_in(loop_in: &LoopIn) -> anyhow::Result<()> {
    anyhow::ensure!(
        loop_in.expected_amount > Amount::ZERO,
        "expected amount must be non-zero"
    );

    let script = SwapScript::parse(&loop_in.redeem_script)
        .context("counterparty redeem script does not parse")?;
    anyhow::ensure!(
        script.refund_pubkey == public_key_for(&loop_in.refund_private_key),
        "redeem script refund branch does not use our key"
    );
    anyhow::ensure!(
        script.timeout_block_height == loop_in.timeout_block_height,
        "redeem script timelock does not match the declared timeout"
    );

    Ok(())
}

async fn loop_out_update(
    deps: &Deps,
    block_height: BlockHeight,
    loop_out: &LoopOut,
    update: SwapStatusUpdate,
) -> Result<Vec<Event>, ExecutorError> {
    if update.status == loop_out.status {
        return Ok(vec![]);
    }

    match update.status {
        SwapStatusType::TxMempool if !loop_out.accept_zero_conf => Ok(vec![]),
        SwapStatusType::TxMempool | SwapStatusType::TxConfirmed => {
            let lockup_tx = update.transaction.ok_or_else(|| {
                ExecutorError::Input("lockup status update carries no transaction".to_string())
            })?;

            let mut events = vec![Event::SwapTxPublished {
                tx_hex: tx_to_hex(&lockup_tx),
            }];
            if let Some(txid) = sweep_or_bump(deps, block_height, loop_out, &lockup_tx).await? {
                events.push(Event::ClaimTxPublished { txid });
            }
            Ok(events)
        }
        SwapStatusType::SwapExpired => {
            let reason = update
                .failure_reason
                .unwrap_or_else(|| "counterparty reported the swap expired".to_string());
            Ok(vec![Event::FinishedByTimeout { reason }])
        }
        _ => Ok(vec![]),
    }
}

async fn loop_out_block(
    deps: &Deps,
    block_height: BlockHeight,
    loop_out: &LoopOut,
    new_height: BlockHeight,
) -> Result<Vec<Event>, ExecutorError> {
    let mut events = Vec::new();
    let tip = if new_height > block_height {
        events.push(Event::NewTipReceived { height: new_height });
        new_height
    } else {
        block_height
    };

    let remaining = tip.blocks_until(loop_out.timeout_block_height);
    if remaining <= MIN_PREIMAGE_REVEAL_DELTA && loop_out.claim_transaction_id.is_none() {
        tracing::warn!(
            swap_id = %loop_out.id,
            remaining,
            "timeout too close to reveal the preimage, abandoning the swap"
        );
        events.push(Event::FinishedByTimeout {
            reason: format!(
                "cannot safely reveal the preimage, only {remaining} blocks remain until timeout"
            ),
        });
        return Ok(events);
    }

    if let Some(lockup_hex) = &loop_out.lockup_tx_hex {
        let lockup_tx =
            tx_from_hex(lockup_hex).context("recorded lockup transaction does not decode")?;
        if let Some(txid) = sweep_or_bump(deps, tip, loop_out, &lockup_tx).await? {
            events.push(Event::ClaimTxPublished { txid });
        }
    }

    Ok(events)
}

/// Build and publish the claim transaction if the fee policy allows it.
///
/// Returns the txid of the broadcast claim, or `None` when the estimated fee
/// exceeds the operator's cap and nothing forces the sweep yet.
async fn sweep_or_bump(
    deps: &Deps,
    current_height: BlockHeight,
    loop_out: &LoopOut,
    lockup_tx: &Transaction,
) -> Result<Option<Txid>, ExecutorError> {
    let preimage_revealed = loop_out.claim_transaction_id.is_some();
    let remaining = current_height.blocks_until(loop_out.timeout_block_height);
    if !preimage_revealed && remaining <= MIN_PREIMAGE_REVEAL_DELTA {
        return Err(ExecutorError::CanNotSafelyRevealPreimage);
    }

    let conf_target = sweep_conf_target(
        remaining,
        loop_out.sweep_conf_target,
        DEFAULT_SWEEP_CONF_TARGET,
        DEFAULT_SWEEP_CONF_TARGET_DELTA,
    );
    let fee_rate = deps
        .fee_estimator
        .estimate_fee_rate(conf_target, loop_out.pair_id.base)
        .await
        .context("fee estimation failed")?;

    let network = loop_out.claim_address.network;
    let claim_tx = create_claim_tx(
        &loop_out.claim_address,
        &loop_out.claim_key,
        loop_out.preimage,
        &loop_out.redeem_script,
        fee_rate,
        lockup_tx,
        network,
    )?;

    let claim_tx = match claim_fee_decision(
        fee_rate,
        vsize(&claim_tx),
        loop_out.max_miner_fee,
        preimage_revealed,
    ) {
        ClaimFeeDecision::Publish(_) => claim_tx,
        ClaimFeeDecision::PublishAtCap(capped_rate) => {
            tracing::warn!(
                swap_id = %loop_out.id,
                %fee_rate,
                %capped_rate,
                "estimated sweep fee exceeds the miner fee cap, bumping at the cap"
            );
            create_claim_tx(
                &loop_out.claim_address,
                &loop_out.claim_key,
                loop_out.preimage,
                &loop_out.redeem_script,
                capped_rate,
                lockup_tx,
                network,
            )?
        }
        ClaimFeeDecision::Defer => {
            tracing::debug!(
                swap_id = %loop_out.id,
                %fee_rate,
                "estimated sweep fee exceeds the miner fee cap, deferring"
            );
            return Ok(None);
        }
    };

    let txid = deps
        .broadcaster
        .broadcast_tx(&claim_tx, loop_out.pair_id.base)
        .await
        .context("failed to broadcast claim transaction")?;
    tracing::info!(swap_id = %loop_out.id, %txid, "published claim transaction");

    Ok(Some(txid))
}

async fn loop_in_update(
    deps: &Deps,
    _block_height: BlockHeight,
    loop_in: &LoopIn,
    update: SwapStatusUpdate,
) -> Result<Vec<Event>, ExecutorError> {
    if update.status == loop_in.status {
        return Ok(vec![]);
    }

    match update.status {
        SwapStatusType::InvoiceSet => {
            // Funding must run at most once: a second pass would select
            // fresh coins and fund a second HTLC.
            if loop_in.lockup_tx_hex.is_some() {
                tracing::debug!(
                    swap_id = %loop_in.id,
                    "swap transaction already published, ignoring redelivered invoice.set"
                );
                return Ok(vec![]);
            }

            let utxos = deps
                .utxo_provider
                .select_utxos(loop_in.expected_amount, loop_in.pair_id.base)
                .await
                .map_err(|e| ExecutorError::UtxoProvider(format!("{e:#}")))?;

            match fund_loop_in(deps, loop_in, &utxos).await {
                Ok(events) => Ok(events),
                Err(e) => {
                    if let Err(release_err) = deps.utxo_provider.release(&utxos).await {
                        tracing::warn!(
                            swap_id = %loop_in.id,
                            "failed to release selected coins: {release_err:#}"
                        );
                    }
                    Err(e)
                }
            }
        }
        // The counterparty saw our lockup or settled the invoice; nothing to
        // do until they claim on-chain.
        SwapStatusType::TxConfirmed | SwapStatusType::InvoicePayed => Ok(vec![]),
        SwapStatusType::TxClaimed => Ok(vec![Event::FinishedSuccessfully {
            id: loop_in.id.clone(),
        }]),
        // Refund at the timeout height settles both failure modes.
        SwapStatusType::InvoiceFailedToPay | SwapStatusType::SwapExpired => Ok(vec![]),
        _ => Ok(vec![]),
    }
}

async fn fund_loop_in(
    deps: &Deps,
    loop_in: &LoopIn,
    utxos: &[Utxo],
) -> Result<Vec<Event>, ExecutorError> {
    let asset = loop_in.pair_id.base;

    let fee_rate = deps
        .fee_estimator
        .estimate_fee_rate(loop_in.htlc_conf_target, asset)
        .await
        .context("fee estimation failed")?;
    let change_address = deps
        .wallet
        .change_address(asset)
        .await
        .map_err(|e| ExecutorError::FailedToGetAddress(format!("{e:#}")))?;

    let psbt = create_swap_psbt(
        utxos,
        &loop_in.redeem_script,
        loop_in.expected_amount,
        fee_rate,
        &change_address,
        change_address.network,
    )?;

    let swap_tx = deps
        .utxo_provider
        .sign_swap_psbt(psbt)
        .await
        .context("failed to sign swap transaction")?;
    let txid = deps
        .broadcaster
        .broadcast_tx(&swap_tx, asset)
        .await
        .context("failed to broadcast swap transaction")?;
    tracing::info!(swap_id = %loop_in.id, %txid, "published swap transaction");

    Ok(vec![Event::SwapTxPublished {
        tx_hex: tx_to_hex(&swap_tx),
    }])
}

async fn loop_in_block(
    deps: &Deps,
    block_height: BlockHeight,
    loop_in: &LoopIn,
    new_height: BlockHeight,
) -> Result<Vec<Event>, ExecutorError> {
    let mut events = Vec::new();
    let tip = if new_height > block_height {
        events.push(Event::NewTipReceived { height: new_height });
        new_height
    } else {
        block_height
    };

    let lockup_hex = match &loop_in.lockup_tx_hex {
        Some(hex) if u32::from(tip) >= loop_in.timeout_block_height => hex,
        _ => return Ok(events),
    };

    let asset = loop_in.pair_id.quote;
    let refund_address = deps
        .wallet
        .refund_address(asset)
        .await
        .map_err(|e| ExecutorError::FailedToGetAddress(format!("{e:#}")))?;
    let fee_rate = deps
        .fee_estimator
        .estimate_fee_rate(loop_in.htlc_conf_target, asset)
        .await
        .context("fee estimation failed")?;

    let lockup_tx =
        tx_from_hex(lockup_hex).context("recorded lockup transaction does not decode")?;
    let refund_tx = create_refund_tx(
        &lockup_tx,
        &loop_in.redeem_script,
        fee_rate,
        &refund_address,
        &loop_in.refund_private_key,
        loop_in.timeout_block_height,
        refund_address.network,
    )?;

    let txid = deps
        .broadcaster
        .broadcast_tx(&refund_tx, asset)
        .await
        .context("failed to broadcast refund transaction")?;
    tracing::info!(swap_id = %loop_in.id, %txid, "published refund transaction");

    events.push(Event::RefundTxPublished { txid });
    events.push(Event::FinishedByRefund {
        id: loop_in.id.clone(),
    });
    Ok(events)
}
