//! Trust-boundary checks on counterparty material. Everything the swap
//! service hands back is checked against what we asked for before a
//! `NewLoopOut`/`NewLoopIn` command is ever issued; a failure here means the
//! swap is refused with no on-chain or off-chain side effect.

use crate::bitcoin::htlc::lockup_address_matches;
use crate::bitcoin::{
    Amount, BlockHeight, PaymentHash, PaymentPreimage, PublicKey, ReverseSwapScript, SwapScript,
};
use crate::env::SwapLimits;
use crate::lightning::payment_hash_from_bolt11;
use anyhow::{ensure, Context, Result};
use bitcoin::{Address, Network, Script};

/// Counterparty reply to a loop-out request.
#[derive(Debug, Clone)]
pub struct LoopOutResponse {
    pub id: String,
    pub lockup_address: Address,
    pub invoice: String,
    pub miner_fee_invoice: Option<String>,
    pub timeout_block_height: BlockHeight,
    pub onchain_amount: Amount,
    pub redeem_script: Script,
}

pub fn validate_loop_out_response(
    response: &LoopOutResponse,
    claim_pubkey: &PublicKey,
    preimage: &PaymentPreimage,
    network: Network,
) -> Result<()> {
    ensure!(
        response.onchain_amount > Amount::ZERO,
        "counterparty offered a zero on-chain amount"
    );

    let invoice_hash = payment_hash_from_bolt11(&response.invoice)
        .context("counterparty invoice is invalid")?;
    ensure!(
        invoice_hash == preimage.hash(),
        "counterparty invoice does not commit to our preimage"
    );

    if let Some(miner_fee_invoice) = &response.miner_fee_invoice {
        payment_hash_from_bolt11(miner_fee_invoice)
            .context("counterparty prepay invoice is invalid")?;
    }

    ReverseSwapScript::validate(
        &response.redeem_script,
        &preimage.hash(),
        claim_pubkey,
        response.timeout_block_height,
    )
    .context("counterparty redeem script was rejected")?;

    ensure!(
        lockup_address_matches(&response.lockup_address, &response.redeem_script, network),
        "lockup address does not commit to the redeem script"
    );

    Ok(())
}

/// Counterparty reply to a loop-in request.
#[derive(Debug, Clone)]
pub struct LoopInResponse {
    pub id: String,
    pub address: Address,
    pub redeem_script: Script,
    pub accept_zero_conf: bool,
    pub expected_amount: Amount,
    pub timeout_block_height: BlockHeight,
}

pub fn validate_loop_in_response(
    response: &LoopInResponse,
    refund_pubkey: &PublicKey,
    payment_hash: &PaymentHash,
    network: Network,
) -> Result<()> {
    ensure!(
        response.expected_amount > Amount::ZERO,
        "counterparty expects a zero lockup amount"
    );

    SwapScript::validate(
        &response.redeem_script,
        payment_hash,
        refund_pubkey,
        response.timeout_block_height,
    )
    .context("counterparty redeem script was rejected")?;

    ensure!(
        lockup_address_matches(&response.address, &response.redeem_script, network),
        "lockup address does not commit to the redeem script"
    );

    Ok(())
}

/// Fee terms quoted by the counterparty ahead of a swap.
#[derive(Debug, Clone, Copy)]
pub struct SwapQuote {
    pub swap_fee: Amount,
    pub miner_fee: Amount,
    pub prepay_amount: Amount,
    pub cltv_delta: u32,
}

pub fn validate_quote(quote: &SwapQuote, limits: &SwapLimits) -> Result<()> {
    ensure!(
        quote.swap_fee <= limits.max_swap_fee,
        "quoted swap fee {} exceeds the configured maximum {}",
        quote.swap_fee,
        limits.max_swap_fee
    );
    ensure!(
        quote.miner_fee <= limits.max_miner_fee,
        "quoted miner fee {} exceeds the configured maximum {}",
        quote.miner_fee,
        limits.max_miner_fee
    );
    ensure!(
        quote.prepay_amount <= limits.max_prepay,
        "quoted prepay {} exceeds the configured maximum {}",
        quote.prepay_amount,
        limits.max_prepay
    );
    ensure!(
        quote.cltv_delta <= limits.max_cltv_delta,
        "quoted cltv delta {} exceeds the configured maximum {}",
        quote.cltv_delta,
        limits.max_cltv_delta
    );
    Ok(())
}
