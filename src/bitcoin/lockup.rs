//! Swap (lockup) transaction funding for loop-in: pays the agreed amount into
//! `P2WSH(redeem_script)` from wallet-selected coins, change back to the
//! wallet. Returned as a PSBT so the UTXO provider can sign its own inputs.

use crate::bitcoin::fee::FeeRate;
use crate::bitcoin::htlc::TxBuildError;
use ::bitcoin::util::psbt::PartiallySignedTransaction;
use ::bitcoin::{Address, Amount, Network, OutPoint, Script, Transaction, TxIn, TxOut};

/// A coin handed to us by the UTXO provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub txout: TxOut,
}

impl Utxo {
    pub fn value(&self) -> u64 {
        self.txout.value
    }
}

/// Outputs below this are not worth creating; sub-dust change is folded into
/// the fee.
const DUST_LIMIT: u64 = 546;

/// Approximate witness cost of a P2WPKH spend (signature + pubkey), in
/// virtual bytes.
const P2WPKH_WITNESS_VSIZE: usize = 27;

pub fn create_swap_psbt(
    inputs: &[Utxo],
    redeem_script: &Script,
    output_amount: Amount,
    fee_rate: FeeRate,
    change_address: &Address,
    network: Network,
) -> Result<PartiallySignedTransaction, TxBuildError> {
    if output_amount == Amount::ZERO {
        return Err(TxBuildError::ZeroOutputAmount);
    }
    if change_address.network != network {
        return Err(TxBuildError::AddressNetworkMismatch {
            address_network: change_address.network,
            expected_network: network,
        });
    }

    let total_input: u64 = inputs.iter().map(Utxo::value).sum();
    if total_input < output_amount.as_sat() {
        return Err(TxBuildError::InsufficientInputs {
            required: output_amount.as_sat(),
            available: total_input,
        });
    }

    let mut swap_tx = Transaction {
        version: 2,
        lock_time: 0,
        input: inputs
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint,
                script_sig: Script::new(),
                sequence: 0xFFFF_FFFF,
                witness: Vec::new(),
            })
            .collect(),
        output: vec![
            TxOut {
                value: output_amount.as_sat(),
                script_pubkey: redeem_script.to_v0_p2wsh(),
            },
            TxOut {
                value: 0,
                script_pubkey: change_address.script_pubkey(),
            },
        ],
    };

    let vsize = crate::bitcoin::vsize(&swap_tx) + inputs.len() * P2WPKH_WITNESS_VSIZE;
    let fee = fee_rate.fee_for_vsize(vsize);

    let required = output_amount.as_sat() + fee.as_sat();
    if total_input < required {
        return Err(TxBuildError::InsufficientInputs {
            required,
            available: total_input,
        });
    }

    let change = total_input - required;
    if change >= DUST_LIMIT {
        swap_tx.output[1].value = change;
    } else {
        swap_tx.output.pop();
    }

    let mut psbt = PartiallySignedTransaction::from_unsigned_tx(swap_tx)?;
    for (psbt_input, utxo) in psbt.inputs.iter_mut().zip(inputs) {
        psbt_input.witness_utxo = Some(utxo.txout.clone());
    }

    Ok(psbt)
}
