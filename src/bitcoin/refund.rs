//! Refund transaction for a loop-in HTLC: once the timeout height is
//! reachable, spends our lockup output back to the wallet through the
//! timelock branch.

use crate::bitcoin::fee::FeeRate;
use crate::bitcoin::htlc::{find_htlc_output, TxBuildError};
use crate::bitcoin::{BlockHeight, ENABLE_LOCKTIME_NO_RBF};
use ::bitcoin::blockdata::script::Builder;
use ::bitcoin::hashes::Hash;
use ::bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use ::bitcoin::util::bip143::SigHashCache;
use ::bitcoin::{
    Address, Network, OutPoint, Script, SigHashType, Transaction, TxIn, TxOut,
};

const DUMMY_SIGNATURE_LEN: usize = 72;

pub fn create_refund_tx(
    lockup_tx: &Transaction,
    redeem_script: &Script,
    fee_rate: FeeRate,
    refund_address: &Address,
    refund_key: &SecretKey,
    timeout_block_height: BlockHeight,
    network: Network,
) -> Result<Transaction, TxBuildError> {
    if refund_address.network != network {
        return Err(TxBuildError::AddressNetworkMismatch {
            address_network: refund_address.network,
            expected_network: network,
        });
    }

    let htlc = find_htlc_output(lockup_tx, redeem_script)?;

    let script_sig = if htlc.nested {
        Builder::new()
            .push_slice(redeem_script.to_v0_p2wsh().as_bytes())
            .into_script()
    } else {
        Script::new()
    };

    let mut refund_tx = Transaction {
        version: 2,
        // OP_CLTV compares against nLockTime; the input sequence must leave
        // locktime checking enabled.
        lock_time: timeout_block_height.into(),
        input: vec![TxIn {
            previous_output: OutPoint::new(lockup_tx.txid(), htlc.vout),
            script_sig,
            sequence: ENABLE_LOCKTIME_NO_RBF,
            witness: Vec::new(),
        }],
        output: vec![TxOut {
            value: htlc.value,
            script_pubkey: refund_address.script_pubkey(),
        }],
    };

    refund_tx.input[0].witness = vec![
        vec![0u8; DUMMY_SIGNATURE_LEN],
        Vec::new(),
        redeem_script.to_bytes(),
    ];
    let vsize = crate::bitcoin::vsize(&refund_tx);
    let fee = fee_rate.fee_for_vsize(vsize);
    if fee.as_sat() >= htlc.value {
        return Err(TxBuildError::FeeExceedsOutput {
            fee: fee.as_sat(),
            output: htlc.value,
        });
    }
    refund_tx.output[0].value = htlc.value - fee.as_sat();
    refund_tx.input[0].witness = Vec::new();

    let digest = SigHashCache::new(&refund_tx).signature_hash(
        0,
        redeem_script,
        htlc.value,
        SigHashType::All,
    );

    let secp = Secp256k1::new();
    let message = Message::from_slice(&digest.into_inner())?;
    let signature = secp.sign(&message, refund_key);

    let mut sig_bytes = signature.serialize_der().to_vec();
    sig_bytes.push(SigHashType::All.as_u32() as u8);

    // The empty middle push selects the OP_ELSE branch of the script.
    refund_tx.input[0].witness = vec![sig_bytes, Vec::new(), redeem_script.to_bytes()];

    Ok(refund_tx)
}
