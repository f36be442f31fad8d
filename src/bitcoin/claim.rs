//! Claim (sweep) transaction for a loop-out HTLC: spends the lockup output
//! through the preimage branch and sends everything minus fee to our wallet.

use crate::bitcoin::fee::FeeRate;
use crate::bitcoin::htlc::{find_htlc_output, TxBuildError};
use crate::bitcoin::{PaymentPreimage, RBF_SEQUENCE};
use ::bitcoin::blockdata::script::Builder;
use ::bitcoin::hashes::Hash;
use ::bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use ::bitcoin::util::bip143::SigHashCache;
use ::bitcoin::{
    Address, Network, OutPoint, Script, SigHashType, Transaction, TxIn, TxOut,
};

/// Upper bound for a DER-encoded ECDSA signature plus sighash flag, used to
/// size the fee estimate before the real signature exists.
const DUMMY_SIGNATURE_LEN: usize = 72;

pub fn create_claim_tx(
    destination: &Address,
    claim_key: &SecretKey,
    preimage: PaymentPreimage,
    redeem_script: &Script,
    fee_rate: FeeRate,
    lockup_tx: &Transaction,
    network: Network,
) -> Result<Transaction, TxBuildError> {
    if destination.network != network {
        return Err(TxBuildError::AddressNetworkMismatch {
            address_network: destination.network,
            expected_network: network,
        });
    }

    let htlc = find_htlc_output(lockup_tx, redeem_script)?;

    let script_sig = if htlc.nested {
        // P2SH(P2WSH): the scriptSig pushes the witness program.
        Builder::new()
            .push_slice(redeem_script.to_v0_p2wsh().as_bytes())
            .into_script()
    } else {
        Script::new()
    };

    let mut claim_tx = Transaction {
        version: 2,
        lock_time: 0,
        input: vec![TxIn {
            previous_output: OutPoint::new(lockup_tx.txid(), htlc.vout),
            script_sig,
            sequence: RBF_SEQUENCE,
            witness: Vec::new(),
        }],
        output: vec![TxOut {
            value: htlc.value,
            script_pubkey: destination.script_pubkey(),
        }],
    };

    // Size the fee against the final witness shape.
    claim_tx.input[0].witness = vec![
        vec![0u8; DUMMY_SIGNATURE_LEN],
        preimage.to_vec(),
        redeem_script.to_bytes(),
    ];
    let vsize = crate::bitcoin::vsize(&claim_tx);
    let fee = fee_rate.fee_for_vsize(vsize);
    if fee.as_sat() >= htlc.value {
        return Err(TxBuildError::FeeExceedsOutput {
            fee: fee.as_sat(),
            output: htlc.value,
        });
    }
    claim_tx.output[0].value = htlc.value - fee.as_sat();
    claim_tx.input[0].witness = Vec::new();

    let digest = SigHashCache::new(&claim_tx).signature_hash(
        0,
        redeem_script,
        htlc.value,
        SigHashType::All,
    );

    let secp = Secp256k1::new();
    let message = Message::from_slice(&digest.into_inner())?;
    let signature = secp.sign(&message, claim_key);

    let mut sig_bytes = signature.serialize_der().to_vec();
    sig_bytes.push(SigHashType::All.as_u32() as u8);

    claim_tx.input[0].witness = vec![sig_bytes, preimage.to_vec(), redeem_script.to_bytes()];

    Ok(claim_tx)
}
