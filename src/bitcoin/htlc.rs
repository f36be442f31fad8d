//! HTLC redeem scripts for both swap directions.
//!
//! The counterparty serves these scripts over the wire; we rebuild and parse
//! them byte-exactly so that a supplied script can be checked field-by-field
//! against what we agreed to before anything touches the chain.

use crate::bitcoin::{BlockHeight, PaymentHash, PublicKey};
use ::bitcoin::blockdata::opcodes;
use ::bitcoin::blockdata::script::Builder;
use ::bitcoin::{Address, Network, Script, Transaction};

/// A lockup output of interest inside the funding transaction.
#[derive(Debug, Clone, Copy)]
pub struct HtlcOutput {
    pub vout: u32,
    pub value: u64,
    /// The output is `P2SH(P2WSH(redeem_script))` rather than native P2WSH.
    pub nested: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TxBuildError {
    #[error(
        "no lockup output commits to the redeem script; script pubkeys {actual_script_pubkeys:?}, expected commitment to {expected_redeem_script}"
    )]
    RedeemScriptMismatch {
        actual_script_pubkeys: Vec<Script>,
        expected_redeem_script: Script,
    },
    #[error("fee of {fee} sat exceeds the {output} sat lockup output")]
    FeeExceedsOutput { fee: u64, output: u64 },
    #[error("swap output amount must be non-zero")]
    ZeroOutputAmount,
    #[error("selected inputs hold {available} sat, {required} sat required")]
    InsufficientInputs { required: u64, available: u64 },
    #[error("destination address is for {address_network} but the swap runs on {expected_network}")]
    AddressNetworkMismatch {
        address_network: Network,
        expected_network: Network,
    },
    #[error("sighash could not be signed: {0}")]
    Signing(#[from] ::bitcoin::secp256k1::Error),
    #[error("psbt construction failed: {0}")]
    Psbt(#[from] ::bitcoin::util::psbt::Error),
}

/// Scan the lockup transaction for an output paying to
/// `P2WSH(redeem_script)` or `P2SH(P2WSH(redeem_script))`.
pub fn find_htlc_output(
    lockup_tx: &Transaction,
    redeem_script: &Script,
) -> Result<HtlcOutput, TxBuildError> {
    let p2wsh = redeem_script.to_v0_p2wsh();
    let p2sh = p2wsh.to_p2sh();

    for (vout, output) in lockup_tx.output.iter().enumerate() {
        let nested = if output.script_pubkey == p2wsh {
            false
        } else if output.script_pubkey == p2sh {
            true
        } else {
            continue;
        };

        #[allow(clippy::cast_possible_truncation)]
        return Ok(HtlcOutput {
            vout: vout as u32,
            value: output.value,
            nested,
        });
    }

    Err(TxBuildError::RedeemScriptMismatch {
        actual_script_pubkeys: lockup_tx
            .output
            .iter()
            .map(|output| output.script_pubkey.clone())
            .collect(),
        expected_redeem_script: redeem_script.clone(),
    })
}

/// Whether `address` is the P2WSH (or nested P2SH-P2WSH) commitment to
/// `redeem_script` on `network`.
pub fn lockup_address_matches(address: &Address, redeem_script: &Script, network: Network) -> bool {
    *address == Address::p2wsh(redeem_script, network)
        || *address == Address::p2shwsh(redeem_script, network)
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptFormatError {
    #[error("script ended before the expected {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error("unexpected byte {found:#04x} at offset {offset}, expected {expected}")]
    UnexpectedByte {
        offset: usize,
        found: u8,
        expected: &'static str,
    },
    #[error("script number out of range: {0}")]
    NumberOutOfRange(i64),
    #[error("trailing bytes after the end of the script template")]
    TrailingBytes,
    #[error("invalid public key in script: {0}")]
    InvalidPublicKey(#[from] ::bitcoin::secp256k1::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum HtlcValidationError {
    #[error(transparent)]
    Format(#[from] ScriptFormatError),
    #[error("script hash-lock does not commit to the expected payment hash")]
    PaymentHashMismatch,
    #[error("our key is not on the expected branch of the script")]
    KeyMismatch,
    #[error("script timelock is {actual} but the counterparty declared {declared}")]
    TimeoutMismatch {
        declared: BlockHeight,
        actual: BlockHeight,
    },
}

/// Redeem script of a reverse swap (loop-out). We hold the preimage and the
/// claim key; the counterparty holds the refund branch behind the timelock.
///
/// ```text
/// OP_SIZE 32 OP_EQUAL
/// OP_IF
///     OP_HASH160 <ripemd160(payment_hash)> OP_EQUALVERIFY <claim_pubkey>
/// OP_ELSE
///     OP_DROP <timeout> OP_CLTV OP_DROP <refund_pubkey>
/// OP_ENDIF
/// OP_CHECKSIG
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseSwapScript {
    pub preimage_hash160: [u8; 20],
    pub claim_pubkey: PublicKey,
    pub refund_pubkey: PublicKey,
    pub timeout_block_height: BlockHeight,
}

impl ReverseSwapScript {
    pub fn script(&self) -> Script {
        Builder::new()
            .push_opcode(opcodes::all::OP_SIZE)
            .push_int(32)
            .push_opcode(opcodes::all::OP_EQUAL)
            .push_opcode(opcodes::all::OP_IF)
            .push_opcode(opcodes::all::OP_HASH160)
            .push_slice(&self.preimage_hash160)
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_slice(&self.claim_pubkey.serialize())
            .push_opcode(opcodes::all::OP_ELSE)
            .push_opcode(opcodes::all::OP_DROP)
            .push_int(u32::from(self.timeout_block_height) as i64)
            .push_opcode(opcodes::all::OP_CLTV)
            .push_opcode(opcodes::all::OP_DROP)
            .push_slice(&self.refund_pubkey.serialize())
            .push_opcode(opcodes::all::OP_ENDIF)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .into_script()
    }

    pub fn parse(script: &Script) -> Result<Self, ScriptFormatError> {
        let mut cursor = Cursor::new(script.as_bytes());

        cursor.expect_op(opcodes::all::OP_SIZE, "OP_SIZE")?;
        let size = cursor.read_script_num("preimage size")?;
        if size != 32 {
            return Err(ScriptFormatError::NumberOutOfRange(size));
        }
        cursor.expect_op(opcodes::all::OP_EQUAL, "OP_EQUAL")?;
        cursor.expect_op(opcodes::all::OP_IF, "OP_IF")?;
        cursor.expect_op(opcodes::all::OP_HASH160, "OP_HASH160")?;
        let preimage_hash160 = cursor.take_push_array::<20>("preimage hash160")?;
        cursor.expect_op(opcodes::all::OP_EQUALVERIFY, "OP_EQUALVERIFY")?;
        let claim_pubkey = cursor.take_pubkey("claim pubkey")?;
        cursor.expect_op(opcodes::all::OP_ELSE, "OP_ELSE")?;
        cursor.expect_op(opcodes::all::OP_DROP, "OP_DROP")?;
        let timeout = cursor.read_block_height()?;
        cursor.expect_op(opcodes::all::OP_CLTV, "OP_CHECKLOCKTIMEVERIFY")?;
        cursor.expect_op(opcodes::all::OP_DROP, "OP_DROP")?;
        let refund_pubkey = cursor.take_pubkey("refund pubkey")?;
        cursor.expect_op(opcodes::all::OP_ENDIF, "OP_ENDIF")?;
        cursor.expect_op(opcodes::all::OP_CHECKSIG, "OP_CHECKSIG")?;
        cursor.finish()?;

        Ok(Self {
            preimage_hash160,
            claim_pubkey,
            refund_pubkey,
            timeout_block_height: timeout,
        })
    }

    /// Parse a counterparty-supplied script and check it against what we
    /// agreed to: our hash-lock, our claim key, the declared timeout.
    pub fn validate(
        script: &Script,
        payment_hash: &PaymentHash,
        claim_pubkey: &PublicKey,
        declared_timeout: BlockHeight,
    ) -> Result<Self, HtlcValidationError> {
        let parsed = Self::parse(script)?;

        if parsed.preimage_hash160 != payment_hash.hash160() {
            return Err(HtlcValidationError::PaymentHashMismatch);
        }
        if parsed.claim_pubkey != *claim_pubkey {
            return Err(HtlcValidationError::KeyMismatch);
        }
        if parsed.timeout_block_height != declared_timeout {
            return Err(HtlcValidationError::TimeoutMismatch {
                declared: declared_timeout,
                actual: parsed.timeout_block_height,
            });
        }

        Ok(parsed)
    }
}

/// Redeem script of a swap (loop-in). We fund the output and hold the refund
/// branch behind the timelock; the counterparty claims with the preimage.
///
/// ```text
/// OP_HASH160 <ripemd160(payment_hash)> OP_EQUAL
/// OP_IF
///     <claim_pubkey>
/// OP_ELSE
///     <timeout> OP_CLTV OP_DROP <refund_pubkey>
/// OP_ENDIF
/// OP_CHECKSIG
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapScript {
    pub preimage_hash160: [u8; 20],
    pub claim_pubkey: PublicKey,
    pub refund_pubkey: PublicKey,
    pub timeout_block_height: BlockHeight,
}

impl SwapScript {
    pub fn script(&self) -> Script {
        Builder::new()
            .push_opcode(opcodes::all::OP_HASH160)
            .push_slice(&self.preimage_hash160)
            .push_opcode(opcodes::all::OP_EQUAL)
            .push_opcode(opcodes::all::OP_IF)
            .push_slice(&self.claim_pubkey.serialize())
            .push_opcode(opcodes::all::OP_ELSE)
            .push_int(u32::from(self.timeout_block_height) as i64)
            .push_opcode(opcodes::all::OP_CLTV)
            .push_opcode(opcodes::all::OP_DROP)
            .push_slice(&self.refund_pubkey.serialize())
            .push_opcode(opcodes::all::OP_ENDIF)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .into_script()
    }

    pub fn parse(script: &Script) -> Result<Self, ScriptFormatError> {
        let mut cursor = Cursor::new(script.as_bytes());

        cursor.expect_op(opcodes::all::OP_HASH160, "OP_HASH160")?;
        let preimage_hash160 = cursor.take_push_array::<20>("preimage hash160")?;
        cursor.expect_op(opcodes::all::OP_EQUAL, "OP_EQUAL")?;
        cursor.expect_op(opcodes::all::OP_IF, "OP_IF")?;
        let claim_pubkey = cursor.take_pubkey("claim pubkey")?;
        cursor.expect_op(opcodes::all::OP_ELSE, "OP_ELSE")?;
        let timeout = cursor.read_block_height()?;
        cursor.expect_op(opcodes::all::OP_CLTV, "OP_CHECKLOCKTIMEVERIFY")?;
        cursor.expect_op(opcodes::all::OP_DROP, "OP_DROP")?;
        let refund_pubkey = cursor.take_pubkey("refund pubkey")?;
        cursor.expect_op(opcodes::all::OP_ENDIF, "OP_ENDIF")?;
        cursor.expect_op(opcodes::all::OP_CHECKSIG, "OP_CHECKSIG")?;
        cursor.finish()?;

        Ok(Self {
            preimage_hash160,
            claim_pubkey,
            refund_pubkey,
            timeout_block_height: timeout,
        })
    }

    /// Parse a counterparty-supplied script and check our refund branch.
    pub fn validate(
        script: &Script,
        payment_hash: &PaymentHash,
        refund_pubkey: &PublicKey,
        declared_timeout: BlockHeight,
    ) -> Result<Self, HtlcValidationError> {
        let parsed = Self::parse(script)?;

        if parsed.preimage_hash160 != payment_hash.hash160() {
            return Err(HtlcValidationError::PaymentHashMismatch);
        }
        if parsed.refund_pubkey != *refund_pubkey {
            return Err(HtlcValidationError::KeyMismatch);
        }
        if parsed.timeout_block_height != declared_timeout {
            return Err(HtlcValidationError::TimeoutMismatch {
                declared: declared_timeout,
                actual: parsed.timeout_block_height,
            });
        }

        Ok(parsed)
    }
}

/// Byte cursor over a raw script. The two templates above only ever contain
/// plain opcodes and direct pushes, so a flat walk is enough.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn next_byte(&mut self, expected: &'static str) -> Result<u8, ScriptFormatError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(ScriptFormatError::UnexpectedEnd { expected })?;
        self.pos += 1;
        Ok(byte)
    }

    fn expect_op(
        &mut self,
        op: opcodes::All,
        expected: &'static str,
    ) -> Result<(), ScriptFormatError> {
        let offset = self.pos;
        let byte = self.next_byte(expected)?;
        if byte != op.into_u8() {
            return Err(ScriptFormatError::UnexpectedByte {
                offset,
                found: byte,
                expected,
            });
        }
        Ok(())
    }

    fn take_push(&mut self, expected: &'static str) -> Result<&'a [u8], ScriptFormatError> {
        let offset = self.pos;
        let len = self.next_byte(expected)?;
        if !(0x01..=0x4b).contains(&len) {
            return Err(ScriptFormatError::UnexpectedByte {
                offset,
                found: len,
                expected,
            });
        }
        let len = len as usize;
        let data = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or(ScriptFormatError::UnexpectedEnd { expected })?;
        self.pos += len;
        Ok(data)
    }

    fn take_push_array<const N: usize>(
        &mut self,
        expected: &'static str,
    ) -> Result<[u8; N], ScriptFormatError> {
        let offset = self.pos;
        let data = self.take_push(expected)?;
        data.try_into()
            .map_err(|_| ScriptFormatError::UnexpectedByte {
                offset,
                found: data.len() as u8,
                expected,
            })
    }

    fn take_pubkey(&mut self, expected: &'static str) -> Result<PublicKey, ScriptFormatError> {
        let data = self.take_push(expected)?;
        Ok(PublicKey::from_slice(data)?)
    }

    /// Minimally-encoded script number: either an `OP_PUSHNUM` or a direct
    /// push of little-endian sign-magnitude bytes.
    fn read_script_num(&mut self, expected: &'static str) -> Result<i64, ScriptFormatError> {
        let offset = self.pos;
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(ScriptFormatError::UnexpectedEnd { expected })?;

        let one = opcodes::all::OP_PUSHNUM_1.into_u8();
        let sixteen = opcodes::all::OP_PUSHNUM_16.into_u8();
        if (one..=sixteen).contains(&byte) {
            self.pos += 1;
            return Ok((byte - one + 1) as i64);
        }
        if byte == opcodes::all::OP_PUSHBYTES_0.into_u8() {
            self.pos += 1;
            return Ok(0);
        }

        let bytes = self.take_push(expected)?;
        if bytes.len() > 5 {
            return Err(ScriptFormatError::UnexpectedByte {
                offset,
                found: bytes.len() as u8,
                expected,
            });
        }

        let mut magnitude = bytes.to_vec();
        let negative = magnitude.last().is_some_and(|b| (b & 0x80) != 0);
        if let Some(last) = magnitude.last_mut() {
            *last &= 0x7f;
        }

        let mut value: i64 = 0;
        for (i, b) in magnitude.iter().enumerate() {
            value |= (*b as i64) << (8 * i);
        }

        Ok(if negative { -value } else { value })
    }

    fn read_block_height(&mut self) -> Result<BlockHeight, ScriptFormatError> {
        let value = self.read_script_num("timeout block height")?;
        if !(0..=i64::from(u32::MAX)).contains(&value) {
            return Err(ScriptFormatError::NumberOutOfRange(value));
        }
        Ok(BlockHeight::new(value as u32))
    }

    fn finish(&self) -> Result<(), ScriptFormatError> {
        if self.pos != self.bytes.len() {
            return Err(ScriptFormatError::TrailingBytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::{public_key_for, random_secret_key, PaymentPreimage};
    use ::bitcoin::{Transaction, TxOut};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn reverse_script_fixture() -> (ReverseSwapScript, PaymentHash) {
        let mut rng = StdRng::seed_from_u64(42);
        let payment_hash = PaymentPreimage::random(&mut rng).hash();
        let script = ReverseSwapScript {
            preimage_hash160: payment_hash.hash160(),
            claim_pubkey: public_key_for(&random_secret_key(&mut rng)),
            refund_pubkey: public_key_for(&random_secret_key(&mut rng)),
            timeout_block_height: BlockHeight::new(500_123),
        };
        (script, payment_hash)
    }

    #[test]
    fn reverse_swap_script_parse_round_trip() {
        let (expected, _) = reverse_script_fixture();
        let parsed = ReverseSwapScript::parse(&expected.script()).unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn swap_script_parse_round_trip() {
        let (reverse, _) = reverse_script_fixture();
        let expected = SwapScript {
            preimage_hash160: reverse.preimage_hash160,
            claim_pubkey: reverse.claim_pubkey,
            refund_pubkey: reverse.refund_pubkey,
            timeout_block_height: BlockHeight::new(17),
        };
        let parsed = SwapScript::parse(&expected.script()).unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn small_timeout_encodes_as_pushnum() {
        let (reverse, _) = reverse_script_fixture();
        let script = ReverseSwapScript {
            timeout_block_height: BlockHeight::new(16),
            ..reverse
        };
        let parsed = ReverseSwapScript::parse(&script.script()).unwrap();
        assert_eq!(parsed.timeout_block_height, BlockHeight::new(16));
    }

    #[test]
    fn validate_rejects_wrong_payment_hash() {
        let (script, _) = reverse_script_fixture();
        let mut rng = StdRng::seed_from_u64(7);
        let other_hash = PaymentPreimage::random(&mut rng).hash();

        let result = ReverseSwapScript::validate(
            &script.script(),
            &other_hash,
            &script.claim_pubkey,
            script.timeout_block_height,
        );
        assert!(matches!(
            result,
            Err(HtlcValidationError::PaymentHashMismatch)
        ));
    }

    #[test]
    fn validate_rejects_wrong_claim_key() {
        let (script, payment_hash) = reverse_script_fixture();
        let mut rng = StdRng::seed_from_u64(9);
        let other_key = public_key_for(&random_secret_key(&mut rng));

        let result = ReverseSwapScript::validate(
            &script.script(),
            &payment_hash,
            &other_key,
            script.timeout_block_height,
        );
        assert!(matches!(result, Err(HtlcValidationError::KeyMismatch)));
    }

    #[test]
    fn validate_rejects_wrong_timeout() {
        let (script, payment_hash) = reverse_script_fixture();

        let result = ReverseSwapScript::validate(
            &script.script(),
            &payment_hash,
            &script.claim_pubkey,
            BlockHeight::new(1),
        );
        assert!(matches!(
            result,
            Err(HtlcValidationError::TimeoutMismatch { .. })
        ));
    }

    #[test]
    fn parse_rejects_truncated_script() {
        let (script, _) = reverse_script_fixture();
        let bytes = script.script().to_bytes();
        let truncated = Script::from(bytes[..bytes.len() - 2].to_vec());

        assert!(ReverseSwapScript::parse(&truncated).is_err());
    }

    #[test]
    fn find_htlc_output_matches_native_and_nested() {
        let (script, _) = reverse_script_fixture();
        let redeem = script.script();

        let tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![],
            output: vec![
                TxOut {
                    value: 1_000,
                    script_pubkey: Script::new(),
                },
                TxOut {
                    value: 50_000,
                    script_pubkey: redeem.to_v0_p2wsh(),
                },
            ],
        };
        let found = find_htlc_output(&tx, &redeem).unwrap();
        assert_eq!(found.vout, 1);
        assert_eq!(found.value, 50_000);
        assert!(!found.nested);

        let nested_tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![],
            output: vec![TxOut {
                value: 60_000,
                script_pubkey: redeem.to_v0_p2wsh().to_p2sh(),
            }],
        };
        let found = find_htlc_output(&nested_tx, &redeem).unwrap();
        assert!(found.nested);
    }

    #[test]
    fn find_htlc_output_fails_on_foreign_outputs() {
        let (script, _) = reverse_script_fixture();

        let tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![],
            output: vec![TxOut {
                value: 1_000,
                script_pubkey: Script::new(),
            }],
        };
        assert!(matches!(
            find_htlc_output(&tx, &script.script()),
            Err(TxBuildError::RedeemScriptMismatch { .. })
        ));
    }

    #[test]
    fn lockup_address_check_accepts_both_encodings() {
        let (script, _) = reverse_script_fixture();
        let redeem = script.script();

        let native = Address::p2wsh(&redeem, Network::Regtest);
        let nested = Address::p2shwsh(&redeem, Network::Regtest);
        assert!(lockup_address_matches(&native, &redeem, Network::Regtest));
        assert!(lockup_address_matches(&nested, &redeem, Network::Regtest));

        let other = Address::p2wsh(&Script::new(), Network::Regtest);
        assert!(!lockup_address_matches(&other, &redeem, Network::Regtest));
    }
}
