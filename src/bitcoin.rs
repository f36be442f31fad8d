pub mod claim;
pub mod fee;
pub mod htlc;
pub mod lockup;
pub mod refund;
pub mod timelocks;

use anyhow::{Context, Result};
use bitcoin::hashes::{ripemd160, sha256, Hash};
use rand::{CryptoRng, RngCore};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub use ::bitcoin::secp256k1::{PublicKey, SecretKey};
pub use ::bitcoin::{Address, Amount, Network, OutPoint, Script, Transaction, TxIn, TxOut, Txid};
pub use claim::create_claim_tx;
pub use fee::FeeRate;
pub use htlc::{ReverseSwapScript, SwapScript};
pub use lockup::{create_swap_psbt, Utxo};
pub use refund::create_refund_tx;
pub use timelocks::BlockHeight;

/// Sequence enabling replace-by-fee signalling on an input.
pub const RBF_SEQUENCE: u32 = 0xFFFF_FFFD;

/// Sequence that keeps an absolute locktime enforceable without opting into
/// replace-by-fee.
pub const ENABLE_LOCKTIME_NO_RBF: u32 = 0xFFFF_FFFE;

/// The secret whose SHA-256 settles the off-chain payment and unlocks the
/// on-chain claim branch.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PaymentPreimage([u8; 32]);

impl PaymentPreimage {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn hash(&self) -> PaymentHash {
        PaymentHash(sha256::Hash::hash(&self.0).into_inner())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Debug for PaymentPreimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentPreimage({})", hex::encode(self.0))
    }
}

impl fmt::Display for PaymentPreimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PaymentPreimage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 32] = hex::decode(s)
            .context("payment preimage is not hex")?
            .try_into()
            .map_err(|_| anyhow::anyhow!("payment preimage must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PaymentPreimage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PaymentPreimage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// SHA-256 of a [`PaymentPreimage`], the hash-lock both sides of a swap
/// commit to.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PaymentHash(pub [u8; 32]);

impl PaymentHash {
    /// The 20-byte RIPEMD-160 of the payment hash, as it appears inside the
    /// redeem scripts (`OP_HASH160` covers SHA-256 then RIPEMD-160, so the
    /// script commits to `ripemd160(sha256(preimage))`).
    pub fn hash160(&self) -> [u8; 20] {
        ripemd160::Hash::hash(&self.0).into_inner()
    }
}

impl fmt::Debug for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PaymentHash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 32] = hex::decode(s)
            .context("payment hash is not hex")?
            .try_into()
            .map_err(|_| anyhow::anyhow!("payment hash must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PaymentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PaymentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Serde adapter for [`SecretKey`] fields, encoded as hex.
pub mod secret_key_serde {
    use super::SecretKey;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &SecretKey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&key.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretKey, D::Error> {
        let s = String::deserialize(deserializer)?;
        SecretKey::from_str(&s).map_err(de::Error::custom)
    }
}

pub fn random_secret_key<R: RngCore + CryptoRng>(rng: &mut R) -> SecretKey {
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        if let Ok(key) = SecretKey::from_slice(&bytes) {
            return key;
        }
    }
}

pub fn public_key_for(key: &SecretKey) -> PublicKey {
    let secp = ::bitcoin::secp256k1::Secp256k1::new();
    PublicKey::from_secret_key(&secp, key)
}

pub fn tx_to_hex(tx: &Transaction) -> String {
    ::bitcoin::consensus::encode::serialize_hex(tx)
}

pub fn tx_from_hex(hex_str: &str) -> Result<Transaction> {
    let bytes = hex::decode(hex_str).context("transaction hex is not valid hex")?;
    ::bitcoin::consensus::encode::deserialize(&bytes).context("failed to decode transaction")
}

/// Virtual size of a transaction, rounded up.
pub fn vsize(tx: &Transaction) -> usize {
    (tx.get_weight() + 3) / 4
}
