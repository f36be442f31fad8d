//! Lightning-side primitives the core touches: BOLT11 helpers, payment
//! parameters for the off-chain offer, and the peer connection string format
//! used in configuration.

use crate::bitcoin::{Amount, PaymentHash};
use anyhow::{bail, Context, Result};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;
use lightning_invoice::Invoice;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub fn payment_hash_from_bolt11(invoice: &str) -> Result<PaymentHash> {
    let invoice =
        Invoice::from_str(invoice).map_err(|e| anyhow::anyhow!("parse BOLT11 invoice: {e:?}"))?;
    Ok(PaymentHash(invoice.payment_hash().into_inner()))
}

pub fn amount_msat_from_bolt11(invoice: &str) -> Result<Option<u64>> {
    let invoice =
        Invoice::from_str(invoice).map_err(|e| anyhow::anyhow!("parse BOLT11 invoice: {e:?}"))?;
    Ok(invoice.amount_milli_satoshis())
}

/// Limits and routing hints for a single off-chain payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentParams {
    #[serde(with = "bitcoin::util::amount::serde::as_sat")]
    pub max_fee: Amount,
    /// Short channel ids the payment must leave through; empty means any.
    pub outgoing_channels: Vec<u64>,
}

/// `<node_pubkey_hex>@<host>:<port>` as it appears in configuration, where
/// host is an IP literal or a DNS name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub node_id: PublicKey,
    pub host: String,
    pub port: u16,
}

impl FromStr for NodeEndpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (node_id, addr) = s
            .split_once('@')
            .context("peer connection string must look like <pubkey>@<host>:<port>")?;
        let node_id = PublicKey::from_str(node_id)
            .map_err(|e| anyhow::anyhow!("invalid node pubkey: {e}"))?;

        let (host, port) = addr
            .rsplit_once(':')
            .context("peer address must include a port")?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            bail!("peer address must include a host");
        }
        let port: u16 = port.parse().context("invalid peer port")?;

        Ok(Self {
            node_id,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.node_id, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.node_id, self.host, self.port)
        }
    }
}
